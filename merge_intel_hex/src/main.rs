use std::num::NonZeroU8;
use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use intel_hex::*;

/*
Usage:
  merge_intel_hex bootloader.hex application.hex firmware.hex

  The two inputs may be given in either order. The gap between them is
  filled with --pad-byte (0xFF unless set).

 */

#[derive(Parser, Debug)]
#[command(version, about = "Merge two Intel HEX images, padding the gap between them")]
struct Args {
    /// First input image
    hex_file_1: PathBuf,

    /// Second input image
    hex_file_2: PathBuf,

    /// Merged output, replaced if it exists
    hex_merged_output: PathBuf,

    /// Byte written into the gap between the images (decimal or 0x-prefixed hex)
    #[arg(long, env = "MERGE_HEX_PAD_BYTE", default_value = "0xFF", value_parser = parse_byte)]
    pad_byte: u8,

    /// Data bytes per record in the output file
    #[arg(long, env = "MERGE_HEX_RECORD_LEN", default_value_t = DEFAULT_RECORD_LEN)]
    record_len: NonZeroU8,

    /// Log more (-v for info, -vv for debug); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_byte(value: &str) -> Result<u8, String> {
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(digits) => u8::from_str_radix(digits, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("'{value}' is not a byte value: {e}"))
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);
    tracing::debug!(?args, "parsed arguments");

    if let Err(e) = try_main(args) {
        eprintln!("ERROR: {:#}", e);
        process::exit(1);
    }
}

fn try_main(args: Args) -> anyhow::Result<()> {
    let options = MergeOptions {
        pad_byte: args.pad_byte,
        record_len: args.record_len,
    };
    merge_images(
        &args.hex_file_1,
        &args.hex_file_2,
        &args.hex_merged_output,
        options,
    )
    .with_context(|| {
        format!(
            "failed to merge {} and {}",
            args.hex_file_1.display(),
            args.hex_file_2.display()
        )
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_byte_values() {
        assert_eq!(parse_byte("0xFF"), Ok(0xFF));
        assert_eq!(parse_byte("0x0a"), Ok(0x0A));
        assert_eq!(parse_byte("0X7f"), Ok(0x7F));
        assert_eq!(parse_byte("255"), Ok(255));
        assert_eq!(parse_byte("0"), Ok(0));
        assert!(parse_byte("0x100").is_err());
        assert!(parse_byte("256").is_err());
        assert!(parse_byte("ff").is_err());
    }

    #[test]
    fn positional_arguments_and_defaults() {
        let args = Args::try_parse_from(["merge_intel_hex", "a.hex", "b.hex", "out.hex"])
            .expect("valid arguments");
        assert_eq!(args.hex_file_1, PathBuf::from("a.hex"));
        assert_eq!(args.hex_file_2, PathBuf::from("b.hex"));
        assert_eq!(args.hex_merged_output, PathBuf::from("out.hex"));
        assert_eq!(args.pad_byte, DEFAULT_PAD_BYTE);
        assert_eq!(args.record_len, DEFAULT_RECORD_LEN);
        assert_eq!(args.verbose, 0);
    }

    #[test]
    fn options_override_defaults() {
        let args = Args::try_parse_from([
            "merge_intel_hex",
            "--pad-byte",
            "0x00",
            "--record-len",
            "32",
            "-vv",
            "a.hex",
            "b.hex",
            "out.hex",
        ])
        .expect("valid arguments");
        assert_eq!(args.pad_byte, 0x00);
        assert_eq!(args.record_len.get(), 32);
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn rejects_zero_record_len() {
        let result = Args::try_parse_from([
            "merge_intel_hex",
            "--record-len",
            "0",
            "a.hex",
            "b.hex",
            "out.hex",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn requires_three_paths() {
        assert!(Args::try_parse_from(["merge_intel_hex", "a.hex", "b.hex"]).is_err());
    }
}
