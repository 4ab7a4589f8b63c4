use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use bytes::Buf;

use crate::common::{calculate_checksum, Record, RecordKind};

mod hex;

pub use hex::InvalidHexString;

/// Hex digits in a record besides its data: byte count, address, type, checksum.
const OVERHEAD_DIGITS: usize = 2 + 4 + 2 + 2;

pub fn parse_hex_file<P>(path: P) -> Result<Vec<Record>>
where
    P: AsRef<Path>,
{
    let content = fs::read(path).map_err(Error::ReadFile)?;
    parse_hex(&content)
}

pub fn parse_hex_str(content: &str) -> Result<Vec<Record>> {
    parse_hex(content.as_bytes())
}

/// Decodes one record per line.
///
/// Lines may end in `\n` or `\r\n` and blank lines are skipped. Every
/// other line must hold exactly one record, from its `:` start code to its
/// checksum, and nothing else.
pub fn parse_hex(content: &[u8]) -> Result<Vec<Record>> {
    if !content.is_ascii() {
        return Err(Error::NotAscii);
    }

    content
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .enumerate()
        .filter(|(_, line)| !line.is_empty())
        .map(|(idx, line)| {
            decode_line(line).map_err(|kind| Error::ParseLine {
                line_no: idx + 1,
                kind,
            })
        })
        .collect()
}

fn decode_line(line: &[u8]) -> std::result::Result<Record, LineError> {
    let digits = line.strip_prefix(b":").ok_or(LineError::MissingStartCode)?;

    // The byte count fixes how long the rest of the line has to be.
    let byte_count = match digits.get(..2) {
        Some(count_digits) => hex::hex_string_to_bytes(count_digits)
            .map_err(LineError::InvalidHex)?
            .as_slice()
            .get_u8(),
        None => {
            return Err(LineError::Truncated {
                expected: OVERHEAD_DIGITS,
                found: digits.len(),
            })
        }
    };
    let expected = OVERHEAD_DIGITS + byte_count as usize * 2;
    match digits.len().cmp(&expected) {
        Ordering::Less => {
            return Err(LineError::Truncated {
                expected,
                found: digits.len(),
            })
        }
        Ordering::Greater => return Err(LineError::TrailingCharacters(digits.len() - expected)),
        Ordering::Equal => {}
    }

    let bytes = hex::hex_string_to_bytes(digits).map_err(LineError::InvalidHex)?;
    let (covered, checksum) = bytes.split_at(bytes.len() - 1);
    let calculated = calculate_checksum(covered);
    if checksum[0] != calculated {
        return Err(LineError::ChecksumMismatch {
            expected: calculated,
        });
    }

    let mut cursor = covered;
    cursor.advance(1);
    let addr = cursor.get_u16();
    let kind_val = cursor.get_u8();
    let kind = RecordKind::from_int(kind_val).ok_or(LineError::InvalidType(kind_val))?;
    check_byte_count(kind, byte_count)?;

    Ok(Record {
        addr,
        kind,
        data: cursor.to_vec(),
    })
}

fn check_byte_count(kind: RecordKind, byte_count: u8) -> std::result::Result<(), LineError> {
    use RecordKind::*;
    let required = match kind {
        Data if byte_count == 0 => return Err(LineError::EmptyDataRecord),
        Data => return Ok(()),
        EndOfFile => 0,
        ExtendedSegmentAddress | ExtendedLinearAddress => 2,
        StartSegmentAddress | StartLinearAddress => 4,
    };
    if byte_count == required {
        Ok(())
    } else {
        Err(LineError::InvalidByteCount {
            kind,
            found: byte_count,
            required,
        })
    }
}

#[derive(Debug)]
pub enum Error {
    ReadFile(io::Error),
    NotAscii,
    ParseLine { line_no: usize, kind: LineError },
}

/// Why a single line is not a valid record.
#[derive(Debug, PartialEq)]
pub enum LineError {
    MissingStartCode,
    /// Fewer hex digits than the byte count requires.
    Truncated { expected: usize, found: usize },
    /// Characters following the checksum.
    TrailingCharacters(usize),
    InvalidHex(InvalidHexString),
    ChecksumMismatch { expected: u8 },
    InvalidType(u8),
    InvalidByteCount {
        kind: RecordKind,
        found: u8,
        required: u8,
    },
    EmptyDataRecord,
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use LineError::*;
        match self {
            MissingStartCode => write!(f, "line does not start with ':'"),
            Truncated { expected, found } => {
                write!(f, "record truncated: expected {expected} hex digits, found {found}")
            }
            TrailingCharacters(count) => {
                write!(f, "{count} unexpected characters after the checksum")
            }
            // Offsets count from the digit after ':', columns from the ':'.
            InvalidHex(InvalidHexString { digit, offset }) => write!(
                f,
                "invalid hex digit '{}' in column {}",
                digit.escape_ascii(),
                offset + 2
            ),
            ChecksumMismatch { expected } => write!(f, "checksum mismatch, expected {expected:02X}"),
            InvalidType(kind) => write!(f, "invalid record type {kind:02X}"),
            InvalidByteCount {
                kind,
                found,
                required,
            } => write!(
                f,
                "{kind} record has byte count {found}, must be {required}"
            ),
            EmptyDataRecord => write!(f, "data record is empty"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ReadFile(io_error) => write!(f, "error reading the file: {io_error}"),
            Error::NotAscii => write!(f, "not all characters are ASCII"),
            Error::ParseLine { line_no, kind } => write!(f, "line {line_no}: {kind}"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
