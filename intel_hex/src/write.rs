use std::cmp::min;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::num::NonZeroU8;
use std::path::Path;

use bytes::BufMut;
use tracing::debug;

use crate::common::{Record, RecordKind, SegmentStart, StartAddress};
use crate::image::SparseImage;

/// Data bytes per record written by most tools.
pub const DEFAULT_RECORD_LEN: NonZeroU8 = match NonZeroU8::new(16) {
    Some(len) => len,
    None => unreachable!(),
};

const SEGMENT_SIZE: usize = 0x1_0000;

/// Encodes `image` and writes it to `path`, replacing any existing file.
/// Nothing touches the file system until the whole text is encoded.
pub fn write_hex_file<P: AsRef<Path>>(
    image: &SparseImage,
    path: P,
    record_len: NonZeroU8,
) -> io::Result<()> {
    let records = encode_image(image, record_len);
    let text = format_records(&records);
    debug!(
        path = %path.as_ref().display(),
        records = records.len(),
        "writing hex file"
    );
    fs::write(path, text)
}

/// Splits `image` into records.
///
/// Data records hold at most `record_len` bytes and never cross a 64 KiB
/// boundary. An ExtendedLinearAddress record precedes the first data record
/// whose upper 16 address bits differ from the previous one (initially 0).
/// The start address, if any, comes first and EndOfFile last.
pub fn encode_image(image: &SparseImage, record_len: NonZeroU8) -> Vec<Record> {
    let mut records = Vec::new();

    if let Some(start_addr) = image.start_addr() {
        records.push(start_address_record(start_addr));
    }

    let mut upper: u16 = 0;
    for (mut addr, mut data) in image.runs() {
        while !data.is_empty() {
            let chunk_upper = (addr >> 16) as u16;
            if chunk_upper != upper {
                let mut payload = Vec::with_capacity(2);
                payload.put_u16(chunk_upper);
                records.push(Record {
                    addr: 0,
                    kind: RecordKind::ExtendedLinearAddress,
                    data: payload,
                });
                upper = chunk_upper;
            }

            let lower = addr as u16;
            let to_boundary = SEGMENT_SIZE - lower as usize;
            let count = min(min(record_len.get() as usize, data.len()), to_boundary);
            records.push(Record {
                addr: lower,
                kind: RecordKind::Data,
                data: data[..count].to_vec(),
            });
            data = &data[count..];
            addr = addr.wrapping_add(count as u32);
        }
    }

    records.push(Record::end_of_file());
    records
}

fn start_address_record(start_addr: StartAddress) -> Record {
    let mut payload = Vec::with_capacity(4);
    let kind = match start_addr {
        StartAddress::Segment(SegmentStart { cs, ip }) => {
            payload.put_u16(cs);
            payload.put_u16(ip);
            RecordKind::StartSegmentAddress
        }
        StartAddress::Linear(eip) => {
            payload.put_u32(eip);
            RecordKind::StartLinearAddress
        }
    };
    Record {
        addr: 0,
        kind,
        data: payload,
    }
}

/// One line per record, uppercase hex, each terminated with `\n`.
pub fn format_records(records: &[Record]) -> String {
    // ':' + 5 header/checksum bytes + data, two digits per byte, plus newline.
    let capacity = records.iter().map(|r| 12 + r.data.len() * 2).sum();
    let mut text = String::with_capacity(capacity);
    for record in records {
        format_record(&mut text, record);
    }
    text
}

fn format_record(text: &mut String, record: &Record) {
    // Writing into a String cannot fail.
    let _ = write!(
        text,
        ":{:02X}{:04X}{:02X}",
        record.data.len(),
        record.addr,
        record.kind.to_int()
    );
    for byte in &record.data {
        let _ = write!(text, "{byte:02X}");
    }
    let _ = writeln!(text, "{:02X}", record.checksum());
}
