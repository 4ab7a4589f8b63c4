use std::fmt;

use bytes::Buf;

use crate::common::{Chunk, Record, RecordKind, SegmentStart, StartAddress};

/// Resolves extended address records into absolute chunks and checks the
/// structure of the record sequence as a whole.
pub fn process_records(records: Vec<Record>) -> ProcessResult {
    let mut resolver = AddressResolver::default();
    for (index, record) in records.into_iter().enumerate() {
        resolver.feed(index, record)?;
    }
    resolver.finish()
}

#[derive(Default)]
struct AddressResolver {
    chunks: Vec<Chunk>,
    base_addr: u32,
    /// First extended address record; later ones must be the same kind.
    extended_by: Option<IndexTypePair>,
    start: Option<(usize, StartAddress)>,
    eof_index: Option<usize>,
}

impl AddressResolver {
    fn feed(&mut self, index: usize, record: Record) -> Result<(), ProcessError> {
        if let Some(eof_index) = self.eof_index {
            return Err(ProcessError::RecordAfterEof { eof_index, index });
        }
        check_payload_len(index, &record)?;

        let mut payload = record.data.as_slice();
        match record.kind {
            RecordKind::Data => {
                let addr = self.base_addr + record.addr as u32;
                let last_offset = record.data.len() as u32 - 1;
                if addr.checked_add(last_offset).is_none() {
                    return Err(ProcessError::AddressOverflow(index));
                }
                self.chunks.push(Chunk::new(addr, record.data));
            }
            RecordKind::EndOfFile => self.eof_index = Some(index),
            RecordKind::ExtendedSegmentAddress => {
                self.check_extended_kind(index, record.kind)?;
                self.base_addr = payload.get_u16() as u32 * 16;
            }
            RecordKind::ExtendedLinearAddress => {
                self.check_extended_kind(index, record.kind)?;
                self.base_addr = (payload.get_u16() as u32) << 16;
            }
            RecordKind::StartSegmentAddress => {
                let cs = payload.get_u16();
                let ip = payload.get_u16();
                self.set_start(index, StartAddress::Segment(SegmentStart { cs, ip }))?;
            }
            RecordKind::StartLinearAddress => {
                self.set_start(index, StartAddress::Linear(payload.get_u32()))?;
            }
        }
        Ok(())
    }

    fn check_extended_kind(&mut self, index: usize, kind: RecordKind) -> Result<(), ProcessError> {
        if let Some(first) = self.extended_by {
            if first.kind != kind {
                return Err(ProcessError::MixedExtendedAddrRecords {
                    first,
                    conflicting: IndexTypePair { index, kind },
                });
            }
            return Ok(());
        }
        self.extended_by = Some(IndexTypePair { index, kind });
        Ok(())
    }

    fn set_start(&mut self, index: usize, start_addr: StartAddress) -> Result<(), ProcessError> {
        if let Some((first, _)) = self.start {
            return Err(ProcessError::MultipleStartAddrRecords {
                first,
                second: index,
            });
        }
        self.start = Some((index, start_addr));
        Ok(())
    }

    fn finish(self) -> ProcessResult {
        if self.eof_index.is_none() {
            return Err(ProcessError::MissingEofRecord);
        }
        Ok(ProcessOutput {
            chunks: self.chunks,
            start_addr: self.start.map(|(_, start_addr)| start_addr),
        })
    }
}

/// Records built by hand can carry any payload, so the payload reads
/// above are guarded here rather than trusted.
fn check_payload_len(index: usize, record: &Record) -> Result<(), ProcessError> {
    let valid = match record.kind {
        RecordKind::Data => !record.data.is_empty() && record.data.len() <= u8::MAX as usize,
        RecordKind::EndOfFile => record.data.is_empty(),
        RecordKind::ExtendedSegmentAddress | RecordKind::ExtendedLinearAddress => {
            record.data.len() == 2
        }
        RecordKind::StartSegmentAddress | RecordKind::StartLinearAddress => record.data.len() == 4,
    };
    if valid {
        Ok(())
    } else {
        Err(ProcessError::MalformedRecord {
            index,
            kind: record.kind,
        })
    }
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub chunks: Vec<Chunk>,
    pub start_addr: Option<StartAddress>,
}

#[derive(Debug, PartialEq)]
pub enum ProcessError {
    MultipleStartAddrRecords {
        first: usize,
        second: usize,
    },
    MixedExtendedAddrRecords {
        first: IndexTypePair,
        conflicting: IndexTypePair,
    },
    MissingEofRecord,
    RecordAfterEof {
        eof_index: usize,
        index: usize,
    },
    MalformedRecord {
        index: usize,
        kind: RecordKind,
    },
    AddressOverflow(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexTypePair {
    pub index: usize,
    pub kind: RecordKind,
}

impl fmt::Display for IndexTypePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} record at index {}", self.kind, self.index)
    }
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to process records: ")?;
        use ProcessError::*;
        match self {
            MultipleStartAddrRecords { first, second } => write!(
                f,
                "start address set twice, by records at indices {first} and {second}"
            ),
            MixedExtendedAddrRecords { first, conflicting } => {
                write!(f, "{conflicting} mixes address modes with {first}")
            }
            MissingEofRecord => write!(f, "EOF record missing"),
            RecordAfterEof { eof_index, index } => {
                write!(f, "record at index {index} follows the EOF record at index {eof_index}")
            }
            MalformedRecord { index, kind } => {
                write!(f, "{kind} record at index {index} has the wrong payload length")
            }
            AddressOverflow(index) => {
                write!(f, "data record at index {index} extends past the 4 GiB address space")
            }
        }
    }
}

impl std::error::Error for ProcessError {}

pub type ProcessResult = std::result::Result<ProcessOutput, ProcessError>;
