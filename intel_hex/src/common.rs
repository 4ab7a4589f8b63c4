use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub addr: u16,
    pub kind: RecordKind,
    /// Empty only for EndOfFile records.
    pub data: Vec<u8>,
}

impl Record {
    pub fn end_of_file() -> Self {
        Record {
            addr: 0,
            kind: RecordKind::EndOfFile,
            data: Vec::new(),
        }
    }

    /// Checksum over the byte count, address, type and data fields.
    pub fn checksum(&self) -> u8 {
        let mut to_checksum = Vec::with_capacity(4 + self.data.len());
        to_checksum.push(self.data.len() as u8);
        to_checksum.extend_from_slice(&self.addr.to_be_bytes());
        to_checksum.push(self.kind.to_int());
        to_checksum.extend_from_slice(&self.data);
        calculate_checksum(&to_checksum)
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum RecordKind {
    Data,
    EndOfFile,
    ExtendedSegmentAddress,
    StartSegmentAddress,
    ExtendedLinearAddress,
    StartLinearAddress,
}

impl RecordKind {
    pub fn from_int(kind: u8) -> Option<Self> {
        use RecordKind::*;
        match kind {
            0 => Some(Data),
            1 => Some(EndOfFile),
            2 => Some(ExtendedSegmentAddress),
            3 => Some(StartSegmentAddress),
            4 => Some(ExtendedLinearAddress),
            5 => Some(StartLinearAddress),
            _ => None,
        }
    }

    pub fn to_int(self) -> u8 {
        use RecordKind::*;
        match self {
            Data => 0,
            EndOfFile => 1,
            ExtendedSegmentAddress => 2,
            StartSegmentAddress => 3,
            ExtendedLinearAddress => 4,
            StartLinearAddress => 5,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use RecordKind::*;
        match self {
            Data => write!(f, "Data"),
            EndOfFile => write!(f, "EndOfFile"),
            ExtendedSegmentAddress => write!(f, "ExtendedSegmentAddress"),
            StartSegmentAddress => write!(f, "StartSegmentAddress"),
            ExtendedLinearAddress => write!(f, "ExtendedLinearAddress"),
            StartLinearAddress => write!(f, "StartLinearAddress"),
        }
    }
}

/// A run of consecutive bytes starting at an absolute address.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub addr: u32,
    pub(crate) data: Vec<u8>,
}

impl Chunk {
    pub fn new(addr: u32, data: Vec<u8>) -> Self {
        Chunk { addr, data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StartAddress {
    Segment(SegmentStart),
    Linear(u32),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SegmentStart {
    pub cs: u16,
    pub ip: u16,
}

impl fmt::Display for StartAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartAddress::Segment(SegmentStart { cs, ip }) => write!(f, "{cs:04X}:{ip:04X}"),
            StartAddress::Linear(eip) => write!(f, "{eip:#010X}"),
        }
    }
}

pub(crate) fn calculate_checksum(to_checksum: &[u8]) -> u8 {
    let mut calculated: u16 = 0;
    for &value in to_checksum {
        calculated = (calculated + value as u16) & 0xff;
    }
    // Two's complement: flip each bit then add 1.
    calculated = (calculated ^ 0xff) + 1;
    (calculated & 0xff) as u8
}

#[cfg(test)]
pub(crate) mod test {
    use std::path::PathBuf;

    pub fn test_file_path(name: &str) -> PathBuf {
        let mut file_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        file_path.pop();
        file_path.push("test_files");
        file_path.push(name);
        file_path
    }

    #[test]
    fn checksum_of_data_record() {
        let record = super::Record {
            addr: 0x0030,
            kind: super::RecordKind::Data,
            data: vec![
                0x02, 0x33, 0x7A, 0x30, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00,
            ],
        };
        // Sum 0x10+0x00+0x30+0x00+0x02+0x33+0x7A+0x30 = 0x11F, low byte 0x1F.
        assert_eq!(record.checksum(), 0xE1);
    }

    #[test]
    fn checksum_of_eof_record() {
        assert_eq!(super::Record::end_of_file().checksum(), 0xFF);
    }

    #[test]
    fn record_kind_round_trips_through_int() {
        for value in 0..=5 {
            let kind = super::RecordKind::from_int(value).expect("known kind");
            assert_eq!(kind.to_int(), value);
        }
        assert!(super::RecordKind::from_int(6).is_none());
    }
}
