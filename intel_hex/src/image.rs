use std::cmp::min;
use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU8;
use std::ops::RangeBounds;
use std::path::Path;

use tracing::debug;

use crate::common::{Chunk, StartAddress};
use crate::parse::{self, parse_hex_file};
use crate::process::{process_records, ProcessError};
use crate::write::write_hex_file;

/// One past the highest address.
const ADDRESS_SPACE_END: u64 = 1 << 32;

/// Firmware contents as a mapping from address to byte.
/// Addresses that were never written are absent, not zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseImage {
    /// Maximal runs of populated addresses keyed by their first address.
    /// Runs are never empty and never touch or overlap each other.
    runs: BTreeMap<u32, Vec<u8>>,
    start_addr: Option<StartAddress>,
}

/// What `SparseImage::merge` does when both images define the same address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlap {
    Error,
    Ignore,
    Replace,
}

impl SparseImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes an Intel HEX file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let records = parse_hex_file(path).map_err(LoadError::Parse)?;
        let output = process_records(records).map_err(LoadError::Process)?;

        let mut image = SparseImage::from_chunks(output.chunks)?;
        image.start_addr = output.start_addr;
        debug!(
            path = %path.display(),
            len = image.len(),
            runs = image.runs.len(),
            min = ?image.min_address(),
            max = ?image.max_address(),
            "loaded hex file"
        );
        Ok(image)
    }

    /// Builds an image from chunks that must not share any address.
    pub fn from_chunks<I>(chunks: I) -> Result<Self, LoadError>
    where
        I: IntoIterator<Item = Chunk>,
    {
        let mut image = SparseImage::new();
        for chunk in chunks {
            let end = chunk.addr as u64 + chunk.len() as u64;
            if end > ADDRESS_SPACE_END {
                return Err(LoadError::AddressOverflow(chunk.addr));
            }
            if let Some(addr) = image.first_populated(chunk.addr, end) {
                return Err(LoadError::DuplicateAddress(addr));
            }
            image.write_run(chunk.addr, chunk.data());
        }
        Ok(image)
    }

    /// Encodes the image as Intel HEX, replacing any file at `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P, record_len: NonZeroU8) -> std::io::Result<()> {
        write_hex_file(self, path, record_len)
    }

    pub fn get(&self, addr: u32) -> Option<u8> {
        let (&run_addr, data) = self.runs.range(..=addr).next_back()?;
        data.get((addr - run_addr) as usize).copied()
    }

    pub fn insert(&mut self, addr: u32, byte: u8) -> Option<u8> {
        let old = self.get(addr);
        self.write_run(addr, &[byte]);
        old
    }

    /// Sets every address in `range` to `byte`.
    ///
    /// The range is stored as a single run, so filling costs one byte of
    /// memory per address.
    pub fn fill<R: RangeBounds<u32>>(&mut self, range: R, byte: u8) {
        use std::ops::Bound::*;
        let start = match range.start_bound() {
            Included(&s) => s,
            Excluded(&s) => match s.checked_add(1) {
                Some(s) => s,
                None => return,
            },
            Unbounded => 0,
        };
        let end = match range.end_bound() {
            Included(&e) => e,
            Excluded(&e) => match e.checked_sub(1) {
                Some(e) => e,
                None => return,
            },
            Unbounded => u32::MAX,
        };
        if start > end {
            return;
        }
        let count = (end - start) as usize + 1;
        self.write_run(start, &vec![byte; count]);
    }

    pub fn len(&self) -> usize {
        self.runs.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn min_address(&self) -> Option<u32> {
        self.runs.keys().next().copied()
    }

    pub fn max_address(&self) -> Option<u32> {
        let (&addr, data) = self.runs.iter().next_back()?;
        Some(addr + (data.len() - 1) as u32)
    }

    pub fn start_addr(&self) -> Option<StartAddress> {
        self.start_addr
    }

    pub fn set_start_addr(&mut self, start_addr: Option<StartAddress>) {
        self.start_addr = start_addr;
    }

    /// Populated addresses in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u8)> + '_ {
        self.runs().flat_map(|(addr, data)| {
            data.iter()
                .enumerate()
                .map(move |(offset, &byte)| (addr + offset as u32, byte))
        })
    }

    /// Maximal runs of consecutive populated addresses, in ascending order.
    pub fn runs(&self) -> impl Iterator<Item = (u32, &[u8])> + '_ {
        self.runs.iter().map(|(&addr, data)| (addr, data.as_slice()))
    }

    /// Owned copies of [`SparseImage::runs`].
    pub fn chunks(&self) -> Vec<Chunk> {
        self.runs()
            .map(|(addr, data)| Chunk::new(addr, data.to_vec()))
            .collect()
    }

    /// Overlays `other` onto this image.
    ///
    /// With `Overlap::Error` the first conflicting address is reported and
    /// this image is left unchanged. Bytes that are equal in both images
    /// still count as a conflict.
    pub fn merge(&mut self, other: &SparseImage, overlap: Overlap) -> Result<(), OverlapError> {
        match overlap {
            Overlap::Error => {
                let conflict = other.runs().find_map(|(addr, data)| {
                    self.first_populated(addr, addr as u64 + data.len() as u64)
                });
                if let Some(addr) = conflict {
                    return Err(OverlapError::Address(addr));
                }
                if let (Some(ours), Some(theirs)) = (self.start_addr, other.start_addr) {
                    if ours != theirs {
                        return Err(OverlapError::StartAddress { ours, theirs });
                    }
                }
                self.overlay(other);
            }
            Overlap::Ignore => {
                for (addr, data) in other.runs() {
                    self.fill_holes(addr, data);
                }
                if self.start_addr.is_none() {
                    self.start_addr = other.start_addr;
                }
            }
            Overlap::Replace => self.overlay(other),
        }
        Ok(())
    }

    /// Writes every byte of `other` over this image. A start address in
    /// `other` replaces ours.
    pub fn overlay(&mut self, other: &SparseImage) {
        for (addr, data) in other.runs() {
            self.write_run(addr, data);
        }
        if other.start_addr.is_some() {
            self.start_addr = other.start_addr;
        }
    }

    /// Lowest populated address in `start..end`.
    fn first_populated(&self, start: u32, end: u64) -> Option<u32> {
        if let Some((&addr, data)) = self.runs.range(..=start).next_back() {
            if addr as u64 + data.len() as u64 > start as u64 {
                return Some(start);
            }
        }
        self.runs
            .range(start..)
            .next()
            .map(|(&addr, _)| addr)
            .filter(|&addr| (addr as u64) < end)
    }

    /// Copies `data` to `addr`, overwriting what is there, and joins the
    /// result with every run it overlaps or touches.
    ///
    /// `data` must not run past the end of the address space.
    fn write_run(&mut self, addr: u32, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let start = addr as u64;
        let end = start + data.len() as u64;

        let lowest = match self.runs.range(..=addr).next_back() {
            Some((&run_addr, run)) if run_addr as u64 + run.len() as u64 >= start => run_addr,
            _ => addr,
        };
        let highest = min(end, u32::MAX as u64) as u32;
        let joined: Vec<u32> = self.runs.range(lowest..=highest).map(|(&a, _)| a).collect();

        let mut run_start = start;
        let mut run = Vec::new();
        let mut tail = Vec::new();
        for key in joined {
            let Some(existing) = self.runs.remove(&key) else {
                continue;
            };
            let existing_start = key as u64;
            let existing_end = existing_start + existing.len() as u64;
            if existing_end > end {
                tail = existing[(end - existing_start) as usize..].to_vec();
            }
            if existing_start < start {
                run_start = existing_start;
                run = existing;
            }
        }
        run.truncate((start - run_start) as usize);
        run.extend_from_slice(data);
        run.extend_from_slice(&tail);
        self.runs.insert(run_start as u32, run);
    }

    /// Writes the parts of `data` that land on unpopulated addresses.
    fn fill_holes(&mut self, addr: u32, data: &[u8]) {
        let start = addr as u64;
        let end = start + data.len() as u64;

        let first = self
            .runs
            .range(..=addr)
            .next_back()
            .map_or(addr, |(&run_addr, _)| run_addr);
        let mut holes = Vec::new();
        let mut cursor = start;
        for (&run_addr, run) in self.runs.range(first..) {
            let run_start = run_addr as u64;
            if run_start >= end {
                break;
            }
            if run_start > cursor {
                holes.push((cursor, run_start));
            }
            cursor = cursor.max(run_start + run.len() as u64);
        }
        if cursor < end {
            holes.push((cursor, end));
        }

        for (hole_start, hole_end) in holes {
            let from = (hole_start - start) as usize;
            let to = (hole_end - start) as usize;
            self.write_run(hole_start as u32, &data[from..to]);
        }
    }
}

impl FromIterator<(u32, u8)> for SparseImage {
    fn from_iter<T: IntoIterator<Item = (u32, u8)>>(iter: T) -> Self {
        let mut image = SparseImage::new();
        for (addr, byte) in iter {
            image.write_run(addr, &[byte]);
        }
        image
    }
}

#[derive(Debug)]
pub enum LoadError {
    Parse(parse::Error),
    Process(ProcessError),
    DuplicateAddress(u32),
    AddressOverflow(u32),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use LoadError::*;
        match self {
            Parse(e) => write!(f, "{e}"),
            Process(e) => write!(f, "{e}"),
            DuplicateAddress(addr) => write!(f, "address {addr:#010X} is defined more than once"),
            AddressOverflow(addr) => {
                write!(f, "data at {addr:#010X} runs past the 4 GiB address space")
            }
        }
    }
}

impl std::error::Error for LoadError {}

#[derive(Debug, PartialEq, Eq)]
pub enum OverlapError {
    Address(u32),
    StartAddress {
        ours: StartAddress,
        theirs: StartAddress,
    },
}

impl fmt::Display for OverlapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlapError::Address(addr) => {
                write!(f, "data overlap at address {addr:#010X}")
            }
            OverlapError::StartAddress { ours, theirs } => {
                write!(f, "conflicting start addresses {ours} and {theirs}")
            }
        }
    }
}

impl std::error::Error for OverlapError {}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::test::test_file_path;
    use crate::common::SegmentStart;

    fn image(bytes: &[(u32, u8)]) -> SparseImage {
        bytes.iter().copied().collect()
    }

    #[test]
    fn empty_image_has_no_bounds() {
        let image = SparseImage::new();
        assert!(image.is_empty());
        assert_eq!(image.min_address(), None);
        assert_eq!(image.max_address(), None);
        assert!(image.chunks().is_empty());
    }

    #[test]
    fn bounds_follow_populated_addresses() {
        let image = image(&[(0x20, 1), (0x08, 2), (0x100, 3)]);
        assert_eq!(image.min_address(), Some(0x08));
        assert_eq!(image.max_address(), Some(0x100));
        assert_eq!(image.get(0x20), Some(1));
        assert_eq!(image.get(0x21), None);
    }

    #[test]
    fn chunks_split_on_gaps() {
        let image = image(&[(0, 1), (1, 2), (2, 3), (10, 4), (11, 5)]);
        let chunks = image.chunks();
        assert_eq!(chunks, vec![Chunk::new(0, vec![1, 2, 3]), Chunk::new(10, vec![4, 5])]);
    }

    #[test]
    fn chunk_reaching_top_of_address_space() {
        let image = image(&[(u32::MAX - 1, 1), (u32::MAX, 2)]);
        assert_eq!(image.chunks(), vec![Chunk::new(u32::MAX - 1, vec![1, 2])]);
    }

    #[test]
    fn fill_open_interval() {
        let mut image = SparseImage::new();
        image.fill(0x02..0x10, 0xFF);
        assert_eq!(image.len(), 14);
        assert_eq!(image.min_address(), Some(0x02));
        assert_eq!(image.max_address(), Some(0x0F));
        assert!(image.iter().all(|(_, byte)| byte == 0xFF));
    }

    #[test]
    fn fill_empty_interval() {
        let mut image = SparseImage::new();
        image.fill(0x02..0x02, 0xFF);
        image.fill(0x05..=0x04, 0xFF);
        assert!(image.is_empty());
    }

    #[test]
    fn large_fill_is_a_single_run() {
        let mut image = image(&[(0x00, 0x01)]);
        image.fill(0x01..0x0010_0000, 0xFF);
        assert_eq!(image.runs.len(), 1);
        assert_eq!(image.len(), 0x0010_0000);
        assert_eq!(image.get(0x000F_FFFF), Some(0xFF));
    }

    #[test]
    fn writes_join_touching_runs() {
        let mut image = image(&[(0x00, 1), (0x04, 5)]);
        assert_eq!(image.runs.len(), 2);
        image.insert(0x02, 3);
        assert_eq!(image.runs.len(), 3);
        image.fill(0x01..=0x01, 2);
        image.fill(0x03..0x04, 4);
        assert_eq!(image.runs.len(), 1);
        assert_eq!(image.chunks(), vec![Chunk::new(0, vec![1, 2, 3, 4, 5])]);
    }

    #[test]
    fn insert_inside_run_keeps_both_ends() {
        let mut image = image(&[(0x10, 1), (0x11, 2), (0x12, 3)]);
        assert_eq!(image.insert(0x11, 9), Some(2));
        assert_eq!(image.insert(0x13, 4), None);
        assert_eq!(image.chunks(), vec![Chunk::new(0x10, vec![1, 9, 3, 4])]);
    }

    #[test]
    fn from_chunks_rejects_address_overflow() {
        let chunks = vec![Chunk::new(u32::MAX, vec![1, 2])];
        assert!(matches!(
            SparseImage::from_chunks(chunks),
            Err(LoadError::AddressOverflow(u32::MAX))
        ));
    }

    #[test]
    fn from_chunks_rejects_duplicate_address() {
        let chunks = vec![Chunk::new(0, vec![1, 2, 3]), Chunk::new(2, vec![4])];
        assert!(matches!(
            SparseImage::from_chunks(chunks),
            Err(LoadError::DuplicateAddress(2))
        ));
    }

    #[test]
    fn merge_error_policy_leaves_image_unchanged() {
        let mut ours = image(&[(0, 1), (1, 2)]);
        let theirs = image(&[(1, 9), (2, 3)]);
        let before = ours.clone();
        assert_eq!(ours.merge(&theirs, Overlap::Error), Err(OverlapError::Address(1)));
        assert_eq!(ours, before);
    }

    #[test]
    fn merge_replace_takes_other_bytes() {
        let mut ours = image(&[(0, 1), (1, 2)]);
        ours.merge(&image(&[(1, 9), (2, 3)]), Overlap::Replace)
            .expect("replace never fails");
        assert_eq!(ours, image(&[(0, 1), (1, 9), (2, 3)]));
    }

    #[test]
    fn merge_ignore_keeps_own_bytes() {
        let mut ours = image(&[(0, 1), (1, 2)]);
        ours.merge(&image(&[(1, 9), (2, 3)]), Overlap::Ignore)
            .expect("ignore never fails");
        assert_eq!(ours, image(&[(0, 1), (1, 2), (2, 3)]));
    }

    #[test]
    fn merge_ignore_fills_only_holes() {
        let mut ours = image(&[(0x01, 1), (0x04, 4)]);
        let theirs: SparseImage = (0x00..0x07).map(|addr| (addr, 0xEE)).collect();
        ours.merge(&theirs, Overlap::Ignore).expect("ignore never fails");
        assert_eq!(
            ours.chunks(),
            vec![Chunk::new(0x00, vec![0xEE, 1, 0xEE, 0xEE, 4, 0xEE, 0xEE])]
        );
    }

    #[test]
    fn overlay_replaces_bytes_and_start_address() {
        let linear = StartAddress::Linear(0x0800_0000);
        let mut ours = image(&[(0, 1), (1, 2)]);
        ours.set_start_addr(Some(linear));

        ours.overlay(&image(&[(1, 9), (2, 3)]));
        assert_eq!(ours.chunks(), vec![Chunk::new(0, vec![1, 9, 3])]);
        assert_eq!(ours.start_addr(), Some(linear));

        let mut theirs = SparseImage::new();
        theirs.set_start_addr(Some(StartAddress::Linear(0x0800_4001)));
        ours.overlay(&theirs);
        assert_eq!(ours.start_addr(), Some(StartAddress::Linear(0x0800_4001)));
    }

    #[test]
    fn merge_start_addresses() {
        let linear = StartAddress::Linear(0x0800_0000);
        let segment = StartAddress::Segment(SegmentStart { cs: 0, ip: 0x100 });

        let mut ours = SparseImage::new();
        let mut theirs = SparseImage::new();
        theirs.set_start_addr(Some(linear));
        ours.merge(&theirs, Overlap::Error).expect("no conflict");
        assert_eq!(ours.start_addr(), Some(linear));

        theirs.set_start_addr(Some(segment));
        assert_eq!(
            ours.merge(&theirs, Overlap::Error),
            Err(OverlapError::StartAddress {
                ours: linear,
                theirs: segment
            })
        );
        ours.merge(&theirs, Overlap::Ignore).expect("ignore never fails");
        assert_eq!(ours.start_addr(), Some(linear));
        ours.merge(&theirs, Overlap::Replace).expect("replace never fails");
        assert_eq!(ours.start_addr(), Some(segment));
    }

    #[test]
    fn load_fixture() {
        let image = SparseImage::load(test_file_path("low.hex")).expect("load failed");
        assert_eq!(image.min_address(), Some(0x00));
        assert_eq!(image.max_address(), Some(0x01));
        assert_eq!(image.get(0x00), Some(0x01));
        assert_eq!(image.get(0x01), Some(0x02));
    }

    #[test]
    fn load_rejects_duplicate_address() {
        let result = SparseImage::load(test_file_path("duplicate_address.hex"));
        assert!(matches!(result, Err(LoadError::DuplicateAddress(0x01))));
    }
}
