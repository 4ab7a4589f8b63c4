//! Intel HEX decoding and encoding, and merging of firmware images.
//!
//! Decoding runs in two passes: [`parse_hex_file`] checks the syntax of each
//! record, then [`process_records`] resolves extended addresses into
//! absolute [`Chunk`]s. [`SparseImage::load`] wraps both.

mod common;
pub mod merge;
mod image;
pub mod parse;
mod process;
mod write;

pub use common::{Chunk, Record, RecordKind, SegmentStart, StartAddress};
pub use image::{LoadError, Overlap, OverlapError, SparseImage};
pub use merge::{merge, merge_images, MergeError, MergeOptions, DEFAULT_PAD_BYTE};
pub use parse::{parse_hex, parse_hex_file, parse_hex_str};
pub use process::{process_records, IndexTypePair, ProcessError, ProcessOutput, ProcessResult};
pub use write::{encode_image, format_records, write_hex_file, DEFAULT_RECORD_LEN};
