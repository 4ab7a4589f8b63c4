//! Merging two firmware images into one contiguous image.
//!
//! The two inputs must occupy disjoint address ranges. Whatever lies
//! between the end of the lower image and the start of the higher one is
//! filled with a pad byte, so the result covers a single unbroken range.

use std::fmt;
use std::io;
use std::num::NonZeroU8;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::image::{LoadError, SparseImage};
use crate::write::DEFAULT_RECORD_LEN;

/// Value of erased flash.
pub const DEFAULT_PAD_BYTE: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    /// Fills the gap between the two images.
    pub pad_byte: u8,
    /// Data bytes per record in the written file.
    pub record_len: NonZeroU8,
}

impl Default for MergeOptions {
    fn default() -> Self {
        MergeOptions {
            pad_byte: DEFAULT_PAD_BYTE,
            record_len: DEFAULT_RECORD_LEN,
        }
    }
}

/// Loads two Intel HEX files, merges them and writes the result to
/// `path_out`, replacing any file already there.
///
/// The output is only written once both inputs have been decoded and
/// checked, so a failed merge leaves `path_out` untouched.
pub fn merge_images<A, B, O>(path_a: A, path_b: B, path_out: O, options: MergeOptions) -> Result<()>
where
    A: AsRef<Path>,
    B: AsRef<Path>,
    O: AsRef<Path>,
{
    let image_a = load_non_empty(path_a.as_ref())?;
    let image_b = load_non_empty(path_b.as_ref())?;

    let merged = merge(&image_a, &image_b, options.pad_byte)?;

    let path_out = path_out.as_ref();
    merged
        .save(path_out, options.record_len)
        .map_err(|source| MergeError::Write {
            path: path_out.to_path_buf(),
            source,
        })?;
    info!(
        path = %path_out.display(),
        bytes = merged.len(),
        "wrote merged image"
    );
    Ok(())
}

fn load_non_empty(path: &Path) -> Result<SparseImage> {
    let image = SparseImage::load(path).map_err(|source| MergeError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    if image.is_empty() {
        return Err(MergeError::EmptyImage {
            path: Some(path.to_path_buf()),
        });
    }
    Ok(image)
}

/// Merges two images in memory, in either argument order.
///
/// The image starting at the lower address is laid down first, then the
/// gap filled with `pad_byte`, then the other image.
pub fn merge(a: &SparseImage, b: &SparseImage, pad_byte: u8) -> Result<SparseImage> {
    let (a_min, a_max) = bounds(a)?;
    let (b_min, b_max) = bounds(b)?;

    let ((low, low_max), (high, high_min)) = if a_min <= b_min {
        ((a, a_max), (b, b_min))
    } else {
        ((b, b_max), (a, a_min))
    };

    if low_max >= high_min {
        return Err(MergeError::Overlap { low_max, high_min });
    }

    let mut gap = SparseImage::new();
    gap.fill(low_max + 1..high_min, pad_byte);
    debug!(
        low_max = format_args!("{low_max:#010X}"),
        high_min = format_args!("{high_min:#010X}"),
        gap_len = gap.len(),
        "filling gap"
    );

    let mut merged = SparseImage::new();
    for part in [low, &gap, high] {
        merged.overlay(part);
    }
    Ok(merged)
}

fn bounds(image: &SparseImage) -> Result<(u32, u32)> {
    match (image.min_address(), image.max_address()) {
        (Some(min), Some(max)) => Ok((min, max)),
        _ => Err(MergeError::EmptyImage { path: None }),
    }
}

#[derive(Debug)]
pub enum MergeError {
    Overlap { low_max: u32, high_min: u32 },
    Decode { path: PathBuf, source: LoadError },
    /// `path` is unset for images merged in memory.
    EmptyImage { path: Option<PathBuf> },
    Write { path: PathBuf, source: io::Error },
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use MergeError::*;
        match self {
            Overlap { low_max, high_min } => write!(
                f,
                "the files are overlapping each other: lower image ends at {low_max:#010X}, \
                 higher image starts at {high_min:#010X}"
            ),
            Decode { path, source } => {
                write!(f, "failed to decode {}: {source}", path.display())
            }
            EmptyImage { path: None } => write!(f, "image has no data"),
            EmptyImage { path: Some(path) } => write!(f, "{} has no data", path.display()),
            Write { path, source } => {
                write!(f, "failed to write {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for MergeError {}

pub type Result<T> = std::result::Result<T, MergeError>;
