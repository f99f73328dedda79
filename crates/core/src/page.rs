//! Rasterized page files and per-page accounting.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// File name prefix and suffix the rasterizer uses for page bitmaps.
const PAGE_PREFIX: &str = "page";
const PAGE_SUFFIX: &str = ".pbm";

/// One rasterized page awaiting transcoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// One-based page number, taken from the file name.
    pub ordinal: u32,

    /// Absolute path of the bitmap file.
    pub path: PathBuf,
}

impl Page {
    /// Recognize a rasterizer output file by name.
    ///
    /// The rasterizer writes `page001.pbm`, `page002.pbm`, and so on:
    /// exactly three digits, zero padded. Anything else in the working
    /// directory is not a page.
    pub fn from_path(path: &Path) -> Option<Page> {
        let name = path.file_name()?.to_str()?;
        let digits = name
            .strip_prefix(PAGE_PREFIX)?
            .strip_suffix(PAGE_SUFFIX)?;
        if digits.len() != 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let ordinal = digits.parse().ok()?;
        Some(Page {
            ordinal,
            path: path.to_path_buf(),
        })
    }

    /// All pages in a directory, in ordinal order.
    ///
    /// Files that do not look like rasterizer output are skipped.
    pub fn scan_dir(dir: &Path) -> Result<Vec<Page>> {
        let mut pages: Vec<Page> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| Page::from_path(&entry.path()))
            .collect();
        pages.sort_by_key(|page| page.ordinal);
        Ok(pages)
    }
}

/// Per-page record assembled from the compressor and the inspector.
#[derive(Debug, Clone, PartialEq)]
pub struct PageStats {
    /// Bitmap width in pixels.
    pub width: u32,

    /// Bitmap height in pixels.
    pub height: u32,

    /// Mean gray value of the bitmap, 0.0 black to 1.0 white.
    pub mean: f64,

    /// Byte length of the compressed payload, declared as IMAGELEN.
    pub compressed_len: usize,
}

impl PageStats {
    /// Device accounting figure for this page.
    pub fn dot_count(&self) -> u64 {
        dot_count(self.width, self.height, self.mean)
    }
}

/// Dots consumed by a page, in units of one hundred.
///
/// `floor(floor(w * h * (1 - mean)) / 100)`: darkness scaled by pixel
/// count, truncated at each step. The mean is clamped to [0, 1] first
/// so a misreported value cannot produce a bogus count.
pub fn dot_count(width: u32, height: u32, mean: f64) -> u64 {
    let pixels = u64::from(width) * u64::from(height);
    let coverage = 1.0 - mean.clamp(0.0, 1.0);
    let dots = (pixels as f64 * coverage).floor() as u64;
    dots / 100
}
