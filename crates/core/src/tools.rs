//! External tool invocation.
//!
//! The filter delegates the heavy lifting to three programs: a
//! rasterizer that turns the page-description document into bitmap
//! files, a compressor that turns one bitmap into a raster payload,
//! and an inspector that reports a bitmap's dimensions and mean gray.
//! This module owns the command lines and the exit-status policy;
//! nothing here touches the output stream.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

use log::debug;

use crate::error::{Result, TranscodeError};
use crate::page::Page;

/// Paths of the three external programs the filter drives.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolConfig {
    /// Page-description rasterizer. Reads the document on stdin and
    /// writes `page%03d.pbm` files into the working directory.
    pub rasterizer: PathBuf,

    /// Bitmap compressor. Page file as the sole argument, compressed
    /// payload on stdout.
    pub compressor: PathBuf,

    /// Bitmap inspector, `identify`-style `-format` interface.
    pub inspector: PathBuf,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            rasterizer: PathBuf::from("gs"),
            compressor: PathBuf::from("pbmtojbg"),
            inspector: PathBuf::from("identify"),
        }
    }
}

/// Launch the rasterizer against a working directory.
///
/// The child reads the document from its piped stdin; the caller
/// streams the input in and drops the pipe to signal end of document.
/// Rasterizer chatter on stdout is discarded, stderr is kept piped so
/// a failure can be reported with the tool's own words.
pub fn spawn_rasterizer(tools: &ToolConfig, resolution: u32, workdir: &Path) -> Result<Child> {
    let output_template = workdir.join("page%03d.pbm");
    let mut command = Command::new(&tools.rasterizer);
    command
        .arg("-q")
        .arg("-dSAFER")
        .arg("-dNOPAUSE")
        .arg("-dBATCH")
        .arg("-sDEVICE=pbmraw")
        .arg(format!("-r{resolution}"))
        .arg(format!("-sOutputFile={}", output_template.display()))
        .arg("-")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    debug!("spawning rasterizer: {command:?}");
    command.spawn().map_err(|e| {
        TranscodeError::Rasterization(format!(
            "failed to spawn {}: {e}",
            tools.rasterizer.display()
        ))
    })
}

/// Map a finished rasterizer to a result, folding in captured stderr.
pub fn rasterizer_outcome(status: ExitStatus, stderr: &str) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    let detail = if stderr.trim().is_empty() {
        format!("exited with {status}")
    } else {
        format!("exited with {status}: {}", stderr.trim())
    };
    Err(TranscodeError::Rasterization(detail))
}

/// Compress one page bitmap, returning the raster payload.
pub fn compress(tools: &ToolConfig, page: &Page) -> Result<Vec<u8>> {
    debug!("compressing {}", page.path.display());
    let output = Command::new(&tools.compressor)
        .arg(&page.path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| compression_error(page, e.to_string()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(compression_error(
            page,
            format!("exited with {}: {}", output.status, stderr.trim()),
        ));
    }
    if output.stdout.is_empty() {
        return Err(compression_error(page, "produced no output".to_string()));
    }
    Ok(output.stdout)
}

/// Pixel dimensions of one page bitmap.
pub fn inspect_dimensions(tools: &ToolConfig, page: &Page) -> Result<(u32, u32)> {
    let text = run_inspector(tools, "%w %h", page)?;
    let mut parts = text.split_whitespace();
    let parsed = match (parts.next(), parts.next()) {
        (Some(w), Some(h)) => w.parse().ok().zip(h.parse().ok()),
        _ => None,
    };
    parsed.ok_or_else(|| inspection_error(page, format!("unparseable dimensions {text:?}")))
}

/// Mean gray value of one page bitmap, 0.0 black to 1.0 white.
pub fn inspect_mean(tools: &ToolConfig, page: &Page) -> Result<f64> {
    let text = run_inspector(tools, "%[fx:mean]", page)?;
    text.parse()
        .map_err(|_| inspection_error(page, format!("unparseable mean {text:?}")))
}

fn run_inspector(tools: &ToolConfig, format: &str, page: &Page) -> Result<String> {
    debug!("inspecting {} for {format}", page.path.display());
    let output = Command::new(&tools.inspector)
        .arg("-format")
        .arg(format)
        .arg(&page.path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| inspection_error(page, e.to_string()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(inspection_error(
            page,
            format!("exited with {}: {}", output.status, stderr.trim()),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn page_label(page: &Page) -> String {
    page.path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| page.path.display().to_string())
}

fn compression_error(page: &Page, msg: String) -> TranscodeError {
    TranscodeError::Compression {
        page: page_label(page),
        msg,
    }
}

fn inspection_error(page: &Page, msg: String) -> TranscodeError {
    TranscodeError::Inspection {
        page: page_label(page),
        msg,
    }
}
