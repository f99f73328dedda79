//! PJL framing for the device-control stream.
//!
//! The directive sequence is a device contract: order and spelling are
//! fixed, every directive line ends with CRLF, and the closing UEL is
//! the last byte of the stream with no terminator after it. All dynamic
//! values are passed in by the caller, so this module makes no clock,
//! filesystem, or process decisions.

use std::io::Write;

use crate::error::{Result, TranscodeError};
use crate::job::{Job, PageSetup};
use crate::page::PageStats;

/// Universal exit language escape. Opens and closes the PJL envelope.
pub const UEL: &[u8] = b"\x1b%-12345X";

/// Open the job envelope.
///
/// The UEL and the JOB directive share a line; the timestamp is
/// whatever the caller says the submission time is.
pub fn job_header<W: Write>(out: &mut W, job: &Job, timestamp: &str) -> Result<()> {
    out.write_all(UEL)?;
    write!(out, "@PJL JOB NAME=\"{}\"\r\n", job.title)?;
    write!(out, "@PJL SET TIMESTAMP={timestamp}\r\n")?;
    write!(out, "@PJL SET FILENAME={}\r\n", job.title)?;
    write!(out, "@PJL SET COMPRESS=JBIG\r\n")?;
    write!(out, "@PJL SET USERNAME={}\r\n", job.user)?;
    write!(out, "@PJL SET COVER=OFF\r\n")?;
    write!(out, "@PJL SET HOLD=OFF\r\n")?;
    Ok(())
}

/// Directives announcing one page, ending with the payload length.
pub fn page_header<W: Write>(
    out: &mut W,
    setup: &PageSetup,
    copies: u32,
    stats: &PageStats,
) -> Result<()> {
    write!(out, "@PJL SET PAGESTATUS=START\r\n")?;
    write!(out, "@PJL SET COPIES={copies}\r\n")?;
    write!(out, "@PJL SET MEDIASOURCE={}\r\n", setup.tray)?;
    write!(out, "@PJL SET PAPER={}\r\n", setup.paper)?;
    write!(out, "@PJL SET PAPERWIDTH={}\r\n", stats.width)?;
    write!(out, "@PJL SET PAPERLENGTH={}\r\n", stats.height)?;
    write!(out, "@PJL SET RESOLUTION={}\r\n", setup.resolution)?;
    write!(out, "@PJL IMAGELEN={}\r\n", stats.compressed_len)?;
    Ok(())
}

/// Directives closing one page.
pub fn page_footer<W: Write>(out: &mut W, dot_count: u64) -> Result<()> {
    write!(out, "@PJL SET DOTCOUNT={dot_count}\r\n")?;
    write!(out, "@PJL SET PAGESTATUS=END\r\n")?;
    Ok(())
}

/// Close the job envelope. The final UEL has no trailing CRLF.
pub fn job_footer<W: Write>(out: &mut W) -> Result<()> {
    write!(out, "@PJL EOJ\r\n")?;
    out.write_all(UEL)?;
    Ok(())
}

/// Emit one complete page frame: header, payload, footer.
///
/// The declared length in `stats` must match the payload exactly;
/// a mismatch writes nothing and reports a framing violation, so a
/// device never sees a page whose IMAGELEN lies about its body.
pub fn write_page<W: Write>(
    out: &mut W,
    setup: &PageSetup,
    copies: u32,
    stats: &PageStats,
    payload: &[u8],
) -> Result<()> {
    if stats.compressed_len != payload.len() {
        return Err(TranscodeError::FramingViolation {
            declared: stats.compressed_len,
            actual: payload.len(),
        });
    }
    page_header(out, setup, copies, stats)?;
    out.write_all(payload)?;
    page_footer(out, stats.dot_count())?;
    Ok(())
}
