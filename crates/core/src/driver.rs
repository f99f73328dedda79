//! Job orchestration: rasterize, transcode, frame, tear down.
//!
//! [`run_job`] is the library's entry point. It owns the lifecycle of
//! one job: workspace creation, the rasterizer process, the choice of
//! page source, the framing state machine, the drain interval, and
//! teardown. Nothing reaches the output writer except protocol bytes.

use std::fs::File;
use std::io::{self, Read, Write};
use std::process::{Child, ChildStdin};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use log::{debug, info, warn};

use crate::error::{Result, TranscodeError};
use crate::job::{Job, PageSetup};
use crate::page::{Page, PageStats};
use crate::pjl;
use crate::source::{CancelFlag, ListingSource, PageSource, WatchSource};
use crate::tools::{self, ToolConfig};
use crate::workspace::Workspace;

/// How often a waiting rasterizer poll rechecks the cancel flag.
const WAIT_POLL: Duration = Duration::from_millis(50);

/// Timestamp layout the device expects in the job header.
const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Name of the stream copy written into the workspace in debug mode.
const DEBUG_STREAM_NAME: &str = "stream.pjl";

/// Everything one job run needs, threaded explicitly.
#[derive(Debug, Clone)]
pub struct TranscodeConfig {
    /// External tool paths.
    pub tools: ToolConfig,

    /// How long the workspace is held after the last byte, so the
    /// device can finish pulling data before pages disappear.
    pub drain: Duration,

    /// Keep the workspace and write the protocol stream into it
    /// instead of the output writer.
    pub debug: bool,

    /// Overlap framing with rasterization via the directory watcher.
    /// When off, the rasterizer runs to completion first and pages are
    /// taken from a sorted listing.
    pub streaming: bool,

    /// Shared cancellation flag. Also raised internally when a job
    /// aborts, so the rasterizer machinery winds down either way.
    pub cancel: CancelFlag,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            tools: ToolConfig::default(),
            drain: Duration::from_secs(30),
            debug: false,
            streaming: true,
            cancel: CancelFlag::new(),
        }
    }
}

/// Accounting for one finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    /// Pages framed into the stream.
    pub pages: u32,

    /// Protocol bytes written.
    pub bytes: u64,

    /// Whether the job ended through cancellation.
    pub cancelled: bool,
}

#[derive(Default)]
struct Progress {
    pages: u32,
    printing: bool,
    cancelled: bool,
}

/// Transcode one job from `input` to `out`.
///
/// On success the stream holds exactly one job envelope: header, one
/// frame per rasterized page, footer. A cancelled job still closes its
/// envelope (if it opened one) and counts as finished. A job whose
/// rasterizer fails before the first page writes nothing at all.
///
/// In debug mode the stream goes to a file in the kept workspace
/// instead of `out`, so a diagnostic run never feeds a device.
pub fn run_job<R, W>(
    job: &Job,
    config: &TranscodeConfig,
    input: R,
    out: &mut W,
) -> Result<JobSummary>
where
    R: Read + Send + 'static,
    W: Write,
{
    let started = Instant::now();
    let setup = job.page_setup();
    info!(
        "starting job {} for {} ({} dpi on {}, {} copies)",
        job.id, job.user, setup.resolution, setup.paper, job.copies
    );

    let workspace = Workspace::create(&job.id)?;
    let target = if config.debug {
        let path = workspace.path().join(DEBUG_STREAM_NAME);
        StreamTarget::File(File::create(path).map_err(TranscodeError::Setup)?)
    } else {
        StreamTarget::Device(out)
    };
    let mut writer = StreamWriter { target, written: 0 };

    let mut progress = Progress::default();
    let result = execute(job, &setup, config, &workspace, input, &mut writer, &mut progress);
    let bytes = writer.written;

    if let Err(e) = result {
        // Stop the rasterizer machinery, close the envelope if one is
        // open, and tear down without draining.
        config.cancel.cancel();
        if progress.printing {
            let _ = pjl::job_footer(&mut writer);
            let _ = writer.flush();
        }
        warn!("job {} failed: {e}", job.id);
        workspace.close(config.debug);
        return Err(e);
    }

    if config.drain > Duration::ZERO {
        debug!("draining for {:?}", config.drain);
        thread::sleep(config.drain);
    }
    workspace.close(config.debug);

    let summary = JobSummary {
        pages: progress.pages,
        bytes,
        cancelled: progress.cancelled,
    };
    info!(
        "job {} {}: {} page(s), {} bytes, {:?} elapsed",
        job.id,
        if summary.cancelled { "cancelled" } else { "done" },
        summary.pages,
        summary.bytes,
        started.elapsed()
    );
    Ok(summary)
}

fn execute<R, W>(
    job: &Job,
    setup: &PageSetup,
    config: &TranscodeConfig,
    workspace: &Workspace,
    input: R,
    writer: &mut StreamWriter<'_, W>,
    progress: &mut Progress,
) -> Result<()>
where
    R: Read + Send + 'static,
    W: Write,
{
    let mut child = tools::spawn_rasterizer(&config.tools, setup.resolution, workspace.path())?;
    let stdin = child.stdin.take().ok_or_else(|| {
        TranscodeError::Rasterization("rasterizer stdin unavailable".to_string())
    })?;
    feed_input(input, stdin);
    let rasterizer = RasterizerHandle::start(child);

    // Submission time, fixed once per job.
    let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();

    // Strategy is picked once per job. A watch that cannot start is not
    // fatal: the listing strategy produces the same stream, later.
    let watch = if config.streaming {
        match WatchSource::start(workspace.path(), config.cancel.clone()) {
            Ok(pair) => Some(pair),
            Err(e) => {
                warn!("page watch unavailable ({e}); falling back to the listing strategy");
                None
            }
        }
    } else {
        None
    };
    let mut source: Box<dyn PageSource> = match watch {
        Some((source, completion)) => {
            let cancel = config.cancel.clone();
            thread::spawn(move || completion.send(rasterizer.wait(&cancel)));
            Box::new(source)
        }
        None => {
            rasterizer.wait(&config.cancel)?;
            Box::new(ListingSource::new(workspace.sorted_pages()?))
        }
    };

    loop {
        if config.cancel.is_cancelled() {
            progress.cancelled = true;
            break;
        }
        let Some(page) = source.next_page()? else {
            if config.cancel.is_cancelled() {
                progress.cancelled = true;
            }
            break;
        };
        if !progress.printing {
            pjl::job_header(writer, job, &timestamp)?;
            progress.printing = true;
        }
        process_page(&config.tools, setup, job.copies, &page, writer)?;
        progress.pages += 1;
    }

    // A rasterizer that succeeds without producing pages still gets an
    // envelope; a job cancelled before its first page gets nothing.
    if !progress.printing && !progress.cancelled {
        pjl::job_header(writer, job, &timestamp)?;
        progress.printing = true;
    }
    if progress.printing {
        pjl::job_footer(writer)?;
    }
    writer.flush()?;
    Ok(())
}

/// Compress, inspect, and frame one page as a unit.
///
/// Any tool failure leaves the stream exactly as it was: no partial
/// frames reach the device.
fn process_page<W: Write>(
    tools: &ToolConfig,
    setup: &PageSetup,
    copies: u32,
    page: &Page,
    out: &mut W,
) -> Result<()> {
    let payload = tools::compress(tools, page)?;
    let (width, height) = tools::inspect_dimensions(tools, page)?;
    let mean = tools::inspect_mean(tools, page)?;
    let stats = PageStats {
        width,
        height,
        mean,
        compressed_len: payload.len(),
    };
    debug!(
        "page {}: {}x{} px, mean {:.4}, {} payload bytes, {} dots",
        page.ordinal,
        width,
        height,
        mean,
        payload.len(),
        stats.dot_count()
    );
    pjl::write_page(out, setup, copies, &stats, &payload)
}

/// Stream the document into the rasterizer on its own thread.
///
/// The thread ends when the input is exhausted or the tool goes away;
/// a feed cut short by a dying rasterizer is the rasterizer's story to
/// tell, not an error of its own.
fn feed_input<R: Read + Send + 'static>(mut input: R, mut stdin: ChildStdin) {
    thread::spawn(move || {
        if let Err(e) = io::copy(&mut input, &mut stdin) {
            debug!("input feed stopped: {e}");
        }
    });
}

/// A running rasterizer with its stderr drained off-thread.
///
/// Draining keeps a chatty tool from blocking on a full pipe while the
/// exit-status poll is still looping.
struct RasterizerHandle {
    child: Child,
    stderr: Option<thread::JoinHandle<String>>,
}

impl RasterizerHandle {
    fn start(mut child: Child) -> Self {
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf);
                buf
            })
        });
        Self { child, stderr }
    }

    /// Wait for exit, polling so cancellation can kill the tool.
    ///
    /// A kill triggered by cancellation is a clean outcome, not a
    /// rasterizer failure.
    fn wait(mut self, cancel: &CancelFlag) -> Result<()> {
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    let stderr = self.join_stderr();
                    return tools::rasterizer_outcome(status, &stderr);
                }
                Ok(None) => {
                    if cancel.is_cancelled() {
                        debug!("cancelling: killing rasterizer");
                        if let Err(e) = self.child.kill() {
                            warn!("rasterizer kill failed: {e}");
                        }
                        let _ = self.child.wait();
                        self.join_stderr();
                        return Ok(());
                    }
                    thread::sleep(WAIT_POLL);
                }
                Err(e) => {
                    return Err(TranscodeError::Rasterization(format!("wait failed: {e}")));
                }
            }
        }
    }

    fn join_stderr(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }
}

/// Where the protocol stream lands: the device writer, or a file in
/// the workspace when a debug run diverts it.
enum StreamTarget<'a, W: Write> {
    Device(&'a mut W),
    File(File),
}

/// Counts protocol bytes on their way to the stream target.
struct StreamWriter<'a, W: Write> {
    target: StreamTarget<'a, W>,
    written: u64,
}

impl<W: Write> Write for StreamWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = match &mut self.target {
            StreamTarget::Device(out) => out.write(buf)?,
            StreamTarget::File(file) => file.write(buf)?,
        };
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.target {
            StreamTarget::Device(out) => out.flush(),
            StreamTarget::File(file) => file.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn default_config_matches_production_shape() {
        let config = TranscodeConfig::default();
        assert_eq!(config.drain, Duration::from_secs(30));
        assert!(config.streaming);
        assert!(!config.debug);
        assert!(!config.cancel.is_cancelled());
    }

    #[test]
    fn stream_writer_counts_bytes() {
        let mut sink = Vec::new();
        let mut writer = StreamWriter {
            target: StreamTarget::Device(&mut sink),
            written: 0,
        };
        writer.write_all(b"@PJL EOJ\r\n").unwrap();
        writer.flush().unwrap();
        assert_eq!(writer.written, 10);
        assert_eq!(sink, b"@PJL EOJ\r\n");
    }

    #[test]
    fn stream_writer_can_divert_to_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEBUG_STREAM_NAME);
        {
            let mut writer: StreamWriter<'_, Vec<u8>> = StreamWriter {
                target: StreamTarget::File(File::create(&path).unwrap()),
                written: 0,
            };
            writer.write_all(b"diverted").unwrap();
            writer.flush().unwrap();
            assert_eq!(writer.written, 8);
        }
        assert_eq!(fs::read(&path).unwrap(), b"diverted");
    }
}
