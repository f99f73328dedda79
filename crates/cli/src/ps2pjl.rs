//! ps2pjl - transcode a spooled print job into a PJL device stream
//!
//! Invoked by the spooler as a filter:
//!
//! ```text
//! ps2pjl <job-id> <user> <title> <copies> <options> [file]
//! ```
//!
//! The document arrives on stdin unless a file argument is given. The
//! device-control stream leaves on stdout and nothing else does; all
//! diagnostics go to stderr.

use std::env;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use corotron_core::{CancelFlag, Job, TranscodeConfig, run_job};
use log::{debug, warn};
use signal_hook::consts::{SIGINT, SIGTERM};

/// Rasterizer override, e.g. a ghostscript build outside PATH.
const ENV_RASTERIZER: &str = "COROTRON_GS";
/// Compressor override.
const ENV_COMPRESSOR: &str = "COROTRON_COMPRESS";
/// Inspector override.
const ENV_INSPECTOR: &str = "COROTRON_IDENTIFY";
/// Any non-empty value keeps the workspace and diverts the stream into it.
const ENV_DEBUG: &str = "COROTRON_DEBUG";
/// Drain seconds override.
const ENV_DRAIN: &str = "COROTRON_DRAIN";
/// Any non-empty value forces the post-hoc listing strategy.
const ENV_SYNC: &str = "COROTRON_SYNC";

/// Transcode a spooled print job into a PJL device-control stream.
#[derive(Parser, Debug)]
#[command(name = "ps2pjl")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Spooler-assigned job identifier
    job_id: String,

    /// Submitting user
    user: String,

    /// Job title
    title: String,

    /// Number of copies of each page
    copies: u32,

    /// Whitespace-separated key=value job options
    options: String,

    /// Document to transcode; stdin when omitted
    file: Option<PathBuf>,
}

/// True when the variable is set to anything non-empty.
fn env_flag(name: &str) -> bool {
    env::var_os(name).is_some_and(|value| !value.is_empty())
}

/// Assemble the run configuration from defaults and the environment.
fn build_config() -> TranscodeConfig {
    let mut config = TranscodeConfig::default();
    if let Some(path) = env::var_os(ENV_RASTERIZER).filter(|v| !v.is_empty()) {
        config.tools.rasterizer = PathBuf::from(path);
    }
    if let Some(path) = env::var_os(ENV_COMPRESSOR).filter(|v| !v.is_empty()) {
        config.tools.compressor = PathBuf::from(path);
    }
    if let Some(path) = env::var_os(ENV_INSPECTOR).filter(|v| !v.is_empty()) {
        config.tools.inspector = PathBuf::from(path);
    }
    if let Ok(seconds) = env::var(ENV_DRAIN) {
        match seconds.parse::<u64>() {
            Ok(seconds) => config.drain = Duration::from_secs(seconds),
            Err(_) => warn!("ignoring unparseable {ENV_DRAIN}={seconds:?}"),
        }
    }
    config.debug = env_flag(ENV_DEBUG);
    config.streaming = !env_flag(ENV_SYNC);
    config
}

/// Let SIGTERM and SIGINT end the job through the cancel flag.
fn register_signals(cancel: &CancelFlag) {
    for signal in [SIGTERM, SIGINT] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(cancel.as_arc())) {
            warn!("could not register signal {signal}: {e}");
        }
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    // Spooler wrappers treat any non-zero status as one failed job, so
    // argument mistakes exit 1 like everything else.
    let args = Args::try_parse().unwrap_or_else(|e| {
        if e.use_stderr() {
            let _ = e.print();
            std::process::exit(1);
        }
        e.exit()
    });

    let job = Job::new(&args.job_id, &args.user, &args.title, args.copies, &args.options);
    let config = build_config();
    register_signals(&config.cancel);

    let input: Box<dyn Read + Send> = match &args.file {
        Some(path) => {
            let file = File::open(path)
                .map_err(|e| format!("cannot open {}: {e}", path.display()))?;
            Box::new(file)
        }
        None => Box::new(io::stdin()),
    };

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    match run_job(&job, &config, input, &mut out) {
        Ok(summary) => {
            debug!(
                "stream complete: {} page(s), {} bytes{}",
                summary.pages,
                summary.bytes,
                if summary.cancelled { " (cancelled)" } else { "" }
            );
            out.flush()?;
            Ok(())
        }
        Err(e) => {
            let _ = out.flush();
            eprintln!("ps2pjl: {e}");
            std::process::exit(1);
        }
    }
}
