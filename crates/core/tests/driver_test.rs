//! End-to-end tests for run_job against stub external tools.
//!
//! The stubs are small shell scripts standing in for the rasterizer,
//! compressor, and inspector, so every byte of the emitted stream is
//! predictable: each page's payload is its bitmap file verbatim, every
//! page inspects as 120x160 with mean gray 0.5.

use std::fs;
use std::io::Cursor;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use corotron_core::{CancelFlag, Job, ToolConfig, TranscodeConfig, TranscodeError, run_job};

const UEL: &[u8] = b"\x1b%-12345X";

// ============================================================================
// Stub tools
// ============================================================================

fn write_stub(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A rasterizer that consumes stdin and writes `pages` bitmaps into the
/// directory named by its -sOutputFile argument.
fn stub_rasterizer(dir: &Path, pages: u32) -> PathBuf {
    let body = format!(
        r#"tpl=""
for a in "$@"; do
  case "$a" in
    -sOutputFile=*) tpl="${{a#-sOutputFile=}}";;
  esac
done
out=$(dirname "$tpl")
cat > /dev/null
i=1
while [ "$i" -le {pages} ]; do
  printf 'P4\n8 8\nRASTER%03d' "$i" > "$out"/$(printf 'page%03d.pbm' "$i")
  i=$((i+1))
done"#
    );
    write_stub(dir, "rasterizer", &body)
}

/// A compressor whose payload is the page file itself.
fn stub_compressor(dir: &Path) -> PathBuf {
    write_stub(dir, "compressor", r#"cat "$1""#)
}

/// An inspector reporting fixed dimensions and mean gray.
fn stub_inspector(dir: &Path) -> PathBuf {
    let body = r#"case "$2" in
  "%w %h") echo '120 160';;
  *) echo '0.5';;
esac"#;
    write_stub(dir, "inspector", body)
}

fn stub_tools(dir: &Path, pages: u32) -> ToolConfig {
    ToolConfig {
        rasterizer: stub_rasterizer(dir, pages),
        compressor: stub_compressor(dir),
        inspector: stub_inspector(dir),
    }
}

fn test_config(tools: ToolConfig, streaming: bool) -> TranscodeConfig {
    TranscodeConfig {
        tools,
        drain: Duration::ZERO,
        debug: false,
        streaming,
        cancel: CancelFlag::new(),
    }
}

fn document() -> Cursor<Vec<u8>> {
    Cursor::new(b"%!PS-Adobe-3.0\n/Helvetica findfont showpage\n".to_vec())
}

fn sample_job(id: &str) -> Job {
    Job::new(id, "alice", "quarterly", 2, "PageSize=letter Resolution=300dpi")
}

fn count(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

// ============================================================================
// Full pipeline
// ============================================================================

/// Payload of page N under the stub tools: the bitmap file verbatim.
fn stub_payload(ordinal: u32) -> String {
    format!("P4\n8 8\nRASTER{ordinal:03}")
}

fn assert_three_page_stream(out: &[u8]) {
    assert!(out.starts_with(UEL), "stream must open with the UEL");
    assert!(out.ends_with(b"@PJL EOJ\r\n\x1b%-12345X"));

    let text = String::from_utf8_lossy(out).into_owned();
    assert_eq!(count(&text, "@PJL JOB NAME=\"quarterly\""), 1);
    assert_eq!(count(&text, "@PJL EOJ"), 1);
    assert_eq!(count(&text, "@PJL SET PAGESTATUS=START"), 3);
    assert_eq!(count(&text, "@PJL SET PAGESTATUS=END"), 3);
    assert_eq!(count(&text, "@PJL SET COPIES=2"), 3);
    assert_eq!(count(&text, "@PJL SET PAPER=LETTER"), 3);
    assert_eq!(count(&text, "@PJL SET MEDIASOURCE=TRAY1"), 3);
    assert_eq!(count(&text, "@PJL SET RESOLUTION=300"), 3);
    assert_eq!(count(&text, "@PJL SET PAPERWIDTH=120"), 3);
    assert_eq!(count(&text, "@PJL SET PAPERLENGTH=160"), 3);

    // Every payload is 16 bytes and declares itself as such.
    let payload_len = stub_payload(1).len();
    assert_eq!(payload_len, 16);
    assert_eq!(count(&text, &format!("@PJL IMAGELEN={payload_len}\r\n")), 3);

    // 120 * 160 * (1 - 0.5) / 100
    assert_eq!(count(&text, "@PJL SET DOTCOUNT=96\r\n"), 3);

    // Pages appear in order, each straight after its IMAGELEN line.
    let first = text.find(&stub_payload(1)).expect("page 1 payload");
    let second = text.find(&stub_payload(2)).expect("page 2 payload");
    let third = text.find(&stub_payload(3)).expect("page 3 payload");
    assert!(first < second && second < third);
}

#[test]
fn test_three_page_job_streaming() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(stub_tools(dir.path(), 3), true);
    let mut out = Vec::new();

    let summary = run_job(&sample_job("101"), &config, document(), &mut out).unwrap();

    assert_eq!(summary.pages, 3);
    assert!(!summary.cancelled);
    assert_eq!(summary.bytes, out.len() as u64);
    assert_three_page_stream(&out);
}

#[test]
fn test_three_page_job_listing() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(stub_tools(dir.path(), 3), false);
    let mut out = Vec::new();

    let summary = run_job(&sample_job("102"), &config, document(), &mut out).unwrap();

    assert_eq!(summary.pages, 3);
    assert_three_page_stream(&out);
}

#[test]
fn test_zero_page_job_emits_empty_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(stub_tools(dir.path(), 0), true);
    let mut out = Vec::new();

    let summary = run_job(&sample_job("103"), &config, document(), &mut out).unwrap();

    assert_eq!(summary.pages, 0);
    let text = String::from_utf8_lossy(&out).into_owned();
    assert_eq!(count(&text, "@PJL JOB NAME="), 1);
    assert_eq!(count(&text, "@PJL EOJ"), 1);
    assert_eq!(count(&text, "PAGESTATUS"), 0);
    assert!(out.starts_with(UEL));
    assert!(out.ends_with(b"@PJL EOJ\r\n\x1b%-12345X"));
}

#[test]
fn test_failed_rasterizer_emits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut tools = stub_tools(dir.path(), 0);
    tools.rasterizer = write_stub(
        dir.path(),
        "rasterizer",
        "cat > /dev/null\necho 'ghostscript blew up' >&2\nexit 2",
    );
    let config = test_config(tools, true);
    let mut out = Vec::new();

    let err = run_job(&sample_job("104"), &config, document(), &mut out).unwrap_err();

    assert!(matches!(err, TranscodeError::Rasterization(_)));
    assert!(err.to_string().contains("ghostscript blew up"), "{err}");
    assert!(out.is_empty(), "no bytes may reach the device: {out:?}");
}

#[test]
fn test_compressor_failure_aborts_with_closed_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let mut tools = stub_tools(dir.path(), 2);
    tools.compressor = write_stub(
        dir.path(),
        "compressor",
        r#"case "$1" in
  *page002.pbm) echo 'corrupt bitmap' >&2; exit 1;;
  *) cat "$1";;
esac"#,
    );
    let config = test_config(tools, false);
    let mut out = Vec::new();

    let err = run_job(&sample_job("105"), &config, document(), &mut out).unwrap_err();

    assert!(matches!(err, TranscodeError::Compression { .. }));
    let text = String::from_utf8_lossy(&out).into_owned();
    assert_eq!(count(&text, "@PJL SET PAGESTATUS=START"), 1, "{text}");
    assert_eq!(count(&text, "@PJL JOB NAME="), 1);
    assert_eq!(count(&text, "@PJL EOJ"), 1, "envelope must still close");
    assert!(out.ends_with(b"@PJL EOJ\r\n\x1b%-12345X"));
}

// ============================================================================
// Cancellation
// ============================================================================

#[test]
fn test_cancel_before_start_emits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(stub_tools(dir.path(), 3), true);
    config.cancel.cancel();
    let mut out = Vec::new();

    let summary = run_job(&sample_job("106"), &config, document(), &mut out).unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.pages, 0);
    assert!(out.is_empty());
}

#[test]
fn test_cancel_mid_job_closes_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let mut tools = stub_tools(dir.path(), 1);
    // One page shortly after the watch is in place, then the rasterizer
    // dawdles so the job is still live when the cancel lands.
    tools.rasterizer = write_stub(
        dir.path(),
        "rasterizer",
        r#"tpl=""
for a in "$@"; do
  case "$a" in
    -sOutputFile=*) tpl="${a#-sOutputFile=}";;
  esac
done
out=$(dirname "$tpl")
sleep 0.2
printf 'P4\n8 8\nRASTER001' > "$out/page001.pbm"
cat > /dev/null
sleep 5"#,
    );
    let config = test_config(tools, true);
    let canceller = config.cancel.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(600));
        canceller.cancel();
    });
    let mut out = Vec::new();

    let summary = run_job(&sample_job("107"), &config, document(), &mut out).unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.pages, 1);
    let text = String::from_utf8_lossy(&out).into_owned();
    assert_eq!(count(&text, "@PJL JOB NAME="), 1);
    assert_eq!(count(&text, "@PJL SET PAGESTATUS=START"), 1);
    assert_eq!(count(&text, "@PJL SET PAGESTATUS=END"), 1);
    assert!(out.ends_with(b"@PJL EOJ\r\n\x1b%-12345X"));
}

// ============================================================================
// Debug mode
// ============================================================================

#[test]
fn test_debug_mode_diverts_stream_into_kept_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(stub_tools(dir.path(), 1), true);
    config.debug = true;
    let mut out = Vec::new();

    let summary = run_job(&sample_job("dbg4457"), &config, document(), &mut out).unwrap();

    assert!(out.is_empty(), "debug runs must not feed the device");

    let kept: Vec<PathBuf> = fs::read_dir(std::env::temp_dir())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("corotron-dbg4457-"))
        })
        .collect();
    assert_eq!(kept.len(), 1, "workspace must survive in debug mode");

    let stream = fs::read(kept[0].join("stream.pjl")).unwrap();
    assert!(stream.starts_with(UEL));
    assert!(stream.ends_with(b"@PJL EOJ\r\n\x1b%-12345X"));
    assert_eq!(stream.len() as u64, summary.bytes);
    assert!(kept[0].join("page001.pbm").exists());

    fs::remove_dir_all(&kept[0]).unwrap();
}
