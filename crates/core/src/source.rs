//! Page sources: how rasterized pages reach the transcoding loop.
//!
//! Two strategies hide behind one trait. [`ListingSource`] is the
//! after-the-fact strategy: the rasterizer has already exited and the
//! working directory is simply read in order. [`WatchSource`] overlaps
//! transcoding with rasterization: a filesystem watcher reports each
//! page as the rasterizer closes it, and the rasterizer's exit arrives
//! as a message on the same channel, so completion needs no marker
//! files in the working directory.

use std::collections::HashSet;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::time::Duration;

use log::{debug, warn};
use notify::event::{AccessKind, AccessMode, EventKind};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::{Result, TranscodeError};
use crate::page::Page;

/// How long a blocked source waits before rechecking the cancel flag.
const EVENT_POLL: Duration = Duration::from_millis(100);

/// Shared cancellation flag.
///
/// Cloned handles observe the same flag; the binary registers the raw
/// atomic with its signal handlers and the transcoding loop polls it
/// between pages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Raw flag, for signal-handler registration.
    pub fn as_arc(&self) -> &Arc<AtomicBool> {
        &self.0
    }
}

/// A supplier of rasterized pages, one at a time.
///
/// `Ok(None)` means the job has no further pages, either because the
/// rasterizer finished or because the job was cancelled; the caller
/// tells the two apart through its own cancel flag.
pub trait PageSource {
    fn next_page(&mut self) -> Result<Option<Page>>;
}

/// Pages from a directory listing taken after rasterization finished.
pub struct ListingSource {
    pages: std::vec::IntoIter<Page>,
}

impl ListingSource {
    pub fn new(pages: Vec<Page>) -> Self {
        Self {
            pages: pages.into_iter(),
        }
    }
}

impl PageSource for ListingSource {
    fn next_page(&mut self) -> Result<Option<Page>> {
        Ok(self.pages.next())
    }
}

/// Messages flowing into a [`WatchSource`].
enum SourceEvent {
    PageReady(Page),
    WatchFailed(String),
    RasterizerDone(Result<()>),
}

/// Hands the rasterizer's exit status to the watching source.
///
/// Sending consumes the handle: there is exactly one completion per
/// job, and it travels over the same channel as the page events so the
/// source sees it strictly after every event sent before it.
pub struct CompletionSender(Sender<SourceEvent>);

impl CompletionSender {
    pub fn send(self, outcome: Result<()>) {
        let _ = self.0.send(SourceEvent::RasterizerDone(outcome));
    }
}

/// Pages reported live by a filesystem watcher on the working directory.
pub struct WatchSource {
    rx: Receiver<SourceEvent>,
    // Dropping the watcher stops event delivery; hold it for the
    // source's whole life.
    _watcher: RecommendedWatcher,
    dir: PathBuf,
    seen: HashSet<u32>,
    leftovers: VecDeque<Page>,
    done: bool,
    cancel: CancelFlag,
}

impl WatchSource {
    /// Watch a working directory for finished pages.
    ///
    /// Returns the source plus the [`CompletionSender`] the caller
    /// must fire once the rasterizer exits. A page counts as finished
    /// when the rasterizer closes it after writing; pages missed by
    /// the watcher are still picked up by the completion sweep.
    pub fn start(workdir: &Path, cancel: CancelFlag) -> Result<(WatchSource, CompletionSender)> {
        let (tx, rx) = channel();
        let event_tx = tx.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if !is_close_write(&event.kind) {
                        return;
                    }
                    for path in &event.paths {
                        if let Some(page) = Page::from_path(path) {
                            let _ = event_tx.send(SourceEvent::PageReady(page));
                        }
                    }
                }
                Err(e) => {
                    let _ = event_tx.send(SourceEvent::WatchFailed(e.to_string()));
                }
            },
            Config::default(),
        )
        .map_err(|e| TranscodeError::Watch(e.to_string()))?;
        watcher
            .watch(workdir, RecursiveMode::NonRecursive)
            .map_err(|e| TranscodeError::Watch(e.to_string()))?;
        let source = WatchSource {
            rx,
            _watcher: watcher,
            dir: workdir.to_path_buf(),
            seen: HashSet::new(),
            leftovers: VecDeque::new(),
            done: false,
            cancel,
        };
        Ok((source, CompletionSender(tx)))
    }

    /// Record one event, returning a page if it is new.
    fn accept(&mut self, event: SourceEvent) -> Result<Option<Page>> {
        match event {
            SourceEvent::PageReady(page) => {
                if self.seen.insert(page.ordinal) {
                    debug!("page {} ready", page.ordinal);
                    Ok(Some(page))
                } else {
                    Ok(None)
                }
            }
            SourceEvent::WatchFailed(msg) => Err(TranscodeError::Watch(msg)),
            SourceEvent::RasterizerDone(outcome) => {
                debug!("rasterizer finished");
                self.done = true;
                outcome?;
                self.sweep()?;
                Ok(None)
            }
        }
    }

    /// After completion: queue events still in flight, then re-list the
    /// directory for pages whose events never arrived.
    fn sweep(&mut self) -> Result<()> {
        while let Ok(event) = self.rx.try_recv() {
            if let Some(page) = self.accept_queued(event)? {
                self.leftovers.push_back(page);
            }
        }
        let mut missed = 0usize;
        for page in Page::scan_dir(&self.dir)? {
            if self.seen.insert(page.ordinal) {
                missed += 1;
                self.leftovers.push_back(page);
            }
        }
        if missed > 0 {
            warn!("{missed} page(s) arrived without a watch event");
        }
        Ok(())
    }

    fn accept_queued(&mut self, event: SourceEvent) -> Result<Option<Page>> {
        match event {
            SourceEvent::PageReady(page) => {
                Ok(self.seen.insert(page.ordinal).then_some(page))
            }
            SourceEvent::WatchFailed(msg) => Err(TranscodeError::Watch(msg)),
            // A second completion cannot happen; the sender is consumed.
            SourceEvent::RasterizerDone(_) => Ok(None),
        }
    }
}

impl PageSource for WatchSource {
    fn next_page(&mut self) -> Result<Option<Page>> {
        loop {
            if let Some(page) = self.leftovers.pop_front() {
                return Ok(Some(page));
            }
            if self.done {
                return Ok(None);
            }
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            match self.rx.recv_timeout(EVENT_POLL) {
                Ok(event) => {
                    if let Some(page) = self.accept(event)? {
                        return Ok(Some(page));
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TranscodeError::Watch(
                        "page event channel closed before completion".to_string(),
                    ));
                }
            }
        }
    }
}

fn is_close_write(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Access(AccessKind::Close(AccessMode::Write)))
}
