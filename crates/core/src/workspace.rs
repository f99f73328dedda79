//! Per-job working directory.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tempfile::TempDir;

use crate::error::{Result, TranscodeError};
use crate::page::Page;

/// Private scratch directory holding one job's rasterized pages.
///
/// Dropping a live `Workspace` removes the directory, so error paths
/// clean up without ceremony. The normal shutdown path goes through
/// [`Workspace::close`], which can keep the directory for post-mortem
/// inspection instead.
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl Workspace {
    /// Create the directory under the system temp root, named after the job.
    pub fn create(job_id: &str) -> Result<Workspace> {
        // Job ids come from the spooler; keep the prefix filesystem-safe.
        let safe: String = job_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        let dir = tempfile::Builder::new()
            .prefix(&format!("corotron-{safe}-"))
            .tempdir()
            .map_err(TranscodeError::Setup)?;
        let path = dir.path().to_path_buf();
        debug!("workspace at {}", path.display());
        Ok(Workspace {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pages currently in the directory, in ordinal order.
    ///
    /// Non-page files are skipped, so rasterizer droppings and the
    /// debug stream copy never masquerade as pages.
    pub fn sorted_pages(&self) -> Result<Vec<Page>> {
        Page::scan_dir(&self.path)
    }

    /// Tear the directory down, or keep it when `keep` is set.
    ///
    /// Removal failures are logged rather than returned: by the time
    /// the workspace closes, the job's output has already been
    /// committed.
    pub fn close(mut self, keep: bool) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        if keep {
            let path = dir.into_path();
            info!("keeping workspace {}", path.display());
        } else if let Err(e) = dir.close() {
            warn!("workspace removal failed: {e}");
        }
    }
}
