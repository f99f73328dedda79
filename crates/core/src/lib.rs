//! corotron - print-job transcoding for page-oriented devices.
//!
//! A spooler hands over job arguments and a page-description document;
//! this library rasterizes the document through external tools and
//! emits a single PJL-framed device-control stream with one compressed
//! raster payload per page. See [`run_job`] for the entry point.

pub mod driver;
pub mod error;
pub mod job;
pub mod page;
pub mod pjl;
pub mod source;
pub mod tools;
pub mod workspace;

pub use driver::{JobSummary, TranscodeConfig, run_job};
pub use error::{Result, TranscodeError};
pub use job::{Job, PageSetup};
pub use page::{Page, PageStats, dot_count};
pub use source::{CancelFlag, ListingSource, PageSource, WatchSource};
pub use tools::ToolConfig;
pub use workspace::Workspace;
