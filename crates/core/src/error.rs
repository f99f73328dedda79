//! Error types for the corotron transcoding library.

use thiserror::Error;

/// Primary error type for transcoding operations.
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("workspace setup failed: {0}")]
    Setup(#[source] std::io::Error),

    #[error("rasterizer failed: {0}")]
    Rasterization(String),

    #[error("compressor failed on {page}: {msg}")]
    Compression { page: String, msg: String },

    #[error("inspector failed on {page}: {msg}")]
    Inspection { page: String, msg: String },

    #[error("framing violation: declared {declared} payload bytes, have {actual}")]
    FramingViolation { declared: usize, actual: usize },

    #[error("page watch error: {0}")]
    Watch(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias for TranscodeError.
pub type Result<T> = std::result::Result<T, TranscodeError>;
