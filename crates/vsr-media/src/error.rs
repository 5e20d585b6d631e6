//! Error types for the Frame I/O Adapter.

use std::path::PathBuf;
use thiserror::Error;

pub type MediaResult<T> = Result<T, MediaError>;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("ffmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("ffprobe not found in PATH")]
    FfprobeNotFound,

    #[error("source unreadable: no video stream found")]
    SourceUnreadable,

    #[error("extraction failed: {stderr}")]
    ExtractionFailed { stderr: String },

    #[error("assembly failed: {stderr}")]
    AssemblyFailed { stderr: String },

    #[error("exited with status {code:?}")]
    NonZeroExit { code: Option<i32> },

    #[error("incomplete frames: expected {expected}, found {found}")]
    IncompleteFrames { expected: usize, found: usize },

    #[error("archive entry escapes the target directory: {0}")]
    UnsafeArchiveEntry(String),

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MediaError {
    pub fn extraction_failed(stderr: impl Into<String>) -> Self {
        Self::ExtractionFailed {
            stderr: stderr.into(),
        }
    }

    pub fn assembly_failed(stderr: impl Into<String>) -> Self {
        Self::AssemblyFailed {
            stderr: stderr.into(),
        }
    }
}
