use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Run-level errors. Anything returned as `Err` from the library stops the run;
/// per-file problems travel as [`FailureReason`] inside an outcome instead.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    ImageProcessing(#[from] image::ImageError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid quality value: {0}. Must be between 1 and 100")]
    InvalidQuality(u8),

    #[error("Quality floor {floor} is above start quality {start}")]
    QualityFloorAboveStart { floor: u8, start: u8 },

    #[error("Invalid scale percentage: {0}. Must be between 1 and 100")]
    InvalidScale(u8),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Retry pool width {retry} must be smaller than first-pass width {first}")]
    RetryWidthNotSmaller { retry: usize, first: usize },

    #[error("Source directory not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Failed to create directory: {0}")]
    DirectoryCreationFailed(PathBuf),

    #[error("Walkdir error: {0}")]
    WalkdirError(#[from] walkdir::Error),

    #[error("Failed to write records to {path}: {source}")]
    RecordWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

pub type Result<T> = std::result::Result<T, UploadError>;

/// Why a single task failed. Carried as data so one task never aborts another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Connection, DNS or read failure after the session's own retries ran out.
    Transport(String),
    /// The endpoint answered with something other than 200.
    Server(u16),
    /// Decoding or re-encoding the image failed; nothing was uploaded.
    Decode(String),
    /// 200 with a body that is not `[{"src": ...}]`.
    MalformedResponse(String),
    /// The source could not be read.
    Io(String),
    /// No outcome within the per-task wait budget.
    Timeout,
    /// The worker panicked or was aborted.
    Aborted(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Transport(e) => write!(f, "transport error: {}", e),
            FailureReason::Server(status) => write!(f, "server responded with status {}", status),
            FailureReason::Decode(e) => write!(f, "image decode error: {}", e),
            FailureReason::MalformedResponse(e) => write!(f, "malformed response: {}", e),
            FailureReason::Io(e) => write!(f, "read error: {}", e),
            FailureReason::Timeout => write!(f, "timed out"),
            FailureReason::Aborted(e) => write!(f, "worker aborted: {}", e),
        }
    }
}

impl From<image::ImageError> for FailureReason {
    fn from(err: image::ImageError) -> Self {
        FailureReason::Decode(err.to_string())
    }
}

impl From<std::io::Error> for FailureReason {
    fn from(err: std::io::Error) -> Self {
        FailureReason::Io(err.to_string())
    }
}
