pub mod batch;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod logger;
pub mod persist;
pub mod pipeline;
pub mod processing;
pub mod retry;
pub mod task;
pub mod upload;
pub mod walker;

pub use batch::{dispatch, BatchScheduler, DispatchResult, PassReport};
pub use config::{CompressionOptions, ProxyConfig, SchedulerOptions, UploadConfig};
pub use error::{FailureReason, Result, UploadError};
pub use persist::{RecordStore, ResultBuffer};
pub use pipeline::{Pipeline, RunSummary};
pub use processing::{
    compress_to_budget, compute_target_dimensions, needs_preprocessing, preprocess,
    preprocess_bytes, resize_image, CompressedImage, TempStore,
};
pub use retry::{RetryCoordinator, RetryReport};
pub use task::{FailedTask, TaskSource, UploadOutcome, UploadTask};
pub use upload::{
    parse_upload_response, HttpSessionFactory, HttpUploader, RetryPolicy, SessionFactory,
    Uploader,
};
pub use walker::{is_image_file, walk, FolderFiles, WalkOptions};
