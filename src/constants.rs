pub const DEFAULT_QUALITY: u8 = 85;
pub const DEFAULT_MIN_QUALITY: u8 = 10;
pub const MIN_QUALITY: u8 = 1;
pub const MAX_QUALITY: u8 = 100;
pub const QUALITY_STEP: u8 = 5;

pub const DEFAULT_SCALE_PERCENT: u8 = 85;
pub const MAX_OUTPUT_WIDTH: u32 = 4000;
pub const MAX_OUTPUT_HEIGHT: u32 = 6000;

/// Files at or above this size are recompressed before upload (5 MiB).
pub const DEFAULT_SIZE_THRESHOLD: u64 = 5 * 1024 * 1024;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_RETRY_WORKERS: usize = 2;
pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_FLUSH_THRESHOLD: usize = 30;
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_BATCH_PAUSE_MS: u64 = 1000;

pub const HTTP_RETRIES: u32 = 3;
pub const HTTP_BACKOFF_BASE_MS: u64 = 500;
pub const HTTP_POOL_MAX_IDLE: usize = 100;
pub const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

pub const MAX_TEMP_FILES: usize = 30;
pub const DEFAULT_TEMP_DIR: &str = "temp";
pub const ERROR_LOG_NAME: &str = "error.txt";
pub const URL_MODE_SCOPE: &str = "urlUpload";
pub const UPLOAD_FIELD: &str = "file";

pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "webp", "bmp", "tiff", "gif", "avif", "heic", "heif", "jxl",
];
