use crate::constants::{
    DEFAULT_BATCH_PAUSE_MS, DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_THRESHOLD, DEFAULT_MIN_QUALITY,
    DEFAULT_QUALITY, DEFAULT_RETRY_WORKERS, DEFAULT_SCALE_PERCENT, DEFAULT_SIZE_THRESHOLD,
    DEFAULT_TASK_TIMEOUT_SECS, DEFAULT_TEMP_DIR, DEFAULT_WORKERS, MAX_OUTPUT_HEIGHT,
    MAX_OUTPUT_WIDTH, MAX_QUALITY, MIN_QUALITY,
};
use crate::error::{Result, UploadError};
use std::path::PathBuf;
use std::time::Duration;

/// Settings for the oversized-image path.
#[derive(Debug, Clone)]
pub struct CompressionOptions {
    pub size_threshold: u64,
    pub start_quality: u8,
    pub min_quality: u8,
    pub scale_percent: u8,
    pub max_width: u32,
    pub max_height: u32,
}

impl CompressionOptions {
    pub fn new(
        quality: Option<u8>,
        min_quality: Option<u8>,
        scale_percent: Option<u8>,
        size_threshold: Option<u64>,
    ) -> Result<Self> {
        let start_quality = quality.unwrap_or(DEFAULT_QUALITY);
        if !(MIN_QUALITY..=MAX_QUALITY).contains(&start_quality) {
            return Err(UploadError::InvalidQuality(start_quality));
        }

        let min_quality = min_quality.unwrap_or(DEFAULT_MIN_QUALITY);
        if !(MIN_QUALITY..=MAX_QUALITY).contains(&min_quality) {
            return Err(UploadError::InvalidQuality(min_quality));
        }
        if min_quality > start_quality {
            return Err(UploadError::QualityFloorAboveStart {
                floor: min_quality,
                start: start_quality,
            });
        }

        let scale_percent = scale_percent.unwrap_or(DEFAULT_SCALE_PERCENT);
        if !(1..=100).contains(&scale_percent) {
            return Err(UploadError::InvalidScale(scale_percent));
        }

        Ok(Self {
            size_threshold: size_threshold.unwrap_or(DEFAULT_SIZE_THRESHOLD),
            start_quality,
            min_quality,
            scale_percent,
            max_width: MAX_OUTPUT_WIDTH,
            max_height: MAX_OUTPUT_HEIGHT,
        })
    }

    /// The compressed result must fit under the same limit that triggered it.
    pub fn max_bytes(&self) -> u64 {
        self.size_threshold
    }
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            size_threshold: DEFAULT_SIZE_THRESHOLD,
            start_quality: DEFAULT_QUALITY,
            min_quality: DEFAULT_MIN_QUALITY,
            scale_percent: DEFAULT_SCALE_PERCENT,
            max_width: MAX_OUTPUT_WIDTH,
            max_height: MAX_OUTPUT_HEIGHT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyConfig {
    pub http: Option<String>,
    pub https: Option<String>,
}

/// Pool widths and pacing for the first pass and the retry pass.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub batch_size: usize,
    pub workers: usize,
    pub retry_workers: usize,
    pub task_timeout: Duration,
    pub batch_pause: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            workers: DEFAULT_WORKERS,
            retry_workers: DEFAULT_RETRY_WORKERS,
            task_timeout: Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS),
            batch_pause: Duration::from_millis(DEFAULT_BATCH_PAUSE_MS),
        }
    }
}

/// Fully resolved settings for one run. Built once and handed to each component.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Used verbatim: the endpoint is `{base_url}/upload` and results are `{base_url}{src}`.
    pub base_url: String,
    pub proxy: ProxyConfig,
    pub compression: CompressionOptions,
    pub scheduler: SchedulerOptions,
    pub flush_threshold: usize,
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
}

impl UploadConfig {
    pub fn builder(base_url: impl Into<String>) -> UploadConfigBuilder {
        UploadConfigBuilder::new(base_url.into())
    }

    pub fn upload_endpoint(&self) -> String {
        format!("{}/upload", self.base_url)
    }
}

#[derive(Debug, Clone)]
pub struct UploadConfigBuilder {
    base_url: String,
    proxy: ProxyConfig,
    compression: CompressionOptions,
    scheduler: SchedulerOptions,
    flush_threshold: usize,
    output_dir: PathBuf,
    temp_dir: PathBuf,
}

impl UploadConfigBuilder {
    fn new(base_url: String) -> Self {
        Self {
            base_url,
            proxy: ProxyConfig::default(),
            compression: CompressionOptions::default(),
            scheduler: SchedulerOptions::default(),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            output_dir: PathBuf::from("."),
            temp_dir: PathBuf::from(DEFAULT_TEMP_DIR),
        }
    }

    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn compression(mut self, compression: CompressionOptions) -> Self {
        self.compression = compression;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.scheduler.workers = workers;
        self
    }

    pub fn retry_workers(mut self, retry_workers: usize) -> Self {
        self.scheduler.retry_workers = retry_workers;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.scheduler.batch_size = batch_size;
        self
    }

    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.scheduler.task_timeout = timeout;
        self
    }

    pub fn batch_pause(mut self, pause: Duration) -> Self {
        self.scheduler.batch_pause = pause;
        self
    }

    pub fn flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn build(self) -> Result<UploadConfig> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(UploadError::InvalidConfig(format!(
                "base URL must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }

        let s = &self.scheduler;
        if s.batch_size == 0 {
            return Err(UploadError::InvalidConfig("batch size must be at least 1".into()));
        }
        if s.workers == 0 || s.retry_workers == 0 {
            return Err(UploadError::InvalidConfig("worker pools need at least 1 worker".into()));
        }
        if s.workers > 1 && s.retry_workers >= s.workers {
            return Err(UploadError::RetryWidthNotSmaller {
                retry: s.retry_workers,
                first: s.workers,
            });
        }
        if s.task_timeout.is_zero() {
            return Err(UploadError::InvalidConfig("task timeout must be non-zero".into()));
        }
        if self.flush_threshold == 0 {
            return Err(UploadError::InvalidConfig("flush threshold must be at least 1".into()));
        }

        Ok(UploadConfig {
            base_url: self.base_url,
            proxy: self.proxy,
            compression: self.compression,
            scheduler: self.scheduler,
            flush_threshold: self.flush_threshold,
            output_dir: self.output_dir,
            temp_dir: self.temp_dir,
        })
    }
}
