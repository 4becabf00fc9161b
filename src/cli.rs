use crate::config::{CompressionOptions, ProxyConfig, UploadConfig};
use crate::constants::{
    DEFAULT_BATCH_PAUSE_MS, DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_THRESHOLD, DEFAULT_MIN_QUALITY,
    DEFAULT_QUALITY, DEFAULT_RETRY_WORKERS, DEFAULT_SCALE_PERCENT, DEFAULT_TASK_TIMEOUT_SECS,
    DEFAULT_TEMP_DIR, DEFAULT_WORKERS,
};
use crate::error::Result;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "img-relay",
    about = "Bulk-upload images to an HTTP image host and record the resulting URLs",
    long_about = "img-relay walks a directory tree (or reads a list of URLs), uploads every file \
                  to an image host's /upload endpoint in bounded parallel batches, retries \
                  failures with less concurrency and appends the returned URLs to dated, \
                  per-folder record files. Images over the size threshold are resized and \
                  re-encoded as JPEG before upload.",
    version,
    after_help = "EXAMPLES:\n  \
    img-relay dir ./photos --base-url https://img.example -r\n  \
    img-relay dir ./photos --base-url https://img.example --workers 8 --retry-workers 2\n  \
    img-relay urls links.txt --base-url https://img.example --https-proxy http://127.0.0.1:7890"
)]
pub struct Args {
    #[arg(short = 'q', long, global = true, help = "Only print warnings and errors")]
    pub quiet: bool,

    #[arg(
        short = 'v',
        long,
        global = true,
        conflicts_with = "quiet",
        help = "Print per-file details"
    )]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Upload every file in a directory, folder by folder",
        long_about = "Upload the files of a directory. Each folder is uploaded as its own scope \
                      and its URLs go to <output-dir>/<date>_<folder>_urls.txt. Failures that \
                      survive the retry pass are appended to <output-dir>/error.txt."
    )]
    Dir {
        #[arg(help = "Root directory to upload")]
        root: PathBuf,

        #[arg(short = 'r', long, help = "Also upload subdirectories")]
        recursive: bool,

        #[arg(long, help = "Skip files without a known image extension")]
        images_only: bool,

        #[command(flatten)]
        upload: UploadArgs,
    },

    #[command(
        about = "Fetch each URL in a list file and re-upload it",
        long_about = "Read one URL per line, download each one and upload it to the image host. \
                      Resulting URLs go to <output-dir>/<date>_urlUpload_urls.txt."
    )]
    Urls {
        #[arg(help = "Text file with one source URL per line")]
        list: PathBuf,

        #[command(flatten)]
        upload: UploadArgs,
    },
}

impl Commands {
    pub fn upload_args(&self) -> &UploadArgs {
        match self {
            Commands::Dir { upload, .. } | Commands::Urls { upload, .. } => upload,
        }
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct UploadArgs {
    #[arg(
        long,
        env = "IMG_RELAY_BASE_URL",
        help = "Image host base URL, e.g. https://img.example",
        long_help = "Base URL of the image host. Uploads go to <base-url>/upload and each \
                     returned src is appended to it as-is."
    )]
    pub base_url: String,

    #[arg(long, help = "Proxy for http:// requests")]
    pub http_proxy: Option<String>,

    #[arg(long, help = "Proxy for https:// requests")]
    pub https_proxy: Option<String>,

    #[arg(short = 'j', long, default_value_t = DEFAULT_WORKERS, help = "Parallel uploads per batch")]
    pub workers: usize,

    #[arg(
        long,
        default_value_t = DEFAULT_RETRY_WORKERS,
        help = "Parallel uploads in the retry pass (must be below --workers)"
    )]
    pub retry_workers: usize,

    #[arg(short = 'b', long, default_value_t = DEFAULT_BATCH_SIZE, help = "Files per batch")]
    pub batch_size: usize,

    #[arg(
        long,
        default_value_t = 5,
        help = "Compress files of at least this many MiB before upload"
    )]
    pub threshold_mib: u64,

    #[arg(
        long,
        default_value_t = DEFAULT_QUALITY,
        help = "Starting JPEG quality for oversized images (1-100)"
    )]
    pub quality: u8,

    #[arg(long, default_value_t = DEFAULT_MIN_QUALITY, help = "Lowest JPEG quality to try")]
    pub min_quality: u8,

    #[arg(
        long,
        default_value_t = DEFAULT_SCALE_PERCENT,
        help = "Downscale oversized images to this percent first (100 keeps the size)"
    )]
    pub scale: u8,

    #[arg(long, default_value_t = DEFAULT_TASK_TIMEOUT_SECS, help = "Per-file timeout in seconds")]
    pub timeout_secs: u64,

    #[arg(long, default_value_t = DEFAULT_BATCH_PAUSE_MS, help = "Pause between batches in ms")]
    pub pause_ms: u64,

    #[arg(long, default_value_t = DEFAULT_FLUSH_THRESHOLD, help = "Write URLs to disk every N results")]
    pub flush_every: usize,

    #[arg(short = 'o', long, default_value = ".", help = "Directory for record files and error.txt")]
    pub output_dir: PathBuf,

    #[arg(long, default_value = DEFAULT_TEMP_DIR, help = "Directory for compressed copies")]
    pub temp_dir: PathBuf,
}

impl UploadArgs {
    pub fn into_config(self) -> Result<UploadConfig> {
        let compression = CompressionOptions::new(
            Some(self.quality),
            Some(self.min_quality),
            Some(self.scale),
            Some(self.threshold_mib.saturating_mul(1024 * 1024)),
        )?;

        UploadConfig::builder(self.base_url)
            .proxy(ProxyConfig {
                http: self.http_proxy,
                https: self.https_proxy,
            })
            .compression(compression)
            .workers(self.workers)
            .retry_workers(self.retry_workers)
            .batch_size(self.batch_size)
            .task_timeout(Duration::from_secs(self.timeout_secs))
            .batch_pause(Duration::from_millis(self.pause_ms))
            .flush_threshold(self.flush_every)
            .output_dir(self.output_dir)
            .temp_dir(self.temp_dir)
            .build()
    }
}
