use crate::config::{CompressionOptions, UploadConfig};
use crate::constants::{
    HTTP_BACKOFF_BASE_MS, HTTP_CONNECT_TIMEOUT_SECS, HTTP_POOL_MAX_IDLE, HTTP_RETRIES,
    UPLOAD_FIELD,
};
use crate::error::{FailureReason, Result, UploadError};
use crate::processing::{
    needs_preprocessing, preprocess, preprocess_bytes, CompressedImage, TempStore,
};
use crate::task::{TaskSource, UploadOutcome, UploadTask};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Anything that can turn a task into an outcome. Implementations never return
/// an error for a per-task problem; they report it in the outcome.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, task: &UploadTask) -> UploadOutcome;
}

/// Opens a fresh upload session for one pass.
pub trait SessionFactory: Send + Sync {
    fn open_session(&self) -> Result<Arc<dyn Uploader>>;
}

/// Transport-level retry policy: bounded attempts with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: HTTP_RETRIES,
            backoff_base: Duration::from_millis(HTTP_BACKOFF_BASE_MS),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `attempt` (1-based): base, 2x base, 4x base, ...
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1 << exponent)
    }
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    src: String,
}

/// Turns a 200 body into the final URL: `base_url` followed by the first entry's
/// `src`, verbatim.
pub fn parse_upload_response(
    base_url: &str,
    body: &[u8],
) -> std::result::Result<String, FailureReason> {
    let files: Vec<UploadedFile> = serde_json::from_slice(body)
        .map_err(|e| FailureReason::MalformedResponse(e.to_string()))?;

    let first = files
        .into_iter()
        .next()
        .ok_or_else(|| FailureReason::MalformedResponse("empty file list".to_string()))?;

    if first.src.is_empty() {
        return Err(FailureReason::MalformedResponse("empty src".to_string()));
    }
    Ok(format!("{}{}", base_url, first.src))
}

/// Errors worth resending a read-only request for.
fn is_transient(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || err.is_request()
}

fn preprocess_failure(err: UploadError) -> FailureReason {
    match err {
        UploadError::Io(e) => FailureReason::Io(e.to_string()),
        other => FailureReason::Decode(other.to_string()),
    }
}

pub fn build_http_client(config: &UploadConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(HTTP_POOL_MAX_IDLE)
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .timeout(config.scheduler.task_timeout);

    if let Some(proxy) = &config.proxy.http {
        builder = builder.proxy(reqwest::Proxy::http(proxy)?);
    }
    if let Some(proxy) = &config.proxy.https {
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }

    Ok(builder.build()?)
}

/// Multipart uploader over one pooled HTTP session.
pub struct HttpUploader {
    client: reqwest::Client,
    base_url: String,
    endpoint: String,
    compression: CompressionOptions,
    retry: RetryPolicy,
    temp: Arc<TempStore>,
}

impl HttpUploader {
    pub fn new(config: &UploadConfig, temp: Arc<TempStore>) -> Result<Self> {
        Ok(Self {
            client: build_http_client(config)?,
            base_url: config.base_url.clone(),
            endpoint: config.upload_endpoint(),
            compression: config.compression.clone(),
            retry: RetryPolicy::default(),
            temp,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn try_upload(&self, task: &UploadTask) -> std::result::Result<String, FailureReason> {
        let file_name = task.source.file_name();
        let payload = match &task.source {
            TaskSource::File(path) => self.load_file(path, &task.scope, &file_name).await?,
            TaskSource::Remote(url) => {
                let data = self.fetch(url).await?;
                self.shrink_fetched(url, data).await?
            }
        };
        self.post(file_name, payload).await
    }

    async fn load_file(
        &self,
        path: &Path,
        scope: &str,
        file_name: &str,
    ) -> std::result::Result<Vec<u8>, FailureReason> {
        let size = tokio::fs::metadata(path).await?.len();
        if !needs_preprocessing(size, &self.compression) {
            return Ok(tokio::fs::read(path).await?);
        }

        info!(
            file = %file_name,
            size,
            scale = self.compression.scale_percent,
            "file over size threshold, compressing"
        );
        let options = self.compression.clone();
        let owned = path.to_path_buf();
        let compressed = tokio::task::spawn_blocking(move || preprocess(&owned, &options))
            .await
            .map_err(|e| FailureReason::Aborted(e.to_string()))?
            .map_err(preprocess_failure)?;

        self.log_compressed(file_name, size, &compressed);
        if let Err(e) = self.temp.write(scope, file_name, &compressed.bytes) {
            warn!(file = %file_name, error = %e, "failed to keep compressed copy");
        }
        Ok(compressed.bytes)
    }

    async fn shrink_fetched(
        &self,
        url: &str,
        data: Vec<u8>,
    ) -> std::result::Result<Vec<u8>, FailureReason> {
        let size = data.len() as u64;
        if !needs_preprocessing(size, &self.compression) {
            return Ok(data);
        }

        info!(url = %url, size, "download over size threshold, compressing");
        let options = self.compression.clone();
        let compressed = tokio::task::spawn_blocking(move || preprocess_bytes(&data, &options))
            .await
            .map_err(|e| FailureReason::Aborted(e.to_string()))?
            .map_err(preprocess_failure)?;

        self.log_compressed(url, size, &compressed);
        Ok(compressed.bytes)
    }

    fn log_compressed(&self, name: &str, original: u64, compressed: &CompressedImage) {
        debug!(
            source = %name,
            original,
            compressed = compressed.len(),
            quality = compressed.quality,
            width = compressed.width,
            height = compressed.height,
            attempts = compressed.attempts,
            "compressed"
        );
    }

    async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FailureReason> {
        let response = self
            .send_with_retry(|| self.client.get(url), is_transient)
            .await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(FailureReason::Server(status.as_u16()));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| FailureReason::Transport(e.to_string()))?;
        Ok(body.to_vec())
    }

    async fn post(
        &self,
        file_name: String,
        payload: Vec<u8>,
    ) -> std::result::Result<String, FailureReason> {
        let response = self
            .send_with_retry(
                || {
                    let part = Part::bytes(payload.clone()).file_name(file_name.clone());
                    self.client
                        .post(&self.endpoint)
                        .multipart(Form::new().part(UPLOAD_FIELD, part))
                },
                // Once the body may have reached the host a resend could store it twice.
                reqwest::Error::is_connect,
            )
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FailureReason::Server(status.as_u16()));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| FailureReason::Transport(e.to_string()))?;
        parse_upload_response(&self.base_url, &body)
    }

    async fn send_with_retry<F, R>(
        &self,
        build: F,
        retryable: R,
    ) -> std::result::Result<Response, FailureReason>
    where
        F: Fn() -> RequestBuilder,
        R: Fn(&reqwest::Error) -> bool,
    {
        let mut attempt = 0;
        loop {
            match build().send().await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.retry.retries && retryable(&e) => {
                    attempt += 1;
                    let delay = self.retry.delay(attempt);
                    debug!(
                        attempt,
                        error = %e,
                        wait_ms = delay.as_millis() as u64,
                        "transport error; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(FailureReason::Transport(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, task: &UploadTask) -> UploadOutcome {
        match self.try_upload(task).await {
            Ok(url) => {
                debug!(source = %task.source, url = %url, "upload succeeded");
                UploadOutcome::Success { url }
            }
            Err(reason) => {
                warn!(source = %task.source, reason = %reason, "upload failed");
                UploadOutcome::failure(task, reason)
            }
        }
    }
}

/// Builds a new [`HttpUploader`], with its own connection pool, for each pass.
pub struct HttpSessionFactory {
    config: Arc<UploadConfig>,
    temp: Arc<TempStore>,
    retry: RetryPolicy,
}

impl HttpSessionFactory {
    pub fn new(config: Arc<UploadConfig>, temp: Arc<TempStore>) -> Self {
        Self {
            config,
            temp,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl SessionFactory for HttpSessionFactory {
    fn open_session(&self) -> Result<Arc<dyn Uploader>> {
        let uploader = HttpUploader::new(&self.config, Arc::clone(&self.temp))?
            .with_retry_policy(self.retry.clone());
        Ok(Arc::new(uploader))
    }
}
