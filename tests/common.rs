#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::{DefaultBodyLimit, Multipart, Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use image::{DynamicImage, RgbImage};
use img_relay::{
    FailureReason, RecordStore, Result, SessionFactory, UploadConfig, UploadOutcome, UploadTask,
    Uploader,
};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const FAKE_HOST: &str = "http://img.example";
pub const TEST_DATE: &str = "2024-05-01";

pub fn create_temp_directory() -> TempDir {
    TempDir::new().unwrap()
}

/// Writes `count` small files named `000.jpg`, `001.jpg`, ... into `dir`.
pub fn create_photo_folder(dir: &Path, count: usize) -> Vec<PathBuf> {
    fs::create_dir_all(dir).unwrap();
    (0..count)
        .map(|i| {
            let path = dir.join(format!("{:03}.jpg", i));
            fs::write(&path, format!("photo {}", i)).unwrap();
            path
        })
        .collect()
}

pub fn noisy_image(width: u32, height: u32) -> DynamicImage {
    let mut state: u32 = 0x2545_F491;
    let img = RgbImage::from_fn(width, height, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let b = state.to_le_bytes();
        image::Rgb([b[0], b[1], b[2]])
    });
    DynamicImage::ImageRgb8(img)
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    noisy_image(width, height)
        .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

pub fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .map(|s| s.lines().map(str::to_owned).collect())
        .unwrap_or_default()
}

/// Finds the record file for `scope` regardless of the date prefix.
pub fn record_file(output_dir: &Path, scope: &str) -> Option<PathBuf> {
    let suffix = format!("_{}_urls.txt", scope);
    fs::read_dir(output_dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .find(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().ends_with(&suffix))
                .unwrap_or(false)
        })
}

pub fn fast_config(root: &Path) -> UploadConfig {
    UploadConfig::builder(FAKE_HOST)
        .batch_size(20)
        .workers(4)
        .retry_workers(2)
        .batch_pause(Duration::ZERO)
        .output_dir(root.join("out"))
        .temp_dir(root.join("temp"))
        .build()
        .unwrap()
}

pub fn fixed_store(config: &UploadConfig) -> Arc<RecordStore> {
    Arc::new(RecordStore::with_date(&config.output_dir, TEST_DATE).unwrap())
}

/// Uploader driven by file name: some names fail only on their first attempt,
/// some always fail, some are slow. Everything else succeeds at once.
#[derive(Default)]
pub struct ScriptedUploader {
    pub fail_once: HashSet<String>,
    pub fail_always: HashSet<String>,
    pub slow: HashMap<String, Duration>,
    attempts: Mutex<HashMap<String, usize>>,
    pub calls: AtomicUsize,
}

impl ScriptedUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_once(mut self, names: &[&str]) -> Self {
        self.fail_once.extend(names.iter().map(|s| s.to_string()));
        self
    }

    pub fn failing_always(mut self, names: &[&str]) -> Self {
        self.fail_always.extend(names.iter().map(|s| s.to_string()));
        self
    }

    pub fn slow(mut self, name: &str, delay: Duration) -> Self {
        self.slow.insert(name.to_string(), delay);
        self
    }

    pub fn attempts(&self, name: &str) -> usize {
        self.attempts.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Uploader for ScriptedUploader {
    async fn upload(&self, task: &UploadTask) -> UploadOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = task.source.file_name();
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let entry = attempts.entry(name.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        if let Some(delay) = self.slow.get(&name) {
            tokio::time::sleep(*delay).await;
        }

        if self.fail_always.contains(&name) || (attempt == 1 && self.fail_once.contains(&name)) {
            return UploadOutcome::failure(task, FailureReason::Server(500));
        }
        UploadOutcome::Success {
            url: format!("{}/file/{}", FAKE_HOST, name),
        }
    }
}

/// Hands out the same scripted uploader for every session and counts sessions.
pub struct SharedFactory {
    pub uploader: Arc<ScriptedUploader>,
    pub sessions: AtomicUsize,
}

impl SharedFactory {
    pub fn new(uploader: ScriptedUploader) -> Arc<Self> {
        Arc::new(Self {
            uploader: Arc::new(uploader),
            sessions: AtomicUsize::new(0),
        })
    }
}

impl SessionFactory for SharedFactory {
    fn open_session(&self) -> Result<Arc<dyn Uploader>> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.uploader) as Arc<dyn Uploader>)
    }
}

/// A file as the mock host received it.
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
struct HostState {
    status: StatusCode,
    /// Time the host sits on a received upload before answering.
    delay: Duration,
    received: Arc<Mutex<Vec<ReceivedFile>>>,
    source_png: Arc<Vec<u8>>,
}

/// Local image host: `POST /upload` answers `[{"src": "/file/<name>"}]`,
/// `GET /source/<name>` serves a small PNG.
pub struct MockHost {
    pub base_url: String,
    pub received: Arc<Mutex<Vec<ReceivedFile>>>,
}

impl MockHost {
    pub fn received(&self) -> Vec<ReceivedFile> {
        self.received.lock().unwrap().clone()
    }
}

async fn handle_upload(State(state): State<HostState>, mut multipart: Multipart) -> Response {
    let mut name = String::from("file");
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().map(str::to_owned);
        if let Some(file_name) = &file_name {
            name = file_name.clone();
        }
        let bytes = field.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
        state
            .received
            .lock()
            .unwrap()
            .push(ReceivedFile { file_name, bytes });
    }

    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    if state.status != StatusCode::OK {
        return (state.status, "rejected").into_response();
    }
    Json(serde_json::json!([{ "src": format!("/file/{}", name) }])).into_response()
}

async fn handle_source(State(state): State<HostState>, UrlPath(_name): UrlPath<String>) -> Vec<u8> {
    state.source_png.as_ref().clone()
}

pub async fn spawn_mock_host(status: StatusCode) -> MockHost {
    spawn_mock_host_with_delay(status, Duration::ZERO).await
}

pub async fn spawn_mock_host_with_delay(status: StatusCode, delay: Duration) -> MockHost {
    let received = Arc::new(Mutex::new(Vec::new()));
    let state = HostState {
        status,
        delay,
        received: Arc::clone(&received),
        source_png: Arc::new(png_bytes(32, 32)),
    };

    let app = Router::new()
        .route("/upload", post(handle_upload))
        .route("/source/:name", get(handle_source))
        .layer(DefaultBodyLimit::disable())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockHost {
        base_url: format!("http://{}", addr),
        received,
    }
}
