use crate::constants::ERROR_LOG_NAME;
use crate::error::{Result, UploadError};
use crate::task::TaskSource;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

/// Append-only record files under one output directory.
///
/// All writes share one lock, so lines from a single call are never
/// interleaved with another writer's.
#[derive(Debug)]
pub struct RecordStore {
    output_dir: PathBuf,
    date: String,
    write_lock: Mutex<()>,
}

impl RecordStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let date = chrono::Local::now().format("%Y-%m-%d").to_string();
        Self::with_date(output_dir, date)
    }

    pub fn with_date(output_dir: impl Into<PathBuf>, date: impl Into<String>) -> Result<Self> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)
            .map_err(|_| UploadError::DirectoryCreationFailed(output_dir.clone()))?;

        Ok(Self {
            output_dir,
            date: date.into(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `<output_dir>/YYYY-MM-DD_<scope>_urls.txt`
    pub fn record_path(&self, scope: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}_urls.txt", self.date, scope))
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.output_dir.join(ERROR_LOG_NAME)
    }

    pub fn record(&self, urls: &[String], scope: &str) -> Result<()> {
        if urls.is_empty() {
            return Ok(());
        }
        let path = self.record_path(scope);
        self.append_lines(&path, urls.iter().map(String::as_str))?;
        info!(count = urls.len(), file = %path.display(), "saved urls");
        Ok(())
    }

    pub fn record_failures(&self, sources: &[TaskSource]) -> Result<()> {
        if sources.is_empty() {
            return Ok(());
        }
        let lines: Vec<String> = sources.iter().map(ToString::to_string).collect();
        let path = self.error_log_path();
        self.append_lines(&path, lines.iter().map(String::as_str))?;
        info!(count = lines.len(), file = %path.display(), "logged failed sources");
        Ok(())
    }

    fn append_lines<'a>(&self, path: &Path, lines: impl Iterator<Item = &'a str>) -> Result<()> {
        let mut payload = String::new();
        for line in lines {
            payload.push_str(line);
            payload.push('\n');
        }

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| UploadError::LockPoisoned("record store"))?;

        let to_record_error = |source| UploadError::RecordWrite {
            path: path.to_path_buf(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(to_record_error)?;
        file.write_all(payload.as_bytes()).map_err(to_record_error)?;
        file.flush().map_err(to_record_error)
    }
}

/// In-memory URLs for one scope that have not been written yet.
///
/// Reaching `threshold` pending URLs writes and clears them in one call. URLs
/// stay pending if the write fails, and anything still pending on drop is
/// written then.
#[derive(Debug)]
pub struct ResultBuffer {
    scope: String,
    threshold: usize,
    store: Arc<RecordStore>,
    pending: Mutex<Vec<String>>,
}

impl ResultBuffer {
    pub fn new(scope: impl Into<String>, threshold: usize, store: Arc<RecordStore>) -> Self {
        Self {
            scope: scope.into(),
            threshold: threshold.max(1),
            store,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Adds one URL. Returns `true` when this push triggered a flush.
    pub fn push(&self, url: String) -> Result<bool> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| UploadError::LockPoisoned("result buffer"))?;
        pending.push(url);

        if pending.len() >= self.threshold {
            self.store.record(&pending, &self.scope)?;
            debug!(scope = %self.scope, count = pending.len(), "flushed result buffer");
            pending.clear();
            return Ok(true);
        }
        Ok(false)
    }

    /// Writes whatever is pending. Returns the number of URLs written.
    pub fn flush(&self) -> Result<usize> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| UploadError::LockPoisoned("result buffer"))?;
        let count = pending.len();
        self.store.record(&pending, &self.scope)?;
        pending.clear();
        Ok(count)
    }

    pub fn pending(&self) -> usize {
        match self.pending.lock() {
            Ok(pending) => pending.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl Drop for ResultBuffer {
    fn drop(&mut self) {
        let pending = match self.pending.get_mut() {
            Ok(pending) => pending,
            Err(poisoned) => poisoned.into_inner(),
        };
        if pending.is_empty() {
            return;
        }
        if let Err(e) = self.store.record(pending, &self.scope) {
            error!(scope = %self.scope, count = pending.len(), error = %e, "lost buffered urls");
        }
        pending.clear();
    }
}
