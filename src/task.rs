use crate::error::FailureReason;
use std::fmt;
use std::path::PathBuf;

/// Where the bytes for a task come from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskSource {
    File(PathBuf),
    Remote(String),
}

impl TaskSource {
    /// File name sent in the multipart form.
    pub fn file_name(&self) -> String {
        match self {
            TaskSource::File(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".to_string()),
            TaskSource::Remote(url) => {
                let without_query = url.split(['?', '#']).next().unwrap_or(url.as_str());
                let rest = without_query
                    .split_once("://")
                    .map(|(_, rest)| rest)
                    .unwrap_or(without_query);
                rest.split_once('/')
                    .and_then(|(_, path)| path.rsplit('/').next())
                    .filter(|segment| !segment.is_empty())
                    .unwrap_or("file")
                    .to_string()
            }
        }
    }
}

impl fmt::Display for TaskSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskSource::File(path) => write!(f, "{}", path.display()),
            TaskSource::Remote(url) => f.write_str(url),
        }
    }
}

/// One unit of work: a source and the scope its result is recorded under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadTask {
    pub source: TaskSource,
    pub scope: String,
}

impl UploadTask {
    pub fn file(path: impl Into<PathBuf>, scope: impl Into<String>) -> Self {
        Self {
            source: TaskSource::File(path.into()),
            scope: scope.into(),
        }
    }

    pub fn remote(url: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            source: TaskSource::Remote(url.into()),
            scope: scope.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Success { url: String },
    Failure { reason: FailureReason, source: TaskSource },
}

impl UploadOutcome {
    pub fn failure(task: &UploadTask, reason: FailureReason) -> Self {
        UploadOutcome::Failure {
            reason,
            source: task.source.clone(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Success { .. })
    }
}

/// A task whose latest attempt failed, kept with the reason for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTask {
    pub task: UploadTask,
    pub reason: FailureReason,
}
