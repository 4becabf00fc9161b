use crate::batch::{dispatch, progress_bar};
use crate::error::Result;
use crate::persist::ResultBuffer;
use crate::task::{FailedTask, UploadTask};
use crate::upload::SessionFactory;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct RetryReport {
    pub recovered: usize,
    /// Tasks that failed on both passes. These go to the error log.
    pub terminal: Vec<FailedTask>,
    pub skipped: usize,
}

/// Second pass over one folder's failures: a fresh session, a narrower pool,
/// no batching and no pause.
pub struct RetryCoordinator {
    factory: Arc<dyn SessionFactory>,
    width: usize,
    task_timeout: Duration,
    cancel: CancellationToken,
    show_progress: bool,
}

impl RetryCoordinator {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        width: usize,
        task_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            factory,
            width,
            task_timeout,
            cancel,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub async fn retry(&self, failed: Vec<FailedTask>, buffer: &ResultBuffer) -> Result<RetryReport> {
        if failed.is_empty() {
            return Ok(RetryReport::default());
        }
        if self.cancel.is_cancelled() {
            return Ok(RetryReport {
                skipped: failed.len(),
                ..RetryReport::default()
            });
        }

        for failure in &failed {
            info!(source = %failure.task.source, reason = %failure.reason, "queued for retry");
        }

        let tasks: Vec<UploadTask> = failed.into_iter().map(|f| f.task).collect();
        info!(
            scope = %buffer.scope(),
            count = tasks.len(),
            workers = self.width,
            "retrying failed uploads"
        );

        let session = self.factory.open_session()?;
        let progress = progress_bar(tasks.len(), self.show_progress);
        progress.set_message(format!("{} (retry)", buffer.scope()));

        let result = dispatch(
            &session,
            &tasks,
            self.width,
            self.task_timeout,
            &self.cancel,
            buffer,
            &progress,
        )
        .await?;
        progress.finish_and_clear();

        for failure in &result.failures {
            warn!(source = %failure.task.source, reason = %failure.reason, "retry failed");
        }

        Ok(RetryReport {
            recovered: result.succeeded,
            terminal: result.failures,
            skipped: result.skipped,
        })
    }
}
