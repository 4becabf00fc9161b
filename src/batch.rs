use crate::config::SchedulerOptions;
use crate::error::{FailureReason, Result};
use crate::persist::ResultBuffer;
use crate::task::{FailedTask, UploadOutcome, UploadTask};
use crate::upload::Uploader;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What one pool run over a set of tasks produced.
#[derive(Debug, Default)]
pub struct DispatchResult {
    pub succeeded: usize,
    pub failures: Vec<FailedTask>,
    /// Tasks never resolved because the run was cancelled.
    pub skipped: usize,
}

/// Result of a first pass over one folder.
#[derive(Debug, Default)]
pub struct PassReport {
    pub succeeded: usize,
    pub failures: Vec<FailedTask>,
    pub skipped: usize,
    pub batch_sizes: Vec<usize>,
}

impl PassReport {
    fn absorb(&mut self, result: DispatchResult) {
        self.succeeded += result.succeeded;
        self.failures.extend(result.failures);
        self.skipped += result.skipped;
    }
}

pub fn progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}

/// Runs one task on the pool. The wait budget starts once a worker slot is
/// held. On timeout the slot is released and the call is left running
/// detached; whatever it returns later is dropped with the handle. The HTTP
/// session carries its own request timeout, so a detached call does not
/// outlive the budget by much.
async fn run_task(
    pool: Arc<Semaphore>,
    uploader: Arc<dyn Uploader>,
    task: UploadTask,
    task_timeout: Duration,
) -> UploadOutcome {
    let _permit = match pool.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            return UploadOutcome::failure(&task, FailureReason::Aborted("pool closed".into()))
        }
    };

    let call_task = task.clone();
    let call = tokio::spawn(async move { uploader.upload(&call_task).await });

    match tokio::time::timeout(task_timeout, call).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join_err)) => {
            error!(source = %task.source, error = %join_err, "upload worker crashed");
            UploadOutcome::failure(&task, FailureReason::Aborted(join_err.to_string()))
        }
        Err(_) => {
            warn!(
                source = %task.source,
                timeout_secs = task_timeout.as_secs_f64(),
                "upload timed out"
            );
            UploadOutcome::failure(&task, FailureReason::Timeout)
        }
    }
}

/// Submits every task to a pool of `width` workers and waits for all of them.
///
/// Successful URLs are pushed into `buffer` in completion order. On
/// cancellation, outcomes that already finished are still collected; the rest
/// are counted as skipped.
pub async fn dispatch(
    uploader: &Arc<dyn Uploader>,
    tasks: &[UploadTask],
    width: usize,
    task_timeout: Duration,
    cancel: &CancellationToken,
    buffer: &ResultBuffer,
    progress: &ProgressBar,
) -> Result<DispatchResult> {
    let pool = Arc::new(Semaphore::new(width.max(1)));
    let mut workers = JoinSet::new();

    for (index, task) in tasks.iter().cloned().enumerate() {
        let pool = Arc::clone(&pool);
        let uploader = Arc::clone(uploader);
        workers.spawn(async move { (index, run_task(pool, uploader, task, task_timeout).await) });
    }

    let mut resolved = vec![false; tasks.len()];
    let mut result = DispatchResult::default();

    loop {
        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                workers.abort_all();
                break;
            }
            joined = workers.join_next() => joined,
        };
        let Some(joined) = joined else { break };
        collect(joined, tasks, &mut resolved, &mut result, buffer, progress)?;
    }

    // Aborting has no effect on workers that already finished; keep their outcomes.
    while let Some(joined) = workers.join_next().await {
        collect(joined, tasks, &mut resolved, &mut result, buffer, progress)?;
    }

    let cancelled = cancel.is_cancelled();
    for (index, done) in resolved.iter().enumerate() {
        if *done {
            continue;
        }
        if cancelled {
            result.skipped += 1;
        } else {
            result.failures.push(FailedTask {
                task: tasks[index].clone(),
                reason: FailureReason::Aborted("worker lost".into()),
            });
        }
    }

    Ok(result)
}

fn collect(
    joined: std::result::Result<(usize, UploadOutcome), tokio::task::JoinError>,
    tasks: &[UploadTask],
    resolved: &mut [bool],
    result: &mut DispatchResult,
    buffer: &ResultBuffer,
    progress: &ProgressBar,
) -> Result<()> {
    let (index, outcome) = match joined {
        Ok(pair) => pair,
        Err(e) => {
            if !e.is_cancelled() {
                error!(error = %e, "worker failed");
            }
            return Ok(());
        }
    };
    resolved[index] = true;
    progress.inc(1);

    match outcome {
        UploadOutcome::Success { url } => {
            result.succeeded += 1;
            buffer.push(url)?;
        }
        UploadOutcome::Failure { reason, .. } => {
            result.failures.push(FailedTask {
                task: tasks[index].clone(),
                reason,
            });
        }
    }
    Ok(())
}

/// First-pass driver for one folder: fixed-size batches, one pool per batch,
/// a pause between batches.
pub struct BatchScheduler {
    uploader: Arc<dyn Uploader>,
    options: SchedulerOptions,
    cancel: CancellationToken,
    show_progress: bool,
}

impl BatchScheduler {
    pub fn new(
        uploader: Arc<dyn Uploader>,
        options: SchedulerOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            uploader,
            options,
            cancel,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub async fn run(&self, tasks: &[UploadTask], buffer: &ResultBuffer) -> Result<PassReport> {
        let mut report = PassReport::default();
        if tasks.is_empty() {
            return Ok(report);
        }

        let batches: Vec<&[UploadTask]> = tasks.chunks(self.options.batch_size.max(1)).collect();
        let total = batches.len();
        let progress = progress_bar(tasks.len(), self.show_progress);
        progress.set_message(buffer.scope().to_string());

        for (number, batch) in batches.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.skipped += batches[number..].iter().map(|b| b.len()).sum::<usize>();
                break;
            }

            info!(
                scope = %buffer.scope(),
                batch = number + 1,
                total,
                files = batch.len(),
                "starting batch"
            );
            report.batch_sizes.push(batch.len());

            let result = dispatch(
                &self.uploader,
                batch,
                self.options.workers,
                self.options.task_timeout,
                &self.cancel,
                buffer,
                &progress,
            )
            .await?;

            info!(
                scope = %buffer.scope(),
                batch = number + 1,
                total,
                succeeded = result.succeeded,
                failed = result.failures.len(),
                "batch finished"
            );
            report.absorb(result);

            if number + 1 < total && !self.options.batch_pause.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.options.batch_pause) => {}
                }
            }
        }

        progress.finish_and_clear();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::RecordStore;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Succeeds unless the file name is listed in `fail`; tracks peak concurrency.
    struct FakeUploader {
        fail: HashSet<String>,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: Mutex<Vec<String>>,
    }

    impl FakeUploader {
        fn new(fail: &[&str], delay: Duration) -> Self {
            Self {
                fail: fail.iter().map(|s| s.to_string()).collect(),
                delay,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Uploader for FakeUploader {
        async fn upload(&self, task: &UploadTask) -> UploadOutcome {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let name = task.source.file_name();
            self.calls.lock().unwrap().push(name.clone());
            if self.fail.contains(&name) {
                UploadOutcome::failure(task, FailureReason::Server(500))
            } else {
                UploadOutcome::Success {
                    url: format!("http://h/{}", name),
                }
            }
        }
    }

    fn tasks(count: usize) -> Vec<UploadTask> {
        (0..count)
            .map(|i| UploadTask::file(format!("/src/album/{}.jpg", i), "album"))
            .collect()
    }

    fn options(batch_size: usize, workers: usize) -> SchedulerOptions {
        SchedulerOptions {
            batch_size,
            workers,
            retry_workers: 1,
            task_timeout: Duration::from_secs(5),
            batch_pause: Duration::ZERO,
        }
    }

    fn buffer(dir: &TempDir) -> (Arc<RecordStore>, ResultBuffer) {
        let store = Arc::new(RecordStore::with_date(dir.path(), "2024-05-01").unwrap());
        let buffer = ResultBuffer::new("album", 30, Arc::clone(&store));
        (store, buffer)
    }

    #[tokio::test]
    async fn test_batches_are_split_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let (store, buffer) = buffer(&temp_dir);
        let uploader = Arc::new(FakeUploader::new(&[], Duration::ZERO));
        let scheduler = BatchScheduler::new(uploader, options(20, 4), CancellationToken::new());

        let report = scheduler.run(&tasks(75), &buffer).await.unwrap();
        buffer.flush().unwrap();

        assert_eq!(report.batch_sizes, vec![20, 20, 20, 15]);
        assert_eq!(report.succeeded, 75);
        assert!(report.failures.is_empty());
        let lines = std::fs::read_to_string(store.record_path("album")).unwrap();
        assert_eq!(lines.lines().count(), 75);
    }

    #[tokio::test]
    async fn test_pool_width_bounds_concurrency() {
        let temp_dir = TempDir::new().unwrap();
        let (_store, buffer) = buffer(&temp_dir);
        let uploader = Arc::new(FakeUploader::new(&[], Duration::from_millis(20)));
        let scheduler = BatchScheduler::new(
            Arc::clone(&uploader) as Arc<dyn Uploader>,
            options(10, 3),
            CancellationToken::new(),
        );

        scheduler.run(&tasks(10), &buffer).await.unwrap();
        assert!(uploader.peak.load(Ordering::SeqCst) <= 3);
        assert!(uploader.peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_failures_are_collected_not_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let (_store, buffer) = buffer(&temp_dir);
        let uploader = Arc::new(FakeUploader::new(&["3.jpg", "7.jpg", "11.jpg"], Duration::ZERO));
        let scheduler = BatchScheduler::new(uploader, options(20, 4), CancellationToken::new());

        let report = scheduler.run(&tasks(20), &buffer).await.unwrap();
        assert_eq!(report.succeeded, 17);
        assert_eq!(report.failures.len(), 3);
        assert!(report
            .failures
            .iter()
            .all(|f| f.reason == FailureReason::Server(500)));
    }

    #[tokio::test]
    async fn test_timeout_is_single_assignment() {
        let temp_dir = TempDir::new().unwrap();
        let (store, buffer) = buffer(&temp_dir);
        let uploader = Arc::new(FakeUploader::new(&[], Duration::from_millis(300)));
        let mut opts = options(5, 1);
        opts.task_timeout = Duration::from_millis(30);
        let scheduler = BatchScheduler::new(uploader, opts, CancellationToken::new());

        let report = scheduler.run(&tasks(1), &buffer).await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].reason, FailureReason::Timeout);

        // Let the detached call finish; its URL must not show up anywhere.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(buffer.pending(), 0);
        buffer.flush().unwrap();
        assert!(!store.record_path("album").exists());
    }

    struct HungUploader;

    #[async_trait]
    impl Uploader for HungUploader {
        async fn upload(&self, _task: &UploadTask) -> UploadOutcome {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_hung_calls_release_their_slot_on_timeout() {
        let temp_dir = TempDir::new().unwrap();
        let (_store, buffer) = buffer(&temp_dir);
        let mut opts = options(3, 1);
        opts.task_timeout = Duration::from_millis(50);
        let scheduler = BatchScheduler::new(Arc::new(HungUploader), opts, CancellationToken::new());

        let report = tokio::time::timeout(Duration::from_secs(3), scheduler.run(&tasks(3), &buffer))
            .await
            .expect("a single worker must move past calls that never return")
            .unwrap();

        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failures.len(), 3);
        assert!(report
            .failures
            .iter()
            .all(|f| f.reason == FailureReason::Timeout));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_skips_everything() {
        let temp_dir = TempDir::new().unwrap();
        let (_store, buffer) = buffer(&temp_dir);
        let uploader = Arc::new(FakeUploader::new(&[], Duration::ZERO));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let scheduler = BatchScheduler::new(
            Arc::clone(&uploader) as Arc<dyn Uploader>,
            options(4, 2),
            cancel,
        );

        let report = scheduler.run(&tasks(10), &buffer).await.unwrap();
        assert_eq!(report.skipped, 10);
        assert_eq!(report.succeeded, 0);
        assert!(uploader.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_run_stops_new_batches() {
        let temp_dir = TempDir::new().unwrap();
        let (_store, buffer) = buffer(&temp_dir);
        let uploader = Arc::new(FakeUploader::new(&[], Duration::from_millis(10)));
        let cancel = CancellationToken::new();
        let mut opts = options(5, 5);
        opts.batch_pause = Duration::from_secs(30);
        let scheduler = BatchScheduler::new(uploader, opts, cancel.clone());

        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
        let report = tokio::time::timeout(Duration::from_secs(5), scheduler.run(&tasks(15), &buffer))
            .await
            .expect("cancellation should interrupt the pause")
            .unwrap();
        trigger.await.unwrap();

        assert_eq!(report.succeeded, 5);
        assert_eq!(report.skipped, 10);
        assert_eq!(report.batch_sizes, vec![5]);
    }
}
