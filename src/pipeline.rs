use crate::batch::BatchScheduler;
use crate::config::UploadConfig;
use crate::constants::{MAX_TEMP_FILES, URL_MODE_SCOPE};
use crate::error::{Result, UploadError};
use crate::persist::{RecordStore, ResultBuffer};
use crate::processing::TempStore;
use crate::retry::RetryCoordinator;
use crate::task::{TaskSource, UploadTask};
use crate::upload::{HttpSessionFactory, SessionFactory, Uploader};
use crate::walker::{walk, WalkOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Totals for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub scopes: usize,
    pub submitted: usize,
    /// First-pass successes.
    pub uploaded: usize,
    /// Successes from the retry pass.
    pub recovered: usize,
    pub terminal_failures: usize,
    /// Files never attempted because the run was interrupted, including
    /// those in folders it never reached.
    pub skipped: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.uploaded + self.recovered
    }

    fn log(&self) {
        info!(
            scopes = self.scopes,
            submitted = self.submitted,
            succeeded = self.succeeded(),
            recovered = self.recovered,
            failed = self.terminal_failures,
            skipped = self.skipped,
            elapsed_secs = self.elapsed.as_secs_f64(),
            "run finished"
        );
        if self.cancelled {
            warn!("run was interrupted; remaining work was skipped");
        }
    }
}

/// Wires walker, scheduler, retry and persistence together for one run.
pub struct Pipeline {
    config: Arc<UploadConfig>,
    factory: Arc<dyn SessionFactory>,
    store: Arc<RecordStore>,
    temp: Arc<TempStore>,
    cancel: CancellationToken,
    show_progress: bool,
}

impl Pipeline {
    pub fn new(
        config: Arc<UploadConfig>,
        factory: Arc<dyn SessionFactory>,
        store: Arc<RecordStore>,
        temp: Arc<TempStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            factory,
            store,
            temp,
            cancel,
            show_progress: false,
        }
    }

    /// A pipeline that uploads over HTTP and records under `config.output_dir`.
    pub fn http(config: UploadConfig, cancel: CancellationToken) -> Result<Self> {
        let config = Arc::new(config);
        let store = Arc::new(RecordStore::new(&config.output_dir)?);
        let temp = Arc::new(TempStore::new(&config.temp_dir));
        let factory = Arc::new(HttpSessionFactory::new(
            Arc::clone(&config),
            Arc::clone(&temp),
        ));
        Ok(Self::new(config, factory, store, temp, cancel))
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Uploads every folder under `root`, one folder at a time.
    pub async fn run_directory(&self, root: &Path, options: WalkOptions) -> Result<RunSummary> {
        let started = Instant::now();
        let mut options = options;
        options.exclude.push(self.config.temp_dir.clone());
        options.exclude.push(self.config.output_dir.clone());

        let mut folders = walk(root, &options)?;
        let session = self.factory.open_session()?;
        let mut summary = RunSummary::default();

        loop {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                // Files in folders never reached are submitted and skipped.
                let unreached: usize = folders
                    .by_ref()
                    .filter_map(|folder| folder.ok())
                    .map(|folder| folder.files.len())
                    .sum();
                summary.submitted += unreached;
                summary.skipped += unreached;
                break;
            }
            let folder = match folders.next() {
                Some(Ok(folder)) => folder,
                Some(Err(e)) => {
                    warn!(error = %e, "skipping unreadable folder");
                    continue;
                }
                None => break,
            };
            info!(
                folder = %folder.dir.display(),
                files = folder.files.len(),
                "processing folder"
            );

            let tasks: Vec<UploadTask> = folder
                .files
                .into_iter()
                .map(|path| UploadTask::file(path, folder.name.clone()))
                .collect();
            self.run_scope(&session, &folder.name, &tasks, &mut summary)
                .await?;

            match self.temp.prune(&folder.name, MAX_TEMP_FILES) {
                Ok(0) => {}
                Ok(removed) => info!(folder = %folder.name, removed, "cleaned temp directory"),
                Err(e) => warn!(folder = %folder.name, error = %e, "failed to clean temp directory"),
            }
        }

        summary.cancelled |= self.cancel.is_cancelled();
        summary.elapsed = started.elapsed();
        summary.log();
        Ok(summary)
    }

    /// Fetches and re-uploads every URL listed in `list_file`, one per line.
    pub async fn run_url_list(&self, list_file: &Path) -> Result<RunSummary> {
        let started = Instant::now();
        let contents = tokio::fs::read_to_string(list_file)
            .await
            .map_err(|_| UploadError::SourceNotFound(list_file.to_path_buf()))?;

        let tasks: Vec<UploadTask> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|url| UploadTask::remote(url, URL_MODE_SCOPE))
            .collect();
        info!(file = %list_file.display(), urls = tasks.len(), "loaded url list");

        let mut summary = RunSummary::default();
        if !tasks.is_empty() {
            let session = self.factory.open_session()?;
            self.run_scope(&session, URL_MODE_SCOPE, &tasks, &mut summary)
                .await?;
        }

        summary.cancelled = self.cancel.is_cancelled();
        summary.elapsed = started.elapsed();
        summary.log();
        Ok(summary)
    }

    /// First pass, retry pass, final flush and error log for one scope.
    async fn run_scope(
        &self,
        session: &Arc<dyn Uploader>,
        scope: &str,
        tasks: &[UploadTask],
        summary: &mut RunSummary,
    ) -> Result<()> {
        let buffer = ResultBuffer::new(
            scope,
            self.config.flush_threshold,
            Arc::clone(&self.store),
        );

        let scheduler = BatchScheduler::new(
            Arc::clone(session),
            self.config.scheduler.clone(),
            self.cancel.clone(),
        )
        .with_progress(self.show_progress);
        let pass = scheduler.run(tasks, &buffer).await?;

        let coordinator = RetryCoordinator::new(
            Arc::clone(&self.factory),
            self.config.scheduler.retry_workers,
            self.config.scheduler.task_timeout,
            self.cancel.clone(),
        )
        .with_progress(self.show_progress);
        let retried = coordinator.retry(pass.failures, &buffer).await?;

        buffer.flush()?;
        let terminal: Vec<TaskSource> = retried
            .terminal
            .iter()
            .map(|failed| failed.task.source.clone())
            .collect();
        self.store.record_failures(&terminal)?;

        info!(
            scope,
            uploaded = pass.succeeded,
            recovered = retried.recovered,
            failed = terminal.len(),
            skipped = pass.skipped + retried.skipped,
            "scope complete"
        );

        summary.scopes += 1;
        summary.submitted += tasks.len();
        summary.uploaded += pass.succeeded;
        summary.recovered += retried.recovered;
        summary.terminal_failures += terminal.len();
        summary.skipped += pass.skipped + retried.skipped;
        Ok(())
    }
}
