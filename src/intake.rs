use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use crate::config::MAX_BATCH_FILES;
use crate::error::{Error, Result};
use crate::models::{BatchState, BatchStatus, Job, MediaFile, ProcessingOptions};
use crate::pool::WorkerPool;
use crate::processor::JobRunner;

/// Returned by [`BatchIntake::submit`] before any job has run.
#[derive(Debug)]
pub struct BatchHandle {
    pub batch_id: Uuid,
    pub total_files: usize,
    updates: watch::Receiver<BatchStatus>,
}

impl BatchHandle {
    /// Resolve once every job of the batch reached a terminal state. The pool
    /// slot of the last job may still be held for a moment afterwards.
    pub async fn completed(mut self) -> BatchStatus {
        if let Ok(status) = self
            .updates
            .wait_for(|status| status.status == BatchState::Completed)
            .await
        {
            return status.clone();
        }

        // tracker dropped; report whatever was last published
        let latest = self.updates.borrow().clone();
        latest
    }
}

pub struct BatchIntake {
    pool: Arc<WorkerPool>,
    runner: Arc<JobRunner>,
    max_files: usize,
    default_deadline: Duration,
}

impl BatchIntake {
    pub fn new(pool: Arc<WorkerPool>, runner: Arc<JobRunner>, default_deadline: Duration) -> Self {
        Self {
            pool,
            runner,
            max_files: MAX_BATCH_FILES,
            default_deadline,
        }
    }

    /// Lower the per-batch file limit; it can never exceed [`MAX_BATCH_FILES`].
    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files.clamp(1, MAX_BATCH_FILES);
        self
    }

    pub fn max_files(&self) -> usize {
        self.max_files
    }

    /// Validate and register a batch, then queue one job per file. Returns
    /// without waiting for any job.
    pub async fn submit(
        &self,
        files: Vec<MediaFile>,
        options: ProcessingOptions,
        deadline: Option<Duration>,
    ) -> Result<BatchHandle> {
        if files.is_empty() {
            return Err(Error::invalid("a batch needs at least one file"));
        }
        if files.len() > self.max_files {
            return Err(Error::invalid(format!(
                "a batch holds at most {} files, got {}",
                self.max_files,
                files.len()
            )));
        }
        if deadline == Some(Duration::ZERO) {
            return Err(Error::invalid("job timeout must be positive"));
        }

        options.validate()?;

        tokio::fs::create_dir_all(self.runner.work_dir()).await?;
        tokio::fs::create_dir_all(self.runner.output_dir()).await?;

        let batch_id = Uuid::new_v4();
        let total_files = files.len();
        let deadline = deadline.unwrap_or(self.default_deadline);
        let options = Arc::new(options);

        let jobs: Vec<Job> = files
            .into_iter()
            .enumerate()
            .map(|(index, source)| Job {
                id: Uuid::new_v4(),
                batch_id,
                index,
                source,
                options: options.clone(),
                deadline,
            })
            .collect();
        let job_ids: Vec<Uuid> = jobs.iter().map(|job| job.id).collect();

        let tracker = self.runner.tracker();
        tracker.create(batch_id, &job_ids);
        let updates = tracker.subscribe(batch_id)?;

        info!(
            "batch {}: queueing {} jobs on {} slots (deadline {}s)",
            batch_id,
            total_files,
            self.pool.capacity(),
            deadline.as_secs_f64()
        );
        for job in jobs {
            // the returned handle is not needed; completion flows through the tracker
            let _ = self.pool.submit(self.runner.clone().run(job));
        }

        Ok(BatchHandle {
            batch_id,
            total_files,
            updates,
        })
    }
}
