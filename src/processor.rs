use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::cleanup::JobArtifacts;
use crate::command::Supervisor;
use crate::error::{Error, Result};
use crate::filters;
use crate::models::{Job, JobOutcome};
use crate::tracker::BatchTracker;

/// Executes single jobs: materialize the input, build the filter chain,
/// supervise ffmpeg, keep the output on success, always clean up.
pub struct JobRunner {
    work_dir: PathBuf,
    output_dir: PathBuf,
    supervisor: Supervisor,
    tracker: Arc<BatchTracker>,
}

impl JobRunner {
    pub fn new(
        work_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        supervisor: Supervisor,
        tracker: Arc<BatchTracker>,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            output_dir: output_dir.into(),
            supervisor,
            tracker,
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn tracker(&self) -> &Arc<BatchTracker> {
        &self.tracker
    }

    /// Run `job` to a terminal state and record it exactly once.
    pub async fn run(self: Arc<Self>, job: Job) {
        let (id, batch_id, index) = (job.id, job.batch_id, job.index);

        if let Err(err) = self.tracker.mark_running(batch_id, index) {
            warn!("[{}] processor: could not mark running: {}", id, err);
        }
        info!(
            "[{}] processor: starting job {} of batch {} ({})",
            id,
            index,
            batch_id,
            job.source.name.as_deref().unwrap_or("unnamed")
        );

        // The body runs in its own task so that a panic unwinds (and drops
        // the artifact guard) before the failure is recorded here.
        let runner = self.clone();
        let outcome = match tokio::spawn(async move { runner.transcode(job).await }).await {
            Ok(Ok(output)) => {
                info!("[{}] processor: complete", id);
                JobOutcome::Succeeded { output }
            }
            Ok(Err(err)) => {
                warn!("[{}] processor: ended with error: {}", id, err);
                JobOutcome::Failed(err)
            }
            Err(join_err) => {
                error!("[{}] processor: job task aborted: {}", id, join_err);
                JobOutcome::Failed(Error::Io(std::io::Error::other(format!(
                    "job task aborted: {join_err}"
                ))))
            }
        };

        if let Err(err) = self.tracker.finish(batch_id, index, outcome) {
            error!("[{}] processor: could not record outcome: {}", id, err);
        }
    }

    async fn transcode(&self, job: Job) -> Result<PathBuf> {
        let artifacts = JobArtifacts::acquire(&self.work_dir, job.id);

        tokio::fs::write(artifacts.input(), &job.source.data).await?;

        let spec = filters::build(&job.options)?;
        debug!("[{}] processor: stages {:?}", job.id, spec.stages());
        let args = spec.to_args(artifacts.input(), artifacts.output());
        let label = job.id.to_string();

        let report = self
            .supervisor
            .run(&label, &args, artifacts.output(), job.deadline)
            .await?;
        if let Some(progress) = &report.last_progress {
            info!("[{}] processor: encoded up to {}", job.id, progress);
        }

        let dest = self
            .output_dir
            .join(job.batch_id.to_string())
            .join(format!("{}_{}.mp4", job.index, job.id));
        let handle = artifacts.persist_output(&dest).await?;

        // artifacts dropped here: scratch files are gone before the caller records the outcome
        Ok(handle)
    }
}
