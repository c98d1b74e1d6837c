use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{BatchState, BatchStatus, JobOutcome, JobState, JobStatus};

struct BatchRecord {
    created_at: DateTime<Utc>,
    succeeded: usize,
    failed: usize,
    jobs: Vec<JobStatus>,
}

impl BatchRecord {
    fn snapshot(&self, batch_id: Uuid) -> BatchStatus {
        let total_files = self.jobs.len();
        let processed = self.succeeded + self.failed;
        let remaining = total_files - processed;

        BatchStatus {
            batch_id,
            total_files,
            processed,
            succeeded: self.succeeded,
            failed: self.failed,
            remaining,
            status: if remaining == 0 {
                BatchState::Completed
            } else {
                BatchState::Processing
            },
            created_at: self.created_at,
        }
    }
}

struct BatchEntry {
    record: Mutex<BatchRecord>,
    updates: watch::Sender<BatchStatus>,
}

impl BatchEntry {
    fn publish(&self, status: BatchStatus) {
        self.updates.send_replace(status);
    }
}

/// Per-batch aggregate of job outcomes. Every read returns a snapshot taken
/// under the batch lock, so `processed == succeeded + failed` always holds.
#[derive(Default)]
pub struct BatchTracker {
    batches: RwLock<HashMap<Uuid, Arc<BatchEntry>>>,
}

impl BatchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a batch whose jobs are identified (in index order) by
    /// `job_ids`.
    pub fn create(&self, batch_id: Uuid, job_ids: &[Uuid]) {
        let record = BatchRecord {
            created_at: Utc::now(),
            succeeded: 0,
            failed: 0,
            jobs: job_ids
                .iter()
                .enumerate()
                .map(|(index, &id)| JobStatus::pending(id, index))
                .collect(),
        };
        let (updates, _) = watch::channel(record.snapshot(batch_id));

        let entry = Arc::new(BatchEntry {
            record: Mutex::new(record),
            updates,
        });
        self.batches.write().insert(batch_id, entry);
    }

    fn entry(&self, batch_id: Uuid) -> Result<Arc<BatchEntry>> {
        self.batches
            .read()
            .get(&batch_id)
            .cloned()
            .ok_or(Error::NotFound(batch_id))
    }

    pub fn mark_running(&self, batch_id: Uuid, index: usize) -> Result<()> {
        let entry = self.entry(batch_id)?;
        let mut record = entry.record.lock();

        let Some(job) = record.jobs.get_mut(index) else {
            return Err(Error::invalid(format!("batch {batch_id} has no job {index}")));
        };

        if !job.state.can_transition_to(JobState::Running) {
            warn!("[{}] tracker: ignoring Running after {:?}", job.id, job.state);
            return Ok(());
        }

        job.state = JobState::Running;
        job.started_at = Some(Utc::now());
        Ok(())
    }

    /// Apply a job's terminal transition. Returns `false` (and changes
    /// nothing) if the job had already reached a terminal state.
    pub fn finish(&self, batch_id: Uuid, index: usize, outcome: JobOutcome) -> Result<bool> {
        let entry = self.entry(batch_id)?;
        let mut record = entry.record.lock();

        let Some(job) = record.jobs.get_mut(index) else {
            return Err(Error::invalid(format!("batch {batch_id} has no job {index}")));
        };

        let next = outcome.state();
        if !job.state.can_transition_to(next) {
            warn!(
                "[{}] tracker: ignoring {:?} after {:?}",
                job.id, next, job.state
            );
            return Ok(false);
        }

        job.state = next;
        job.ended_at = Some(Utc::now());
        match outcome {
            JobOutcome::Succeeded { output } => {
                job.output = Some(output);
                record.succeeded += 1;
            }
            JobOutcome::Failed(err) => {
                job.error_kind = Some(err.kind());
                job.error_message = Some(err.to_string());
                record.failed += 1;
            }
        }

        let status = record.snapshot(batch_id);
        if status.status == BatchState::Completed {
            info!(
                "batch {} completed: {} succeeded, {} failed",
                batch_id, status.succeeded, status.failed
            );
        }
        entry.publish(status);

        Ok(true)
    }

    pub fn status(&self, batch_id: Uuid) -> Result<BatchStatus> {
        let entry = self.entry(batch_id)?;
        let record = entry.record.lock();
        Ok(record.snapshot(batch_id))
    }

    pub fn jobs(&self, batch_id: Uuid) -> Result<Vec<JobStatus>> {
        let entry = self.entry(batch_id)?;
        let record = entry.record.lock();
        Ok(record.jobs.clone())
    }

    pub fn subscribe(&self, batch_id: Uuid) -> Result<watch::Receiver<BatchStatus>> {
        Ok(self.entry(batch_id)?.updates.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn batch(tracker: &BatchTracker, size: usize) -> Uuid {
        let batch_id = Uuid::new_v4();
        let ids: Vec<Uuid> = (0..size).map(|_| Uuid::new_v4()).collect();
        tracker.create(batch_id, &ids);
        batch_id
    }

    fn ok() -> JobOutcome {
        JobOutcome::Succeeded {
            output: PathBuf::from("out.mp4"),
        }
    }

    #[test]
    fn counters_stay_consistent() {
        let tracker = BatchTracker::new();
        let id = batch(&tracker, 3);

        let status = tracker.status(id).unwrap();
        assert_eq!((status.processed, status.remaining), (0, 3));
        assert_eq!(status.status, BatchState::Processing);

        let outcomes = [
            ok(),
            JobOutcome::Failed(Error::ProcessNonZeroExit(Some(1))),
            JobOutcome::Failed(Error::ProcessTimeout(Duration::from_secs(5))),
        ];
        let mut last_remaining = 3;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            tracker.mark_running(id, index).unwrap();
            assert!(tracker.finish(id, index, outcome).unwrap());

            let status = tracker.status(id).unwrap();
            assert_eq!(status.processed, status.succeeded + status.failed);
            assert!(status.remaining < last_remaining);
            last_remaining = status.remaining;
        }

        let status = tracker.status(id).unwrap();
        assert_eq!(status.remaining, 0);
        assert_eq!((status.succeeded, status.failed), (1, 2));
        assert_eq!(status.status, BatchState::Completed);

        let jobs = tracker.jobs(id).unwrap();
        assert_eq!(jobs[0].state, JobState::Succeeded);
        assert_eq!(jobs[1].state, JobState::Failed);
        assert_eq!(jobs[2].state, JobState::TimedOut);
        assert!(jobs.iter().all(|job| job.ended_at.is_some()));
    }

    #[test]
    fn second_finish_is_ignored() {
        let tracker = BatchTracker::new();
        let id = batch(&tracker, 2);

        tracker.mark_running(id, 0).unwrap();
        assert!(tracker.finish(id, 0, ok()).unwrap());
        assert!(!tracker
            .finish(id, 0, JobOutcome::Failed(Error::ProcessNonZeroExit(None)))
            .unwrap());

        let status = tracker.status(id).unwrap();
        assert_eq!((status.succeeded, status.failed, status.remaining), (1, 0, 1));
    }

    #[test]
    fn unknown_batch_is_not_found() {
        let tracker = BatchTracker::new();
        let missing = Uuid::new_v4();
        assert!(matches!(tracker.status(missing), Err(Error::NotFound(id)) if id == missing));
        assert!(matches!(tracker.jobs(missing), Err(Error::NotFound(_))));
    }

    #[test]
    fn all_failed_is_still_completed() {
        let tracker = BatchTracker::new();
        let id = batch(&tracker, 1);
        tracker
            .finish(id, 0, JobOutcome::Failed(Error::ProcessSpawn(std::io::ErrorKind::NotFound.into())))
            .unwrap();

        let status = tracker.status(id).unwrap();
        assert_eq!(status.status, BatchState::Completed);
        assert_eq!(status.failed, 1);
    }

    #[tokio::test]
    async fn subscribers_see_completion() {
        let tracker = Arc::new(BatchTracker::new());
        let id = batch(&tracker, 2);
        let mut rx = tracker.subscribe(id).unwrap();

        let worker = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                for index in 0..2 {
                    tracker.mark_running(id, index).unwrap();
                    tracker.finish(id, index, ok()).unwrap();
                }
            })
        };

        let done = rx
            .wait_for(|status| status.status == BatchState::Completed)
            .await
            .unwrap()
            .clone();
        worker.await.unwrap();

        assert_eq!(done.succeeded, 2);
        assert_eq!(done.remaining, 0);
    }
}
