//! Scoped ownership of a job's temporary files.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{build_path, FileType};

/// Input and output scratch paths for one job. Both files are removed when
/// the guard is dropped, whichever way the job ends.
#[derive(Debug)]
pub struct JobArtifacts {
    job_id: Uuid,
    input: PathBuf,
    output: PathBuf,
}

impl JobArtifacts {
    pub fn acquire(work_dir: &Path, job_id: Uuid) -> Self {
        Self {
            job_id,
            input: build_path(work_dir, job_id, FileType::Input),
            output: build_path(work_dir, job_id, FileType::Output),
        }
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Move the output out of the scratch directory so it survives release.
    pub async fn persist_output(&self, dest: &Path) -> io::Result<PathBuf> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if tokio::fs::rename(&self.output, dest).await.is_err() {
            // rename fails across filesystems
            if let Err(err) = tokio::fs::copy(&self.output, dest).await {
                let _ = tokio::fs::remove_file(dest).await;
                return Err(err);
            }
        }

        Ok(dest.to_path_buf())
    }
}

fn remove_artifact(job_id: Uuid, path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("[{}] cleanup: removed {}", job_id, path.display()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(
            "[{}] cleanup: could not remove {}: {}",
            job_id,
            path.display(),
            err
        ),
    }
}

impl Drop for JobArtifacts {
    fn drop(&mut self) {
        remove_artifact(self.job_id, &self.input);
        remove_artifact(self.job_id, &self.output);
    }
}
