use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, ErrorKind, Result};

/// One media blob handed to intake by the upload collaborator.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub name: Option<String>,
    pub data: Bytes,
}

impl MediaFile {
    pub fn named(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: Some(name.into()),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessingOptions {
    /// Fraction of full scale; converted to `threshold * 60` dB below 0 dBFS.
    pub silence_threshold: f64,
    /// Minimum output segment duration in whole seconds.
    pub min_duration: i64,
    pub remove_silence: bool,
    pub remove_static: bool,
    pub auto_pacing: bool,
    pub auto_crop: bool,
    pub stabilize: bool,
    pub color_correct: bool,
    pub auto_volume: bool,
    pub face_focus: bool,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            silence_threshold: 0.5,
            min_duration: 0,
            remove_silence: false,
            remove_static: false,
            auto_pacing: false,
            auto_crop: false,
            stabilize: false,
            color_correct: false,
            auto_volume: false,
            face_focus: false,
        }
    }
}

impl ProcessingOptions {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.silence_threshold) {
            return Err(Error::invalid(format!(
                "silenceThreshold must be within [0, 1], got {}",
                self.silence_threshold
            )));
        }

        if self.min_duration < 0 {
            return Err(Error::invalid(format!(
                "minDuration must not be negative, got {}",
                self.min_duration
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::TimedOut)
    }

    /// States only move forward: Pending -> Running -> terminal.
    pub fn can_transition_to(self, next: JobState) -> bool {
        match self {
            JobState::Pending => next != JobState::Pending,
            JobState::Running => next.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Processing,
    Completed,
}

/// Consistent snapshot of one batch's aggregate counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatus {
    pub batch_id: Uuid,
    pub total_files: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub remaining: usize,
    pub status: BatchState,
    pub created_at: DateTime<Utc>,
}

/// Status record of one job, retained after its artifacts are gone.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub id: Uuid,
    pub index: usize,
    pub state: JobState,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub output: Option<PathBuf>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
}

impl JobStatus {
    pub fn pending(id: Uuid, index: usize) -> Self {
        Self {
            id,
            index,
            state: JobState::Pending,
            started_at: None,
            ended_at: None,
            output: None,
            error_kind: None,
            error_message: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub index: usize,
    pub source: MediaFile,
    pub options: Arc<ProcessingOptions>,
    pub deadline: std::time::Duration,
}

/// How a job ended, as reported to the tracker.
#[derive(Debug)]
pub enum JobOutcome {
    Succeeded { output: PathBuf },
    Failed(Error),
}

impl JobOutcome {
    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Succeeded { .. } => JobState::Succeeded,
            JobOutcome::Failed(Error::ProcessTimeout(_)) => JobState::TimedOut,
            JobOutcome::Failed(_) => JobState::Failed,
        }
    }
}

pub enum FileType {
    Input,
    Output,
}

pub fn build_path(dir: &Path, id: Uuid, file_type: FileType) -> PathBuf {
    match file_type {
        FileType::Input => dir.join(format!("{id}.src")),
        FileType::Output => dir.join(format!("{id}.mp4")),
    }
}
