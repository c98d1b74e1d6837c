use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("IO failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to spawn process: {0}")]
    ProcessSpawn(#[source] std::io::Error),

    #[error("process exceeded its deadline of {}s", .0.as_secs_f64())]
    ProcessTimeout(Duration),

    #[error("process exited with {}", exit_code_label(.0))]
    ProcessNonZeroExit(Option<i32>),

    #[error("process produced no output at {}", .0.display())]
    MissingOutputArtifact(PathBuf),

    #[error("batch {0} not found")]
    NotFound(Uuid),

    #[error("download failed: {0}")]
    Download(String),
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_owned(),
    }
}

/// Stable, serializable classification of an [`Error`], stored on job records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    InvalidInput,
    IoFailure,
    ProcessSpawnFailure,
    ProcessTimeout,
    ProcessNonZeroExit,
    MissingOutputArtifact,
    NotFound,
    DownloadFailure,
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Io(_) => ErrorKind::IoFailure,
            Error::ProcessSpawn(_) => ErrorKind::ProcessSpawnFailure,
            Error::ProcessTimeout(_) => ErrorKind::ProcessTimeout,
            Error::ProcessNonZeroExit(_) => ErrorKind::ProcessNonZeroExit,
            Error::MissingOutputArtifact(_) => ErrorKind::MissingOutputArtifact,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Download(_) => ErrorKind::DownloadFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        assert_eq!(Error::invalid("x").kind(), ErrorKind::InvalidInput);
        assert_eq!(
            Error::ProcessTimeout(Duration::from_secs(5)).kind(),
            ErrorKind::ProcessTimeout
        );
        assert_eq!(Error::NotFound(Uuid::nil()).kind(), ErrorKind::NotFound);
    }

    #[test]
    fn exit_code_message() {
        assert_eq!(
            Error::ProcessNonZeroExit(Some(3)).to_string(),
            "process exited with exit code 3"
        );
        assert!(Error::ProcessNonZeroExit(None)
            .to_string()
            .contains("terminated by signal"));
    }
}
