use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use futures::StreamExt;
use regex::Regex;
use tokio::process::{ChildStderr, Command};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// How long the drain task may keep reading after the process exited.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

const MAX_LINE_LENGTH: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub elapsed: Duration,
    pub diagnostic_lines: usize,
    pub last_progress: Option<String>,
}

#[derive(Debug, Default)]
struct DrainStats {
    lines: usize,
    last_progress: Option<String>,
}

fn progress_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|\s)(?:out_)?time=(\d+:\d\d:\d\d(?:\.\d+)?)").expect("valid regex")
    })
}

impl DrainStats {
    fn observe(&mut self, label: &str, line: &str) {
        self.lines += 1;

        if let Some(cap) = progress_re().captures(line) {
            self.last_progress = Some(cap[1].to_owned());
        }

        if line.to_lowercase().contains("error") {
            warn!("[{}] stderr: {}", label, line);
        } else {
            debug!("[{}] stderr: {}", label, line);
        }
    }
}

async fn drain_diagnostics(
    label: String,
    stderr: ChildStderr,
    cancel: CancellationToken,
) -> DrainStats {
    let mut lines = FramedRead::new(stderr, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let mut stats = DrainStats::default();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = lines.next() => match next {
                Some(Ok(line)) => stats.observe(&label, &line),
                // the codec skips ahead to the next newline on its own
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => continue,
                Some(Err(LinesCodecError::Io(err))) => {
                    debug!("[{}] stderr closed with error: {}", label, err);
                    break;
                }
                None => break,
            },
        }
    }

    stats
}

/// Runs one external process per call: spawn, drain stderr, enforce a
/// deadline, verify the output artifact.
#[derive(Debug, Clone)]
pub struct Supervisor {
    program: PathBuf,
}

impl Supervisor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub async fn run(
        &self,
        label: &str,
        args: &[OsString],
        output: &Path,
        deadline: Duration,
    ) -> Result<ProcessReport> {
        let start = Instant::now();

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(Error::ProcessSpawn)?;

        debug!(
            "[{}] spawned {} (pid {:?})",
            label,
            self.program.display(),
            child.id()
        );

        let cancel = CancellationToken::new();
        let drain = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(drain_diagnostics(label.to_owned(), stderr, cancel.clone())));

        let status = match tokio::time::timeout(deadline, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(err)) => {
                cancel.cancel();
                finish_drain(drain, Duration::ZERO, &cancel).await;
                return Err(Error::Io(err));
            }
            Err(_) => {
                warn!(
                    "[{}] deadline of {:.1}s expired, killing process",
                    label,
                    deadline.as_secs_f64()
                );
                // kill() also reaps the child
                if let Err(err) = child.kill().await {
                    warn!("[{}] failed to kill process: {}", label, err);
                }
                cancel.cancel();
                finish_drain(drain, Duration::ZERO, &cancel).await;
                return Err(Error::ProcessTimeout(deadline));
            }
        };

        let stats = finish_drain(drain, DRAIN_GRACE, &cancel).await;
        let elapsed = start.elapsed();

        if !status.success() {
            warn!("[{}] process exited with status {}", label, status);
            return Err(Error::ProcessNonZeroExit(status.code()));
        }

        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {}
            _ => return Err(Error::MissingOutputArtifact(output.to_path_buf())),
        }

        info!(
            "[{}] process finished in {:.2}s ({} diagnostic lines)",
            label,
            elapsed.as_secs_f64(),
            stats.lines
        );

        Ok(ProcessReport {
            elapsed,
            diagnostic_lines: stats.lines,
            last_progress: stats.last_progress,
        })
    }
}

/// Wait up to `grace` for the drain task, then cancel it and collect what
/// it saw.
async fn finish_drain(
    drain: Option<JoinHandle<DrainStats>>,
    grace: Duration,
    cancel: &CancellationToken,
) -> DrainStats {
    let Some(mut handle) = drain else {
        return DrainStats::default();
    };

    if let Ok(joined) = tokio::time::timeout(grace, &mut handle).await {
        return joined.unwrap_or_default();
    }

    cancel.cancel();
    handle.await.unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str, output: &Path) -> Vec<OsString> {
        vec![
            "-c".into(),
            script.into(),
            "sh".into(),
            output.as_os_str().to_owned(),
        ]
    }

    #[tokio::test]
    async fn success_requires_zero_exit_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mp4");
        let supervisor = Supervisor::new("sh");

        let report = supervisor
            .run(
                "ok",
                &sh("echo 'out_time=00:00:04.500000' >&2; printf data > \"$1\"", &output),
                &output,
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        assert_eq!(report.diagnostic_lines, 1);
        assert_eq!(report.last_progress.as_deref(), Some("00:00:04.500000"));
    }

    #[tokio::test]
    async fn non_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mp4");

        let result = Supervisor::new("sh")
            .run(
                "fail",
                &sh("printf data > \"$1\"; exit 3", &output),
                &output,
                Duration::from_secs(10),
            )
            .await;

        assert!(matches!(result, Err(Error::ProcessNonZeroExit(Some(3)))));
    }

    #[tokio::test]
    async fn missing_or_empty_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mp4");
        let supervisor = Supervisor::new("sh");

        let result = supervisor
            .run("missing", &sh("exit 0", &output), &output, Duration::from_secs(10))
            .await;
        assert!(matches!(result, Err(Error::MissingOutputArtifact(_))));

        let result = supervisor
            .run("empty", &sh(": > \"$1\"", &output), &output, Duration::from_secs(10))
            .await;
        assert!(matches!(result, Err(Error::MissingOutputArtifact(_))));
    }

    #[tokio::test]
    async fn spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mp4");

        let result = Supervisor::new(dir.path().join("no-such-binary"))
            .run("spawn", &[], &output, Duration::from_secs(1))
            .await;

        assert!(matches!(result, Err(Error::ProcessSpawn(_))));
    }

    #[tokio::test]
    async fn deadline_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mp4");
        let pid_file = dir.path().join("pid");
        let script = format!("echo $$ > '{}'; exec sleep 30", pid_file.display());

        let start = Instant::now();
        let result = Supervisor::new("sh")
            .run("hang", &sh(&script, &output), &output, Duration::from_millis(500))
            .await;
        let elapsed = start.elapsed();

        assert!(matches!(result, Err(Error::ProcessTimeout(_))));
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let alive = std::process::Command::new("kill")
            .args(["-0", pid.trim()])
            .stderr(Stdio::null())
            .status()
            .unwrap();
        assert!(!alive.success(), "process {} still running", pid.trim());
    }

    #[tokio::test]
    async fn heavy_stderr_does_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mp4");

        let report = Supervisor::new("sh")
            .run(
                "chatty",
                &sh("yes diagnostic | head -n 200000 >&2; printf data > \"$1\"", &output),
                &output,
                Duration::from_secs(20),
            )
            .await
            .unwrap();

        assert!(report.diagnostic_lines > 100_000);
    }
}
