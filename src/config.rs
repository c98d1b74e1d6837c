use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Hard ceiling for the number of files accepted in one batch.
pub const MAX_BATCH_FILES: usize = 100;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Shared scratch directory for per-job input and output artifacts.
    pub work_dir: PathBuf,
    /// Where outputs of succeeded jobs are kept for retrieval.
    pub output_dir: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub workers: usize,
    pub job_timeout: Duration,
    pub max_batch_files: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3600,
            work_dir: PathBuf::from("work"),
            output_dir: PathBuf::from("processed"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            workers: 4,
            job_timeout: Duration::from_secs(300),
            max_batch_files: MAX_BATCH_FILES,
        }
    }
}

impl Config {
    /// Build a configuration from the process environment, falling back to
    /// the defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            port: parse_var("PORT").unwrap_or(defaults.port),
            work_dir: env::var_os("FFBATCH_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            output_dir: env::var_os("FFBATCH_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            ffmpeg_path: env::var_os("FFBATCH_FFMPEG")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_path),
            workers: parse_var::<usize>("FFBATCH_WORKERS")
                .filter(|&n| n > 0)
                .unwrap_or(defaults.workers),
            job_timeout: parse_var::<u64>("FFBATCH_JOB_TIMEOUT_SECS")
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.job_timeout),
            max_batch_files: parse_var::<usize>("FFBATCH_MAX_BATCH_FILES")
                .map(|n| n.clamp(1, MAX_BATCH_FILES))
                .unwrap_or(defaults.max_batch_files),
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    let value = env::var(name).ok()?;
    match value.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("ignoring {name}={value:?}: not a valid value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.job_timeout, Duration::from_secs(300));
        assert_eq!(config.max_batch_files, 100);
    }

    #[test]
    fn unparsable_values_are_ignored() {
        env::set_var("FFBATCH_TEST_NOT_A_NUMBER", "four");
        assert_eq!(parse_var::<usize>("FFBATCH_TEST_NOT_A_NUMBER"), None);
        env::set_var("FFBATCH_TEST_NUMBER", " 8 ");
        assert_eq!(parse_var::<usize>("FFBATCH_TEST_NUMBER"), Some(8));
    }
}
