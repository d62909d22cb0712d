use crate::domain::{FitError, FitResult};
use chrono::{Local, NaiveDateTime};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

pub const RUN_LOG_FILE_NAME: &str = "log.txt";

/// Start time and wall-clock duration of one run, appended to `log.txt`.
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    started_at: NaiveDateTime,
    started: Instant,
}

impl RunLog {
    pub fn start(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            started_at: Local::now().naive_local(),
            started: Instant::now(),
        }
    }

    pub fn finish(self) -> FitResult<Duration> {
        let elapsed = self.started.elapsed();
        let entry = format!(
            "{}\n{}\n",
            start_line(&self.started_at),
            elapsed_line(elapsed.as_secs())
        );

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(entry.as_bytes()))
            .map_err(|source| {
                FitError::io_system(
                    "IO.RUN_LOG",
                    format!(
                        "failed to append run log '{}': {}",
                        self.path.display(),
                        source
                    ),
                )
            })?;
        Ok(elapsed)
    }
}

pub fn start_line(started_at: &NaiveDateTime) -> String {
    format!("Run started at: {}.", started_at.format("%Y %m %d, %H:%M:%S"))
}

pub fn elapsed_line(seconds: u64) -> String {
    format!(
        "Time spent: {} h {} m {} s ({} s).",
        seconds / 3600,
        (seconds / 60) % 60,
        seconds % 60,
        seconds
    )
}
