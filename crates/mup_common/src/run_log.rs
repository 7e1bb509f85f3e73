//! Per-run log files
//!
//! Each run writes `update-YYYYmmdd-HHMMSS.log` under `<state>/logs/`. The
//! newest file's modification time tells when the previous run happened.

use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

const LOG_PREFIX: &str = "update-";
const LOG_SUFFIX: &str = ".log";

/// Days without a run before the frequency warning
pub const STALE_AFTER_DAYS: i64 = 14;

pub struct RunLogDir {
    dir: PathBuf,
}

impl RunLogDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the log file for a run starting at `started_at`
    pub fn create_run_log(&self, started_at: DateTime<Local>) -> io::Result<(PathBuf, File)> {
        fs::create_dir_all(&self.dir)?;
        let stem = format!("{}{}", LOG_PREFIX, started_at.format("%Y%m%d-%H%M%S"));
        let mut path = self.dir.join(format!("{}{}", stem, LOG_SUFFIX));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{}-{}{}", stem, n, LOG_SUFFIX));
            n += 1;
        }
        let file = OpenOptions::new().create_new(true).append(true).open(&path)?;
        Ok((path, file))
    }

    /// Run logs, newest first
    pub fn logs(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut logs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .map(|n| {
                        let n = n.to_string_lossy();
                        n.starts_with(LOG_PREFIX) && n.ends_with(LOG_SUFFIX)
                    })
                    .unwrap_or(false)
            })
            .collect();
        logs.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
        logs
    }

    /// When the newest existing log was last written
    pub fn latest_run_at(&self) -> Option<DateTime<Local>> {
        let newest = self.logs().into_iter().next()?;
        let modified: SystemTime = fs::metadata(newest).ok()?.modified().ok()?;
        Some(DateTime::<Local>::from(modified))
    }

    /// Keep the newest `keep` logs; returns how many were removed
    pub fn prune(&self, keep: usize) -> usize {
        let mut removed = 0;
        for old in self.logs().into_iter().skip(keep) {
            match fs::remove_file(&old) {
                Ok(()) => removed += 1,
                Err(e) => warn!(log = %old.display(), error = %e, "failed to prune log"),
            }
        }
        if removed > 0 {
            info!(removed, kept = keep, "old run logs pruned");
        }
        removed
    }
}

/// Last `lines` lines of a text file
pub fn tail(path: &Path, lines: usize) -> io::Result<Vec<String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut window = VecDeque::with_capacity(lines);
    for line in reader.lines() {
        let line = line?;
        if window.len() == lines {
            window.pop_front();
        }
        if lines > 0 {
            window.push_back(line);
        }
    }
    Ok(window.into_iter().collect())
}

/// Whole days since `last` when that exceeds [`STALE_AFTER_DAYS`]
pub fn staleness_days(last: DateTime<Local>, now: DateTime<Local>) -> Option<i64> {
    let days = (now - last).num_days();
    (days > STALE_AFTER_DAYS).then_some(days)
}
