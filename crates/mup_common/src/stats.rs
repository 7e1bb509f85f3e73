//! Run statistics
//!
//! One JSON record at `<state>/stats.json`, rewritten after every non-dry
//! run. Only the average duration is read back, as the estimate shown
//! before the next run.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunStats {
    pub total_updates: u64,
    pub successful_updates: u64,
    pub failed_updates: u64,
    /// Seconds
    pub avg_duration: f64,
    pub last_update: Option<DateTime<Local>>,
    /// Seconds
    pub last_duration: f64,
}

impl RunStats {
    /// Fold one run into the record
    pub fn record(&mut self, success: bool, duration: Duration, finished_at: DateTime<Local>) {
        let seconds = duration.as_secs_f64();
        let previous = self.total_updates as f64;
        self.total_updates += 1;
        if success {
            self.successful_updates += 1;
        } else {
            self.failed_updates += 1;
        }
        self.avg_duration = (self.avg_duration * previous + seconds) / self.total_updates as f64;
        self.last_duration = seconds;
        self.last_update = Some(finished_at);
    }

    /// Success rate in percent, `None` before the first run
    pub fn success_rate(&self) -> Option<f64> {
        (self.total_updates > 0)
            .then(|| self.successful_updates as f64 * 100.0 / self.total_updates as f64)
    }

    /// Average run time, once there is one
    pub fn estimated_duration(&self) -> Option<Duration> {
        (self.total_updates > 0 && self.avg_duration.is_finite() && self.avg_duration > 0.0)
            .then(|| Duration::from_secs_f64(self.avg_duration))
    }
}

pub struct StatsStore {
    path: PathBuf,
}

impl StatsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored record, or an empty one when missing or unreadable
    pub fn load(&self) -> RunStats {
        match fs::read_to_string(&self.path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(stats) => stats,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "statistics file unreadable, starting over");
                    RunStats::default()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => RunStats::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot read statistics");
                RunStats::default()
            }
        }
    }

    /// Write to a temporary sibling, then rename over the record
    pub fn save(&self, stats: &RunStats) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(stats)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "statistics saved");
        Ok(())
    }

    /// Load, fold in one run, save
    pub fn record(&self, success: bool, duration: Duration) -> io::Result<RunStats> {
        let mut stats = self.load();
        stats.record(success, duration, Local::now());
        self.save(&stats)?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_running_average() {
        let mut stats = RunStats::default();
        let now = Local::now();
        stats.record(true, Duration::from_secs(60), now);
        stats.record(false, Duration::from_secs(120), now);
        assert_eq!(stats.total_updates, 2);
        assert_eq!(stats.successful_updates, 1);
        assert_eq!(stats.failed_updates, 1);
        assert!((stats.avg_duration - 90.0).abs() < 1e-9);
        assert!((stats.last_duration - 120.0).abs() < 1e-9);
        assert_eq!(stats.success_rate(), Some(50.0));
    }

    #[test]
    fn test_store_round_trip_and_missing_file() {
        let temp = TempDir::new().unwrap();
        let store = StatsStore::new(temp.path().join("state/stats.json"));
        assert_eq!(store.load(), RunStats::default());
        assert_eq!(store.load().estimated_duration(), None);

        store.record(true, Duration::from_secs(30)).unwrap();
        let loaded = store.load();
        assert_eq!(loaded.total_updates, 1);
        assert_eq!(loaded.estimated_duration(), Some(Duration::from_secs(30)));
        assert!(!temp.path().join("state/stats.json.tmp").exists());
    }

    #[test]
    fn test_partial_record_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("stats.json");
        fs::write(&path, r#"{"total_updates": 4, "successful_updates": 4}"#).unwrap();
        let stats = StatsStore::new(&path).load();
        assert_eq!(stats.total_updates, 4);
        assert_eq!(stats.failed_updates, 0);
        assert!(stats.last_update.is_none());
    }
}
