//! Backup snapshots of service data
//!
//! A snapshot is a sibling directory named
//! `<source>.backup-YYYYmmdd-HHMMSS-mmm` in UTC. The timestamp format sorts
//! lexicographically in creation order, so pruning never has to stat the
//! snapshots.

use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

const BACKUP_MARKER: &str = ".backup-";
const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S-%3f";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSnapshot {
    pub source_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub files_copied: usize,
    /// False when at least one entry could not be copied
    pub complete: bool,
}

pub struct BackupManager {
    source_dir: PathBuf,
}

impl BackupManager {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
        }
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    fn prefix(&self) -> String {
        let name = self
            .source_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "data".to_string());
        format!("{}{}", name, BACKUP_MARKER)
    }

    fn parent(&self) -> PathBuf {
        self.source_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Copy the source directory into a new timestamped sibling.
    ///
    /// Best effort: copy errors are logged and leave `complete` false.
    pub fn snapshot(&self) -> BackupSnapshot {
        let created_at = Utc::now();
        let backup_dir = self.fresh_backup_dir(&created_at);
        let mut snapshot = BackupSnapshot {
            source_dir: self.source_dir.clone(),
            backup_dir: backup_dir.clone(),
            created_at,
            files_copied: 0,
            complete: true,
        };

        if !self.source_dir.is_dir() {
            warn!(source = %self.source_dir.display(), "nothing to back up, source directory missing");
            snapshot.complete = false;
            return snapshot;
        }

        if let Err(e) = fs::create_dir_all(&backup_dir) {
            warn!(dir = %backup_dir.display(), error = %e, "cannot create backup directory");
            snapshot.complete = false;
            return snapshot;
        }

        for entry in WalkDir::new(&self.source_dir).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry during backup");
                    snapshot.complete = false;
                    continue;
                }
            };
            let Ok(relative) = entry.path().strip_prefix(&self.source_dir) else {
                continue;
            };
            let target = backup_dir.join(relative);
            match copy_entry(entry.path(), &target, entry.file_type()) {
                Ok(true) => snapshot.files_copied += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "backup copy failed");
                    snapshot.complete = false;
                }
            }
        }

        info!(
            source = %self.source_dir.display(),
            backup = %backup_dir.display(),
            files = snapshot.files_copied,
            complete = snapshot.complete,
            "backup snapshot created"
        );
        snapshot
    }

    fn fresh_backup_dir(&self, created_at: &DateTime<Utc>) -> PathBuf {
        let base = format!("{}{}", self.prefix(), created_at.format(TIMESTAMP_FORMAT));
        let parent = self.parent();
        let mut candidate = parent.join(&base);
        let mut n = 1;
        while candidate.exists() {
            candidate = parent.join(format!("{}-{}", base, n));
            n += 1;
        }
        candidate
    }

    /// Existing snapshots, newest first
    pub fn snapshots(&self) -> Vec<PathBuf> {
        let prefix = self.prefix();
        let Ok(entries) = fs::read_dir(self.parent()) else {
            return Vec::new();
        };
        let mut found: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
            .map(|e| e.path())
            .collect();
        found.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
        found
    }

    /// Delete all but the newest `keep` snapshots; returns how many went
    pub fn prune(&self, keep: usize) -> usize {
        let mut removed = 0;
        for old in self.snapshots().into_iter().skip(keep) {
            match fs::remove_dir_all(&old) {
                Ok(()) => {
                    info!(backup = %old.display(), "pruned old backup");
                    removed += 1;
                }
                Err(e) => warn!(backup = %old.display(), error = %e, "failed to prune backup"),
            }
        }
        removed
    }
}

/// Returns whether a regular file or link was copied
fn copy_entry(source: &Path, target: &Path, file_type: fs::FileType) -> io::Result<bool> {
    if file_type.is_dir() {
        fs::create_dir_all(target)?;
        return Ok(false);
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    if file_type.is_symlink() {
        let link = fs::read_link(source)?;
        std::os::unix::fs::symlink(link, target)?;
    } else {
        fs::copy(source, target)?;
    }
    Ok(true)
}
