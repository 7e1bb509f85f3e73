//! Run-wide lock
//!
//! Ensures only one run is active at a time using:
//! - a lock file holding PID, start time and hostname
//! - create-exclusive acquisition (complete file hard-linked into place)
//! - dead-holder detection and one reclaim attempt
//! - release on drop

use chrono::{DateTime, Local};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{debug, info, warn};

/// Lock file contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub created_at: DateTime<Local>,
    pub hostname: String,
}

impl LockInfo {
    fn current() -> Self {
        Self {
            pid: process::id(),
            created_at: Local::now(),
            hostname: sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string()),
        }
    }

    /// Holder still running. EPERM means the process exists under another
    /// user.
    pub fn is_alive(&self) -> bool {
        let Ok(raw) = i32::try_from(self.pid) else {
            return false;
        };
        if raw <= 0 {
            return false;
        }
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("another update run is active (PID {pid}, started {since})")]
    AlreadyRunning { pid: u32, since: DateTime<Local> },

    #[error("lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LockError {
    fn io(path: &Path, source: io::Error) -> Self {
        LockError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub struct LockManager {
    path: PathBuf,
}

impl LockManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current holder, if the lock file exists and parses
    pub fn holder(&self) -> Option<LockInfo> {
        read_info(&self.path)
    }

    /// Take the lock. A lock left by a dead process is removed and
    /// acquisition is retried once.
    pub fn acquire(&self) -> Result<LockHandle, LockError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| LockError::io(parent, e))?;
        }

        let info = LockInfo::current();
        match self.try_create(&info)? {
            true => return Ok(self.handle(info)),
            false => self.clear_if_stale()?,
        }

        if self.try_create(&info)? {
            return Ok(self.handle(info));
        }
        Err(self.contention())
    }

    /// Release explicitly; dropping the handle does the same
    pub fn release(handle: LockHandle) {
        drop(handle);
    }

    fn handle(&self, info: LockInfo) -> LockHandle {
        info!(pid = info.pid, path = %self.path.display(), "lock acquired");
        LockHandle {
            path: self.path.clone(),
            pid: info.pid,
            released: false,
        }
    }

    /// Write the full record to a private file, then hard-link it into
    /// place. `link` fails if the lock exists, so no reader ever sees a
    /// partially written lock.
    fn try_create(&self, info: &LockInfo) -> Result<bool, LockError> {
        let staging = self.path.with_extension(format!("{}.tmp", info.pid));
        let body = serde_json::to_string_pretty(info)
            .map_err(|e| LockError::io(&staging, io::Error::new(io::ErrorKind::InvalidData, e)))?;

        // Never follow or reuse whatever already sits at the staging path
        if fs::symlink_metadata(&staging).is_ok() {
            fs::remove_file(&staging).map_err(|e| LockError::io(&staging, e))?;
        }
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&staging)
                .map_err(|e| LockError::io(&staging, e))?;
            file.write_all(body.as_bytes())
                .and_then(|_| file.sync_all())
                .map_err(|e| LockError::io(&staging, e))?;
        }

        let linked = fs::hard_link(&staging, &self.path);
        let _ = fs::remove_file(&staging);
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(LockError::io(&self.path, e)),
        }
    }

    fn clear_if_stale(&self) -> Result<(), LockError> {
        let seen = read_info(&self.path);
        match &seen {
            Some(holder) if holder.is_alive() => {
                return Err(LockError::AlreadyRunning {
                    pid: holder.pid,
                    since: holder.created_at,
                })
            }
            Some(holder) => warn!(pid = holder.pid, "removing lock left by a process that is gone"),
            None => warn!(path = %self.path.display(), "removing unreadable lock file"),
        }
        self.reclaim(seen.as_ref())
    }

    /// Move the lock aside and delete it only if it is still the one that
    /// was judged stale. A lock another process installed in between is
    /// put back.
    fn reclaim(&self, seen: Option<&LockInfo>) -> Result<(), LockError> {
        let parked = self
            .path
            .with_extension(format!("{}.stale", process::id()));
        match fs::rename(&self.path, &parked) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(LockError::io(&self.path, e)),
        }

        let found = read_info(&parked);
        if found.as_ref() == seen {
            return remove_lock(&parked);
        }

        let restored = fs::hard_link(&parked, &self.path);
        let _ = fs::remove_file(&parked);
        if let Err(e) = restored {
            debug!(error = %e, "lock replaced again while reclaiming");
        }
        match found {
            Some(holder) => Err(LockError::AlreadyRunning {
                pid: holder.pid,
                since: holder.created_at,
            }),
            None => Err(self.contention()),
        }
    }

    fn contention(&self) -> LockError {
        match read_info(&self.path) {
            Some(holder) => LockError::AlreadyRunning {
                pid: holder.pid,
                since: holder.created_at,
            },
            None => LockError::io(
                &self.path,
                io::Error::new(io::ErrorKind::AlreadyExists, "lock reappeared during reclaim"),
            ),
        }
    }
}

fn read_info(path: &Path) -> Option<LockInfo> {
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn remove_lock(path: &Path) -> Result<(), LockError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LockError::io(path, e)),
    }
}

/// Remove the lock at `path` only if this process holds it.
/// Used from the signal listener, where the handle is out of reach.
pub fn clear_if_owned(path: &Path) -> bool {
    match read_info(path) {
        Some(info) if info.pid == process::id() => fs::remove_file(path).is_ok(),
        _ => false,
    }
}

/// Held lock - released on drop
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    pid: u32,
    released: bool,
}

impl LockHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Idempotent
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match read_info(&self.path) {
            Some(info) if info.pid == self.pid => match fs::remove_file(&self.path) {
                Ok(()) => info!("lock released"),
                Err(e) => warn!(error = %e, "failed to remove lock file"),
            },
            _ => debug!("lock no longer ours, leaving it"),
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exited_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn test_acquire_and_release() {
        let temp = TempDir::new().unwrap();
        let manager = LockManager::new(temp.path().join("run.lock"));
        let handle = manager.acquire().unwrap();
        assert_eq!(manager.holder().unwrap().pid, process::id());
        LockManager::release(handle);
        assert!(!manager.path().exists());
    }

    #[test]
    fn test_second_acquire_is_rejected() {
        let temp = TempDir::new().unwrap();
        let manager = LockManager::new(temp.path().join("run.lock"));
        let _held = manager.acquire().unwrap();
        match manager.acquire() {
            Err(LockError::AlreadyRunning { pid, .. }) => assert_eq!(pid, process::id()),
            other => panic!("expected AlreadyRunning, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_dead_holder_is_reclaimed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.lock");
        let stale = LockInfo {
            pid: exited_pid(),
            created_at: Local::now(),
            hostname: "old".to_string(),
        };
        fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        let manager = LockManager::new(&path);
        let handle = manager.acquire().unwrap();
        assert_eq!(manager.holder().unwrap().pid, process::id());
        drop(handle);
    }

    #[test]
    fn test_garbage_lock_is_reclaimed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.lock");
        fs::write(&path, "not json").unwrap();
        let manager = LockManager::new(&path);
        assert!(manager.acquire().is_ok());
    }

    #[test]
    fn test_staging_symlink_is_not_followed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.lock");
        let victim = temp.path().join("victim.conf");
        fs::write(&victim, "important=1").unwrap();
        let staging = path.with_extension(format!("{}.tmp", process::id()));
        std::os::unix::fs::symlink(&victim, &staging).unwrap();

        let manager = LockManager::new(&path);
        let handle = manager.acquire().unwrap();
        assert_eq!(fs::read_to_string(&victim).unwrap(), "important=1");
        assert_eq!(manager.holder().unwrap().pid, process::id());
        assert!(fs::symlink_metadata(&staging).is_err());
        drop(handle);
    }

    #[test]
    fn test_reclaim_keeps_lock_installed_meanwhile() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.lock");
        let stale = LockInfo {
            pid: exited_pid(),
            created_at: Local::now(),
            hostname: "old".to_string(),
        };
        // Another run replaced the stale lock after it was read
        let live = LockInfo {
            pid: process::id(),
            created_at: Local::now(),
            hostname: "live".to_string(),
        };
        fs::write(&path, serde_json::to_string(&live).unwrap()).unwrap();

        let manager = LockManager::new(&path);
        match manager.reclaim(Some(&stale)) {
            Err(LockError::AlreadyRunning { pid, .. }) => assert_eq!(pid, process::id()),
            other => panic!("expected AlreadyRunning, got {:?}", other),
        }
        assert_eq!(manager.holder(), Some(live));
        let leftovers: Vec<_> = fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_reclaim_removes_the_stale_lock() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.lock");
        let stale = LockInfo {
            pid: exited_pid(),
            created_at: Local::now(),
            hostname: "old".to_string(),
        };
        fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();
        let manager = LockManager::new(&path);
        manager.reclaim(Some(&stale)).unwrap();
        assert!(!path.exists());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_release_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let manager = LockManager::new(temp.path().join("run.lock"));
        let mut handle = manager.acquire().unwrap();
        handle.release();
        handle.release();
        assert!(!manager.path().exists());
    }

    #[test]
    fn test_release_leaves_foreign_lock() {
        let temp = TempDir::new().unwrap();
        let manager = LockManager::new(temp.path().join("run.lock"));
        let handle = manager.acquire().unwrap();
        let other = LockInfo {
            pid: 1,
            created_at: Local::now(),
            hostname: "other".to_string(),
        };
        fs::write(manager.path(), serde_json::to_string(&other).unwrap()).unwrap();
        drop(handle);
        assert!(manager.path().exists());
        assert!(!clear_if_owned(manager.path()));
    }
}
