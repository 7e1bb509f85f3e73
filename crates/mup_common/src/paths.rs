//! Filesystem layout
//!
//! XDG-compliant discovery with environment overrides:
//! 1. `$MUP_STATE_DIR` / `$MUP_LOCK_FILE` (explicit override)
//! 2. `$XDG_CONFIG_HOME`, `$XDG_STATE_HOME` via `dirs`
//! 3. `~/.config`, `~/.local/state` fallback
//!
//! [`Layout::rooted`] relocates everything, including absolute install
//! locations such as `/opt/cursor`, under one directory for tests.

use std::env;
use std::path::{Component, Path, PathBuf};

/// Directory name under the XDG config and state roots
pub const APP_DIR: &str = "multi-updater";

pub const CONFIG_FILE_NAME: &str = "config.conf";

pub const LOCK_FILE_NAME: &str = "multi-updater.lock";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Default configuration file
    pub config_file: PathBuf,
    /// Logs, statistics and diagnostic bundles
    pub state_dir: PathBuf,
    /// Run-wide lock
    pub lock_file: PathBuf,
    /// Expansion of `~/` in install candidates
    pub home: PathBuf,
    /// Prefix for absolute install candidates (`/` on a real system)
    pub system_root: PathBuf,
}

impl Layout {
    /// Discover paths for the invoking user
    pub fn discover() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));

        let config_file = dirs::config_dir()
            .unwrap_or_else(|| home.join(".config"))
            .join(APP_DIR)
            .join(CONFIG_FILE_NAME);

        let state_dir = match env::var_os("MUP_STATE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::state_dir()
                .unwrap_or_else(|| home.join(".local/state"))
                .join(APP_DIR),
        };

        // Shared temp dir so runs under sudo and as the user see one lock
        let lock_file = match env::var_os("MUP_LOCK_FILE") {
            Some(path) => PathBuf::from(path),
            None => env::temp_dir().join(LOCK_FILE_NAME),
        };

        Self {
            config_file,
            state_dir,
            lock_file,
            home,
            system_root: PathBuf::from("/"),
        }
    }

    /// Everything beneath `root`
    pub fn rooted(root: &Path) -> Self {
        Self {
            config_file: root.join(CONFIG_FILE_NAME),
            state_dir: root.join("state"),
            lock_file: root.join(LOCK_FILE_NAME),
            home: root.join("home"),
            system_root: root.join("sys"),
        }
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    pub fn stats_file(&self) -> PathBuf {
        self.state_dir.join("stats.json")
    }

    pub fn diagnostics_dir(&self) -> PathBuf {
        self.state_dir.join("diagnostics")
    }

    /// Map a candidate like `~/AdGuardHome/AdGuardHome` or `/opt/cursor`
    /// onto this layout
    pub fn resolve(&self, candidate: &str) -> PathBuf {
        if let Some(rest) = candidate.strip_prefix("~/") {
            return self.home.join(rest);
        }
        let relative: PathBuf = Path::new(candidate)
            .components()
            .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
            .collect();
        self.system_root.join(relative)
    }
}
