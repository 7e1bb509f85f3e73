//! Multi-Updater common library
//!
//! Update orchestration engine for an Arch-based desktop. One run walks five
//! targets in a fixed order (system packages, AUR, Cursor, AdGuard Home,
//! Flatpak), classifies how each one is installed, resolves installed vs.
//! published versions and drives the per-target update state machine.
//!
//! Host access goes through two seams so the engine can be exercised without
//! touching the machine:
//! - [`system::SystemRunner`] for subprocesses
//! - [`http::HttpClient`] for network access
//!
//! [`testing`] ships in-memory implementations of both.

pub mod artifact;
pub mod backup;
pub mod classifier;
pub mod config;
pub mod diagnostics;
pub mod downloader;
pub mod executor;
pub mod http;
pub mod lock;
pub mod notify;
pub mod orchestrator;
pub mod paths;
pub mod release;
pub mod resolver;
pub mod run_log;
pub mod self_update;
pub mod shutdown;
pub mod stats;
pub mod system;
pub mod target;
pub mod testing;
pub mod version;

pub use config::{ConfigError, ConfigWarning, LoadedConfig, Settings};
pub use executor::{InstallError, RunObserver, SilentObserver, UpdateExecutor};
pub use lock::{LockError, LockHandle, LockManager};
pub use orchestrator::{Orchestrator, RunContext, RunError, RunOptions, RunResult, RunStatus};
pub use paths::Layout;
pub use target::{
    InstallMethod, Installation, Outcome, SkipReason, TargetKind, TargetReport, TargetStatus,
    UpdateTarget,
};
