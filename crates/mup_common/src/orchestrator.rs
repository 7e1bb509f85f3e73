//! Run orchestration
//!
//! One run: take the lock, create the scratch directory, visit every
//! target in fixed order, release everything. A failed system upgrade is
//! fatal and the remaining targets are not attempted; any other failure is
//! local to its target.

use chrono::{DateTime, Local};
use std::io;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::downloader::DOWNLOAD_RETRY_DELAY;
use crate::executor::{RunObserver, UpdateExecutor};
use crate::http::HttpClient;
use crate::lock::{LockError, LockManager};
use crate::paths::Layout;
use crate::shutdown::SignalCleanup;
use crate::system::SystemRunner;
use crate::target::{Outcome, SkipReason, TargetKind, TargetReport};

/// Per-invocation switches from the command line
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub dry_run: bool,
    pub interactive: bool,
    /// Restrict the run to one target
    pub only: Option<TargetKind>,
    /// Install the SIGINT/SIGTERM/SIGHUP cleanup listener
    pub trap_signals: bool,
    pub retry_delay: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            interactive: false,
            only: None,
            trap_signals: false,
            retry_delay: DOWNLOAD_RETRY_DELAY,
        }
    }
}

/// Everything a run reads from, borrowed for its duration
pub struct RunContext<'a> {
    pub settings: &'a Settings,
    pub layout: &'a Layout,
    pub system: &'a dyn SystemRunner,
    pub http: &'a dyn HttpClient,
    pub observer: &'a dyn RunObserver,
    pub options: RunOptions,
}

impl RunContext<'_> {
    /// Dry run from either the command line or the configuration
    pub fn dry_run(&self) -> bool {
        self.options.dry_run || self.settings.dry_run
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("cannot create scratch directory: {0}")]
    Scratch(#[source] io::Error),
}

/// Aggregate result, mapped to the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    /// At least one artifact download failed
    DownloadFailed,
    /// The system upgrade failed
    Fatal,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: Uuid,
    pub reports: Vec<TargetReport>,
    /// Target whose failure ended the run
    pub aborted_by: Option<TargetKind>,
    pub not_attempted: Vec<TargetKind>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub dry_run: bool,
}

impl RunResult {
    /// Fatal beats download failure beats success
    pub fn status(&self) -> RunStatus {
        if self.aborted_by.is_some() || self.reports.iter().any(TargetReport::is_fatal) {
            RunStatus::Fatal
        } else if self.reports.iter().any(TargetReport::failed_downloading) {
            RunStatus::DownloadFailed
        } else {
            RunStatus::Success
        }
    }

    pub fn updated_count(&self) -> usize {
        self.reports.iter().filter(|r| r.is_updated()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.reports.iter().filter(|r| r.is_failed()).count()
    }

    pub fn report(&self, kind: TargetKind) -> Option<&TargetReport> {
        self.reports.iter().find(|r| r.kind() == kind)
    }

    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

pub struct Orchestrator<'a> {
    ctx: RunContext<'a>,
    lock: LockManager,
}

impl<'a> Orchestrator<'a> {
    pub fn new(ctx: RunContext<'a>, lock: LockManager) -> Self {
        Self { ctx, lock }
    }

    /// Run every target once. Errors only when the run could not start;
    /// target failures are in the result.
    pub fn run(&self) -> Result<RunResult, RunError> {
        let mut handle = self.lock.acquire()?;
        let scratch = tempfile::Builder::new()
            .prefix("multi-updater-")
            .tempdir()
            .map_err(RunError::Scratch)?;

        let _cleanup = if self.ctx.options.trap_signals {
            match SignalCleanup::install(self.lock.path().to_path_buf(), scratch.path().to_path_buf()) {
                Ok(cleanup) => Some(cleanup),
                Err(e) => {
                    warn!(error = %e, "signal handlers not installed, interruption will leave the lock behind");
                    None
                }
            }
        } else {
            None
        };

        let run_id = Uuid::new_v4();
        let started_at = Local::now();
        info!(%run_id, dry_run = self.ctx.dry_run(), only = ?self.ctx.options.only, "run started");

        let executor = UpdateExecutor::new(&self.ctx, scratch.path());
        let mut reports = Vec::new();
        let mut aborted_by = None;
        let mut not_attempted = Vec::new();

        for kind in TargetKind::ALL {
            if aborted_by.is_some() {
                not_attempted.push(kind);
                continue;
            }
            if let Some(reason) = self.skip_reason(kind) {
                info!(target_name = kind.name(), %reason, "not visited");
                reports.push(TargetReport::skipped(kind, reason));
                continue;
            }

            let report = executor.execute(kind);
            if report.is_fatal() {
                error!(target_name = kind.name(), "fatal failure, remaining targets not attempted");
                aborted_by = Some(kind);
            }
            reports.push(report);
        }

        let result = RunResult {
            run_id,
            reports,
            aborted_by,
            not_attempted,
            started_at,
            finished_at: Local::now(),
            dry_run: self.ctx.dry_run(),
        };
        info!(
            %run_id,
            updated = result.updated_count(),
            failed = result.failed_count(),
            status = ?result.status(),
            "run finished"
        );

        drop(executor);
        if let Err(e) = scratch.close() {
            warn!(error = %e, "scratch directory not removed");
        }
        handle.release();
        Ok(result)
    }

    /// `--only` overrides the enable flags
    fn skip_reason(&self, kind: TargetKind) -> Option<SkipReason> {
        match self.ctx.options.only {
            Some(only) if only != kind => Some(SkipReason::NotSelected),
            Some(_) => None,
            None if !self.ctx.settings.is_enabled(kind) => Some(SkipReason::Disabled),
            None => None,
        }
    }
}

/// Targets that ended without an update or a failure
pub fn skipped_targets(result: &RunResult) -> impl Iterator<Item = &TargetReport> {
    result
        .reports
        .iter()
        .filter(|r| matches!(r.outcome, Outcome::Skipped(_)))
}
