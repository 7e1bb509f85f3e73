//! Update executor
//!
//! Drives one target through its states:
//!
//! ```text
//! Idle → Checking → SkippedUpToDate | Skipped
//!                 → Downloading → Verifying → [BackingUp] → Installing
//!                   → [Restarting] → Completed
//! any non-terminal state → Failed
//! ```
//!
//! Package-driver targets (pacman, AUR, flatpak) have no artifact of their
//! own and go straight from Checking to Installing. Every transition is
//! logged and forwarded to the [`RunObserver`].

mod editor;
mod packages;
mod service;

use chrono::Local;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::artifact::sha256_file;
use crate::classifier::Classifier;
use crate::downloader::Downloader;
use crate::orchestrator::RunContext;
use crate::resolver::VersionResolver;
use crate::target::{
    Outcome, SkipReason, TargetKind, TargetReport, TargetStatus, UpdateTarget,
};

pub use editor::EDITOR_DOWNLOAD_URL;
pub use service::{SERVICE_ASSET, SERVICE_RELEASE_URL, SERVICE_UNIT};

/// Hooks for the front end
pub trait RunObserver {
    fn on_transition(&self, _kind: TargetKind, _status: &TargetStatus) {}

    /// Asked before anything is changed in interactive mode
    fn confirm(&self, _kind: TargetKind, _summary: &str) -> bool {
        true
    }
}

/// Observer that watches nothing and accepts every prompt
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentObserver;

impl RunObserver for SilentObserver {}

/// Failure while putting a verified artifact in place
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("cannot stage {path}: {reason}")]
    Stage { path: PathBuf, reason: String },

    #[error("cannot move {path}: {source}")]
    Swap {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no install location accepted the artifact ({0})")]
    NoLocation(String),
}

/// Why a step stopped the target, and in which state
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StepFailure {
    stage: TargetStatus,
    reason: String,
}

pub(crate) type StepResult = Result<Outcome, StepFailure>;

/// State record for one target visit
pub(crate) struct TargetRun<'o> {
    target: UpdateTarget,
    transitions: Vec<TargetStatus>,
    observer: &'o dyn RunObserver,
}

impl<'o> TargetRun<'o> {
    fn new(kind: TargetKind, observer: &'o dyn RunObserver) -> Self {
        Self {
            target: UpdateTarget::new(kind),
            transitions: Vec::new(),
            observer,
        }
    }

    fn kind(&self) -> TargetKind {
        self.target.kind
    }

    fn enter(&mut self, status: TargetStatus) {
        info!(target_name = self.target.name(), state = %status, "state transition");
        self.target.status = status.clone();
        self.observer.on_transition(self.target.kind, &status);
        self.transitions.push(status);
    }

    /// Failure in the current state
    fn fail(&self, reason: impl Into<String>) -> StepFailure {
        StepFailure {
            stage: self.target.status.clone(),
            reason: reason.into(),
        }
    }

    fn finish(mut self, result: StepResult) -> TargetReport {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(failure) => {
                warn!(
                    target_name = self.target.name(),
                    stage = %failure.stage,
                    reason = %failure.reason,
                    "update failed"
                );
                Outcome::Failed {
                    stage: failure.stage,
                    reason: failure.reason,
                }
            }
        };
        let terminal = match &outcome {
            Outcome::Updated => TargetStatus::Completed,
            Outcome::UpToDate => TargetStatus::SkippedUpToDate,
            Outcome::Skipped(reason) => TargetStatus::Skipped(*reason),
            Outcome::Failed { .. } => TargetStatus::Failed,
        };
        self.enter(terminal);
        TargetReport {
            target: self.target,
            outcome,
            transitions: self.transitions,
        }
    }
}

pub struct UpdateExecutor<'a> {
    ctx: &'a RunContext<'a>,
    scratch: &'a Path,
}

impl<'a> UpdateExecutor<'a> {
    /// `scratch` holds downloaded artifacts for the duration of the run
    pub fn new(ctx: &'a RunContext<'a>, scratch: &'a Path) -> Self {
        Self { ctx, scratch }
    }

    /// Run one target to a terminal state. Never panics on host errors;
    /// every failure ends up in the report.
    pub fn execute(&self, kind: TargetKind) -> TargetReport {
        let mut run = TargetRun::new(kind, self.ctx.observer);
        run.enter(TargetStatus::Checking);
        run.target.installation = Classifier::new(self.ctx.system, self.ctx.layout).classify(kind);
        run.target.last_checked_at = Some(Local::now());

        let result = match kind {
            TargetKind::System => packages::update_system(self, &mut run),
            TargetKind::Community => packages::update_community(self, &mut run),
            TargetKind::SandboxApps => packages::update_sandbox(self, &mut run),
            TargetKind::Editor => editor::update(self, &mut run),
            TargetKind::NetworkService => service::update(self, &mut run),
        };
        run.finish(result)
    }

    fn resolver(&self) -> VersionResolver<'a> {
        VersionResolver::new(self.ctx.system, self.ctx.http)
    }

    fn downloader(&self) -> Downloader<'a> {
        Downloader::new(self.ctx.http, self.ctx.settings.download_retries)
            .with_retry_delay(self.ctx.options.retry_delay)
    }

    fn scratch(&self) -> &Path {
        self.scratch
    }

    /// Stop point before the first change to the machine
    fn gate(&self, run: &TargetRun, summary: &str) -> Option<Outcome> {
        if self.ctx.dry_run() {
            info!(target_name = run.target.name(), "dry run: {}", summary);
            return Some(Outcome::Skipped(SkipReason::DryRun));
        }
        if self.ctx.options.interactive && !self.ctx.observer.confirm(run.kind(), summary) {
            info!(target_name = run.target.name(), "declined: {}", summary);
            return Some(Outcome::Skipped(SkipReason::Declined));
        }
        None
    }

    /// Install candidates for a software target: the detected location
    /// first, then other locations that already hold an install of it
    fn install_candidates(&self, kind: TargetKind, detected: &Path) -> Vec<PathBuf> {
        let mut candidates = vec![detected.to_path_buf()];
        if let Some(footprint) = crate::classifier::footprint(kind) {
            let classifier = Classifier::new(self.ctx.system, self.ctx.layout);
            for path in classifier.manual_locations(footprint) {
                if !candidates.contains(&path) {
                    candidates.push(path);
                }
            }
        }
        candidates
    }
}

/// `Cursor 2.0.60 → 2.0.69`, shown at the gate
fn version_change(target: &UpdateTarget) -> String {
    format!(
        "{} {} → {}",
        target.kind.label(),
        target.current_version,
        target.latest_version.as_deref().unwrap_or("latest")
    )
}

fn log_checksum(run: &TargetRun, artifact: &Path) -> Result<(), StepFailure> {
    let digest = sha256_file(artifact)
        .map_err(|e| run.fail(format!("cannot hash {}: {}", artifact.display(), e)))?;
    info!(target_name = run.target.name(), sha256 = %digest, "artifact checksum");
    Ok(())
}

/// `<path>.<suffix>` next to `path`
pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

fn remove_any(path: &Path) -> io::Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::orchestrator::RunOptions;
    use crate::paths::Layout;
    use crate::testing::{FakeHttp, FakeSystem};
    use std::cell::RefCell;
    use tempfile::TempDir;

    struct Recorder {
        seen: RefCell<Vec<(TargetKind, TargetStatus)>>,
        answer: bool,
    }

    impl RunObserver for Recorder {
        fn on_transition(&self, kind: TargetKind, status: &TargetStatus) {
            self.seen.borrow_mut().push((kind, status.clone()));
        }

        fn confirm(&self, _kind: TargetKind, _summary: &str) -> bool {
            self.answer
        }
    }

    #[test]
    fn test_sibling_names() {
        assert_eq!(
            sibling(Path::new("/opt/cursor"), "new"),
            PathBuf::from("/opt/cursor.new")
        );
        assert_eq!(
            sibling(Path::new("/opt/AdGuardHome/AdGuardHome"), "old"),
            PathBuf::from("/opt/AdGuardHome/AdGuardHome.old")
        );
    }

    #[test]
    fn test_not_installed_target_is_skipped() {
        let temp = TempDir::new().unwrap();
        let layout = Layout::rooted(temp.path());
        let settings = Settings::default();
        let system = FakeSystem::new();
        let http = FakeHttp::new();
        let observer = Recorder {
            seen: RefCell::new(Vec::new()),
            answer: true,
        };
        let ctx = RunContext {
            settings: &settings,
            layout: &layout,
            system: &system,
            http: &http,
            observer: &observer,
            options: RunOptions::default(),
        };

        let report = UpdateExecutor::new(&ctx, temp.path()).execute(TargetKind::Editor);
        assert_eq!(report.outcome, Outcome::Skipped(SkipReason::NotInstalled));
        assert_eq!(
            report.transitions,
            vec![
                TargetStatus::Checking,
                TargetStatus::Skipped(SkipReason::NotInstalled)
            ]
        );
        assert_eq!(observer.seen.borrow().len(), 2);
        assert!(report.target.last_checked_at.is_some());
    }

    #[test]
    fn test_interactive_decline_changes_nothing() {
        let temp = TempDir::new().unwrap();
        let layout = Layout::rooted(temp.path());
        let settings = Settings::default();
        let system = FakeSystem::new();
        system.install_program("flatpak");
        system.respond(
            "flatpak remote-ls --updates --columns=application",
            crate::system::CommandOutput::ok("org.mozilla.firefox\n"),
        );
        let http = FakeHttp::new();
        let observer = Recorder {
            seen: RefCell::new(Vec::new()),
            answer: false,
        };
        let ctx = RunContext {
            settings: &settings,
            layout: &layout,
            system: &system,
            http: &http,
            observer: &observer,
            options: RunOptions {
                interactive: true,
                ..RunOptions::default()
            },
        };

        let report = UpdateExecutor::new(&ctx, temp.path()).execute(TargetKind::SandboxApps);
        assert_eq!(report.outcome, Outcome::Skipped(SkipReason::Declined));
        assert!(!system.ran("flatpak update -y --noninteractive"));
    }
}
