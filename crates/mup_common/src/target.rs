//! Update targets and their per-run records
//!
//! A run always visits the targets in [`TargetKind::ALL`] order. Each visit
//! produces one [`TargetReport`]; nothing here is persisted between runs.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::version::UNKNOWN_VERSION;

/// The five update sources, in run order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    /// Official repositories through pacman
    System,
    /// AUR packages through yay or paru
    Community,
    /// Cursor editor
    Editor,
    /// AdGuard Home DNS filter
    NetworkService,
    /// Flatpak applications
    SandboxApps,
}

impl TargetKind {
    /// Fixed processing order. System packages go first so that package
    /// ownership is settled before the software targets are classified.
    pub const ALL: [TargetKind; 5] = [
        TargetKind::System,
        TargetKind::Community,
        TargetKind::Editor,
        TargetKind::NetworkService,
        TargetKind::SandboxApps,
    ];

    /// Short name used on the command line and in logs
    pub fn name(self) -> &'static str {
        match self {
            TargetKind::System => "system",
            TargetKind::Community => "aur",
            TargetKind::Editor => "cursor",
            TargetKind::NetworkService => "adguard",
            TargetKind::SandboxApps => "flatpak",
        }
    }

    /// Human-readable label for summaries
    pub fn label(self) -> &'static str {
        match self {
            TargetKind::System => "System packages",
            TargetKind::Community => "AUR packages",
            TargetKind::Editor => "Cursor",
            TargetKind::NetworkService => "AdGuard Home",
            TargetKind::SandboxApps => "Flatpak apps",
        }
    }

    /// Whether a failure of this target aborts the remaining run.
    ///
    /// Only the system transaction qualifies: a half-applied pacman upgrade
    /// leaves the base system in an unknown state.
    pub fn is_fatal_on_failure(self) -> bool {
        matches!(self, TargetKind::System)
    }

    /// Targets that are themselves package tools and report package counts
    pub fn is_package_driver(self) -> bool {
        matches!(
            self,
            TargetKind::System | TargetKind::Community | TargetKind::SandboxApps
        )
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" | "pacman" => Ok(TargetKind::System),
            "aur" | "community" => Ok(TargetKind::Community),
            "cursor" | "editor" => Ok(TargetKind::Editor),
            "adguard" | "adguardhome" => Ok(TargetKind::NetworkService),
            "flatpak" => Ok(TargetKind::SandboxApps),
            other => Err(format!(
                "unknown target '{}' (expected one of: system, aur, cursor, adguard, flatpak)",
                other
            )),
        }
    }
}

/// How a target reached its installed state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallMethod {
    PackageManager,
    CommunityRepo,
    Manual,
    NotInstalled,
}

impl fmt::Display for InstallMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstallMethod::PackageManager => "package-manager",
            InstallMethod::CommunityRepo => "community-repo",
            InstallMethod::Manual => "manual",
            InstallMethod::NotInstalled => "not-installed",
        };
        f.write_str(s)
    }
}

/// Classification result with the details each method needs later
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Installation {
    /// Owned by the official package database. For driver targets `package`
    /// names the tool itself.
    PackageManager {
        package: String,
        version: Option<String>,
    },
    /// Owned by an AUR package. `package` is `None` for the AUR driver
    /// target, which updates every foreign package at once.
    CommunityRepo {
        package: Option<String>,
        version: Option<String>,
        helper: Option<String>,
    },
    /// Placed by hand at a known location
    Manual { location: PathBuf },
    NotInstalled,
}

impl Installation {
    pub fn method(&self) -> InstallMethod {
        match self {
            Installation::PackageManager { .. } => InstallMethod::PackageManager,
            Installation::CommunityRepo { .. } => InstallMethod::CommunityRepo,
            Installation::Manual { .. } => InstallMethod::Manual,
            Installation::NotInstalled => InstallMethod::NotInstalled,
        }
    }
}

/// Why a target finished without doing anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// Turned off in the configuration
    Disabled,
    /// Another target was selected with `--only`
    NotSelected,
    NotInstalled,
    /// Update available but the run is a dry run
    DryRun,
    /// Refused at the interactive prompt
    Declined,
    /// Owned by an AUR package but no helper is installed
    NoHelper,
    /// The latest release could not be determined
    LatestUnknown,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::Disabled => "disabled",
            SkipReason::NotSelected => "not selected",
            SkipReason::NotInstalled => "not installed",
            SkipReason::DryRun => "dry run",
            SkipReason::Declined => "declined",
            SkipReason::NoHelper => "no AUR helper",
            SkipReason::LatestUnknown => "latest version unknown",
        };
        f.write_str(s)
    }
}

/// Executor state machine values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetStatus {
    Idle,
    Checking,
    SkippedUpToDate,
    Skipped(SkipReason),
    Downloading,
    Verifying,
    BackingUp,
    Installing,
    Restarting,
    Completed,
    Failed,
}

impl TargetStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TargetStatus::SkippedUpToDate
                | TargetStatus::Skipped(_)
                | TargetStatus::Completed
                | TargetStatus::Failed
        )
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetStatus::Idle => f.write_str("idle"),
            TargetStatus::Checking => f.write_str("checking"),
            TargetStatus::SkippedUpToDate => f.write_str("up-to-date"),
            TargetStatus::Skipped(reason) => write!(f, "skipped ({})", reason),
            TargetStatus::Downloading => f.write_str("downloading"),
            TargetStatus::Verifying => f.write_str("verifying"),
            TargetStatus::BackingUp => f.write_str("backing-up"),
            TargetStatus::Installing => f.write_str("installing"),
            TargetStatus::Restarting => f.write_str("restarting"),
            TargetStatus::Completed => f.write_str("completed"),
            TargetStatus::Failed => f.write_str("failed"),
        }
    }
}

/// Working record for one target, read fresh every run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateTarget {
    pub kind: TargetKind,
    pub installation: Installation,
    pub current_version: String,
    pub latest_version: Option<String>,
    pub status: TargetStatus,
    /// Packages covered by one update (driver targets only)
    pub package_count: usize,
    pub last_checked_at: Option<DateTime<Local>>,
}

impl UpdateTarget {
    pub fn new(kind: TargetKind) -> Self {
        Self {
            kind,
            installation: Installation::NotInstalled,
            current_version: UNKNOWN_VERSION.to_string(),
            latest_version: None,
            status: TargetStatus::Idle,
            package_count: 0,
            last_checked_at: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn install_method(&self) -> InstallMethod {
        self.installation.method()
    }
}

/// Terminal result of one target visit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Updated,
    UpToDate,
    Skipped(SkipReason),
    Failed { stage: TargetStatus, reason: String },
}

/// What the executor hands back to the orchestrator
#[derive(Debug, Clone)]
pub struct TargetReport {
    pub target: UpdateTarget,
    pub outcome: Outcome,
    /// Every state entered after `Idle`, in order
    pub transitions: Vec<TargetStatus>,
}

impl TargetReport {
    /// Report for a target that was never visited
    pub fn skipped(kind: TargetKind, reason: SkipReason) -> Self {
        let mut target = UpdateTarget::new(kind);
        target.status = TargetStatus::Skipped(reason);
        Self {
            target,
            outcome: Outcome::Skipped(reason),
            transitions: Vec::new(),
        }
    }

    pub fn kind(&self) -> TargetKind {
        self.target.kind
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }

    pub fn is_updated(&self) -> bool {
        matches!(self.outcome, Outcome::Updated)
    }

    /// Failure ended the whole run
    pub fn is_fatal(&self) -> bool {
        self.is_failed() && self.kind().is_fatal_on_failure()
    }

    /// Failure happened while fetching an artifact
    pub fn failed_downloading(&self) -> bool {
        matches!(
            &self.outcome,
            Outcome::Failed {
                stage: TargetStatus::Downloading,
                ..
            }
        )
    }

    /// One-line outcome for summaries and notifications
    pub fn summary_line(&self) -> String {
        let t = &self.target;
        match &self.outcome {
            Outcome::Updated if t.kind.is_package_driver() => {
                format!("updated {} package(s)", t.package_count)
            }
            Outcome::Updated => format!(
                "updated {} → {}",
                t.current_version,
                t.latest_version.as_deref().unwrap_or(UNKNOWN_VERSION)
            ),
            Outcome::UpToDate => match t.installation {
                Installation::PackageManager { .. } if !t.kind.is_package_driver() => {
                    "already current (handled by system packages)".to_string()
                }
                _ => "already current".to_string(),
            },
            Outcome::Skipped(SkipReason::DryRun) if t.kind.is_package_driver() => {
                format!("would update {} package(s) (dry run)", t.package_count)
            }
            Outcome::Skipped(SkipReason::DryRun) => format!(
                "would update {} → {} (dry run)",
                t.current_version,
                t.latest_version.as_deref().unwrap_or(UNKNOWN_VERSION)
            ),
            Outcome::Skipped(reason) => format!("skipped ({})", reason),
            Outcome::Failed { stage, reason } => format!("failed at {}: {}", stage, reason),
        }
    }
}
