//! AdGuard Home, manual install
//!
//! Order of operations once an update is confirmed:
//! download, verify, stop (if running), back up the data directory,
//! replace the binary, start again (if it was running). The service is
//! restarted even when the install failed, so a failed update never leaves
//! DNS filtering down.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{
    log_checksum, packages, remove_any, sibling, version_change, InstallError, StepResult,
    TargetRun, UpdateExecutor,
};
use crate::artifact::{unpack_tarball_entry, verify_tarball, SERVICE_BINARY};
use crate::backup::BackupManager;
use crate::downloader::SERVICE_MIN_BYTES;
use crate::system::Invocation;
use crate::target::{Installation, Outcome, SkipReason, TargetStatus};
use crate::version::{is_older, is_unknown, versions_match};

pub const SERVICE_RELEASE_URL: &str =
    "https://api.github.com/repos/AdguardTeam/AdGuardHome/releases/latest";

/// Release asset for x86_64 Linux
pub const SERVICE_ASSET: &str = "AdGuardHome_linux_amd64.tar.gz";

/// systemd unit name
pub const SERVICE_UNIT: &str = "AdGuardHome";

/// Directory name that marks a self-contained install (binary, config and
/// `data/` side by side)
const SERVICE_DIR_NAME: &str = "AdGuardHome";

pub(super) fn update(exec: &UpdateExecutor, run: &mut TargetRun) -> StepResult {
    if let Some(result) = packages::update_owned(exec, run) {
        return result;
    }
    let binary = match &run.target.installation {
        Installation::Manual { location } => location.clone(),
        _ => return Ok(Outcome::Skipped(SkipReason::NotInstalled)),
    };

    match exec.resolver().self_reported_version(&binary) {
        Ok(version) => run.target.current_version = version,
        Err(e) => warn!(binary = %binary.display(), error = %e, "installed version unknown"),
    }

    let release = match exec.resolver().release(SERVICE_RELEASE_URL) {
        Ok(release) => release,
        Err(e) => {
            warn!(error = %e, "cannot determine the latest release, leaving the service alone");
            return Ok(Outcome::Skipped(SkipReason::LatestUnknown));
        }
    };
    let latest = match release.version() {
        Ok(version) => version,
        Err(e) => {
            warn!(error = %e, "release has no usable version");
            return Ok(Outcome::Skipped(SkipReason::LatestUnknown));
        }
    };
    run.target.latest_version = Some(latest.clone());

    let current = run.target.current_version.clone();
    if versions_match(&current, &latest) {
        return Ok(Outcome::UpToDate);
    }
    if !is_unknown(&current) && is_older(&latest, &current) {
        info!(installed = %current, latest = %latest, "installed build is newer than the release");
        return Ok(Outcome::UpToDate);
    }

    let asset_url = release
        .find_asset(SERVICE_ASSET)
        .map(|asset| asset.browser_download_url.clone())
        .ok_or_else(|| run.fail(format!("release {} has no {} asset", release.tag_name, SERVICE_ASSET)))?;

    let summary = version_change(&run.target);
    if let Some(outcome) = exec.gate(run, &summary) {
        return Ok(outcome);
    }

    run.enter(TargetStatus::Downloading);
    let tarball = exec.scratch().join(SERVICE_ASSET);
    exec.downloader()
        .download(&asset_url, &tarball, SERVICE_MIN_BYTES)
        .map_err(|e| run.fail(e.to_string()))?;

    run.enter(TargetStatus::Verifying);
    log_checksum(run, &tarball)?;
    verify_tarball(&tarball, SERVICE_BINARY).map_err(|e| run.fail(e.to_string()))?;

    let was_active = service_active(exec);
    if was_active {
        systemctl(exec, "stop");
    }

    run.enter(TargetStatus::BackingUp);
    match data_dir(&binary) {
        Some(dir) => {
            let manager = BackupManager::new(dir);
            info!(data = %manager.source_dir().display(), "backing up service data");
            let snapshot = manager.snapshot();
            if !snapshot.complete {
                warn!(backup = %snapshot.backup_dir.display(), "backup is incomplete, continuing");
            }
            manager.prune(exec.ctx.settings.max_backups);
        }
        None => warn!(
            binary = %binary.display(),
            "binary is not in a dedicated directory, no data backup taken"
        ),
    }

    run.enter(TargetStatus::Installing);
    let candidates = exec.install_candidates(run.kind(), &binary);
    let install_failure = match install_binary(&tarball, &candidates) {
        Ok(path) => {
            info!(binary = %path.display(), "service binary replaced");
            None
        }
        Err(e) => Some(run.fail(e.to_string())),
    };

    if was_active {
        run.enter(TargetStatus::Restarting);
        if !systemctl(exec, "start") {
            warn!("service did not start again, check `systemctl status {}`", SERVICE_UNIT);
        }
    }

    match install_failure {
        Some(failure) => Err(failure),
        None => Ok(Outcome::Updated),
    }
}

fn service_active(exec: &UpdateExecutor) -> bool {
    exec.ctx
        .system
        .run(&Invocation::new("systemctl", &["is-active", "--quiet", SERVICE_UNIT]))
        .map(|out| out.success())
        .unwrap_or(false)
}

/// `systemctl <action> AdGuardHome`; returns success
fn systemctl(exec: &UpdateExecutor, action: &str) -> bool {
    let invocation = Invocation::new("systemctl", &[action, SERVICE_UNIT]).as_root();
    match exec.ctx.system.run(&invocation) {
        Ok(out) if out.success() => {
            info!(action, unit = SERVICE_UNIT, "service control");
            true
        }
        Ok(out) => {
            warn!(action, reason = %out.failure_reason(), "service control failed");
            false
        }
        Err(e) => {
            warn!(action, error = %e, "systemctl could not run");
            false
        }
    }
}

fn data_dir(binary: &Path) -> Option<PathBuf> {
    let parent = binary.parent()?;
    (parent.file_name()? == SERVICE_DIR_NAME).then(|| parent.to_path_buf())
}

/// Stage `<path>.new`, mark executable, rename over the old binary
fn install_binary(tarball: &Path, candidates: &[PathBuf]) -> Result<PathBuf, InstallError> {
    let mut errors = Vec::new();
    for path in candidates {
        match replace_binary(tarball, path) {
            Ok(()) => return Ok(path.clone()),
            Err(e) => {
                warn!(location = %path.display(), error = %e, "install location rejected");
                errors.push(e.to_string());
            }
        }
    }
    Err(InstallError::NoLocation(errors.join("; ")))
}

fn replace_binary(tarball: &Path, path: &Path) -> Result<(), InstallError> {
    let staged = sibling(path, "new");
    let result = stage_binary(tarball, &staged).and_then(|()| {
        fs::rename(&staged, path).map_err(|source| InstallError::Swap {
            path: path.to_path_buf(),
            source,
        })
    });
    if result.is_err() {
        let _ = remove_any(&staged);
    }
    result
}

fn stage_binary(tarball: &Path, staged: &Path) -> Result<(), InstallError> {
    let stage_error = |reason: String| InstallError::Stage {
        path: staged.to_path_buf(),
        reason,
    };
    unpack_tarball_entry(tarball, SERVICE_BINARY, staged).map_err(|e| stage_error(e.to_string()))?;
    fs::set_permissions(staged, fs::Permissions::from_mode(0o755))
        .map_err(|e| stage_error(format!("cannot mark executable: {}", e)))
}
