//! Cursor, manual install
//!
//! The download endpoint redirects to a versioned `.deb`; the probe reads
//! the version off that filename without fetching the package. When the
//! probe fails the package is downloaded early and its own `package.json`
//! is read instead, and that download is reused for the install.
//!
//! The application tree is staged next to the install directory and
//! swapped in with two renames, so a failed unpack never leaves a
//! half-written editor behind.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{
    log_checksum, packages, remove_any, sibling, version_change, InstallError, StepResult,
    TargetRun, UpdateExecutor,
};
use crate::artifact::{
    deb_manifest_version, unpack_deb_tree, EDITOR_MANIFEST_RELATIVE, EDITOR_TREE,
};
use crate::downloader::EDITOR_MIN_BYTES;
use crate::system::Invocation;
use crate::target::{Installation, Outcome, SkipReason, TargetStatus};
use crate::version::{is_older, is_unknown, read_manifest_version, versions_match};

/// Redirects to the newest stable x64 Debian package
pub const EDITOR_DOWNLOAD_URL: &str =
    "https://api2.cursor.sh/updates/download/golden/linux-x64-deb/cursor/latest";

const ARTIFACT_FILE: &str = "cursor-latest.deb";

pub(super) fn update(exec: &UpdateExecutor, run: &mut TargetRun) -> StepResult {
    if let Some(result) = packages::update_owned(exec, run) {
        return result;
    }
    let location = match &run.target.installation {
        Installation::Manual { location } => location.clone(),
        _ => return Ok(Outcome::Skipped(SkipReason::NotInstalled)),
    };

    match read_manifest_version(&location.join(EDITOR_MANIFEST_RELATIVE)) {
        Ok(version) => run.target.current_version = version,
        Err(e) => warn!(location = %location.display(), error = %e, "installed version unknown"),
    }

    let artifact = exec.scratch().join(ARTIFACT_FILE);
    let mut download_url = EDITOR_DOWNLOAD_URL.to_string();
    let mut prefetched = false;

    match exec.resolver().probe_artifact(EDITOR_DOWNLOAD_URL) {
        Ok(probed) => {
            info!(url = %probed.url, version = %probed.version, "latest editor build");
            download_url = probed.url;
            run.target.latest_version = Some(probed.version);
        }
        Err(e) => {
            warn!(error = %e, "redirect probe failed, reading the version from the package");
            match exec.downloader().download(&download_url, &artifact, EDITOR_MIN_BYTES) {
                Ok(_) => {
                    prefetched = true;
                    match deb_manifest_version(&artifact) {
                        Ok(version) => run.target.latest_version = Some(version),
                        Err(e) => warn!(error = %e, "package carries no readable version"),
                    }
                }
                Err(e) => warn!(error = %e, "fallback download failed"),
            }
        }
    }

    match run.target.latest_version.as_deref() {
        Some(latest) if versions_match(&run.target.current_version, latest) => {
            return Ok(Outcome::UpToDate);
        }
        Some(latest)
            if !is_unknown(&run.target.current_version)
                && is_older(latest, &run.target.current_version) =>
        {
            info!(
                installed = %run.target.current_version,
                latest,
                "installed build is newer than the published one"
            );
            return Ok(Outcome::UpToDate);
        }
        Some(_) => {}
        None => warn!("latest version could not be determined, updating anyway"),
    }

    let summary = version_change(&run.target);
    if let Some(outcome) = exec.gate(run, &summary) {
        return Ok(outcome);
    }
    if editor_running(exec) {
        warn!("Cursor is running; restart it after the update to load the new version");
    }

    run.enter(TargetStatus::Downloading);
    if prefetched {
        info!(path = %artifact.display(), "reusing package downloaded during the version check");
    } else {
        exec.downloader()
            .download(&download_url, &artifact, EDITOR_MIN_BYTES)
            .map_err(|e| run.fail(e.to_string()))?;
    }

    run.enter(TargetStatus::Verifying);
    log_checksum(run, &artifact)?;
    let packaged = deb_manifest_version(&artifact).map_err(|e| run.fail(e.to_string()))?;
    if let Some(expected) = run.target.latest_version.take() {
        if !versions_match(&expected, &packaged) {
            warn!(expected = %expected, packaged = %packaged, "package version differs from the probed one");
        }
    }
    run.target.latest_version = Some(packaged);

    run.enter(TargetStatus::Installing);
    let candidates = exec.install_candidates(run.kind(), &location);
    let installed_at =
        install_tree(&artifact, &candidates).map_err(|e| run.fail(e.to_string()))?;
    info!(location = %installed_at.display(), "editor installed");
    Ok(Outcome::Updated)
}

fn editor_running(exec: &UpdateExecutor) -> bool {
    exec.ctx
        .system
        .run(&Invocation::new("pgrep", &["-x", "cursor"]))
        .map(|out| out.success())
        .unwrap_or(false)
}

/// Try each candidate in order until one accepts the tree
fn install_tree(artifact: &Path, candidates: &[PathBuf]) -> Result<PathBuf, InstallError> {
    let mut errors = Vec::new();
    for dir in candidates {
        match replace_tree(artifact, dir) {
            Ok(()) => return Ok(dir.clone()),
            Err(e) => {
                warn!(location = %dir.display(), error = %e, "install location rejected");
                errors.push(e.to_string());
            }
        }
    }
    Err(InstallError::NoLocation(errors.join("; ")))
}

/// Stage in `<dir>.new`, park the old tree in `<dir>.old`, swap
fn replace_tree(artifact: &Path, dir: &Path) -> Result<(), InstallError> {
    let staging = sibling(dir, "new");
    let previous = sibling(dir, "old");
    for leftover in [&staging, &previous] {
        remove_any(leftover).map_err(|e| InstallError::Stage {
            path: leftover.clone(),
            reason: e.to_string(),
        })?;
    }

    if let Err(e) = unpack_deb_tree(artifact, EDITOR_TREE, &staging) {
        let _ = remove_any(&staging);
        return Err(InstallError::Stage {
            path: staging,
            reason: e.to_string(),
        });
    }

    let had_previous = dir.exists();
    if had_previous {
        if let Err(source) = fs::rename(dir, &previous) {
            let _ = remove_any(&staging);
            return Err(InstallError::Swap {
                path: dir.to_path_buf(),
                source,
            });
        }
    }

    if let Err(source) = fs::rename(&staging, dir) {
        if had_previous {
            if let Err(restore) = fs::rename(&previous, dir) {
                warn!(error = %restore, "could not restore previous editor tree");
            }
        }
        let _ = remove_any(&staging);
        return Err(InstallError::Swap { path: staging, source });
    }

    if had_previous {
        if let Err(e) = remove_any(&previous) {
            warn!(path = %previous.display(), error = %e, "old editor tree left behind");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::editor_deb;
    use tempfile::TempDir;

    #[test]
    fn test_replace_tree_swaps_directory() {
        let temp = TempDir::new().unwrap();
        let deb = temp.path().join("cursor.deb");
        fs::write(&deb, editor_deb("2.0.69").unwrap()).unwrap();
        let dir = temp.path().join("opt/cursor");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("stale-file"), b"old").unwrap();

        replace_tree(&deb, &dir).unwrap();
        assert!(!dir.join("stale-file").exists());
        assert_eq!(
            read_manifest_version(&dir.join(EDITOR_MANIFEST_RELATIVE)).unwrap(),
            "2.0.69"
        );
        assert!(!sibling(&dir, "new").exists());
        assert!(!sibling(&dir, "old").exists());
    }

    #[test]
    fn test_corrupt_package_keeps_old_tree() {
        let temp = TempDir::new().unwrap();
        let deb = temp.path().join("cursor.deb");
        fs::write(&deb, b"not a package").unwrap();
        let dir = temp.path().join("opt/cursor");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("cursor"), b"old").unwrap();

        assert!(install_tree(&deb, &[dir.clone()]).is_err());
        assert_eq!(fs::read(dir.join("cursor")).unwrap(), b"old");
        assert!(!sibling(&dir, "new").exists());
    }

    #[test]
    fn test_falls_back_to_next_candidate() {
        let temp = TempDir::new().unwrap();
        let deb = temp.path().join("cursor.deb");
        fs::write(&deb, editor_deb("2.0.69").unwrap()).unwrap();
        // Parent is a file, so staging next to it cannot work
        let blocked_parent = temp.path().join("blocked");
        fs::write(&blocked_parent, b"").unwrap();
        let blocked = blocked_parent.join("cursor");
        let fallback = temp.path().join("home/.local/share/cursor");
        fs::create_dir_all(fallback.parent().unwrap()).unwrap();

        let installed = install_tree(&deb, &[blocked, fallback.clone()]).unwrap();
        assert_eq!(installed, fallback);
        assert!(fallback.join("cursor").is_file());
    }
}
