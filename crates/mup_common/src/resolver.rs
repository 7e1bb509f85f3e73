//! Version resolution
//!
//! Installed and published versions come from different places per source:
//! - package database (`pacman -Q`)
//! - local `package.json` at the known install locations
//! - pending-update lines from pacman, the AUR helper or flatpak
//! - a redirect probe on the editor download endpoint
//! - a GitHub release index
//! - the service binary's own `--version`

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::http::HttpClient;
use crate::release::{fetch_release, Release};
use crate::system::{Invocation, SystemRunner};
use crate::version::{
    read_manifest_version, version_from_artifact_name, version_from_self_report, VersionError,
};

/// Result of a redirect probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbedArtifact {
    /// Final artifact URL after redirects
    pub url: String,
    pub version: String,
}

pub struct VersionResolver<'a> {
    system: &'a dyn SystemRunner,
    http: &'a dyn HttpClient,
}

impl<'a> VersionResolver<'a> {
    pub fn new(system: &'a dyn SystemRunner, http: &'a dyn HttpClient) -> Self {
        Self { system, http }
    }

    /// Installed version from the package database
    pub fn installed_package_version(&self, package: &str) -> Option<String> {
        let output = self
            .system
            .run(&Invocation::new("pacman", &["-Q", package]))
            .ok()?;
        if !output.success() {
            return None;
        }
        crate::classifier::parse_package_line(&output.stdout).map(|(_, v)| v)
    }

    /// First readable manifest among `candidates`, in order
    pub fn manifest_version(&self, candidates: &[PathBuf]) -> Option<(PathBuf, String)> {
        for path in candidates {
            match read_manifest_version(path) {
                Ok(version) => return Some((path.clone(), version)),
                Err(e) => debug!(path = %path.display(), error = %e, "no usable manifest"),
            }
        }
        None
    }

    /// Lines reported by a "list pending updates" command.
    ///
    /// pacman, checkupdates and the AUR helpers exit non-zero with empty
    /// output when nothing is pending; that counts as zero updates.
    pub fn pending_updates(&self, invocation: &Invocation) -> Result<Vec<String>, String> {
        let output = self
            .system
            .run(invocation)
            .map_err(|e| format!("{} could not run: {}", invocation.program, e))?;
        if output.success() {
            return Ok(output.lines());
        }
        if output.stdout.trim().is_empty() && output.stderr.trim().is_empty() {
            return Ok(Vec::new());
        }
        Err(format!(
            "{} failed ({})",
            invocation.command_line(),
            output.failure_reason()
        ))
    }

    /// Pending version of one AUR package, if the helper lists one.
    ///
    /// The presence of a line for the exact package name is the signal, not
    /// a comparison of version strings.
    pub fn community_pending(&self, helper: &str, package: &str) -> Result<Option<String>, String> {
        let lines = self.pending_updates(&Invocation::new(helper, &["-Qua"]).as_user())?;
        Ok(lines.iter().find_map(|line| pending_version_for(line, package)))
    }

    /// Follow the download endpoint and read the version from the final
    /// filename
    pub fn probe_artifact(&self, endpoint: &str) -> Result<ProbedArtifact, VersionError> {
        let url = self
            .http
            .resolve_redirect(endpoint)
            .map_err(|e| VersionError::Unavailable(e.to_string()))?;
        let version = version_from_artifact_name(&url)?;
        Ok(ProbedArtifact { url, version })
    }

    pub fn release(&self, index_url: &str) -> Result<Release, VersionError> {
        fetch_release(self.http, index_url)
    }

    /// Version printed by `<binary> --version`
    pub fn self_reported_version(&self, binary: &Path) -> Result<String, VersionError> {
        let program = binary.to_string_lossy().into_owned();
        let output = self
            .system
            .run(&Invocation::new(program, &["--version"]))
            .map_err(|e| VersionError::Unavailable(format!("{}: {}", binary.display(), e)))?;
        if !output.success() {
            return Err(VersionError::Unavailable(format!(
                "{} --version: {}",
                binary.display(),
                output.failure_reason()
            )));
        }
        version_from_self_report(&output.stdout)
    }
}

/// `name old -> new` (yay, paru, checkupdates) or `name old new`
fn pending_version_for(line: &str, package: &str) -> Option<String> {
    let mut parts = line.split_whitespace();
    if parts.next()? != package {
        return None;
    }
    parts.filter(|p| *p != "->").nth(1).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::CommandOutput;
    use crate::testing::{FakeHttp, FakeSystem};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_pending_line_parsing() {
        assert_eq!(
            pending_version_for("cursor-bin 2.0.60-1 -> 2.0.69-1", "cursor-bin"),
            Some("2.0.69-1".to_string())
        );
        assert_eq!(pending_version_for("cursor-bin-beta 1 -> 2", "cursor-bin"), None);
    }

    #[test]
    fn test_community_pending_exact_name() {
        let system = FakeSystem::new();
        system.respond(
            "yay -Qua",
            CommandOutput::ok("cursor-bin-git 1 -> 2\nspotify 1.2 -> 1.3\n"),
        );
        let http = FakeHttp::new();
        let resolver = VersionResolver::new(&system, &http);
        assert_eq!(resolver.community_pending("yay", "cursor-bin"), Ok(None));
        assert_eq!(
            resolver.community_pending("yay", "spotify"),
            Ok(Some("1.3".to_string()))
        );
    }

    #[test]
    fn test_pending_updates_empty_exit_is_zero() {
        let system = FakeSystem::new();
        let http = FakeHttp::new();
        let resolver = VersionResolver::new(&system, &http);
        let inv = Invocation::new("pacman", &["-Qu"]);
        assert_eq!(resolver.pending_updates(&inv), Ok(Vec::new()));

        system.respond("pacman -Qu", CommandOutput::failed(1, "error: db locked"));
        assert!(resolver.pending_updates(&inv).is_err());
    }

    #[test]
    fn test_manifest_candidates_first_match_wins() {
        let temp = TempDir::new().unwrap();
        let first = temp.path().join("a/package.json");
        let second = temp.path().join("b/package.json");
        fs::create_dir_all(second.parent().unwrap()).unwrap();
        fs::write(&second, r#"{"version":"1.2.3"}"#).unwrap();

        let system = FakeSystem::new();
        let http = FakeHttp::new();
        let resolver = VersionResolver::new(&system, &http);
        assert_eq!(
            resolver.manifest_version(&[first, second.clone()]),
            Some((second, "1.2.3".to_string()))
        );
    }

    #[test]
    fn test_probe_artifact() {
        let system = FakeSystem::new();
        let http = FakeHttp::new();
        http.redirect("https://dl/latest", "https://cdn/cursor_2.0.69_amd64.deb");
        let resolver = VersionResolver::new(&system, &http);

        let probed = resolver.probe_artifact("https://dl/latest").unwrap();
        assert_eq!(probed.version, "2.0.69");
        assert!(matches!(
            resolver.probe_artifact("https://dl/other"),
            Err(VersionError::Unavailable(_))
        ));
    }

    #[test]
    fn test_self_reported_version() {
        let system = FakeSystem::new();
        system.respond(
            "/opt/AdGuardHome/AdGuardHome --version",
            CommandOutput::ok("AdGuard Home, version v0.107.50\n"),
        );
        let http = FakeHttp::new();
        let resolver = VersionResolver::new(&system, &http);
        assert_eq!(
            resolver.self_reported_version(Path::new("/opt/AdGuardHome/AdGuardHome")),
            Ok("0.107.50".to_string())
        );
    }

    #[test]
    fn test_installed_package_version() {
        let system = FakeSystem::new();
        system.respond("pacman -Q cursor", CommandOutput::ok("cursor 2.0.69-1\n"));
        let http = FakeHttp::new();
        let resolver = VersionResolver::new(&system, &http);
        assert_eq!(
            resolver.installed_package_version("cursor"),
            Some("2.0.69-1".to_string())
        );
        assert_eq!(resolver.installed_package_version("code"), None);
    }
}
