//! Installation-method detection
//!
//! Decision order for software targets, never reordered:
//! 1. native package in the pacman database → package-manager
//! 2. foreign (AUR) package variant → community-repo
//! 3. known manual location, in priority order → manual
//! 4. not-installed
//!
//! Package-manager ownership wins because the system target already
//! updates those files.

use std::path::PathBuf;
use tracing::debug;

use crate::paths::Layout;
use crate::system::{Invocation, SystemRunner};
use crate::target::{Installation, TargetKind};

/// AUR helpers, in order of preference
pub const AUR_HELPERS: [&str; 2] = ["yay", "paru"];

/// What a manual install looks like on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// Application directory
    Dir,
    /// Single executable
    File,
}

/// Where a software target can live
#[derive(Debug, Clone, Copy)]
pub struct Footprint {
    pub native_package: &'static str,
    pub foreign_packages: &'static [&'static str],
    pub manual_candidates: &'static [&'static str],
    pub probe: Probe,
}

pub const EDITOR_FOOTPRINT: Footprint = Footprint {
    native_package: "cursor",
    foreign_packages: &["cursor-bin", "cursor-appimage"],
    manual_candidates: &[
        "/usr/share/cursor",
        "/opt/Cursor",
        "/opt/cursor",
        "~/.local/share/cursor",
    ],
    probe: Probe::Dir,
};

pub const SERVICE_FOOTPRINT: Footprint = Footprint {
    native_package: "adguardhome",
    foreign_packages: &["adguardhome", "adguardhome-bin", "adguard-home-bin"],
    manual_candidates: &[
        "/opt/AdGuardHome/AdGuardHome",
        "/usr/local/bin/AdGuardHome",
        "~/AdGuardHome/AdGuardHome",
        "~/.local/bin/AdGuardHome",
    ],
    probe: Probe::File,
};

/// Footprint of a software target; driver targets have none
pub fn footprint(kind: TargetKind) -> Option<&'static Footprint> {
    match kind {
        TargetKind::Editor => Some(&EDITOR_FOOTPRINT),
        TargetKind::NetworkService => Some(&SERVICE_FOOTPRINT),
        TargetKind::System | TargetKind::Community | TargetKind::SandboxApps => None,
    }
}

pub struct Classifier<'a> {
    system: &'a dyn SystemRunner,
    layout: &'a Layout,
}

impl<'a> Classifier<'a> {
    pub fn new(system: &'a dyn SystemRunner, layout: &'a Layout) -> Self {
        Self { system, layout }
    }

    pub fn classify(&self, kind: TargetKind) -> Installation {
        let installation = match kind {
            TargetKind::System => self.tool("pacman"),
            TargetKind::Community => match self.aur_helper() {
                Some(helper) => Installation::CommunityRepo {
                    package: None,
                    version: None,
                    helper: Some(helper),
                },
                None => Installation::NotInstalled,
            },
            TargetKind::SandboxApps => self.tool("flatpak"),
            TargetKind::Editor => self.software(&EDITOR_FOOTPRINT),
            TargetKind::NetworkService => self.software(&SERVICE_FOOTPRINT),
        };
        debug!(target_name = kind.name(), method = %installation.method(), "classified");
        installation
    }

    /// First installed AUR helper
    pub fn aur_helper(&self) -> Option<String> {
        AUR_HELPERS
            .iter()
            .find(|h| self.system.locate(h).is_some())
            .map(|h| h.to_string())
    }

    /// Existing manual locations in priority order
    pub fn manual_locations(&self, footprint: &Footprint) -> Vec<PathBuf> {
        footprint
            .manual_candidates
            .iter()
            .map(|c| self.layout.resolve(c))
            .filter(|p| match footprint.probe {
                Probe::Dir => p.is_dir(),
                Probe::File => p.is_file(),
            })
            .collect()
    }

    fn tool(&self, program: &str) -> Installation {
        match self.system.locate(program) {
            Some(_) => Installation::PackageManager {
                package: program.to_string(),
                version: None,
            },
            None => Installation::NotInstalled,
        }
    }

    fn software(&self, footprint: &Footprint) -> Installation {
        if let Some((package, version)) = self.query_owned("-Qn", footprint.native_package) {
            return Installation::PackageManager {
                package,
                version: Some(version),
            };
        }

        for candidate in footprint.foreign_packages {
            if let Some((package, version)) = self.query_owned("-Qm", candidate) {
                return Installation::CommunityRepo {
                    package: Some(package),
                    version: Some(version),
                    helper: self.aur_helper(),
                };
            }
        }

        match self.manual_locations(footprint).into_iter().next() {
            Some(location) => Installation::Manual { location },
            None => Installation::NotInstalled,
        }
    }

    /// `pacman -Qn <pkg>` / `pacman -Qm <pkg>` print `name version` when the
    /// package is installed from that source
    fn query_owned(&self, flag: &str, package: &str) -> Option<(String, String)> {
        let output = self
            .system
            .run(&Invocation::new("pacman", &[flag, package]))
            .ok()?;
        if !output.success() {
            return None;
        }
        parse_package_line(&output.stdout)
    }
}

/// First `name version` pair of pacman query output
pub fn parse_package_line(stdout: &str) -> Option<(String, String)> {
    let line = stdout.lines().find(|l| !l.trim().is_empty())?;
    let mut parts = line.split_whitespace();
    let name = parts.next()?;
    let version = parts.next()?;
    Some((name.to_string(), version.to_string()))
}
