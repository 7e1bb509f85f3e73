//! Package-tool targets and package-owned software
//!
//! pacman, the AUR helper and flatpak all follow the same shape: list what
//! is pending, stop at the gate, then hand the terminal to the tool for the
//! upgrade itself. None of them produce an artifact, so there are no
//! Downloading or Verifying states.

use tracing::{debug, info, warn};

use super::{version_change, StepResult, TargetRun, UpdateExecutor};
use crate::artifact::EDITOR_MANIFEST_RELATIVE;
use crate::classifier::EDITOR_FOOTPRINT;
use crate::system::Invocation;
use crate::target::{Installation, Outcome, SkipReason, TargetKind, TargetStatus};

pub(super) fn update_system(exec: &UpdateExecutor, run: &mut TargetRun) -> StepResult {
    if run.target.installation == Installation::NotInstalled {
        return Ok(Outcome::Skipped(SkipReason::NotInstalled));
    }
    // checkupdates works on a private copy of the sync databases
    let check = if exec.ctx.system.locate("checkupdates").is_some() {
        Invocation::new("checkupdates", &[])
    } else {
        Invocation::new("pacman", &["-Qu"])
    };
    let mut args = vec!["-Syu"];
    if exec.ctx.settings.pacman_noconfirm {
        args.push("--noconfirm");
    }
    let upgrade = Invocation::new("pacman", &args).as_root().streamed();
    drive(exec, run, check, upgrade)
}

pub(super) fn update_community(exec: &UpdateExecutor, run: &mut TargetRun) -> StepResult {
    let helper = match &run.target.installation {
        Installation::CommunityRepo {
            helper: Some(helper),
            ..
        } => helper.clone(),
        _ => return Ok(Outcome::Skipped(SkipReason::NotInstalled)),
    };
    let check = Invocation::new(helper.as_str(), &["-Qua"]).as_user();
    let upgrade = Invocation::new(helper.as_str(), &["-Sua", "--noconfirm"])
        .as_user()
        .streamed();
    drive(exec, run, check, upgrade)
}

pub(super) fn update_sandbox(exec: &UpdateExecutor, run: &mut TargetRun) -> StepResult {
    if run.target.installation == Installation::NotInstalled {
        return Ok(Outcome::Skipped(SkipReason::NotInstalled));
    }
    let check = Invocation::new("flatpak", &["remote-ls", "--updates", "--columns=application"]);
    let upgrade = Invocation::new("flatpak", &["update", "-y", "--noninteractive"]).streamed();
    drive(exec, run, check, upgrade)
}

fn drive(
    exec: &UpdateExecutor,
    run: &mut TargetRun,
    check: Invocation,
    upgrade: Invocation,
) -> StepResult {
    let pending = exec
        .resolver()
        .pending_updates(&check)
        .map_err(|e| run.fail(e))?;
    run.target.package_count = pending.len();

    if pending.is_empty() {
        info!(target_name = run.target.name(), "nothing pending");
        return Ok(Outcome::UpToDate);
    }
    for line in &pending {
        debug!(target_name = run.target.name(), pending = %line);
    }

    let summary = format!("{}: {} package(s) to update", run.kind().label(), pending.len());
    if let Some(outcome) = exec.gate(run, &summary) {
        return Ok(outcome);
    }

    run.enter(TargetStatus::Installing);
    run_tool(exec, run, &upgrade)?;
    Ok(Outcome::Updated)
}

fn run_tool(exec: &UpdateExecutor, run: &TargetRun, invocation: &Invocation) -> Result<(), super::StepFailure> {
    let output = exec
        .ctx
        .system
        .run(invocation)
        .map_err(|e| run.fail(format!("{} could not run: {}", invocation.program, e)))?;
    if !output.success() {
        return Err(run.fail(format!(
            "{} failed ({})",
            invocation.command_line(),
            output.failure_reason()
        )));
    }
    Ok(())
}

/// Software targets owned by a package.
///
/// Returns `None` for manual and missing installs, which the caller handles.
/// A native package is left to the system target; an AUR package is
/// upgraded on its own when the helper lists it as pending.
pub(super) fn update_owned(exec: &UpdateExecutor, run: &mut TargetRun) -> Option<StepResult> {
    match run.target.installation.clone() {
        Installation::PackageManager { package, version } => {
            let current = version.or_else(|| exec.resolver().installed_package_version(&package));
            if let Some(current) = current {
                run.target.current_version = current;
            }
            info!(
                target_name = run.target.name(),
                package = %package,
                "owned by the system package database, updated with system packages"
            );
            Some(Ok(Outcome::UpToDate))
        }
        Installation::CommunityRepo {
            package: Some(package),
            version,
            helper,
        } => {
            if let Some(current) = local_version(exec, run.kind()).or(version) {
                run.target.current_version = current;
            }
            Some(update_community_package(exec, run, &package, helper))
        }
        _ => None,
    }
}

fn update_community_package(
    exec: &UpdateExecutor,
    run: &mut TargetRun,
    package: &str,
    helper: Option<String>,
) -> StepResult {
    let Some(helper) = helper else {
        warn!(
            target_name = run.target.name(),
            package,
            "installed from the AUR but no AUR helper is available"
        );
        return Ok(Outcome::Skipped(SkipReason::NoHelper));
    };

    let pending = exec
        .resolver()
        .community_pending(&helper, package)
        .map_err(|e| run.fail(e))?;
    let Some(latest) = pending else {
        run.target.latest_version = Some(run.target.current_version.clone());
        return Ok(Outcome::UpToDate);
    };
    run.target.latest_version = Some(latest);

    let summary = version_change(&run.target);
    if let Some(outcome) = exec.gate(run, &summary) {
        return Ok(outcome);
    }

    run.enter(TargetStatus::Installing);
    let install = Invocation::new(helper.as_str(), &["-S", "--noconfirm", package])
        .as_user()
        .streamed();
    run_tool(exec, run, &install)?;
    Ok(Outcome::Updated)
}

/// Version from on-disk metadata, for package-owned installs
fn local_version(exec: &UpdateExecutor, kind: TargetKind) -> Option<String> {
    match kind {
        TargetKind::Editor => {
            let manifests: Vec<_> = EDITOR_FOOTPRINT
                .manual_candidates
                .iter()
                .map(|c| exec.ctx.layout.resolve(c).join(EDITOR_MANIFEST_RELATIVE))
                .collect();
            exec.resolver().manifest_version(&manifests).map(|(_, v)| v)
        }
        TargetKind::NetworkService => {
            let binary = exec.ctx.system.locate("AdGuardHome")?;
            exec.resolver().self_reported_version(&binary).ok()
        }
        TargetKind::System | TargetKind::Community | TargetKind::SandboxApps => None,
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Settings;
    use crate::executor::UpdateExecutor;
    use crate::orchestrator::{RunContext, RunOptions};
    use crate::paths::Layout;
    use crate::system::CommandOutput;
    use crate::target::{Outcome, SkipReason, TargetKind, TargetStatus};
    use crate::testing::{FakeHttp, FakeSystem};
    use crate::SilentObserver;
    use tempfile::TempDir;

    fn run_target(
        system: &FakeSystem,
        settings: &Settings,
        options: RunOptions,
        kind: TargetKind,
    ) -> crate::target::TargetReport {
        let temp = TempDir::new().unwrap();
        let layout = Layout::rooted(temp.path());
        let http = FakeHttp::new();
        let ctx = RunContext {
            settings,
            layout: &layout,
            system,
            http: &http,
            observer: &SilentObserver,
            options,
        };
        UpdateExecutor::new(&ctx, temp.path()).execute(kind)
    }

    #[test]
    fn test_system_upgrade_runs_after_check() {
        let system = FakeSystem::new();
        system.install_program("pacman");
        system.respond("pacman -Qu", CommandOutput::ok("linux 6.1-1 -> 6.2-1\nmesa 1 -> 2\n"));
        system.respond("pacman -Syu --noconfirm", CommandOutput::ok(""));

        let report = run_target(&system, &Settings::default(), RunOptions::default(), TargetKind::System);
        assert_eq!(report.outcome, Outcome::Updated);
        assert_eq!(report.target.package_count, 2);
        assert_eq!(
            report.transitions,
            vec![
                TargetStatus::Checking,
                TargetStatus::Installing,
                TargetStatus::Completed
            ]
        );
        assert_eq!(report.summary_line(), "updated 2 package(s)");
    }

    #[test]
    fn test_system_failure_is_reported_at_installing() {
        let system = FakeSystem::new();
        system.install_program("pacman");
        system.respond("pacman -Qu", CommandOutput::ok("linux 6.1-1 -> 6.2-1\n"));
        system.respond(
            "pacman -Syu --noconfirm",
            CommandOutput::failed(1, "error: failed to commit transaction"),
        );

        let report = run_target(&system, &Settings::default(), RunOptions::default(), TargetKind::System);
        assert!(report.is_fatal());
        match report.outcome {
            Outcome::Failed { stage, reason } => {
                assert_eq!(stage, TargetStatus::Installing);
                assert!(reason.contains("failed to commit transaction"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_nothing_pending_is_up_to_date() {
        let system = FakeSystem::new();
        system.install_program("flatpak");
        system.respond("flatpak remote-ls --updates --columns=application", CommandOutput::ok(""));

        let report = run_target(&system, &Settings::default(), RunOptions::default(), TargetKind::SandboxApps);
        assert_eq!(report.outcome, Outcome::UpToDate);
        assert!(!system.ran("flatpak update -y --noninteractive"));
    }

    #[test]
    fn test_dry_run_counts_but_does_not_upgrade() {
        let system = FakeSystem::new();
        system.install_program("yay");
        system.respond("yay -Qua", CommandOutput::ok("spotify 1.2 -> 1.3\n"));
        let options = RunOptions {
            dry_run: true,
            ..RunOptions::default()
        };

        let report = run_target(&system, &Settings::default(), options, TargetKind::Community);
        assert_eq!(report.outcome, Outcome::Skipped(SkipReason::DryRun));
        assert_eq!(report.summary_line(), "would update 1 package(s) (dry run)");
        assert!(!system.ran("yay -Sua --noconfirm"));
    }

    #[test]
    fn test_native_package_editor_is_left_to_system() {
        let system = FakeSystem::new();
        system.respond("pacman -Qn cursor", CommandOutput::ok("cursor 2.0.69-1\n"));

        let report = run_target(&system, &Settings::default(), RunOptions::default(), TargetKind::Editor);
        assert_eq!(report.outcome, Outcome::UpToDate);
        assert_eq!(report.target.current_version, "2.0.69-1");
        assert_eq!(
            report.summary_line(),
            "already current (handled by system packages)"
        );
    }

    #[test]
    fn test_aur_editor_upgrades_only_when_listed() {
        let system = FakeSystem::new();
        system.install_program("yay");
        system.respond("pacman -Qm cursor-bin", CommandOutput::ok("cursor-bin 2.0.60-1\n"));
        system.respond("yay -Qua", CommandOutput::ok("cursor-bin 2.0.60-1 -> 2.0.69-1\n"));
        system.respond("yay -S --noconfirm cursor-bin", CommandOutput::ok(""));

        let report = run_target(&system, &Settings::default(), RunOptions::default(), TargetKind::Editor);
        assert_eq!(report.outcome, Outcome::Updated);
        assert_eq!(report.summary_line(), "updated 2.0.60-1 → 2.0.69-1");
        assert!(system.ran("yay -S --noconfirm cursor-bin"));
    }

    #[test]
    fn test_aur_service_without_helper_is_skipped() {
        let system = FakeSystem::new();
        system.respond(
            "pacman -Qm adguardhome-bin",
            CommandOutput::ok("adguardhome-bin 0.107.52-1\n"),
        );

        let report = run_target(
            &system,
            &Settings::default(),
            RunOptions::default(),
            TargetKind::NetworkService,
        );
        assert_eq!(report.outcome, Outcome::Skipped(SkipReason::NoHelper));
    }
}
