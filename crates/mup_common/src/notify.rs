//! Desktop notification at the end of a run

use tracing::debug;

use crate::orchestrator::{RunResult, RunStatus};
use crate::system::{Invocation, SystemRunner};

/// Title and body for the summary notification
pub fn summary(result: &RunResult) -> (String, String) {
    let title = match result.status() {
        RunStatus::Success => "Multi-Updater: done",
        RunStatus::DownloadFailed => "Multi-Updater: download failed",
        RunStatus::Fatal => "Multi-Updater: system update failed",
    };
    let body = result
        .reports
        .iter()
        .filter(|r| r.is_updated() || r.is_failed())
        .map(|r| format!("{}: {}", r.kind().label(), r.summary_line()))
        .collect::<Vec<_>>();
    let body = if body.is_empty() {
        "Everything is up to date".to_string()
    } else {
        body.join("\n")
    };
    (title.to_string(), body)
}

/// Send the summary with `notify-send`. Best effort: a missing tool or a
/// headless session is not an error.
pub fn send_summary(system: &dyn SystemRunner, result: &RunResult) -> bool {
    if system.locate("notify-send").is_none() {
        debug!("notify-send not available, skipping notification");
        return false;
    }
    let (title, body) = summary(result);
    let urgency = match result.status() {
        RunStatus::Success => "normal",
        RunStatus::DownloadFailed | RunStatus::Fatal => "critical",
    };
    let invocation = Invocation::new(
        "notify-send",
        &["--app-name=Multi-Updater", "--urgency", urgency, title.as_str(), body.as_str()],
    )
    .as_user();
    match system.run(&invocation) {
        Ok(out) if out.success() => true,
        Ok(out) => {
            debug!(reason = %out.failure_reason(), "notification not shown");
            false
        }
        Err(e) => {
            debug!(error = %e, "notify-send could not run");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::CommandOutput;
    use crate::target::{Outcome, TargetKind, TargetReport, UpdateTarget};
    use crate::testing::FakeSystem;
    use chrono::Local;
    use uuid::Uuid;

    fn result(reports: Vec<TargetReport>) -> RunResult {
        let now = Local::now();
        RunResult {
            run_id: Uuid::new_v4(),
            reports,
            aborted_by: None,
            not_attempted: Vec::new(),
            started_at: now,
            finished_at: now,
            dry_run: false,
        }
    }

    #[test]
    fn test_summary_lists_changes_only() {
        let mut target = UpdateTarget::new(TargetKind::Editor);
        target.current_version = "2.0.60".to_string();
        target.latest_version = Some("2.0.69".to_string());
        let updated = TargetReport {
            target,
            outcome: Outcome::Updated,
            transitions: Vec::new(),
        };
        let current = TargetReport {
            target: UpdateTarget::new(TargetKind::SandboxApps),
            outcome: Outcome::UpToDate,
            transitions: Vec::new(),
        };
        let (title, body) = summary(&result(vec![updated, current]));
        assert_eq!(title, "Multi-Updater: done");
        assert_eq!(body, "Cursor: updated 2.0.60 → 2.0.69");

        let (_, body) = summary(&result(Vec::new()));
        assert_eq!(body, "Everything is up to date");
    }

    #[test]
    fn test_missing_notify_send_is_silent() {
        let system = FakeSystem::new();
        assert!(!send_summary(&system, &result(Vec::new())));
        assert!(system.calls().is_empty());

        system.install_program("notify-send");
        system.respond(
            "notify-send --app-name=Multi-Updater --urgency normal Multi-Updater: done Everything is up to date",
            CommandOutput::ok(""),
        );
        assert!(send_summary(&system, &result(Vec::new())));
    }
}
