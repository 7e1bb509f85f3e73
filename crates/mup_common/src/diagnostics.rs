//! Diagnostic bundle for fatal runs
//!
//! A plain-text file under `<state>/diagnostics/` with the per-target
//! outcomes, the effective configuration, a few facts about the machine and
//! the tail of the run log. Meant to be attached to a bug report as is.

use chrono::Local;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use sysinfo::System;
use tracing::{info, warn};

use crate::config::Settings;
use crate::orchestrator::RunResult;
use crate::run_log;

/// Log lines carried in a bundle
pub const LOG_TAIL_LINES: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentFacts {
    pub os_name: String,
    pub os_version: String,
    pub kernel: String,
    pub hostname: String,
    pub total_memory_bytes: u64,
    pub uid: u32,
}

impl EnvironmentFacts {
    pub fn collect() -> Self {
        let unknown = || "unknown".to_string();
        let mut sys = System::new();
        sys.refresh_memory();
        Self {
            os_name: System::name().unwrap_or_else(unknown),
            os_version: System::os_version().unwrap_or_else(unknown),
            kernel: System::kernel_version().unwrap_or_else(unknown),
            hostname: System::host_name().unwrap_or_else(unknown),
            total_memory_bytes: sys.total_memory(),
            uid: nix::unistd::getuid().as_raw(),
        }
    }

    fn render(&self, out: &mut String) {
        let _ = writeln!(out, "os:       {} {}", self.os_name, self.os_version);
        let _ = writeln!(out, "kernel:   {}", self.kernel);
        let _ = writeln!(out, "hostname: {}", self.hostname);
        let _ = writeln!(
            out,
            "memory:   {:.1} GiB",
            self.total_memory_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
        );
        let _ = writeln!(out, "uid:      {}", self.uid);
    }
}

/// Render the bundle text
pub fn render_bundle(
    result: &RunResult,
    settings: &Settings,
    facts: &EnvironmentFacts,
    log: Option<&Path>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Multi-Updater diagnostic bundle");
    let _ = writeln!(out, "run:      {}", result.run_id);
    let _ = writeln!(out, "started:  {}", result.started_at.to_rfc3339());
    let _ = writeln!(out, "status:   {:?}", result.status());

    out.push_str("\n== Targets ==\n");
    for report in &result.reports {
        let _ = writeln!(
            out,
            "{:<8} [{}] {}",
            report.kind().name(),
            report.target.install_method(),
            report.summary_line()
        );
    }
    for kind in &result.not_attempted {
        let _ = writeln!(out, "{:<8} not attempted", kind.name());
    }

    out.push_str("\n== Environment ==\n");
    facts.render(&mut out);

    out.push_str("\n== Configuration ==\n");
    for (key, value) in settings.to_entries() {
        let _ = writeln!(out, "{}={}", key, value);
    }

    let _ = writeln!(out, "\n== Log tail (last {} lines) ==", LOG_TAIL_LINES);
    match log.map(|path| (path, run_log::tail(path, LOG_TAIL_LINES))) {
        Some((_, Ok(lines))) => {
            for line in lines {
                out.push_str(&line);
                out.push('\n');
            }
        }
        Some((path, Err(e))) => {
            let _ = writeln!(out, "(cannot read {}: {})", path.display(), e);
        }
        None => out.push_str("(no run log)\n"),
    }
    out
}

/// Write a bundle into `dir`, returning its path
pub fn write_bundle(
    dir: &Path,
    result: &RunResult,
    settings: &Settings,
    log: Option<&Path>,
) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let facts = EnvironmentFacts::collect();
    let text = render_bundle(result, settings, &facts, log);
    let path = dir.join(format!(
        "diagnostic-{}.txt",
        Local::now().format("%Y%m%d-%H%M%S")
    ));
    match fs::write(&path, text) {
        Ok(()) => {
            info!(bundle = %path.display(), "diagnostic bundle written");
            Ok(path)
        }
        Err(e) => {
            warn!(bundle = %path.display(), error = %e, "cannot write diagnostic bundle");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{Outcome, TargetKind, TargetReport, TargetStatus, UpdateTarget};
    use tempfile::TempDir;
    use uuid::Uuid;

    fn fatal_result() -> RunResult {
        let now = Local::now();
        RunResult {
            run_id: Uuid::new_v4(),
            reports: vec![TargetReport {
                target: UpdateTarget::new(TargetKind::System),
                outcome: Outcome::Failed {
                    stage: TargetStatus::Installing,
                    reason: "exit status 1: conflicting files".to_string(),
                },
                transitions: vec![TargetStatus::Checking, TargetStatus::Installing, TargetStatus::Failed],
            }],
            aborted_by: Some(TargetKind::System),
            not_attempted: vec![TargetKind::Community, TargetKind::Editor],
            started_at: now,
            finished_at: now,
            dry_run: false,
        }
    }

    fn facts() -> EnvironmentFacts {
        EnvironmentFacts {
            os_name: "CachyOS".to_string(),
            os_version: "rolling".to_string(),
            kernel: "6.10.2-cachyos".to_string(),
            hostname: "desk".to_string(),
            total_memory_bytes: 32 * 1024 * 1024 * 1024,
            uid: 1000,
        }
    }

    #[test]
    fn test_bundle_sections() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("update.log");
        let lines: Vec<String> = (0..80).map(|i| format!("log line {}", i)).collect();
        fs::write(&log, lines.join("\n")).unwrap();

        let text = render_bundle(&fatal_result(), &Settings::default(), &facts(), Some(&log));
        assert!(text.contains("failed at installing: exit status 1: conflicting files"));
        assert!(text.contains("aur      not attempted"));
        assert!(text.contains("kernel:   6.10.2-cachyos"));
        assert!(text.contains("MAX_BACKUPS=3"));
        assert!(text.contains("log line 79"));
        assert!(text.contains("log line 30"));
        assert!(!text.contains("log line 29\n"));
    }

    #[test]
    fn test_write_bundle_without_log() {
        let temp = TempDir::new().unwrap();
        let path = write_bundle(
            &temp.path().join("diagnostics"),
            &fatal_result(),
            &Settings::default(),
            None,
        )
        .unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains("(no run log)"));
        assert!(text.contains("status:   Fatal"));
    }
}
