//! Terminal output: per-target outcome lines, run summary, statistics

use chrono::{DateTime, Local};
use mup_common::orchestrator::skipped_targets;
use mup_common::stats::RunStats;
use mup_common::{Outcome, RunResult, RunStatus, TargetReport};
use owo_colors::OwoColorize;
use std::time::Duration;

/// Colors on or off for the whole output
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    pub color: bool,
}

impl Palette {
    fn good(&self, text: &str) -> String {
        if self.color {
            text.green().to_string()
        } else {
            text.to_string()
        }
    }

    fn warn(&self, text: &str) -> String {
        if self.color {
            text.yellow().to_string()
        } else {
            text.to_string()
        }
    }

    fn bad(&self, text: &str) -> String {
        if self.color {
            text.red().bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn dim(&self, text: &str) -> String {
        if self.color {
            text.dimmed().to_string()
        } else {
            text.to_string()
        }
    }

    fn heading(&self, text: &str) -> String {
        if self.color {
            text.bold().to_string()
        } else {
            text.to_string()
        }
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

fn outcome_line(report: &TargetReport, palette: Palette) -> String {
    let label = format!("{:<16}", report.kind().label());
    let summary = report.summary_line();
    let summary = match &report.outcome {
        Outcome::Updated => palette.good(&summary),
        Outcome::UpToDate => summary,
        Outcome::Skipped(_) => palette.dim(&summary),
        Outcome::Failed { .. } => palette.bad(&summary),
    };
    format!("  {} {}", label, summary)
}

/// Lines printed after a run
pub fn render_result(result: &RunResult, palette: Palette) -> Vec<String> {
    let mut lines = vec![palette.heading("Update summary")];
    lines.extend(result.reports.iter().map(|r| outcome_line(r, palette)));
    for kind in &result.not_attempted {
        lines.push(format!(
            "  {:<16} {}",
            kind.label(),
            palette.dim("not attempted")
        ));
    }

    let skipped = skipped_targets(result).count();
    let totals = format!(
        "{} updated, {} failed, {} skipped in {}",
        result.updated_count(),
        result.failed_count(),
        skipped,
        format_duration(result.duration())
    );
    let totals = match result.status() {
        RunStatus::Success => palette.good(&totals),
        RunStatus::DownloadFailed => palette.warn(&totals),
        RunStatus::Fatal => palette.bad(&totals),
    };
    lines.push(String::new());
    lines.push(if result.dry_run {
        format!("{} {}", totals, palette.dim("(dry run)"))
    } else {
        totals
    });
    if let Some(kind) = result.aborted_by {
        lines.push(palette.bad(&format!(
            "{} failed; remaining targets were not attempted",
            kind.label()
        )));
    }
    lines
}

pub fn print_result(result: &RunResult, palette: Palette) {
    println!();
    for line in render_result(result, palette) {
        println!("{}", line);
    }
}

fn format_timestamp(at: Option<DateTime<Local>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string())
}

/// Lines for `--stats`
pub fn render_stats(stats: &RunStats, palette: Palette) -> Vec<String> {
    let mut lines = vec![palette.heading("Update statistics")];
    if stats.total_updates == 0 {
        lines.push("  No runs recorded yet".to_string());
        return lines;
    }
    lines.push(format!("  Total runs:       {}", stats.total_updates));
    lines.push(format!("  Successful:       {}", stats.successful_updates));
    lines.push(format!("  Failed:           {}", stats.failed_updates));
    if let Some(rate) = stats.success_rate() {
        lines.push(format!("  Success rate:     {:.1}%", rate));
    }
    if let Some(avg) = stats.estimated_duration() {
        lines.push(format!("  Average duration: {}", format_duration(avg)));
    }
    lines.push(format!(
        "  Last run:         {}",
        format_timestamp(stats.last_update)
    ));
    lines.push(format!(
        "  Last duration:    {}",
        format_duration(Duration::from_secs_f64(stats.last_duration.max(0.0)))
    ));
    lines
}

pub fn print_stats(stats: &RunStats, palette: Palette) {
    for line in render_stats(stats, palette) {
        println!("{}", line);
    }
}
