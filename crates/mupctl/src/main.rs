//! Multi-Updater control - one run over system packages, AUR, Cursor,
//! AdGuard Home and Flatpak

mod cli;
mod errors;
mod logging;
mod prompt;
mod report;

use anyhow::{Context, Result};
use chrono::Local;
use clap::error::ErrorKind;
use clap::Parser;
use mup_common::config;
use mup_common::diagnostics;
use mup_common::http::HostHttp;
use mup_common::notify;
use mup_common::run_log::{staleness_days, RunLogDir};
use mup_common::self_update;
use mup_common::stats::StatsStore;
use mup_common::system::HostSystem;
use mup_common::{
    LockManager, Layout, Orchestrator, RunContext, RunError, RunOptions, RunStatus,
};
use std::fs;
use std::io::IsTerminal;
use std::path::Path;
use std::process;
use tracing::{error, info, warn};

use cli::{Cli, VERSION};
use errors::*;
use logging::LogOptions;
use prompt::TerminalObserver;
use report::{format_duration, Palette};

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("mupctl: {:#}", e);
            EXIT_START_FAILED
        }
    };
    process::exit(code);
}

fn run() -> Result<i32> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return Ok(match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_SUCCESS,
                _ => EXIT_USAGE,
            });
        }
    };

    let layout = Layout::discover();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| layout.config_file.clone());
    let loaded = match config::load(&config_path, cli.config.is_some()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("mupctl: {}", e);
            return Ok(EXIT_CONFIG);
        }
    };
    let settings = loaded.settings;

    let color = settings.colors && !cli.no_color && std::io::stdout().is_terminal();
    let palette = Palette { color };
    let log_options = LogOptions {
        verbose: cli.verbose,
        color,
    };
    let stats = StatsStore::new(layout.stats_file());

    if cli.stats {
        logging::init(&log_options, None);
        report::print_stats(&stats.load(), palette);
        return Ok(EXIT_SUCCESS);
    }

    let logs = RunLogDir::new(layout.logs_dir());
    // Read before this run's own log file exists
    let previous_run = logs.latest_run_at();
    let started = Local::now();
    let (log_path, log_file) = logs
        .create_run_log(started)
        .with_context(|| format!("cannot create run log in {}", logs.dir().display()))?;
    logging::init(&log_options, Some(log_file));

    info!(version = VERSION, config = ?loaded.source, "Multi-Updater starting");
    for warning in &loaded.warnings {
        warn!(file = %config_path.display(), "{}", warning);
    }
    if let Some(days) = previous_run.and_then(|last| staleness_days(last, started)) {
        warn!(days, "last update run was {} days ago", days);
    }
    if let Some(estimate) = stats.load().estimated_duration() {
        eprintln!("Estimated duration: {}", format_duration(estimate));
    }

    let system = HostSystem::new();
    let http = HostHttp::new().context("cannot set up the HTTP client")?;

    if settings.auto_update {
        if let Some(newer) = self_update::check_for_newer(&http, &settings.github_repo, VERSION) {
            eprintln!(
                "A newer Multi-Updater is available: {} (running {})",
                newer, VERSION
            );
        }
    }

    let observer = TerminalObserver::new(color);
    let options = RunOptions {
        dry_run: cli.dry_run,
        interactive: cli.interactive,
        only: cli.only,
        trap_signals: true,
        ..RunOptions::default()
    };
    let ctx = RunContext {
        settings: &settings,
        layout: &layout,
        system: &system,
        http: &http,
        observer: &observer,
        options,
    };

    let result = match Orchestrator::new(ctx, LockManager::new(&layout.lock_file)).run() {
        Ok(result) => result,
        Err(RunError::Lock(e)) => {
            error!(error = %e, "refusing to start");
            eprintln!("mupctl: {}", e);
            // A refused run leaves no trace in the run history
            discard_run_log(&log_path);
            return Ok(EXIT_LOCK_HELD);
        }
        Err(e) => return Err(e).context("update run could not start"),
    };
    drop(observer);

    report::print_result(&result, palette);

    let status = result.status();
    if !result.dry_run {
        let success = status == RunStatus::Success;
        if let Err(e) = stats.record(success, result.duration()) {
            warn!(path = %stats.path().display(), error = %e, "cannot save statistics");
        }
    }
    logs.prune(settings.max_log_files);

    if settings.notifications && !result.dry_run {
        notify::send_summary(&system, &result);
    }

    if status == RunStatus::Fatal {
        match diagnostics::write_bundle(&layout.diagnostics_dir(), &result, &settings, Some(&log_path)) {
            Ok(path) => eprintln!("Diagnostic bundle written to {}", path.display()),
            Err(e) => warn!(error = %e, "no diagnostic bundle"),
        }
    }

    let code = exit_code_for(status);
    info!(run_id = %result.run_id, ?status, code, "Multi-Updater finished");
    Ok(code)
}

fn discard_run_log(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!(log = %path.display(), error = %e, "cannot remove run log");
    }
}
