//! Tracing setup for mupctl
//!
//! Two sinks:
//! - stderr, human-readable, `warn` unless `--verbose` or `RUST_LOG` say otherwise
//! - the run log file, no ANSI, `info` (`debug` with `--verbose`)

use std::fs::File;
use std::io;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

pub struct LogOptions {
    pub verbose: bool,
    pub color: bool,
}

fn terminal_filter(verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
}

fn file_filter(verbose: bool) -> EnvFilter {
    EnvFilter::new(if verbose { "debug" } else { "info" })
}

/// Install the global subscriber. `run_log` is `None` for commands that do
/// not start a run.
pub fn init(options: &LogOptions, run_log: Option<File>) {
    let terminal = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(options.color)
        .with_target(false)
        .without_time()
        .with_filter(terminal_filter(options.verbose));

    let file = run_log.map(|file| {
        fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_filter(file_filter(options.verbose))
    });

    // A second init (tests) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(terminal)
        .with(file)
        .try_init();
}
