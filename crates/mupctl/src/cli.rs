//! Command-line arguments

use clap::Parser;
use mup_common::TargetKind;
use std::path::PathBuf;

pub const VERSION: &str = env!("MUP_VERSION");

#[derive(Parser, Debug)]
#[command(name = "mupctl")]
#[command(about = "Multi-Updater - system, AUR, Cursor, AdGuard Home and Flatpak in one run", long_about = None)]
#[command(version = VERSION)]
pub struct Cli {
    /// Update a single target: system, aur, cursor, adguard or flatpak
    #[arg(long, value_name = "TARGET")]
    pub only: Option<TargetKind>,

    /// Check everything, change nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Ask before updating each target
    #[arg(short, long)]
    pub interactive: bool,

    /// Configuration file (default: $XDG_CONFIG_HOME/multi-updater/config.conf)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Debug output on the terminal
    #[arg(short, long)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Print statistics of previous runs and exit
    #[arg(long)]
    pub stats: bool,
}
