//! Terminal observer: progress while a run is in flight and the
//! interactive confirmation prompt

use console::Term;
use indicatif::{ProgressBar, ProgressStyle};
use mup_common::{RunObserver, TargetKind, TargetStatus};
use owo_colors::OwoColorize;
use std::cell::RefCell;
use std::time::Duration;
use tracing::warn;

const SPINNER_TICK: Duration = Duration::from_millis(120);

pub struct TerminalObserver {
    color: bool,
    spinner: RefCell<Option<ProgressBar>>,
}

impl TerminalObserver {
    pub fn new(color: bool) -> Self {
        Self {
            color,
            spinner: RefCell::new(None),
        }
    }

    fn start_spinner(&self, message: String) {
        self.stop_spinner();
        let style = ProgressStyle::with_template("{spinner} {msg} ({elapsed})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let bar = ProgressBar::new_spinner().with_style(style).with_message(message);
        bar.enable_steady_tick(SPINNER_TICK);
        *self.spinner.borrow_mut() = Some(bar);
    }

    fn stop_spinner(&self) {
        if let Some(bar) = self.spinner.borrow_mut().take() {
            bar.finish_and_clear();
        }
    }

    fn say(&self, text: String) {
        if self.color {
            eprintln!("{}", text.dimmed());
        } else {
            eprintln!("{}", text);
        }
    }
}

impl RunObserver for TerminalObserver {
    fn on_transition(&self, kind: TargetKind, status: &TargetStatus) {
        match status {
            TargetStatus::Downloading => {
                self.start_spinner(format!("Downloading {}", kind.label()));
            }
            TargetStatus::Checking => {
                self.stop_spinner();
                self.say(format!(":: Checking {}", kind.label()));
            }
            TargetStatus::BackingUp | TargetStatus::Installing | TargetStatus::Restarting => {
                self.stop_spinner();
                self.say(format!("   {} {}", kind.label(), status));
            }
            _ => self.stop_spinner(),
        }
    }

    fn confirm(&self, kind: TargetKind, summary: &str) -> bool {
        self.stop_spinner();
        let term = Term::stderr();
        if !term.is_term() {
            warn!(target_name = kind.name(), "no terminal to confirm on, declining");
            return false;
        }
        let question = format!("{}: {}. Proceed? [y/N] ", kind.label(), summary);
        if term.write_str(&question).is_err() {
            return false;
        }
        match term.read_line() {
            Ok(answer) => is_yes(&answer),
            Err(_) => false,
        }
    }
}

impl Drop for TerminalObserver {
    fn drop(&mut self) {
        self.stop_spinner();
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y"));
        assert!(is_yes(" YES\n"));
        assert!(!is_yes(""));
        assert!(!is_yes("no"));
    }
}
