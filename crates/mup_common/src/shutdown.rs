//! Signal cleanup
//!
//! A listener thread waits for SIGINT, SIGTERM or SIGHUP while a run is in
//! progress. On delivery it removes the lock (if still ours) and the run's
//! scratch directory, then exits with [`EXIT_INTERRUPTED`]. There is no
//! in-flight cancellation: whatever subprocess or download was running is
//! abandoned.

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process;
use std::thread::{self, JoinHandle};
use tracing::warn;

use crate::lock;

/// 128 + SIGINT, the shell convention for an interrupted program
pub const EXIT_INTERRUPTED: i32 = 130;

/// Active listener; stops when dropped
pub struct SignalCleanup {
    handle: Handle,
    listener: Option<JoinHandle<()>>,
}

impl SignalCleanup {
    pub fn install(lock_path: PathBuf, scratch_dir: PathBuf) -> io::Result<Self> {
        let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
        let handle = signals.handle();

        let listener = thread::Builder::new()
            .name("mup-signal-listener".to_owned())
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    warn!(signal, "interrupted, cleaning up");
                    lock::clear_if_owned(&lock_path);
                    let _ = fs::remove_dir_all(&scratch_dir);
                    process::exit(EXIT_INTERRUPTED);
                }
            })?;

        Ok(Self {
            handle,
            listener: Some(listener),
        })
    }
}

impl Drop for SignalCleanup {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(listener) = self.listener.take() {
            if listener.join().is_err() {
                warn!("signal listener thread panicked while stopping");
            }
        }
    }
}
