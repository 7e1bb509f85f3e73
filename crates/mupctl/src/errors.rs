//! Exit status for mupctl
//!
//! A run that fails in several ways reports the most severe one: a fatal
//! system upgrade outranks a failed download, which outranks success.

use mup_common::RunStatus;

/// Exit code for success, including skipped targets and local failures
/// outside of downloading
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code when the lock could not be acquired
pub const EXIT_LOCK_HELD: i32 = 1;

/// Exit code when the configuration file cannot be read
pub const EXIT_CONFIG: i32 = 2;

/// Exit code when at least one target failed while downloading
pub const EXIT_DOWNLOAD_FAILED: i32 = 3;

/// Exit code when the system upgrade failed and the run was aborted
pub const EXIT_FATAL: i32 = 4;

/// Exit code for an unknown flag or a malformed argument
pub const EXIT_USAGE: i32 = 64;

/// Exit code when the run could not start for any other reason (run log,
/// HTTP client, scratch directory)
pub const EXIT_START_FAILED: i32 = 70;

pub fn exit_code_for(status: RunStatus) -> i32 {
    match status {
        RunStatus::Success => EXIT_SUCCESS,
        RunStatus::DownloadFailed => EXIT_DOWNLOAD_FAILED,
        RunStatus::Fatal => EXIT_FATAL,
    }
}
