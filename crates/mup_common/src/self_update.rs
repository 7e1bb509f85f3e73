//! Self-update hint
//!
//! Compares the running version with the tool's own latest GitHub release.
//! Only a hint is produced; the tool never replaces itself.

use tracing::{debug, info};

use crate::http::HttpClient;
use crate::release::{fetch_release, latest_release_url};
use crate::version::is_older;

/// Newer published version of this tool, if any
pub fn check_for_newer(http: &dyn HttpClient, repo: &str, running: &str) -> Option<String> {
    let url = latest_release_url(repo);
    let release = match fetch_release(http, &url) {
        Ok(release) => release,
        Err(e) => {
            debug!(repo, error = %e, "self-update check skipped");
            return None;
        }
    };
    if release.prerelease {
        return None;
    }
    let latest = release.version().ok()?;
    if is_older(running, &latest) {
        info!(running, latest = %latest, repo, "a newer Multi-Updater release is available");
        Some(latest)
    } else {
        None
    }
}
