//! Retrying downloader
//!
//! Each attempt streams the artifact to its destination. An attempt only
//! counts when the transfer completes and the file is larger than the
//! integrity threshold, which catches truncated transfers and HTML error
//! pages. Failed attempts delete what they wrote before the next try.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use crate::http::HttpClient;

/// Pause between attempts
pub const DOWNLOAD_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Integrity threshold for the editor package
pub const EDITOR_MIN_BYTES: u64 = 50 * 1024 * 1024;

/// Integrity threshold for the service tarball
pub const SERVICE_MIN_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download of {url} failed after {attempts} attempt(s): {reason}")]
    Failed {
        url: String,
        attempts: u32,
        reason: String,
    },
}

/// Record of a finished download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadAttempt {
    pub url: String,
    pub destination: PathBuf,
    /// Attempts made, including the successful one
    pub retries_used: u32,
    pub max_retries: u32,
    pub min_size_bytes: u64,
    pub bytes: u64,
}

pub struct Downloader<'a> {
    http: &'a dyn HttpClient,
    max_retries: u32,
    delay: Duration,
}

impl<'a> Downloader<'a> {
    /// `max_retries` is the total number of attempts; zero is treated as one
    pub fn new(http: &'a dyn HttpClient, max_retries: u32) -> Self {
        Self {
            http,
            max_retries: max_retries.max(1),
            delay: DOWNLOAD_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Fetch `url` into `destination`. On error the destination does not
    /// exist.
    pub fn download(
        &self,
        url: &str,
        destination: &Path,
        min_size_bytes: u64,
    ) -> Result<DownloadAttempt, DownloadError> {
        if let Some(parent) = destination.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                return Err(DownloadError::Failed {
                    url: url.to_string(),
                    attempts: 0,
                    reason: format!("cannot create {}: {}", parent.display(), e),
                });
            }
        }

        let mut last_error = String::new();
        for attempt in 1..=self.max_retries {
            info!(url, attempt, max = self.max_retries, "downloading");
            match self.attempt(url, destination, min_size_bytes) {
                Ok(bytes) => {
                    info!(url, bytes, "download complete");
                    return Ok(DownloadAttempt {
                        url: url.to_string(),
                        destination: destination.to_path_buf(),
                        retries_used: attempt,
                        max_retries: self.max_retries,
                        min_size_bytes,
                        bytes,
                    });
                }
                Err(reason) => {
                    remove_partial(destination);
                    warn!(url, attempt, reason = %reason, "download attempt failed");
                    last_error = reason;
                    if attempt < self.max_retries {
                        thread::sleep(self.delay);
                    }
                }
            }
        }

        remove_partial(destination);
        Err(DownloadError::Failed {
            url: url.to_string(),
            attempts: self.max_retries,
            reason: last_error,
        })
    }

    fn attempt(&self, url: &str, destination: &Path, min_size_bytes: u64) -> Result<u64, String> {
        self.http
            .download(url, destination)
            .map_err(|e| e.to_string())?;
        let size = fs::metadata(destination)
            .map(|m| m.len())
            .map_err(|e| format!("downloaded file missing: {}", e))?;
        if size <= min_size_bytes {
            return Err(format!(
                "artifact is {} bytes, expected more than {}",
                size, min_size_bytes
            ));
        }
        Ok(size)
    }
}

fn remove_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial download"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHttp;
    use tempfile::TempDir;

    const URL: &str = "https://example.com/artifact.bin";

    #[test]
    fn test_success_first_try() {
        let temp = TempDir::new().unwrap();
        let http = FakeHttp::new();
        http.serve(URL, vec![7u8; 2048]);
        let dest = temp.path().join("artifact.bin");

        let done = Downloader::new(&http, 3)
            .with_retry_delay(Duration::ZERO)
            .download(URL, &dest, 1024)
            .unwrap();
        assert_eq!(done.retries_used, 1);
        assert_eq!(done.bytes, 2048);
        assert!(dest.exists());
    }

    #[test]
    fn test_recovers_after_transient_failures() {
        let temp = TempDir::new().unwrap();
        let http = FakeHttp::new();
        http.serve(URL, vec![1u8; 2048]);
        http.fail_downloads(URL, 2);
        let dest = temp.path().join("artifact.bin");

        let done = Downloader::new(&http, 3)
            .with_retry_delay(Duration::ZERO)
            .download(URL, &dest, 1024)
            .unwrap();
        assert_eq!(done.retries_used, 3);
        assert_eq!(http.download_count(), 3);
    }

    #[test]
    fn test_exactly_max_attempts_and_clean_slate() {
        let temp = TempDir::new().unwrap();
        let http = FakeHttp::new();
        http.fail_downloads(URL, u32::MAX);
        let dest = temp.path().join("artifact.bin");

        let err = Downloader::new(&http, 3)
            .with_retry_delay(Duration::ZERO)
            .download(URL, &dest, 0)
            .unwrap_err();
        let DownloadError::Failed { attempts, .. } = err;
        assert_eq!(attempts, 3);
        assert_eq!(http.download_count(), 3);
        assert!(!dest.exists());
    }

    #[test]
    fn test_undersized_artifact_rejected() {
        let temp = TempDir::new().unwrap();
        let http = FakeHttp::new();
        http.serve(URL, b"<html>error</html>".to_vec());
        let dest = temp.path().join("artifact.bin");

        let err = Downloader::new(&http, 2)
            .with_retry_delay(Duration::ZERO)
            .download(URL, &dest, 1024)
            .unwrap_err();
        assert!(err.to_string().contains("expected more than 1024"));
        assert!(!dest.exists());
    }

    #[test]
    fn test_zero_retries_means_one_attempt() {
        let temp = TempDir::new().unwrap();
        let http = FakeHttp::new();
        let downloader = Downloader::new(&http, 0).with_retry_delay(Duration::ZERO);
        assert_eq!(downloader.max_retries(), 1);
        assert!(downloader
            .download(URL, &temp.path().join("x"), 0)
            .is_err());
        assert_eq!(http.download_count(), 1);
    }
}
