//! HTTP seam
//!
//! Three operations cover every network need of a run: following a download
//! redirect without fetching the body, fetching a small JSON document, and
//! streaming an artifact to disk.

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, LOCATION};
use reqwest::redirect::Policy;
use reqwest::Url;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Redirect hops followed by [`HttpClient::resolve_redirect`]
pub const MAX_REDIRECT_HOPS: usize = 5;

const METADATA_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} did not redirect to an artifact")]
    NoRedirect { url: String },

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub trait HttpClient {
    /// Follow `Location` headers from `url` and return the final URL
    fn resolve_redirect(&self, url: &str) -> Result<String, HttpError>;

    /// GET a small text document
    fn get_text(&self, url: &str) -> Result<String, HttpError>;

    /// Stream `url` into `destination`, returning the bytes written
    fn download(&self, url: &str, destination: &Path) -> Result<u64, HttpError>;
}

/// Blocking reqwest client
pub struct HostHttp {
    client: Client,
    metadata: Client,
    probe: Client,
}

impl HostHttp {
    pub fn new() -> Result<Self, HttpError> {
        let user_agent = format!("multi-updater/{}", env!("CARGO_PKG_VERSION"));
        let build_error = |e: reqwest::Error| HttpError::Transport {
            url: "<client>".to_string(),
            reason: e.to_string(),
        };

        // Artifact downloads rely on the retry bound, not a total timeout
        let client = Client::builder()
            .user_agent(user_agent.clone())
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None::<Duration>)
            .build()
            .map_err(build_error)?;

        let metadata = Client::builder()
            .user_agent(user_agent.clone())
            .timeout(METADATA_TIMEOUT)
            .build()
            .map_err(build_error)?;

        let probe = Client::builder()
            .user_agent(user_agent)
            .timeout(METADATA_TIMEOUT)
            .redirect(Policy::none())
            .build()
            .map_err(build_error)?;

        Ok(Self {
            client,
            metadata,
            probe,
        })
    }
}

fn transport(url: &str, e: reqwest::Error) -> HttpError {
    HttpError::Transport {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

impl HttpClient for HostHttp {
    fn resolve_redirect(&self, url: &str) -> Result<String, HttpError> {
        let mut current = Url::parse(url).map_err(|e| HttpError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        for _ in 0..MAX_REDIRECT_HOPS {
            let response = self
                .probe
                .head(current.clone())
                .send()
                .map_err(|e| transport(current.as_str(), e))?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| HttpError::NoRedirect {
                        url: current.to_string(),
                    })?;
                let next = current.join(location).map_err(|e| HttpError::Transport {
                    url: current.to_string(),
                    reason: format!("bad Location header '{}': {}", location, e),
                })?;
                debug!(from = %current, to = %next, "redirect");
                current = next;
                continue;
            }

            if !status.is_success() {
                return Err(HttpError::Status {
                    url: current.to_string(),
                    status: status.as_u16(),
                });
            }
            if current.as_str() == url {
                return Err(HttpError::NoRedirect {
                    url: url.to_string(),
                });
            }
            return Ok(current.to_string());
        }

        Err(HttpError::NoRedirect {
            url: url.to_string(),
        })
    }

    fn get_text(&self, url: &str) -> Result<String, HttpError> {
        let response = self
            .metadata
            .get(url)
            .header(ACCEPT, "application/vnd.github+json, application/json")
            .send()
            .map_err(|e| transport(url, e))?;

        if !response.status().is_success() {
            return Err(HttpError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        response.text().map_err(|e| transport(url, e))
    }

    fn download(&self, url: &str, destination: &Path) -> Result<u64, HttpError> {
        let mut response = self.client.get(url).send().map_err(|e| transport(url, e))?;
        if !response.status().is_success() {
            return Err(HttpError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let mut file = File::create(destination).map_err(|source| HttpError::Io {
            path: destination.to_path_buf(),
            source,
        })?;
        let written = response
            .copy_to(&mut file)
            .map_err(|e| transport(url, e))?;
        file.sync_all().map_err(|source| HttpError::Io {
            path: destination.to_path_buf(),
            source,
        })?;
        Ok(written)
    }
}
