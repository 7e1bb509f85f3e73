// GitHub release index
//
// Typed view of `/releases/latest`. Used for the AdGuard Home target and for
// the self-update hint.

use serde::{Deserialize, Serialize};

use crate::http::HttpClient;
use crate::version::{version_from_release_tag, VersionError};

/// GitHub release information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
}

impl Release {
    /// Parse a release document
    pub fn from_json(json: &str) -> Result<Self, VersionError> {
        serde_json::from_str(json).map_err(|e| VersionError::Malformed {
            origin: "release index".to_string(),
            value: e.to_string(),
        })
    }

    /// Version from the tag (leading 'v' stripped)
    pub fn version(&self) -> Result<String, VersionError> {
        version_from_release_tag(&self.tag_name)
    }

    /// Find asset by exact name
    pub fn find_asset(&self, name: &str) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|a| a.name == name)
    }
}

/// `https://api.github.com/repos/<owner>/<repo>/releases/latest`
pub fn latest_release_url(repo: &str) -> String {
    format!("https://api.github.com/repos/{}/releases/latest", repo)
}

/// Fetch and parse a release index
pub fn fetch_release(http: &dyn HttpClient, url: &str) -> Result<Release, VersionError> {
    let body = http
        .get_text(url)
        .map_err(|e| VersionError::Unavailable(e.to_string()))?;
    Release::from_json(&body)
}
