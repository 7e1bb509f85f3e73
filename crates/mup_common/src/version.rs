//! Version strings: extraction and comparison
//!
//! Equality after stripping build suffixes decides whether a target is
//! current. Directional ordering is only used where a caller needs to know
//! which side is ahead.

use regex::Regex;
use serde::Deserialize;
use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

/// Placeholder for a version that could not be read
pub const UNKNOWN_VERSION: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("no version found in {0}")]
    NotFound(String),

    #[error("malformed version '{value}' in {origin}")]
    Malformed { origin: String, value: String },

    #[error("version source unavailable: {0}")]
    Unavailable(String),
}

/// Drop a leading `v` and anything after the first `-` or `+`.
///
/// `2.1.39-1` (pacman pkgrel) and `2.1.39+build.7` both become `2.1.39`.
pub fn strip_build_suffix(version: &str) -> &str {
    let trimmed = version.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    match trimmed.find(['-', '+']) {
        Some(idx) => &trimmed[..idx],
        None => trimmed,
    }
}

/// True when both versions are known and equal after suffix stripping
pub fn versions_match(a: &str, b: &str) -> bool {
    if is_unknown(a) || is_unknown(b) {
        return false;
    }
    strip_build_suffix(a) == strip_build_suffix(b)
}

pub fn is_unknown(version: &str) -> bool {
    let v = version.trim();
    v.is_empty() || v == UNKNOWN_VERSION
}

/// Dot-separated numeric ordering on suffix-stripped input.
///
/// Missing components count as zero. When every numeric component agrees,
/// the stripped strings themselves decide.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a = strip_build_suffix(a);
    let b = strip_build_suffix(b);
    let left: Vec<u64> = a.split('.').map(leading_number).collect();
    let right: Vec<u64> = b.split('.').map(leading_number).collect();

    let len = left.len().max(right.len());
    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.cmp(b)
}

/// `current` is strictly behind `latest`
pub fn is_older(current: &str, latest: &str) -> bool {
    compare_versions(current, latest) == Ordering::Less
}

fn leading_number(part: &str) -> u64 {
    let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

fn plausible(version: &str) -> bool {
    let stripped = strip_build_suffix(version);
    stripped.chars().next().is_some_and(|c| c.is_ascii_digit())
        && stripped
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.')
}

fn validated(origin: &str, raw: &str) -> Result<String, VersionError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(VersionError::NotFound(origin.to_string()));
    }
    if !plausible(value) {
        return Err(VersionError::Malformed {
            origin: origin.to_string(),
            value: value.to_string(),
        });
    }
    Ok(value.trim_start_matches(['v', 'V']).to_string())
}

fn artifact_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)cursor[_-]v?([0-9]+(?:\.[0-9]+)+)").ok())
        .as_ref()
}

fn self_report_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"v([0-9]+(?:\.[0-9]+)+)").ok())
        .as_ref()
}

/// Version encoded in a download filename or URL, e.g.
/// `.../cursor_2.0.69_amd64.deb`
pub fn version_from_artifact_name(name: &str) -> Result<String, VersionError> {
    let file = name
        .split(['?', '#'])
        .next()
        .unwrap_or(name)
        .rsplit('/')
        .next()
        .unwrap_or(name);
    let caps = artifact_pattern()
        .and_then(|re| re.captures(file))
        .ok_or_else(|| VersionError::NotFound(format!("artifact name '{}'", file)))?;
    validated("artifact name", &caps[1])
}

/// Version from a release tag such as `v0.107.52`
pub fn version_from_release_tag(tag: &str) -> Result<String, VersionError> {
    validated("release tag", tag)
}

/// Version from a binary's `--version` output, e.g.
/// `AdGuard Home, version v0.107.52`
pub fn version_from_self_report(output: &str) -> Result<String, VersionError> {
    if output.trim().is_empty() {
        return Err(VersionError::NotFound("version output".to_string()));
    }
    let caps = self_report_pattern()
        .and_then(|re| re.captures(output))
        .ok_or_else(|| VersionError::Malformed {
            origin: "version output".to_string(),
            value: output.lines().next().unwrap_or_default().trim().to_string(),
        })?;
    validated("version output", &caps[1])
}

#[derive(Debug, Deserialize)]
struct PackageManifest {
    version: Option<String>,
}

/// Version field of an Electron `package.json`
pub fn version_from_manifest(json: &str) -> Result<String, VersionError> {
    let manifest: PackageManifest =
        serde_json::from_str(json).map_err(|e| VersionError::Malformed {
            origin: "package.json".to_string(),
            value: e.to_string(),
        })?;
    let version = manifest
        .version
        .ok_or_else(|| VersionError::NotFound("package.json".to_string()))?;
    validated("package.json", &version)
}

/// Read and parse a `package.json` on disk
pub fn read_manifest_version(path: &Path) -> Result<String, VersionError> {
    let json = fs::read_to_string(path)
        .map_err(|e| VersionError::Unavailable(format!("{}: {}", path.display(), e)))?;
    version_from_manifest(&json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_stripped_equality() {
        assert!(versions_match("2.1.39-1", "2.1.39"));
        assert!(versions_match("v0.107.52", "0.107.52"));
        assert!(!versions_match("2.1.39", "2.1.40"));
    }

    #[test]
    fn test_unknown_never_matches() {
        assert!(!versions_match(UNKNOWN_VERSION, UNKNOWN_VERSION));
        assert!(!versions_match("", "1.0"));
    }

    #[test]
    fn test_numeric_ordering() {
        assert!(is_older("2.0.69", "2.1.0"));
        assert!(is_older("1.9", "1.10"));
        assert_eq!(compare_versions("2.1.39-1", "2.1.39"), Ordering::Equal);
        assert_eq!(compare_versions("3.0", "2.99.99"), Ordering::Greater);
    }

    #[test]
    fn test_tie_broken_by_string() {
        assert_eq!(compare_versions("1.0", "1.0.0"), Ordering::Less);
    }

    #[test]
    fn test_artifact_name() {
        assert_eq!(
            version_from_artifact_name(
                "https://downloads.cursor.com/production/abc/linux/x64/deb/amd64/deb/cursor_2.0.69_amd64.deb"
            ),
            Ok("2.0.69".to_string())
        );
        assert_eq!(
            version_from_artifact_name("Cursor-1.7.44-x86_64.AppImage?sig=1"),
            Ok("1.7.44".to_string())
        );
        assert!(matches!(
            version_from_artifact_name("latest"),
            Err(VersionError::NotFound(_))
        ));
    }

    #[test]
    fn test_self_report() {
        assert_eq!(
            version_from_self_report("AdGuard Home, version v0.107.52\n"),
            Ok("0.107.52".to_string())
        );
        assert!(matches!(
            version_from_self_report("command not found"),
            Err(VersionError::Malformed { .. })
        ));
        assert!(matches!(
            version_from_self_report(""),
            Err(VersionError::NotFound(_))
        ));
    }

    #[test]
    fn test_manifest() {
        assert_eq!(
            version_from_manifest(r#"{"name":"cursor","version":"2.0.60"}"#),
            Ok("2.0.60".to_string())
        );
        assert!(matches!(
            version_from_manifest(r#"{"name":"cursor"}"#),
            Err(VersionError::NotFound(_))
        ));
        assert!(matches!(
            version_from_manifest("not json"),
            Err(VersionError::Malformed { .. })
        ));
    }

    #[test]
    fn test_release_tag() {
        assert_eq!(version_from_release_tag("v0.107.52"), Ok("0.107.52".to_string()));
        assert!(version_from_release_tag("nightly").is_err());
    }
}
