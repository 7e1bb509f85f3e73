//! Configuration file parsing
//!
//! `config.conf` is a flat `KEY=value` file. Comments start with `#`, values
//! may be quoted. Each key is validated on its own: a bad value produces a
//! [`ConfigWarning`] and the default stays in place.

use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::target::TargetKind;

/// Release repository of this tool, used by the self-update hint
pub const DEFAULT_GITHUB_REPO: &str = "benjarogit/sc-cachyos-multi-updater";

/// Effective settings for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub enable_system: bool,
    pub enable_aur: bool,
    pub enable_cursor: bool,
    pub enable_adguard: bool,
    pub enable_flatpak: bool,
    pub dry_run: bool,
    pub notifications: bool,
    pub colors: bool,
    pub auto_update: bool,
    pub max_log_files: usize,
    pub download_retries: u32,
    pub max_backups: usize,
    pub pacman_noconfirm: bool,
    pub github_repo: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enable_system: true,
            enable_aur: true,
            enable_cursor: true,
            enable_adguard: true,
            enable_flatpak: true,
            dry_run: false,
            notifications: true,
            colors: true,
            auto_update: false,
            max_log_files: 3,
            download_retries: 3,
            max_backups: 3,
            pacman_noconfirm: true,
            github_repo: DEFAULT_GITHUB_REPO.to_string(),
        }
    }
}

impl Settings {
    pub fn is_enabled(&self, kind: TargetKind) -> bool {
        match kind {
            TargetKind::System => self.enable_system,
            TargetKind::Community => self.enable_aur,
            TargetKind::Editor => self.enable_cursor,
            TargetKind::NetworkService => self.enable_adguard,
            TargetKind::SandboxApps => self.enable_flatpak,
        }
    }

    pub fn set_enabled(&mut self, kind: TargetKind, enabled: bool) {
        match kind {
            TargetKind::System => self.enable_system = enabled,
            TargetKind::Community => self.enable_aur = enabled,
            TargetKind::Editor => self.enable_cursor = enabled,
            TargetKind::NetworkService => self.enable_adguard = enabled,
            TargetKind::SandboxApps => self.enable_flatpak = enabled,
        }
    }

    /// Settings rendered back into `KEY=value` lines
    pub fn to_entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("ENABLE_SYSTEM_UPDATE", self.enable_system.to_string()),
            ("ENABLE_AUR_UPDATE", self.enable_aur.to_string()),
            ("ENABLE_CURSOR_UPDATE", self.enable_cursor.to_string()),
            ("ENABLE_ADGUARD_UPDATE", self.enable_adguard.to_string()),
            ("ENABLE_FLATPAK_UPDATE", self.enable_flatpak.to_string()),
            ("DRY_RUN", self.dry_run.to_string()),
            ("ENABLE_NOTIFICATIONS", self.notifications.to_string()),
            ("ENABLE_COLORS", self.colors.to_string()),
            ("ENABLE_AUTO_UPDATE", self.auto_update.to_string()),
            ("MAX_LOG_FILES", self.max_log_files.to_string()),
            ("DOWNLOAD_RETRIES", self.download_retries.to_string()),
            ("MAX_BACKUPS", self.max_backups.to_string()),
            ("PACMAN_NOCONFIRM", self.pacman_noconfirm.to_string()),
            ("GITHUB_REPO", self.github_repo.clone()),
        ]
    }
}

/// A rejected configuration line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub line: usize,
    pub key: String,
    pub value: String,
    pub reason: String,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {}: {}={} ignored ({}), keeping default",
            self.line, self.key, self.value, self.reason
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read configuration {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub settings: Settings,
    pub warnings: Vec<ConfigWarning>,
    /// File the settings came from, `None` when defaults were used
    pub source: Option<PathBuf>,
}

/// Load `path`. A missing file yields defaults unless `required` is set.
pub fn load(path: &Path, required: bool) -> Result<LoadedConfig, ConfigError> {
    match fs::read_to_string(path) {
        Ok(text) => {
            let (settings, warnings) = parse(&text);
            Ok(LoadedConfig {
                settings,
                warnings,
                source: Some(path.to_path_buf()),
            })
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if required {
                Err(ConfigError::NotFound(path.to_path_buf()))
            } else {
                Ok(LoadedConfig {
                    settings: Settings::default(),
                    warnings: Vec::new(),
                    source: None,
                })
            }
        }
        Err(source) => Err(ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Parse configuration text on top of the defaults
pub fn parse(text: &str) -> (Settings, Vec<ConfigWarning>) {
    let mut settings = Settings::default();
    let mut warnings = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            warnings.push(ConfigWarning {
                line: idx + 1,
                key: line.to_string(),
                value: String::new(),
                reason: "expected KEY=value".to_string(),
            });
            continue;
        };

        let key = key.trim();
        let value = unquote(value.trim());
        if let Err(reason) = apply(&mut settings, key, value) {
            warnings.push(ConfigWarning {
                line: idx + 1,
                key: key.to_string(),
                value: value.to_string(),
                reason,
            });
        }
    }

    (settings, warnings)
}

fn apply(settings: &mut Settings, key: &str, value: &str) -> Result<(), String> {
    match key {
        "ENABLE_SYSTEM_UPDATE" => settings.enable_system = parse_bool(value)?,
        "ENABLE_AUR_UPDATE" => settings.enable_aur = parse_bool(value)?,
        "ENABLE_CURSOR_UPDATE" => settings.enable_cursor = parse_bool(value)?,
        "ENABLE_ADGUARD_UPDATE" => settings.enable_adguard = parse_bool(value)?,
        "ENABLE_FLATPAK_UPDATE" => settings.enable_flatpak = parse_bool(value)?,
        "DRY_RUN" => settings.dry_run = parse_bool(value)?,
        "ENABLE_NOTIFICATIONS" => settings.notifications = parse_bool(value)?,
        "ENABLE_COLORS" => settings.colors = parse_bool(value)?,
        "ENABLE_AUTO_UPDATE" => settings.auto_update = parse_bool(value)?,
        "PACMAN_NOCONFIRM" => settings.pacman_noconfirm = parse_bool(value)?,
        "MAX_LOG_FILES" => settings.max_log_files = parse_count(value)? as usize,
        "DOWNLOAD_RETRIES" => {
            settings.download_retries = u32::try_from(parse_count(value)?)
                .map_err(|_| "value out of range".to_string())?
        }
        "MAX_BACKUPS" => settings.max_backups = parse_count(value)? as usize,
        "GITHUB_REPO" => {
            let valid = value
                .split_once('/')
                .is_some_and(|(owner, repo)| !owner.is_empty() && !repo.is_empty());
            if !valid {
                return Err("expected owner/repository".to_string());
            }
            settings.github_repo = value.to_string();
        }
        _ => return Err("unknown key".to_string()),
    }
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool, String> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err("expected true or false".to_string())
    }
}

fn parse_count(value: &str) -> Result<u64, String> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err("expected a non-negative number".to_string());
    }
    value.parse().map_err(|_| "value out of range".to_string())
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_empty() {
        let (settings, warnings) = parse("");
        assert_eq!(settings, Settings::default());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_valid_keys() {
        let text = "# comment\nENABLE_CURSOR_UPDATE=false\nDOWNLOAD_RETRIES=5\nGITHUB_REPO=\"me/fork\"\n";
        let (settings, warnings) = parse(text);
        assert!(!settings.enable_cursor);
        assert_eq!(settings.download_retries, 5);
        assert_eq!(settings.github_repo, "me/fork");
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let text = "ENABLE_AUR_UPDATE=yes\nMAX_LOG_FILES=ten\nDOWNLOAD_RETRIES=-1\n";
        let (settings, warnings) = parse(text);
        assert!(settings.enable_aur);
        assert_eq!(settings.max_log_files, 3);
        assert_eq!(settings.download_retries, 3);
        assert_eq!(warnings.len(), 3);
        assert_eq!(warnings[0].line, 1);
        assert_eq!(warnings[1].key, "MAX_LOG_FILES");
    }

    #[test]
    fn test_unknown_and_garbled_lines() {
        let (_, warnings) = parse("PROTON_GE=true\nthis is not config\n");
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].reason, "unknown key");
        assert_eq!(warnings[1].reason, "expected KEY=value");
    }

    #[test]
    fn test_later_line_wins() {
        let (settings, _) = parse("DRY_RUN=true\nDRY_RUN=False\n");
        assert!(!settings.dry_run);
    }

    #[test]
    fn test_load_missing_optional_and_required() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.conf");
        let loaded = load(&path, false).unwrap();
        assert!(loaded.source.is_none());
        assert!(matches!(load(&path, true), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.conf");
        fs::write(&path, "ENABLE_FLATPAK_UPDATE=false\n").unwrap();
        let loaded = load(&path, true).unwrap();
        assert!(!loaded.settings.is_enabled(TargetKind::SandboxApps));
        assert_eq!(loaded.source.as_deref(), Some(path.as_path()));
    }
}
