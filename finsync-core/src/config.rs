//! Configuration management
//!
//! Settings live in `settings.json` inside the data directory. The engine
//! owns the `sync` section and leaves every other key alone:
//! ```json
//! {
//!   "sync": {
//!     "baseUrl": "https://api.example.com/v1",
//!     "accessToken": "...",
//!     "autoSyncEnabled": true,
//!     "autoSyncIntervalSecs": 3600
//!   },
//!   "ui": { ... }
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const SETTINGS_FILE: &str = "settings.json";

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    sync: SyncSettings,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// The `sync` section of settings.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Backend root, e.g. `https://api.example.com/v1`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    pub request_timeout_secs: u64,
    pub auto_sync_enabled: bool,
    pub auto_sync_interval_secs: u64,
    /// Fetch attempts per cycle, the first one included
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Events buffered per bus subscriber
    pub event_capacity: usize,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            access_token: None,
            request_timeout_secs: 30,
            auto_sync_enabled: false,
            auto_sync_interval_secs: 3600,
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            event_capacity: 256,
            other: HashMap::new(),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub sync: SyncSettings,
}

fn parse_flag(value: &str) -> Option<bool> {
    match value {
        "true" | "1" | "yes" | "TRUE" | "YES" => Some(true),
        "false" | "0" | "no" | "FALSE" | "NO" => Some(false),
        _ => None,
    }
}

fn read_settings(settings_path: &Path) -> Result<SettingsFile> {
    if !settings_path.exists() {
        return Ok(SettingsFile::default());
    }
    let content = std::fs::read_to_string(settings_path)
        .with_context(|| format!("Failed to read {}", settings_path.display()))?;
    Ok(serde_json::from_str(&content).unwrap_or_else(|e| {
        warn!(path = %settings_path.display(), error = %e, "unreadable settings, using defaults");
        SettingsFile::default()
    }))
}

impl Config {
    /// Load config from the data directory
    ///
    /// Environment variables override the file (for CI/testing):
    /// `FINSYNC_BASE_URL`, `FINSYNC_ACCESS_TOKEN`, `FINSYNC_AUTO_SYNC`.
    pub fn load(data_dir: &Path) -> Result<Self> {
        Self::load_with_env(data_dir, |key| std::env::var(key).ok())
    }

    fn load_with_env(data_dir: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let raw = read_settings(&data_dir.join(SETTINGS_FILE))?;
        let mut sync = raw.sync;

        if let Some(url) = env("FINSYNC_BASE_URL").filter(|v| !v.is_empty()) {
            sync.base_url = Some(url);
        }
        if let Some(token) = env("FINSYNC_ACCESS_TOKEN").filter(|v| !v.is_empty()) {
            sync.access_token = Some(token);
        }
        if let Some(enabled) = env("FINSYNC_AUTO_SYNC").as_deref().and_then(parse_flag) {
            sync.auto_sync_enabled = enabled;
        }

        Ok(Self { sync })
    }

    /// Save config to the data directory
    /// Preserves settings the engine doesn't manage
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let settings_path = data_dir.join(SETTINGS_FILE);
        let mut settings = read_settings(&settings_path)?;

        // Keys inside `sync` that we don't know about survive too
        let unknown = std::mem::take(&mut settings.sync.other);
        settings.sync = self.sync.clone();
        for (key, value) in unknown {
            settings.sync.other.entry(key).or_insert(value);
        }

        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;
        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&settings_path, content)
            .with_context(|| format!("Failed to write {}", settings_path.display()))?;
        Ok(())
    }

    /// Interval for the auto-sync scheduler, `None` when disabled
    pub fn auto_sync_interval(&self) -> Option<Duration> {
        self.sync
            .auto_sync_enabled
            .then(|| Duration::from_secs(self.sync.auto_sync_interval_secs))
    }

    /// Record the auto-sync choice so it survives a restart
    pub fn set_auto_sync(&mut self, interval: Option<Duration>) {
        match interval {
            Some(interval) => {
                self.sync.auto_sync_enabled = true;
                self.sync.auto_sync_interval_secs = interval.as_secs().max(1);
            }
            None => self.sync.auto_sync_enabled = false,
        }
    }

    /// Platform data directory for the engine, e.g. `~/.local/share/finsync`
    pub fn default_data_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("finsync"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_settings_file() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_with_env(dir.path(), no_env).unwrap();
        assert_eq!(config.sync, SyncSettings::default());
        assert_eq!(config.auto_sync_interval(), None);
    }

    #[test]
    fn test_load_camel_case_section() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"sync": {"baseUrl": "https://api.example.com", "autoSyncEnabled": true,
                "autoSyncIntervalSecs": 900, "maxAttempts": 2}}"#,
        )
        .unwrap();

        let config = Config::load_with_env(dir.path(), no_env).unwrap();
        assert_eq!(config.sync.base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(config.sync.max_attempts, 2);
        assert_eq!(config.sync.request_timeout_secs, 30);
        assert_eq!(config.auto_sync_interval(), Some(Duration::from_secs(900)));
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"sync": {"baseUrl": "https://file.example.com", "autoSyncEnabled": true}}"#,
        )
        .unwrap();

        let env = |key: &str| match key {
            "FINSYNC_BASE_URL" => Some("https://env.example.com".to_string()),
            "FINSYNC_AUTO_SYNC" => Some("no".to_string()),
            _ => None,
        };
        let config = Config::load_with_env(dir.path(), env).unwrap();
        assert_eq!(config.sync.base_url.as_deref(), Some("https://env.example.com"));
        assert!(!config.sync.auto_sync_enabled);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "{ not json").unwrap();
        let config = Config::load_with_env(dir.path(), no_env).unwrap();
        assert_eq!(config.sync, SyncSettings::default());
    }

    #[test]
    fn test_save_preserves_unknown_keys() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"ui": {"theme": "dark"}, "sync": {"legacyFlag": 1, "maxAttempts": 2}}"#,
        )
        .unwrap();

        let mut config = Config::load_with_env(dir.path(), no_env).unwrap();
        config.set_auto_sync(Some(Duration::from_secs(120)));
        config.save(dir.path()).unwrap();

        let saved: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join(SETTINGS_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(saved["ui"]["theme"], "dark");
        assert_eq!(saved["sync"]["legacyFlag"], 1);
        assert_eq!(saved["sync"]["maxAttempts"], 2);
        assert_eq!(saved["sync"]["autoSyncEnabled"], true);
        assert_eq!(saved["sync"]["autoSyncIntervalSecs"], 120);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("YES"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
