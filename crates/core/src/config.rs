//! Settings and server configuration
//!
//! Process settings come from `berth.toml` with `BERTH_*` environment
//! overrides. The container engine server is configured separately in
//! `<data_dir>/server.json`, which the poller also uses to remember the
//! last time it asked the engine for events.

use crate::errors::{BerthError, ConfigError, Result};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, instrument};

/// Default settings file name, looked up in the working directory
pub const SETTINGS_FILE: &str = "berth.toml";

/// Server configuration file name inside the data directory
pub const SERVER_FILE: &str = "server.json";

/// Process settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Container records and server configuration live here
    pub data_dir: PathBuf,
    /// Parent of the per-launch build directories for output mounts
    pub build_path: PathBuf,
    /// Captured container logs
    pub log_dir: PathBuf,
    pub poll_interval_secs: u64,
    /// Base URL of the site, injected into containers
    pub site_url: String,
    pub user: String,
    /// Token handed to containers; generated per launch when unset
    pub token: Option<String>,
    /// Root of the directory-backed site lookup
    pub site_data_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".berth"),
            build_path: PathBuf::from(".berth/build"),
            log_dir: PathBuf::from(".berth/logs"),
            poll_interval_secs: 10,
            site_url: "http://localhost:8080".to_string(),
            user: "admin".to_string(),
            token: None,
            site_data_dir: None,
        }
    }
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn containers_dir(&self) -> PathBuf {
        self.data_dir.join("containers")
    }

    pub fn server_config_path(&self) -> PathBuf {
        self.data_dir.join(SERVER_FILE)
    }

    /// Apply `BERTH_*` overrides from `lookup` (normally the process environment)
    pub fn apply_env<F>(&mut self, lookup: F) -> std::result::Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BERTH_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("BERTH_BUILD_PATH") {
            self.build_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("BERTH_LOG_DIR") {
            self.log_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("BERTH_POLL_INTERVAL_SECS") {
            self.poll_interval_secs = v.trim().parse().map_err(|_| ConfigError::Validation {
                message: format!("BERTH_POLL_INTERVAL_SECS must be a whole number, got '{}'", v),
            })?;
        }
        if let Some(v) = lookup("BERTH_SITE_URL") {
            self.site_url = v;
        }
        if let Some(v) = lookup("BERTH_USER") {
            self.user = v;
        }
        if let Some(v) = lookup("BERTH_TOKEN") {
            self.token = Some(v);
        }
        if let Some(v) = lookup("BERTH_SITE_DATA_DIR") {
            self.site_data_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Validation {
                message: "poll_interval_secs must be greater than zero".to_string(),
            });
        }
        if self.user.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "user must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Loads [`Settings`]
pub struct SettingsLoader;

impl SettingsLoader {
    /// Load settings from `path`, or from `berth.toml` in the working
    /// directory when no path is given (defaults when that file is absent),
    /// then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Settings> {
        let mut settings = match path {
            Some(path) => Self::load_from_path(path)?,
            None if Path::new(SETTINGS_FILE).exists() => {
                Self::load_from_path(Path::new(SETTINGS_FILE))?
            }
            None => Settings::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load_from_path(path: &Path) -> Result<Settings> {
        debug!("Loading settings from {}", path.display());

        if !path.exists() {
            return Err(BerthError::Config(ConfigError::NotFound {
                path: path.display().to_string(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            debug!("Failed to read settings file: {}", e);
            BerthError::Config(ConfigError::Io(e))
        })?;

        let settings: Settings = toml::from_str(&content).map_err(|e| {
            BerthError::Config(ConfigError::Parsing {
                message: e.to_string(),
            })
        })?;
        settings.validate()?;
        Ok(settings)
    }
}

/// Rewrites site paths into paths valid on the engine host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PathTranslation {
    pub site_prefix: String,
    pub engine_prefix: String,
}

/// The container engine server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub name: String,
    /// Engine address passed to `docker -H`
    pub host: String,
    /// Directory holding `ca.pem`, `cert.pem` and `key.pem`
    pub cert_path: Option<String>,
    pub swarm_mode: bool,
    pub last_event_check_time: Option<DateTime<Utc>>,
    pub path_translation: Option<PathTranslation>,
}

/// Reads and writes `server.json`
#[derive(Debug, Clone)]
pub struct ServerConfigStore {
    path: PathBuf,
}

impl ServerConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when no server has been configured yet
    pub fn load(&self) -> anyhow::Result<Option<ServerConfig>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read server config: {}", self.path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse server config: {}", self.path.display()))?;
        Ok(Some(config))
    }

    /// Write atomically via temp file + rename
    pub fn save(&self, config: &ServerConfig) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content =
            serde_json::to_string_pretty(config).context("Failed to serialize server config")?;
        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, content)
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        std::fs::rename(&temp_path, &self.path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                temp_path.display(),
                self.path.display()
            )
        })?;
        debug!(path = %self.path.display(), "Saved server config");
        Ok(())
    }

    /// Record the end of the last polled event window
    pub fn set_last_event_check_time(&self, time: DateTime<Utc>) -> anyhow::Result<()> {
        let mut config = self
            .load()?
            .context("Cannot record event check time: no server is configured")?;
        config.last_event_check_time = Some(time);
        self.save(&config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_settings_file_and_env_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(
            &path,
            "data_dir = \"/var/berth\"\npoll_interval_secs = 30\nsite_url = \"https://site\"\n",
        )
        .unwrap();

        let mut settings = SettingsLoader::load_from_path(&path).unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("/var/berth"));
        assert_eq!(settings.poll_interval(), Duration::from_secs(30));
        assert_eq!(settings.user, "admin");
        assert_eq!(settings.server_config_path(), PathBuf::from("/var/berth/server.json"));

        let env = HashMap::from([
            ("BERTH_USER", "alice"),
            ("BERTH_POLL_INTERVAL_SECS", "5"),
            ("BERTH_TOKEN", "t0k"),
        ]);
        settings
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(settings.user, "alice");
        assert_eq!(settings.poll_interval_secs, 5);
        assert_eq!(settings.token.as_deref(), Some("t0k"));
    }

    #[test]
    fn test_bad_settings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "poll_interval_secs = \"soon\"").unwrap();
        assert!(matches!(
            SettingsLoader::load_from_path(&path),
            Err(BerthError::Config(ConfigError::Parsing { .. }))
        ));

        std::fs::write(&path, "poll_interval_secs = 0").unwrap();
        assert!(matches!(
            SettingsLoader::load_from_path(&path),
            Err(BerthError::Config(ConfigError::Validation { .. }))
        ));

        assert!(matches!(
            SettingsLoader::load_from_path(&dir.path().join("missing.toml")),
            Err(BerthError::Config(ConfigError::NotFound { .. }))
        ));

        let mut settings = Settings::default();
        assert!(settings
            .apply_env(|k| (k == "BERTH_POLL_INTERVAL_SECS").then(|| "x".to_string()))
            .is_err());
    }

    #[test]
    fn test_server_config_store() {
        let dir = TempDir::new().unwrap();
        let store = ServerConfigStore::new(dir.path().join("nested/server.json"));
        assert!(store.load().unwrap().is_none());
        assert!(store.set_last_event_check_time(Utc::now()).is_err());

        let config = ServerConfig {
            name: "local".to_string(),
            host: "unix:///var/run/docker.sock".to_string(),
            path_translation: Some(PathTranslation {
                site_prefix: "/data/site".to_string(),
                engine_prefix: "/mnt/site".to_string(),
            }),
            ..Default::default()
        };
        store.save(&config).unwrap();
        assert_eq!(store.load().unwrap(), Some(config));

        let now = Utc::now();
        store.set_last_event_check_time(now).unwrap();
        let reloaded = store.load().unwrap().unwrap();
        assert_eq!(reloaded.last_event_check_time, Some(now));
        assert!(!dir.path().join("nested/server.json.tmp").exists());
    }
}
