use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Application identifier, names the directory under the platform data dir
pub const APP_IDENTIFIER: &str = "com.analysis-sessions.client";

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";

/// Seconds between status checks for the active session
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 3;

/// Consecutive failed ticks before the user is warned
pub const DEFAULT_TRANSPORT_WARN_AFTER: u32 = 5;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("App data directory not found")]
    NoAppDataDir,
}

impl Serialize for ConfigError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    pub base_url: String,
    pub poll_interval_secs: u64,
    pub transport_warn_after: u32,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            transport_warn_after: DEFAULT_TRANSPORT_WARN_AFTER,
            request_timeout_secs: 30,
            connect_timeout_secs: 5,
        }
    }
}

impl ClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Load `config/client.json` under `data_dir`, writing defaults on first run.
    pub fn load_or_init(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_path(data_dir);
        if !path.exists() {
            let config = ClientConfig::default();
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, serde_json::to_string_pretty(&config)?)?;
            tracing::info!(path = %path.display(), "Wrote default client config");
            return Ok(config);
        }

        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Platform data directory for this client
pub fn app_data_dir() -> Result<PathBuf, ConfigError> {
    let base = dirs::data_dir().ok_or(ConfigError::NoAppDataDir)?;
    Ok(base.join(APP_IDENTIFIER))
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config").join("client.json")
}

pub fn sessions_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("sessions")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_written_on_first_load() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::load_or_init(dir.path()).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert!(config_path(dir.path()).exists());
        assert_eq!(config.poll_interval(), Duration::from_secs(3));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path(dir.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"baseUrl": "http://backend:8080"}"#).unwrap();

        let config = ClientConfig::load_or_init(dir.path()).unwrap();
        assert_eq!(config.base_url, "http://backend:8080");
        assert_eq!(config.transport_warn_after, DEFAULT_TRANSPORT_WARN_AFTER);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path(dir.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            ClientConfig::load_or_init(dir.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
