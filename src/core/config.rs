use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_URL_ENV: &str = "BRIDGEVIEW_API_URL";
pub const REALTIME_URL_ENV: &str = "BRIDGEVIEW_REALTIME_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub sync: SyncConfig,
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub api_url: String,
    pub realtime_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub poll_interval_ms: u64,
    pub apply_policy: ApplyPolicy,
    /// Ask the bridge for every agent, not only active ones
    pub list_all: bool,
}

/// How the reconciler arbitrates between overlapping fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyPolicy {
    /// Apply responses in the order they complete; the last one wins
    LastCompleted,
    /// Drop responses issued before the one currently applied
    IssueOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            api_url: "http://127.0.0.1:8001".to_string(),
            realtime_url: "ws://127.0.0.1:8000/ws/realtime".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            poll_interval_ms: 3000,
            apply_policy: ApplyPolicy::LastCompleted,
            list_all: true,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 10,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_factor: 2.0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig::default(),
            sync: SyncConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt `attempt` (0-based), without jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay_ms = (self.base_delay_ms as f64 * self.backoff_factor.powi(attempt as i32))
            .min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(delay_ms)
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "bridgeview", "bridgeview")
}

/// Directory holding credentials and TUI log files
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".bridgeview"))
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = match project_dirs() {
            Some(dirs) => Self::load_from(&dirs.config_dir().join("config.toml"))?,
            None => Config::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load a config file, falling back to defaults when it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = toml::from_str::<Config>(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(dirs) = project_dirs() {
            self.save_to(&dirs.config_dir().join("config.toml"))?;
        }
        Ok(())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(API_URL_ENV).filter(|url| !url.is_empty()) {
            tracing::debug!("Using API URL from {}: {}", API_URL_ENV, url);
            self.server.api_url = url;
        }
        if let Some(url) = lookup(REALTIME_URL_ENV).filter(|url| !url.is_empty()) {
            tracing::debug!("Using realtime URL from {}: {}", REALTIME_URL_ENV, url);
            self.server.realtime_url = url;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.sync.poll_interval(), Duration::from_millis(3000));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[sync]\napply_policy = \"issue_order\"\n\n[server]\napi_url = \"http://10.0.0.5:8001\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.sync.apply_policy, ApplyPolicy::IssueOrder);
        assert_eq!(config.sync.poll_interval_ms, 3000);
        assert_eq!(config.server.api_url, "http://10.0.0.5:8001");
        assert_eq!(config.server.realtime_url, "ws://127.0.0.1:8000/ws/realtime");
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.reconnect.enabled = false;
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_env_overrides_urls() {
        let mut config = Config::default();
        config.apply_env_overrides(|key| match key {
            API_URL_ENV => Some("https://bridge.local".to_string()),
            REALTIME_URL_ENV => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.server.api_url, "https://bridge.local");
        assert_eq!(config.server.realtime_url, ServerConfig::default().realtime_url);
    }

    #[test]
    fn test_backoff_is_capped() {
        let reconnect = ReconnectConfig::default();
        assert_eq!(reconnect.delay_for(0), Duration::from_millis(1000));
        assert_eq!(reconnect.delay_for(2), Duration::from_millis(4000));
        assert_eq!(reconnect.delay_for(12), Duration::from_millis(30000));
    }
}
