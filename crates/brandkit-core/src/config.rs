//! Client configuration.
//!
//! Holds the API location, the auth routes, renewal timing and the last
//! used sign-in email. Stored at `~/.config/brandkit/config.json`; every
//! field is optional in the file and falls back to its default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::renewal::DEFAULT_RENEWAL_MARGIN_SECS;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "brandkit";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding `api_base_url`
pub const API_URL_ENV: &str = "BRANDKIT_API_URL";

/// Environment variable overriding the cache directory
pub const CACHE_DIR_ENV: &str = "BRANDKIT_CACHE_DIR";

/// Upper bound for `renewal_margin_secs` (one day)
const MAX_RENEWAL_MARGIN_SECS: i64 = 24 * 60 * 60;

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// How often other processes' session writes are picked up, in seconds.
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub login_path: String,
    pub refresh_path: String,
    pub logout_path: String,
    pub renewal_margin_secs: i64,
    pub request_timeout_secs: u64,
    pub sync_interval_secs: u64,
    pub last_email: Option<String>,
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            login_path: "/auth/login".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            logout_path: "/auth/logout".to_string(),
            renewal_margin_secs: DEFAULT_RENEWAL_MARGIN_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            last_email: None,
            cache_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply environment overrides (after `.env` has been loaded)
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(API_URL_ENV).filter(|v| !v.is_empty()) {
            self.api_base_url = url;
        }
        if let Some(dir) = lookup(CACHE_DIR_ENV).filter(|v| !v.is_empty()) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
    }

    /// Directory holding `session.json` and log files
    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir =
            dirs::cache_dir().ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn renewal_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.renewal_margin_secs.clamp(0, MAX_RENEWAL_MARGIN_SECS))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    /// Routes the gateway must never authorize or renew on
    pub fn auth_routes(&self) -> Vec<String> {
        vec![self.login_path.clone(), self.refresh_path.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"api_base_url": "https://panel.example.com/api"}"#).unwrap();
        assert_eq!(config.api_base_url, "https://panel.example.com/api");
        assert_eq!(config.refresh_path, "/auth/refresh");
        assert_eq!(config.renewal_margin(), chrono::Duration::seconds(300));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_renewal_margin_is_clamped() {
        let config: Config =
            serde_json::from_str(&format!(r#"{{"renewal_margin_secs": {}}}"#, i64::MAX)).unwrap();
        assert_eq!(config.renewal_margin(), chrono::Duration::days(1));

        let config = Config {
            renewal_margin_secs: -30,
            ..Config::default()
        };
        assert_eq!(config.renewal_margin(), chrono::Duration::zero());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            API_URL_ENV => Some("https://staging.example.com/api".to_string()),
            CACHE_DIR_ENV => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.api_base_url, "https://staging.example.com/api");
        assert!(config.cache_dir.is_none());
    }

    #[test]
    fn test_auth_routes_cover_login_and_refresh() {
        let config = Config::default();
        assert_eq!(config.auth_routes(), vec!["/auth/login", "/auth/refresh"]);
    }

    #[test]
    fn test_explicit_cache_dir_wins() {
        let config = Config {
            cache_dir: Some(PathBuf::from("/tmp/brandkit-test")),
            ..Config::default()
        };
        assert_eq!(config.cache_dir().unwrap(), PathBuf::from("/tmp/brandkit-test"));
    }
}
