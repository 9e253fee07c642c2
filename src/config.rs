use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Public root URL of the site to scan. Header and body scanners are
    /// skipped when this is empty.
    #[serde(default)]
    pub site_url: String,

    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub enforcement: EnforcementConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScanConfig {
    /// Source tree roots the file scanner walks (theme and extension
    /// directories). Empty means no file scanning.
    #[serde(default)]
    pub roots: Vec<PathBuf>,

    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// Snapshot freshness window. A non-forced scan inside this window is
    /// served from the stored snapshot.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_head_timeout_secs")]
    pub head_timeout_secs: u64,

    #[serde(default = "default_body_timeout_secs")]
    pub body_timeout_secs: u64,

    /// The scan target is the site itself, so certificate failures (self
    /// signed, staging hosts) are tolerated by default. Risk: a man in the
    /// middle on the scan path could feed the scanner forged evidence.
    #[serde(default = "default_accept_invalid_certs")]
    pub accept_invalid_certs: bool,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EnforcementConfig {
    /// Comma-separated CSS selectors bound to the opt-out action in the
    /// generated client script. Passed through verbatim; invalid selectors
    /// are caught in the browser.
    #[serde(default)]
    pub custom_triggers: String,
}

// Defaults
fn default_api_port() -> u16 {
    8090
}
fn default_interval_hours() -> u64 {
    168 // weekly
}
fn default_cache_ttl_secs() -> u64 {
    3600
}
fn default_head_timeout_secs() -> u64 {
    5
}
fn default_body_timeout_secs() -> u64 {
    10
}
fn default_accept_invalid_certs() -> bool {
    true
}
fn default_user_agent() -> String {
    "NoTrack-Scanner/0.1 (site self-scan)".to_string()
}
fn default_db_path() -> String {
    "notrack.db".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_url: String::new(),
            api_port: default_api_port(),
            scan: ScanConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            enforcement: EnforcementConfig::default(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            roots: vec![],
            interval_hours: default_interval_hours(),
            cache_ttl_secs: default_cache_ttl_secs(),
            head_timeout_secs: default_head_timeout_secs(),
            body_timeout_secs: default_body_timeout_secs(),
            accept_invalid_certs: default_accept_invalid_certs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            custom_triggers: String::new(),
        }
    }
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;
        let config: Config = toml::from_str(&contents).context("Failed to parse config TOML")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_weekly_with_hourly_cache() {
        let config = Config::default();
        assert_eq!(config.scan.interval_hours, 168);
        assert_eq!(config.scan.cache_ttl_secs, 3600);
        assert!(config.scan.accept_invalid_certs);
        assert!(config.site_url.is_empty());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            site_url = "https://example.com"

            [scan]
            roots = ["wp-content/themes"]
            "#,
        )
        .unwrap();
        assert_eq!(config.site_url, "https://example.com");
        assert_eq!(config.scan.roots, vec![PathBuf::from("wp-content/themes")]);
        assert_eq!(config.scan.interval_hours, 168);
        assert_eq!(config.api_port, 8090);
    }
}
