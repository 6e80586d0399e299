use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{TripwireError, Result};

/// Global tripwire configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub stealth: StealthConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which fetch strategy a sweep uses
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// Single HTTP request, no JS. Targets may be fetched concurrently.
    #[default]
    Plain,
    /// Shared headless browser with anti-fingerprinting. Targets are fetched one by one.
    Stealth,
}

/// What happens to a matched rule when the notification could not be delivered
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// Delete the rule after the dispatch attempt, whatever its result.
    /// A failed send is never retried.
    #[default]
    AtMostOnce,
    /// Delete the rule only after a confirmed dispatch.
    /// A crash between send and delete can produce a duplicate.
    AtLeastOnce,
}

/// Sweep and scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub fetch_mode: FetchMode,

    /// Seconds between scheduled sweeps
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Upper bound on concurrent fetches in plain mode
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Pause between targets in stealth mode
    #[serde(default = "default_inter_target_delay_ms")]
    pub inter_target_delay_ms: u64,

    /// Plain HTTP request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Number of audit log entries kept after each sweep
    #[serde(default = "default_log_retention")]
    pub log_retention: usize,

    #[serde(default)]
    pub delivery: DeliveryPolicy,

    /// Fetch failures in one sweep at which the engine reports unhealthy
    #[serde(default = "default_unhealthy_failure_threshold")]
    pub unhealthy_failure_threshold: usize,

    /// How long `stop` waits for an in-flight sweep before force-closing the browser
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Lifetime of the cross-process sweep lease; renewed before every target
    #[serde(default = "default_sweep_lease_secs")]
    pub sweep_lease_secs: u64,
}

fn default_tick_secs() -> u64 {
    60
}

fn default_max_concurrency() -> usize {
    4
}

fn default_inter_target_delay_ms() -> u64 {
    2000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_log_retention() -> usize {
    1000
}

fn default_unhealthy_failure_threshold() -> usize {
    5
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

fn default_sweep_lease_secs() -> u64 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fetch_mode: FetchMode::default(),
            tick_secs: default_tick_secs(),
            max_concurrency: default_max_concurrency(),
            inter_target_delay_ms: default_inter_target_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            log_retention: default_log_retention(),
            delivery: DeliveryPolicy::default(),
            unhealthy_failure_threshold: default_unhealthy_failure_threshold(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            sweep_lease_secs: default_sweep_lease_secs(),
        }
    }
}

impl EngineConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn inter_target_delay(&self) -> Duration {
        Duration::from_millis(self.inter_target_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn sweep_lease(&self) -> Duration {
        Duration::from_secs(self.sweep_lease_secs.max(1))
    }
}

/// Browser context settings for stealth fetches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StealthConfig {
    /// Node.js binary used to run the browser sidecar
    #[serde(default = "default_node_binary")]
    pub node_binary: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_locale")]
    pub locale: String,

    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Values reported by `navigator.languages`
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,

    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,

    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,

    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,

    /// Pause after network idle, before scrolling
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Pause after the half-page scroll, before reading content
    #[serde(default = "default_scroll_settle_ms")]
    pub scroll_settle_ms: u64,
}

fn default_node_binary() -> String {
    "node".to_string()
}

pub(crate) fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

fn default_locale() -> String {
    "zh-CN".to_string()
}

fn default_timezone() -> String {
    "Asia/Shanghai".to_string()
}

fn default_languages() -> Vec<String> {
    ["zh-CN", "zh", "en-US", "en"].iter().map(|s| s.to_string()).collect()
}

fn default_viewport_width() -> u32 {
    1920
}

fn default_viewport_height() -> u32 {
    1080
}

fn default_navigation_timeout_ms() -> u64 {
    30_000
}

fn default_settle_ms() -> u64 {
    2000
}

fn default_scroll_settle_ms() -> u64 {
    1000
}

impl Default for StealthConfig {
    fn default() -> Self {
        Self {
            node_binary: default_node_binary(),
            user_agent: default_user_agent(),
            locale: default_locale(),
            timezone: default_timezone(),
            languages: default_languages(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
            settle_ms: default_settle_ms(),
            scroll_settle_ms: default_scroll_settle_ms(),
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset (e.g. "info", "tripwire=debug")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily-rolling log files. Stdout only when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific file, falling back to defaults if absent
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| TripwireError::ConfigError(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Supports TRIPWIRE_CONFIG environment variable
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("TRIPWIRE_CONFIG") {
            return Ok(PathBuf::from(path));
        }
        let dirs = ProjectDirs::from("", "", "tripwire")
            .ok_or_else(|| TripwireError::ConfigError("Could not determine config directory".into()))?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path
    pub fn data_dir() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "tripwire")
            .ok_or_else(|| TripwireError::ConfigError("Could not determine data directory".into()))?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Get the database path
    ///
    /// Supports TRIPWIRE_DB environment variable for test isolation
    pub fn db_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("TRIPWIRE_DB") {
            return Ok(PathBuf::from(path));
        }
        Ok(Self::data_dir()?.join("tripwire.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.tick_secs, 60);
        assert_eq!(config.engine.fetch_mode, FetchMode::Plain);
        assert_eq!(config.engine.delivery, DeliveryPolicy::AtMostOnce);
        assert_eq!(config.stealth.viewport_width, 1920);
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [engine]
            fetch_mode = "stealth"
            delivery = "at_least_once"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.fetch_mode, FetchMode::Stealth);
        assert_eq!(config.engine.delivery, DeliveryPolicy::AtLeastOnce);
        assert_eq!(config.engine.max_concurrency, 4);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_roundtrip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.engine.tick_secs = 120;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.engine.tick_secs, 120);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded.engine.log_retention, 1000);
    }
}
