use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ExchangeError;
use crate::resource::ResourceKind;

/// Environment variables that override the credentials in the config file
pub const API_KEY_ENV: &str = "BYBIT_API_KEY";
pub const SECRET_KEY_ENV: &str = "BYBIT_SECRET_KEY";

/// Agent configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    pub exchange: ExchangeConfig,
    pub agent: AgentSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Exchange endpoint and credentials
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub secret_key: String,

    /// How long a signed request stays valid on the exchange (milliseconds)
    #[serde(default = "default_recv_window")]
    pub recv_window: u64,

    /// Prefix of the auth headers (`SIGN`, `API-KEY`, `TIMESTAMP`, `RECV-WINDOW`)
    #[serde(default = "default_header_prefix")]
    pub header_prefix: String,

    /// Client-side request timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

/// Agent settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentSettings {
    /// Agent identity; one state file per name
    #[serde(default = "default_name")]
    pub name: String,

    pub resource: ResourceKind,

    /// Page size for order and trade history
    #[serde(default = "default_limit")]
    pub limit: u32,

    /// Emit only new records instead of the whole response every cycle
    #[serde(default = "default_changes_only")]
    pub changes_only: bool,

    /// Log signatures and raw response bodies
    #[serde(default)]
    pub debug: bool,

    /// How often to poll (seconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// Random delay added to each interval (seconds)
    #[serde(default = "default_jitter")]
    pub poll_jitter: u64,

    /// Days without an event before the agent is reported as not working
    #[serde(default = "default_expected_receive_period")]
    pub expected_receive_period_in_days: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Where events go
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct OutputConfig {
    /// Append events to this file instead of stdout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events_file: Option<PathBuf>,
}

// Default values
fn default_base_url() -> String {
    "https://api.bybit.com".to_string()
}

fn default_recv_window() -> u64 {
    5000
}

fn default_header_prefix() -> String {
    "X-BAPI-".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_name() -> String {
    "default".to_string()
}

fn default_limit() -> u32 {
    10
}

fn default_changes_only() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    3600 // 1 hour
}

fn default_jitter() -> u64 {
    60
}

fn default_expected_receive_period() -> u32 {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            secret_key: String::new(),
            recv_window: default_recv_window(),
            header_prefix: default_header_prefix(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl AgentSettings {
    pub fn new(resource: ResourceKind) -> Self {
        Self {
            name: default_name(),
            resource,
            limit: default_limit(),
            changes_only: default_changes_only(),
            debug: false,
            poll_interval: default_poll_interval(),
            poll_jitter: default_jitter(),
            expected_receive_period_in_days: default_expected_receive_period(),
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

impl AgentConfig {
    /// Load configuration from file, then apply credential overrides from the environment
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: AgentConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        dotenvy::dotenv().ok();
        config.apply_env_overrides(|key| std::env::var(key).ok());

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let toml = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // Holds the API secret
        crate::platform::atomic_write_with_mode(path, toml.as_bytes(), 0o600)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Replace credentials with non-empty values from `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(API_KEY_ENV).filter(|v| !v.is_empty()) {
            self.exchange.api_key = key;
        }
        if let Some(secret) = lookup(SECRET_KEY_ENV).filter(|v| !v.is_empty()) {
            self.exchange.secret_key = secret;
        }
    }

    /// Validate configuration before any request goes out
    pub fn validate(&self) -> Result<(), ExchangeError> {
        let url = url::Url::parse(&self.exchange.base_url)
            .map_err(|e| ExchangeError::Configuration(format!("invalid base_url: {}", e)))?;

        if url.scheme() != "https" {
            return Err(ExchangeError::Configuration(format!(
                "base_url must use HTTPS (got: {})",
                url.scheme()
            )));
        }

        if self.exchange.api_key.trim().is_empty() {
            return Err(ExchangeError::Configuration("apikey is a required field".to_string()));
        }

        if self.exchange.secret_key.is_empty() {
            return Err(ExchangeError::Configuration(
                "secretkey is a required field".to_string(),
            ));
        }

        if self.exchange.recv_window == 0 {
            return Err(ExchangeError::Configuration(
                "recv_window must be greater than zero".to_string(),
            ));
        }

        if self.exchange.request_timeout == 0 {
            return Err(ExchangeError::Configuration(
                "request_timeout must be greater than zero".to_string(),
            ));
        }

        if self.agent.resource.requires_limit() && self.agent.limit == 0 {
            return Err(ExchangeError::Configuration(format!(
                "limit is a required field for {}",
                self.agent.resource
            )));
        }

        if self.agent.name.trim().is_empty()
            || !self
                .agent
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ExchangeError::Configuration(format!(
                "agent name must be non-empty and use only [A-Za-z0-9_-] (got: '{}')",
                self.agent.name
            )));
        }

        if self.agent.poll_interval < 60 {
            return Err(ExchangeError::Configuration(format!(
                "poll interval must be at least 60 seconds (got: {})",
                self.agent.poll_interval
            )));
        }

        if self.agent.expected_receive_period_in_days == 0 {
            return Err(ExchangeError::Configuration(
                "expected_receive_period_in_days must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Copy with secrets masked, for display
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        config.exchange.api_key = mask(&config.exchange.api_key);
        config.exchange.secret_key = "********".to_string();
        config
    }
}

fn mask(value: &str) -> String {
    let visible: String = value.chars().take(4).collect();
    format!("{}****", visible)
}

/// Default config file location
pub fn get_agent_config_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "bybit-watch")
        .context("Could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AgentConfig {
        AgentConfig {
            exchange: ExchangeConfig {
                api_key: "test-key".to_string(),
                secret_key: "test-secret".to_string(),
                ..Default::default()
            },
            agent: AgentSettings::new(ResourceKind::OrderHistory),
            logging: LoggingConfig::default(),
            output: OutputConfig::default(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn rejects_plain_http() {
        let mut config = valid_config();
        config.exchange.base_url = "http://api.bybit.com".to_string();
        assert!(matches!(config.validate(), Err(ExchangeError::Configuration(_))));
    }

    #[test]
    fn rejects_missing_credentials() {
        let mut config = valid_config();
        config.exchange.api_key.clear();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.exchange.secret_key.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn limit_required_only_for_history() {
        let mut config = valid_config();
        config.agent.limit = 0;
        assert!(config.validate().is_err());

        config.agent.resource = ResourceKind::Balances;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_short_poll_interval() {
        let mut config = valid_config();
        config.agent.poll_interval = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unsafe_agent_name() {
        let mut config = valid_config();
        config.agent.name = "../other".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn minimal_toml_gets_defaults() {
        let config: AgentConfig = toml::from_str(
            r#"
            [exchange]
            api_key = "k"
            secret_key = "s"

            [agent]
            resource = "trade_history"
            "#,
        )
        .unwrap();

        assert_eq!(config.exchange.base_url, "https://api.bybit.com");
        assert_eq!(config.exchange.recv_window, 5000);
        assert_eq!(config.exchange.header_prefix, "X-BAPI-");
        assert_eq!(config.agent.resource, ResourceKind::TradeHistory);
        assert_eq!(config.agent.limit, 10);
        assert!(config.agent.changes_only);
        assert!(!config.agent.debug);
        assert_eq!(config.agent.poll_interval, 3600);
        assert_eq!(config.logging.level, "info");
        assert!(config.output.events_file.is_none());
    }

    #[test]
    fn unknown_resource_fails_to_parse() {
        let result: Result<AgentConfig, _> = toml::from_str(
            r#"
            [exchange]
            [agent]
            resource = "withdrawals"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn env_overrides_replace_credentials() {
        let mut config = valid_config();
        config.apply_env_overrides(|key| match key {
            API_KEY_ENV => Some("env-key".to_string()),
            SECRET_KEY_ENV => Some(String::new()),
            _ => None,
        });

        assert_eq!(config.exchange.api_key, "env-key");
        assert_eq!(config.exchange.secret_key, "test-secret");
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = valid_config();
        config.save(&path).unwrap();
        let loaded = AgentConfig::load(&path).unwrap();

        assert_eq!(loaded.agent.resource, ResourceKind::OrderHistory);
        assert_eq!(loaded.agent.limit, config.agent.limit);
    }

    #[cfg(unix)]
    #[test]
    fn saved_config_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        valid_config().save(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn redacted_hides_secret() {
        let shown = valid_config().redacted();
        assert_eq!(shown.exchange.api_key, "test****");
        assert!(!shown.exchange.secret_key.contains("secret"));
    }
}
