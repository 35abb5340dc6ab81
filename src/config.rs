use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::{Model, available_models};

/// Error type for configuration loading
#[derive(Debug)]
pub enum ConfigError {
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
    InvalidValue {
        path: PathBuf,
        field: String,
        value: String,
        valid_values: Vec<String>,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError { path, source } => {
                write!(
                    f,
                    "Failed to read config file {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::WriteError { path, source } => {
                write!(
                    f,
                    "Failed to write config file {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::ParseError { path, source } => {
                write!(f, "Invalid TOML syntax in {}: {}", path.display(), source)
            }
            ConfigError::InvalidValue {
                path,
                field,
                value,
                valid_values,
            } => {
                write!(
                    f,
                    "Invalid value '{}' for '{}' in {}\n  Valid values: {}",
                    value,
                    field,
                    path.display(),
                    valid_values.join(", ")
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadError { source, .. } => Some(source),
            ConfigError::WriteError { source, .. } => Some(source),
            ConfigError::ParseError { source, .. } => Some(source),
            ConfigError::InvalidValue { .. } => None,
        }
    }
}

/// ddgchat configuration loaded from `~/.config/ddgchat/config.toml`.
///
/// Every field has a default, so an empty or partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub tools: ToolCapabilities,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub profile: ClientProfile,
}

/// Connection and retry settings for the chat service.
///
/// Example in `config.toml`:
/// ```toml
/// [client]
/// timeout_secs = 60
/// max_retries = 5
/// default_model = "claude-3-haiku-20240307"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Time allowed until response headers arrive (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Retries on 418/429 rejections (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before each retry in milliseconds (default: 2000)
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_status_url")]
    pub status_url: String,
    #[serde(default = "default_chat_url")]
    pub chat_url: String,
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2000
}

fn default_model() -> String {
    Model::default().id().to_string()
}

fn default_status_url() -> String {
    "https://duckduckgo.com/duckchat/v1/status".to_string()
}

fn default_chat_url() -> String {
    "https://duckduckgo.com/duckchat/v1/chat".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            default_model: default_model(),
            status_url: default_status_url(),
            chat_url: default_chat_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_per_minute")]
    pub max_per_minute: usize,
    #[serde(default = "default_max_per_hour")]
    pub max_per_hour: usize,
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_max_per_minute() -> usize {
    10
}

fn default_max_per_hour() -> usize {
    100
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            max_per_minute: default_max_per_minute(),
            max_per_hour: default_max_per_hour(),
        }
    }
}

/// Server-side tools requested with every message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ToolCapabilities {
    #[serde(default)]
    pub web_search: bool,
    #[serde(default)]
    pub news_search: bool,
    #[serde(default)]
    pub videos_search: bool,
    #[serde(default)]
    pub local_search: bool,
    #[serde(default)]
    pub weather_forecast: bool,
}

impl ToolCapabilities {
    pub fn all(enabled: bool) -> Self {
        Self {
            web_search: enabled,
            news_search: enabled,
            videos_search: enabled,
            local_search: enabled,
            weather_forecast: enabled,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Emit the session's request narrative at info level
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub debug: bool,
}

/// Browser fingerprint sent with every request.
///
/// These values were captured from a desktop browser session and drift as the
/// web frontend is redeployed; override them here when the probe stops returning
/// a token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientProfile {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_language")]
    pub accept_language: String,
    #[serde(default = "default_sec_ch_ua")]
    pub sec_ch_ua: String,
    #[serde(default = "default_sec_ch_ua_platform")]
    pub sec_ch_ua_platform: String,
    #[serde(default = "default_origin")]
    pub origin: String,
    #[serde(default = "default_fe_signals")]
    pub fe_signals: String,
    #[serde(default = "default_fe_version")]
    pub fe_version: String,
    #[serde(default = "default_vqd_hash")]
    pub vqd_hash: String,
    #[serde(default = "default_cookies")]
    pub cookies: Vec<Cookie>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl Cookie {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36".to_string()
}

fn default_language() -> String {
    "fr-FR,fr;q=0.6".to_string()
}

fn default_sec_ch_ua() -> String {
    r#""Brave";v="137", "Chromium";v="137", "Not/A)Brand";v="24""#.to_string()
}

fn default_sec_ch_ua_platform() -> String {
    r#""Linux""#.to_string()
}

fn default_origin() -> String {
    "https://duckduckgo.com".to_string()
}

fn default_fe_signals() -> String {
    "eyJzdGFydCI6MTc0OTgyODU3NzE1NiwiZXZlbnRzIjpbeyJuYW1lIjoic3RhcnROZXdDaGF0IiwiZGVsdGEiOjYwfV0sImVuZCI6NTM4MX0=".to_string()
}

fn default_fe_version() -> String {
    "serp_20250613_094749_ET-cafd73f97f51c983eb30".to_string()
}

fn default_vqd_hash() -> String {
    "eyJzZXJ2ZXJfaGFzaGVzIjpbIm5oWlUrcVZ3d3dzODFPVStDTm4vVkZJcS9DbXBSeGxYY2E5cHpGQ0JVZUk9IiwiajRNNmNBRzRheVFqQ21kWkN0a1IzOFY3eVRpd1gvZ2RmcDFueFhEdlV3cz0iXSwiY2xpZW50X2hhc2hlcyI6WyJpRTNqeXRnSm0xZGJaZlo1bW81M1NmaVAxdXUxeEdzY0F5RnB3V2NVOUtrPSIsInJaRGtaR2h4S0JEL1JuY00xVVNraHZNM3pLdEJzQmlzSlJTWFF4L2QzRFU9Il0sInNpZ25hbHMiOnt9LCJtZXRhIjp7InYiOiIzIiwiY2hhbGxlbmdlX2lkIjoiODU3NjA5YjlmMTg2NThlMWM0MzZhZWI2MGM0MDc1ZjdhYWNmYmI0OTlhY2Y4NTVmNDJkNWRjZmM5MTViNDhiOGg4amJ0IiwidGltZXN0YW1wIjoiMTc0OTgyODU3NjQ5NyIsIm9yaWdpbiI6Imh0dHBzOi8vZHVja2R1Y2tnby5jb20iLCJzdGFjayI6IkVycm9yXG5hdCBiYSAoaHR0cHM6Ly9kdWNrZHVja2dvLmNvbS9kaXN0L3dwbS5jaGF0LmNhZmQ3M2Y5N2Y1MWM5ODNlYjMwLmpzOjE6NzQ4MDMpXG5hdCBhc3luYyBkaXNwYXRjaFNlcnZpY2VJbml0aWFsVlFEIChodHRwczovL2R1Y2tkdWNrZ28uY29tL2Rpc3Qvd3BtLmNoYXQuY2FmZDczZjk3ZjUxYzk4M2ViMzAuanM6MTo5OTUyOSkifX0=".to_string()
}

fn default_cookies() -> Vec<Cookie> {
    vec![
        Cookie::new("5", "1"),
        Cookie::new("dcm", "3"),
        Cookie::new("dcs", "1"),
        Cookie::new("duckassist-opt-in-count", "1"),
        Cookie::new("isRecentChatOn", "1"),
        Cookie::new("preferredDuckAiModel", "3"),
    ]
}

impl Default for ClientProfile {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            accept_language: default_language(),
            sec_ch_ua: default_sec_ch_ua(),
            sec_ch_ua_platform: default_sec_ch_ua_platform(),
            origin: default_origin(),
            fe_signals: default_fe_signals(),
            fe_version: default_fe_version(),
            vqd_hash: default_vqd_hash(),
            cookies: default_cookies(),
        }
    }
}

impl ClientProfile {
    /// Cookie header value, `name=value` pairs joined with `; `.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl Config {
    pub fn dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ddgchat")
    }

    pub fn path() -> PathBuf {
        Self::dir().join("config.toml")
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path())
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if self.rate_limit.enabled && self.rate_limit.max_per_minute == 0 {
            return Err(ConfigError::InvalidValue {
                path: path.to_path_buf(),
                field: "rate_limit.max_per_minute".to_string(),
                value: "0".to_string(),
                valid_values: vec!["1 or more".to_string()],
            });
        }

        if self.rate_limit.enabled && self.rate_limit.max_per_hour < self.rate_limit.max_per_minute
        {
            return Err(ConfigError::InvalidValue {
                path: path.to_path_buf(),
                field: "rate_limit.max_per_hour".to_string(),
                value: self.rate_limit.max_per_hour.to_string(),
                valid_values: vec![format!(
                    "{} or more (rate_limit.max_per_minute)",
                    self.rate_limit.max_per_minute
                )],
            });
        }

        if self.client.default_model.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                path: path.to_path_buf(),
                field: "client.default_model".to_string(),
                value: String::new(),
                valid_values: available_models().iter().map(|m| m.to_string()).collect(),
            });
        }

        for (field, url) in [
            ("client.status_url", &self.client.status_url),
            ("client.chat_url", &self.client.chat_url),
        ] {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                return Err(ConfigError::InvalidValue {
                    path: path.to_path_buf(),
                    field: field.to_string(),
                    value: url.clone(),
                    valid_values: vec!["an http(s) URL".to_string()],
                });
            }
        }

        Ok(())
    }

    /// Write the config as TOML, creating parent directories.
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidValue {
            path: path.to_path_buf(),
            field: "serialization".to_string(),
            value: e.to_string(),
            valid_values: vec![],
        })?;

        std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(())
    }

    pub fn with_overrides(mut self, model: Option<String>, debug: bool) -> Self {
        if let Some(m) = model {
            self.client.default_model = m;
        }
        if debug {
            self.logging.debug = true;
            self.logging.enabled = true;
        }
        self
    }
}
