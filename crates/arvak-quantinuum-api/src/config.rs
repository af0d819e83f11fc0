//! Client configuration.
//!
//! [`ApiConfig`] is the runtime session configuration handed to
//! [`QuantinuumApi`](crate::QuantinuumApi).  [`QuantinuumConfig`] is its
//! on-disk counterpart, loaded from:
//! 1. Environment variables (with `ARVAK_QUANTINUUM_` prefix, `.env` honoured)
//! 2. The YAML file `<config_dir>/arvak/quantinuum.yaml`
//! 3. Default values
//!
//! in order of decreasing precedence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{QuantinuumError, QuantinuumResult};

/// Quantinuum cloud API root (the version segment is appended).
pub const DEFAULT_API_URL: &str = "https://qapi.quantinuum.com/";

/// Default API version.
pub const DEFAULT_API_VERSION: u32 = 1;

/// Name of the built-in federated identity provider.
pub const AZURE_PROVIDER: &str = "microsoft";

/// Configuration file name inside `<config_dir>/arvak/`.
pub const CONFIG_FILE: &str = "quantinuum.yaml";

const DEFAULT_RETRY_SECS: u64 = 5;
const DEFAULT_WEBSOCKET_IDLE_SECS: u64 = 180;
const DEFAULT_PING_SECS: u64 = 10;
const DEFAULT_REQUEST_SECS: u64 = 60;
const DEFAULT_CONNECT_SECS: u64 = 10;

/// Session configuration for a [`QuantinuumApi`](crate::QuantinuumApi).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// API root, e.g. `https://qapi.quantinuum.com/`.
    pub api_url: String,
    /// API version appended as `v<N>/`.
    pub api_version: u32,
    /// Ask the service for push-channel details when fetching status.
    pub use_websocket: bool,
    /// Federated identity provider name (e.g. `"microsoft"`).
    pub provider: Option<String>,
    /// Prompt for an MFA code when the service asks for one.
    pub support_mfa: bool,
    /// Overall wait timeout; `None` waits forever.  Reaching it ends the
    /// wait after at least one status fetch, see
    /// [`WaitSettings::timeout`](crate::WaitSettings::timeout).
    pub timeout: Option<Duration>,
    /// Pause between status polls and push-channel reconnects.
    pub retry_interval: Duration,
    /// Longest silence tolerated on the push channel before probing it.
    pub websocket_idle_timeout: Duration,
    /// How long to wait for a pong after probing the push channel.
    pub ping_timeout: Duration,
    /// Explicit push-channel URL; derived from `api_url` when unset.
    pub websocket_url: Option<String>,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    /// HTTP connect timeout.
    pub connect_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_version: DEFAULT_API_VERSION,
            use_websocket: true,
            provider: None,
            support_mfa: true,
            timeout: None,
            retry_interval: Duration::from_secs(DEFAULT_RETRY_SECS),
            websocket_idle_timeout: Duration::from_secs(DEFAULT_WEBSOCKET_IDLE_SECS),
            ping_timeout: Duration::from_secs(DEFAULT_PING_SECS),
            websocket_url: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_SECS),
        }
    }
}

impl ApiConfig {
    /// Default configuration targeting the production service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the API root URL.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Set the API version.
    pub fn with_api_version(mut self, version: u32) -> Self {
        self.api_version = version;
        self
    }

    /// Enable or disable push-channel waiting.
    pub fn with_websocket(mut self, enabled: bool) -> Self {
        self.use_websocket = enabled;
        self
    }

    /// Use a federated identity provider for full logins.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Enable or disable MFA prompting.
    pub fn with_mfa(mut self, enabled: bool) -> Self {
        self.support_mfa = enabled;
        self
    }

    /// Set the overall wait timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry interval.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the push-channel idle timeout.
    pub fn with_websocket_idle_timeout(mut self, timeout: Duration) -> Self {
        self.websocket_idle_timeout = timeout;
        self
    }

    /// Set the push-channel ping timeout.
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Use an explicit push-channel URL.
    pub fn with_websocket_url(mut self, url: impl Into<String>) -> Self {
        self.websocket_url = Some(url.into());
        self
    }

    /// Versioned base URL, always ending in `/`.
    pub fn base_url(&self) -> String {
        let root = self.api_url.trim_end_matches('/');
        format!("{root}/v{}/", self.api_version)
    }

    /// Full URL of an endpoint below the versioned base.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path.trim_start_matches('/'))
    }

    /// URL of the push-channel host.
    ///
    /// The notification service lives on the `ws.` sibling of the API host.
    pub fn push_url(&self) -> String {
        if let Some(url) = &self.websocket_url {
            return url.clone();
        }
        let base = self.base_url();
        if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://ws.{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://ws.{rest}")
        } else {
            base
        }
    }

    /// Check for values the client cannot work with.
    pub fn validate(&self) -> QuantinuumResult<()> {
        if !(self.api_url.starts_with("https://") || self.api_url.starts_with("http://")) {
            return Err(QuantinuumError::Config(format!(
                "api_url must be an http(s) URL, got '{}'",
                self.api_url
            )));
        }
        if self.api_version == 0 {
            return Err(QuantinuumError::Config("api_version must be positive".into()));
        }
        if self.retry_interval.is_zero() {
            return Err(QuantinuumError::Config(
                "retry_interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Persistent client settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantinuumConfig {
    /// Cached account email.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// API root URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    /// API version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<u32>,
    /// Whether to wait on the push channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_websocket: Option<bool>,
    /// Federated identity provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Whether to prompt for MFA codes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub support_mfa: Option<bool>,
    /// Overall wait timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Retry interval in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_seconds: Option<u64>,
    /// Push-channel idle timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket_timeout_seconds: Option<u64>,
}

impl QuantinuumConfig {
    /// Default file location: `<config_dir>/arvak/quantinuum.yaml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("arvak").join(CONFIG_FILE))
    }

    /// Load settings from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> QuantinuumResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        serde_yaml_ng::from_str(&contents).map_err(|e| {
            QuantinuumError::Config(format!(
                "Failed to parse {}: {e}",
                path.as_ref().display()
            ))
        })
    }

    /// Load the default file, falling back to defaults when it is missing or invalid.
    pub fn from_default_config_file() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::from_file(&path).unwrap_or_else(|e| {
            warn!("Ignoring unreadable Quantinuum config: {}", e);
            Self::default()
        })
    }

    /// Load with full precedence: environment (and `.env`) over file over defaults.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Self::from_default_config_file().merge_env()
    }

    /// Write settings to a YAML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> QuantinuumResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml_ng::to_string(self)
            .map_err(|e| QuantinuumError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Apply `ARVAK_QUANTINUUM_*` environment variables.
    pub fn merge_env(self) -> Self {
        self.merge_vars(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Only variables that are present override; unparsable numbers and
    /// booleans are ignored.
    pub fn merge_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("ARVAK_QUANTINUUM_USERNAME") {
            self.username = Some(v);
        }
        if let Some(v) = lookup("ARVAK_QUANTINUUM_API_URL") {
            self.api_url = Some(v);
        }
        if let Some(v) = lookup("ARVAK_QUANTINUUM_API_VERSION") {
            if let Ok(val) = v.parse() {
                self.api_version = Some(val);
            }
        }
        if let Some(v) = lookup("ARVAK_QUANTINUUM_USE_WEBSOCKET") {
            if let Some(val) = parse_bool(&v) {
                self.use_websocket = Some(val);
            }
        }
        if let Some(v) = lookup("ARVAK_QUANTINUUM_PROVIDER") {
            self.provider = Some(v);
        }
        if let Some(v) = lookup("ARVAK_QUANTINUUM_SUPPORT_MFA") {
            if let Some(val) = parse_bool(&v) {
                self.support_mfa = Some(val);
            }
        }
        if let Some(v) = lookup("ARVAK_QUANTINUUM_TIMEOUT") {
            if let Ok(val) = v.parse() {
                self.timeout_seconds = Some(val);
            }
        }
        if let Some(v) = lookup("ARVAK_QUANTINUUM_RETRY_TIMEOUT") {
            if let Ok(val) = v.parse() {
                self.retry_seconds = Some(val);
            }
        }
        if let Some(v) = lookup("ARVAK_QUANTINUUM_WS_TIMEOUT") {
            if let Ok(val) = v.parse() {
                self.websocket_timeout_seconds = Some(val);
            }
        }
        self
    }

    /// Session configuration with these settings applied over the defaults.
    pub fn api_config(&self) -> ApiConfig {
        let mut config = ApiConfig::default();
        if let Some(url) = &self.api_url {
            config.api_url.clone_from(url);
        }
        if let Some(version) = self.api_version {
            config.api_version = version;
        }
        if let Some(enabled) = self.use_websocket {
            config.use_websocket = enabled;
        }
        config.provider.clone_from(&self.provider);
        if let Some(enabled) = self.support_mfa {
            config.support_mfa = enabled;
        }
        config.timeout = self.timeout_seconds.map(Duration::from_secs);
        if let Some(secs) = self.retry_seconds {
            config.retry_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.websocket_timeout_seconds {
            config.websocket_idle_timeout = Duration::from_secs(secs);
        }
        config
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_urls() {
        let config = ApiConfig::default();
        assert_eq!(config.base_url(), "https://qapi.quantinuum.com/v1/");
        assert_eq!(config.endpoint("/job/abc"), "https://qapi.quantinuum.com/v1/job/abc");
        assert_eq!(config.push_url(), "wss://ws.qapi.quantinuum.com/v1/");
        assert!(config.timeout.is_none());
        assert_eq!(config.retry_interval, Duration::from_secs(5));
        assert_eq!(config.websocket_idle_timeout, Duration::from_secs(180));
        assert_eq!(config.ping_timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_base_url_without_trailing_slash() {
        let config = ApiConfig::new()
            .with_api_url("http://localhost:8080")
            .with_api_version(2);
        assert_eq!(config.base_url(), "http://localhost:8080/v2/");
        assert_eq!(config.push_url(), "ws://ws.localhost:8080/v2/");
    }

    #[test]
    fn test_push_url_override() {
        let config = ApiConfig::new().with_websocket_url("ws://127.0.0.1:9000");
        assert_eq!(config.push_url(), "ws://127.0.0.1:9000");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ApiConfig::new().with_api_url("ftp://x").validate().is_err());
        assert!(ApiConfig::new().with_api_version(0).validate().is_err());
        assert!(
            ApiConfig::new()
                .with_retry_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_yaml_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arvak").join(CONFIG_FILE);

        let config = QuantinuumConfig {
            username: Some("user@example.com".into()),
            use_websocket: Some(false),
            timeout_seconds: Some(600),
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = QuantinuumConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "api_version: [not, a, number]").unwrap();
        let err = QuantinuumConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, QuantinuumError::Config(_)));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let vars: HashMap<&str, &str> = [
            ("ARVAK_QUANTINUUM_USERNAME", "env@example.com"),
            ("ARVAK_QUANTINUUM_USE_WEBSOCKET", "false"),
            ("ARVAK_QUANTINUUM_TIMEOUT", "30"),
            ("ARVAK_QUANTINUUM_RETRY_TIMEOUT", "not-a-number"),
            ("ARVAK_QUANTINUUM_PROVIDER", "microsoft"),
        ]
        .into_iter()
        .collect();

        let file = QuantinuumConfig {
            username: Some("file@example.com".into()),
            retry_seconds: Some(2),
            ..Default::default()
        };
        let merged = file.merge_vars(|key| vars.get(key).map(|v| (*v).to_string()));

        assert_eq!(merged.username.as_deref(), Some("env@example.com"));
        assert_eq!(merged.use_websocket, Some(false));
        assert_eq!(merged.timeout_seconds, Some(30));
        assert_eq!(merged.retry_seconds, Some(2));

        let api = merged.api_config();
        assert!(!api.use_websocket);
        assert_eq!(api.timeout, Some(Duration::from_secs(30)));
        assert_eq!(api.retry_interval, Duration::from_secs(2));
        assert_eq!(api.provider.as_deref(), Some(AZURE_PROVIDER));
    }
}
