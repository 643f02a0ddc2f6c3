//! Process configuration.
//!
//! Settings come from three layers, later layers winning:
//!
//! ```text
//! config file (.json or YAML)  -->  GATEWAY_* env vars (.env honored)  -->  CLI flags
//! ```
//!
//! The CLI layer is applied by the `serve` command, not here.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

/// Default port the gateway listens on.
pub const DEFAULT_PORT: u16 = 18790;

/// What to do when two webhook channels resolve to the same path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteCollisionPolicy {
    /// Refuse to build the route table.
    #[default]
    Reject,
    /// Keep the channel registered first.
    FirstWins,
    /// Keep the channel registered last.
    LastWins,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Verbose mode logs at info level, including HTTP access lines.
    pub verbose: bool,
    /// Upper bound on waiting for in-flight requests after `stop()`.
    /// `None` waits for them to finish, however long that takes.
    pub drain_timeout_secs: Option<u64>,
    pub route_collision: RouteCollisionPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            verbose: false,
            drain_timeout_secs: None,
            route_collision: RouteCollisionPolicy::default(),
        }
    }
}

impl GatewayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_secs.map(Duration::from_secs)
    }

    /// Default tracing filter when `RUST_LOG` is not set.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose { "info" } else { "warn" }
    }

    /// Apply `GATEWAY_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `GATEWAY_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("GATEWAY_HOST") {
            self.host = host;
        }
        if let Some(port) = parse_override::<u16>(&lookup, "GATEWAY_PORT")? {
            self.port = port;
        }
        if let Some(verbose) = parse_override::<bool>(&lookup, "GATEWAY_VERBOSE")? {
            self.verbose = verbose;
        }
        if let Some(secs) = parse_override::<u64>(&lookup, "GATEWAY_DRAIN_TIMEOUT_SECS")? {
            self.drain_timeout_secs = Some(secs);
        }
        Ok(())
    }
}

fn parse_override<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        })
        .transpose()
}

/// Which channel implementation backs a configured channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    #[default]
    Generic,
}

/// Per-channel settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(default)]
    pub kind: ChannelKind,
    #[serde(default = "default_true")]
    pub webhook_enabled: bool,
    /// Overrides the path segment after `/webhook/`.
    #[serde(default)]
    pub webhook_path: Option<String>,
    /// HMAC-SHA256 key for inbound signature verification.
    #[serde(default, deserialize_with = "deserialize_option_secret_string")]
    pub secret: Option<SecretString>,
    #[serde(default = "default_signature_header")]
    pub signature_header: String,
    /// JSON pointers into each inbound message.
    #[serde(default = "default_sender_pointer")]
    pub sender_pointer: String,
    #[serde(default = "default_chat_pointer")]
    pub chat_pointer: String,
    #[serde(default = "default_content_pointer")]
    pub content_pointer: String,
    /// Where `send()` POSTs outbound messages.
    #[serde(default)]
    pub outbound_url: Option<String>,
    /// Platform endpoint that `start()` registers our webhook URL with.
    #[serde(default)]
    pub registration_url: Option<String>,
    /// Externally reachable base URL of this gateway, e.g. `https://bot.example.com`.
    #[serde(default)]
    pub public_url: Option<String>,
}

fn deserialize_option_secret_string<'de, D>(
    deserializer: D,
) -> Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.map(SecretString::from))
}

fn default_true() -> bool {
    true
}

fn default_signature_header() -> String {
    "x-hub-signature-256".to_string()
}

fn default_sender_pointer() -> String {
    "/sender".to_string()
}

fn default_chat_pointer() -> String {
    "/chat_id".to_string()
}

fn default_content_pointer() -> String {
    "/text".to_string()
}

impl ChannelConfig {
    /// A channel config with every optional setting at its default.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::default(),
            webhook_enabled: true,
            webhook_path: None,
            secret: None,
            signature_header: default_signature_header(),
            sender_pointer: default_sender_pointer(),
            chat_pointer: default_chat_pointer(),
            content_pointer: default_content_pointer(),
            outbound_url: None,
            registration_url: None,
            public_url: None,
        }
    }
}

/// Full process configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    /// Channels in registration order.
    pub channels: Vec<ChannelConfig>,
}

impl AppConfig {
    /// Load `.env`, the optional config file, then env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.gateway.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file. `.json` is read as JSON, anything else as YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            serde_json::from_str(&raw).map_err(|e| ConfigError::ParseError(e.to_string()))
        } else {
            serde_yaml::from_str(&raw).map_err(|e| ConfigError::ParseError(e.to_string()))
        }
    }

    /// Channel names must be non-empty and unique.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for channel in &self.channels {
            if channel.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "channels.name".to_string(),
                    message: "channel name must not be empty".to_string(),
                });
            }
            if !seen.insert(channel.name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    key: "channels.name".to_string(),
                    message: format!("duplicate channel name '{}'", channel.name),
                });
            }
        }
        Ok(())
    }
}
