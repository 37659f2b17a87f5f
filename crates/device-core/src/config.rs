//! Device configuration
//!
//! [`DeviceConfig`] is immutable once a `Device` has been built from it. It
//! can be assembled with the `with_*` methods or deserialized from the JSON
//! shape web applications already pass around (camelCase keys, scalar or
//! list values for the server lists, port as number or string).
//!
//! ```text
//! ┌──────────────────────────┐
//! │       DeviceConfig       │   host, port, path, credentials,
//! │                          │   ICE servers, registrar, logging
//! └────────────┬─────────────┘
//!              │ user_agent_config()
//! ┌────────────▼─────────────┐
//! │     UserAgentConfig      │   derived AOR, wss:// transport URL,
//! │                          │   audio-only constraints, log options
//! └──────────────────────────┘
//! ```
//!
//! # Examples
//!
//! ```rust
//! use rvoip_device_core::config::{DeviceConfig, LogLevel};
//!
//! let config = DeviceConfig::new("sip.example.com", 7443)
//!     .with_credentials("alice", "secret")
//!     .with_path("/ws")
//!     .with_log_level(LogLevel::Warn);
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.aor(), "sip:alice@sip.example.com");
//! assert_eq!(config.transport_url().unwrap().as_str(), "wss://sip.example.com:7443/ws");
//! ```
//!
//! ```rust
//! use rvoip_device_core::config::DeviceConfig;
//!
//! let config = DeviceConfig::from_json(r#"{
//!     "host": "sip.example.com",
//!     "port": "7443",
//!     "username": "alice",
//!     "stunServers": "stun:stun.example.com:3478"
//! }"#).unwrap();
//!
//! assert_eq!(config.port, 7443);
//! assert_eq!(config.stun_servers.len(), 1);
//! ```

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::error::{DeviceError, DeviceResult};
use crate::registration::UnregisterStrategy;
use crate::stack::MediaConstraints;

/// Verbosity forwarded to the signaling stack's own logger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Log,
    Warn,
    Error,
    /// Disable the stack's builtin logging entirely
    Off,
}

impl LogLevel {
    /// Matching `tracing` level, `None` for `Off`
    pub fn as_tracing_level(&self) -> Option<tracing::Level> {
        match self {
            LogLevel::Debug => Some(tracing::Level::DEBUG),
            LogLevel::Log => Some(tracing::Level::INFO),
            LogLevel::Warn => Some(tracing::Level::WARN),
            LogLevel::Error => Some(tracing::Level::ERROR),
            LogLevel::Off => None,
        }
    }
}

/// TURN relay entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnServer {
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Budget for the early-media answer wait
///
/// After forcing a session into early media the call checks for a confirmed
/// answer every `interval_ms`, at most `max_attempts` times, before applying
/// the provisional body itself. The defaults match the timing of the stack
/// this layer was first written against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EarlyMediaPolicy {
    pub max_attempts: u32,
    pub interval_ms: u64,
}

impl EarlyMediaPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for EarlyMediaPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 14,
            interval_ms: 10,
        }
    }
}

/// Device configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    /// Signaling server host (required)
    #[serde(default, deserialize_with = "string_or_null")]
    pub host: String,

    /// Signaling server port (required)
    #[serde(default, deserialize_with = "port_number_or_string")]
    pub port: u16,

    /// WebSocket path appended to the transport URL
    #[serde(default)]
    pub path: String,

    /// Explicit WebSocket servers. When empty the transport URL is derived
    /// from host, port and path.
    #[serde(default, deserialize_with = "one_or_many")]
    pub ws_servers: Vec<String>,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: Option<String>,

    /// Defaults to the username
    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub stun_servers: Vec<String>,

    #[serde(default)]
    pub turn_servers: Vec<TurnServer>,

    #[serde(default)]
    pub registrar_server: Option<String>,

    /// Have the stack log every SIP message
    #[serde(default)]
    pub trace_sip: bool,

    #[serde(default)]
    pub log_level: Option<LogLevel>,

    #[serde(default)]
    pub early_media: EarlyMediaPolicy,

    #[serde(default)]
    pub unregister_strategy: UnregisterStrategy,
}

impl DeviceConfig {
    /// Create a configuration for `host:port` with everything else defaulted
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            path: String::new(),
            ws_servers: Vec::new(),
            username: String::new(),
            password: None,
            display_name: None,
            stun_servers: Vec::new(),
            turn_servers: Vec::new(),
            registrar_server: None,
            trace_sip: false,
            log_level: None,
            early_media: EarlyMediaPolicy::default(),
            unregister_strategy: UnregisterStrategy::default(),
        }
    }

    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> DeviceResult<Self> {
        let config: DeviceConfig = serde_json::from_str(json)
            .map_err(|e| DeviceError::config(format!("invalid device configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = Some(password.into());
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_ws_server(mut self, server: impl Into<String>) -> Self {
        self.ws_servers.push(server.into());
        self
    }

    pub fn with_stun_server(mut self, server: impl Into<String>) -> Self {
        self.stun_servers.push(server.into());
        self
    }

    pub fn with_turn_server(mut self, server: TurnServer) -> Self {
        self.turn_servers.push(server);
        self
    }

    pub fn with_registrar(mut self, registrar: impl Into<String>) -> Self {
        self.registrar_server = Some(registrar.into());
        self
    }

    pub fn with_trace_sip(mut self, trace_sip: bool) -> Self {
        self.trace_sip = trace_sip;
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    pub fn with_early_media_policy(mut self, policy: EarlyMediaPolicy) -> Self {
        self.early_media = policy;
        self
    }

    pub fn with_unregister_strategy(mut self, strategy: UnregisterStrategy) -> Self {
        self.unregister_strategy = strategy;
        self
    }

    /// Check the required parameters
    pub fn validate(&self) -> DeviceResult<()> {
        if self.host.trim().is_empty() {
            return Err(DeviceError::MissingParameter { name: "host" });
        }
        if self.port == 0 {
            return Err(DeviceError::MissingParameter { name: "port" });
        }
        if self.early_media.max_attempts == 0 {
            return Err(DeviceError::config("earlyMedia.maxAttempts must be at least 1"));
        }
        self.transport_url()?;
        Ok(())
    }

    /// Address of record, `sip:{username}@{host}`
    pub fn aor(&self) -> String {
        format!("sip:{}@{}", self.username, self.host)
    }

    pub fn effective_display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }

    /// Derived WebSocket transport URL, `wss://{host}:{port}{path}`
    pub fn transport_url(&self) -> DeviceResult<Url> {
        let raw = format!("wss://{}:{}{}", self.host, self.port, self.path);
        Url::parse(&raw).map_err(|e| DeviceError::config(format!("invalid transport url {}: {}", raw, e)))
    }

    /// Plain HTTPS URL used by the connectivity pre-flight
    pub fn probe_url(&self) -> DeviceResult<Url> {
        let raw = format!("https://{}:{}", self.host, self.port);
        Url::parse(&raw).map_err(|e| DeviceError::config(format!("invalid probe url {}: {}", raw, e)))
    }

    /// Configuration handed to the user agent factory
    pub fn user_agent_config(&self) -> DeviceResult<UserAgentConfig> {
        let ws_servers = if self.ws_servers.is_empty() {
            vec![self.transport_url()?.to_string()]
        } else {
            self.ws_servers.clone()
        };

        let log = match self.log_level {
            Some(LogLevel::Off) => StackLogConfig {
                builtin_enabled: false,
                level: None,
            },
            level => StackLogConfig {
                builtin_enabled: true,
                level,
            },
        };

        Ok(UserAgentConfig {
            uri: self.aor(),
            ws_servers,
            authorization_user: self.username.clone(),
            password: self.password.clone(),
            display_name: self.effective_display_name().to_string(),
            stun_servers: self.stun_servers.clone(),
            turn_servers: self.turn_servers.clone(),
            registrar_server: self.registrar_server.clone(),
            media_constraints: MediaConstraints::audio_only(),
            trace_sip: self.trace_sip,
            log,
        })
    }
}

/// Logging options for the stack's builtin logger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackLogConfig {
    pub builtin_enabled: bool,
    pub level: Option<LogLevel>,
}

/// Everything the user agent needs, derived from [`DeviceConfig`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAgentConfig {
    pub uri: String,
    pub ws_servers: Vec<String>,
    pub authorization_user: String,
    pub password: Option<String>,
    pub display_name: String,
    pub stun_servers: Vec<String>,
    pub turn_servers: Vec<TurnServer>,
    pub registrar_server: Option<String>,
    pub media_constraints: MediaConstraints,
    pub trace_sip: bool,
    pub log: StackLogConfig,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Nothing(()),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
        OneOrMany::Nothing(()) => Vec::new(),
    })
}

fn string_or_null<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Port as number or string. Null and blank strings read as 0 so that
/// `validate()` reports the port as missing.
fn port_number_or_string<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
        Nothing(()),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) if text.trim().is_empty() => Ok(0),
        Port::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port '{}'", text))),
        Port::Nothing(()) => Ok(0),
    }
}
