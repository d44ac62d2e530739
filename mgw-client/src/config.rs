//! # Client Configuration
//!
//! Purpose: Hold every knob the sessions and the pool read, passed explicitly
//! to constructors as one typed struct.
//!
//! ## Design Principles
//! 1. **Typed, Not Keyed**: No string-keyed service bags; a missing field is a
//!    compile error, not a runtime cast failure.
//! 2. **Layered Sources**: Defaults, then an optional JSON document, then
//!    `MGW_*` environment variables.
//! 3. **Secret Hygiene**: `Debug` redacts the password.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{ClientError, ClientResult};

/// Configuration for sessions and the pool.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host name or IP.
    pub host: String,
    /// Server TCP port.
    pub port: u16,
    /// Manager login.
    pub login: String,
    /// Manager password; only its digest is ever sent.
    pub password: String,
    /// Protocol version string sent in `AUTH_START`.
    pub version: String,
    /// Agent identifier sent in `AUTH_START`.
    pub agent: String,
    /// Keepalive period.
    #[serde(deserialize_with = "duration_secs")]
    pub ping_interval: Duration,
    /// Default wait for a blocking call.
    #[serde(deserialize_with = "duration_secs")]
    pub request_timeout: Duration,
    /// TCP connect timeout.
    #[serde(deserialize_with = "duration_secs")]
    pub connect_timeout: Duration,
    /// Pause between reconnect attempts.
    #[serde(deserialize_with = "duration_secs")]
    pub reconnect_delay: Duration,
    /// Idle period after which a worker emits a heartbeat tick.
    #[serde(deserialize_with = "duration_secs")]
    pub idle_interval: Duration,
    /// Number of sessions in the pool.
    pub pool_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            port: 443,
            login: String::new(),
            password: String::new(),
            version: "2190".to_string(),
            agent: "mgw-client".to_string(),
            ping_interval: Duration::from_secs(20),
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(1),
            idle_interval: Duration::from_secs(20),
            pool_size: 4,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("version", &self.version)
            .field("agent", &self.agent)
            .field("ping_interval", &self.ping_interval)
            .field("request_timeout", &self.request_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("idle_interval", &self.idle_interval)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

impl ClientConfig {
    /// Server address as `host:port`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parses a JSON document; missing fields keep their defaults.
    pub fn from_json(text: &str) -> ClientResult<Self> {
        serde_json::from_str(text).map_err(|err| ClientError::Config(err.to_string()))
    }

    /// Loads defaults overlaid with `MGW_*` environment variables.
    pub fn from_env() -> ClientResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Overlays values from `lookup` on the defaults.
    ///
    /// Durations are whole seconds except `MGW_RECONNECT_DELAY_MS`.
    pub fn from_lookup<F>(lookup: F) -> ClientResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ClientConfig::default();

        if let Some(v) = lookup("MGW_HOST") {
            config.host = v;
        }
        if let Some(v) = lookup("MGW_PORT") {
            config.port = parse_var("MGW_PORT", &v)?;
        }
        if let Some(v) = lookup("MGW_LOGIN") {
            config.login = v;
        }
        if let Some(v) = lookup("MGW_PASSWORD") {
            config.password = v;
        }
        if let Some(v) = lookup("MGW_VERSION") {
            config.version = v;
        }
        if let Some(v) = lookup("MGW_AGENT") {
            config.agent = v;
        }
        if let Some(v) = lookup("MGW_PING_INTERVAL_SECS") {
            config.ping_interval = Duration::from_secs(parse_var("MGW_PING_INTERVAL_SECS", &v)?);
            config.idle_interval = config.ping_interval;
        }
        if let Some(v) = lookup("MGW_IDLE_INTERVAL_SECS") {
            config.idle_interval = Duration::from_secs(parse_var("MGW_IDLE_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = lookup("MGW_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(parse_var("MGW_REQUEST_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("MGW_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = Duration::from_secs(parse_var("MGW_CONNECT_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("MGW_RECONNECT_DELAY_MS") {
            config.reconnect_delay = Duration::from_millis(parse_var("MGW_RECONNECT_DELAY_MS", &v)?);
        }
        if let Some(v) = lookup("MGW_POOL_SIZE") {
            config.pool_size = parse_var("MGW_POOL_SIZE", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the pool cannot run with.
    pub fn validate(&self) -> ClientResult<()> {
        if self.host.is_empty() {
            return Err(ClientError::Config("host is empty".to_string()));
        }
        if self.login.is_empty() {
            return Err(ClientError::Config("login is empty".to_string()));
        }
        if self.pool_size == 0 {
            return Err(ClientError::Config("pool_size must be at least 1".to_string()));
        }
        for (name, value) in [
            ("ping_interval", self.ping_interval),
            ("request_timeout", self.request_timeout),
            ("connect_timeout", self.connect_timeout),
            ("reconnect_delay", self.reconnect_delay),
            ("idle_interval", self.idle_interval),
        ] {
            if value.is_zero() {
                return Err(ClientError::Config(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> ClientResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| ClientError::Config(format!("{key}={raw:?} is not a valid number")))
}

fn duration_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
    }
    Ok(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_overlays_defaults() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("MGW_HOST", "mgr.example"),
            ("MGW_PORT", "4430"),
            ("MGW_LOGIN", "1001"),
            ("MGW_PING_INTERVAL_SECS", "30"),
            ("MGW_RECONNECT_DELAY_MS", "250"),
            ("MGW_POOL_SIZE", "8"),
        ]))
        .unwrap();

        assert_eq!(config.addr(), "mgr.example:4430");
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.idle_interval, Duration::from_secs(30));
        assert_eq!(config.reconnect_delay, Duration::from_millis(250));
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn bad_number_is_a_config_error() {
        let err = ClientConfig::from_lookup(lookup_from(&[("MGW_LOGIN", "1"), ("MGW_PORT", "http")]))
            .unwrap_err();
        assert!(matches!(err, ClientError::Config(msg) if msg.contains("MGW_PORT")));
    }

    #[test]
    fn validate_rejects_empty_pool() {
        let config = ClientConfig {
            login: "1001".to_string(),
            pool_size: 0,
            ..ClientConfig::default()
        };
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));
    }

    #[test]
    fn validate_rejects_zero_connect_timeout_and_reconnect_delay() {
        let base = ClientConfig {
            login: "1001".to_string(),
            ..ClientConfig::default()
        };
        assert!(base.validate().is_ok());

        let no_connect = ClientConfig {
            connect_timeout: Duration::ZERO,
            ..base.clone()
        };
        assert!(matches!(no_connect.validate(), Err(ClientError::Config(msg)) if msg.contains("connect_timeout")));

        let err = ClientConfig::from_lookup(lookup_from(&[("MGW_LOGIN", "1"), ("MGW_RECONNECT_DELAY_MS", "0")]))
            .unwrap_err();
        assert!(matches!(err, ClientError::Config(msg) if msg.contains("reconnect_delay")));
    }

    #[test]
    fn validate_requires_login() {
        assert!(ClientConfig::default().validate().is_err());
    }

    #[test]
    fn json_fields_are_seconds() {
        let config = ClientConfig::from_json(
            r#"{"host":"10.0.0.5","login":"7","request_timeout":2.5,"pool_size":2}"#,
        )
        .unwrap();
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.request_timeout, Duration::from_millis(2500));
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.port, 443);
    }

    #[test]
    fn debug_redacts_password() {
        let config = ClientConfig {
            password: "hunter2".to_string(),
            ..ClientConfig::default()
        };
        let printed = format!("{config:?}");
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("<redacted>"));
    }
}
