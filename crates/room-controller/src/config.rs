//! Runtime configuration for the room controller service.
//!
//! Settings come from `RC_`-prefixed environment variables. The database
//! URL is the only required variable; everything else has a default. The
//! Debug output never contains credentials.

use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP/WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default idle TTL for temporary rooms in seconds (24 hours).
pub const DEFAULT_ROOM_TTL_SECONDS: u64 = 86_400;

/// Default interval between expiry sweeps in seconds (15 minutes).
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 900;

/// Default window a connection may stay silent before it is considered dead.
pub const DEFAULT_PONG_TIMEOUT_SECONDS: u64 = 60;

/// Default write deadline for a single outbound frame.
pub const DEFAULT_WRITE_TIMEOUT_SECONDS: u64 = 10;

/// Default maximum inbound frame size in bytes.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 512;

/// Default per-connection outbound queue capacity.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

/// Default bound on the shutdown drain in seconds.
pub const DEFAULT_DRAIN_TIMEOUT_SECONDS: u64 = 10;

/// Runtime settings for the room controller.
///
/// Built once at startup by [`Config::from_env`] and shared through the
/// router state. Safe to log: the Debug impl redacts the database URL.
#[derive(Clone)]
pub struct Config {
    /// Postgres connection URL.
    /// Held as a `SecretString`; Debug prints `[REDACTED]` in its place.
    pub database_url: SecretString,

    /// HTTP/WebSocket server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Idle TTL after which the sweep ends a temporary room.
    pub room_ttl: Duration,

    /// Interval between expiry sweeps.
    pub sweep_interval: Duration,

    /// How long a connection may stay silent before forced close.
    pub pong_timeout: Duration,

    /// Interval between liveness probes; must be shorter than `pong_timeout`.
    /// Defaults to nine tenths of `pong_timeout`.
    pub ping_interval: Duration,

    /// Deadline for writing a single outbound frame.
    pub write_timeout: Duration,

    /// Maximum inbound frame size in bytes; larger frames close the connection.
    pub max_message_bytes: usize,

    /// Per-connection outbound queue capacity. A full queue marks the
    /// connection as a slow consumer and it is dropped.
    pub outbound_queue: usize,

    /// Bound on how long shutdown waits for in-flight writes to drain.
    pub drain_timeout: Duration,

    /// Session descriptor published by the audio mixing endpoint, handed out
    /// as the answer to signaling offers. Unset means signaling offers fail
    /// for lack of a mixer.
    pub mixer_descriptor: Option<String>,
}

// Manual impl: `{:?}` must not expose the connection string.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("room_ttl", &self.room_ttl)
            .field("sweep_interval", &self.sweep_interval)
            .field("pong_timeout", &self.pong_timeout)
            .field("ping_interval", &self.ping_interval)
            .field("write_timeout", &self.write_timeout)
            .field("max_message_bytes", &self.max_message_bytes)
            .field("outbound_queue", &self.outbound_queue)
            .field("drain_timeout", &self.drain_timeout)
            .field(
                "mixer_descriptor",
                &self.mixer_descriptor.as_deref().map(|_| "[set]"),
            )
            .finish()
    }
}

/// Failure modes when building a [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is absent.
    #[error("environment variable {0} is not set")]
    Missing(String),

    /// A value is out of range or inconsistent with another setting.
    #[error("rejected configuration value: {0}")]
    Invalid(String),
}

impl Config {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Build settings from an explicit variable map. Unit tests call this
    /// directly so they never touch the process environment.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = SecretString::from(
            vars.get("RC_DATABASE_URL")
                .ok_or_else(|| ConfigError::Missing("RC_DATABASE_URL".to_string()))?
                .clone(),
        );

        let bind_address = vars
            .get("RC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let room_ttl_seconds = parse_or(vars, "RC_ROOM_TTL_SECONDS", DEFAULT_ROOM_TTL_SECONDS);
        let sweep_interval_seconds = parse_or(
            vars,
            "RC_SWEEP_INTERVAL_SECONDS",
            DEFAULT_SWEEP_INTERVAL_SECONDS,
        );
        let pong_timeout_seconds =
            parse_or(vars, "RC_PONG_TIMEOUT_SECONDS", DEFAULT_PONG_TIMEOUT_SECONDS);

        // Probe interval defaults to nine tenths of the silence window so a
        // healthy client always has a probe in flight before the deadline.
        let ping_interval_seconds = parse_or(
            vars,
            "RC_PING_INTERVAL_SECONDS",
            pong_timeout_seconds * 9 / 10,
        );

        let write_timeout_seconds = parse_or(
            vars,
            "RC_WRITE_TIMEOUT_SECONDS",
            DEFAULT_WRITE_TIMEOUT_SECONDS,
        );
        let max_message_bytes = parse_or(vars, "RC_MAX_MESSAGE_BYTES", DEFAULT_MAX_MESSAGE_BYTES);
        let outbound_queue = parse_or(vars, "RC_OUTBOUND_QUEUE", DEFAULT_OUTBOUND_QUEUE);
        let drain_timeout_seconds = parse_or(
            vars,
            "RC_DRAIN_TIMEOUT_SECONDS",
            DEFAULT_DRAIN_TIMEOUT_SECONDS,
        );

        let mixer_descriptor = vars
            .get("RC_MIXER_DESCRIPTOR")
            .filter(|s| !s.is_empty())
            .cloned();

        if pong_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "RC_PONG_TIMEOUT_SECONDS must be positive".to_string(),
            ));
        }
        if ping_interval_seconds == 0 || ping_interval_seconds >= pong_timeout_seconds {
            return Err(ConfigError::Invalid(format!(
                "RC_PING_INTERVAL_SECONDS ({ping_interval_seconds}) must be positive and shorter \
                 than RC_PONG_TIMEOUT_SECONDS ({pong_timeout_seconds})"
            )));
        }
        if max_message_bytes == 0 {
            return Err(ConfigError::Invalid(
                "RC_MAX_MESSAGE_BYTES must be positive".to_string(),
            ));
        }
        if outbound_queue == 0 {
            return Err(ConfigError::Invalid(
                "RC_OUTBOUND_QUEUE must be positive".to_string(),
            ));
        }

        Ok(Config {
            database_url,
            bind_address,
            room_ttl: Duration::from_secs(room_ttl_seconds),
            sweep_interval: Duration::from_secs(sweep_interval_seconds),
            pong_timeout: Duration::from_secs(pong_timeout_seconds),
            ping_interval: Duration::from_secs(ping_interval_seconds),
            write_timeout: Duration::from_secs(write_timeout_seconds),
            max_message_bytes,
            outbound_queue,
            drain_timeout: Duration::from_secs(drain_timeout_seconds),
            mixer_descriptor,
        })
    }
}

fn parse_or<T: std::str::FromStr>(vars: &HashMap<String, String>, key: &str, default: T) -> T {
    vars.get(key).and_then(|s| s.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([(
            "RC_DATABASE_URL".to_string(),
            "postgres://localhost:5432/hearth".to_string(),
        )])
    }

    #[test]
    fn test_defaults_fill_everything_but_the_url() {
        let config = Config::from_vars(&base_vars()).expect("config should load");

        assert_eq!(
            config.database_url.expose_secret(),
            "postgres://localhost:5432/hearth"
        );
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.room_ttl, Duration::from_secs(86_400));
        assert_eq!(config.sweep_interval, Duration::from_secs(900));
        assert_eq!(config.pong_timeout, Duration::from_secs(60));
        assert_eq!(config.ping_interval, Duration::from_secs(54));
        assert_eq!(config.write_timeout, Duration::from_secs(10));
        assert_eq!(config.max_message_bytes, 512);
        assert_eq!(config.outbound_queue, 256);
        assert!(config.mixer_descriptor.is_none());
    }

    #[test]
    fn test_database_url_is_required() {
        let err = Config::from_vars(&HashMap::new()).expect_err("should fail without url");

        assert!(matches!(err, ConfigError::Missing(ref k) if k == "RC_DATABASE_URL"));
    }

    #[test]
    fn test_from_vars_overrides() {
        let mut vars = base_vars();
        vars.insert("RC_BIND_ADDRESS".to_string(), "127.0.0.1:9000".to_string());
        vars.insert("RC_ROOM_TTL_SECONDS".to_string(), "3600".to_string());
        vars.insert("RC_PONG_TIMEOUT_SECONDS".to_string(), "10".to_string());
        vars.insert("RC_PING_INTERVAL_SECONDS".to_string(), "4".to_string());
        vars.insert("RC_MAX_MESSAGE_BYTES".to_string(), "2048".to_string());
        vars.insert("RC_MIXER_DESCRIPTOR".to_string(), "v=0 mixer".to_string());

        let config = Config::from_vars(&vars).expect("config should load");

        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.room_ttl, Duration::from_secs(3600));
        assert_eq!(config.pong_timeout, Duration::from_secs(10));
        assert_eq!(config.ping_interval, Duration::from_secs(4));
        assert_eq!(config.max_message_bytes, 2048);
        assert_eq!(config.mixer_descriptor.as_deref(), Some("v=0 mixer"));
    }

    #[test]
    fn test_ping_interval_derived_from_pong_timeout() {
        let mut vars = base_vars();
        vars.insert("RC_PONG_TIMEOUT_SECONDS".to_string(), "30".to_string());

        let config = Config::from_vars(&vars).expect("config should load");

        assert_eq!(config.ping_interval, Duration::from_secs(27));
    }

    #[test]
    fn test_ping_interval_must_be_shorter_than_pong_timeout() {
        let mut vars = base_vars();
        vars.insert("RC_PONG_TIMEOUT_SECONDS".to_string(), "10".to_string());
        vars.insert("RC_PING_INTERVAL_SECONDS".to_string(), "10".to_string());

        let err = Config::from_vars(&vars).expect_err("should reject probe >= deadline");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_invalid_numbers_fall_back_to_defaults() {
        let mut vars = base_vars();
        vars.insert("RC_ROOM_TTL_SECONDS".to_string(), "not-a-number".to_string());

        let config = Config::from_vars(&vars).expect("config should load");

        assert_eq!(config.room_ttl, Duration::from_secs(DEFAULT_ROOM_TTL_SECONDS));
    }

    #[test]
    fn test_zero_queue_rejected() {
        let mut vars = base_vars();
        vars.insert("RC_OUTBOUND_QUEUE".to_string(), "0".to_string());

        let err = Config::from_vars(&vars).expect_err("should reject zero queue");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_debug_output_hides_credentials() {
        let mut vars = base_vars();
        vars.insert(
            "RC_DATABASE_URL".to_string(),
            "postgres://user:hunter2@db:5432/hearth".to_string(),
        );
        let config = Config::from_vars(&vars).expect("config should load");

        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_empty_mixer_descriptor_treated_as_unset() {
        let mut vars = base_vars();
        vars.insert("RC_MIXER_DESCRIPTOR".to_string(), String::new());

        let config = Config::from_vars(&vars).expect("config should load");
        assert!(config.mixer_descriptor.is_none());
    }
}
