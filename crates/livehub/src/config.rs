//! Hub configuration.

use std::str::FromStr;
use std::time::Duration;

use livehub_room::{EchoPolicy, RoomConfig};
use serde::{Deserialize, Serialize};

/// Multiple of `max_message_size` the transport accepts before dropping.
const TRANSPORT_LIMIT_FACTOR: usize = 4;

/// Errors produced while loading or validating a [`HubConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable was set but couldn't be parsed.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },

    /// The values parsed but don't make sense together.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Timeouts, size limits and queue capacities for a hub and its connections.
///
/// Start from `HubConfig::default()` and override what you need, or load
/// overrides from the environment with [`from_env`](Self::from_env).
/// Deserializing fills missing fields from the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Deadline for a new connection to finish the WebSocket upgrade and
    /// authentication.
    pub read_timeout: Duration,

    /// Bound on each outbound write. A write that takes longer kills the
    /// connection.
    pub write_timeout: Duration,

    /// Time between keepalive pings.
    pub keepalive_interval: Duration,

    /// How long a ping may wait for its pong. Must not exceed
    /// `keepalive_interval`.
    pub keepalive_timeout: Duration,

    /// Largest accepted text frame, in bytes.
    pub max_message_size: usize,

    /// Capacity of the hub's command queue.
    pub command_buffer: usize,

    /// Capacity of each room's command queue.
    pub room_buffer: usize,

    /// Capacity of each connection's outbound queue.
    pub send_buffer: usize,

    /// Capacity of each connection's inbound queue.
    pub recv_buffer: usize,

    /// Whether relayed messages go back to their sender.
    pub echo_policy: EchoPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(15),
            write_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(10),
            keepalive_timeout: Duration::from_secs(10),
            max_message_size: 64 * 1024,
            command_buffer: 40,
            room_buffer: 256,
            send_buffer: 64,
            recv_buffer: 64,
            echo_policy: EchoPolicy::ExcludeSender,
        }
    }
}

impl HubConfig {
    /// Loads the defaults overlaid with `LIVEHUB_*` environment variables,
    /// then validates the result.
    ///
    /// | variable | field |
    /// |---|---|
    /// | `LIVEHUB_READ_TIMEOUT_MS` | `read_timeout` |
    /// | `LIVEHUB_WRITE_TIMEOUT_MS` | `write_timeout` |
    /// | `LIVEHUB_KEEPALIVE_INTERVAL_MS` | `keepalive_interval` |
    /// | `LIVEHUB_KEEPALIVE_TIMEOUT_MS` | `keepalive_timeout` |
    /// | `LIVEHUB_MAX_MESSAGE_SIZE` | `max_message_size` |
    /// | `LIVEHUB_COMMAND_BUFFER` | `command_buffer` |
    /// | `LIVEHUB_ROOM_BUFFER` | `room_buffer` |
    /// | `LIVEHUB_SEND_BUFFER` | `send_buffer` |
    /// | `LIVEHUB_RECV_BUFFER` | `recv_buffer` |
    /// | `LIVEHUB_ECHO_POLICY` | `echo_policy` (`exclude-sender` or `include-sender`) |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reads variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let millis = |key: &'static str, field: &mut Duration| -> Result<(), ConfigError> {
            if let Some(ms) = parse::<u64>(&lookup, key)? {
                *field = Duration::from_millis(ms);
            }
            Ok(())
        };
        millis("LIVEHUB_READ_TIMEOUT_MS", &mut config.read_timeout)?;
        millis("LIVEHUB_WRITE_TIMEOUT_MS", &mut config.write_timeout)?;
        millis("LIVEHUB_KEEPALIVE_INTERVAL_MS", &mut config.keepalive_interval)?;
        millis("LIVEHUB_KEEPALIVE_TIMEOUT_MS", &mut config.keepalive_timeout)?;

        let size = |key: &'static str, field: &mut usize| -> Result<(), ConfigError> {
            if let Some(n) = parse::<usize>(&lookup, key)? {
                *field = n;
            }
            Ok(())
        };
        size("LIVEHUB_MAX_MESSAGE_SIZE", &mut config.max_message_size)?;
        size("LIVEHUB_COMMAND_BUFFER", &mut config.command_buffer)?;
        size("LIVEHUB_ROOM_BUFFER", &mut config.room_buffer)?;
        size("LIVEHUB_SEND_BUFFER", &mut config.send_buffer)?;
        size("LIVEHUB_RECV_BUFFER", &mut config.recv_buffer)?;

        if let Some(value) = lookup("LIVEHUB_ECHO_POLICY") {
            config.echo_policy = match value.trim() {
                "exclude-sender" => EchoPolicy::ExcludeSender,
                "include-sender" => EchoPolicy::IncludeSender,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "LIVEHUB_ECHO_POLICY",
                        value,
                    });
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks that every capacity and duration is non-zero and that the
    /// keepalive timeout fits inside the keepalive interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("read_timeout", self.read_timeout),
            ("write_timeout", self.write_timeout),
            ("keepalive_interval", self.keepalive_interval),
            ("keepalive_timeout", self.keepalive_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }

        let sizes = [
            ("max_message_size", self.max_message_size),
            ("command_buffer", self.command_buffer),
            ("room_buffer", self.room_buffer),
            ("send_buffer", self.send_buffer),
            ("recv_buffer", self.recv_buffer),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }

        if self.keepalive_timeout > self.keepalive_interval {
            return Err(ConfigError::Invalid(
                "keepalive_timeout must not exceed keepalive_interval".into(),
            ));
        }
        Ok(())
    }

    /// Largest message the WebSocket layer will buffer before giving up on
    /// the connection.
    ///
    /// Frames between `max_message_size` and this limit are read and
    /// answered with a `message-too-large` error. Anything bigger drops the
    /// connection.
    pub fn transport_message_limit(&self) -> usize {
        self.max_message_size.saturating_mul(TRANSPORT_LIMIT_FACTOR)
    }

    /// The configuration handed to every room this hub creates.
    pub fn room_config(&self) -> RoomConfig {
        RoomConfig {
            command_buffer: self.room_buffer,
            echo_policy: self.echo_policy,
        }
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}
