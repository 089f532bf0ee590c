//! Settings types with compiled defaults.

use std::ops::RangeInclusive;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Listener and HTTP boundary.
    pub server: ServerSettings,
    /// Per-connection limits and keepalive.
    pub connection: ConnectionSettings,
    /// Login and one-time tokens.
    pub auth: AuthSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Accepted `connection.max_message_size`, in bytes.
pub const MAX_MESSAGE_SIZE_RANGE: RangeInclusive<u64> = 64..=16 << 20;
/// Accepted `connection.pong_wait_ms`.
pub const PONG_WAIT_MS_RANGE: RangeInclusive<u64> = 100..=600_000;
/// Accepted `connection.mailbox_capacity`.
pub const MAILBOX_CAPACITY_RANGE: RangeInclusive<u64> = 1..=1 << 20;
/// Accepted `auth.token_ttl_secs`.
pub const TOKEN_TTL_SECS_RANGE: RangeInclusive<u64> = 1..=86_400;

impl RelaySettings {
    /// Reject values the server cannot run with.
    ///
    /// Applies to every source, file and environment alike.
    pub fn validate(&self) -> Result<()> {
        check_range(
            "connection.max_message_size",
            widen(self.connection.max_message_size),
            &MAX_MESSAGE_SIZE_RANGE,
        )?;
        check_range(
            "connection.pong_wait_ms",
            self.connection.pong_wait_ms,
            &PONG_WAIT_MS_RANGE,
        )?;
        check_range(
            "connection.mailbox_capacity",
            widen(self.connection.mailbox_capacity),
            &MAILBOX_CAPACITY_RANGE,
        )?;
        check_range(
            "auth.token_ttl_secs",
            self.auth.token_ttl_secs,
            &TOKEN_TTL_SECS_RANGE,
        )
    }
}

fn widen(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

fn check_range(field: &'static str, value: u64, range: &RangeInclusive<u64>) -> Result<()> {
    if range.contains(&value) {
        return Ok(());
    }
    Err(SettingsError::OutOfRange {
        field,
        value,
        min: *range.start(),
        max: *range.end(),
    })
}

/// Listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind host.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Origins allowed to open a stream. Empty accepts any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            allowed_origins: Vec::new(),
        }
    }
}

/// Per-connection settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
    /// Read deadline; reset by every pong.
    pub pong_wait_ms: u64,
    /// Outbound events buffered per connection before drops start.
    pub mailbox_capacity: usize,
}

impl ConnectionSettings {
    /// Keepalive window after which a silent peer is evicted.
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    /// Ping cadence, 90% of the keepalive window.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms.saturating_mul(9) / 10)
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_message_size: 512,
            pong_wait_ms: 10_000,
            mailbox_capacity: 256,
        }
    }
}

/// Login and token settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Lifetime of a one-time token.
    pub token_ttl_secs: u64,
    /// Accepted username/password pairs.
    pub users: Vec<Credential>,
}

impl AuthSettings {
    /// Token lifetime as a [`Duration`].
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            token_ttl_secs: 300,
            users: vec![Credential {
                username: "admin".into(),
                password: "admin".into(),
            }],
        }
    }
}

/// One accepted login.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Login name.
    pub username: String,
    /// Plain password.
    pub password: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default level filter; `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}
