//! # relay-settings
//!
//! Layered configuration for the relay.
//!
//! Loading order (later wins):
//! 1. Compiled [`RelaySettings::default()`]
//! 2. JSON settings file (deep-merged over defaults)
//! 3. `RELAY_*` environment variables

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path, settings_path};
pub use types::{
    AuthSettings, ConnectionSettings, Credential, LoggingSettings, MAILBOX_CAPACITY_RANGE,
    MAX_MESSAGE_SIZE_RANGE, PONG_WAIT_MS_RANGE, RelaySettings, ServerSettings,
    TOKEN_TTL_SECS_RANGE,
};
