//! # relay-core
//!
//! Shared types for the relay: branded identifiers, the wire event envelope
//! with its payload variants, and the error taxonomy used by every crate.

pub mod errors;
pub mod events;
pub mod ids;

pub use errors::RelayError;
pub use events::{ChangeChannel, Event, EventKind, NewMessage, SendMessage};
pub use ids::ConnectionId;
