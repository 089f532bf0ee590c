//! Wire event envelope and payload variants.
//!
//! Every frame on the wire is `{"type": <tag>, "payload": <json>}`. The tag
//! selects a closed [`EventKind`]; the payload stays opaque until the handler
//! for that kind decodes it into its concrete shape.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RelayError;

/// Every event tag the relay recognizes.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum EventKind {
    /// `join_channel` (reserved, no handler).
    JoinChannel,
    /// `leave_channel` (reserved, no handler).
    LeaveChannel,
    /// `send_message`, client to server.
    SendMessage,
    /// `new_message`, server to client.
    NewMessage,
    /// `change_channel`, moves the sender to another room.
    ChangeChannel,
}

impl EventKind {
    /// All recognized kinds.
    pub const ALL: [Self; 5] = [
        Self::JoinChannel,
        Self::LeaveChannel,
        Self::SendMessage,
        Self::NewMessage,
        Self::ChangeChannel,
    ];

    /// Wire tag of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JoinChannel => "join_channel",
            Self::LeaveChannel => "leave_channel",
            Self::SendMessage => "send_message",
            Self::NewMessage => "new_message",
            Self::ChangeChannel => "change_channel",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| RelayError::UnsupportedEvent(s.to_owned()))
    }
}

/// Tagged envelope carried by every frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Wire tag, kept as a string so unknown tags still decode.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Payload, interpreted only by the handler for `event_type`.
    #[serde(default)]
    pub payload: Value,
}

impl Event {
    /// Build an envelope of `kind` around a serialized payload.
    pub fn new<P: Serialize>(kind: EventKind, payload: &P) -> Result<Self, RelayError> {
        Ok(Self {
            event_type: kind.as_str().to_owned(),
            payload: serde_json::to_value(payload).map_err(RelayError::Encode)?,
        })
    }

    /// Decode an envelope from a text or binary frame.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RelayError> {
        serde_json::from_slice(bytes).map_err(RelayError::MalformedEnvelope)
    }

    /// Encode the envelope as JSON text.
    pub fn to_json(&self) -> Result<String, RelayError> {
        serde_json::to_string(self).map_err(RelayError::Encode)
    }

    /// Resolve the tag into a recognized kind.
    pub fn kind(&self) -> Result<EventKind, RelayError> {
        self.event_type.parse()
    }

    /// Decode the payload into the shape expected for this tag.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, RelayError> {
        T::deserialize(&self.payload).map_err(|source| RelayError::InvalidPayload {
            event_type: self.event_type.clone(),
            source,
        })
    }
}

/// `send_message` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage {
    /// Message body.
    pub message: String,
    /// Display name of the sender, as claimed by the client.
    pub from: String,
}

/// `new_message` payload, fanned out to a room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Message body.
    pub message: String,
    /// Display name of the sender.
    pub from: String,
    /// Server time at which the message was accepted.
    pub sent: DateTime<Utc>,
}

impl NewMessage {
    /// Stamp an inbound message with the server time.
    pub fn stamped(inbound: SendMessage, sent: DateTime<Utc>) -> Self {
        Self {
            message: inbound.message,
            from: inbound.from,
            sent,
        }
    }
}

/// `change_channel` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeChannel {
    /// Room to move into.
    pub channel: String,
}
