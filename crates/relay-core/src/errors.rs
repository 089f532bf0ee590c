use thiserror::Error;

/// Error taxonomy for the relay.
///
/// Connection-level variants (transport, envelope, payload, routing) end the
/// offending connection only. Boundary variants (unauthorized, bad request,
/// forbidden) reject a request before any connection is admitted.
#[derive(Debug, Error)]
pub enum RelayError {
    // Connection-level
    /// The underlying socket failed, timed out or delivered an oversized frame.
    #[error("transport error: {0}")]
    Transport(String),
    /// A frame could not be decoded as an event envelope.
    #[error("malformed event envelope: {0}")]
    MalformedEnvelope(#[source] serde_json::Error),
    /// The envelope decoded but its payload does not match the tag.
    #[error("invalid {event_type} payload: {source}")]
    InvalidPayload {
        /// Tag of the offending event.
        event_type: String,
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },
    /// No handler is registered for the event tag.
    #[error("event not supported: {0}")]
    UnsupportedEvent(String),
    /// An outbound event could not be encoded.
    #[error("failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),

    // Boundary
    /// Missing, invalid, expired or consumed credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// The request is missing a required parameter or is malformed.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// The request is well-formed but not allowed (e.g. origin).
    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl RelayError {
    /// Whether this error ends a single connection rather than a request.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::MalformedEnvelope(_)
                | Self::InvalidPayload { .. }
                | Self::UnsupportedEvent(_)
                | Self::Encode(_)
        )
    }

    /// Short classification string for logs and metrics labels.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::MalformedEnvelope(_) => "malformed_envelope",
            Self::InvalidPayload { .. } => "invalid_payload",
            Self::UnsupportedEvent(_) => "unsupported_event",
            Self::Encode(_) => "encode",
            Self::Unauthorized(_) => "unauthorized",
            Self::BadRequest(_) => "bad_request",
            Self::Forbidden(_) => "forbidden",
        }
    }
}
