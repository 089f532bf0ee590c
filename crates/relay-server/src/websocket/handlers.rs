//! Inbound event handlers.

use chrono::Utc;
use relay_core::{ChangeChannel, ConnectionId, Event, EventKind, NewMessage, RelayError, SendMessage};
use tracing::debug;

use super::registry::Registry;

/// Install every handler the relay serves.
pub fn register_all(registry: &mut Registry) {
    registry.register(EventKind::SendMessage, send_message);
    registry.register(EventKind::ChangeChannel, change_channel);
}

/// Re-emit a chat message as `new_message` to the sender's room.
pub fn send_message(
    registry: &Registry,
    source: &ConnectionId,
    event: &Event,
) -> Result<(), RelayError> {
    let inbound: SendMessage = event.decode_payload()?;
    let Some(room) = registry.room_of(source) else {
        debug!(conn_id = %source, "sender already evicted, message discarded");
        return Ok(());
    };
    let outbound = Event::new(
        EventKind::NewMessage,
        &NewMessage::stamped(inbound, Utc::now()),
    )?;
    let delivered = registry.broadcast(outbound, &room);
    debug!(conn_id = %source, room = %room, delivered, "message relayed");
    Ok(())
}

/// Move the sender into another room. Nobody is notified.
pub fn change_channel(
    registry: &Registry,
    source: &ConnectionId,
    event: &Event,
) -> Result<(), RelayError> {
    let ChangeChannel { channel } = event.decode_payload()?;
    let _ = registry.set_room(source, channel);
    Ok(())
}
