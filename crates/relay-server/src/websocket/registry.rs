//! Live connection set, room membership, and the event handler table.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use relay_core::{ConnectionId, Event, EventKind, RelayError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::auth::TokenStore;
use crate::metrics::{EVENTS_ROUTED_TOTAL, MAILBOX_DROPS_TOTAL};

/// Receiving end of a connection's outbound queue.
pub type Mailbox = mpsc::Receiver<Arc<Event>>;

/// Handler for one inbound event kind.
pub type EventHandler = fn(&Registry, &ConnectionId, &Event) -> Result<(), RelayError>;

struct Member {
    room: String,
    mailbox: mpsc::Sender<Arc<Event>>,
}

/// Registry of admitted connections.
///
/// One lock covers the member set and every member's room. Handlers run
/// without it held, so they are free to call back into the registry.
pub struct Registry {
    members: Mutex<HashMap<ConnectionId, Member>>,
    handlers: HashMap<EventKind, EventHandler>,
    tokens: Arc<TokenStore>,
    mailbox_capacity: usize,
}

impl Registry {
    /// Empty registry with no handlers registered.
    pub fn new(tokens: Arc<TokenStore>, mailbox_capacity: usize) -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
            handlers: HashMap::new(),
            tokens,
            mailbox_capacity: mailbox_capacity.max(1),
        }
    }

    /// Registry with the relay's standard handlers.
    pub fn with_default_handlers(tokens: Arc<TokenStore>, mailbox_capacity: usize) -> Self {
        let mut registry = Self::new(tokens, mailbox_capacity);
        super::handlers::register_all(&mut registry);
        registry
    }

    /// Install `handler` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: EventKind, handler: EventHandler) {
        let _ = self.handlers.insert(kind, handler);
    }

    /// Whether a handler is installed for `kind`.
    pub fn has_handler(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Token store consulted during the upgrade handshake.
    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Add a connection in the default (empty) room and hand back its
    /// mailbox. The connection receives broadcasts from this point on.
    ///
    /// `id` must be fresh; ids come from [`ConnectionId::new`].
    pub fn admit(&self, id: ConnectionId) -> Mailbox {
        let (tx, rx) = mpsc::channel(self.mailbox_capacity);
        let replaced = self.members.lock().insert(
            id.clone(),
            Member {
                room: String::new(),
                mailbox: tx,
            },
        );
        debug_assert!(replaced.is_none(), "connection {id} admitted twice");
        info!(conn_id = %id, "connection admitted");
        rx
    }

    /// Remove a connection and close its mailbox. Returns `false` if it was
    /// already gone.
    pub fn evict(&self, id: &ConnectionId) -> bool {
        let removed = self.members.lock().remove(id);
        match removed {
            Some(member) => {
                info!(conn_id = %id, room = %member.room, "connection evicted");
                true
            }
            None => false,
        }
    }

    /// Dispatch `event` from `source` to the handler for its kind.
    pub fn route(&self, event: &Event, source: &ConnectionId) -> Result<(), RelayError> {
        let kind = event.kind()?;
        let Some(handler) = self.handlers.get(&kind) else {
            return Err(RelayError::UnsupportedEvent(event.event_type.clone()));
        };
        counter!(EVENTS_ROUTED_TOTAL, "event_type" => kind.as_str()).increment(1);
        handler(self, source, event)
    }

    /// Queue `event` for every member of `room`, sender included.
    ///
    /// Never waits: a full mailbox loses the event. Returns how many
    /// mailboxes accepted it.
    pub fn broadcast(&self, event: Event, room: &str) -> usize {
        let event = Arc::new(event);
        let members = self.members.lock();
        let mut delivered = 0;
        for (id, member) in members.iter().filter(|(_, m)| m.room == room) {
            match member.mailbox.try_send(Arc::clone(&event)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(conn_id = %id, room, event_type = %event.event_type, "mailbox full, event dropped");
                    counter!(MAILBOX_DROPS_TOTAL).increment(1);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(conn_id = %id, "mailbox closed, skipping");
                }
            }
        }
        delivered
    }

    /// Move a connection into `room`. Returns `false` if it is not admitted.
    pub fn set_room(&self, id: &ConnectionId, room: impl Into<String>) -> bool {
        let mut members = self.members.lock();
        let Some(member) = members.get_mut(id) else {
            return false;
        };
        member.room = room.into();
        debug!(conn_id = %id, room = %member.room, "room changed");
        true
    }

    /// Current room of a connection.
    pub fn room_of(&self, id: &ConnectionId) -> Option<String> {
        self.members.lock().get(id).map(|m| m.room.clone())
    }

    /// Whether `id` is currently admitted.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.members.lock().contains_key(id)
    }

    /// Number of admitted connections.
    pub fn connection_count(&self) -> usize {
        self.members.lock().len()
    }

    /// Connections currently in `room`.
    pub fn room_members(&self, room: &str) -> Vec<ConnectionId> {
        self.members
            .lock()
            .iter()
            .filter(|(_, m)| m.room == room)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use relay_core::SendMessage;
    use serde_json::json;

    use super::*;

    fn registry(capacity: usize) -> Registry {
        Registry::new(Arc::new(TokenStore::new(Duration::from_secs(60))), capacity)
    }

    fn chat(text: &str) -> Event {
        Event::new(
            EventKind::SendMessage,
            &SendMessage {
                message: text.into(),
                from: "tester".into(),
            },
        )
        .unwrap()
    }

    #[test]
    fn admit_places_in_default_room() {
        let reg = registry(8);
        let id = ConnectionId::new();
        let _rx = reg.admit(id.clone());
        assert!(reg.contains(&id));
        assert_eq!(reg.room_of(&id).as_deref(), Some(""));
        assert_eq!(reg.connection_count(), 1);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "admitted twice")]
    fn readmitting_a_live_id_is_a_bug() {
        let reg = registry(8);
        let id = ConnectionId::new();
        let _first = reg.admit(id.clone());
        let _second = reg.admit(id);
    }

    #[tokio::test]
    async fn evict_is_idempotent_and_closes_mailbox_once() {
        let reg = registry(8);
        let id = ConnectionId::new();
        let mut rx = reg.admit(id.clone());

        assert!(reg.evict(&id));
        assert!(!reg.evict(&id));
        assert!(rx.recv().await.is_none());
        assert_eq!(reg.connection_count(), 0);
        assert!(reg.room_of(&id).is_none());
    }

    #[tokio::test]
    async fn broadcast_reaches_only_room_members() {
        let reg = registry(8);
        let ids: Vec<_> = (0..4).map(|_| ConnectionId::new()).collect();
        let mut boxes: Vec<_> = ids.iter().map(|id| reg.admit(id.clone())).collect();
        for id in &ids[..3] {
            assert!(reg.set_room(id, "general"));
        }

        assert_eq!(reg.broadcast(chat("hi"), "general"), 3);
        for rx in &mut boxes[..3] {
            assert_eq!(rx.recv().await.unwrap().payload["message"], "hi");
        }
        assert!(boxes[3].try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_preserves_fifo_per_mailbox() {
        let reg = registry(8);
        let id = ConnectionId::new();
        let mut rx = reg.admit(id);
        for text in ["one", "two", "three"] {
            let _ = reg.broadcast(chat(text), "");
        }
        for text in ["one", "two", "three"] {
            assert_eq!(rx.recv().await.unwrap().payload["message"], text);
        }
    }

    #[test]
    fn full_mailbox_drops_newest() {
        let reg = registry(1);
        let id = ConnectionId::new();
        let mut rx = reg.admit(id);

        assert_eq!(reg.broadcast(chat("kept"), ""), 1);
        assert_eq!(reg.broadcast(chat("dropped"), ""), 0);
        assert_eq!(rx.try_recv().unwrap().payload["message"], "kept");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn set_room_on_unknown_connection() {
        let reg = registry(8);
        assert!(!reg.set_room(&ConnectionId::new(), "elsewhere"));
    }

    #[test]
    fn room_members_tracks_moves() {
        let reg = registry(8);
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let _ra = reg.admit(a.clone());
        let _rb = reg.admit(b.clone());

        let _ = reg.set_room(&a, "x");
        assert_eq!(reg.room_members("x"), vec![a.clone()]);
        assert_eq!(reg.room_members(""), vec![b]);

        let _ = reg.set_room(&a, "y");
        assert!(reg.room_members("x").is_empty());
        assert_eq!(reg.room_members("y"), vec![a]);
    }

    #[test]
    fn route_rejects_unknown_tag() {
        let reg = registry(8);
        let event = Event {
            event_type: "dance".into(),
            payload: json!({}),
        };
        let err = reg.route(&event, &ConnectionId::new()).unwrap_err();
        assert!(matches!(err, RelayError::UnsupportedEvent(t) if t == "dance"));
    }

    #[test]
    fn route_rejects_kind_without_handler() {
        let reg = Registry::with_default_handlers(
            Arc::new(TokenStore::new(Duration::from_secs(60))),
            8,
        );
        for kind in [
            EventKind::JoinChannel,
            EventKind::LeaveChannel,
            EventKind::NewMessage,
        ] {
            assert!(!reg.has_handler(kind));
            let event = Event {
                event_type: kind.as_str().into(),
                payload: json!({}),
            };
            let err = reg.route(&event, &ConnectionId::new()).unwrap_err();
            assert!(matches!(err, RelayError::UnsupportedEvent(_)));
        }
    }

    #[test]
    fn route_invokes_registered_handler() {
        fn move_to_lobby(
            reg: &Registry,
            source: &ConnectionId,
            _event: &Event,
        ) -> Result<(), RelayError> {
            let _ = reg.set_room(source, "lobby");
            Ok(())
        }

        let mut reg = registry(8);
        reg.register(EventKind::JoinChannel, move_to_lobby);
        let id = ConnectionId::new();
        let _rx = reg.admit(id.clone());

        let event = Event {
            event_type: "join_channel".into(),
            payload: json!(null),
        };
        reg.route(&event, &id).unwrap();
        assert_eq!(reg.room_of(&id).as_deref(), Some("lobby"));
    }
}
