//! Per-connection read and write loops and the supervisor that pairs them.
//!
//! The loops are generic over the frame stream and sink so they can be
//! driven without a socket. Both evict the connection on the way out, and
//! eviction closes the mailbox, so whichever loop stops first brings the
//! other one down.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::{counter, gauge};
use relay_core::{ConnectionId, Event, RelayError};
use relay_settings::ConnectionSettings;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use super::registry::{Mailbox, Registry};
use crate::metrics::{CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, DISCONNECTIONS_TOTAL};

/// Keepalive timing for one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeepAlive {
    /// Silence allowed before the read side gives up.
    pub pong_wait: Duration,
    /// How often the write side pings.
    pub ping_interval: Duration,
}

impl KeepAlive {
    /// Window of `pong_wait`, pinging at 90% of it.
    pub fn new(pong_wait: Duration) -> Self {
        Self {
            pong_wait,
            ping_interval: pong_wait * 9 / 10,
        }
    }
}

impl From<&ConnectionSettings> for KeepAlive {
    fn from(settings: &ConnectionSettings) -> Self {
        Self {
            pong_wait: settings.pong_wait(),
            ping_interval: settings.ping_interval(),
        }
    }
}

/// Why a loop stopped.
#[derive(Debug)]
pub enum Disconnect {
    /// Peer sent a Close frame.
    PeerClosed,
    /// Inbound stream ended without a Close frame.
    StreamEnded,
    /// No Pong within the keepalive window.
    KeepaliveTimeout,
    /// Mailbox closed by eviction; a Close frame was sent.
    MailboxClosed,
    /// Transport, decode or routing failure.
    Error(RelayError),
}

impl Disconnect {
    /// Short label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::StreamEnded => "stream_ended",
            Self::KeepaliveTimeout => "keepalive_timeout",
            Self::MailboxClosed => "evicted",
            Self::Error(e) => e.error_kind(),
        }
    }
}

/// Read frames until the peer goes away, the keepalive window lapses, or an
/// event fails to decode or route. Evicts `conn_id` before returning.
pub async fn read_loop<S, E>(
    mut stream: S,
    conn_id: &ConnectionId,
    registry: &Registry,
    pong_wait: Duration,
) -> Disconnect
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let mut deadline = Instant::now() + pong_wait;
    let exit = loop {
        let frame = match tokio::time::timeout_at(deadline, stream.next()).await {
            Err(_) => break Disconnect::KeepaliveTimeout,
            Ok(None) => break Disconnect::StreamEnded,
            Ok(Some(Err(e))) => break Disconnect::Error(RelayError::Transport(e.to_string())),
            Ok(Some(Ok(frame))) => frame,
        };

        let decoded = match frame {
            Message::Text(text) => Event::from_slice(text.as_str().as_bytes()),
            Message::Binary(bytes) => Event::from_slice(&bytes),
            Message::Pong(_) => {
                deadline = Instant::now() + pong_wait;
                trace!(conn_id = %conn_id, "pong");
                continue;
            }
            Message::Ping(_) => continue,
            Message::Close(frame) => {
                debug!(conn_id = %conn_id, ?frame, "peer closed");
                break Disconnect::PeerClosed;
            }
        };

        if let Err(e) = decoded.and_then(|event| registry.route(&event, conn_id)) {
            break Disconnect::Error(e);
        }
    };
    let _ = registry.evict(conn_id);
    exit
}

/// Drain the mailbox onto `sink`, pinging every `ping_interval`.
///
/// When the mailbox closes a normal Close frame is written and the loop ends.
/// Evicts `conn_id` before returning.
pub async fn write_loop<S>(
    mut sink: S,
    mut mailbox: Mailbox,
    conn_id: &ConnectionId,
    registry: &Registry,
    ping_interval: Duration,
) -> Disconnect
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let mut ticker = tokio::time::interval(ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let _ = ticker.tick().await;

    let exit = loop {
        tokio::select! {
            next = mailbox.recv() => {
                let Some(event) = next else {
                    let close = Message::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: "".into(),
                    }));
                    if let Err(e) = sink.send(close).await {
                        debug!(conn_id = %conn_id, error = %e, "close frame not delivered");
                    }
                    break Disconnect::MailboxClosed;
                };
                let json = match event.to_json() {
                    Ok(json) => json,
                    Err(e) => break Disconnect::Error(e),
                };
                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    break Disconnect::Error(RelayError::Transport(e.to_string()));
                }
                debug!(conn_id = %conn_id, event_type = %event.event_type, "sent event");
            }
            _ = ticker.tick() => {
                trace!(conn_id = %conn_id, "ping");
                if let Err(e) = sink.send(Message::Ping(Bytes::new())).await {
                    break Disconnect::Error(RelayError::Transport(e.to_string()));
                }
            }
        }
    };
    let _ = registry.evict(conn_id);
    exit
}

/// Admit an upgraded socket and run its loops until either one stops.
pub async fn run_connection(socket: WebSocket, registry: Arc<Registry>, keepalive: KeepAlive) {
    let conn_id = ConnectionId::new();
    let mailbox = registry.admit(conn_id.clone());
    counter!(CONNECTIONS_TOTAL).increment(1);
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);

    let (sink, stream) = socket.split();

    let mut writer = {
        let registry = Arc::clone(&registry);
        let conn_id = conn_id.clone();
        tokio::spawn(async move {
            write_loop(sink, mailbox, &conn_id, &registry, keepalive.ping_interval).await
        })
    };
    let mut reader = {
        let registry = Arc::clone(&registry);
        let conn_id = conn_id.clone();
        tokio::spawn(async move { read_loop(stream, &conn_id, &registry, keepalive.pong_wait).await })
    };

    let reason = tokio::select! {
        exit = &mut reader => {
            let reason = log_exit(&conn_id, "read", exit);
            // Reader evicted us; give the writer a moment to flush the Close frame.
            if let Ok(exit) = tokio::time::timeout(keepalive.pong_wait, &mut writer).await {
                let _ = log_exit(&conn_id, "write", exit);
            } else {
                writer.abort();
            }
            reason
        }
        exit = &mut writer => {
            let reason = log_exit(&conn_id, "write", exit);
            reader.abort();
            reason
        }
    };

    let _ = registry.evict(&conn_id);
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
    counter!(DISCONNECTIONS_TOTAL, "reason" => reason).increment(1);
}

fn log_exit(
    conn_id: &ConnectionId,
    side: &'static str,
    exit: Result<Disconnect, tokio::task::JoinError>,
) -> &'static str {
    match exit {
        Ok(Disconnect::Error(e)) => {
            warn!(conn_id = %conn_id, side, error = %e, kind = e.error_kind(), "connection failed");
            e.error_kind()
        }
        Ok(done) => {
            info!(conn_id = %conn_id, side, reason = done.reason(), "connection closed");
            done.reason()
        }
        Err(e) => {
            error!(conn_id = %conn_id, side, error = %e, "connection task panicked");
            "panic"
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use futures::channel::mpsc as frames;
    use serde_json::json;

    use super::*;
    use crate::auth::TokenStore;

    const WINDOW: Duration = Duration::from_secs(10);

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::with_default_handlers(
            Arc::new(TokenStore::new(Duration::from_secs(60))),
            16,
        ))
    }

    fn text(value: serde_json::Value) -> Result<Message, Infallible> {
        Ok(Message::Text(value.to_string().into()))
    }

    #[test]
    fn keepalive_pings_at_ninety_percent() {
        let ka = KeepAlive::new(WINDOW);
        assert_eq!(ka.ping_interval, Duration::from_secs(9));
        let from_settings = KeepAlive::from(&ConnectionSettings::default());
        assert_eq!(from_settings, ka);
    }

    #[tokio::test(start_paused = true)]
    async fn read_loop_times_out_without_pong() {
        let reg = registry();
        let id = ConnectionId::new();
        let _mailbox = reg.admit(id.clone());
        let (_tx, rx) = frames::unbounded::<Result<Message, Infallible>>();

        let exit = read_loop(rx, &id, &reg, WINDOW).await;
        assert!(matches!(exit, Disconnect::KeepaliveTimeout));
        assert!(!reg.contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn pongs_extend_the_deadline() {
        let reg = registry();
        let id = ConnectionId::new();
        let _mailbox = reg.admit(id.clone());
        let (tx, rx) = frames::unbounded::<Result<Message, Infallible>>();

        let peer = tokio::spawn(async move {
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_secs(8)).await;
                tx.unbounded_send(Ok(Message::Pong(Bytes::new()))).unwrap();
            }
        });

        let start = Instant::now();
        let exit = read_loop(rx, &id, &reg, WINDOW).await;
        peer.await.unwrap();
        // Five pongs 8s apart keep it alive; the dropped sender ends the stream.
        assert!(matches!(exit, Disconnect::StreamEnded));
        assert!(start.elapsed() >= Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn text_frames_do_not_extend_the_deadline() {
        let reg = registry();
        let id = ConnectionId::new();
        let _mailbox = reg.admit(id.clone());
        let (tx, rx) = frames::unbounded();

        let _peer = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(3)).await;
                let frame = text(json!({"type": "change_channel", "payload": {"channel": "a"}}));
                if tx.unbounded_send(frame).is_err() {
                    return;
                }
            }
        });

        let exit = read_loop(rx, &id, &reg, WINDOW).await;
        assert!(matches!(exit, Disconnect::KeepaliveTimeout));
    }

    #[tokio::test]
    async fn read_loop_routes_events() {
        let reg = registry();
        let id = ConnectionId::new();
        let mut mailbox = reg.admit(id.clone());
        let (tx, rx) = frames::unbounded();

        tx.unbounded_send(text(json!({"type": "change_channel", "payload": {"channel": "rust"}})))
            .unwrap();
        tx.unbounded_send(text(json!({"type": "send_message", "payload": {"message": "hi", "from": "ann"}})))
            .unwrap();
        tx.unbounded_send(Ok(Message::Close(None))).unwrap();

        let exit = read_loop(rx, &id, &reg, WINDOW).await;
        assert!(matches!(exit, Disconnect::PeerClosed));

        let relayed = mailbox.recv().await.unwrap();
        assert_eq!(relayed.event_type, "new_message");
        assert_eq!(relayed.payload["message"], "hi");
        assert!(mailbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn binary_frames_are_decoded_too() {
        let reg = registry();
        let id = ConnectionId::new();
        let mut mailbox = reg.admit(id.clone());
        let (tx, rx) = frames::unbounded::<Result<Message, Infallible>>();

        for body in [
            json!({"type": "change_channel", "payload": {"channel": "bin"}}),
            json!({"type": "send_message", "payload": {"message": "raw", "from": "ann"}}),
        ] {
            tx.unbounded_send(Ok(Message::Binary(Bytes::from(body.to_string()))))
                .unwrap();
        }
        drop(tx);

        let exit = read_loop(rx, &id, &reg, WINDOW).await;
        assert!(matches!(exit, Disconnect::StreamEnded));
        assert!(!reg.contains(&id));
        assert_eq!(mailbox.recv().await.unwrap().payload["message"], "raw");
    }

    #[tokio::test]
    async fn malformed_frame_ends_loop() {
        let reg = registry();
        let id = ConnectionId::new();
        let _mailbox = reg.admit(id.clone());
        let (tx, rx) = frames::unbounded::<Result<Message, Infallible>>();
        tx.unbounded_send(Ok(Message::Text("{not json".into()))).unwrap();

        let exit = read_loop(rx, &id, &reg, WINDOW).await;
        assert!(matches!(exit, Disconnect::Error(RelayError::MalformedEnvelope(_))));
        assert!(!reg.contains(&id));
    }

    #[tokio::test]
    async fn unknown_event_ends_loop() {
        let reg = registry();
        let id = ConnectionId::new();
        let _mailbox = reg.admit(id.clone());
        let (tx, rx) = frames::unbounded();
        tx.unbounded_send(text(json!({"type": "dance", "payload": {}}))).unwrap();

        let exit = read_loop(rx, &id, &reg, WINDOW).await;
        assert_eq!(exit.reason(), "unsupported_event");
    }

    #[tokio::test]
    async fn transport_error_ends_loop() {
        let reg = registry();
        let id = ConnectionId::new();
        let _mailbox = reg.admit(id.clone());
        let (tx, rx) = frames::unbounded::<Result<Message, String>>();
        tx.unbounded_send(Err("frame too large".into())).unwrap();

        let exit = read_loop(rx, &id, &reg, WINDOW).await;
        assert!(matches!(exit, Disconnect::Error(RelayError::Transport(m)) if m == "frame too large"));
    }

    #[tokio::test]
    async fn write_loop_sends_in_order_then_closes() {
        let reg = registry();
        let id = ConnectionId::new();
        let mailbox = reg.admit(id.clone());
        for n in 0..3 {
            let event = Event {
                event_type: "new_message".into(),
                payload: json!({"n": n}),
            };
            let _ = reg.broadcast(event, "");
        }
        let _ = reg.evict(&id);

        let (sink, mut wire) = frames::unbounded::<Message>();
        let exit = write_loop(sink, mailbox, &id, &reg, Duration::from_secs(9)).await;
        assert!(matches!(exit, Disconnect::MailboxClosed));

        for n in 0..3 {
            let Some(Message::Text(frame)) = wire.next().await else {
                panic!("expected text frame");
            };
            let decoded = Event::from_slice(frame.as_str().as_bytes()).unwrap();
            assert_eq!(decoded.payload["n"], n);
        }
        let Some(Message::Close(Some(close))) = wire.next().await else {
            panic!("expected close frame");
        };
        assert_eq!(close.code, close_code::NORMAL);
    }

    #[tokio::test(start_paused = true)]
    async fn write_loop_pings_on_interval() {
        let reg = registry();
        let id = ConnectionId::new();
        let mailbox = reg.admit(id.clone());
        let (sink, mut wire) = frames::unbounded::<Message>();

        let writer = {
            let reg = Arc::clone(&reg);
            let id = id.clone();
            tokio::spawn(async move { write_loop(sink, mailbox, &id, &reg, Duration::from_secs(9)).await })
        };

        let start = Instant::now();
        assert!(matches!(wire.next().await, Some(Message::Ping(_))));
        assert!(start.elapsed() >= Duration::from_secs(9));
        assert!(matches!(wire.next().await, Some(Message::Ping(_))));
        assert!(start.elapsed() >= Duration::from_secs(18));

        let _ = reg.evict(&id);
        assert!(matches!(writer.await.unwrap(), Disconnect::MailboxClosed));
    }

    #[tokio::test]
    async fn write_failure_evicts() {
        let reg = registry();
        let id = ConnectionId::new();
        let mailbox = reg.admit(id.clone());
        let _ = reg.broadcast(
            Event {
                event_type: "new_message".into(),
                payload: json!({}),
            },
            "",
        );
        let (sink, wire) = frames::unbounded::<Message>();
        drop(wire);

        let exit = write_loop(sink, mailbox, &id, &reg, Duration::from_secs(9)).await;
        assert_eq!(exit.reason(), "transport");
        assert!(!reg.contains(&id));
    }
}
