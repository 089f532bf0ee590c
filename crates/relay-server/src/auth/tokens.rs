//! One-time, time-limited tokens exchanged at login and spent on upgrade.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::Mutex;
use rand::RngCore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A freshly issued token.
#[derive(Debug, Clone)]
pub struct Token {
    /// Random key the client presents on upgrade.
    pub key: String,
    /// Instant after which the key is no longer accepted.
    pub expires_at: Instant,
}

/// Store of outstanding tokens, keyed by token key.
///
/// Every key verifies at most once: a successful `verify` consumes it, and an
/// expired key is dropped the first time it is checked.
pub struct TokenStore {
    entries: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl TokenStore {
    /// Create an empty store whose tokens live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Token lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a new token valid for the configured TTL.
    pub fn issue(&self) -> Token {
        let expires_at = Instant::now() + self.ttl;
        let mut entries = self.entries.lock();
        let key = loop {
            let candidate = generate_key();
            if !entries.contains_key(&candidate) {
                break candidate;
            }
        };
        let _ = entries.insert(key.clone(), expires_at);
        Token { key, expires_at }
    }

    /// Consume `key`. Returns `true` only for a present, unexpired key.
    pub fn verify(&self, key: &str) -> bool {
        let Some(expires_at) = self.entries.lock().remove(key) else {
            return false;
        };
        let valid = expires_at > Instant::now();
        if !valid {
            debug!("rejected expired token");
        }
        valid
    }

    /// Drop every expired entry and return how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at > now);
        before - entries.len()
    }

    /// Outstanding (possibly expired, not yet swept) tokens.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no tokens are outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Sweep expired entries every TTL until `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(store.ttl);
            let _ = ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = store.sweep();
                        if removed > 0 {
                            debug!(removed, "swept expired tokens");
                        }
                    }
                    () = cancel.cancelled() => {
                        info!("token sweeper stopped");
                        return;
                    }
                }
            }
        })
    }
}

/// 32 bytes from the thread CSPRNG, base64url without padding.
fn generate_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
