//! `/health` response body.

use std::time::Instant;

use serde::Serialize;

/// Liveness snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server answers.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Admitted stream connections.
    pub connections: usize,
    /// Tokens issued and not yet spent or swept.
    pub pending_tokens: usize,
}

/// Build a snapshot from live counters.
pub fn health_check(start_time: Instant, connections: usize, pending_tokens: usize) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        pending_tokens,
    }
}
