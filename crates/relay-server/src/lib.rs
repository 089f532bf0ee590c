//! # relay-server
//!
//! Axum front end and connection manager for the relay.
//!
//! - [`auth`]: login credential check and one-time stream tokens
//! - [`websocket`]: registry, event handlers, per-connection loops
//! - [`server`]: routes, shared state, startup
//! - [`health`], [`metrics`], [`shutdown`]: operational plumbing

pub mod auth;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use server::{AppState, ServerHandle, build_router, start};
