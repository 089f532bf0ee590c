//! Stream connections: membership, routing, and the per-connection loops.

pub mod connection;
pub mod handlers;
pub mod registry;

pub use connection::{Disconnect, KeepAlive, read_loop, run_connection, write_loop};
pub use registry::{EventHandler, Mailbox, Registry};
