//! Real-time fan-out of vote events over WebSocket.

pub mod connection;
pub mod dispatcher;

pub use dispatcher::{BroadcastMessage, Dispatcher};
