//! Wire protocol for observer sessions
//!
//! JSON text frames over WebSocket, shared by the aggregator and the harness.

mod messages;

pub use messages::*;
