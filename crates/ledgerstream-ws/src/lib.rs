//! ledgerstream-ws — push channel over a single WebSocket connection.
//!
//! # Features
//! - Background task owns the connection; callers talk to it over a command queue
//! - Reconnect with backoff policy (see [`ReconnectPolicy`](ledgerstream_core::ReconnectPolicy))
//! - Replays remembered subscribe payloads after every reconnect
//! - Observable connection state (`Disconnected` / `Connecting` / `Connected`)

pub mod channel;
pub mod replay;
pub mod state;

pub use channel::{InboundSink, PushChannel, PushChannelConfig};
pub use replay::ReplayBook;
pub use state::{ConnectionState, ConnectionStatus};
