//! snapfile-sync: keeps the folder's message list in sync over `/ws`
//!
//! ```text
//!   SyncCommand ──► SyncClient (driver) ──► SyncEvent
//!                     │        ▲
//!               Input │        │ Effect
//!                     ▼        │
//!                   SyncMachine (pure)
//!                     │
//!               Connector / Connection (WebSocket)
//! ```
//!
//! The machine decides, the driver does I/O. Replay is offset based: every
//! (re)connect pulls from the count of messages already delivered.

pub mod backoff;
pub mod client;
pub mod machine;
pub mod transport;

pub use backoff::Backoff;
pub use client::{SyncClient, SyncCommand, SyncEvent, SyncExit, SyncHandle};
pub use machine::{ConnState, Effect, FatalReason, Input, SyncMachine};
pub use transport::{Connection, Connector, TransportEvent, WsConnection, WsConnector};
