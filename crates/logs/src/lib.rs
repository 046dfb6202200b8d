//! Abstract interface for append-only log stores.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Connections read, append, and force-unblock peers.
pub mod connection;

/// Logs are named append-only sequences of positioned entries.
pub mod entry;

/// Stores hand out connections.
pub mod store;
