use std::fmt::Debug;

use async_trait::async_trait;

use crate::connection::{LogConnection, LogStoreError};

/// A factory for connections to one append-only log store.
#[async_trait]
pub trait LogStore
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the store.
    type Error: LogStoreError;

    /// The connection type produced by [`LogStore::connect`].
    type Connection: LogConnection<Error = Self::Error>;

    /// Opens a new connection with its own session.
    async fn connect(&self) -> Result<Self::Connection, Self::Error>;
}
