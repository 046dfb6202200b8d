use std::error::Error;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::entry::{LogEntry, LogName, LogPosition, SessionId};

/// Marker trait for log store errors
pub trait LogStoreError: Debug + Error + Send + Sync + 'static {
    /// Whether this is the response a force-unblocked call returns.
    ///
    /// The consumer loop treats such an error as a normal
    /// recompute-and-reissue signal rather than a failure.
    fn is_forced_unblock(&self) -> bool;
}

/// A request for entries strictly after a position in one log.
#[derive(Clone, Debug)]
pub struct ReadRequest {
    /// The log to read.
    pub log: LogName,
    /// Deliver only entries positioned strictly after this.
    pub after: LogPosition,
}

/// One client connection to an append-only log store.
///
/// A connection can be blocked in at most one [`read`](Self::read) or
/// [`park`](Self::park) at a time. Anything that must run while a read is
/// blocked — appends, force-unblocks — needs its own connection.
#[async_trait]
pub trait LogConnection
where
    Self: Debug + Send + Sync + 'static,
{
    /// The error type for the connection.
    type Error: LogStoreError;

    /// The session identifier peers use to force-unblock this connection.
    fn session(&self) -> SessionId;

    /// Appends a payload, returning the assigned position.
    async fn append(&self, log: &LogName, payload: Bytes) -> Result<LogPosition, Self::Error>;

    /// The position of the last entry, or [`LogPosition::ZERO`] for an
    /// absent or empty log.
    async fn tail(&self, log: &LogName) -> Result<LogPosition, Self::Error>;

    /// Blocks up to `block` for entries after the requested positions.
    ///
    /// Returns every available matching entry as soon as at least one
    /// exists, an empty vec when the block time lapses, or an error whose
    /// [`LogStoreError::is_forced_unblock`] is true when a peer aborted the
    /// read.
    async fn read(
        &self,
        requests: &[ReadRequest],
        block: Duration,
    ) -> Result<Vec<LogEntry>, Self::Error>;

    /// Blocks up to `block` doing nothing, interruptible by force-unblock.
    async fn park(&self, block: Duration) -> Result<(), Self::Error>;

    /// Aborts the in-flight blocking call of the connection with the given
    /// session.
    ///
    /// Idempotent: returns `false` without effect when that connection is
    /// unknown or not currently blocked.
    async fn unblock(&self, session: SessionId) -> Result<bool, Self::Error>;
}
