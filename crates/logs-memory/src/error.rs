use herald_logs::connection::LogStoreError;
use thiserror::Error;

/// Errors that can occur on a memory store connection.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The blocking call was aborted by a peer's force-unblock.
    #[error("blocking call aborted by force-unblock")]
    Unblocked,
}

impl LogStoreError for Error {
    fn is_forced_unblock(&self) -> bool {
        matches!(self, Self::Unblocked)
    }
}
