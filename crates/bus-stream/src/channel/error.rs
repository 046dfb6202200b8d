use herald_bus::channel::ChannelError;
use herald_bus::codec::CodecError;
use herald_logs::connection::LogStoreError;
use thiserror::Error;

/// Errors that can occur on a stream channel.
#[derive(Debug, Error)]
pub enum Error<SE, CE>
where
    SE: LogStoreError,
    CE: CodecError,
{
    /// Subscription registry error.
    #[error(transparent)]
    Registry(#[from] herald_bus::error::Error),

    /// A log store operation failed.
    #[error("log store error: {0}")]
    Store(SE),

    /// An event payload could not be encoded.
    #[error("codec error: {0}")]
    Codec(CE),
}

impl<SE, CE> ChannelError for Error<SE, CE>
where
    SE: LogStoreError,
    CE: CodecError,
{
}
