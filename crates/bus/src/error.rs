use thiserror::Error;

use crate::channel::ChannelError;
use crate::kind::Kind;
use crate::registry::HandlerId;

/// Errors that can occur while building the hierarchy.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HierarchyError {
    /// The kind was registered twice.
    #[error("kind `{0}` is already registered")]
    DuplicateKind(Kind),

    /// The named parent is not registered.
    #[error("parent `{parent}` of kind `{kind}` is not registered")]
    UnknownParent {
        /// The kind being registered.
        kind: Kind,
        /// The missing parent.
        parent: Kind,
    },

    /// Two kinds render to the same log key.
    #[error("kinds `{first}` and `{second}` share the log key `{key}`")]
    KeyCollision {
        /// The kind registered first.
        first: Kind,
        /// The kind registered second.
        second: Kind,
        /// The colliding key.
        key: String,
    },
}

/// Errors that can occur in subscription operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The subscription target resolves to zero concrete kinds.
    #[error("kind `{0}` has no concrete descendants")]
    NoConcreteDescendants(Kind),

    /// An exact-match unsubscribe removed nothing. Usually the caller passed
    /// a handler identity other than the one subscribe returned.
    #[error("handler {handler} is not registered for `{kind}`")]
    HandlerNotRegistered {
        /// The unsubscribe target kind.
        kind: Kind,
        /// The handler identity that matched nothing.
        handler: HandlerId,
    },
}

impl ChannelError for Error {}

/// Errors that can occur while awaiting an event.
#[derive(Debug, Error)]
pub enum WaitError<E>
where
    E: ChannelError,
{
    /// The underlying channel operation failed.
    #[error(transparent)]
    Channel(E),

    /// The optional timeout lapsed before a matching event arrived.
    #[error("timed out waiting for a matching event")]
    Lapsed,

    /// The wait was cancelled.
    #[error("wait was cancelled")]
    Cancelled,
}
