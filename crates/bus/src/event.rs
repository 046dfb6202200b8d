use std::any::Any;
use std::fmt;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kind::Kind;

/// Unique identifier of one event instance.
///
/// Assigned when the instance is constructed for emission and carried
/// through the codec with the rest of the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a fresh random identifier.
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// An immutable value of some concrete event kind.
pub trait Event: Debug + Send + Sync + 'static {
    /// The concrete kind this event is an instance of.
    fn kind(&self) -> Kind;

    /// The identifier assigned when the instance was created.
    fn id(&self) -> EventId;

    /// Upcast used for downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;
}

impl dyn Event {
    /// Attempts to view the event as concrete type `E`.
    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }
}
