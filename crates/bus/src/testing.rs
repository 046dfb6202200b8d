//! Shared test fixtures: a small user-event hierarchy.

use std::any::Any;
use std::sync::Arc;

use crate::event::{Event, EventId};
use crate::hierarchy::Hierarchy;
use crate::kind::Kind;

pub const USER_EVENT: Kind = Kind::new("users::UserEvent");
pub const USER_CREATED: Kind = Kind::new("users::UserCreated");
pub const USER_DELETED: Kind = Kind::new("users::UserDeleted");

#[derive(Clone, Debug)]
pub struct UserCreated {
    pub id: EventId,
    pub user_id: u64,
}

impl UserCreated {
    pub fn new(user_id: u64) -> Self {
        Self {
            id: EventId::fresh(),
            user_id,
        }
    }
}

impl Event for UserCreated {
    fn kind(&self) -> Kind {
        USER_CREATED
    }

    fn id(&self) -> EventId {
        self.id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Clone, Debug)]
pub struct UserDeleted {
    pub id: EventId,
    pub user_id: u64,
    pub reason: String,
}

impl UserDeleted {
    pub fn new(user_id: u64, reason: impl Into<String>) -> Self {
        Self {
            id: EventId::fresh(),
            user_id,
            reason: reason.into(),
        }
    }
}

impl Event for UserDeleted {
    fn kind(&self) -> Kind {
        USER_DELETED
    }

    fn id(&self) -> EventId {
        self.id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn user_hierarchy() -> Arc<Hierarchy> {
    let mut builder = Hierarchy::builder();
    builder.abstract_kind(USER_EVENT, None).unwrap();
    builder.concrete_kind(USER_CREATED, Some(USER_EVENT)).unwrap();
    builder.concrete_kind(USER_DELETED, Some(USER_EVENT)).unwrap();
    Arc::new(builder.build().unwrap())
}
