use std::sync::Arc;

use async_trait::async_trait;

use crate::channel::{Channel, ChannelOptions};
use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::event::Event;
use crate::handler::EventHandler;
use crate::hierarchy::Hierarchy;
use crate::kind::Kind;
use crate::registry::{HandlerId, OwnerId, SubscriptionRegistry};

/// Options for the in-memory channel.
#[derive(Clone, Debug)]
pub struct MemoryChannelOptions {
    /// The frozen event-type hierarchy.
    pub hierarchy: Arc<Hierarchy>,
}
impl ChannelOptions for MemoryChannelOptions {}

/// Single-process deployment of the bus.
///
/// Emitted events fan out directly through the dispatcher to local
/// handlers; nothing is persisted.
#[derive(Clone, Debug)]
pub struct MemoryChannel {
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Dispatcher,
}

impl MemoryChannel {
    /// The registry backing this channel.
    pub const fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    type Error = Error;

    type Options = MemoryChannelOptions;

    async fn new(options: MemoryChannelOptions) -> Result<Self, Error> {
        let registry = Arc::new(SubscriptionRegistry::new(options.hierarchy));
        let dispatcher = Dispatcher::new(registry.clone());
        Ok(Self {
            registry,
            dispatcher,
        })
    }

    async fn subscribe(
        &self,
        owner: &OwnerId,
        kind: Kind,
        handler: Arc<dyn EventHandler>,
    ) -> Result<HandlerId, Error> {
        self.registry.subscribe(owner, kind, handler)
    }

    async fn unsubscribe_handler(
        &self,
        owner: &OwnerId,
        kind: Kind,
        handler: HandlerId,
    ) -> Result<usize, Error> {
        self.registry.unsubscribe_handler(owner, kind, handler)
    }

    async fn unsubscribe_kind(&self, owner: &OwnerId, kind: Kind) -> Result<usize, Error> {
        Ok(self.registry.unsubscribe_kind(owner, kind))
    }

    async fn unsubscribe_owner(&self, owner: &OwnerId) -> Result<usize, Error> {
        Ok(self.registry.unsubscribe_owner(owner))
    }

    async fn emit(
        &self,
        events: Vec<Arc<dyn Event>>,
    ) -> Result<Vec<Arc<dyn Event>>, Error> {
        for event in &events {
            self.dispatcher.notify(event);
        }
        Ok(events)
    }
}
