use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::event::Event;
use crate::registry::SubscriptionRegistry;

/// Fans one concrete event out to every matching registration.
///
/// Each handler invocation runs as an independent task. Failures and panics
/// are logged per task and never reach the emitter or sibling handlers.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
}

impl Dispatcher {
    /// Creates a dispatcher over the registry.
    pub const fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    /// Schedules every handler registered for the event's concrete kind.
    ///
    /// Registrations were expanded to concrete kinds at subscribe time, so
    /// this is a single lookup with no ancestor walk. Returns once the
    /// invocation tasks are spawned, not when handlers complete.
    pub fn notify(&self, event: &Arc<dyn Event>) {
        for (owner, handler_id, handler) in self.registry.handlers_for(event.kind()) {
            let event = Arc::clone(event);
            tokio::spawn(async move {
                match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => {
                        tracing::warn!(%owner, %handler_id, %error, "event handler failed");
                    }
                    Err(_) => {
                        tracing::error!(%owner, %handler_id, "event handler panicked");
                    }
                }
            });
        }
    }
}
