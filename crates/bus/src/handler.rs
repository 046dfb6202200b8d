use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::event::Event;

/// Failure surfaced by one handler invocation.
///
/// Handler failures are isolated per invocation task and logged; they never
/// reach the emitter or sibling handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A trait representing a subscribed event callback.
///
/// One handler may be registered under many concrete kinds (when subscribed
/// at an abstract ancestor), so it receives the type-erased event and
/// downcasts as needed.
#[async_trait]
pub trait EventHandler
where
    Self: Send + Sync + 'static,
{
    /// Handles one delivered event.
    async fn handle(&self, event: Arc<dyn Event>) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct FnHandler<F> {
    callback: F,
}

impl<F> FnHandler<F> {
    /// Wraps the closure.
    pub const fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Arc<dyn Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, event: Arc<dyn Event>) -> Result<(), HandlerError> {
        (self.callback)(event).await
    }
}

/// Boxes an async closure as a shareable handler.
pub fn handler<F, Fut>(callback: F) -> Arc<dyn EventHandler>
where
    F: Fn(Arc<dyn Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler::new(callback))
}
