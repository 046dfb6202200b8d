use std::error::Error as StdError;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::WaitError;
use crate::event::Event;
use crate::handler::{EventHandler, HandlerError};
use crate::kind::Kind;
use crate::registry::{HandlerId, OwnerId};

/// Marker trait for channel errors
pub trait ChannelError: Debug + StdError + Send + Sync + 'static {}

/// Marker trait for channel options
pub trait ChannelOptions: Clone + Debug + Send + Sync + 'static {}

/// Options for [`Channel::wait_until`].
#[derive(Clone, Debug, Default)]
pub struct WaitOptions {
    /// Give up with [`WaitError::Lapsed`](crate::error::WaitError::Lapsed)
    /// after this long. `None` waits indefinitely.
    pub timeout: Option<Duration>,

    /// External cancellation for the wait.
    pub cancel: Option<CancellationToken>,
}

/// The bus contract shared by both deployment modes.
///
/// Handlers are registered against a node of the event-type hierarchy and
/// invoked asynchronously for every matching concrete event. Emit returns
/// once delivery has been scheduled; callers that need to observe handler
/// side effects must synchronize explicitly.
#[async_trait]
pub trait Channel
where
    Self: Clone + Send + Sync + 'static,
{
    /// The error type for the channel.
    type Error: ChannelError;

    /// The options used to construct the channel.
    type Options: ChannelOptions;

    /// Creates a new channel.
    async fn new(options: Self::Options) -> Result<Self, Self::Error>;

    /// Registers `handler` under every concrete descendant of `kind`,
    /// returning the identity needed for exact-match unsubscribe.
    async fn subscribe(
        &self,
        owner: &OwnerId,
        kind: Kind,
        handler: Arc<dyn EventHandler>,
    ) -> Result<HandlerId, Self::Error>;

    /// Removes the exact handler registration under every concrete
    /// descendant of `kind`. Zero removals is a hard error.
    async fn unsubscribe_handler(
        &self,
        owner: &OwnerId,
        kind: Kind,
        handler: HandlerId,
    ) -> Result<usize, Self::Error>;

    /// Removes all of the owner's registrations under `kind`.
    async fn unsubscribe_kind(&self, owner: &OwnerId, kind: Kind)
    -> Result<usize, Self::Error>;

    /// Removes all of the owner's registrations.
    async fn unsubscribe_owner(&self, owner: &OwnerId) -> Result<usize, Self::Error>;

    /// Emits the events in argument order and returns them unchanged.
    async fn emit(
        &self,
        events: Vec<Arc<dyn Event>>,
    ) -> Result<Vec<Arc<dyn Event>>, Self::Error>;

    /// Suspends until an instance of `kind` satisfies `matcher`, returning
    /// the matched projection.
    ///
    /// The matcher fuses the field filter and the projection: returning
    /// `None` lets an instance pass unmatched; the first `Some` wins.
    /// Internally this is a private one-shot registration under a unique
    /// owner, removed once the wait resolves.
    async fn wait_until<T, F>(
        &self,
        kind: Kind,
        options: WaitOptions,
        matcher: F,
    ) -> Result<T, WaitError<Self::Error>>
    where
        T: Send + 'static,
        F: Fn(&Arc<dyn Event>) -> Option<T> + Send + Sync + 'static,
    {
        let owner = OwnerId::unique();
        let (sender, receiver) = oneshot::channel();
        let handler = Arc::new(OneShotHandler {
            matcher,
            slot: Mutex::new(Some(sender)),
        });

        self.subscribe(&owner, kind, handler)
            .await
            .map_err(WaitError::Channel)?;

        let timeout = async {
            match options.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };
        let cancelled = async {
            match options.cancel {
                Some(token) => token.cancelled_owned().await,
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            matched = receiver => matched.map_err(|_| WaitError::Cancelled),
            () = timeout => Err(WaitError::Lapsed),
            () = cancelled => Err(WaitError::Cancelled),
        };

        let _ = self.unsubscribe_owner(&owner).await;
        outcome
    }

    /// Suspends until the first instance of `kind`, returning it as-is.
    async fn wait_for(
        &self,
        kind: Kind,
        options: WaitOptions,
    ) -> Result<Arc<dyn Event>, WaitError<Self::Error>> {
        self.wait_until(kind, options, |event| Some(Arc::clone(event)))
            .await
    }
}

/// Single-slot handoff behind a private one-shot registration.
struct OneShotHandler<T, F> {
    matcher: F,
    slot: Mutex<Option<oneshot::Sender<T>>>,
}

#[async_trait]
impl<T, F> EventHandler for OneShotHandler<T, F>
where
    T: Send + 'static,
    F: Fn(&Arc<dyn Event>) -> Option<T> + Send + Sync + 'static,
{
    async fn handle(&self, event: Arc<dyn Event>) -> Result<(), HandlerError> {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            return Ok(());
        }
        if let Some(matched) = (self.matcher)(&event) {
            if let Some(sender) = slot.take() {
                let _ = sender.send(matched);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    use super::{Channel, WaitOptions};
    use crate::error::WaitError;
    use crate::event::Event;
    use crate::memory::{MemoryChannel, MemoryChannelOptions};
    use crate::testing::{USER_CREATED, USER_EVENT, UserCreated, user_hierarchy};

    async fn channel() -> MemoryChannel {
        MemoryChannel::new(MemoryChannelOptions {
            hierarchy: user_hierarchy(),
        })
        .await
        .unwrap()
    }

    fn created(user_id: u64) -> Arc<dyn Event> {
        Arc::new(UserCreated::new(user_id))
    }

    #[tokio::test]
    async fn wait_for_unblocks_on_the_first_matching_event() {
        let channel = channel().await;

        // join polls the wait first, so the one-shot registration exists
        // before the emit runs.
        let (event, emitted) = timeout(Duration::from_secs(1), async {
            tokio::join!(
                channel.wait_for(USER_EVENT, WaitOptions::default()),
                channel.emit(vec![created(42)])
            )
        })
        .await
        .unwrap();

        emitted.unwrap();
        let event = event.unwrap();
        assert_eq!(event.downcast_ref::<UserCreated>().unwrap().user_id, 42);
    }

    #[tokio::test]
    async fn wait_until_skips_instances_the_matcher_rejects() {
        let channel = channel().await;

        let (matched, emitted) = timeout(Duration::from_secs(1), async {
            tokio::join!(
                channel.wait_until(USER_CREATED, WaitOptions::default(), |event| {
                    let created = event.downcast_ref::<UserCreated>()?;
                    (created.user_id == 42).then_some(created.user_id)
                }),
                channel.emit(vec![created(1), created(2), created(42)])
            )
        })
        .await
        .unwrap();

        emitted.unwrap();
        assert_eq!(matched.unwrap(), 42);
    }

    #[tokio::test]
    async fn wait_until_times_out_when_nothing_matches() {
        let channel = channel().await;

        let result = channel
            .wait_for(
                USER_CREATED,
                WaitOptions {
                    timeout: Some(Duration::from_millis(50)),
                    cancel: None,
                },
            )
            .await;

        assert!(matches!(result, Err(WaitError::Lapsed)));
        assert_eq!(channel.registry().registration_count(), 0);
    }

    #[tokio::test]
    async fn wait_until_observes_cancellation() {
        let channel = channel().await;
        let cancel = CancellationToken::new();

        let (result, ()) = timeout(Duration::from_secs(1), async {
            tokio::join!(
                channel.wait_for(
                    USER_CREATED,
                    WaitOptions {
                        timeout: None,
                        cancel: Some(cancel.clone()),
                    },
                ),
                async { cancel.cancel() }
            )
        })
        .await
        .unwrap();

        assert!(matches!(result, Err(WaitError::Cancelled)));
    }

    #[tokio::test]
    async fn the_private_registration_is_removed_after_the_wait() {
        let channel = channel().await;

        let (event, emitted) = timeout(Duration::from_secs(1), async {
            tokio::join!(
                channel.wait_for(USER_EVENT, WaitOptions::default()),
                channel.emit(vec![created(7)])
            )
        })
        .await
        .unwrap();

        emitted.unwrap();
        event.unwrap();
        assert_eq!(channel.registry().registration_count(), 0);
    }
}
