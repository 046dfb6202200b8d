mod error;

pub use error::Error;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use herald_bus::channel::{Channel, ChannelOptions};
use herald_bus::codec::EventCodec;
use herald_bus::dispatch::Dispatcher;
use herald_bus::event::Event;
use herald_bus::handler::EventHandler;
use herald_bus::hierarchy::Hierarchy;
use herald_bus::kind::Kind;
use herald_bus::registry::{HandlerId, OwnerId, SubscriptionRegistry};
use herald_logs::connection::{LogConnection, LogStoreError, ReadRequest};
use herald_logs::entry::{LogEntry, LogName, LogPosition, SessionId};
use herald_logs::store::LogStore;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// How long one blocking read or idle park runs before the loop naturally
/// re-evaluates its stream set.
const BLOCK: Duration = Duration::from_secs(10);

/// Backoff after an unexpected store failure in the consumer loop.
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Options for the stream channel.
#[derive(Clone, Debug)]
pub struct StreamChannelOptions<S, C> {
    /// The shared log store.
    pub store: S,
    /// Codec for event payloads.
    pub codec: C,
    /// Namespace prefix of the per-kind logs.
    pub namespace: String,
    /// The frozen event-type hierarchy.
    pub hierarchy: Arc<Hierarchy>,
}

impl<S, C> ChannelOptions for StreamChannelOptions<S, C>
where
    S: LogStore,
    C: EventCodec,
{
}

struct Shared<S: LogStore, C: EventCodec> {
    registry: Arc<SubscriptionRegistry>,
    codec: C,
    namespace: String,
    admin: S::Connection,
    reader_session: SessionId,
    cursors: Arc<Mutex<HashMap<Kind, LogPosition>>>,
    stop: CancellationToken,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

/// Everything the background consumer owns.
///
/// The reader connection spends most of its life blocked, so appends and
/// force-unblocks go through the channel's separate admin connection.
struct ConsumerContext<S: LogStore, C: EventCodec> {
    reader: S::Connection,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Dispatcher,
    codec: C,
    namespace: String,
    cursors: Arc<Mutex<HashMap<Kind, LogPosition>>>,
    stop: CancellationToken,
}

/// Distributed deployment of the bus.
///
/// Emit appends each event's encoded payload to its kind's log and returns
/// immediately; local subscribers observe it only once the background
/// consumer reads it back, exactly like subscribers in other processes.
pub struct StreamChannel<S: LogStore, C: EventCodec> {
    shared: Arc<Shared<S, C>>,
}

impl<S: LogStore, C: EventCodec> Clone for StreamChannel<S, C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<S: LogStore, C: EventCodec> fmt::Debug for StreamChannel<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamChannel")
            .field("namespace", &self.shared.namespace)
            .field("reader_session", &self.shared.reader_session)
            .finish_non_exhaustive()
    }
}

impl<S, C> StreamChannel<S, C>
where
    S: LogStore,
    C: EventCodec,
{
    /// The session identifier of the blocked reader connection.
    pub fn reader_session(&self) -> SessionId {
        self.shared.reader_session
    }

    /// Stops the background consumer and waits for it to exit.
    pub async fn shutdown(&self) -> Result<(), Error<S::Error, C::Error>> {
        self.shared.stop.cancel();
        self.shared
            .admin
            .unblock(self.shared.reader_session)
            .await
            .map_err(Error::Store)?;
        let consumer = self.shared.consumer.lock().take();
        if let Some(consumer) = consumer {
            if consumer.await.is_err() {
                warn!("consumer task panicked before shutdown");
            }
        }
        Ok(())
    }

    fn log_name(&self, kind: Kind) -> LogName {
        LogName::scoped(&self.shared.namespace, &kind.key())
    }

    /// Reconciles cursors with a subscribed-kind set change and pokes the
    /// blocked reader so it reissues against the new set.
    async fn sync_streams(
        &self,
        before: &BTreeSet<Kind>,
        after: &BTreeSet<Kind>,
    ) -> Result<(), Error<S::Error, C::Error>> {
        if before == after {
            return Ok(());
        }
        for kind in after.difference(before) {
            let log = self.log_name(*kind);
            let tail = self.shared.admin.tail(&log).await.map_err(Error::Store)?;
            // Start at the current tail: history predating the subscription
            // is never replayed. Overwrites any cursor left from an earlier
            // subscription of this kind.
            self.shared.cursors.lock().insert(*kind, tail);
        }
        for kind in before.difference(after) {
            self.shared.cursors.lock().remove(kind);
        }
        self.shared
            .admin
            .unblock(self.shared.reader_session)
            .await
            .map_err(Error::Store)?;
        Ok(())
    }

    async fn consume(ctx: ConsumerContext<S, C>) {
        loop {
            if ctx.stop.is_cancelled() {
                break;
            }
            let kinds = ctx.registry.subscribed_kinds();
            if kinds.is_empty() {
                Self::idle(&ctx).await;
                continue;
            }
            let Some((requests, routes)) = Self::plan(&ctx, &kinds).await else {
                continue;
            };
            let outcome = tokio::select! {
                () = ctx.stop.cancelled() => break,
                outcome = ctx.reader.read(&requests, BLOCK) => outcome,
            };
            match outcome {
                Ok(entries) => {
                    for entry in entries {
                        let Some(kind) = routes.get(&entry.log) else {
                            continue;
                        };
                        Self::deliver(&ctx, *kind, &entry);
                    }
                }
                Err(error) if error.is_forced_unblock() => {
                    debug!("blocked read unblocked, recomputing streams");
                }
                Err(error) => {
                    warn!(%error, "blocking read failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
        debug!("consumer loop stopped");
    }

    /// No subscribed kinds: wait on the reader connection so a subscribe
    /// can interrupt the wait instead of the loop busy-polling.
    async fn idle(ctx: &ConsumerContext<S, C>) {
        let outcome = tokio::select! {
            () = ctx.stop.cancelled() => return,
            outcome = ctx.reader.park(BLOCK) => outcome,
        };
        match outcome {
            Ok(()) => {}
            Err(error) if error.is_forced_unblock() => {
                debug!("idle park unblocked, recomputing streams");
            }
            Err(error) => {
                warn!(%error, "idle park failed, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }

    /// Builds the read request set for the subscribed kinds, stamping any
    /// cursor a racing subscribe has not stamped yet.
    async fn plan(
        ctx: &ConsumerContext<S, C>,
        kinds: &BTreeSet<Kind>,
    ) -> Option<(Vec<ReadRequest>, HashMap<LogName, Kind>)> {
        let mut requests = Vec::with_capacity(kinds.len());
        let mut routes = HashMap::with_capacity(kinds.len());
        for kind in kinds {
            let log = LogName::scoped(&ctx.namespace, &kind.key());
            let position = ctx.cursors.lock().get(kind).copied();
            let position = if let Some(position) = position {
                position
            } else {
                match ctx.reader.tail(&log).await {
                    Ok(tail) => *ctx.cursors.lock().entry(*kind).or_insert(tail),
                    Err(error) => {
                        warn!(%error, log = %log, "tail lookup failed, retrying");
                        tokio::time::sleep(RETRY_DELAY).await;
                        return None;
                    }
                }
            };
            routes.insert(log.clone(), *kind);
            requests.push(ReadRequest {
                log,
                after: position,
            });
        }
        Some((requests, routes))
    }

    fn deliver(ctx: &ConsumerContext<S, C>, kind: Kind, entry: &LogEntry) {
        {
            let mut cursors = ctx.cursors.lock();
            match cursors.get_mut(&kind) {
                // Advance before decoding so a poisoned entry is skipped,
                // not retried forever.
                Some(cursor) if *cursor < entry.position => *cursor = entry.position,
                // Already consumed.
                Some(_) => return,
                // The kind left the subscribed set while the read was in
                // flight.
                None => return,
            }
        }
        match ctx.codec.decode(kind, &entry.payload) {
            Ok(event) => ctx.dispatcher.notify(&event),
            Err(decode_error) => {
                error!(
                    error = %decode_error,
                    kind = %kind,
                    position = %entry.position,
                    "failed to decode log entry, skipping"
                );
            }
        }
    }
}

#[async_trait]
impl<S, C> Channel for StreamChannel<S, C>
where
    S: LogStore,
    C: EventCodec,
{
    type Error = Error<S::Error, C::Error>;

    type Options = StreamChannelOptions<S, C>;

    async fn new(options: Self::Options) -> Result<Self, Self::Error> {
        let reader = options.store.connect().await.map_err(Error::Store)?;
        let admin = options.store.connect().await.map_err(Error::Store)?;
        let reader_session = reader.session();

        let registry = Arc::new(SubscriptionRegistry::new(options.hierarchy));
        let dispatcher = Dispatcher::new(registry.clone());
        let cursors = Arc::new(Mutex::new(HashMap::new()));
        let stop = CancellationToken::new();

        let consumer = tokio::spawn(Self::consume(ConsumerContext {
            reader,
            registry: registry.clone(),
            dispatcher,
            codec: options.codec.clone(),
            namespace: options.namespace.clone(),
            cursors: cursors.clone(),
            stop: stop.clone(),
        }));

        Ok(Self {
            shared: Arc::new(Shared {
                registry,
                codec: options.codec,
                namespace: options.namespace,
                admin,
                reader_session,
                cursors,
                stop,
                consumer: Mutex::new(Some(consumer)),
            }),
        })
    }

    async fn subscribe(
        &self,
        owner: &OwnerId,
        kind: Kind,
        handler: Arc<dyn EventHandler>,
    ) -> Result<HandlerId, Self::Error> {
        let before = self.shared.registry.subscribed_kinds();
        let handler_id = self.shared.registry.subscribe(owner, kind, handler)?;
        let after = self.shared.registry.subscribed_kinds();
        self.sync_streams(&before, &after).await?;
        Ok(handler_id)
    }

    async fn unsubscribe_handler(
        &self,
        owner: &OwnerId,
        kind: Kind,
        handler: HandlerId,
    ) -> Result<usize, Self::Error> {
        let before = self.shared.registry.subscribed_kinds();
        let removed = self
            .shared
            .registry
            .unsubscribe_handler(owner, kind, handler)?;
        let after = self.shared.registry.subscribed_kinds();
        self.sync_streams(&before, &after).await?;
        Ok(removed)
    }

    async fn unsubscribe_kind(
        &self,
        owner: &OwnerId,
        kind: Kind,
    ) -> Result<usize, Self::Error> {
        let before = self.shared.registry.subscribed_kinds();
        let removed = self.shared.registry.unsubscribe_kind(owner, kind);
        let after = self.shared.registry.subscribed_kinds();
        self.sync_streams(&before, &after).await?;
        Ok(removed)
    }

    async fn unsubscribe_owner(&self, owner: &OwnerId) -> Result<usize, Self::Error> {
        let before = self.shared.registry.subscribed_kinds();
        let removed = self.shared.registry.unsubscribe_owner(owner);
        let after = self.shared.registry.subscribed_kinds();
        self.sync_streams(&before, &after).await?;
        Ok(removed)
    }

    async fn emit(
        &self,
        events: Vec<Arc<dyn Event>>,
    ) -> Result<Vec<Arc<dyn Event>>, Self::Error> {
        for event in &events {
            let payload = self
                .shared
                .codec
                .encode(event.as_ref())
                .map_err(Error::Codec)?;
            let log = self.log_name(event.kind());
            self.shared
                .admin
                .append(&log, payload)
                .await
                .map_err(Error::Store)?;
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use herald_bus::channel::{Channel, WaitOptions};
    use herald_bus::codec::{CodecError, EventCodec};
    use herald_bus::event::{Event, EventId};
    use herald_bus::handler::{EventHandler, handler};
    use herald_bus::hierarchy::Hierarchy;
    use herald_bus::kind::Kind;
    use herald_bus::registry::OwnerId;
    use herald_logs::connection::LogConnection;
    use herald_logs::entry::LogName;
    use herald_logs::store::LogStore;
    use herald_logs_memory::MemoryLogStore;
    use serde::{Deserialize, Serialize};
    use thiserror::Error;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use super::{StreamChannel, StreamChannelOptions};

    const ORDER_EVENT: Kind = Kind::new("orders::OrderEvent");
    const ORDER_PLACED: Kind = Kind::new("orders::OrderPlaced");
    const ORDER_SHIPPED: Kind = Kind::new("orders::OrderShipped");

    const NAMESPACE: &str = "herald-test";

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    struct OrderPlaced {
        id: EventId,
        amount: u64,
    }

    impl OrderPlaced {
        fn new(amount: u64) -> Self {
            Self {
                id: EventId::fresh(),
                amount,
            }
        }
    }

    impl Event for OrderPlaced {
        fn kind(&self) -> Kind {
            ORDER_PLACED
        }

        fn id(&self) -> EventId {
            self.id
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    struct OrderShipped {
        id: EventId,
        order: u64,
    }

    impl OrderShipped {
        fn new(order: u64) -> Self {
            Self {
                id: EventId::fresh(),
                order,
            }
        }
    }

    impl Event for OrderShipped {
        fn kind(&self) -> Kind {
            ORDER_SHIPPED
        }

        fn id(&self) -> EventId {
            self.id
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn orders() -> Arc<Hierarchy> {
        let mut builder = Hierarchy::builder();
        builder.abstract_kind(ORDER_EVENT, None).unwrap();
        builder
            .concrete_kind(ORDER_PLACED, Some(ORDER_EVENT))
            .unwrap();
        builder
            .concrete_kind(ORDER_SHIPPED, Some(ORDER_EVENT))
            .unwrap();
        Arc::new(builder.build().unwrap())
    }

    #[derive(Debug, Error)]
    enum JsonError {
        #[error("unknown kind `{0}`")]
        UnknownKind(Kind),
        #[error(transparent)]
        Json(#[from] serde_json::Error),
    }

    impl CodecError for JsonError {}

    #[derive(Clone, Debug, Default)]
    struct JsonCodec;

    impl EventCodec for JsonCodec {
        type Error = JsonError;

        fn encode(&self, event: &dyn Event) -> Result<Bytes, JsonError> {
            if let Some(placed) = event.downcast_ref::<OrderPlaced>() {
                Ok(Bytes::from(serde_json::to_vec(placed)?))
            } else if let Some(shipped) = event.downcast_ref::<OrderShipped>() {
                Ok(Bytes::from(serde_json::to_vec(shipped)?))
            } else {
                Err(JsonError::UnknownKind(event.kind()))
            }
        }

        fn decode(&self, kind: Kind, payload: &Bytes) -> Result<Arc<dyn Event>, JsonError> {
            if kind == ORDER_PLACED {
                Ok(Arc::new(serde_json::from_slice::<OrderPlaced>(payload)?))
            } else if kind == ORDER_SHIPPED {
                Ok(Arc::new(serde_json::from_slice::<OrderShipped>(payload)?))
            } else {
                Err(JsonError::UnknownKind(kind))
            }
        }
    }

    async fn channel(store: &MemoryLogStore) -> StreamChannel<MemoryLogStore, JsonCodec> {
        StreamChannel::new(StreamChannelOptions {
            store: store.clone(),
            codec: JsonCodec,
            namespace: NAMESPACE.to_string(),
            hierarchy: orders(),
        })
        .await
        .unwrap()
    }

    fn probe() -> (Arc<dyn EventHandler>, mpsc::Receiver<Arc<dyn Event>>) {
        let (sender, receiver) = mpsc::channel(16);
        let handler = handler(move |event| {
            let sender = sender.clone();
            async move {
                sender.send(event).await.map_err(|send| send.to_string())?;
                Ok(())
            }
        });
        (handler, receiver)
    }

    async fn recv(receiver: &mut mpsc::Receiver<Arc<dyn Event>>) -> Arc<dyn Event> {
        timeout(Duration::from_secs(1), receiver.recv())
            .await
            .unwrap()
            .unwrap()
    }

    async fn assert_silent(receiver: &mut mpsc::Receiver<Arc<dyn Event>>) {
        assert!(
            timeout(Duration::from_millis(200), receiver.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn delivers_events_emitted_after_subscribing() {
        let store = MemoryLogStore::new();
        let channel = channel(&store).await;
        let (handler, mut receiver) = probe();
        channel
            .subscribe(&OwnerId::new("crm"), ORDER_EVENT, handler)
            .await
            .unwrap();

        channel
            .emit(vec![Arc::new(OrderPlaced::new(5))])
            .await
            .unwrap();

        let event = recv(&mut receiver).await;
        assert_eq!(event.downcast_ref::<OrderPlaced>().unwrap().amount, 5);
    }

    #[tokio::test]
    async fn pre_subscription_backlog_is_never_replayed() {
        let store = MemoryLogStore::new();
        let channel = channel(&store).await;

        channel
            .emit(vec![Arc::new(OrderPlaced::new(1))])
            .await
            .unwrap();

        let (handler, mut receiver) = probe();
        channel
            .subscribe(&OwnerId::new("crm"), ORDER_PLACED, handler)
            .await
            .unwrap();
        assert_silent(&mut receiver).await;

        channel
            .emit(vec![Arc::new(OrderPlaced::new(2))])
            .await
            .unwrap();
        let event = recv(&mut receiver).await;
        assert_eq!(event.downcast_ref::<OrderPlaced>().unwrap().amount, 2);
    }

    #[tokio::test]
    async fn same_kind_events_arrive_in_emission_order() {
        let store = MemoryLogStore::new();
        let channel = channel(&store).await;
        let (handler, mut receiver) = probe();
        channel
            .subscribe(&OwnerId::new("crm"), ORDER_PLACED, handler)
            .await
            .unwrap();

        let events: Vec<Arc<dyn Event>> = (0..5)
            .map(|amount| Arc::new(OrderPlaced::new(amount)) as Arc<dyn Event>)
            .collect();
        channel.emit(events).await.unwrap();

        for amount in 0..5 {
            let event = recv(&mut receiver).await;
            assert_eq!(
                event.downcast_ref::<OrderPlaced>().unwrap().amount,
                amount
            );
        }
    }

    #[tokio::test]
    async fn a_new_subscription_interrupts_the_blocked_read() {
        let store = MemoryLogStore::new();
        let channel = channel(&store).await;
        let (placed_handler, _placed_receiver) = probe();
        channel
            .subscribe(&OwnerId::new("crm"), ORDER_PLACED, placed_handler)
            .await
            .unwrap();

        // Let the consumer block on the placed stream alone.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (shipped_handler, mut shipped_receiver) = probe();
        channel
            .subscribe(&OwnerId::new("logistics"), ORDER_SHIPPED, shipped_handler)
            .await
            .unwrap();

        channel
            .emit(vec![Arc::new(OrderShipped::new(9))])
            .await
            .unwrap();

        let event = recv(&mut shipped_receiver).await;
        assert_eq!(event.downcast_ref::<OrderShipped>().unwrap().order, 9);
    }

    #[tokio::test]
    async fn an_undecodable_entry_is_skipped_not_fatal() {
        let store = MemoryLogStore::new();
        let channel = channel(&store).await;
        let (handler, mut receiver) = probe();
        channel
            .subscribe(&OwnerId::new("crm"), ORDER_PLACED, handler)
            .await
            .unwrap();

        let poisoner = store.connect().await.unwrap();
        poisoner
            .append(
                &LogName::scoped(NAMESPACE, "orders-order-placed"),
                Bytes::from_static(b"not json"),
            )
            .await
            .unwrap();

        channel
            .emit(vec![Arc::new(OrderPlaced::new(3))])
            .await
            .unwrap();

        let event = recv(&mut receiver).await;
        assert_eq!(event.downcast_ref::<OrderPlaced>().unwrap().amount, 3);
        assert_silent(&mut receiver).await;
    }

    #[tokio::test]
    async fn unsubscribing_everything_idles_the_consumer() {
        let store = MemoryLogStore::new();
        let channel = channel(&store).await;
        let owner = OwnerId::new("crm");
        let (handler, mut receiver) = probe();
        channel.subscribe(&owner, ORDER_EVENT, handler).await.unwrap();

        channel
            .emit(vec![Arc::new(OrderPlaced::new(1))])
            .await
            .unwrap();
        recv(&mut receiver).await;

        let removed = channel.unsubscribe_owner(&owner).await.unwrap();
        assert_eq!(removed, 2);

        channel
            .emit(vec![Arc::new(OrderPlaced::new(2))])
            .await
            .unwrap();
        assert_silent(&mut receiver).await;
    }

    #[tokio::test]
    async fn events_emitted_while_unsubscribed_are_not_replayed() {
        let store = MemoryLogStore::new();
        let channel = channel(&store).await;
        let owner = OwnerId::new("crm");
        let (handler, _receiver) = probe();
        channel.subscribe(&owner, ORDER_PLACED, handler).await.unwrap();
        channel.unsubscribe_kind(&owner, ORDER_PLACED).await.unwrap();

        channel
            .emit(vec![Arc::new(OrderPlaced::new(1))])
            .await
            .unwrap();

        let (handler, mut receiver) = probe();
        channel.subscribe(&owner, ORDER_PLACED, handler).await.unwrap();
        assert_silent(&mut receiver).await;

        channel
            .emit(vec![Arc::new(OrderPlaced::new(2))])
            .await
            .unwrap();
        let event = recv(&mut receiver).await;
        assert_eq!(event.downcast_ref::<OrderPlaced>().unwrap().amount, 2);
    }

    #[tokio::test]
    async fn wait_until_resolves_through_the_stream() {
        let store = MemoryLogStore::new();
        let channel = channel(&store).await;

        let waiting = {
            let channel = channel.clone();
            tokio::spawn(async move {
                channel
                    .wait_until(ORDER_EVENT, WaitOptions::default(), |event| {
                        Some(event.downcast_ref::<OrderPlaced>()?.amount)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        channel
            .emit(vec![Arc::new(OrderPlaced::new(11))])
            .await
            .unwrap();

        let matched = timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(matched, 11);
    }

    #[tokio::test]
    async fn shutdown_stops_the_consumer() {
        let store = MemoryLogStore::new();
        let channel = channel(&store).await;
        let (handler, mut receiver) = probe();
        channel
            .subscribe(&OwnerId::new("crm"), ORDER_PLACED, handler)
            .await
            .unwrap();

        channel
            .emit(vec![Arc::new(OrderPlaced::new(1))])
            .await
            .unwrap();
        recv(&mut receiver).await;

        channel.shutdown().await.unwrap();

        channel
            .emit(vec![Arc::new(OrderPlaced::new(2))])
            .await
            .unwrap();
        assert_silent(&mut receiver).await;
    }

    #[tokio::test]
    async fn the_codec_round_trips_every_field() {
        let codec = JsonCodec;
        let original = OrderPlaced::new(17);

        let payload = codec.encode(&original).unwrap();
        let decoded = codec.decode(ORDER_PLACED, &payload).unwrap();

        assert_eq!(decoded.downcast_ref::<OrderPlaced>().unwrap(), &original);
    }
}
