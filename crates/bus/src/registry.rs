use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::Error;
use crate::handler::EventHandler;
use crate::hierarchy::Hierarchy;
use crate::kind::Kind;

/// Opaque identity of a logical subscriber.
///
/// One owner may hold many registrations across kinds.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(Arc<str>);

impl OwnerId {
    /// Creates an owner identity from a name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Creates a process-unique owner identity.
    pub fn unique() -> Self {
        Self(Arc::from(Uuid::new_v4().to_string().as_str()))
    }
}

impl From<&str> for OwnerId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque token identifying one registered handler, required for
/// exact-match unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(0);

impl HandlerId {
    fn next() -> Self {
        Self(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type OwnerRegistrations = HashMap<HandlerId, Arc<dyn EventHandler>>;
type KindRegistrations = HashMap<OwnerId, OwnerRegistrations>;

/// Maps concrete kinds to each owner's handler registrations.
///
/// Subscribing to an abstract kind expands into one registration per
/// concrete descendant at call time, so dispatch is a single concrete-kind
/// lookup. Dispatch reads run concurrently; structural writes are
/// serialized, and empty buckets are pruned on removal.
pub struct SubscriptionRegistry {
    hierarchy: Arc<Hierarchy>,
    registrations: RwLock<HashMap<Kind, KindRegistrations>>,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("hierarchy", &self.hierarchy)
            .finish_non_exhaustive()
    }
}

impl SubscriptionRegistry {
    /// Creates an empty registry over the frozen hierarchy.
    pub fn new(hierarchy: Arc<Hierarchy>) -> Self {
        Self {
            hierarchy,
            registrations: RwLock::new(HashMap::new()),
        }
    }

    /// The hierarchy this registry resolves kinds against.
    pub const fn hierarchy(&self) -> &Arc<Hierarchy> {
        &self.hierarchy
    }

    /// Registers `handler` under every concrete descendant of `kind`.
    ///
    /// Returns the handler identity needed for exact-match unsubscribe.
    pub fn subscribe(
        &self,
        owner: &OwnerId,
        kind: Kind,
        handler: Arc<dyn EventHandler>,
    ) -> Result<HandlerId, Error> {
        let descendants = self.hierarchy.concrete_descendants(kind);
        if descendants.is_empty() {
            return Err(Error::NoConcreteDescendants(kind));
        }

        let handler_id = HandlerId::next();
        let mut registrations = self.registrations.write();
        for descendant in descendants {
            registrations
                .entry(*descendant)
                .or_default()
                .entry(owner.clone())
                .or_default()
                .insert(handler_id, handler.clone());
        }
        Ok(handler_id)
    }

    /// Removes the exact `(descendant, owner, handler)` registration under
    /// every concrete descendant of `kind`.
    ///
    /// Zero removals is a hard error: it usually means the caller passed a
    /// handler identity other than the one subscribe returned.
    pub fn unsubscribe_handler(
        &self,
        owner: &OwnerId,
        kind: Kind,
        handler: HandlerId,
    ) -> Result<usize, Error> {
        let descendants = self.hierarchy.concrete_descendants(kind);
        let mut removed = 0;

        let mut registrations = self.registrations.write();
        for descendant in descendants {
            let Some(bucket) = registrations.get_mut(descendant) else {
                continue;
            };
            if let Some(owned) = bucket.get_mut(owner) {
                if owned.remove(&handler).is_some() {
                    removed += 1;
                }
                if owned.is_empty() {
                    bucket.remove(owner);
                }
            }
            let now_empty = bucket.is_empty();
            if now_empty {
                registrations.remove(descendant);
            }
        }

        if removed == 0 {
            return Err(Error::HandlerNotRegistered { kind, handler });
        }
        Ok(removed)
    }

    /// Removes all of the owner's registrations under every concrete
    /// descendant of `kind`. Returns 0 when nothing matched.
    pub fn unsubscribe_kind(&self, owner: &OwnerId, kind: Kind) -> usize {
        let descendants = self.hierarchy.concrete_descendants(kind);
        let mut removed = 0;

        let mut registrations = self.registrations.write();
        for descendant in descendants {
            let Some(bucket) = registrations.get_mut(descendant) else {
                continue;
            };
            if let Some(owned) = bucket.remove(owner) {
                removed += owned.len();
            }
            let now_empty = bucket.is_empty();
            if now_empty {
                registrations.remove(descendant);
            }
        }
        removed
    }

    /// Removes all of the owner's registrations across the registry.
    pub fn unsubscribe_owner(&self, owner: &OwnerId) -> usize {
        let mut removed = 0;
        self.registrations.write().retain(|_, bucket| {
            if let Some(owned) = bucket.remove(owner) {
                removed += owned.len();
            }
            !bucket.is_empty()
        });
        removed
    }

    /// Snapshot of the handlers registered for one concrete kind.
    pub fn handlers_for(
        &self,
        kind: Kind,
    ) -> Vec<(OwnerId, HandlerId, Arc<dyn EventHandler>)> {
        let registrations = self.registrations.read();
        let Some(bucket) = registrations.get(&kind) else {
            return Vec::new();
        };
        bucket
            .iter()
            .flat_map(|(owner, owned)| {
                owned
                    .iter()
                    .map(move |(id, handler)| (owner.clone(), *id, handler.clone()))
            })
            .collect()
    }

    /// The concrete kinds currently holding at least one registration.
    pub fn subscribed_kinds(&self) -> BTreeSet<Kind> {
        self.registrations.read().keys().copied().collect()
    }

    /// Total number of stored registrations.
    pub fn registration_count(&self) -> usize {
        self.registrations
            .read()
            .values()
            .map(|bucket| bucket.values().map(HashMap::len).sum::<usize>())
            .sum()
    }
}
