use std::error::Error;
use std::fmt::Debug;
use std::sync::Arc;

use bytes::Bytes;

use crate::event::Event;
use crate::kind::Kind;

/// Marker trait for codec errors
pub trait CodecError: Debug + Error + Send + Sync + 'static {}

/// Encodes events into per-kind log payloads and decodes them back.
///
/// The wire format is opaque to the bus. Implementations must round-trip
/// every field of each concrete kind, including the instance identifier.
pub trait EventCodec
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the codec.
    type Error: CodecError;

    /// Serializes the event's payload.
    fn encode(&self, event: &dyn Event) -> Result<Bytes, Self::Error>;

    /// Deserializes a payload into an instance of the given concrete kind.
    fn decode(&self, kind: Kind, payload: &Bytes) -> Result<Arc<dyn Event>, Self::Error>;
}
