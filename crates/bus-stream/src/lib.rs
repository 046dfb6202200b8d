//! Log-store-backed implementation of the bus contract.
//!
//! Emitted events are appended to one append-only log per concrete kind in
//! a shared store; a background consumer blocks on the subscribed streams
//! and re-injects decoded entries into the local dispatcher. Subscription
//! changes force-unblock the blocked read so it reissues against the
//! updated stream set.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// The stream channel and its background consumer loop.
pub mod channel;
