//! Hierarchical typed event bus: shared contract and in-process engine.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Channels are the contract shared by both deployment modes.
pub mod channel;

/// Codecs serialize events for per-kind logs.
pub mod codec;

/// Dispatch fans one event out to every matching handler.
pub mod dispatch;

/// Errors for subscription and wait operations.
pub mod error;

/// Events are immutable values of some concrete kind.
pub mod event;

/// Handlers consume delivered events.
pub mod handler;

/// The closed-world event-type hierarchy.
pub mod hierarchy;

/// Kinds identify nodes of the hierarchy.
pub mod kind;

/// The in-memory channel for single-process fan-out.
pub mod memory;

/// The subscription registry maps concrete kinds to handler registrations.
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;
