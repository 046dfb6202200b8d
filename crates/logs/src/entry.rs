use std::fmt;

use bytes::Bytes;

/// Name of one append-only log, conventionally `<namespace>:<key>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogName(String);

impl LogName {
    /// Creates a log name from a raw string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Creates the log name for a key within a namespace.
    pub fn scoped(namespace: &str, key: &str) -> Self {
        Self(format!("{namespace}:{key}"))
    }

    /// The full name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of one entry within a log.
///
/// Positions order by `(millis, seq)` and are strictly monotonic within a
/// log; `seq` breaks ties among entries appended in the same millisecond.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogPosition {
    /// Milliseconds since the unix epoch at append time.
    pub millis: u64,
    /// Tie-breaker within one millisecond.
    pub seq: u64,
}

impl LogPosition {
    /// The position before any entry.
    pub const ZERO: Self = Self { millis: 0, seq: 0 };
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

/// One stored log entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    /// The log the entry belongs to.
    pub log: LogName,
    /// The entry's position within that log.
    pub position: LogPosition,
    /// The opaque serialized payload.
    pub payload: Bytes,
}

/// Identity of one connection's session, the target of force-unblock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Creates a session identifier.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
