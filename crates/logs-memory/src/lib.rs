//! In-memory implementation of the log store interface.
//!
//! One store holds its logs behind a shared handle; every connection opened
//! from a clone of the store sees the same data. Intended for tests and
//! local development.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::HashMap;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use herald_logs::connection::{LogConnection, ReadRequest};
use herald_logs::entry::{LogEntry, LogName, LogPosition, SessionId};
use herald_logs::store::LogStore;
use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Session {
    blocked: AtomicBool,
    unblocked: Notify,
}

#[derive(Debug, Default)]
struct State {
    logs: Mutex<HashMap<LogName, Vec<(LogPosition, Bytes)>>>,
    appended: Notify,
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    next_session: AtomicU64,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}

/// An in-memory log store.
#[derive(Clone, Debug, Default)]
pub struct MemoryLogStore {
    state: Arc<State>,
}

impl MemoryLogStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    type Error = Error;

    type Connection = MemoryLogConnection;

    async fn connect(&self) -> Result<MemoryLogConnection, Error> {
        let session_id = SessionId::new(self.state.next_session.fetch_add(1, Ordering::Relaxed));
        let session = Arc::new(Session::default());
        self.state
            .sessions
            .lock()
            .insert(session_id, session.clone());
        Ok(MemoryLogConnection {
            state: self.state.clone(),
            session_id,
            session,
        })
    }
}

/// One connection to a [`MemoryLogStore`].
#[derive(Debug)]
pub struct MemoryLogConnection {
    state: Arc<State>,
    session_id: SessionId,
    session: Arc<Session>,
}

impl Drop for MemoryLogConnection {
    fn drop(&mut self) {
        self.state.sessions.lock().remove(&self.session_id);
    }
}

impl MemoryLogConnection {
    fn collect(&self, requests: &[ReadRequest]) -> Vec<LogEntry> {
        let logs = self.state.logs.lock();
        let mut entries = Vec::new();
        for request in requests {
            if let Some(log) = logs.get(&request.log) {
                let start = log.partition_point(|(position, _)| *position <= request.after);
                for (position, payload) in &log[start..] {
                    entries.push(LogEntry {
                        log: request.log.clone(),
                        position: *position,
                        payload: payload.clone(),
                    });
                }
            }
        }
        entries
    }
}

#[async_trait]
impl LogConnection for MemoryLogConnection {
    type Error = Error;

    fn session(&self) -> SessionId {
        self.session_id
    }

    async fn append(&self, log: &LogName, payload: Bytes) -> Result<LogPosition, Error> {
        let position = {
            let mut logs = self.state.logs.lock();
            let entries = logs.entry(log.clone()).or_default();
            let millis = now_millis();
            let position = match entries.last() {
                // Positions never regress, even if the clock does.
                Some((last, _)) if last.millis >= millis => LogPosition {
                    millis: last.millis,
                    seq: last.seq + 1,
                },
                _ => LogPosition { millis, seq: 0 },
            };
            entries.push((position, payload));
            position
        };
        self.state.appended.notify_waiters();
        Ok(position)
    }

    async fn tail(&self, log: &LogName) -> Result<LogPosition, Error> {
        let logs = self.state.logs.lock();
        Ok(logs
            .get(log)
            .and_then(|entries| entries.last())
            .map_or(LogPosition::ZERO, |(position, _)| *position))
    }

    async fn read(
        &self,
        requests: &[ReadRequest],
        block: Duration,
    ) -> Result<Vec<LogEntry>, Error> {
        let deadline = tokio::time::Instant::now() + block;
        self.session.blocked.store(true, Ordering::SeqCst);
        let result = loop {
            // Register append interest before checking so an append between
            // the check and the wait is not missed.
            let mut appended = pin!(self.state.appended.notified());
            appended.as_mut().enable();

            let entries = self.collect(requests);
            if !entries.is_empty() {
                break Ok(entries);
            }

            tokio::select! {
                () = &mut appended => {}
                () = self.session.unblocked.notified() => break Err(Error::Unblocked),
                () = tokio::time::sleep_until(deadline) => break Ok(Vec::new()),
            }
        };
        self.session.blocked.store(false, Ordering::SeqCst);
        result
    }

    async fn park(&self, block: Duration) -> Result<(), Error> {
        self.session.blocked.store(true, Ordering::SeqCst);
        let result = tokio::select! {
            () = self.session.unblocked.notified() => Err(Error::Unblocked),
            () = tokio::time::sleep(block) => Ok(()),
        };
        self.session.blocked.store(false, Ordering::SeqCst);
        result
    }

    async fn unblock(&self, session: SessionId) -> Result<bool, Error> {
        let target = self.state.sessions.lock().get(&session).cloned();
        let Some(target) = target else {
            return Ok(false);
        };
        let was_blocked = target.blocked.load(Ordering::SeqCst);
        // The permit is stored even when the target is between blocking
        // calls, so a racing reissue still wakes and recomputes promptly.
        target.unblocked.notify_one();
        Ok(was_blocked)
    }
}
