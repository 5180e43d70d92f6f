//! Live session registry and shutdown drain

use dashmap::DashMap;
use futures_util::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use super::runner::{SessionHandle, SessionRunner, SessionStats};
use super::PushSink;

/// How the shutdown drain ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every session finished within the grace period
    Graceful,
    /// The grace period elapsed; this many sessions were aborted
    Forced(usize),
}

struct SessionEntry {
    handle: SessionHandle,
    task: JoinHandle<SessionStats>,
}

/// Tracks running sessions by id
pub struct SessionRegistry {
    sessions: DashMap<Uuid, SessionEntry>,
    accepting: AtomicBool,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            accepting: AtomicBool::new(true),
        }
    }

    /// Start a session task; returns `None` once shutdown has begun
    pub fn spawn<S: PushSink>(self: &Arc<Self>, runner: SessionRunner<S>, handle: SessionHandle) -> Option<SessionHandle> {
        if !self.is_accepting() {
            handle.disconnect();
            return None;
        }

        let id = handle.id();
        let registry = Arc::clone(self);
        let task = tokio::spawn(async move {
            let stats = runner.run().await;
            registry.sessions.remove(&id);
            tracing::info!("Session {} closed ({} live)", id, registry.sessions.len());
            stats
        });

        self.sessions.insert(
            id,
            SessionEntry {
                handle: handle.clone(),
                task,
            },
        );
        // The task may have finished before it was registered
        self.sessions.remove_if(&id, |_, entry| entry.task.is_finished());

        tracing::info!("Session {} opened ({} live)", id, self.sessions.len());
        Some(handle)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Stop accepting sessions, disconnect every live one and wait up to `grace`
    ///
    /// Sessions still running when the grace period elapses are aborted.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownOutcome {
        self.accepting.store(false, Ordering::SeqCst);

        let ids: Vec<Uuid> = self.sessions.iter().map(|entry| *entry.key()).collect();
        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, entry)) = self.sessions.remove(&id) {
                entry.handle.disconnect();
                tasks.push(entry.task);
            }
        }

        if tasks.is_empty() {
            return ShutdownOutcome::Graceful;
        }
        tracing::info!("Draining {} sessions (grace {:?})", tasks.len(), grace);

        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        match timeout(grace, join_all(tasks)).await {
            Ok(_) => ShutdownOutcome::Graceful,
            Err(_) => {
                let remaining = aborts.iter().filter(|abort| !abort.is_finished()).count();
                tracing::warn!("Grace period elapsed, aborting {} sessions", remaining);
                for abort in aborts {
                    abort.abort();
                }
                ShutdownOutcome::Forced(remaining)
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
