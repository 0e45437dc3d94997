//! In-memory session store
//!
//! One [`SessionHandle`] per session id. A handle pairs a writer gate with
//! the committed state: the controller holds the gate for a whole iteration
//! and works on a copy, so readers only ever see committed states.

use crate::models::RectificationSession;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::info;
use uuid::Uuid;

pub struct SessionHandle {
    writer: Mutex<()>,
    state: RwLock<RectificationSession>,
    archived: AtomicBool,
}

impl SessionHandle {
    fn new(session: RectificationSession) -> Self {
        Self {
            writer: Mutex::new(()),
            state: RwLock::new(session),
            archived: AtomicBool::new(false),
        }
    }

    /// Single writer per session; hold the guard across read-modify-commit
    pub async fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().await
    }

    /// Copy of the committed state
    pub async fn snapshot(&self) -> RectificationSession {
        self.state.read().await.clone()
    }

    /// Replace the committed state; caller must hold the writer guard
    pub async fn commit(&self, session: RectificationSession) {
        *self.state.write().await = session;
    }

    pub fn mark_archived(&self) {
        self.archived.store(true, Ordering::SeqCst);
    }

    pub fn is_archived(&self) -> bool {
        self.archived.load(Ordering::SeqCst)
    }
}

/// Sessions keyed by id
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Arc<SessionHandle>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: RectificationSession) -> Arc<SessionHandle> {
        let id = session.session_id;
        let handle = Arc::new(SessionHandle::new(session));
        self.sessions.write().await.insert(id, Arc::clone(&handle));
        handle
    }

    pub async fn get(&self, session_id: Uuid) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(&session_id).cloned()
    }

    pub async fn remove(&self, session_id: Uuid) -> Option<Arc<SessionHandle>> {
        self.sessions.write().await.remove(&session_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop sessions idle for longer than `ttl`.
    ///
    /// Sessions with an iteration in flight are skipped. Returns the purged ids.
    pub async fn purge_expired(&self, ttl: Duration) -> Vec<Uuid> {
        let cutoff = match chrono::Duration::from_std(ttl) {
            Ok(ttl) => Utc::now() - ttl,
            Err(_) => return Vec::new(),
        };

        let mut sessions = self.sessions.write().await;
        let mut expired = Vec::new();
        for (id, handle) in sessions.iter() {
            if handle.writer.try_lock().is_err() {
                continue;
            }
            if let Ok(state) = handle.state.try_read() {
                if state.updated_at < cutoff {
                    expired.push(*id);
                }
            }
        }
        for id in &expired {
            sessions.remove(id);
        }
        if !expired.is_empty() {
            info!(purged = expired.len(), remaining = sessions.len(), "Purged idle sessions");
        }
        expired
    }
}
