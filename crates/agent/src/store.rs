use std::collections::HashMap;
use std::sync::Arc;

use haven_core::domain::session::{SessionId, SessionState};
use tokio::sync::{Mutex, MutexGuard, RwLock};

/// Key-addressed store for live sessions. The outer map lock is held only
/// for lookup and insert; all per-session work serializes on the handle's
/// own mutex, so one slow conversation never blocks the others. Sessions are
/// never evicted while the process runs.
#[derive(Default)]
pub struct ConversationStore {
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
}

pub struct SessionHandle {
    state: Mutex<SessionState>,
}

impl SessionHandle {
    fn new(id: SessionId) -> Self {
        Self { state: Mutex::new(SessionState::new(id)) }
    }

    /// Tokio's mutex wakes waiters in FIFO order, so turns queued on the
    /// same session land in arrival order.
    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `id`, creating the session on first contact.
    /// Two callers racing on a new id converge on one handle.
    pub async fn open(&self, id: &SessionId) -> Arc<SessionHandle> {
        if let Some(handle) = self.sessions.read().await.get(id) {
            return Arc::clone(handle);
        }

        let mut sessions = self.sessions.write().await;
        let handle = sessions
            .entry(id.clone())
            .or_insert_with(|| Arc::new(SessionHandle::new(id.clone())));
        Arc::clone(handle)
    }

    /// Lookup that never creates; read surfaces use this so that probing a
    /// session id leaves no trace.
    pub async fn get(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> =
            self.sessions.read().await.keys().cloned().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }
}
