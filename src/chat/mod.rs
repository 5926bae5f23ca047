use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::Error;
use crate::registry::AgentRegistry;
use crate::types::Message;

/// Query orchestrator: the single entry point tying an authenticated
/// session identity to an agent turn, plus history reads and cleanup.
pub struct ChatService {
    registry: Arc<AgentRegistry>,
    /// Per-session locks so an exchange (human + assistant message) lands
    /// in the store as one adjacent, correctly paired unit.
    session_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl ChatService {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self {
            registry,
            session_locks: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        {
            let locks = self.session_locks.read().await;
            if let Some(lock) = locks.get(session_id) {
                return Arc::clone(lock);
            }
        }

        let mut locks = self.session_locks.write().await;
        Arc::clone(
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Run one query through the agent.
    ///
    /// Blank input is rejected before anything is constructed or stored.
    /// The exchange is appended only after the agent fully succeeds; a
    /// failed invocation leaves history untouched. An empty agent answer
    /// is still appended and returned as-is.
    pub async fn handle_query(&self, session_id: &str, query: &str) -> Result<String, Error> {
        if query.trim().is_empty() {
            return Err(Error::invalid_input("query text is empty"));
        }

        let entry = self.registry.get_or_create(session_id).await?;

        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let history = entry.memory.get_history(session_id).await?;
        let response = entry.agent.invoke(&history, query).await?;

        entry
            .memory
            .append_exchange(session_id, query, &response)
            .await?;

        info!(session = session_id, "query handled");
        Ok(response)
    }

    /// The windowed history, optionally capped to the last `limit`
    /// messages. A store failure propagates; it is never disguised as an
    /// empty history.
    pub async fn history(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, Error> {
        let entry = self.registry.get_or_create(session_id).await?;
        let mut messages = entry.memory.get_history(session_id).await?;
        if let Some(limit) = limit {
            if limit > 0 && messages.len() > limit {
                messages = messages.split_off(messages.len() - limit);
            }
        }
        Ok(messages)
    }

    /// The complete durable history, unbounded by the window.
    pub async fn full_history(&self, session_id: &str) -> Result<Vec<Message>, Error> {
        let entry = self.registry.get_or_create(session_id).await?;
        entry.memory.full_history(session_id).await
    }

    /// Delete the session's history and evict its cached agent so the next
    /// query rebuilds from scratch.
    pub async fn clear_history(&self, session_id: &str) -> Result<(), Error> {
        let entry = self.registry.get_or_create(session_id).await?;

        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        entry.memory.clear(session_id).await?;
        self.registry.evict(session_id).await;
        info!(session = session_id, "history cleared");
        Ok(())
    }

    /// Best-effort cleanup when an account is deleted: clear history and
    /// evict the agent. Failures are logged, never surfaced; account
    /// deletion proceeds regardless.
    pub async fn forget_session(&self, session_id: &str) {
        if let Err(e) = self.clear_history(session_id).await {
            warn!(session = session_id, "best-effort history cleanup failed: {e}");
            self.registry.evict(session_id).await;
        }
        let mut locks = self.session_locks.write().await;
        locks.remove(session_id);
    }
}
