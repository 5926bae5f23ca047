use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Error;
use crate::types::{Message, Role};

/// Durable conversation log, partitioned by session identity.
///
/// Messages for one session are totally ordered by insertion and never
/// edited or reordered. A session comes into existence on its first append
/// and only `clear` removes messages.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append(&self, session_id: &str, role: Role, content: &str) -> Result<(), Error>;

    /// Full ordered history for a session. Empty if the session has no
    /// messages; errors only when the backing store itself fails.
    async fn list(&self, session_id: &str) -> Result<Vec<Message>, Error>;

    /// Delete all messages for a session. Idempotent.
    async fn clear(&self, session_id: &str) -> Result<(), Error>;
}

/// In-memory conversation store. A database-backed implementation slots in
/// behind the same trait without touching the rest of the core.
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, Vec<Message>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Number of sessions with at least one message.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn append(&self, session_id: &str, role: Role, content: &str) -> Result<(), Error> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_default()
            .push(Message::new(role, content));
        Ok(())
    }

    async fn list(&self, session_id: &str) -> Result<Vec<Message>, Error> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).cloned().unwrap_or_default())
    }

    async fn clear(&self, session_id: &str) -> Result<(), Error> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id);
        Ok(())
    }
}
