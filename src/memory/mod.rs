use std::sync::Arc;

use crate::error::Error;
use crate::store::ConversationStore;
use crate::types::{Message, Role};

/// Bounded view over a session's durable conversation log.
///
/// The window surfaces only the most recent `k` exchanges (2k messages) to
/// the agent; the underlying store keeps everything. Changing the window
/// size never loses history, and a full-log read stays available for
/// callers that want more than the agent's context window.
#[derive(Clone)]
pub struct WindowedMemory {
    store: Arc<dyn ConversationStore>,
    /// Number of trailing exchanges visible to the agent. One exchange is a
    /// human+assistant pair, so the window holds up to `k * 2` messages.
    k: usize,
}

/// Default window size in exchanges.
pub const DEFAULT_WINDOW: usize = 4;

impl WindowedMemory {
    pub fn new(store: Arc<dyn ConversationStore>, k: usize) -> Self {
        Self { store, k }
    }

    pub fn window_size(&self) -> usize {
        self.k
    }

    /// The last `min(n, 2k)` stored messages, oldest first. Side-effect
    /// free; a store failure propagates rather than masquerading as an
    /// empty history.
    pub async fn get_history(&self, session_id: &str) -> Result<Vec<Message>, Error> {
        let messages = self.store.list(session_id).await?;
        let max = self.k * 2;
        if messages.len() > max {
            Ok(messages[messages.len() - max..].to_vec())
        } else {
            Ok(messages)
        }
    }

    /// The complete durable history, unbounded by the window.
    pub async fn full_history(&self, session_id: &str) -> Result<Vec<Message>, Error> {
        self.store.list(session_id).await
    }

    /// Append one exchange: the human message, then the assistant message.
    /// Never truncates the store; the window only affects reads.
    pub async fn append_exchange(
        &self,
        session_id: &str,
        user_text: &str,
        assistant_text: &str,
    ) -> Result<(), Error> {
        self.store.append(session_id, Role::Human, user_text).await?;
        self.store
            .append(session_id, Role::Assistant, assistant_text)
            .await
    }

    /// Delete all messages for the session. Clearing an empty history is a
    /// successful no-op.
    pub async fn clear(&self, session_id: &str) -> Result<(), Error> {
        self.store.clear(session_id).await
    }
}
