use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::agent::providers::{build_tools_for_provider, ProviderFactory};
use crate::agent::{WeatherAgent, WeatherTools};
use crate::config::AgentConfig;
use crate::error::Error;
use crate::memory::WindowedMemory;
use crate::prompt::{self, PromptCache};
use crate::store::ConversationStore;
use crate::weather::OpenWeather;

/// A cached (agent, memory) pair for one session identity.
pub struct SessionEntry {
    pub agent: WeatherAgent,
    pub memory: WindowedMemory,
}

impl std::fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEntry").finish_non_exhaustive()
    }
}

/// Process-wide cache of constructed agents, one entry per session
/// identity. Purely a performance cache: everything in it can be rebuilt
/// from the conversation store and the prompt cache, so eviction is always
/// safe.
pub struct AgentRegistry {
    prompts: Arc<PromptCache>,
    store: Arc<dyn ConversationStore>,
    weather: Arc<OpenWeather>,
    providers: Arc<dyn ProviderFactory>,
    agent_config: AgentConfig,
    window: usize,
    sessions: RwLock<HashMap<String, Arc<SessionEntry>>>,
}

impl AgentRegistry {
    pub fn new(
        prompts: Arc<PromptCache>,
        store: Arc<dyn ConversationStore>,
        weather: Arc<OpenWeather>,
        providers: Arc<dyn ProviderFactory>,
        agent_config: AgentConfig,
        window: usize,
    ) -> Self {
        Self {
            prompts,
            store,
            weather,
            providers,
            agent_config,
            window,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached entry for a session, constructing one atomically
    /// if absent. Two concurrent callers for a new session get the same
    /// entry: the construction happens under the write lock, and a
    /// late-arriving racer finds the winner's entry on its re-check.
    /// Construction failure caches nothing.
    pub async fn get_or_create(&self, session_id: &str) -> Result<Arc<SessionEntry>, Error> {
        {
            let sessions = self.sessions.read().await;
            if let Some(entry) = sessions.get(session_id) {
                return Ok(Arc::clone(entry));
            }
        }

        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get(session_id) {
            // Lost the construction race; reuse the winner's entry.
            return Ok(Arc::clone(entry));
        }

        let entry = Arc::new(self.construct(session_id).await?);
        sessions.insert(session_id.to_string(), Arc::clone(&entry));
        Ok(entry)
    }

    /// Drop the cached entry so the next `get_or_create` rebuilds from
    /// scratch, picking up any prompt cache updates. No-op if absent.
    pub async fn evict(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(session_id).is_some() {
            debug!(session = session_id, "evicted agent session");
        }
    }

    pub async fn entry_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn construct(&self, session_id: &str) -> Result<SessionEntry, Error> {
        let template = match self.prompts.get(&self.agent_config.template_id).await {
            Some(template) => template,
            None => {
                debug!(
                    template = %self.agent_config.template_id,
                    "template not cached, using built-in default"
                );
                prompt::create_default(&self.agent_config.template_id)
            }
        };

        let provider = self
            .providers
            .build()
            .map_err(|e| Error::construction(e.to_string()))?;

        let tool_schemas =
            build_tools_for_provider(&self.agent_config.provider, &WeatherTools::schemas());
        let tools = WeatherTools::new(Arc::clone(&self.weather));

        let agent = WeatherAgent::new(provider, template, tools, tool_schemas)?;
        let memory = WindowedMemory::new(Arc::clone(&self.store), self.window);

        info!(session = session_id, "constructed agent session");
        Ok(SessionEntry { agent, memory })
    }
}
