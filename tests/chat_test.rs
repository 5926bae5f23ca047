use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nimbus::agent::providers::{ChatProvider, Completion, ProviderFactory, ToolCall};
use nimbus::chat::ChatService;
use nimbus::config::{AgentConfig, WeatherConfig};
use nimbus::error::Error;
use nimbus::prompt::{NullTemplateRegistry, PromptCache};
use nimbus::registry::AgentRegistry;
use nimbus::store::{ConversationStore, MemoryStore};
use nimbus::types::Role;
use nimbus::users::UserStore;

/// One scripted provider turn.
enum Step {
    Text(String),
    Tool { name: String, arguments: serde_json::Value },
    Fail(String),
}

/// Provider stub driven by a script, recording every message array it was
/// called with.
struct ScriptedProvider {
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Vec<serde_json::Value>>>,
}

impl ScriptedProvider {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn recorded_calls(&self) -> Vec<Vec<serde_json::Value>> {
        self.calls.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn complete(
        &self,
        messages: &[serde_json::Value],
        _tools: &[serde_json::Value],
    ) -> anyhow::Result<Completion> {
        self.calls.lock().expect("lock").push(messages.to_vec());
        let step = self.script.lock().expect("lock").pop_front();
        match step {
            Some(Step::Text(text)) => Ok(Completion {
                text,
                tool_calls: Vec::new(),
            }),
            Some(Step::Tool { name, arguments }) => Ok(Completion {
                text: String::new(),
                tool_calls: vec![ToolCall {
                    id: "call_1".to_string(),
                    name,
                    arguments,
                }],
            }),
            Some(Step::Fail(msg)) => anyhow::bail!(msg),
            None => Ok(Completion {
                text: "fallback".to_string(),
                tool_calls: Vec::new(),
            }),
        }
    }
}

struct ScriptedFactory(Arc<ScriptedProvider>);

impl ProviderFactory for ScriptedFactory {
    fn build(&self) -> anyhow::Result<Arc<dyn ChatProvider>> {
        Ok(Arc::clone(&self.0) as Arc<dyn ChatProvider>)
    }
}

/// Weather endpoints nothing listens on; tool calls degrade to "could not
/// find" output without touching the network.
fn offline_weather() -> WeatherConfig {
    WeatherConfig {
        api_key: None,
        geo_url: "http://127.0.0.1:9/geo".to_string(),
        weather_url: "http://127.0.0.1:9/weather".to_string(),
        forecast_url: "http://127.0.0.1:9/forecast".to_string(),
    }
}

fn chat_with(provider: Arc<ScriptedProvider>) -> (ChatService, Arc<MemoryStore>) {
    let prompts = Arc::new(PromptCache::new(Arc::new(NullTemplateRegistry)));
    let store = Arc::new(MemoryStore::new());
    let weather = Arc::new(nimbus::weather::OpenWeather::new(&offline_weather()));
    let registry = Arc::new(AgentRegistry::new(
        prompts,
        store.clone(),
        weather,
        Arc::new(ScriptedFactory(provider)),
        AgentConfig::default(),
        4,
    ));
    (ChatService::new(registry), store)
}

#[tokio::test]
async fn blank_query_rejected_before_any_side_effect() {
    let provider = ScriptedProvider::new(vec![]);
    let (chat, store) = chat_with(provider.clone());

    for query in ["", "   ", "\n\t"] {
        let err = chat.handle_query("alice", query).await.expect_err("reject");
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    // No agent constructed, no provider called, nothing stored
    assert_eq!(chat.registry().entry_count().await, 0);
    assert!(provider.recorded_calls().is_empty());
    assert!(store.list("alice").await.expect("list").is_empty());
}

#[tokio::test]
async fn successful_query_appends_one_exchange() {
    let provider =
        ScriptedProvider::new(vec![Step::Text("Sunny, 21°C in London".to_string())]);
    let (chat, store) = chat_with(provider);

    let answer = chat
        .handle_query("alice", "What's the weather in London?")
        .await
        .expect("query");
    assert_eq!(answer, "Sunny, 21°C in London");

    let messages = store.list("alice").await.expect("list");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::Human);
    assert_eq!(messages[0].content, "What's the weather in London?");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "Sunny, 21°C in London");
}

#[tokio::test]
async fn provider_failure_appends_nothing() {
    let provider = ScriptedProvider::new(vec![Step::Fail("upstream 500".to_string())]);
    let (chat, store) = chat_with(provider);

    let err = chat
        .handle_query("alice", "weather in Oslo?")
        .await
        .expect_err("must fail");
    assert!(matches!(err, Error::ExternalCall(_)));
    assert!(store.list("alice").await.expect("list").is_empty());
}

#[tokio::test]
async fn empty_agent_answer_is_still_appended() {
    let provider = ScriptedProvider::new(vec![Step::Text(String::new())]);
    let (chat, store) = chat_with(provider);

    let answer = chat.handle_query("alice", "hello?").await.expect("query");
    assert!(answer.is_empty());

    let messages = store.list("alice").await.expect("list");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "");
}

#[tokio::test]
async fn history_window_feeds_the_agent() {
    let provider = ScriptedProvider::new(vec![
        Step::Text("first".to_string()),
        Step::Text("second".to_string()),
    ]);
    let (chat, _store) = chat_with(provider.clone());

    chat.handle_query("alice", "q1").await.expect("query");
    chat.handle_query("alice", "q2").await.expect("query");

    let calls = provider.recorded_calls();
    assert_eq!(calls.len(), 2);

    // Second call sees the first exchange in its rendered history
    let rendered = serde_json::to_string(&calls[1]).expect("json");
    assert!(rendered.contains("q1"));
    assert!(rendered.contains("first"));
}

#[tokio::test]
async fn tool_loop_feeds_results_back_to_provider() {
    let provider = ScriptedProvider::new(vec![
        Step::Tool {
            name: "get_current_weather".to_string(),
            arguments: serde_json::json!({ "city": "London" }),
        },
        Step::Text("I couldn't find London in the weather data.".to_string()),
    ]);
    let (chat, store) = chat_with(provider.clone());

    let answer = chat
        .handle_query("alice", "weather in London?")
        .await
        .expect("query");
    assert_eq!(answer, "I couldn't find London in the weather data.");

    let calls = provider.recorded_calls();
    assert_eq!(calls.len(), 2);

    // Second provider call carries the tool_use turn and its paired result
    let rendered = serde_json::to_string(&calls[1]).expect("json");
    assert!(rendered.contains("tool_use"));
    assert!(rendered.contains("tool_result"));
    assert!(rendered.contains("Could not find location information for London"));

    // Only the final user-visible exchange lands in history
    let messages = store.list("alice").await.expect("list");
    assert_eq!(messages.len(), 2);
}

#[tokio::test]
async fn history_limit_caps_returned_messages() {
    let provider = ScriptedProvider::new(vec![
        Step::Text("a1".to_string()),
        Step::Text("a2".to_string()),
        Step::Text("a3".to_string()),
    ]);
    let (chat, _store) = chat_with(provider);

    for i in 1..=3 {
        chat.handle_query("alice", &format!("q{i}")).await.expect("query");
    }

    let capped = chat.history("alice", Some(2)).await.expect("history");
    assert_eq!(capped.len(), 2);
    assert_eq!(capped[0].content, "q3");
    assert_eq!(capped[1].content, "a3");

    let uncapped = chat.history("alice", None).await.expect("history");
    assert_eq!(uncapped.len(), 6);
}

#[tokio::test]
async fn clear_history_evicts_cached_agent() {
    let provider = ScriptedProvider::new(vec![Step::Text("hi".to_string())]);
    let (chat, store) = chat_with(provider);

    chat.handle_query("alice", "hello").await.expect("query");
    assert_eq!(chat.registry().entry_count().await, 1);

    chat.clear_history("alice").await.expect("clear");
    assert!(store.list("alice").await.expect("list").is_empty());
    assert_eq!(chat.registry().entry_count().await, 0);
}

#[tokio::test]
async fn end_to_end_register_chat_clear() {
    let users = UserStore::new();
    assert!(users.register("carol", "pw123").await);
    assert!(users.authenticate("carol", "pw123").await);

    let provider = ScriptedProvider::new(vec![
        Step::Text("Rainy, take an umbrella.".to_string()),
        Step::Text("Still rainy.".to_string()),
    ]);
    let (chat, _store) = chat_with(provider);

    let answer = chat
        .handle_query("carol", "What's the weather in London?")
        .await
        .expect("query");
    assert!(!answer.is_empty());

    let history = chat.history("carol", None).await.expect("history");
    assert_eq!(history.len(), 2);

    chat.clear_history("carol").await.expect("clear");
    assert!(chat.history("carol", None).await.expect("history").is_empty());

    // Next query rebuilds the agent and starts a fresh exchange
    chat.handle_query("carol", "and tomorrow?").await.expect("query");
    assert_eq!(chat.registry().entry_count().await, 1);
    assert_eq!(chat.history("carol", None).await.expect("history").len(), 2);
}

#[tokio::test]
async fn forget_session_is_best_effort() {
    let provider = ScriptedProvider::new(vec![Step::Text("hello".to_string())]);
    let (chat, store) = chat_with(provider);

    chat.handle_query("dave", "hi").await.expect("query");
    chat.forget_session("dave").await;

    assert!(store.list("dave").await.expect("list").is_empty());
    assert_eq!(chat.registry().entry_count().await, 0);

    // Forgetting an unknown session never panics or errors
    chat.forget_session("nobody").await;
}
