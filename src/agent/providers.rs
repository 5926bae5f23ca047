use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;

use crate::config::AgentConfig;

/// A tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One completed model turn: accumulated text plus any tool calls the model
/// wants executed before it can answer.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Trait for chat-completion provider implementations. The gateway returns
/// whole responses, so providers run non-streaming requests.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[serde_json::Value],
        tools: &[serde_json::Value],
    ) -> anyhow::Result<Completion>;
}

/// Builds the provider an agent will use. Implemented by `AgentConfig` for
/// the real providers; tests plug in stub factories.
pub trait ProviderFactory: Send + Sync {
    fn build(&self) -> anyhow::Result<Arc<dyn ChatProvider>>;
}

impl ProviderFactory for AgentConfig {
    fn build(&self) -> anyhow::Result<Arc<dyn ChatProvider>> {
        let api_key = self.api_key.clone().ok_or_else(|| {
            anyhow::anyhow!(
                "no API key for provider '{}'. Set {} env var.",
                self.provider,
                match self.provider.as_str() {
                    "anthropic" => "ANTHROPIC_API_KEY",
                    "openai" => "OPENAI_API_KEY",
                    _ => "the appropriate API key",
                }
            )
        })?;

        match self.provider.as_str() {
            "anthropic" => Ok(Arc::new(AnthropicProvider::new(
                api_key,
                self.model.clone(),
                self.max_tokens,
            ))),
            "openai" => Ok(Arc::new(OpenAiProvider::new(
                api_key,
                self.model.clone(),
                self.max_tokens,
            ))),
            other => anyhow::bail!("unknown provider: {other}"),
        }
    }
}

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String, max_tokens: u32) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            max_tokens,
        }
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    async fn complete(
        &self,
        messages: &[serde_json::Value],
        tools: &[serde_json::Value],
    ) -> anyhow::Result<Completion> {
        // Anthropic takes the system prompt out of band; pull leading
        // system messages into the top-level field.
        let mut system_parts: Vec<String> = Vec::new();
        let mut chat_messages: Vec<serde_json::Value> = Vec::new();
        for message in messages {
            let role = message.get("role").and_then(|r| r.as_str());
            if role == Some("system") && chat_messages.is_empty() {
                if let Some(text) = message.get("content").and_then(|c| c.as_str()) {
                    system_parts.push(text.to_string());
                }
            } else {
                chat_messages.push(message.clone());
            }
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": chat_messages,
        });
        if !system_parts.is_empty() {
            body["system"] = serde_json::json!(system_parts.join("\n\n"));
        }
        if !tools.is_empty() {
            body["tools"] = serde_json::json!(tools);
        }

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("{status}: {text}");
        }

        let parsed: serde_json::Value = response.json().await?;
        let mut completion = Completion::default();

        if let Some(blocks) = parsed.get("content").and_then(|c| c.as_array()) {
            for block in blocks {
                match block.get("type").and_then(|t| t.as_str()) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                            completion.text.push_str(text);
                        }
                    }
                    Some("tool_use") => {
                        completion.tool_calls.push(ToolCall {
                            id: block
                                .get("id")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            name: block
                                .get("name")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            arguments: block
                                .get("input")
                                .cloned()
                                .unwrap_or_else(|| serde_json::json!({})),
                        });
                    }
                    _ => {}
                }
            }
        }

        Ok(completion)
    }
}

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String, max_tokens: u32) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            max_tokens,
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    async fn complete(
        &self,
        messages: &[serde_json::Value],
        tools: &[serde_json::Value],
    ) -> anyhow::Result<Completion> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::json!(tools);
        }

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("{status}: {text}");
        }

        let parsed: serde_json::Value = response.json().await?;
        let mut completion = Completion::default();

        let message = parsed
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.get("message"));

        if let Some(message) = message {
            if let Some(text) = message.get("content").and_then(|c| c.as_str()) {
                completion.text.push_str(text);
            }
            if let Some(calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
                for call in calls {
                    let function = call.get("function");
                    let arguments = function
                        .and_then(|f| f.get("arguments"))
                        .and_then(|a| a.as_str())
                        .and_then(|a| serde_json::from_str(a).ok())
                        .unwrap_or_else(|| serde_json::json!({}));
                    completion.tool_calls.push(ToolCall {
                        id: call
                            .get("id")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        name: function
                            .and_then(|f| f.get("name"))
                            .and_then(|n| n.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        arguments,
                    });
                }
            }
        }

        Ok(completion)
    }
}

/// Tool schemas in Anthropic's format.
///
/// ```json
/// { "name": "get_current_weather", "description": "...", "input_schema": { ... } }
/// ```
pub fn build_anthropic_tools(schemas: &[serde_json::Value]) -> Vec<serde_json::Value> {
    schemas
        .iter()
        .map(|schema| {
            serde_json::json!({
                "name": schema.get("name").and_then(|n| n.as_str()).unwrap_or("unknown"),
                "description": schema.get("description").and_then(|d| d.as_str()).unwrap_or(""),
                "input_schema": schema.get("input_schema").cloned()
                    .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
            })
        })
        .collect()
}

/// Tool schemas in OpenAI's function-calling format.
///
/// ```json
/// { "type": "function", "function": { "name": "...", "parameters": { ... } } }
/// ```
pub fn build_openai_tools(schemas: &[serde_json::Value]) -> Vec<serde_json::Value> {
    schemas
        .iter()
        .map(|schema| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": schema.get("name").and_then(|n| n.as_str()).unwrap_or("unknown"),
                    "description": schema.get("description").and_then(|d| d.as_str()).unwrap_or(""),
                    "parameters": schema.get("input_schema").cloned()
                        .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
                }
            })
        })
        .collect()
}

/// Pick the right schema format for a provider name.
pub fn build_tools_for_provider(
    provider: &str,
    schemas: &[serde_json::Value],
) -> Vec<serde_json::Value> {
    match provider {
        "openai" => build_openai_tools(schemas),
        _ => build_anthropic_tools(schemas),
    }
}
