pub mod providers;

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::Error;
use crate::prompt::{Segment, Template};
use crate::types::Message;
use crate::weather::{self, OpenWeather};
use providers::{ChatProvider, ToolCall};

/// Maximum tool-use loop iterations to prevent infinite loops.
const MAX_TOOL_ITERATIONS: usize = 10;

/// Result of executing one tool call.
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
}

/// The weather tools exposed to the model. Lookup failures come back as
/// explanatory tool output so the model can tell the user, not as errors.
pub struct WeatherTools {
    client: Arc<OpenWeather>,
}

impl WeatherTools {
    pub fn new(client: Arc<OpenWeather>) -> Self {
        Self { client }
    }

    /// Raw schemas, provider-neutral. Formatted per provider by
    /// `providers::build_tools_for_provider`.
    pub fn schemas() -> Vec<serde_json::Value> {
        vec![
            serde_json::json!({
                "name": "get_current_weather",
                "description": "Get the current weather for a specific city.",
                "input_schema": {
                    "type": "object",
                    "properties": {
                        "city": { "type": "string", "description": "City name" },
                        "country_code": {
                            "type": "string",
                            "description": "Two-letter country code (optional)"
                        }
                    },
                    "required": ["city"]
                }
            }),
            serde_json::json!({
                "name": "get_weather_forecast",
                "description": "Get a 5-day weather forecast for a specific city.",
                "input_schema": {
                    "type": "object",
                    "properties": {
                        "city": { "type": "string", "description": "City name" },
                        "country_code": {
                            "type": "string",
                            "description": "Two-letter country code (optional)"
                        }
                    },
                    "required": ["city"]
                }
            }),
        ]
    }

    pub async fn dispatch(&self, name: &str, input: &serde_json::Value) -> ToolOutcome {
        let city = input.get("city").and_then(|c| c.as_str()).unwrap_or("");
        let country = input.get("country_code").and_then(|c| c.as_str());

        if city.is_empty() {
            return ToolOutcome {
                content: "missing required argument: city".to_string(),
                is_error: true,
            };
        }

        match name {
            "get_current_weather" => self.current_weather(city, country).await,
            "get_weather_forecast" => self.forecast(city, country).await,
            other => ToolOutcome {
                content: format!("unknown tool: {other}"),
                is_error: true,
            },
        }
    }

    async fn current_weather(&self, city: &str, country: Option<&str>) -> ToolOutcome {
        let locations = self.client.get_geolocation(city, country).await;
        let Some(location) = locations.first() else {
            return ToolOutcome {
                content: format!("Could not find location information for {city}"),
                is_error: false,
            };
        };

        match self.client.get_current_weather(location.lat, location.lon).await {
            Some(data) => ToolOutcome {
                content: weather::format_current_weather(&data, city, country),
                is_error: false,
            },
            None => ToolOutcome {
                content: format!("Could not retrieve weather data for {city}"),
                is_error: false,
            },
        }
    }

    async fn forecast(&self, city: &str, country: Option<&str>) -> ToolOutcome {
        let locations = self.client.get_geolocation(city, country).await;
        let Some(location) = locations.first() else {
            return ToolOutcome {
                content: format!("Could not find location information for {city}"),
                is_error: false,
            };
        };

        match self.client.get_forecast(location.lat, location.lon).await {
            Some(data) => ToolOutcome {
                content: weather::format_forecast(&data, city, country),
                is_error: false,
            },
            None => ToolOutcome {
                content: format!("Could not retrieve forecast data for {city}"),
                is_error: false,
            },
        }
    }
}

/// A constructed weather agent: one provider, one repaired template, the
/// weather tools. Stateless per invocation: history comes in as an
/// argument, so a rebuilt agent behaves identically.
pub struct WeatherAgent {
    provider: Arc<dyn ChatProvider>,
    template: Template,
    tools: WeatherTools,
    tool_schemas: Vec<serde_json::Value>,
}

impl WeatherAgent {
    /// Requires a template that already passed the repair pass; an
    /// incomplete one is a construction error, not a runtime surprise.
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        template: Template,
        tools: WeatherTools,
        tool_schemas: Vec<serde_json::Value>,
    ) -> Result<Self, Error> {
        if !template.is_complete() {
            return Err(Error::construction(format!(
                "template '{}' is missing required placeholders",
                template.id
            )));
        }
        Ok(Self {
            provider,
            template,
            tools,
            tool_schemas,
        })
    }

    /// Render the template into a provider message array. The history slot
    /// expands to the windowed history, the user segment gets `{input}`
    /// substituted, and the scratch slot marks where the tool-use
    /// transcript grows during the loop.
    fn render_messages(&self, history: &[Message], input: &str) -> Vec<serde_json::Value> {
        let mut messages = Vec::new();
        for segment in &self.template.segments {
            match segment {
                Segment::System { text } => {
                    messages.push(serde_json::json!({
                        "role": "system",
                        "content": text,
                    }));
                }
                Segment::User { text } => {
                    let content = text.replace("{input}", input).replace("{question}", input);
                    messages.push(serde_json::json!({
                        "role": "user",
                        "content": content,
                    }));
                }
                Segment::HistorySlot => {
                    messages.extend(history.iter().map(Message::as_provider_message));
                }
                // The scratchpad is the tail of the message array; the
                // tool loop appends tool_use/tool_result turns there.
                Segment::ScratchSlot => {}
            }
        }
        messages
    }

    /// Run one agent turn: call the provider, execute any requested tools,
    /// feed results back, repeat until a text answer or the iteration cap.
    pub async fn invoke(&self, history: &[Message], input: &str) -> Result<String, Error> {
        let mut messages = self.render_messages(history, input);

        for iteration in 1..=MAX_TOOL_ITERATIONS {
            let completion = self
                .provider
                .complete(&messages, &self.tool_schemas)
                .await
                .map_err(|e| Error::external(e.to_string()))?;

            if completion.tool_calls.is_empty() {
                return Ok(completion.text);
            }

            info!(
                iteration,
                tools = completion.tool_calls.len(),
                "agent requested tool calls"
            );

            append_tool_turn(&mut messages, &completion.tool_calls, &self.tools).await;
        }

        warn!("tool-use loop exceeded max iterations ({MAX_TOOL_ITERATIONS})");
        Err(Error::external(
            "tool-use loop exceeded max iterations".to_string(),
        ))
    }
}

/// Append the assistant's tool_use turn and a user turn carrying the tool
/// results, keeping each call paired with its result.
async fn append_tool_turn(
    messages: &mut Vec<serde_json::Value>,
    tool_calls: &[ToolCall],
    tools: &WeatherTools,
) {
    let assistant_content: Vec<serde_json::Value> = tool_calls
        .iter()
        .map(|call| {
            serde_json::json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.name,
                "input": call.arguments,
            })
        })
        .collect();
    messages.push(serde_json::json!({
        "role": "assistant",
        "content": assistant_content,
    }));

    let mut result_content = Vec::new();
    for call in tool_calls {
        let outcome = tools.dispatch(&call.name, &call.arguments).await;
        info!(tool = %call.name, is_error = outcome.is_error, "tool call completed");
        result_content.push(serde_json::json!({
            "type": "tool_result",
            "tool_use_id": call.id,
            "content": outcome.content,
            "is_error": outcome.is_error,
        }));
    }
    messages.push(serde_json::json!({
        "role": "user",
        "content": result_content,
    }));
}
