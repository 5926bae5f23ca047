use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info};

/// Template IDs the cache pulls at startup.
pub const TEMPLATE_IDS: &[&str] = &["weather_agent"];

/// Placeholder token replaced with the current date on every `get`.
pub const TODAY_DATE_TOKEN: &str = "{TODAY_DATE}";

/// One segment of a chat template, in render order.
///
/// Fixed-text segments carry literal instruction content; slot segments
/// expand at invocation time into the conversation history, the user's
/// input turn, or the agent's tool-use scratchpad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    System { text: String },
    User { text: String },
    HistorySlot,
    ScratchSlot,
}

/// A chat-style prompt template: an ordered list of segments plus the
/// variable names the template declares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub segments: Vec<Segment>,
    pub input_variables: Vec<String>,
}

impl Template {
    /// True when the template holds exactly one history slot and one
    /// scratch slot, the history slot precedes the first user segment, and
    /// the scratch slot is last. This is what agent construction requires.
    pub fn is_complete(&self) -> bool {
        let history_count = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::HistorySlot))
            .count();
        let scratch_count = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::ScratchSlot))
            .count();
        if history_count != 1 || scratch_count != 1 {
            return false;
        }

        let history_pos = self
            .segments
            .iter()
            .position(|s| matches!(s, Segment::HistorySlot));
        let first_user_pos = self
            .segments
            .iter()
            .position(|s| matches!(s, Segment::User { .. }));
        if let (Some(h), Some(u)) = (history_pos, first_user_pos) {
            if h > u {
                return false;
            }
        }

        matches!(self.segments.last(), Some(Segment::ScratchSlot))
    }
}

/// Substitute the literal date token in fixed-text segments with `today`
/// rendered as a full weekday/month/day/year string.
pub fn substitute_date(template: &Template, today: &str) -> Template {
    let segments = template
        .segments
        .iter()
        .map(|segment| match segment {
            Segment::System { text } => Segment::System {
                text: text.replace(TODAY_DATE_TOKEN, today),
            },
            Segment::User { text } => Segment::User {
                text: text.replace(TODAY_DATE_TOKEN, today),
            },
            other => other.clone(),
        })
        .collect();
    Template {
        id: template.id.clone(),
        segments,
        input_variables: template.input_variables.clone(),
    }
}

/// Repair a template so it satisfies the completeness invariant:
///
/// - a missing history slot is inserted immediately before the first user
///   segment (appended when there is no user segment);
/// - a missing scratch slot is appended at the end;
/// - `chat_history` / `agent_scratchpad` are added to the declared
///   variables, and a template declaring `question` also accepts `input`.
///
/// Returns a new template; the input is untouched.
pub fn repair(template: &Template) -> Template {
    let mut segments = template.segments.clone();

    let has_history = segments.iter().any(|s| matches!(s, Segment::HistorySlot));
    if !has_history {
        match segments.iter().position(|s| matches!(s, Segment::User { .. })) {
            Some(pos) => segments.insert(pos, Segment::HistorySlot),
            None => segments.push(Segment::HistorySlot),
        }
    }

    let has_scratch = segments.iter().any(|s| matches!(s, Segment::ScratchSlot));
    if !has_scratch {
        segments.push(Segment::ScratchSlot);
    }

    let mut input_variables = template.input_variables.clone();
    for required in ["chat_history", "agent_scratchpad"] {
        if !input_variables.iter().any(|v| v == required) {
            input_variables.push(required.to_string());
        }
    }
    if input_variables.iter().any(|v| v == "question")
        && !input_variables.iter().any(|v| v == "input")
    {
        input_variables.push("input".to_string());
    }

    Template {
        id: template.id.clone(),
        segments,
        input_variables,
    }
}

/// The hardcoded fallback weather template. Guaranteed complete.
pub fn create_default(template_id: &str) -> Template {
    let system = format!(
        "Hey there! You're a friendly and helpful weather assistant with access \
         to real-time weather data.\n\n\
         Today is {TODAY_DATE_TOKEN}.\n\n\
         Your job is simple: help users with their weather-related questions \
         using accurate, up-to-date data.\n\n\
         How you can help:\n\
         - If the user asks about today's weather, use `get_current_weather`.\n\
         - If they ask about the forecast (tomorrow, next week, specific dates), \
         use `get_weather_forecast`.\n\
         - If the request isn't clear, ask for more details in a friendly way.\n\
         - Respond in markdown format and use emojis to keep it engaging.\n\
         - Match the user's language and tone.\n\
         - If the city isn't in the database, kindly let them know.\n\n\
         Things you shouldn't do:\n\
         - Never make up weather information.\n\
         - Stay focused on weather-related questions only."
    );

    Template {
        id: template_id.to_string(),
        segments: vec![
            Segment::System { text: system },
            Segment::HistorySlot,
            Segment::User {
                text: "{input}".to_string(),
            },
            Segment::ScratchSlot,
        ],
        input_variables: vec![
            "input".to_string(),
            "chat_history".to_string(),
            "agent_scratchpad".to_string(),
        ],
    }
}

/// Upstream source of templates, keyed by ID.
#[async_trait]
pub trait TemplateRegistry: Send + Sync {
    async fn pull(&self, template_id: &str) -> anyhow::Result<Template>;
}

/// Pulls templates over HTTP from a registry serving JSON `Template`
/// documents at `{base_url}/{template_id}`.
pub struct HttpTemplateRegistry {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTemplateRegistry {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl TemplateRegistry for HttpTemplateRegistry {
    async fn pull(&self, template_id: &str) -> anyhow::Result<Template> {
        let url = format!("{}/{template_id}", self.base_url.trim_end_matches('/'));
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("registry returned {} for {url}", response.status());
        }
        Ok(response.json::<Template>().await?)
    }
}

/// A registry with nothing in it. Used when no registry URL is configured;
/// every pull fails, so the cache records null entries and callers fall
/// back to the default template.
pub struct NullTemplateRegistry;

#[async_trait]
impl TemplateRegistry for NullTemplateRegistry {
    async fn pull(&self, template_id: &str) -> anyhow::Result<Template> {
        anyhow::bail!("no template registry configured (wanted '{template_id}')")
    }
}

/// Descriptive metadata for one cached template, for the listing endpoint.
#[derive(Debug, Serialize)]
pub struct TemplateInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub input_variables: Vec<String>,
    pub segments: Vec<Segment>,
}

/// Process-wide template cache. Populated once at startup, then mutated
/// only by explicit `update` / `update_all` calls. Constructed explicitly
/// and passed where needed so tests can substitute a fake registry.
pub struct PromptCache {
    registry: Arc<dyn TemplateRegistry>,
    prompts: RwLock<HashMap<String, Option<Template>>>,
}

impl PromptCache {
    pub fn new(registry: Arc<dyn TemplateRegistry>) -> Self {
        Self {
            registry,
            prompts: RwLock::new(HashMap::new()),
        }
    }

    /// Pull every known template. A failed pull records a null entry and
    /// logs; it never propagates.
    pub async fn initialize(&self) {
        info!("initializing prompt cache");
        let mut prompts = self.prompts.write().await;
        for &template_id in TEMPLATE_IDS {
            match self.registry.pull(template_id).await {
                Ok(template) => {
                    info!(template = template_id, "cached prompt template");
                    prompts.insert(template_id.to_string(), Some(template));
                }
                Err(e) => {
                    error!(template = template_id, "failed to pull template: {e}");
                    prompts.insert(template_id.to_string(), None);
                }
            }
        }
    }

    /// Return the cached template after the repair pass: current-date
    /// substitution, placeholder synthesis, and the `question` → `input`
    /// variable alias. The cached original stays as pulled.
    pub async fn get(&self, template_id: &str) -> Option<Template> {
        let prompts = self.prompts.read().await;
        let template = prompts.get(template_id)?.as_ref()?;

        let today = chrono::Local::now().format("%A, %B %d, %Y").to_string();
        Some(repair(&substitute_date(template, &today)))
    }

    /// Metadata for every known template ID, including failed pulls.
    pub async fn get_all(&self) -> HashMap<String, TemplateInfo> {
        let prompts = self.prompts.read().await;
        prompts
            .iter()
            .map(|(id, entry)| {
                let info = match entry {
                    Some(template) => TemplateInfo {
                        kind: "chat".to_string(),
                        input_variables: template.input_variables.clone(),
                        segments: template.segments.clone(),
                    },
                    None => TemplateInfo {
                        kind: "none".to_string(),
                        input_variables: Vec::new(),
                        segments: Vec::new(),
                    },
                };
                (id.clone(), info)
            })
            .collect()
    }

    pub async fn template_ids(&self) -> Vec<String> {
        self.prompts.read().await.keys().cloned().collect()
    }

    /// Re-pull one template. On failure the previous cached value stays
    /// intact and this returns false.
    pub async fn update(&self, template_id: &str) -> bool {
        match self.registry.pull(template_id).await {
            Ok(template) => {
                let mut prompts = self.prompts.write().await;
                prompts.insert(template_id.to_string(), Some(template));
                info!(template = template_id, "updated cached template");
                true
            }
            Err(e) => {
                error!(template = template_id, "failed to update template: {e}");
                false
            }
        }
    }

    /// Re-pull every known template independently; partial failure is
    /// expected and reported per ID.
    pub async fn update_all(&self) -> HashMap<String, bool> {
        let ids = self.template_ids().await;
        let mut results = HashMap::new();
        for id in ids {
            let ok = self.update(&id).await;
            results.insert(id, ok);
        }
        results
    }
}
