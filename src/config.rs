use serde::Deserialize;
use std::path::PathBuf;
use tracing::info;

use crate::memory::DEFAULT_WINDOW;

/// Top-level configuration loaded from TOML.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct NimbusConfig {
    pub gateway: GatewayConfig,
    pub agent: AgentConfig,
    pub memory: MemoryConfig,
    pub weather: WeatherConfig,
    pub prompts: PromptConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

fn default_port() -> u16 {
    8000
}
fn default_bind() -> String {
    "127.0.0.1".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_template_id")]
    pub template_id: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            max_tokens: default_max_tokens(),
            template_id: default_template_id(),
        }
    }
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_template_id() -> String {
    "weather_agent".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    /// Window size in exchanges; the agent sees the last `window * 2`
    /// messages. Full history stays in the store regardless.
    #[serde(default = "default_window")]
    pub window: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
        }
    }
}

fn default_window() -> usize {
    DEFAULT_WINDOW
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherConfig {
    pub api_key: Option<String>,
    #[serde(default = "default_geo_url")]
    pub geo_url: String,
    #[serde(default = "default_weather_url")]
    pub weather_url: String,
    #[serde(default = "default_forecast_url")]
    pub forecast_url: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            geo_url: default_geo_url(),
            weather_url: default_weather_url(),
            forecast_url: default_forecast_url(),
        }
    }
}

fn default_geo_url() -> String {
    "https://api.openweathermap.org/geo/1.0/direct".into()
}
fn default_weather_url() -> String {
    "https://api.openweathermap.org/data/2.5/weather".into()
}
fn default_forecast_url() -> String {
    "https://api.openweathermap.org/data/2.5/forecast".into()
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Upstream template registry base URL. Without one, every pull fails
    /// and the built-in default template is used instead.
    pub registry_url: Option<String>,
}

/// Load configuration from file or use defaults.
///
/// Search order:
/// 1. `NIMBUS_CONFIG` env var
/// 2. `~/.nimbus/config.toml`
/// 3. Zero-config defaults (no file needed)
pub fn load() -> anyhow::Result<NimbusConfig> {
    let path = config_path();

    if path.exists() {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let mut config: NimbusConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid config at {}: {e}", path.display()))?;

        resolve_api_keys(&mut config);
        validate(&config)?;

        info!("loaded config from {}", path.display());
        Ok(config)
    } else {
        info!("no config file found, using zero-config defaults");
        let mut config = NimbusConfig::default();
        resolve_api_keys(&mut config);
        Ok(config)
    }
}

fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("NIMBUS_CONFIG") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".nimbus").join("config.toml")
}

/// Resolve API keys from environment variables if not set in config.
fn resolve_api_keys(config: &mut NimbusConfig) {
    if config.agent.api_key.is_none() {
        config.agent.api_key = match config.agent.provider.as_str() {
            "anthropic" => std::env::var("ANTHROPIC_API_KEY").ok(),
            "openai" => std::env::var("OPENAI_API_KEY").ok(),
            _ => None,
        };
    }
    if config.weather.api_key.is_none() {
        config.weather.api_key = std::env::var("OPENWEATHER_API_KEY").ok();
    }
}

/// Validate the config and return clear error messages.
pub fn validate(config: &NimbusConfig) -> anyhow::Result<()> {
    let valid_providers = ["anthropic", "openai"];
    if !valid_providers.contains(&config.agent.provider.as_str()) {
        anyhow::bail!(
            "invalid provider '{}': must be one of {:?}",
            config.agent.provider,
            valid_providers
        );
    }

    if config.agent.max_tokens == 0 {
        anyhow::bail!("agent.max_tokens must be > 0");
    }

    if config.memory.window == 0 {
        anyhow::bail!("memory.window must be > 0");
    }

    Ok(())
}
