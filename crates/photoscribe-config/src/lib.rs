use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use photoscribe_types::{ConversionSettings, ProviderOptions, RetryPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

/// Backend-specific connection settings. The variant selects the provider
/// implementation; providers are constructed from these, never dispatched
/// by comparing free-form name strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// OpenAI or any OpenAI-compatible chat-completions server.
    Openai {
        /// API key; falls back to `OPENAI_API_KEY` when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
        /// Base URL override for compatible servers.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base_url: Option<String>,
        #[serde(default = "default_openai_model")]
        default_model: String,
        #[serde(default)]
        options: ProviderOptions,
    },
    Anthropic {
        /// API key; falls back to `ANTHROPIC_API_KEY` when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
        #[serde(default = "default_anthropic_model")]
        default_model: String,
        #[serde(default)]
        options: ProviderOptions,
    },
    /// Local Ollama model server.
    Ollama {
        #[serde(default = "default_ollama_url")]
        base_url: String,
        #[serde(default = "default_ollama_model")]
        default_model: String,
        #[serde(default)]
        options: ProviderOptions,
    },
}

impl ProviderConfig {
    pub fn default_model(&self) -> &str {
        match self {
            ProviderConfig::Openai { default_model, .. } => default_model,
            ProviderConfig::Anthropic { default_model, .. } => default_model,
            ProviderConfig::Ollama { default_model, .. } => default_model,
        }
    }

    pub fn options(&self) -> &ProviderOptions {
        match self {
            ProviderConfig::Openai { options, .. } => options,
            ProviderConfig::Anthropic { options, .. } => options,
            ProviderConfig::Ollama { options, .. } => options,
        }
    }
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_ollama_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_ollama_model() -> String {
    "llava".to_string()
}

/// Engine defaults applied when a new workspace is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker pool size. Conservative default to stay under cloud rate
    /// limits; raise for local providers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub conversion: ConversionSettings,
}

fn default_workers() -> usize {
    2
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            timeout_secs: default_timeout_secs(),
            retry: RetryPolicy::default(),
            conversion: ConversionSettings::default(),
        }
    }
}

/// Top-level photoscribe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoscribeConfig {
    /// Named provider configurations.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    /// Provider used when the CLI does not name one.
    #[serde(default = "default_provider_name")]
    pub default_provider: String,
    #[serde(default)]
    pub engine: EngineConfig,
    /// Named prompt styles.
    #[serde(default)]
    pub prompts: HashMap<String, String>,
    /// Opt-in geocode cache file shared across jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geocode_cache: Option<PathBuf>,
}

fn default_provider_name() -> String {
    "ollama".to_string()
}

pub const DEFAULT_PROMPT: &str = "Describe this image in detail.";

impl Default for PhotoscribeConfig {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert(
            "openai".to_string(),
            ProviderConfig::Openai {
                api_key: None,
                base_url: None,
                default_model: default_openai_model(),
                options: ProviderOptions::default(),
            },
        );
        providers.insert(
            "anthropic".to_string(),
            ProviderConfig::Anthropic {
                api_key: None,
                default_model: default_anthropic_model(),
                options: ProviderOptions::default(),
            },
        );
        providers.insert(
            "ollama".to_string(),
            ProviderConfig::Ollama {
                base_url: default_ollama_url(),
                default_model: default_ollama_model(),
                options: ProviderOptions::default(),
            },
        );

        let mut prompts = HashMap::new();
        prompts.insert("detailed".to_string(), DEFAULT_PROMPT.to_string());
        prompts.insert(
            "brief".to_string(),
            "Describe this image in one short sentence.".to_string(),
        );

        Self {
            providers,
            default_provider: default_provider_name(),
            engine: EngineConfig::default(),
            prompts,
            geocode_cache: None,
        }
    }
}

impl PhotoscribeConfig {
    /// Resolve a prompt style name to its text, falling back to the
    /// built-in detailed prompt.
    pub fn prompt_for(&self, style: &str) -> String {
        self.prompts
            .get(style)
            .cloned()
            .unwrap_or_else(|| DEFAULT_PROMPT.to_string())
    }
}

/// Resolve the photoscribe config directory (~/.photoscribe/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".photoscribe"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.photoscribe/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, falling back to defaults.
pub fn load_config() -> Result<PhotoscribeConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<PhotoscribeConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(PhotoscribeConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: PhotoscribeConfig = json5::from_str(&content)?;
    Ok(config)
}

/// Ensure the config directory exists.
pub fn ensure_config_dir() -> Result<PathBuf, ConfigError> {
    let dir = config_dir()?;
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

/// Save configuration to the default path.
pub fn save_config(config: &PhotoscribeConfig) -> Result<(), ConfigError> {
    let dir = ensure_config_dir()?;
    let path = dir.join("config.json5");
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| ConfigError::Io(std::io::Error::other(e)))?;
    std::fs::write(path, content)?;
    Ok(())
}
