//! Configuration system (layered: code > env > config file).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::provider::ChatCompletionsClient;
use crate::session::SessionConfig;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Layered configuration for parley.
///
/// Every field is optional so layers can be overlaid; unset values fall
/// back to defaults when a [`SessionConfig`] is built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub max_tool_retries: Option<u32>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Log every raw runtime event at debug level.
    pub debug: Option<bool>,
}

impl ParleyConfig {
    /// Load from environment variables (`PARLEY_MODEL`, `PARLEY_API_KEY`, ...).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            model: var("PARLEY_MODEL"),
            system_prompt: var("PARLEY_SYSTEM_PROMPT"),
            max_tool_retries: var("PARLEY_MAX_TOOL_RETRIES").and_then(|v| match v.trim().parse() {
                Ok(n) => Some(n),
                Err(_) => {
                    tracing::warn!(value = v.as_str(), "ignoring invalid PARLEY_MAX_TOOL_RETRIES");
                    None
                }
            }),
            base_url: var("PARLEY_BASE_URL"),
            api_key: var("PARLEY_API_KEY"),
            debug: var("PARLEY_DEBUG").and_then(|v| parse_flag(&v)),
        }
    }

    /// Parse a TOML config file.
    pub fn load_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// `config.toml` in the platform config directory.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "parley", "parley")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// The config file at `path` (when it exists) overlaid by the environment.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) if path.exists() => Self::load_file(path)?,
            _ => Self::default(),
        };
        Ok(file.overlay(Self::from_env()))
    }

    /// [`load_from`](Self::load_from) the default path.
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path().as_deref())
    }

    /// Values set in `other` win.
    pub fn overlay(self, other: Self) -> Self {
        Self {
            model: other.model.or(self.model),
            system_prompt: other.system_prompt.or(self.system_prompt),
            max_tool_retries: other.max_tool_retries.or(self.max_tool_retries),
            base_url: other.base_url.or(self.base_url),
            api_key: other.api_key.or(self.api_key),
            debug: other.debug.or(self.debug),
        }
    }

    pub fn model_id(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::builder()
            .model_id(self.model_id())
            .maybe_system_prompt(self.system_prompt.clone())
            .maybe_max_tool_retries(self.max_tool_retries)
            .debug_events(self.debug.unwrap_or(false))
            .build()
    }

    pub fn chat_client(&self) -> ChatCompletionsClient {
        ChatCompletionsClient::new(self.base_url.clone(), self.api_key.clone(), self.model_id())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            tracing::warn!(value = other, "ignoring invalid PARLEY_DEBUG");
            None
        }
    }
}
