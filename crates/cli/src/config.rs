//! Configuration management for the CLI
//!
//! Sources, lowest priority first: built-in defaults, the config file
//! (`--config`, else `~/.config/demandcast/config.toml` when present), then
//! `DEMANDCAST__*` environment variables, e.g.
//! `DEMANDCAST__PIPELINE__ENSEMBLE__HOLDOUT_DAYS=14`.

use anyhow::{Context, Result};
use forecast_lib::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "DEMANDCAST";

/// Settings for the chat-completions explanation backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplainerConfig {
    /// Base URL of an OpenAI-compatible API, e.g. `https://api.fireworks.ai/inference/v1`
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// Business domain mentioned in the prompt
    pub domain: String,
}

impl Default for ExplainerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: "accounts/fireworks/models/llama4-scout-instruct-basic".to_string(),
            temperature: 0.6,
            max_tokens: 4096,
            timeout_secs: 60,
            domain: forecast_lib::explain::DEFAULT_DOMAIN.to_string(),
        }
    }
}

impl ExplainerConfig {
    pub fn is_remote(&self) -> bool {
        self.endpoint.is_some() && self.api_key.is_some()
    }
}

/// CLI configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub explainer: ExplainerConfig,
}

impl AppConfig {
    /// Load configuration; an explicit path must exist, the default one may not
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        match path {
            Some(path) => {
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(default) = default_config_path() {
                    builder = builder.add_source(config::File::from(default).required(false));
                }
            }
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?;

        settings
            .try_deserialize()
            .context("Failed to parse configuration")
    }
}

/// Get the default configuration file path
pub fn default_config_path() -> Option<PathBuf> {
    let home = dirs_next::home_dir()?;
    Some(home.join(".config").join("demandcast").join("config.toml"))
}
