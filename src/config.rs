//! Runtime configuration.
//!
//! A [`Config`] is built exactly once in `main` from two sources:
//!
//! - the process environment (`DATABASE_URL`, `OPENAI_API_KEY`)
//! - an optional TOML file passed with `--config`, holding overrides for the
//!   table name and the completion service
//!
//! Everything below `main` receives the finished struct; nothing else reads
//! the environment.
//!
//! ```toml
//! [db]
//! table = "bio_items"
//!
//! [llm]
//! model = "gpt-4o-mini"
//! base_url = "https://api.openai.com/v1"
//! temperature = 0.2
//! max_tokens = 200
//! deadline = "soft"   # or "hard"
//! request_timeout_secs = 600
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::error::QueryError;

pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Settings read from the optional TOML file. Every field has a default, so
/// an absent file and an empty file behave the same.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_table")]
    pub table: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
        }
    }
}

fn default_table() -> String {
    "bio_items".to_string()
}

/// How the summarization timeout is enforced.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Deadline {
    /// Let the call finish, then discard the answer if it took too long.
    #[default]
    Soft,
    /// Cancel the in-flight call once the timeout passes.
    Hard,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub deadline: Deadline,
    /// Transport ceiling for the HTTP request, independent of `deadline`.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            deadline: Deadline::Soft,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    200
}
fn default_request_timeout_secs() -> u64 {
    600
}

/// Fully resolved configuration for one invocation.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub db: DbConfig,
    pub llm: LlmConfig,
}

impl Config {
    /// Build from the real process environment.
    pub fn from_env(file: FileConfig) -> Self {
        Self::from_lookup(file, |key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(file: FileConfig, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            database_url: non_empty(DATABASE_URL_VAR),
            openai_api_key: non_empty(OPENAI_API_KEY_VAR),
            db: file.db,
            llm: file.llm,
        }
    }

    /// The connection descriptor, or a configuration error if it is missing.
    pub fn database_url(&self) -> Result<&str, QueryError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| QueryError::Configuration(format!("{} is not set", DATABASE_URL_VAR)))
    }
}

/// Load and validate the optional overrides file. `None` yields defaults.
pub fn load_config(path: Option<&Path>) -> Result<FileConfig> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: FileConfig =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if !is_valid_table_name(&config.db.table) {
        anyhow::bail!(
            "db.table must be a plain identifier (optionally schema-qualified), got '{}'",
            config.db.table
        );
    }

    if config.llm.model.trim().is_empty() {
        anyhow::bail!("llm.model must not be empty");
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }

    if config.llm.max_tokens == 0 {
        anyhow::bail!("llm.max_tokens must be > 0");
    }

    if config.llm.request_timeout_secs == 0 {
        anyhow::bail!("llm.request_timeout_secs must be > 0");
    }

    if !(config.llm.base_url.starts_with("http://") || config.llm.base_url.starts_with("https://"))
    {
        anyhow::bail!("llm.base_url must be an http(s) URL");
    }

    Ok(config)
}

/// The table name is spliced into SQL text, so only bare identifiers pass.
pub fn is_valid_table_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return false;
    }
    parts.iter().all(|part| {
        let mut chars = part.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        }
    })
}
