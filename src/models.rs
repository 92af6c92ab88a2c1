//! Core data types that flow through a single invocation.
//!
//! Every value here is built once and consumed once by the next stage:
//! [`QueryRequest`] → [`Retrieval`] → [`crate::output::ResponsePayload`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Output language requested for the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Italian,
    English,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Italian => "italian",
            Language::English => "english",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed, validated query. Immutable once built.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub text: String,
    pub result_limit: i64,
    pub language: Language,
    pub summarization_enabled: bool,
    pub connection_timeout: Duration,
    pub summarization_timeout: Duration,
}

/// One row of the catalog table, projected to the five output fields.
///
/// Values are passed through exactly as the database encodes them to JSON
/// (numbers, strings, arrays or `null`); nothing is computed here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogRow {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub name: Value,
    #[serde(default)]
    pub aliases: Value,
    #[serde(default)]
    pub tags: Value,
    #[serde(default)]
    pub notes: Value,
}

impl CatalogRow {
    /// `"<name>: <notes>"`, used as one line of summarizer context.
    pub fn context_line(&self) -> String {
        format!("{}: {}", display_value(&self.name), display_value(&self.notes))
    }
}

/// Render a JSON value as plain text: strings unquoted, `null` empty.
fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Which retrieval path produced a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStrategy {
    /// Full-text match, ordered by `updated_at` descending.
    FullText,
    /// Case-insensitive substring match, ordered by `id` ascending.
    Substring,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStrategy::FullText => "full_text",
            SearchStrategy::Substring => "substring",
        }
    }
}

/// Rows returned by the retriever together with the path that served them.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub rows: Vec<CatalogRow>,
    pub strategy: SearchStrategy,
}
