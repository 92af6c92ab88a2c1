//! JSON documents written to stdout.
//!
//! A run prints exactly one document: either a [`ResponsePayload`]
//! (pretty-printed) or a single-line error object from [`error_json`].

use anyhow::Result;
use serde::Serialize;

use crate::models::{CatalogRow, Language, QueryRequest};

#[derive(Debug, Clone, Serialize)]
pub struct ResponsePayload {
    pub query: String,
    pub lang: Language,
    pub count: usize,
    pub results: Vec<CatalogRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_answer: Option<String>,
}

impl ResponsePayload {
    pub fn new(request: &QueryRequest, results: Vec<CatalogRow>, llm_answer: Option<String>) -> Self {
        Self {
            query: request.text.clone(),
            lang: request.language,
            count: results.len(),
            results,
            llm_answer,
        }
    }

    /// Two-space indented JSON; non-ASCII text is written as-is.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// `{"error": "<message>"}` on a single line.
pub fn error_json(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}
