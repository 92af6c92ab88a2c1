//! Fatal error taxonomy.
//!
//! Only storage-layer failures end a run. Each variant maps to its own
//! process exit code; summarization failures never appear here because
//! [`crate::summarize`] recovers them locally.

use thiserror::Error;

/// Exit code for a successful run.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code when `DATABASE_URL` (or the config file) is missing or invalid.
pub const EXIT_CONFIGURATION: i32 = 1;
/// Exit code when the database cannot be reached.
pub const EXIT_CONNECTION: i32 = 2;
/// Exit code when both retrieval strategies fail.
pub const EXIT_RETRIEVAL: i32 = 3;
/// Exit code when the response payload cannot be written as JSON.
pub const EXIT_OUTPUT: i32 = 4;
/// Exit code for invalid command-line usage.
pub const EXIT_USAGE: i32 = 64;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0}")]
    Configuration(String),

    #[error("database connection failed: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("retrieval failed: {0}")]
    Retrieval(#[source] sqlx::Error),
}

impl QueryError {
    pub fn exit_code(&self) -> i32 {
        match self {
            QueryError::Configuration(_) => EXIT_CONFIGURATION,
            QueryError::Connection(_) => EXIT_CONNECTION,
            QueryError::Retrieval(_) => EXIT_RETRIEVAL,
        }
    }
}
