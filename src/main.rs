//! # bio-query CLI
//!
//! Looks up rows of the catalog table matching a free-text query and prints
//! them as JSON, optionally with a short LLM-written summary.
//!
//! ## Examples
//!
//! ```bash
//! # Italian summary (default), five rows
//! bio-query --q "ACE inhibitor"
//!
//! # Two rows, English, no summary
//! bio-query --q "ACE inhibitor" --topk 2 --lang english --no-llm
//!
//! # Override the table or the completion model
//! bio-query --q "statin" --config ./bio-query.toml
//! ```
//!
//! ## Exit codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Success, with or without summary |
//! | 1 | `DATABASE_URL` missing or config file invalid |
//! | 2 | Database connection failed |
//! | 3 | Both retrieval strategies failed |
//! | 4 | Response payload could not be serialized |
//! | 64 | Invalid command-line usage |

use clap::error::ErrorKind;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use bio_query::config::{self, Config};
use bio_query::error::{QueryError, EXIT_OUTPUT, EXIT_SUCCESS, EXIT_USAGE};
use bio_query::logging;
use bio_query::models::{Language, QueryRequest};
use bio_query::output::{self, ResponsePayload};
use bio_query::query;

/// Search the catalog with full-text matching (falling back to substring
/// matching) and print the hits as JSON.
///
/// Reads the connection string from `DATABASE_URL`. When `OPENAI_API_KEY`
/// is set, the hits are also summarized by a chat-completion model.
#[derive(Parser)]
#[command(name = "bio-query", version)]
struct Cli {
    /// Query text.
    #[arg(long = "q", value_name = "TEXT")]
    query: String,

    /// Maximum number of rows to return.
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(i64).range(1..))]
    topk: i64,

    /// Language the summary should be written in.
    #[arg(long, value_enum, default_value_t = Language::Italian)]
    lang: Language,

    /// Never call the completion service, even if a key is configured.
    #[arg(long)]
    no_llm: bool,

    /// Database connection timeout, in seconds. `0` waits without limit.
    #[arg(long, default_value_t = 5, value_name = "SECS")]
    db_timeout: u64,

    /// Summary timeout, in seconds. A late answer is dropped.
    #[arg(long, default_value_t = 15, value_name = "SECS")]
    llm_timeout: u64,

    /// Optional TOML file overriding the table name and completion settings.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

impl Cli {
    fn to_request(&self) -> QueryRequest {
        QueryRequest {
            text: self.query.clone(),
            result_limit: self.topk,
            language: self.lang,
            summarization_enabled: !self.no_llm,
            connection_timeout: Duration::from_secs(self.db_timeout),
            summarization_timeout: Duration::from_secs(self.llm_timeout),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let code = run().await;
    std::process::exit(code);
}

async fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => return exit_code_for_parse_error(error),
    };

    logging::init_tracing();

    let file = match config::load_config(cli.config.as_deref()) {
        Ok(file) => file,
        Err(e) => return fail(&QueryError::Configuration(format!("{:#}", e))),
    };
    let cfg = Config::from_env(file);
    let request = cli.to_request();

    match query::run_query(&cfg, &request).await {
        Ok(payload) => emit(&payload),
        Err(e) => fail(&e),
    }
}

fn emit(payload: &ResponsePayload) -> i32 {
    match payload.to_json() {
        Ok(text) => {
            println!("{}", text);
            EXIT_SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize payload");
            println!("{}", output::error_json(&e.to_string()));
            EXIT_OUTPUT
        }
    }
}

fn fail(error: &QueryError) -> i32 {
    tracing::debug!(exit_code = error.exit_code(), "fatal error");
    println!("{}", output::error_json(&error.to_string()));
    error.exit_code()
}

fn exit_code_for_parse_error(error: clap::Error) -> i32 {
    let _ = error.print();
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_SUCCESS,
        _ => EXIT_USAGE,
    }
}
