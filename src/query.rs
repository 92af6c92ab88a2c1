use crate::config::Config;
use crate::db;
use crate::error::QueryError;
use crate::models::QueryRequest;
use crate::output::ResponsePayload;
use crate::retrieve::{self, PgCatalog};
use crate::summarize;

/// Run one query end to end and build the response payload.
///
/// The connection is closed before summarization starts, on both the
/// success and the failure path of retrieval.
pub async fn run_query(config: &Config, request: &QueryRequest) -> Result<ResponsePayload, QueryError> {
    let pool = db::connect(config, request.connection_timeout).await?;

    let retrieval = {
        let mut store = PgCatalog::new(&pool, &config.db.table);
        retrieve::retrieve(&mut store, &request.text, request.result_limit).await
    };

    pool.close().await;
    let retrieval = retrieval?;

    tracing::info!(
        strategy = retrieval.strategy.as_str(),
        count = retrieval.rows.len(),
        "query served"
    );

    let answer = summarize::maybe_summarize(config, request, &retrieval.rows).await;

    Ok(ResponsePayload::new(request, retrieval.rows, answer))
}
