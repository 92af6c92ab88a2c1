use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;
use crate::error::QueryError;

/// Stand-in for "no limit". Finite, because the pool adds it to `Instant::now()`.
const UNBOUNDED_CONNECT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// A zero timeout means wait indefinitely, matching libpq's `connect_timeout=0`.
pub fn effective_timeout(timeout: Duration) -> Duration {
    if timeout.is_zero() {
        UNBOUNDED_CONNECT
    } else {
        timeout
    }
}

/// Open the single connection used for this run.
///
/// Fails with [`QueryError::Configuration`] before touching the network when
/// `DATABASE_URL` is missing, and with [`QueryError::Connection`] when the
/// descriptor cannot be parsed or the server cannot be reached within
/// `timeout` (see [`effective_timeout`]). The caller owns the pool and must
/// `close()` it.
pub async fn connect(config: &Config, timeout: Duration) -> Result<PgPool, QueryError> {
    let url = config.database_url()?;

    let options = PgConnectOptions::from_str(url).map_err(QueryError::Connection)?;

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(effective_timeout(timeout))
        .connect_with(options)
        .await
        .map_err(QueryError::Connection)?;

    tracing::debug!(timeout_secs = timeout.as_secs(), "database connection established");
    Ok(pool)
}
