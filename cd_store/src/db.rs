//! Connection pool construction and SQL statement logging.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};

pub type DbPool = Pool<AsyncPgConnection>;

static LOG_QUERIES: AtomicBool = AtomicBool::new(false);

/// Build the connection pool and apply the query-logging switch.
pub fn build_pool(config: &StoreConfig, max_size: usize) -> StoreResult<DbPool> {
    set_query_logging(config.log_query);
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(config.connection_url());
    Pool::builder(manager)
        .max_size(max_size)
        .build()
        .map_err(|e| StoreError::Internal(format!("building connection pool: {e}")))
}

/// Close a pooled connection instead of returning it to the pool.
///
/// Used after in-flight work was abandoned: the server sees the session end,
/// rolls back any open transaction and releases its locks.
pub fn discard(conn: Object<AsyncPgConnection>) {
    tracing::warn!("Closing connection with abandoned work");
    drop(Object::take(conn));
}

pub fn set_query_logging(enabled: bool) {
    LOG_QUERIES.store(enabled, Ordering::Relaxed);
}

pub fn query_logging_enabled() -> bool {
    LOG_QUERIES.load(Ordering::Relaxed)
}

/// Run one hand-composed statement, logging it with its duration when enabled.
pub async fn logged<T, F>(operation: &'static str, sql: &str, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    let start = Instant::now();
    let result = fut.await;
    if query_logging_enabled() {
        tracing::info!(
            operation,
            duration_ms = start.elapsed().as_millis() as u64,
            query = %sql,
            ok = result.is_ok(),
            "sql"
        );
    }
    if let Err(StoreError::Internal(msg)) = &result {
        tracing::error!(operation, query = %sql, error = %msg, "query failed");
    }
    result
}

/// Render an id list for an inline `IN (..)` clause.
///
/// Ids are integers, so inlining them cannot inject SQL.
pub fn id_list(ids: &[i64]) -> String {
    ids.iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
