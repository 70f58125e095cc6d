//! Lock window helpers
//!
//! No unit of work waits indefinitely: acquiring a connection, a table lock
//! or the in-memory store is bounded, and running out of time is reported
//! as a retryable conflict.

use std::time::Duration;
use tokio::time::timeout;

use super::repository::{StoreError, StoreResult};

/// Default time a unit of work may wait for its locks (2 seconds)
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Default time to wait for a pooled connection (5 seconds)
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a storage future, turning an elapsed window into [`StoreError::Conflict`]
///
/// # Arguments
///
/// * `duration` - Lock window
/// * `what` - Operation name used in the conflict message
/// * `future` - Storage operation to execute
///
/// # Example
///
/// ```no_run
/// use centelhas::db::timeouts::{with_lock_window, DEFAULT_LOCK_TIMEOUT};
/// # use sqlx::PgPool;
/// # async fn example(pool: &PgPool) -> Result<(), Box<dyn std::error::Error>> {
///
/// let tx = with_lock_window(DEFAULT_LOCK_TIMEOUT, "begin", async {
///     pool.begin().await.map_err(Into::into)
/// })
/// .await?;
///
/// # Ok(())
/// # }
/// ```
pub async fn with_lock_window<F, T>(duration: Duration, what: &str, future: F) -> StoreResult<T>
where
    F: std::future::Future<Output = StoreResult<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Conflict(format!(
            "{what} did not complete within {duration:?}"
        ))),
    }
}
