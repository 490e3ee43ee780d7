//! Retry wrapper for transient backend failures.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::errors::{StorageError, StorageResult};

const MAX_ATTEMPTS: u32 = 4;
const BACKOFF_BASE: Duration = Duration::from_millis(10);

/// Runs `operation` up to four times, doubling the backoff from 10 ms.
/// Only transient failures are retried: a refused connection, a pool
/// timeout, or a unique violation racing an identical idempotent insert.
/// The final failure is reported as `Unavailable`.
pub(crate) async fn with_retry<T, F, Fut>(operation_name: &str, operation: F) -> StorageResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let mut backoff = BACKOFF_BASE;
    for attempt in 1..=MAX_ATTEMPTS {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < MAX_ATTEMPTS && is_transient(&error) => {
                warn!(operation = operation_name, attempt, %error, "transient backend failure, retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(error) if is_transient(&error) => {
                return Err(StorageError::Unavailable(error.to_string()));
            }
            Err(error) => return Err(error),
        }
    }
    unreachable!("the retry loop returns on its final attempt")
}

fn is_transient(error: &StorageError) -> bool {
    let StorageError::Backend(backend) = error else {
        return false;
    };
    match backend {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(database) => {
            database.code().as_deref() == Some("23505")
        }
        _ => false,
    }
}
