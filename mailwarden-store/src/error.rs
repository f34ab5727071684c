//! Store errors and the transient-retry helper

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by durable stores.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Transient contention (deadlock-class); safe to retry.
    #[error("Store busy: {0}")]
    Busy(String),

    /// Unique-constraint conflict.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Backend failure.
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Busy(_))
    }
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Backoff schedule for transient failures.
const RETRY_BACKOFF: [Duration; 2] = [Duration::from_millis(100), Duration::from_millis(200)];

/// Run `op` up to 3 times, backing off 100/200 ms on transient errors.
/// Non-transient errors propagate immediately.
pub async fn with_retry<T, F, Fut>(label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < RETRY_BACKOFF.len() => {
                warn!(op = label, attempt, error = %err, "transient store error, retrying");
                tokio::time::sleep(RETRY_BACKOFF[attempt]).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
