//! Notification store interface and bounded pool retry.

use std::future::Future;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::PoolRetry;
use crate::error::Error;

/// Failure reported by a backing store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No pooled connection or cursor is available right now.
    #[error("connection pool exhausted")]
    PoolBusy,

    /// Any other store failure.
    #[error("{0}")]
    Backend(String),
}

/// One queued notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Monotonic id assigned by the store on commit.
    pub id: i64,
    /// Application payload, delivered as is.
    pub message: serde_json::Value,
}

/// Source of queued notifications.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Fetch notifications posted on any of `channels` with an id greater
    /// than `since_id` and not in `excluded_ids`, in ascending id order.
    async fn poll(
        &self,
        channels: &[String],
        since_id: i64,
        excluded_ids: &[i64],
    ) -> Result<Vec<Notification>, StoreError>;
}

/// Run `op`, retrying while the store reports [`StoreError::PoolBusy`].
///
/// Attempt `n` that hits a busy pool sleeps a random duration in
/// `[base_delay, base_delay * n]` before the next one.
///
/// # Errors
///
/// - `Error::PoolExhausted` once every attempt found the pool busy
/// - `Error::Store` for any other store failure, without retrying
pub async fn with_pool_retry<T, F, Fut>(policy: PoolRetry, mut op: F) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    for attempt in 1..=policy.attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(StoreError::PoolBusy) => {
                let upper = policy.base_delay.saturating_mul(attempt as u32);
                let delay = rand::thread_rng().gen_range(policy.base_delay..=upper);
                tracing::debug!(attempt, ?delay, "pool busy, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(StoreError::Backend(msg)) => return Err(Error::Store(msg)),
        }
    }
    Err(Error::PoolExhausted {
        attempts: policy.attempts,
    })
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::PoolBusy => Error::PoolExhausted { attempts: 1 },
            StoreError::Backend(msg) => Error::Store(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn policy() -> PoolRetry {
        PoolRetry {
            attempts: 3,
            base_delay: Duration::from_millis(30),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_pool_frees() {
        let calls = &AtomicUsize::new(0);
        let result = with_pool_retry(policy(), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StoreError::PoolBusy)
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up() {
        let calls = &AtomicUsize::new(0);
        let start = tokio::time::Instant::now();
        let result: crate::Result<()> = with_pool_retry(policy(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::PoolBusy)
        })
        .await;
        assert_eq!(result, Err(Error::PoolExhausted { attempts: 3 }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 30ms + [30, 60]ms + [30, 90]ms
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(90));
        assert!(waited <= Duration::from_millis(180));
    }

    #[tokio::test]
    async fn test_backend_error_not_retried() {
        let calls = &AtomicUsize::new(0);
        let result: crate::Result<()> = with_pool_retry(policy(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Backend("relation does not exist".into()))
        })
        .await;
        assert_eq!(result, Err(Error::Store("relation does not exist".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
