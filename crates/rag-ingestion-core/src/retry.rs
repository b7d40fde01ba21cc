//! Retrier (spec.md §4.3, component C3).
//!
//! `with_rate_limit_retry` invokes a provider call; on `ProviderCallError::
//! RateLimited` it sleeps for `Retry-After` (or 5s default) and invokes
//! exactly once more. Any other failure propagates immediately. The second
//! 429 is escalated to `ProviderTransient`, never retried again — no
//! unbounded loop.

use crate::error::{IngestError, ProviderCallError};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

pub async fn with_rate_limit_retry<T, F, Fut>(mut op: F, context: &str) -> Result<T, IngestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderCallError>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(ProviderCallError::Transient(msg)) => Err(IngestError::ProviderTransient(msg)),
        Err(ProviderCallError::RateLimited { retry_after_secs }) => {
            let wait = retry_after_secs.unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            warn!(context, wait_secs = wait, "provider rate limited, retrying once");
            tokio::time::sleep(Duration::from_secs(wait)).await;

            match op().await {
                Ok(value) => Ok(value),
                Err(ProviderCallError::Transient(msg)) => Err(IngestError::ProviderTransient(msg)),
                Err(ProviderCallError::RateLimited { .. }) => Err(IngestError::ProviderTransient(
                    format!("{context}: still rate limited after one retry"),
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_on_first_try() {
        let calls = AtomicUsize::new(0);
        let result = with_rate_limit_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ProviderCallError>(42)
            },
            "test",
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_exactly_once_on_429() {
        let calls = AtomicUsize::new(0);
        let result = with_rate_limit_retry(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(ProviderCallError::RateLimited {
                        retry_after_secs: Some(0),
                    })
                } else {
                    Ok(99)
                }
            },
            "test",
        )
        .await;
        assert_eq!(result.unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn escalates_second_429_to_transient() {
        let calls = AtomicUsize::new(0);
        let result: Result<i32, _> = with_rate_limit_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderCallError::RateLimited {
                    retry_after_secs: Some(0),
                })
            },
            "test",
        )
        .await;
        assert!(matches!(result, Err(IngestError::ProviderTransient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_429_failure_propagates_without_retry() {
        let calls = AtomicUsize::new(0);
        let result: Result<i32, _> = with_rate_limit_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderCallError::Transient("boom".into()))
            },
            "test",
        )
        .await;
        assert!(matches!(result, Err(IngestError::ProviderTransient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
