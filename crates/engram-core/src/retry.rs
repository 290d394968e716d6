//! Timeout and bounded-backoff wrapper for collaborator calls.
//!
//! Every call to an external collaborator (enrichment, embedding) goes
//! through [`call_with_retry`]: a per-attempt timeout, then exponential
//! backoff for transient failures, then the error surfaces so the caller
//! can apply its documented fallback. Non-transient errors are returned
//! immediately.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

use crate::config::CollaboratorConfig;
use crate::error::{EngramError, EngramResult, ErrorCode};

/// Run `f` with a per-attempt timeout and bounded exponential backoff.
///
/// `op` names the call in logs. Retries happen only for transient errors;
/// integrity and configuration errors surface on the first attempt.
pub async fn call_with_retry<T, F, Fut>(
    config: &CollaboratorConfig,
    op: &str,
    mut f: F,
) -> EngramResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngramResult<T>>,
{
    let timeout = Duration::from_secs(config.timeout_secs);
    let mut backoff = ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(config.backoff_initial_ms))
        .with_max_delay(Duration::from_millis(config.backoff_max_ms))
        .with_max_times(config.max_retries)
        .build();

    loop {
        let attempt = tokio::time::timeout(timeout, f()).await;
        let err = match attempt {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
            Err(_) => EngramError::timeout(format!("{} timed out after {:?}", op, timeout)),
        };

        if !err.is_transient() {
            return Err(err);
        }

        match backoff.next() {
            Some(delay) => {
                tracing::warn!(op, error = %err, delay_ms = delay.as_millis() as u64, "retrying transient failure");
                tokio::time::sleep(delay).await;
            }
            None => {
                tracing::warn!(op, error = %err, "retries exhausted");
                return Err(EngramError::TransientIo {
                    message: format!("{} failed after {} retries: {}", op, config.max_retries, err),
                    code: ErrorCode::IoRetriesExhausted,
                    source: Some(Box::new(err)),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config() -> CollaboratorConfig {
        CollaboratorConfig {
            timeout_secs: 1,
            max_retries: 3,
            backoff_initial_ms: 1,
            backoff_max_ms: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_success_needs_no_retry() {
        let calls = AtomicUsize::new(0);
        let result = call_with_retry(&fast_config(), "enrich", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, EngramError>(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_error_retries_then_succeeds() {
        let calls = AtomicUsize::new(0);
        let result = call_with_retry(&fast_config(), "enrich", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(EngramError::transient("connection reset"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_does_not_retry() {
        let calls = AtomicUsize::new(0);
        let result: EngramResult<()> = call_with_retry(&fast_config(), "enrich", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngramError::integrity("m1", "bad record")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_retry_code() {
        let result: EngramResult<()> = call_with_retry(&fast_config(), "enrich", || async {
            Err(EngramError::transient("still down"))
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.code(), ErrorCode::IoRetriesExhausted);
    }
}
