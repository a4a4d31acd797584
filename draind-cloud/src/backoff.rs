//! Exponential backoff with jitter for the cloud HTTP clients.
//!
//! Three attempts, doubling the base delay and adding uniform jitter in
//! `[0, sleep/2)`. A plain async helper rather than the `backoff` crate's
//! own executor integration, so it composes with any `Future`-returning
//! closure.

use std::future::Future;
use std::time::Duration;

use draind_types::CloudError;
use rand::Rng;

const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY: Duration = Duration::from_millis(250);

/// Retry `op` up to [`MAX_ATTEMPTS`] times on [`CloudError::Transient`],
/// sleeping an exponentially growing, jittered delay between attempts. Any
/// non-transient error returns immediately.
pub async fn retry_with_backoff<T, F, Fut>(mut op: F) -> Result<T, CloudError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CloudError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(CloudError::Transient(msg)) => {
                attempt += 1;
                if attempt >= MAX_ATTEMPTS {
                    return Err(CloudError::Transient(msg));
                }
                let sleep = BASE_DELAY * 2u32.pow(attempt - 1);
                let jitter = rand::thread_rng().gen_range(0..=sleep.as_millis() as u64 / 2);
                tracing::debug!(attempt, delay_ms = sleep.as_millis() as u64 + jitter, "retrying after transient cloud error");
                tokio::time::sleep(sleep + Duration::from_millis(jitter)).await;
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(|| async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(CloudError::Transient("not yet".into()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), CloudError> = retry_with_backoff(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CloudError::Transient("always".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn non_transient_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<(), CloudError> = retry_with_backoff(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CloudError::NotFound("gone".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
