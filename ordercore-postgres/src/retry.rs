//! Retry of transient failures on statements that are safe to repeat.
//!
//! Only reads and idempotent bookkeeping go through here. A conditional
//! decrement or a ledger insert whose commit was acknowledged but whose
//! reply was lost must not be replayed blindly; those surface their
//! transient error to the caller, whose own retry path reloads state first.

use std::future::Future;

use ordercore::{RetryConfig, StoreResult};
use tracing::{debug, warn};

/// Runs `operation` until it succeeds, fails permanently or runs out of
/// attempts.
pub async fn retry_transient<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &'static str,
    mut operation: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let attempts = config.attempts();
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "[postgres.retry] succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(error) if error.is_transient() && attempt + 1 < attempts => {
                let delay = config.delay_for(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    ?delay,
                    error = %error,
                    "[postgres.retry] transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
