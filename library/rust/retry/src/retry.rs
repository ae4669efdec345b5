use crate::error::RetryError;
use crate::policy::RetryConfig;
use std::future::Future;

/// with_retry は operation が成功するまで、すべてのエラーを対象に再試行する。
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    with_retry_if(config, |_| true, operation).await
}

/// with_retry_if は should_retry が true を返すエラーに限って再試行する。
/// それ以外のエラーは即座に `RetryError::NonRetryable` として返す。
pub async fn with_retry_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    mut should_retry: P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: FnMut(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !should_retry(&e) => return Err(RetryError::NonRetryable(e)),
            Err(e) => {
                tracing::warn!("リトライ試行 {}/{}: {}", attempt + 1, max_attempts, e);
                if attempt + 1 >= max_attempts {
                    return Err(RetryError::ExhaustedRetries {
                        attempts: max_attempts,
                        last_error: e,
                    });
                }
                let delay = config.compute_delay(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}
