use std::future::Future;
use std::time::Duration;

use crate::error::MaxRetriesError;

/// Run `operation` up to `max_attempts` times, sleeping `delay` between
/// attempts. The first call counts toward the limit, so `max_attempts = 3`
/// means three calls in total. The last failure is wrapped in
/// [`MaxRetriesError`], preserving the cause.
pub async fn retry<T, F, Fut>(
    mut operation: F,
    max_attempts: u32,
    delay: Duration,
) -> Result<T, MaxRetriesError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, anyhow::Error>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(cause) => {
                if attempt >= max_attempts {
                    return Err(MaxRetriesError {
                        attempts: max_attempts,
                        cause,
                    });
                }
                tokio::time::sleep(delay).await;
            }
        }
    }
}
