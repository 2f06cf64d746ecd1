use crate::remote::RemoteError;
use std::future::Future;
use tracing::warn;

pub const DEFAULT_MAX_THROTTLE_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries per call after a throttle; the first attempt is not counted.
    pub max_throttle_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_throttle_retries: DEFAULT_MAX_THROTTLE_RETRIES,
        }
    }
}

/// Runs `op`, sleeping for the advertised wait and retrying on throttles.
///
/// Once the retry budget is spent the last `Throttled` error is returned.
/// Every other error is returned immediately.
pub async fn with_throttle<T, F, Fut>(
    policy: RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(RemoteError::Throttled { wait }) if attempt < policy.max_throttle_retries => {
                attempt += 1;
                warn!(
                    "{what}: throttled, sleeping {}s (retry {attempt}/{})",
                    wait.as_secs(),
                    policy.max_throttle_retries
                );
                tokio::time::sleep(wait).await;
            }
            other => return other,
        }
    }
}
