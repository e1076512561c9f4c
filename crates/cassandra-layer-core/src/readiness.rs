use std::time::Duration;
use tokio::time::Instant;

/// Poll increment of the readiness wait
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Poll `condition` until it reports `true` or `timeout` has elapsed.
///
/// The remaining budget is recomputed from a fixed start instant on every
/// iteration, so scheduling jitter never extends the wait by more than one
/// poll increment. Returns `Ok(true)` if the condition was met and
/// `Ok(false)` on timeout; an error from the condition ends the wait
/// immediately.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> anyhow::Result<bool>
where
    F: FnMut() -> anyhow::Result<bool>,
{
    let start = Instant::now();
    loop {
        if condition()? {
            return Ok(true);
        }
        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return Ok(false);
        }
        tokio::time::sleep(remaining.min(POLL_INTERVAL)).await;
    }
}
