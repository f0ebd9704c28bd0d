//! Bounded exponential backoff for calls to the Run Tracking Service.

use crate::clients::base::ApiError;
use anyhow::{anyhow, Result};
use er_protocol::config_models::RetrySettings;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    current.saturating_mul(2).min(max_backoff)
}

/// Runs a Run Tracking call with backoff, retrying transient [`ApiError`]s.
///
/// Cancelling `cancel` ends the loop at once, including while a call is in
/// flight. `what` names the call in log output.
pub(crate) async fn persist<T, F, Fut>(
    settings: &RetrySettings,
    cancel: &CancellationToken,
    what: &str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, ApiError>>,
{
    let max_attempts = settings.max_attempts.max(1);
    let max_delay = Duration::from_millis(settings.max_delay_ms);
    let mut delay = Duration::from_millis(settings.initial_delay_ms);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let err = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(anyhow!("{what} cancelled")),
            result = call() => match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            },
        };

        let will_retry = err.is_transient() && attempt < max_attempts;
        tracing::warn!(
            call = what,
            attempt,
            delay_ms = delay.as_millis() as u64,
            will_retry,
            error = %err,
            "run tracking call failed"
        );
        if !will_retry {
            return Err(err.into());
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(anyhow!("{what} cancelled")),
            _ = sleep(delay) => {}
        }
        delay = next_backoff(delay, max_delay);
    }
}
