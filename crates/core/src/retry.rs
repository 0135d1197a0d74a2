use std::{future::Future, time::Duration};

use anyhow::Result;
use tokio::time::{sleep, Instant};

/// Timing for a bounded polling loop: settle delay before the first check,
/// fixed interval between checks, overall budget.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub initial_delay: Duration,
    pub interval: Duration,
    pub timeout: Duration,
    /// Treat errors from the check as "not ready yet" instead of aborting.
    pub ignore_errors: bool,
}

/// Poll `check` until it yields a value or the overall budget elapses.
///
/// Timing out is a normal outcome and yields `Ok(None)`; callers decide how
/// to degrade. Errors from `check` only propagate when `ignore_errors` is
/// false.
pub async fn poll_until<T, F, Fut>(config: PollConfig, mut check: F) -> Result<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + config.timeout;
    sleep(config.initial_delay).await;
    loop {
        match check().await {
            Ok(Some(value)) => return Ok(Some(value)),
            Ok(None) => {}
            Err(e) if config.ignore_errors => {
                tracing::debug!("Poll attempt failed, treating as not ready: {:?}", e);
            }
            Err(e) => return Err(e),
        }
        if Instant::now() + config.interval > deadline {
            return Ok(None);
        }
        sleep(config.interval).await;
    }
}
