//! Convergence poller: "poll until the condition holds for N consecutive
//! observations, else time out".
//!
//! Every deployment check and the rollout drain loop are built on this one
//! loop. The poller suspends with `tokio::time::sleep` between observations
//! and measures elapsed time with `tokio::time::Instant`, so paused-clock
//! tests observe exact timeout arithmetic.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Timeout, success threshold, and sleep interval for one poll.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PollConfig {
    /// Give up once more than this many seconds have elapsed.
    pub timeout_secs: u64,
    /// Consecutive `true` observations required. Zero behaves as one.
    pub required_consecutive_successes: u32,
    /// Seconds to sleep between observations.
    pub sleep_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            required_consecutive_successes: 1,
            sleep_secs: 5,
        }
    }
}

impl PollConfig {
    pub fn new(timeout_secs: u64, required_consecutive_successes: u32, sleep_secs: u64) -> Self {
        Self {
            timeout_secs,
            required_consecutive_successes,
            sleep_secs,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn sleep(&self) -> Duration {
        Duration::from_secs(self.sleep_secs)
    }

    /// Effective success threshold (never below one).
    pub fn required_successes(&self) -> u32 {
        self.required_consecutive_successes.max(1)
    }
}

/// Poll `predicate` until it returns `true` on enough consecutive calls.
///
/// The clock starts now. Returns `Ok(false)` on timeout; an `Err` from the
/// predicate aborts the poll immediately.
pub async fn poll_until<F, Fut, E>(config: &PollConfig, predicate: F) -> Result<bool, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    poll_until_since(Instant::now(), config, predicate).await
}

/// Like [`poll_until`], but measures the deadline from `started` so several
/// phases of one operation can share a single clock.
pub async fn poll_until_since<F, Fut, E>(
    started: Instant,
    config: &PollConfig,
    mut predicate: F,
) -> Result<bool, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let timeout = config.timeout();
    let required = config.required_successes();
    let mut successes = 0u32;
    let mut attempts = 0u32;

    loop {
        if started.elapsed() > timeout {
            debug!(attempts, timeout_secs = config.timeout_secs, "poll timed out");
            return Ok(false);
        }

        attempts += 1;
        if predicate().await? {
            successes += 1;
            if successes >= required {
                debug!(attempts, successes, "poll converged");
                return Ok(true);
            }
        } else {
            successes = 0;
        }

        debug!(
            attempts,
            successes,
            required,
            sleep_secs = config.sleep_secs,
            "condition not yet stable, sleeping"
        );
        tokio::time::sleep(config.sleep()).await;
    }
}
