//! Bounded wait for the cluster to converge on a desired state

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::AgentError;

/// Grace period, interval and attempt ceiling of a convergence wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wait before the first check
    pub grace: Duration,
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    /// Policy after create, patch and scale calls
    pub fn rollout() -> Self {
        Self {
            grace: Duration::from_secs(5),
            interval: Duration::from_secs(1),
            max_attempts: 120,
        }
    }

    /// Policy after a delete call
    pub fn deletion() -> Self {
        Self {
            grace: Duration::ZERO,
            interval: Duration::from_secs(1),
            max_attempts: 60,
        }
    }

    /// Upper bound of a full wait
    pub fn budget(&self) -> Duration {
        self.grace + self.interval * self.max_attempts
    }
}

/// Outcome of a convergence wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    /// The check passed on the given attempt (1-based)
    Converged { attempts: u32 },
    TimedOut,
    Cancelled,
}

/// Sleep unless cancelled first. Returns false on cancellation.
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Run `check` until it reports convergence, the attempts run out or `cancel`
/// fires. A check that errors counts as not converged yet.
pub async fn await_condition<F, Fut>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut check: F,
) -> Convergence
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, AgentError>>,
{
    if !pause(policy.grace, cancel).await {
        return Convergence::Cancelled;
    }

    for attempt in 1..=policy.max_attempts {
        match check().await {
            Ok(true) => return Convergence::Converged { attempts: attempt },
            Ok(false) => {}
            Err(e) => debug!("Convergence check {} failed: {}", attempt, e),
        }

        if attempt < policy.max_attempts && !pause(policy.interval, cancel).await {
            return Convergence::Cancelled;
        }
    }

    Convergence::TimedOut
}
