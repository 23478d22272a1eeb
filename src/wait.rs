//! Bounded polling for asynchronous provider and host state transitions.
//!
//! Every wait in the workflow is expressed as a named [`WaitPolicy`] so the
//! intervals and ceilings can be injected, and shrunk in tests. A breached
//! ceiling is reported as a [`WaitTimeout`] rather than looping forever.

use std::future::Future;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::sleep;
use tracing::info;

/// Interval and ceiling for one polling loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WaitPolicy {
    /// Delay between consecutive checks.
    pub interval: Duration,
    /// Maximum total time spent waiting before giving up.
    pub ceiling: Duration,
}

impl WaitPolicy {
    /// Creates a policy from an interval and a ceiling.
    #[must_use]
    pub const fn new(interval: Duration, ceiling: Duration) -> Self {
        Self { interval, ceiling }
    }

    /// Creates a policy from whole seconds.
    #[must_use]
    pub const fn from_secs(interval: u64, ceiling: u64) -> Self {
        Self::new(Duration::from_secs(interval), Duration::from_secs(ceiling))
    }
}

/// The named waits used across a deployment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WaitPolicies {
    /// Polling while a terminated instance reaches `terminated`.
    pub terminate_wait: WaitPolicy,
    /// Polling while a new instance leaves `pending`.
    pub pending_wait: WaitPolicy,
    /// Reconnection attempts after a reboot.
    pub reboot_wait: WaitPolicy,
    /// Fixed delay after an instance reports `running`.
    pub settle_delay: Duration,
    /// Fixed delay after triggering a reboot, before reconnecting.
    pub reboot_delay: Duration,
}

impl Default for WaitPolicies {
    fn default() -> Self {
        Self {
            terminate_wait: WaitPolicy::from_secs(15, 900),
            pending_wait: WaitPolicy::from_secs(10, 600),
            reboot_wait: WaitPolicy::from_secs(10, 600),
            settle_delay: Duration::from_secs(30),
            reboot_delay: Duration::from_secs(60),
        }
    }
}

impl WaitPolicies {
    /// Policies with millisecond timings, for tests and dry runs.
    #[must_use]
    pub const fn immediate() -> Self {
        let fast = WaitPolicy::new(Duration::from_millis(1), Duration::from_secs(5));
        Self {
            terminate_wait: fast,
            pending_wait: fast,
            reboot_wait: fast,
            settle_delay: Duration::ZERO,
            reboot_delay: Duration::ZERO,
        }
    }
}

/// Raised when a polling loop exceeds its ceiling.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("timed out after {}s waiting for {resource} to {condition} (last observed: {last_observed})", ceiling.as_secs())]
pub struct WaitTimeout {
    /// Resource being polled, for example an instance id.
    pub resource: String,
    /// Condition that never became true.
    pub condition: String,
    /// Last state reported before giving up.
    pub last_observed: String,
    /// Ceiling that was breached.
    pub ceiling: Duration,
}

/// Outcome of a single poll.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Poll<T> {
    /// The awaited condition holds.
    Ready(T),
    /// Not yet; carries the observed state for logging.
    Pending(String),
}

/// Failure of [`poll_until`]: either the check itself failed or the ceiling
/// was reached.
#[derive(Debug, Error)]
pub enum PollError<E> {
    /// The check returned an error; polling stops immediately.
    #[error(transparent)]
    Check(E),
    /// The ceiling was reached.
    #[error(transparent)]
    Timeout(WaitTimeout),
}

/// Repeats `check` until it reports [`Poll::Ready`], sleeping
/// `policy.interval` between attempts.
///
/// The first check runs after one interval, matching the sleep-then-recheck
/// cadence of the provisioning workflow.
///
/// # Errors
///
/// Returns [`PollError::Check`] as soon as `check` fails and
/// [`PollError::Timeout`] once `policy.ceiling` has elapsed.
pub async fn poll_until<T, E, F, Fut>(
    policy: WaitPolicy,
    resource: &str,
    condition: &str,
    mut check: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Poll<T>, E>>,
{
    let deadline = Instant::now() + policy.ceiling;
    let mut last_observed = String::from("unknown");

    loop {
        info!(
            resource,
            condition,
            state = %last_observed,
            "waiting {}s",
            policy.interval.as_secs()
        );
        sleep(policy.interval).await;

        match check().await.map_err(PollError::Check)? {
            Poll::Ready(value) => return Ok(value),
            Poll::Pending(observed) => last_observed = observed,
        }

        if Instant::now() >= deadline {
            return Err(PollError::Timeout(WaitTimeout {
                resource: resource.to_owned(),
                condition: condition.to_owned(),
                last_observed,
                ceiling: policy.ceiling,
            }));
        }
    }
}
