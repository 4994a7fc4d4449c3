//! Retry and polling policies shared by the provisioning workflows.
//!
//! Talking to file servers and waiting on a rebooting appliance both fail
//! in ordinary ways. [`RetryBudget`] bounds how often a flaky step is
//! retried; [`Poller`] bounds how long a status check is repeated.

use std::time::Duration;

use log::{info, warn};
use tokio::time::Instant;

use crate::error::{ConsoleError, Exhausted};

/// Attempts allowed for a retried step.
pub const MAX_RETRY_COUNT: u32 = 3;

/// Timeout for a single device interaction inside a workflow.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Pause between status checks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Upper bound for a firmware download to finish.
pub const DOWNLOAD_WAIT: Duration = Duration::from_secs(1800);

/// How many attempts a step gets and how long to pause after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub pause: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, pause: Duration) -> Self {
        Self { attempts, pause }
    }

    /// Starts counting failures for one operation.
    pub fn budget(&self, operation: impl Into<String>, target: impl Into<String>) -> RetryBudget {
        RetryBudget {
            policy: *self,
            failures: 0,
            operation: operation.into(),
            target: target.into(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_RETRY_COUNT, Duration::from_secs(300))
    }
}

/// Failure counter for one retried operation.
///
/// ```rust,no_run
/// # use rkick::provision::RetryPolicy;
/// # async fn flaky() -> Result<(), rkick::ConsoleError> { Ok(()) }
/// # async fn run() -> Result<(), rkick::ConsoleError> {
/// let mut budget = RetryPolicy::default().budget("download", "10.0.0.1");
/// loop {
///     match flaky().await {
///         Ok(()) => break,
///         Err(err) => budget.failed(&err.to_string()).await?,
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RetryBudget {
    policy: RetryPolicy,
    failures: u32,
    operation: String,
    target: String,
}

impl RetryBudget {
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Counts one failure. Sleeps the policy pause when another attempt is
    /// left, otherwise returns the terminal error.
    pub async fn failed(&mut self, reason: &str) -> Result<(), ConsoleError> {
        self.failures += 1;
        warn!(
            "{} on {} failed (attempt {}/{}): {}",
            self.operation, self.target, self.failures, self.policy.attempts, reason
        );
        if self.failures >= self.policy.attempts {
            return Err(ConsoleError::provisioning_timeout(
                &self.operation,
                &self.target,
                Exhausted::Attempts(self.failures),
            ));
        }
        tokio::time::sleep(self.policy.pause).await;
        Ok(())
    }
}

/// Fixed-interval polling with an overall deadline.
#[derive(Debug, Clone)]
pub struct Poller {
    interval: Duration,
    started: Instant,
    deadline: Instant,
    polls: u32,
    operation: String,
    target: String,
}

impl Poller {
    pub fn new(
        operation: impl Into<String>,
        target: impl Into<String>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        let started = Instant::now();
        Self {
            interval,
            started,
            deadline: started + timeout,
            polls: 0,
            operation: operation.into(),
            target: target.into(),
        }
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Call after a check came back "not yet". Sleeps until the next check
    /// or fails once the deadline has passed.
    pub async fn wait(&mut self) -> Result<(), ConsoleError> {
        self.polls += 1;
        let now = Instant::now();
        if now >= self.deadline {
            return Err(ConsoleError::provisioning_timeout(
                &self.operation,
                &self.target,
                Exhausted::Elapsed(now - self.started),
            ));
        }
        let pause = self.interval.min(self.deadline - now);
        info!(
            "{} on {} not ready after {} check(s), next in {:?}",
            self.operation, self.target, self.polls, pause
        );
        tokio::time::sleep(pause).await;
        Ok(())
    }
}
