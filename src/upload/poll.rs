//! Polling policy
//!
//! Both polling chains (progress and new reference) are strictly sequential:
//! the next request is issued only after the previous response. A
//! `PollPolicy` bounds a chain by attempt count and overall deadline and
//! optionally spaces requests out.

use crate::config::PollConfig;
use std::fmt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
    pub timeout: Option<Duration>,
}

impl PollPolicy {
    /// No interval, no bounds
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start tracking one chain
    pub fn budget(&self) -> PollBudget {
        PollBudget {
            policy: self.clone(),
            attempts: 0,
            started: Instant::now(),
        }
    }
}

impl From<&PollConfig> for PollPolicy {
    fn from(config: &PollConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_millis),
            max_attempts: config.max_attempts,
            timeout: config.timeout_seconds.map(Duration::from_secs),
        }
    }
}

/// Why a chain stopped before reaching its goal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollLimit {
    Attempts(u32),
    Timeout(Duration),
}

impl fmt::Display for PollLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollLimit::Attempts(n) => write!(f, "gave up after {} attempts", n),
            PollLimit::Timeout(d) => write!(f, "gave up after {:?}", d),
        }
    }
}

/// The two polling chains a session runs; each never overlaps itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollChain {
    Progress,
    Reference,
}

impl PollChain {
    pub fn as_str(self) -> &'static str {
        match self {
            PollChain::Progress => "progress",
            PollChain::Reference => "reference",
        }
    }
}

impl fmt::Display for PollChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attempt and deadline accounting for one chain
#[derive(Debug)]
pub struct PollBudget {
    policy: PollPolicy,
    attempts: u32,
    started: Instant,
}

impl PollBudget {
    /// Reserve the next request, or report the exhausted limit
    pub fn next_attempt(&mut self) -> Result<u32, PollLimit> {
        if let Some(max) = self.policy.max_attempts {
            if self.attempts >= max {
                return Err(PollLimit::Attempts(self.attempts));
            }
        }
        if let Some(timeout) = self.policy.timeout {
            if self.started.elapsed() >= timeout {
                return Err(PollLimit::Timeout(timeout));
            }
        }
        self.attempts += 1;
        Ok(self.attempts)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Wait out the interval, returning early on cancellation
    pub async fn pause(&self, cancel: &CancellationToken) {
        if self.policy.interval.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.policy.interval) => {}
            _ = cancel.cancelled() => {}
        }
    }
}
