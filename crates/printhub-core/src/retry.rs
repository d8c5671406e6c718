//! # Retry Policy
//!
//! Decides what happens after a failed print attempt.
//!
//! ```text
//!   attempt failed
//!        │
//!        ├── content error ─────────────────────────► Fail
//!        ├── cancel requested ──────────────────────► Abandon
//!        ├── auto_retry off / retries ≥ max_retries ► Fail
//!        └── otherwise
//!              retries += 1
//!              failures[printer] += 1 (≥ failover_after → excluded)
//!              ─────────────────────────────────────► Retry { delay }
//! ```
//!
//! The policy only computes decisions. Waiting out the delay and reselecting a
//! printer is the dispatcher's job, so the whole retry loop stays an explicit
//! state machine that tests can drive with a virtual clock.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PrintError;

/// Growth of the delay between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Same delay before every retry.
    #[default]
    Flat,
    /// `retry_delay · 2^(n-1)`, capped at `max_retry_delay`.
    Exponential,
}

/// Retry settings for one dispatch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub auto_retry: bool,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backoff: BackoffKind,
    pub max_retry_delay: Duration,
    /// Failures on one printer before it is excluded for this job.
    pub failover_after: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            auto_retry: true,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            backoff: BackoffKind::Flat,
            max_retry_delay: Duration::from_secs(60),
            failover_after: 1,
        }
    }
}

/// What the dispatcher should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDecision {
    /// Wait `delay`, then reselect a printer and try again.
    Retry { delay: Duration },
    /// Stop; the job becomes FAILED.
    Fail { reason: String },
    /// Stop; the job becomes ABANDONED.
    Abandon,
}

/// Per-job attempt bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct AttemptTracker {
    /// Re-attempts scheduled so far.
    pub retries: u32,
    failures: HashMap<String, u32>,
    excluded: HashSet<String>,
}

impl AttemptTracker {
    /// Resumes bookkeeping for a job that already used `retries` re-attempts
    /// (a recovered job keeps its count).
    pub fn resume(retries: u32) -> Self {
        AttemptTracker {
            retries,
            ..Default::default()
        }
    }

    /// Printers the balancer must skip for this job.
    pub fn excluded(&self) -> &HashSet<String> {
        &self.excluded
    }

    pub fn failures_on(&self, printer: &str) -> u32 {
        self.failures.get(printer).copied().unwrap_or(0)
    }
}

impl RetryPolicy {
    /// Delay before re-attempt number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.backoff {
            BackoffKind::Flat => self.retry_delay,
            BackoffKind::Exponential => {
                let exponent = retry.saturating_sub(1).min(31);
                let delay = self.retry_delay.saturating_mul(1u32 << exponent);
                delay.min(self.max_retry_delay)
            }
        }
    }

    /// Evaluates a failed attempt on `printer` and updates `tracker`.
    pub fn on_failure(
        &self,
        tracker: &mut AttemptTracker,
        printer: &str,
        error: &PrintError,
        cancel_requested: bool,
    ) -> FailureDecision {
        if !error.is_transient() {
            return FailureDecision::Fail {
                reason: error.to_string(),
            };
        }

        if cancel_requested {
            return FailureDecision::Abandon;
        }

        if !self.auto_retry || tracker.retries >= self.max_retries {
            return FailureDecision::Fail {
                reason: error.to_string(),
            };
        }

        tracker.retries += 1;
        let failures = tracker.failures.entry(printer.to_string()).or_insert(0);
        *failures += 1;
        if *failures >= self.failover_after.max(1) {
            tracker.excluded.insert(printer.to_string());
        }

        FailureDecision::Retry {
            delay: self.delay_for(tracker.retries),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32, failover_after: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            failover_after,
            retry_delay: Duration::from_millis(100),
            ..Default::default()
        }
    }

    #[test]
    fn test_content_error_fails_immediately() {
        let mut tracker = AttemptTracker::default();
        let decision = policy(3, 1).on_failure(&mut tracker, "P1", &PrintError::content("bad pdf"), false);
        assert!(matches!(decision, FailureDecision::Fail { .. }));
        assert_eq!(tracker.retries, 0);
    }

    #[test]
    fn test_cancel_abandons_before_retry() {
        let mut tracker = AttemptTracker::default();
        let decision = policy(3, 1).on_failure(&mut tracker, "P1", &PrintError::transient("offline"), true);
        assert_eq!(decision, FailureDecision::Abandon);
    }

    #[test]
    fn test_retries_are_bounded() {
        let policy = policy(2, 1);
        let mut tracker = AttemptTracker::default();
        let err = PrintError::transient("timeout");

        let mut attempts = 1;
        while let FailureDecision::Retry { .. } = policy.on_failure(&mut tracker, "P1", &err, false) {
            attempts += 1;
        }
        assert_eq!(attempts, 3);
        assert_eq!(tracker.retries, 2);
    }

    #[test]
    fn test_auto_retry_disabled() {
        let mut policy = policy(5, 1);
        policy.auto_retry = false;
        let mut tracker = AttemptTracker::default();
        let decision = policy.on_failure(&mut tracker, "P1", &PrintError::transient("x"), false);
        assert!(matches!(decision, FailureDecision::Fail { .. }));
    }

    #[test]
    fn test_failover_after_excludes_printer() {
        let policy = policy(2, 2);
        let mut tracker = AttemptTracker::default();
        let err = PrintError::transient("paper jam");

        policy.on_failure(&mut tracker, "P2", &err, false);
        assert!(tracker.excluded().is_empty());
        policy.on_failure(&mut tracker, "P2", &err, false);
        assert!(tracker.excluded().contains("P2"));
        assert_eq!(tracker.failures_on("P2"), 2);
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RetryPolicy {
            backoff: BackoffKind::Exponential,
            retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(5),
            ..Default::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for(40), Duration::from_secs(5));
    }

    #[test]
    fn test_resume_keeps_retry_count() {
        let policy = policy(2, 1);
        let mut tracker = AttemptTracker::resume(2);
        let decision = policy.on_failure(&mut tracker, "P1", &PrintError::transient("x"), false);
        assert!(matches!(decision, FailureDecision::Fail { .. }));
    }
}
