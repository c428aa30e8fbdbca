// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnect backoff policy and retry bookkeeping

use crate::status::Status;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff between session re-establishment attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    pub multiplier: f64,
    /// `None` retries forever
    pub max_retries: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_retries: None,
        }
    }
}

impl BackoffPolicy {
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before retry number `retry` (zero-based), capped at `max_delay`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(scaled).unwrap_or(self.max_delay)
    }
}

/// What to do after a session attempt failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAction {
    /// Start again after `delay`; `attempt` is one-based
    Retry { attempt: u32, delay: Duration },
    /// Stop reconnecting and surface the failure
    GiveUp,
}

/// Consecutive failed attempts since the last successful start
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub failures: u32,
}

impl RetryState {
    pub fn next_action(&self, policy: &BackoffPolicy, status: &Status) -> RetryAction {
        if !status.is_retryable() {
            return RetryAction::GiveUp;
        }
        if policy.max_retries.is_some_and(|max| self.failures >= max) {
            return RetryAction::GiveUp;
        }
        RetryAction::Retry {
            attempt: self.failures.saturating_add(1),
            delay: policy.delay_for(self.failures),
        }
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    /// A session started; the next failure starts from the initial delay
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
