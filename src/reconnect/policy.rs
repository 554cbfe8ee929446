//! Bounded-retry state machine for device recovery.

use crate::capture::CaptureConfig;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors returned when no further reconnects are allowed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconnectError {
    #[error("reconnect attempts exhausted after {attempts} attempt(s)")]
    Exhausted { attempts: u32 },
}

/// Position of the policy in its retry cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectState {
    /// Connected, or not yet failed.
    Idle,
    /// Waiting for or performing a reconnect attempt.
    Backoff,
    /// Terminal: the worker must stop.
    Exhausted,
}

/// Decides whether and when to re-open a lost device.
///
/// The wait before each attempt is constant. Once `max_attempts`
/// consecutive attempts have failed the policy is exhausted and stays that
/// way until [`reset`](Self::reset).
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    enabled: bool,
    interval: Duration,
    max_attempts: u32,
    attempts: u32,
    state: ReconnectState,
}

impl ReconnectPolicy {
    /// Creates an idle policy. A disabled policy is exhausted by its first attempt.
    pub fn new(enabled: bool, interval: Duration, max_attempts: u32) -> Self {
        Self {
            enabled,
            interval,
            max_attempts,
            attempts: 0,
            state: ReconnectState::Idle,
        }
    }

    /// Builds a policy from the reconnect fields of a capture config.
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(
            config.auto_reconnect,
            config.reconnect_interval,
            config.max_reconnect_attempts,
        )
    }

    /// Starts the next attempt, returning its 1-based number.
    pub fn begin_attempt(&mut self) -> Result<u32, ReconnectError> {
        if !self.enabled || self.attempts >= self.max_attempts {
            return Err(self.exhaust());
        }

        self.attempts += 1;
        self.state = ReconnectState::Backoff;
        Ok(self.attempts)
    }

    /// Records a failed attempt.
    pub fn record_failure(&mut self) -> Result<(), ReconnectError> {
        if self.attempts >= self.max_attempts {
            return Err(self.exhaust());
        }
        self.state = ReconnectState::Backoff;
        Ok(())
    }

    /// Records a successful reconnect.
    pub fn record_success(&mut self) {
        if self.attempts > 0 {
            tracing::debug!(attempts = self.attempts, "Reconnect policy reset after success");
        }
        self.attempts = 0;
        self.state = ReconnectState::Idle;
    }

    /// Returns the policy to its initial state.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.state = ReconnectState::Idle;
    }

    fn exhaust(&mut self) -> ReconnectError {
        if self.state != ReconnectState::Exhausted {
            tracing::error!(
                attempts = self.attempts,
                max_attempts = self.max_attempts,
                auto_reconnect = self.enabled,
                "Reconnect policy exhausted"
            );
        }
        self.state = ReconnectState::Exhausted;
        ReconnectError::Exhausted {
            attempts: self.attempts,
        }
    }

    /// Wait before each attempt.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Attempts made since the last successful connection.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Configured attempt ceiling.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Current position in the retry state machine.
    pub fn state(&self) -> ReconnectState {
        self.state
    }

    /// Returns true once the ceiling was reached without a success.
    pub fn is_exhausted(&self) -> bool {
        self.state == ReconnectState::Exhausted
    }
}
