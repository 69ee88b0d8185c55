//! Retry ceiling and requeue strategy

use crate::config::MAX_RETRIES;
use crate::error::QueueError;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Outcome for a failed delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return the message to the queue
    Requeue,
    /// Reject without requeue (dropped, or routed to the DLX)
    DeadLetter,
}

/// Bounded retry based on the `x-retry-count` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// `retry_count < max_retries` requeues, anything else dead-letters.
    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        if retry_count < self.max_retries {
            RetryDecision::Requeue
        } else {
            RetryDecision::DeadLetter
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_RETRIES)
    }
}

/// How a requeue is carried out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequeueMode {
    /// `basic.nack(requeue = true)`; the broker redelivers the same message
    #[default]
    Nack,
    /// Publish a copy with `x-retry-count + 1`, then ack the original
    Republish,
}

impl RequeueMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequeueMode::Nack => "nack",
            RequeueMode::Republish => "republish",
        }
    }
}

impl fmt::Display for RequeueMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequeueMode {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nack" => Ok(RequeueMode::Nack),
            "republish" => Ok(RequeueMode::Republish),
            other => Err(QueueError::Config(format!("unknown requeue mode '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requeue_below_ceiling() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.decide(0), RetryDecision::Requeue);
        assert_eq!(policy.decide(1), RetryDecision::Requeue);
        assert_eq!(policy.decide(MAX_RETRIES - 1), RetryDecision::Requeue);
    }

    #[test]
    fn test_dead_letter_at_or_above_ceiling() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(MAX_RETRIES), RetryDecision::DeadLetter);
        assert_eq!(policy.decide(MAX_RETRIES + 5), RetryDecision::DeadLetter);
    }

    #[test]
    fn test_zero_retries_dead_letters_immediately() {
        assert_eq!(RetryPolicy::new(0).decide(0), RetryDecision::DeadLetter);
    }

    #[test]
    fn test_requeue_mode_parse() {
        assert_eq!("nack".parse::<RequeueMode>().unwrap(), RequeueMode::Nack);
        assert_eq!(" Republish ".parse::<RequeueMode>().unwrap(), RequeueMode::Republish);
        assert!("drop".parse::<RequeueMode>().is_err());
        assert_eq!(RequeueMode::default(), RequeueMode::Nack);
    }
}
