//! Reconnection supervision: exponential backoff with jitter and a
//! hard attempt cap.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tracing::{info, warn};

/// Backoff tuning for reconnection.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectPolicy {
    /// First-retry delay, milliseconds.
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    /// Upper bound on any single delay, milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Uniform random jitter added on top of each delay, milliseconds.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    /// Attempts allowed before the session fails terminally.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_ms() -> u64 {
    800
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_ms() -> u64 {
    250
}

fn default_max_attempts() -> u32 {
    8
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectPolicy {
    /// Deterministic delay for an attempt number: `min(max, base ·
    /// 2^(attempt−1))`, attempt 0 meaning "no delay". Jitter is added
    /// separately when scheduling.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }
        let exponent = attempt.saturating_sub(1).min(16);
        let multiplier = 1u64 << exponent;
        let delay_ms = self.base_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Tracks reconnect attempts for one session.
///
/// The counter resets to zero on any successful reconnection, so a
/// later outage starts over from the base delay.
#[derive(Debug)]
pub struct ReconnectionController {
    policy: ReconnectPolicy,
    attempts: u32,
    last_error: Option<String>,
}

impl ReconnectionController {
    /// Creates a controller with the given policy.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            last_error: None,
        }
    }

    /// Registers a failure and schedules the next attempt.
    ///
    /// Returns the delay to wait (backoff plus jitter), or `None` when
    /// the attempt cap is exhausted — a terminal, reportable failure,
    /// never a silent retry.
    pub fn next_attempt(&mut self, error: impl Into<String>) -> Option<Duration> {
        let error = error.into();
        self.attempts += 1;
        self.last_error = Some(error.clone());

        if self.attempts > self.policy.max_attempts {
            warn!(
                attempts = self.attempts - 1,
                error = %error,
                "reconnect attempts exhausted"
            );
            return None;
        }

        let base = self.policy.delay_for(self.attempts);
        let jitter = if self.policy.jitter_ms == 0 {
            Duration::from_millis(0)
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=self.policy.jitter_ms))
        };
        let delay = base + jitter;
        info!(
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "scheduling reconnect"
        );
        Some(delay)
    }

    /// Clears the counter after a successful reconnection.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_error = None;
    }

    /// Attempts registered since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The most recent failure, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            base_ms: 800,
            max_delay_ms: 30_000,
            jitter_ms: 0,
            max_attempts: 8,
        }
    }

    #[test]
    fn delays_are_non_decreasing_up_to_the_cap() {
        let policy = no_jitter_policy();
        let mut previous = Duration::from_millis(0);
        for attempt in 1..=12 {
            let delay = policy.delay_for(attempt);
            assert!(
                delay >= previous,
                "attempt {attempt} delay {delay:?} < previous {previous:?}"
            );
            assert!(delay <= Duration::from_millis(policy.max_delay_ms));
            previous = delay;
        }
        assert_eq!(policy.delay_for(12), Duration::from_millis(30_000));
    }

    #[test]
    fn delay_doubles_from_the_base() {
        let policy = no_jitter_policy();
        assert_eq!(policy.delay_for(1), Duration::from_millis(800));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1_600));
        assert_eq!(policy.delay_for(3), Duration::from_millis(3_200));
    }

    #[test]
    fn controller_exhausts_after_max_attempts() {
        let mut controller = ReconnectionController::new(ReconnectPolicy {
            max_attempts: 3,
            jitter_ms: 0,
            ..no_jitter_policy()
        });
        assert!(controller.next_attempt("drop 1").is_some());
        assert!(controller.next_attempt("drop 2").is_some());
        assert!(controller.next_attempt("drop 3").is_some());
        assert!(controller.next_attempt("drop 4").is_none());
        assert_eq!(controller.last_error(), Some("drop 4"));
    }

    #[test]
    fn reset_returns_to_the_base_delay() {
        let mut controller = ReconnectionController::new(no_jitter_policy());
        controller.next_attempt("a");
        controller.next_attempt("b");
        assert_eq!(controller.attempts(), 2);

        controller.reset();
        assert_eq!(controller.attempts(), 0);
        assert_eq!(controller.last_error(), None);
        let delay = controller.next_attempt("c").unwrap();
        assert_eq!(delay, Duration::from_millis(800));
    }

    #[test]
    fn jitter_stays_within_its_bound() {
        let policy = ReconnectPolicy {
            jitter_ms: 100,
            ..no_jitter_policy()
        };
        let mut controller = ReconnectionController::new(policy);
        for _ in 0..20 {
            controller.reset();
            let delay = controller.next_attempt("x").unwrap();
            assert!(delay >= Duration::from_millis(800));
            assert!(delay <= Duration::from_millis(900));
        }
    }
}
