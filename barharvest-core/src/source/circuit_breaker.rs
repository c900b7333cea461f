//! Circuit breaker for an unreachable or overloaded data source.
//!
//! After a run of consecutive transient failures the breaker opens and every
//! request is refused until the cooldown elapses. Queued jobs then fail fast
//! instead of each waiting out its own timeout.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Requests are allowed.
    Closed { consecutive_failures: u32 },
    /// Requests are refused until the cooldown expires.
    Open { tripped_at: Instant },
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    cooldown: Duration,
    failure_threshold: u32,
}

impl CircuitBreaker {
    /// Trip after `failure_threshold` consecutive failures (at least 1) and
    /// stay open for `cooldown`.
    pub fn new(cooldown: Duration, failure_threshold: u32) -> Self {
        Self {
            state: Mutex::new(BreakerState::Closed {
                consecutive_failures: 0,
            }),
            cooldown,
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// 60-second cooldown, trips after 5 consecutive failures.
    pub fn default_source() -> Self {
        Self::new(Duration::from_secs(60), 5)
    }

    // A panic while holding the lock cannot leave the state inconsistent.
    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a request may go out. An expired cooldown closes the breaker.
    pub fn is_allowed(&self) -> bool {
        let mut state = self.lock();
        match *state {
            BreakerState::Closed { .. } => true,
            BreakerState::Open { tripped_at } => {
                if tripped_at.elapsed() >= self.cooldown {
                    *state = BreakerState::Closed {
                        consecutive_failures: 0,
                    };
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        *self.lock() = BreakerState::Closed {
            consecutive_failures: 0,
        };
    }

    pub fn record_failure(&self) {
        let mut state = self.lock();
        if let BreakerState::Closed {
            consecutive_failures,
        } = *state
        {
            let failures = consecutive_failures + 1;
            *state = if failures >= self.failure_threshold {
                BreakerState::Open {
                    tripped_at: Instant::now(),
                }
            } else {
                BreakerState::Closed {
                    consecutive_failures: failures,
                }
            };
        }
    }

    /// Open immediately, e.g. on an authentication rejection.
    pub fn trip(&self) {
        *self.lock() = BreakerState::Open {
            tripped_at: Instant::now(),
        };
    }

    /// Zero when closed.
    pub fn remaining_cooldown(&self) -> Duration {
        match *self.lock() {
            BreakerState::Closed { .. } => Duration::ZERO,
            BreakerState::Open { tripped_at } => self.cooldown.saturating_sub(tripped_at.elapsed()),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::default_source()
    }
}
