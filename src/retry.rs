//! Bounded retry with backoff.
//!
//! [`RetryPolicy`] is shared by the loader (per batch) and by extraction (per
//! source unit). The operation receives the 1-based attempt number; errors
//! report through [`Transient`] whether another attempt is worthwhile.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;

/// Largest exponent applied to an exponential backoff base.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Classifies an error as worth retrying.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Wait `base_seconds` before every retry.
    Fixed { base_seconds: f64 },
    /// Wait `base_seconds * 2^(n-1)` before the n-th retry.
    Exponential { base_seconds: f64 },
}

impl Backoff {
    #[must_use]
    pub const fn base_seconds(&self) -> f64 {
        match self {
            Self::Fixed { base_seconds } | Self::Exponential { base_seconds } => *base_seconds,
        }
    }

    /// A backoff that never sleeps, for tests and dry runs.
    #[must_use]
    pub const fn none() -> Self {
        Self::Fixed { base_seconds: 0.0 }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential { base_seconds: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

/// Outcome of [`RetryPolicy::attempt`].
#[derive(Debug)]
pub struct Attempted<T, E> {
    pub result: Result<T, E>,
    /// Attempts actually made, at least 1.
    pub attempts: u32,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Policy used for source extraction: `2^(attempt-1)` seconds between
    /// attempts.
    #[must_use]
    pub const fn source_default(max_attempts: u32) -> Self {
        Self::new(max_attempts, Backoff::Exponential { base_seconds: 1.0 })
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let secs = match self.backoff {
            Backoff::Fixed { base_seconds } => base_seconds,
            Backoff::Exponential { base_seconds } => {
                let exp = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
                base_seconds * f64::from(1_u32 << exp)
            }
        };
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or
    /// `max_attempts` attempts have been made. Sleeps between attempts.
    pub fn attempt<T, E, F>(&self, label: &str, mut op: F) -> Attempted<T, E>
    where
        E: Transient + Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(err) => {
                    if !err.is_transient() || attempt >= max {
                        return Attempted {
                            result: Err(err),
                            attempts: attempt,
                        };
                    }
                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        op = label,
                        attempt,
                        max_attempts = max,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "attempt failed, retrying"
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Flaky(bool);

    impl fmt::Display for Flaky {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "flaky(transient={})", self.0)
        }
    }

    impl Transient for Flaky {
        fn is_transient(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn exponential_delays_double() {
        let p = RetryPolicy::source_default(4);
        assert_eq!(p.delay_after(1), Duration::from_secs(1));
        assert_eq!(p.delay_after(2), Duration::from_secs(2));
        assert_eq!(p.delay_after(3), Duration::from_secs(4));
    }

    #[test]
    fn fixed_delay_is_constant() {
        let p = RetryPolicy::new(3, Backoff::Fixed { base_seconds: 0.5 });
        assert_eq!(p.delay_after(1), Duration::from_millis(500));
        assert_eq!(p.delay_after(7), Duration::from_millis(500));
    }

    #[test]
    fn stops_after_max_attempts() {
        let p = RetryPolicy::new(3, Backoff::none());
        let mut calls = 0;
        let out: Attempted<(), Flaky> = p.attempt("test", |_| {
            calls += 1;
            Err(Flaky(true))
        });
        assert!(out.result.is_err());
        assert_eq!(out.attempts, 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn permanent_error_stops_early() {
        let p = RetryPolicy::new(5, Backoff::none());
        let out: Attempted<(), Flaky> = p.attempt("test", |_| Err(Flaky(false)));
        assert_eq!(out.attempts, 1);
    }

    #[test]
    fn succeeds_on_later_attempt() {
        let p = RetryPolicy::new(3, Backoff::none());
        let out: Attempted<u32, Flaky> =
            p.attempt("test", |n| if n < 2 { Err(Flaky(true)) } else { Ok(n) });
        assert_eq!(out.result.unwrap(), 2);
        assert_eq!(out.attempts, 2);
    }
}
