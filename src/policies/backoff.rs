//! # Crash-restart backoff.
//!
//! [`RestartBackoff`] decides how long a crashed worker waits before it is started again.
//! It is parameterized by:
//! - [`RestartBackoff::base`] the delay after an isolated crash;
//! - [`RestartBackoff::factor`] the growth factor applied per consecutive fast crash;
//! - [`RestartBackoff::max`] the delay cap;
//! - [`RestartBackoff::min_uptime`] how long a worker must stay up for its crash streak to reset.
//!
//! The supervisor keeps a per-worker *crash streak*. On every unexpected exit the streak is
//! reset to zero if the worker ran longer than `min_uptime`, otherwise it grows by one.
//! The delay for streak `n` is `base × factor^n`, clamped to `max`, then jittered.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use worker_manager::{JitterPolicy, RestartBackoff};
//!
//! let backoff = RestartBackoff {
//!     base: Duration::from_secs(1),
//!     max: Duration::from_secs(10),
//!     factor: 2.0,
//!     min_uptime: Duration::from_secs(5),
//!     jitter: JitterPolicy::None,
//! };
//!
//! // Crashed after a long run: streak resets, base delay.
//! let streak = backoff.next_streak(3, Duration::from_secs(60));
//! assert_eq!(streak, 0);
//! assert_eq!(backoff.delay(streak), Duration::from_secs(1));
//!
//! // Crashed right after start: streak grows, delay doubles.
//! let streak = backoff.next_streak(streak, Duration::from_millis(200));
//! assert_eq!(backoff.delay(streak), Duration::from_secs(2));
//!
//! // Far into a crash loop: capped.
//! assert_eq!(backoff.delay(12), Duration::from_secs(10));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Restart backoff for crashed workers.
#[derive(Clone, Copy, Debug)]
pub struct RestartBackoff {
    /// Delay used after a crash that followed a stable run.
    pub base: Duration,
    /// Maximum delay cap.
    pub max: Duration,
    /// Multiplicative growth per consecutive fast crash (`2.0` doubles).
    pub factor: f64,
    /// Uptime after which a crash no longer counts as part of a crash loop.
    pub min_uptime: Duration,
    /// Randomization applied to the computed delay.
    pub jitter: JitterPolicy,
}

impl Default for RestartBackoff {
    /// `base = 1s`, `max = 10s`, `factor = 2.0`, `min_uptime = 5s`, no jitter.
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(10),
            factor: 2.0,
            min_uptime: Duration::from_secs(5),
            jitter: JitterPolicy::None,
        }
    }
}

impl RestartBackoff {
    /// Returns the crash streak after an exit that followed `uptime` of running.
    ///
    /// A run strictly longer than [`RestartBackoff::min_uptime`] resets the streak.
    pub fn next_streak(&self, streak: u32, uptime: Duration) -> u32 {
        if uptime > self.min_uptime {
            0
        } else {
            streak.saturating_add(1)
        }
    }

    /// Computes the restart delay for the given crash streak.
    ///
    /// The base is derived from the streak alone, so jitter never feeds back into
    /// later delays.
    pub fn delay(&self, streak: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = streak.min(i32::MAX as u32) as i32;
        let unclamped = self.base.as_secs_f64() * self.factor.powi(exp);

        let delay = if !unclamped.is_finite() || unclamped < 0.0 || unclamped > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(unclamped)
        };
        self.jitter.apply(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> RestartBackoff {
        RestartBackoff {
            base: Duration::from_millis(100),
            max: Duration::from_secs(1),
            factor: 2.0,
            min_uptime: Duration::from_secs(5),
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn test_fast_crashes_double_the_delay() {
        let b = backoff();
        let mut streak = 0;
        let mut delays = Vec::new();
        for _ in 0..4 {
            streak = b.next_streak(streak, Duration::from_millis(50));
            delays.push(b.delay(streak));
        }
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_secs(1),
            ]
        );
    }

    #[test]
    fn test_stable_run_resets_to_base() {
        let b = backoff();
        let streak = b.next_streak(7, Duration::from_secs(6));
        assert_eq!(streak, 0);
        assert_eq!(b.delay(streak), Duration::from_millis(100));
    }

    #[test]
    fn test_uptime_equal_to_threshold_is_still_a_fast_crash() {
        let b = backoff();
        assert_eq!(b.next_streak(0, Duration::from_secs(5)), 1);
    }

    #[test]
    fn test_base_above_max_is_clamped() {
        let b = RestartBackoff {
            base: Duration::from_secs(30),
            ..backoff()
        };
        assert_eq!(b.delay(0), Duration::from_secs(1));
    }

    #[test]
    fn test_huge_streak_clamps_to_max() {
        let b = backoff();
        assert_eq!(b.delay(u32::MAX), Duration::from_secs(1));
        assert_eq!(b.next_streak(u32::MAX, Duration::ZERO), u32::MAX);
    }

    #[test]
    fn test_equal_jitter_stays_within_half_and_full_delay() {
        let b = RestartBackoff {
            jitter: JitterPolicy::Equal,
            ..backoff()
        };
        for streak in 0..6 {
            let full = backoff().delay(streak);
            let delay = b.delay(streak);
            assert!(delay >= full / 2, "streak {streak}: {delay:?} < half of {full:?}");
            assert!(delay <= full, "streak {streak}: {delay:?} > {full:?}");
        }
    }
}
