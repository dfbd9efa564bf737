//! # Jitter for restart delays.
//!
//! [`JitterPolicy`] spreads restarts of workers that crashed together (e.g. after the
//! coordinator went away) so they do not all come back in the same instant.
//!
//! - [`JitterPolicy::None`]: exact delay
//! - [`JitterPolicy::Full`]: random delay in `[0, delay]`
//! - [`JitterPolicy::Equal`]: `delay/2 + random[0, delay/2]`

use std::str::FromStr;
use std::time::Duration;

use rand::Rng;

/// Randomization applied to a computed restart delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// No jitter: predictable delays (default).
    #[default]
    None,
    /// Random delay in `[0, delay]`.
    Full,
    /// `delay/2 + random[0, delay/2]`; keeps at least half of the backoff.
    Equal,
}

impl JitterPolicy {
    /// Applies jitter to the given delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        let ms = delay.as_millis().min(u128::from(u64::MAX)) as u64;
        if ms == 0 {
            return delay;
        }
        let mut rng = rand::rng();
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => Duration::from_millis(rng.random_range(0..=ms)),
            JitterPolicy::Equal => {
                let half = ms / 2;
                Duration::from_millis(half + rng.random_range(0..=ms - half))
            }
        }
    }
}

impl FromStr for JitterPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(JitterPolicy::None),
            "full" => Ok(JitterPolicy::Full),
            "equal" => Ok(JitterPolicy::Equal),
            other => Err(format!("unknown jitter policy {other:?} (expected none, full or equal)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_jitter_never_exceeds_delay() {
        for _ in 0..200 {
            assert!(JitterPolicy::Full.apply(Duration::from_millis(300)) <= Duration::from_millis(300));
        }
    }

    #[test]
    fn zero_delay_stays_zero() {
        assert_eq!(JitterPolicy::Equal.apply(Duration::ZERO), Duration::ZERO);
        assert_eq!(JitterPolicy::Full.apply(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("Equal".parse::<JitterPolicy>(), Ok(JitterPolicy::Equal));
        assert_eq!("".parse::<JitterPolicy>(), Ok(JitterPolicy::None));
        assert!("decorrelated".parse::<JitterPolicy>().is_err());
    }
}
