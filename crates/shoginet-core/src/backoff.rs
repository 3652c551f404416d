use std::time::Duration;

use rand::Rng;

const MAX_FIXED_BACKOFF_SECS: f64 = 3.0;
const MAX_BACKOFF_SECS: f64 = 30.0;

/// A lazy, infinite sequence of non-negative sleep durations, used between
/// unsuccessful server interactions.
///
/// A fresh generator replaces the current one after any successful job
/// acquisition (see the worker's `run_inner`).
#[derive(Debug, Clone)]
pub enum Backoff {
    /// Uniform `[0, MAX_FIXED_BACKOFF]` jitter, recommended for move servers.
    Fixed,
    /// Jittered exponential backoff: starts at `b=1`, yields
    /// `0.5*b + 0.5*b*U(0,1)`, then grows `b` by 1 up to a 30s ceiling.
    Exponential {
        /// Current ceiling `b`, in seconds.
        b: f64,
    },
}

impl Backoff {
    /// A fresh exponential backoff generator (`b` starts at 1).
    pub fn exponential() -> Self {
        Backoff::Exponential { b: 1.0 }
    }

    /// A fresh fixed-jitter backoff generator.
    pub fn fixed() -> Self {
        Backoff::Fixed
    }

    /// Builds a fresh generator for the configured mode.
    pub fn new(fixed: bool) -> Self {
        if fixed {
            Self::fixed()
        } else {
            Self::exponential()
        }
    }

    /// Draws the next sleep duration, mutating internal state for
    /// exponential mode.
    pub fn next_duration(&mut self) -> Duration {
        let secs = match self {
            Backoff::Fixed => rand::thread_rng().gen::<f64>() * MAX_FIXED_BACKOFF_SECS,
            Backoff::Exponential { b } => {
                let value = 0.5 * *b + 0.5 * *b * rand::thread_rng().gen::<f64>();
                *b = (*b + 1.0).min(MAX_BACKOFF_SECS);
                value
            }
        };
        Duration::from_secs_f64(secs.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_mode_stays_within_bounds() {
        let mut b = Backoff::fixed();
        for _ in 0..1000 {
            let d = b.next_duration().as_secs_f64();
            assert!((0.0..=MAX_FIXED_BACKOFF_SECS).contains(&d));
        }
    }

    #[test]
    fn exponential_mode_stays_within_half_to_full_b_and_grows() {
        let mut b = Backoff::exponential();
        let mut expected_b = 1.0_f64;
        for k in 0..60 {
            let d = b.next_duration().as_secs_f64();
            assert!(
                d >= 0.5 * expected_b - 1e-9 && d <= expected_b + 1e-9,
                "k={k} d={d} expected_b={expected_b}"
            );
            expected_b = (expected_b + 1.0).min(MAX_BACKOFF_SECS);
            let Backoff::Exponential { b: actual } = &b else {
                unreachable!()
            };
            assert!((actual - expected_b).abs() < 1e-9);
        }
    }
}
