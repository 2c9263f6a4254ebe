//! Reconnect backoff policy.
//!
//! Delays grow by a jittered factor drawn uniformly from `[1.5, 2.0)` on every
//! step and are capped at a hard ceiling. Jitter keeps many clients that lost
//! the same server from reconnecting in lockstep.

use std::time::Duration;

use rand::Rng;

/// Lower bound of the per-step growth factor.
pub const MIN_GROWTH_FACTOR: f64 = 1.5;
/// Width of the jitter band added on top of [`MIN_GROWTH_FACTOR`].
pub const JITTER_SPAN: f64 = 0.5;

/// Computes the delay that follows `current`.
///
/// `jitter` is expected in `[0, 1)`; values outside that range are clamped so
/// the growth factor always stays within `[1.5, 2.0]`. The result never
/// exceeds `max`.
pub fn next_delay(current: Duration, max: Duration, jitter: f64) -> Duration {
    let jitter = if jitter.is_finite() {
        jitter.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let factor = MIN_GROWTH_FACTOR + jitter * JITTER_SPAN;
    let grown = Duration::try_from_secs_f64(current.as_secs_f64() * factor).unwrap_or(max);
    std::cmp::min(grown, max)
}

/// Bounds for reconnect delay growth.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
}

impl BackoffPolicy {
    /// Creates a policy. `max` is raised to `base` when configured below it.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: std::cmp::max(base, max),
        }
    }

    /// Delay a fresh session starts from.
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Hard ceiling for any delay.
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Returns a state positioned at the base delay.
    pub fn start(&self) -> BackoffState {
        BackoffState {
            policy: *self,
            current: self.base,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(
            crate::stream::client::StreamDefaults::BACKOFF_BASE,
            crate::stream::client::StreamDefaults::BACKOFF_MAX,
        )
    }
}

/// Mutable backoff position for one session.
///
/// `base <= current <= max` holds after every update.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BackoffState {
    policy: BackoffPolicy,
    current: Duration,
}

impl BackoffState {
    /// Current delay without advancing.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Policy this state was created from.
    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// Advances using a freshly drawn jitter and returns the new delay.
    pub fn advance(&mut self) -> Duration {
        let jitter = rand::thread_rng().gen::<f64>();
        self.advance_with_jitter(jitter)
    }

    /// Advances using the supplied jitter and returns the new delay.
    pub fn advance_with_jitter(&mut self, jitter: f64) -> Duration {
        let next = next_delay(self.current, self.policy.max, jitter);
        self.current = std::cmp::max(next, self.policy.base);
        self.current
    }

    /// Returns to the base delay after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.policy.base;
    }

    /// True when the delay has reached the ceiling.
    pub fn is_saturated(&self) -> bool {
        self.current >= self.policy.max
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::Rng;

    use super::{next_delay, BackoffPolicy};

    #[test]
    fn next_delay_stays_within_jitter_band() {
        let current = Duration::from_secs(3);
        let max = Duration::from_secs(30);
        let mut rng = rand::thread_rng();

        for _ in 0..1000 {
            let delay = next_delay(current, max, rng.gen::<f64>());
            assert!(delay >= Duration::from_millis(4500), "{delay:?} below band");
            assert!(delay <= Duration::from_secs(6), "{delay:?} above band");
        }
    }

    #[test]
    fn next_delay_uses_factor_extremes() {
        let current = Duration::from_secs(4);
        let max = Duration::from_secs(30);
        assert_eq!(next_delay(current, max, 0.0), Duration::from_secs(6));
        assert_eq!(next_delay(current, max, 1.0), Duration::from_secs(8));
    }

    #[test]
    fn next_delay_clamps_out_of_range_jitter() {
        let current = Duration::from_secs(2);
        let max = Duration::from_secs(30);
        assert_eq!(next_delay(current, max, -3.0), Duration::from_secs(3));
        assert_eq!(next_delay(current, max, 7.0), Duration::from_secs(4));
        assert_eq!(next_delay(current, max, f64::NAN), Duration::from_secs(3));
    }

    #[test]
    fn next_delay_is_capped() {
        let max = Duration::from_secs(30);
        assert_eq!(next_delay(Duration::from_secs(25), max, 0.5), max);
        assert_eq!(next_delay(max, max, 0.99), max);
    }

    #[test]
    fn repeated_advance_converges_to_ceiling_and_stays() {
        let policy = BackoffPolicy::new(Duration::from_secs(3), Duration::from_secs(30));
        let mut state = policy.start();
        let mut previous = state.current();
        let mut steps = 0;

        while !state.is_saturated() {
            let delay = state.advance();
            assert!(delay >= previous);
            assert!(delay <= policy.max());
            previous = delay;
            steps += 1;
            assert!(steps <= 7, "3s * 1.5^6 already exceeds 30s");
        }

        for _ in 0..10 {
            assert_eq!(state.advance(), policy.max());
        }
    }

    #[test]
    fn reset_returns_to_base() {
        let policy = BackoffPolicy::new(Duration::from_secs(3), Duration::from_secs(30));
        let mut state = policy.start();
        state.advance_with_jitter(0.9);
        state.advance_with_jitter(0.9);
        assert!(state.current() > policy.base());

        state.reset();
        assert_eq!(state.current(), policy.base());
    }

    #[test]
    fn policy_raises_max_to_base() {
        let policy = BackoffPolicy::new(Duration::from_secs(10), Duration::from_secs(2));
        assert_eq!(policy.max(), Duration::from_secs(10));

        let mut state = policy.start();
        assert_eq!(state.advance_with_jitter(0.5), Duration::from_secs(10));
    }
}
