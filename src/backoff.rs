//! Request timing: exponential back-off and interval jitter.

use std::time::Duration;

use rand::Rng;

/// Silence, in multiples of the base timeout, tolerated before backing off.
const BACKOFF_GRACE_FACTOR: f64 = 3.0;
/// Maximum relative deviation applied by [`jittered`].
pub const JITTER_FRACTION: f64 = 0.2;

/// Minimum wait between two requests for the same data.
///
/// With back-off disabled there is no minimum. Otherwise, letting `k` be the
/// time since new data last arrived divided by `base`, the wait is `base`
/// while `k < 3` and `(k - 3)^2 * base` afterwards.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use dissemination::backoff::request_timeout;
///
/// let base = Duration::from_secs(1);
/// assert_eq!(request_timeout(false, base, Duration::from_secs(60)), Duration::ZERO);
/// assert_eq!(request_timeout(true, base, Duration::from_secs(2)), base);
/// assert_eq!(request_timeout(true, base, Duration::from_secs(5)), Duration::from_secs(4));
/// ```
#[must_use]
pub fn request_timeout(enabled: bool, base: Duration, since_new_data: Duration) -> Duration {
    if !enabled || base.is_zero() {
        return Duration::ZERO;
    }
    let factor = since_new_data.as_secs_f64() / base.as_secs_f64();
    if factor < BACKOFF_GRACE_FACTOR {
        return base;
    }
    let excess = factor - BACKOFF_GRACE_FACTOR;
    Duration::try_from_secs_f64(excess * excess * base.as_secs_f64()).unwrap_or(Duration::MAX)
}

/// `base` scaled by a uniformly drawn factor in `[0.8, 1.2]`.
pub fn jittered<R: Rng>(base: Duration, rng: &mut R) -> Duration {
    let factor = rng.gen_range((1.0 - JITTER_FRACTION)..=(1.0 + JITTER_FRACTION));
    base.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, 1_000)]
    #[case(2_999, 1_000)]
    #[case(3_000, 0)]
    #[case(4_000, 1_000)]
    #[case(6_000, 9_000)]
    fn backoff_grows_quadratically_after_grace(#[case] silent_ms: u64, #[case] expected_ms: u64) {
        let wait = request_timeout(
            true,
            Duration::from_secs(1),
            Duration::from_millis(silent_ms),
        );
        assert_eq!(wait.as_millis(), u128::from(expected_ms));
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let mut rng = StdRng::seed_from_u64(42);
        let base = Duration::from_secs(10);
        for _ in 0..1_000 {
            let wait = jittered(base, &mut rng);
            assert!(wait >= Duration::from_secs(8) && wait <= Duration::from_secs(12));
        }
    }

    #[test]
    fn jitter_is_reproducible_from_a_seed() {
        let base = Duration::from_millis(500);
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..5).map(|_| jittered(base, &mut rng)).collect::<Vec<_>>()
        };
        assert_eq!(draw(9), draw(9));
        assert_ne!(draw(9), draw(10));
    }
}
