//! Spreads one platform's due monitors across a time window.
//!
//! The delay is a scheduling hint awaited before each monitor's fetch, not a
//! lock: monitors still process concurrently once their delay has elapsed.

use std::time::Duration;

use rand::Rng;

/// Batches of this size or smaller are not staggered at all.
pub const STAGGER_MIN_BATCH: usize = 3;

/// Deterministic part of the delay: `floor(index * window / total)`.
///
/// Returns zero for `index == 0` and whenever `total <= STAGGER_MIN_BATCH`.
#[must_use]
pub fn base_stagger_delay(index: usize, total: usize, window: Duration) -> Duration {
    if total <= STAGGER_MIN_BATCH || index == 0 {
        return Duration::ZERO;
    }
    let window_ms = window.as_millis();
    let delay_ms = (index as u128 * window_ms) / total as u128;
    Duration::from_millis(u64::try_from(delay_ms).unwrap_or(u64::MAX))
}

/// Base delay plus up to `±jitter_ratio` of it, floored to whole
/// milliseconds. Never negative; index 0 always yields zero.
#[must_use]
pub fn stagger_delay<R: Rng + ?Sized>(
    index: usize,
    total: usize,
    window: Duration,
    jitter_ratio: f64,
    rng: &mut R,
) -> Duration {
    let base = base_stagger_delay(index, total, window);
    if base.is_zero() || jitter_ratio <= 0.0 {
        return base;
    }

    #[allow(clippy::cast_precision_loss)]
    let base_ms = base.as_millis() as f64;
    let spread = base_ms * jitter_ratio.min(1.0);
    let jitter = rng.random_range(-spread..=spread);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let delay_ms = (base_ms + jitter).floor().max(0.0) as u64;
    Duration::from_millis(delay_ms)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    const WINDOW: Duration = Duration::from_secs(300);

    #[test]
    fn first_index_is_always_zero() {
        for total in [1, 2, 3, 4, 10, 500] {
            assert_eq!(base_stagger_delay(0, total, WINDOW), Duration::ZERO);
        }
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(stagger_delay(0, 40, WINDOW, 0.1, &mut rng), Duration::ZERO);
    }

    #[test]
    fn small_batches_are_not_staggered() {
        for total in 1..=STAGGER_MIN_BATCH {
            for index in 0..total {
                assert_eq!(base_stagger_delay(index, total, WINDOW), Duration::ZERO);
            }
        }
        assert!(base_stagger_delay(1, STAGGER_MIN_BATCH + 1, WINDOW) > Duration::ZERO);
    }

    #[test]
    fn base_delay_is_strictly_increasing() {
        let total = 25;
        let delays: Vec<Duration> = (0..total)
            .map(|i| base_stagger_delay(i, total, WINDOW))
            .collect();
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
        assert!(delays[total - 1] < WINDOW);
    }

    #[test]
    fn base_delay_is_floored() {
        // 1 * 10_000ms / 3 would be 3333.33 but three is below the batch floor,
        // so use seven: 10_000 / 7 = 1428.57.
        let delay = base_stagger_delay(1, 7, Duration::from_secs(10));
        assert_eq!(delay, Duration::from_millis(1428));
    }

    #[test]
    fn jitter_stays_within_ratio() {
        let mut rng = StdRng::seed_from_u64(42);
        for index in 1..20 {
            let base = base_stagger_delay(index, 20, WINDOW).as_millis();
            let jittered = stagger_delay(index, 20, WINDOW, 0.1, &mut rng).as_millis();
            let low = base - base / 10 - 1;
            let high = base + base / 10 + 1;
            assert!(
                (low..=high).contains(&jittered),
                "index {index}: {jittered} outside {low}..={high}"
            );
        }
    }

    #[test]
    fn zero_ratio_disables_jitter() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            stagger_delay(5, 10, WINDOW, 0.0, &mut rng),
            base_stagger_delay(5, 10, WINDOW)
        );
    }
}
