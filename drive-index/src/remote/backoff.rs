use rand::Rng;
use std::time::Duration;

/// Exponential delay `base * 2^(attempt - 1)` clamped to `[min, max]`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    min: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, min: Duration, max: Duration, jitter: bool) -> Self {
        Self {
            base,
            min: min.min(max),
            max,
            jitter,
        }
    }

    /// `attempt` is 1-based: the delay after the first failed try is `delay(1)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let min_ms = self.min.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let shift = attempt.saturating_sub(1).min(16);
        let exp = base_ms.saturating_mul(1u64 << shift).clamp(min_ms, max_ms);
        let delay_ms = if self.jitter {
            rng.gen_range(min_ms..=exp)
        } else {
            exp
        };
        Duration::from_millis(delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn delay_is_clamped_between_bounds() {
        let backoff = Backoff::new(
            Duration::from_secs(1),
            Duration::from_secs(4),
            Duration::from_secs(10),
            false,
        );
        let mut rng = StdRng::seed_from_u64(1);
        let delays: Vec<_> = (1..=5)
            .map(|attempt| backoff.delay_with_rng(attempt, &mut rng).as_secs())
            .collect();
        assert_eq!(delays, vec![4, 4, 4, 8, 10]);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let backoff = Backoff::new(
            Duration::from_millis(100),
            Duration::from_millis(400),
            Duration::from_millis(800),
            true,
        );
        let mut rng = StdRng::seed_from_u64(42);
        for attempt in 1..8 {
            let delay = backoff.delay_with_rng(attempt, &mut rng);
            assert!(delay >= Duration::from_millis(400));
            assert!(delay <= Duration::from_millis(800));
        }
    }
}
