use rand::Rng;
use std::time::Duration;

/// Relative spread applied around the base delay when jitter is on.
pub const DEFAULT_JITTER_SPREAD: f64 = 0.35;

/// Inter-comment pacing. With jitter, each delay is drawn uniformly from
/// `[base * (1 - spread), base * (1 + spread)]` so consecutive comments never
/// land on a fixed interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacing {
    base: Duration,
    spread: Option<f64>,
}

impl Pacing {
    pub fn fixed(base: Duration) -> Self {
        Self { base, spread: None }
    }

    pub fn jittered(base: Duration, spread: f64) -> Self {
        Self {
            base,
            spread: Some(spread.clamp(0.0, 0.95)),
        }
    }

    pub fn from_run(comment_delay_ms: u64, authenticity_boost: bool) -> Self {
        let base = Duration::from_millis(comment_delay_ms);
        if authenticity_boost {
            Self::jittered(base, DEFAULT_JITTER_SPREAD)
        } else {
            Self::fixed(base)
        }
    }

    pub fn next_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        match self.spread {
            None => self.base,
            Some(spread) if spread == 0.0 || self.base.is_zero() => self.base,
            Some(spread) => {
                let factor = rng.gen_range((1.0 - spread)..=(1.0 + spread));
                self.base.mul_f64(factor)
            }
        }
    }

    pub fn bounds(&self) -> (Duration, Duration) {
        match self.spread {
            None => (self.base, self.base),
            Some(spread) => (self.base.mul_f64(1.0 - spread), self.base.mul_f64(1.0 + spread)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_fixed_delay_is_constant() {
        let pacing = Pacing::from_run(30_000, false);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10 {
            assert_eq!(pacing.next_delay(&mut rng), Duration::from_secs(30));
        }
    }

    #[test]
    fn test_jitter_stays_in_bounds_and_varies() {
        let pacing = Pacing::from_run(30_000, true);
        let (lo, hi) = pacing.bounds();
        let mut rng = StdRng::seed_from_u64(42);
        let delays: Vec<Duration> = (0..50).map(|_| pacing.next_delay(&mut rng)).collect();
        assert!(delays.iter().all(|d| *d >= lo && *d <= hi));
        let first = delays[0];
        assert!(delays.iter().any(|d| *d != first), "jitter should vary the delay");
    }

    #[test]
    fn test_zero_base_never_panics() {
        let pacing = Pacing::jittered(Duration::ZERO, 0.5);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(pacing.next_delay(&mut rng), Duration::ZERO);
    }
}
