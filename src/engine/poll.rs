use std::future::Future;
use std::time::Duration;

/// Fixed-interval, fixed-attempt polling schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSpec {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollSpec {
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self { interval, max_attempts }
    }

    /// Upper bound on how long a poll with this spec can take.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Result of a bounded poll. Callers decide whether a timeout is a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut,
}

impl<T> PollOutcome<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            PollOutcome::Ready(v) => Some(v),
            PollOutcome::TimedOut => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready(_))
    }
}

/// Run `probe` up to `spec.max_attempts` times, sleeping `spec.interval`
/// between attempts, until it yields `Some`.
///
/// The probe runs immediately on the first attempt; there is no trailing
/// sleep after the last miss.
pub async fn poll_until<T, F, Fut>(spec: PollSpec, mut probe: F) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 0..spec.max_attempts {
        if let Some(value) = probe().await {
            return PollOutcome::Ready(value);
        }
        if attempt + 1 < spec.max_attempts {
            tokio::time::sleep(spec.interval).await;
        }
    }
    PollOutcome::TimedOut
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_third_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let outcome = poll_until(PollSpec::new(Duration::from_millis(100), 15), move || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                (n == 3).then_some(n)
            }
        })
        .await;
        assert_eq!(outcome, PollOutcome::Ready(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let started = tokio::time::Instant::now();
        let outcome: PollOutcome<()> = poll_until(PollSpec::new(Duration::from_millis(100), 15), move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { None }
        })
        .await;
        assert_eq!(outcome, PollOutcome::TimedOut);
        assert_eq!(calls.load(Ordering::SeqCst), 15);
        assert_eq!(started.elapsed(), Duration::from_millis(1400));
    }

    #[test]
    fn test_budget() {
        let spec = PollSpec::new(Duration::from_millis(300), 10);
        assert_eq!(spec.budget(), Duration::from_secs(3));
    }
}
