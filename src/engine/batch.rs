use futures_util::stream::{self, StreamExt};
use std::fmt::Display;
use std::future::Future;

/// Run `task` over `items` with at most `limit` in flight, keeping input order.
///
/// Settle-all semantics: a failed item never cancels its siblings. Its slot
/// resolves to `None` and the error is logged.
pub async fn settle_all<I, T, E, F, Fut>(items: Vec<I>, limit: usize, task: F) -> Vec<Option<T>>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let limit = limit.max(1);
    stream::iter(items.into_iter().enumerate().map(|(index, item)| {
        let fut = task(item);
        async move {
            match fut.await {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(index, error = %e, "batch item failed");
                    None
                }
            }
        }
    }))
    .buffered(limit)
    .collect()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_failed_slot_is_isolated() {
        let items: Vec<usize> = (0..10).collect();
        let results = settle_all(items, 10, |i| async move {
            if i == 3 {
                Err(anyhow::anyhow!("item {} exploded", i))
            } else {
                Ok(i * 10)
            }
        })
        .await;

        assert_eq!(results.len(), 10);
        assert_eq!(results[3], None);
        for (i, r) in results.iter().enumerate() {
            if i != 3 {
                assert_eq!(*r, Some(i * 10));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let items: Vec<u64> = (0..25).collect();

        let results = settle_all(items, 4, |i| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10 + i % 3)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(i)
            }
        })
        .await;

        assert_eq!(results.len(), 25);
        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(results[24], Some(24));
    }
}
