use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const LOOKUP_TTL: Duration = Duration::from_secs(5 * 60);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    cached_at: Instant,
}

/// TTL cache for profile lookups. Expiry is checked on every read; the
/// periodic sweep only frees memory.
#[derive(Debug)]
pub struct LookupCache<V> {
    ttl: Duration,
    entries: HashMap<String, CacheEntry<V>>,
}

impl<V: Clone> LookupCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn key(platform: &str, profile_url: &str) -> String {
        format!("{}:{}", platform, profile_url.trim_end_matches('/'))
    }

    pub fn get(&self, key: &str, now: Instant) -> Option<V> {
        self.entries
            .get(key)
            .filter(|e| now.duration_since(e.cached_at) < self.ttl)
            .map(|e| e.value.clone())
    }

    pub fn insert(&mut self, key: String, value: V, now: Instant) {
        self.entries.insert(key, CacheEntry { value, cached_at: now });
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, e| now.duration_since(e.cached_at) < ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type SharedCache<V> = Arc<Mutex<LookupCache<V>>>;

/// Background task that sweeps `cache` every `every`.
pub fn spawn_sweeper<V>(cache: SharedCache<V>, every: Duration) -> JoinHandle<()>
where
    V: Clone + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = match cache.lock() {
                Ok(mut c) => c.sweep(Instant::now()),
                Err(_) => {
                    tracing::error!("lookup cache lock poisoned, sweeper exiting");
                    return;
                }
            };
            if removed > 0 {
                tracing::debug!(removed, "swept expired lookups");
            }
        }
    })
}
