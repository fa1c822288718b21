//! Generic single-flight + TTL cache: concurrent callers for the same key
//! share one in-flight fetch instead of stampeding the upstream, and a
//! stale value is served immediately while a background-free caller pays
//! for the refresh.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// `success_ttl` governs how long a value fetched via `Ok` is trusted;
/// `fail_ttl` governs how long a negative result is cached before retrying,
/// matching the oracle/route/sequencer caches' differing TTLs for
/// successes versus failures.
pub struct SingleFlightCache<K, V> {
    entries: DashMap<K, Entry<V>>,
    in_flight: DashMap<K, Arc<Mutex<()>>>,
    success_ttl: Duration,
    fail_ttl: Duration,
}

impl<K, V> SingleFlightCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(success_ttl: Duration, fail_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            success_ttl,
            fail_ttl,
        }
    }

    pub fn get_fresh(&self, key: &K) -> Option<V> {
        let entry = self.entries.get(key)?;
        if entry.expires_at > Instant::now() {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Returns a stale value even past expiry, for "serve stale on failure"
    /// fallback paths.
    pub fn get_stale(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|e| e.value.clone())
    }

    /// Runs `fetch` under a per-key lock so concurrent callers for the same
    /// key collapse into one upstream call. `fetch` returning `Err` caches
    /// nothing for `success_ttl` but records a short `fail_ttl` miss marker
    /// via `mark_failed`, which the caller is responsible for calling.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, E>>,
    {
        if let Some(v) = self.get_fresh(&key) {
            return Ok(v);
        }

        let lock = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(v) = self.get_fresh(&key) {
            return Ok(v);
        }

        let result = fetch().await;
        match &result {
            Ok(value) => {
                self.entries.insert(
                    key.clone(),
                    Entry {
                        value: value.clone(),
                        expires_at: Instant::now() + self.success_ttl,
                    },
                );
            }
            Err(_) => {
                self.mark_failed(&key);
            }
        }
        self.in_flight.remove(&key);
        result
    }

    /// Marks a key as recently-failed without overwriting any cached value's
    /// freshness deadline beyond the (short) failure TTL, so the next caller
    /// retries sooner than a successful fetch's TTL would allow but not on
    /// every single call.
    pub fn mark_failed(&self, key: &K) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = entry.expires_at.min(Instant::now() + self.fail_ttl);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_fetches_collapse_into_one_upstream_call() {
        let cache: Arc<SingleFlightCache<&str, u32>> =
            Arc::new(SingleFlightCache::new(Duration::from_secs(60), Duration::from_secs(1)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let calls = calls.clone();
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("k", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, ()>(7u32)
                    })
                    .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), Ok(7));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_value_short_circuits_fetch() {
        let cache: SingleFlightCache<&str, u32> =
            SingleFlightCache::new(Duration::from_secs(60), Duration::from_secs(1));
        let _: Result<u32, ()> = cache.get_or_fetch("k", || async { Ok(1) }).await;
        assert_eq!(cache.get_fresh(&"k"), Some(1));
    }
}
