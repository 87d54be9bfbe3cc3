//! A TTL-bounded cache used as the write-through layer in front of entity
//! stores (C4).
//!
//! Generalized from the teacher's `r2e_cache::TtlCache`, which unconditionally
//! resets the entry's `Instant::now()` on every `insert`. This cache must not:
//! re-inserting an identical value must leave the existing expiry untouched,
//! so a caller repeatedly writing the same value back (e.g. a cache-aside
//! read-through) can't keep an entry perpetually warm.

use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// A key/value TTL cache with a background janitor sweeping expired entries.
///
/// The janitor task is tied to this value's lifetime: dropping the cache
/// cancels the token the janitor watches, so no orphaned task outlives its
/// owner. Grounded on the `CancellationToken`-on-shutdown idiom used for the
/// teacher's gRPC server lifecycle (`r2e_grpc::server::GrpcServer::install`).
pub struct TtlCache<K, V> {
    entries: Arc<DashMap<K, Entry<V>>>,
    ttl: Duration,
    janitor_cancel: CancellationToken,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(ttl: Duration, cleanup_interval: Duration) -> Self {
        let entries: Arc<DashMap<K, Entry<V>>> = Arc::new(DashMap::new());
        let janitor_cancel = CancellationToken::new();

        let janitor_entries = entries.clone();
        let janitor_token = janitor_cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cleanup_interval);
            loop {
                tokio::select! {
                    _ = janitor_token.cancelled() => break,
                    _ = interval.tick() => {
                        janitor_entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
                    }
                }
            }
        });

        Self {
            entries,
            ttl,
            janitor_cancel,
        }
    }

    /// Look up a key, returning `None` if absent or expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.entries.get(key)?;
        if entry.inserted_at.elapsed() >= self.ttl {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    /// Insert or update `key` -> `value`.
    ///
    /// If an unexpired entry already exists with an identical value, its
    /// `inserted_at` timestamp is left untouched — the TTL is not extended.
    /// Any other case (absent, expired, or a differing value) resets the
    /// timer, matching a fresh write from the backing store.
    pub fn insert(&self, key: K, value: V) {
        if let Some(mut existing) = self.entries.get_mut(&key) {
            let unexpired = existing.inserted_at.elapsed() < self.ttl;
            if unexpired && existing.value == value {
                return;
            }
        }
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn remove(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> Drop for TtlCache<K, V> {
    fn drop(&mut self) {
        self.janitor_cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_returns_inserted_value() {
        let cache: TtlCache<String, i32> = TtlCache::new(Duration::from_secs(60), Duration::from_secs(30));
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
    }

    #[tokio::test]
    async fn expired_entry_is_not_returned() {
        let cache: TtlCache<String, i32> =
            TtlCache::new(Duration::from_millis(10), Duration::from_secs(60));
        cache.insert("a".to_string(), 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get(&"a".to_string()), None);
    }

    #[tokio::test]
    async fn reinserting_identical_value_does_not_refresh_ttl() {
        let cache: TtlCache<String, i32> =
            TtlCache::new(Duration::from_millis(40), Duration::from_secs(60));
        cache.insert("a".to_string(), 1);
        tokio::time::sleep(Duration::from_millis(25)).await;
        cache.insert("a".to_string(), 1); // identical value, must not reset timer
        tokio::time::sleep(Duration::from_millis(25)).await;
        // 50ms elapsed since the *original* insert > 40ms ttl -> expired.
        assert_eq!(cache.get(&"a".to_string()), None);
    }

    #[tokio::test]
    async fn reinserting_different_value_refreshes_ttl() {
        let cache: TtlCache<String, i32> =
            TtlCache::new(Duration::from_millis(40), Duration::from_secs(60));
        cache.insert("a".to_string(), 1);
        tokio::time::sleep(Duration::from_millis(25)).await;
        cache.insert("a".to_string(), 2); // different value, resets timer
        tokio::time::sleep(Duration::from_millis(25)).await;
        // only 25ms since the refreshing write -> still alive.
        assert_eq!(cache.get(&"a".to_string()), Some(2));
    }

    #[tokio::test]
    async fn remove_evicts_entry() {
        let cache: TtlCache<String, i32> = TtlCache::new(Duration::from_secs(60), Duration::from_secs(30));
        cache.insert("a".to_string(), 1);
        cache.remove(&"a".to_string());
        assert_eq!(cache.get(&"a".to_string()), None);
    }

    #[tokio::test]
    async fn janitor_sweeps_expired_entries_in_background() {
        let cache: TtlCache<String, i32> =
            TtlCache::new(Duration::from_millis(10), Duration::from_millis(5));
        cache.insert("a".to_string(), 1);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.len(), 0);
    }
}
