//! Origin-keyed DPoP nonce cache
//!
//! Each origin (authorization server, every resource server) hands out its
//! own nonces, so entries are keyed strictly by `scheme://host[:port]` and
//! never read across origins. The cache is bounded: when full, the least
//! recently used origin is evicted. Losing an entry only costs one extra
//! nonce round-trip.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::debug;

/// Default number of origins remembered.
pub const DEFAULT_CAPACITY: usize = 64;

struct Entry {
    nonce: String,
    last_used: u64,
}

struct State {
    entries: HashMap<String, Entry>,
    clock: u64,
}

impl State {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Bounded LRU map from origin to the latest nonce it issued.
pub struct NonceCache {
    capacity: usize,
    state: Mutex<State>,
}

impl NonceCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A cache remembering at most `capacity` origins (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(State {
                entries: HashMap::new(),
                clock: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The nonce last seen from `origin`, marking it recently used.
    pub async fn get(&self, origin: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        let now = state.tick();
        state.entries.get_mut(origin).map(|entry| {
            entry.last_used = now;
            entry.nonce.clone()
        })
    }

    /// Record `nonce` for `origin`, evicting the least recently used origin
    /// when the cache is full.
    pub async fn insert(&self, origin: &str, nonce: String) {
        let mut state = self.state.lock().await;
        let now = state.tick();

        if let Some(entry) = state.entries.get_mut(origin) {
            entry.nonce = nonce;
            entry.last_used = now;
            return;
        }

        if state.entries.len() >= self.capacity {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(origin, _)| origin.clone());
            if let Some(oldest) = oldest {
                state.entries.remove(&oldest);
                debug!(origin = %oldest, "evicted dpop nonce");
            }
        }

        state.entries.insert(
            origin.to_string(),
            Entry {
                nonce,
                last_used: now,
            },
        );
    }

    pub async fn remove(&self, origin: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        state.entries.remove(origin).map(|entry| entry.nonce)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for NonceCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn origins_are_isolated() {
        let cache = NonceCache::new();
        cache.insert("https://auth.example.com", "auth-nonce".into()).await;
        cache.insert("https://api.example.com", "api-nonce".into()).await;

        assert_eq!(
            cache.get("https://auth.example.com").await.as_deref(),
            Some("auth-nonce")
        );
        assert_eq!(
            cache.get("https://api.example.com").await.as_deref(),
            Some("api-nonce")
        );
        assert_eq!(cache.get("https://other.example.com").await, None);
    }

    #[tokio::test]
    async fn insert_replaces_existing_nonce() {
        let cache = NonceCache::new();
        cache.insert("https://a.example.com", "n1".into()).await;
        cache.insert("https://a.example.com", "n2".into()).await;
        assert_eq!(cache.get("https://a.example.com").await.as_deref(), Some("n2"));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn least_recently_used_origin_is_evicted() {
        let cache = NonceCache::with_capacity(2);
        cache.insert("https://a.example.com", "a".into()).await;
        cache.insert("https://b.example.com", "b".into()).await;

        // Touch a so b becomes the eviction candidate
        cache.get("https://a.example.com").await;
        cache.insert("https://c.example.com", "c".into()).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("https://b.example.com").await, None);
        assert_eq!(cache.get("https://a.example.com").await.as_deref(), Some("a"));
        assert_eq!(cache.get("https://c.example.com").await.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn zero_capacity_is_clamped() {
        let cache = NonceCache::with_capacity(0);
        assert_eq!(cache.capacity(), 1);
        cache.insert("https://a.example.com", "a".into()).await;
        assert_eq!(cache.get("https://a.example.com").await.as_deref(), Some("a"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_origins_dont_clobber_each_other() {
        let cache = Arc::new(NonceCache::new());
        let mut handles = vec![];
        for i in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let origin = format!("https://host{i}.example.com");
                for round in 0..10 {
                    cache.insert(&origin, format!("{i}-{round}")).await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        for i in 0..16 {
            let origin = format!("https://host{i}.example.com");
            assert_eq!(cache.get(&origin).await, Some(format!("{i}-9")));
        }
    }
}
