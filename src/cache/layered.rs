//! Two-tier cache: external store first, in-process map as fallback
//!
//! Read path:  remote GET -> (miss or error) -> local map (lazy expiry).
//! Write path: remote SETEX (best effort, logged) + local insert (always).
//!
//! Both tiers share one TTL clock: the write timestamp is taken before the
//! remote write and used for the local entry, so the local tier never serves
//! a value after the store would have expired it.
//!
//! Lifecycle: construct -> `open()` (connect store, start sweep) -> `close()`.
//! The cache is an explicit service object passed by `Arc` to the scanner and
//! fee estimator.

use super::memory::MemoryCache;
use super::store::{CacheError, RedisStore, RemoteStore};
use crate::retry::{retry_with_backoff, RetryPolicy};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cache settings
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Remote store URL (`redis://...`). None = in-process only.
    pub store_url: Option<String>,
    /// Namespace prepended to every key
    pub key_prefix: String,
    /// In-process entry cap
    pub memory_capacity: usize,
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            store_url: None,
            key_prefix: "relayarb:".to_string(),
            memory_capacity: 10_000,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Two-tier TTL cache service
pub struct TwoTierCache {
    config: CacheConfig,
    remote: RwLock<Option<Arc<dyn RemoteStore>>>,
    local: Arc<MemoryCache>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl TwoTierCache {
    pub fn new(config: CacheConfig) -> Self {
        let local = Arc::new(MemoryCache::new(config.memory_capacity));
        Self {
            config,
            remote: RwLock::new(None),
            local,
            sweeper: Mutex::new(None),
        }
    }

    /// Build with an already-connected store (tests, custom backends)
    pub fn with_store(config: CacheConfig, store: Arc<dyn RemoteStore>) -> Self {
        let cache = Self::new(config);
        *cache.remote.write().unwrap_or_else(|e| e.into_inner()) = Some(store);
        cache
    }

    /// Connect the external store (if configured) and start the sweep task.
    /// A store that cannot be reached leaves the cache in local-only mode.
    pub async fn open(&self) {
        if self.remote_store().is_none() {
            if let Some(url) = self.config.store_url.clone() {
                let policy = RetryPolicy::new(3, Duration::from_millis(250));
                match retry_with_backoff("cache store connect", policy, || RedisStore::connect(&url)).await {
                    Ok(store) => {
                        info!("Cache store connected (prefix '{}')", self.config.key_prefix);
                        *self.remote.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(store));
                    }
                    Err(e) => {
                        warn!("Cache store unreachable, running in-process only: {}", e);
                    }
                }
            } else {
                info!("No cache store configured - in-process cache only");
            }
        }

        self.start_sweeper();
    }

    /// Stop the sweep task. Entries remain readable until dropped.
    pub fn close(&self) {
        let handle = self.sweeper.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
            info!("Cache closed ({} in-process entries)", self.local.len());
        }
    }

    pub fn is_open(&self) -> bool {
        self.sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn start_sweeper(&self) {
        let mut guard = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            return;
        }
        let local = Arc::clone(&self.local);
        let interval = self.config.sweep_interval;
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                let removed = local.sweep();
                if removed > 0 {
                    debug!("Cache sweep removed {} expired entries", removed);
                }
            }
        }));
    }

    fn remote_store(&self) -> Option<Arc<dyn RemoteStore>> {
        self.remote
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// Fetch and deserialize `key`. Absent on miss, expiry, or undecodable value.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let key = self.namespaced(key);

        if let Some(store) = self.remote_store() {
            match store.get(&key).await {
                Ok(Some(raw)) => match serde_json::from_str(&raw) {
                    Ok(value) => return Some(value),
                    Err(e) => warn!("Cache store value for {} undecodable: {}", key, e),
                },
                Ok(None) => {}
                Err(e) => debug!("Cache store GET {} failed, using local tier: {}", key, e),
            }
        }

        let raw = self.local.get(&key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Local cache value for {} undecodable: {}", key, e);
                self.local.remove(&key);
                None
            }
        }
    }

    /// Serialize and store `value` for `ttl_secs` seconds in both tiers
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Cache value for {} not serializable: {}", key, CacheError::from(e));
                return;
            }
        };
        let key = self.namespaced(key);
        let written_at = Instant::now();

        if let Some(store) = self.remote_store() {
            if let Err(e) = store.set_ex(&key, &raw, ttl_secs).await {
                warn!("Cache store SETEX {} failed (local only): {}", key, e);
            }
        }

        self.local
            .insert(&key, raw, written_at, Duration::from_secs(ttl_secs));
    }

    pub async fn delete(&self, key: &str) {
        let key = self.namespaced(key);
        if let Some(store) = self.remote_store() {
            if let Err(e) = store.del(&key).await {
                warn!("Cache store DEL {} failed: {}", key, e);
            }
        }
        self.local.remove(&key);
    }

    /// Delete every key under `prefix` (within this cache's namespace)
    pub async fn delete_pattern(&self, prefix: &str) {
        let prefix = self.namespaced(prefix);

        if let Some(store) = self.remote_store() {
            match store.keys(&format!("{}*", prefix)).await {
                Ok(keys) => {
                    for key in keys {
                        if let Err(e) = store.del(&key).await {
                            warn!("Cache store DEL {} failed: {}", key, e);
                        }
                    }
                }
                Err(e) => warn!("Cache store KEYS {}* failed: {}", prefix, e),
            }
        }

        let removed = self.local.remove_prefix(&prefix);
        debug!("Cache pattern delete {}*: {} local entries", prefix, removed);
    }

    /// In-process tier (sweep/introspection)
    pub fn local(&self) -> &MemoryCache {
        &self.local
    }
}

impl Drop for TwoTierCache {
    fn drop(&mut self) {
        if let Some(handle) = self
            .sweeper
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory stand-in for the external store with server-side TTL
    #[derive(Default)]
    struct FakeStore {
        data: Mutex<HashMap<String, (String, Instant, Duration)>>,
        down: AtomicBool,
    }

    impl FakeStore {
        fn check(&self) -> Result<(), CacheError> {
            if self.down.load(Ordering::SeqCst) {
                Err(CacheError::Unavailable("connection refused".to_string()))
            } else {
                Ok(())
            }
        }

        fn raw_contains(&self, key: &str) -> bool {
            let data = self.data.lock().unwrap();
            data.get(key)
                .map(|(_, at, ttl)| at.elapsed() <= *ttl)
                .unwrap_or(false)
        }
    }

    #[async_trait]
    impl RemoteStore for FakeStore {
        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            self.check()?;
            let mut data = self.data.lock().unwrap();
            match data.get(key) {
                Some((_, at, ttl)) if at.elapsed() > *ttl => {
                    data.remove(key);
                    Ok(None)
                }
                Some((v, _, _)) => Ok(Some(v.clone())),
                None => Ok(None),
            }
        }

        async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError> {
            self.check()?;
            self.data.lock().unwrap().insert(
                key.to_string(),
                (value.to_string(), Instant::now(), Duration::from_secs(ttl_secs)),
            );
            Ok(())
        }

        async fn del(&self, key: &str) -> Result<(), CacheError> {
            self.check()?;
            self.data.lock().unwrap().remove(key);
            Ok(())
        }

        async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
            self.check()?;
            let prefix = pattern.trim_end_matches('*');
            Ok(self
                .data
                .lock()
                .unwrap()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        }
    }

    fn test_config() -> CacheConfig {
        CacheConfig {
            key_prefix: "t:".to_string(),
            memory_capacity: 100,
            ..CacheConfig::default()
        }
    }

    #[tokio::test]
    async fn test_get_after_set_returns_value() {
        let store = Arc::new(FakeStore::default());
        let cache = TwoTierCache::with_store(test_config(), store.clone());

        cache.set("price:WETH", &3000.5f64, 30).await;

        assert_eq!(cache.get::<f64>("price:WETH").await, Some(3000.5));
        assert!(store.raw_contains("t:price:WETH"));
        assert!(cache.local().contains("t:price:WETH"));
    }

    #[tokio::test]
    async fn test_expired_entry_absent_in_both_tiers() {
        let store = Arc::new(FakeStore::default());
        let cache = TwoTierCache::with_store(test_config(), store.clone());

        cache.set("quote:x", &"payload".to_string(), 1).await;
        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(cache.get::<String>("quote:x").await, None);
        assert!(!store.raw_contains("t:quote:x"));
        assert!(!cache.local().contains("t:quote:x"));
    }

    #[tokio::test]
    async fn test_falls_back_to_local_when_store_down() {
        let store = Arc::new(FakeStore::default());
        let cache = TwoTierCache::with_store(test_config(), store.clone());

        cache.set("k", &7u32, 30).await;
        store.down.store(true, Ordering::SeqCst);

        assert_eq!(cache.get::<u32>("k").await, Some(7));

        // Writes while the store is down still land locally
        cache.set("k2", &8u32, 30).await;
        assert_eq!(cache.get::<u32>("k2").await, Some(8));
    }

    #[tokio::test]
    async fn test_local_only_cache() {
        let cache = TwoTierCache::new(test_config());
        cache.set("a", &1u8, 30).await;
        assert_eq!(cache.get::<u8>("a").await, Some(1));

        cache.delete("a").await;
        assert_eq!(cache.get::<u8>("a").await, None);
    }

    #[tokio::test]
    async fn test_delete_pattern_clears_both_tiers() {
        let store = Arc::new(FakeStore::default());
        let cache = TwoTierCache::with_store(test_config(), store.clone());

        cache.set("quote:1", &1u8, 30).await;
        cache.set("quote:2", &2u8, 30).await;
        cache.set("price:1", &3u8, 30).await;

        cache.delete_pattern("quote:").await;

        assert_eq!(cache.get::<u8>("quote:1").await, None);
        assert_eq!(cache.get::<u8>("quote:2").await, None);
        assert_eq!(cache.get::<u8>("price:1").await, Some(3));
        assert!(!store.raw_contains("t:quote:1"));
    }

    #[tokio::test]
    async fn test_open_and_close_lifecycle() {
        let cache = TwoTierCache::new(CacheConfig {
            sweep_interval: Duration::from_millis(10),
            ..test_config()
        });
        cache.open().await;
        assert!(cache.is_open());

        cache.set("short", &1u8, 0).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!cache.local().contains("t:short"));

        cache.close();
        assert!(!cache.is_open());
    }
}
