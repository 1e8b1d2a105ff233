//! Cache (C8): tiered L1 in-process LRU + L2 durable KV, keyed by
//! per-keyspace generation so a Store mutation's generation bump
//! invalidates every entry written under the previous generation without
//! having to enumerate or delete them.

use crate::config::CacheConfig;
use crate::errors::Result;
use crate::store::Store;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use lru::LruCache;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// One of the four cacheable query families named in the component design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyspace {
    Search,
    Recommend,
    SkillDetail,
    Compare,
}

impl Keyspace {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Recommend => "recommend",
            Self::SkillDetail => "skill-detail",
            Self::Compare => "compare",
        }
    }

    fn ttl(self, config: &CacheConfig) -> std::time::Duration {
        match self {
            Self::Search => config.search_ttl,
            Self::Recommend => config.recommend_ttl,
            Self::SkillDetail => config.skill_detail_ttl,
            Self::Compare => config.compare_ttl,
        }
    }
}

struct L1Entry {
    value: Vec<u8>,
    generation: i64,
    expires_at: DateTime<Utc>,
}

/// L1, in-process, LRU-evicted. A production deployment shards one of
/// these per worker to avoid lock contention, per the component design's
/// "L1 may be sharded per worker" note; this struct is the per-shard unit.
struct L1Shard {
    entries: Mutex<LruCache<String, L1Entry>>,
}

impl L1Shard {
    fn new(capacity: usize) -> Self {
        Self { entries: Mutex::new(LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap())) }
    }
}

/// Tiered cache: L1 (this process) -> L2 (durable, via [`Store`]) -> origin.
/// A single-flight barrier per fingerprint ensures only one populator runs
/// concurrently for a given key; other readers await its result instead of
/// recomputing.
pub struct Cache {
    store: Arc<dyn Store>,
    config: CacheConfig,
    l1: HashMap<Keyspace, L1Shard>,
    inflight: Mutex<HashMap<String, Arc<Notify>>>,
}

impl Cache {
    pub fn new(store: Arc<dyn Store>, config: CacheConfig) -> Self {
        let mut l1 = HashMap::new();
        for ks in [Keyspace::Search, Keyspace::Recommend, Keyspace::SkillDetail, Keyspace::Compare] {
            l1.insert(ks, L1Shard::new(config.l1_max_entries));
        }
        Self { store, config, l1, inflight: Mutex::new(HashMap::new()) }
    }

    fn fingerprint(keyspace: Keyspace, key: &str) -> String {
        format!("{}:{}", keyspace.as_str(), key)
    }

    /// Reads through L1 then L2, comparing each against the keyspace's
    /// current generation. A stale generation is treated as a miss.
    async fn read(&self, keyspace: Keyspace, key: &str) -> Result<Option<Vec<u8>>> {
        let current_gen = self.store.cache_generation(keyspace.as_str()).await?;

        if let Some(shard) = self.l1.get(&keyspace) {
            let mut guard = shard.entries.lock().await;
            if let Some(entry) = guard.get(key) {
                if entry.generation == current_gen && entry.expires_at > Utc::now() {
                    return Ok(Some(entry.value.clone()));
                }
                guard.pop(key);
            }
        }

        if let Some((value, generation, expires_at)) = self.store.cache_get(keyspace.as_str(), key).await? {
            if generation == current_gen && expires_at > Utc::now() {
                self.write_l1(keyspace, key, &value, generation, expires_at).await;
                return Ok(Some(value));
            }
        }

        Ok(None)
    }

    async fn write_l1(&self, keyspace: Keyspace, key: &str, value: &[u8], generation: i64, expires_at: DateTime<Utc>) {
        if let Some(shard) = self.l1.get(&keyspace) {
            let mut guard = shard.entries.lock().await;
            guard.put(key.to_string(), L1Entry { value: value.to_vec(), generation, expires_at });
        }
    }

    async fn write_through(&self, keyspace: Keyspace, key: &str, value: &[u8]) -> Result<()> {
        let generation = self.store.cache_generation(keyspace.as_str()).await?;
        let expires_at = Utc::now() + ChronoDuration::from_std(keyspace.ttl(&self.config)).unwrap_or(ChronoDuration::seconds(0));
        self.store.cache_put(keyspace.as_str(), key, value, generation, expires_at).await?;
        self.write_l1(keyspace, key, value, generation, expires_at).await;
        Ok(())
    }

    /// Fetch from cache, populating on miss via `populate` under a
    /// single-flight barrier: concurrent callers for the same fingerprint
    /// await the first populator's result rather than racing to recompute.
    pub async fn get_or_populate<T, F, Fut>(&self, keyspace: Keyspace, key: &str, populate: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if let Some(bytes) = self.read(keyspace, key).await? {
            if let Ok(value) = serde_json::from_slice::<T>(&bytes) {
                return Ok(value);
            }
        }

        let fingerprint = Self::fingerprint(keyspace, key);
        let (notify, is_leader) = {
            let mut inflight = self.inflight.lock().await;
            if let Some(existing) = inflight.get(&fingerprint) {
                (Arc::clone(existing), false)
            } else {
                let notify = Arc::new(Notify::new());
                inflight.insert(fingerprint.clone(), Arc::clone(&notify));
                (notify, true)
            }
        };

        if !is_leader {
            notify.notified().await;
            if let Some(bytes) = self.read(keyspace, key).await? {
                if let Ok(value) = serde_json::from_slice::<T>(&bytes) {
                    return Ok(value);
                }
            }
            // Leader's populate failed or raced past us; fall through and
            // populate ourselves rather than returning nothing.
        }

        let result = populate().await;
        {
            let mut inflight = self.inflight.lock().await;
            inflight.remove(&fingerprint);
        }
        notify.notify_waiters();

        let value = result?;
        if let Ok(bytes) = serde_json::to_vec(&value) {
            let _ = self.write_through(keyspace, key, &bytes).await;
        }
        Ok(value)
    }
}
