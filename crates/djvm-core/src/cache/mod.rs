//! Named, thread-safe get-or-compute caches.
//!
//! Every cache has a name, checked by the [`NamedCacheFactory`] that decides
//! its capacity. A [`NamedCache`] populates each key at most once: concurrent
//! lookups of the same key wait for the first loader and then all receive the
//! same value.

pub mod metrics;

pub use metrics::{CacheMetrics, MetricsSnapshot};

use crate::errors::CacheError;
use crate::well_known::caches;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use tracing::trace;

/// Capacity of one named cache. `None` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheConfig {
    pub max_entries: Option<u64>,
}

impl CacheConfig {
    pub fn bounded(max_entries: u64) -> Self {
        Self {
            max_entries: Some(max_entries),
        }
    }

    pub fn unbounded() -> Self {
        Self { max_entries: None }
    }
}

pub trait NamedCacheFactory: Send + Sync {
    /// Names must be non-blank and use only `[0-9A-Za-z_.]`, so they can
    /// double as file or metric names.
    fn check_cache_name(&self, name: &str) -> Result<(), CacheError> {
        let valid = !name.trim().is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
        if valid {
            Ok(())
        } else {
            Err(CacheError::InvalidName(name.to_string()))
        }
    }

    fn cache_config(&self, name: &str) -> Result<CacheConfig, CacheError>;
}

/// Every cache bounded to the same size.
#[derive(Debug, Clone, Copy)]
pub struct DefaultSizedCacheFactory {
    default_size: u64,
}

impl DefaultSizedCacheFactory {
    pub fn new(default_size: u64) -> Self {
        Self { default_size }
    }
}

impl Default for DefaultSizedCacheFactory {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl NamedCacheFactory for DefaultSizedCacheFactory {
    fn cache_config(&self, name: &str) -> Result<CacheConfig, CacheError> {
        self.check_cache_name(name)?;
        Ok(CacheConfig::bounded(self.default_size))
    }
}

/// The caches a sandbox runtime owns. Any other name is a programming error.
#[derive(Debug, Clone, Copy, Default)]
pub struct SandboxCacheFactory;

impl NamedCacheFactory for SandboxCacheFactory {
    fn cache_config(&self, name: &str) -> Result<CacheConfig, CacheError> {
        self.check_cache_name(name)?;
        match name {
            caches::ENUM_CONSTANTS | caches::ENUM_DIRECTORIES => Ok(CacheConfig::unbounded()),
            _ => Err(CacheError::UnknownCache(name.to_string())),
        }
    }
}

type Slot<V> = Arc<Mutex<Option<V>>>;

struct Entries<K, V> {
    slots: HashMap<K, Slot<V>>,
    /// Insertion order, oldest first.
    order: VecDeque<K>,
}

pub struct NamedCache<K, V> {
    name: String,
    config: CacheConfig,
    entries: Mutex<Entries<K, V>>,
    metrics: CacheMetrics,
}

impl<K, V> NamedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(name: impl Into<String>, config: CacheConfig) -> Self {
        Self {
            name: name.into(),
            config,
            entries: Mutex::new(Entries {
                slots: HashMap::new(),
                order: VecDeque::new(),
            }),
            metrics: CacheMetrics::default(),
        }
    }

    /// Build a cache sized by `factory`.
    pub fn from_factory(factory: &dyn NamedCacheFactory, name: &str) -> Result<Self, CacheError> {
        let config = factory.cache_config(name)?;
        Ok(Self::new(name, config))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    pub fn len(&self) -> usize {
        self.entries.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Populated value for `key`, without loading.
    pub fn get(&self, key: &K) -> Option<V> {
        let slot = self.entries.lock().slots.get(key).cloned()?;
        let value = slot.lock().clone();
        value
    }

    /// The cached value for `key`, loading it with `load` if absent.
    ///
    /// `load` runs at most once per key while the entry is cached; a failed
    /// load leaves the entry empty for the next caller. `load` must not look
    /// up the same key in the same cache.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: K,
        load: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        let Some(slot) = self.slot_for(key) else {
            // Zero capacity: nothing is retained.
            self.metrics.record_miss();
            return load();
        };

        let mut guard = slot.lock();
        if let Some(value) = guard.as_ref() {
            self.metrics.record_hit();
            return Ok(value.clone());
        }
        self.metrics.record_miss();
        match load() {
            Ok(value) => {
                self.metrics.record_load();
                *guard = Some(value.clone());
                Ok(value)
            }
            Err(err) => {
                self.metrics.record_load_failure();
                Err(err)
            }
        }
    }

    fn slot_for(&self, key: K) -> Option<Slot<V>> {
        let mut entries = self.entries.lock();
        if let Some(slot) = entries.slots.get(&key) {
            return Some(slot.clone());
        }
        if let Some(max) = self.config.max_entries {
            if max == 0 {
                return None;
            }
            while entries.slots.len() as u64 >= max {
                let Some(oldest) = entries.order.pop_front() else {
                    break;
                };
                entries.slots.remove(&oldest);
                self.metrics.record_eviction();
                trace!(cache = %self.name, "evicted entry");
            }
        }
        let slot: Slot<V> = Arc::new(Mutex::new(None));
        entries.slots.insert(key.clone(), slot.clone());
        entries.order.push_back(key);
        Some(slot)
    }
}

impl<K, V> std::fmt::Debug for NamedCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedCache")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cache_name_rules() {
        let factory = DefaultSizedCacheFactory::default();
        assert!(factory.check_cache_name("DJVM_enumConstants").is_ok());
        assert!(factory.check_cache_name("a.b_c1").is_ok());
        assert_eq!(
            factory.check_cache_name("  "),
            Err(CacheError::InvalidName("  ".into()))
        );
        assert!(factory.check_cache_name("bad name").is_err());
        assert!(factory.check_cache_name("bad/name").is_err());
        assert_eq!(
            factory.cache_config("anything").unwrap(),
            CacheConfig::bounded(1024)
        );
    }

    #[test]
    fn test_sandbox_factory_knows_its_caches() {
        let factory = SandboxCacheFactory;
        assert_eq!(
            factory.cache_config(caches::ENUM_CONSTANTS).unwrap(),
            CacheConfig::unbounded()
        );
        assert_eq!(
            factory.cache_config(caches::ENUM_DIRECTORIES).unwrap(),
            CacheConfig::unbounded()
        );
        assert_eq!(
            factory.cache_config("Other"),
            Err(CacheError::UnknownCache("Other".into()))
        );
    }

    #[test]
    fn test_get_or_compute_loads_once() {
        let cache: NamedCache<String, Arc<String>> = NamedCache::new("test", CacheConfig::unbounded());
        let calls = AtomicUsize::new(0);
        let load = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>(Arc::new("value".to_string()))
        };
        let first = cache.get_or_try_insert_with("k".to_string(), load).unwrap();
        let second = cache
            .get_or_try_insert_with("k".to_string(), || Ok::<_, ()>(Arc::new("other".to_string())))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let snapshot = cache.metrics().snapshot();
        assert_eq!((snapshot.hits, snapshot.misses, snapshot.loads), (1, 1, 1));
    }

    #[test]
    fn test_failed_load_is_retried() {
        let cache: NamedCache<u32, u32> = NamedCache::new("test", CacheConfig::unbounded());
        assert_eq!(cache.get_or_try_insert_with(1, || Err("nope")), Err("nope"));
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get_or_try_insert_with(1, || Ok::<_, &str>(7)), Ok(7));
        assert_eq!(cache.get(&1), Some(7));
        assert_eq!(cache.metrics().snapshot().load_failures, 1);
    }

    #[test]
    fn test_bounded_cache_evicts_oldest() {
        let cache: NamedCache<u32, u32> = NamedCache::new("test", CacheConfig::bounded(2));
        for key in 0..3 {
            cache.get_or_try_insert_with(key, || Ok::<_, ()>(key * 10)).unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&0), None);
        assert_eq!(cache.get(&2), Some(20));
        assert_eq!(cache.metrics().snapshot().evictions, 1);
    }

    #[test]
    fn test_zero_capacity_never_retains() {
        let cache: NamedCache<u32, u32> = NamedCache::new("test", CacheConfig::bounded(0));
        assert_eq!(cache.get_or_try_insert_with(1, || Ok::<_, ()>(5)), Ok(5));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_lookups_share_one_load() {
        let cache: Arc<NamedCache<u32, Arc<u32>>> =
            Arc::new(NamedCache::new("test", CacheConfig::unbounded()));
        let calls = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                std::thread::spawn(move || {
                    cache
                        .get_or_try_insert_with(42, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(5));
                            Ok::<_, ()>(Arc::new(42))
                        })
                        .unwrap()
                })
            })
            .collect();
        let values: Vec<Arc<u32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
    }
}
