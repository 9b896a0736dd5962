//! Keyed store of cached results.
//!
//! The registry maps string keys to [`AsyncResult`] instances of arbitrary
//! payload types. Entries are created lazily by the first caller for a key
//! and live as long as the registry; there is no removal or eviction.
//!
//! # Type Safety
//!
//! Entries are stored type-erased. Every lookup names the payload, error and
//! parameter types it expects, and reusing a key with different types fails
//! with [`RegistryError::TypeMismatch`] instead of handing out a wrongly
//! typed result.
//!
//! # Example
//!
//! ```ignore
//! let registry = ResultRegistry::new();
//!
//! let prices = registry.get_or_create("coins", || producer_fn(fetch_coins))?;
//! prices.run(()).await;
//!
//! // Pre-populate without calling the producer
//! registry.seed::<Coins, ApiError, ()>("coins", Coins::from_rates("1", "2"))?;
//! ```

use std::any::{type_name, Any};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use querycell_core::{
    Producer, QueryCellResult, RegistryConfig, RegistryError, SeededProducer, SharedProducer,
};

use crate::operation::Operation;
use crate::query::AsyncResult;

/// Type-erased registry slot.
struct RegistryEntry {
    result: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl RegistryEntry {
    fn new<D, E, P>(result: AsyncResult<D, E, P>) -> Self
    where
        D: Send + Sync + 'static,
        E: Send + Sync + 'static,
        P: Send + 'static,
    {
        Self {
            result: Box::new(result),
            type_name: type_name::<AsyncResult<D, E, P>>(),
        }
    }
}

#[derive(Debug, Default)]
struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    seeds: AtomicU64,
    type_mismatches: AtomicU64,
}

/// Statistics about registry usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of keys currently registered.
    pub entries: u64,
    /// Lookups that found an existing entry.
    pub hits: u64,
    /// Lookups that created a new entry.
    pub misses: u64,
    /// Number of seed calls.
    pub seeds: u64,
    /// Lookups rejected because the key holds another type.
    pub type_mismatches: u64,
}

impl RegistryStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct RegistryInner {
    config: RegistryConfig,
    entries: RwLock<HashMap<String, RegistryEntry>>,
    stats: StatsCounters,
}

/// Process-wide store of cached results.
///
/// Construct one at startup and pass it to every consumer; clones share the
/// same entries.
#[derive(Clone)]
pub struct ResultRegistry {
    inner: Arc<RegistryInner>,
}

impl ResultRegistry {
    /// Create an empty registry with default configuration.
    pub fn new() -> Self {
        Self::build(RegistryConfig::default())
    }

    /// Create an empty registry after validating `config`.
    pub fn with_config(config: RegistryConfig) -> QueryCellResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                entries: RwLock::new(HashMap::new()),
                stats: StatsCounters::default(),
            }),
        }
    }

    /// Get the registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Return the result stored under `key`, creating it from `factory` if
    /// the key is new.
    ///
    /// `factory` runs without any registry lock held, so it may itself use
    /// the registry. If the key gets created while `factory` runs, by another
    /// thread or by the factory itself, that entry wins and the freshly built
    /// producer is dropped unused.
    pub fn get_or_create<Pr, F>(
        &self,
        key: &str,
        factory: F,
    ) -> QueryCellResult<AsyncResult<Pr::Output, Pr::Error, Pr::Params>>
    where
        Pr: Producer,
        F: FnOnce() -> Pr,
    {
        if let Some(existing) = self.get::<Pr::Output, Pr::Error, Pr::Params>(key)? {
            return Ok(existing);
        }

        let producer: SharedProducer<Pr::Params, Pr::Output, Pr::Error> = Arc::new(factory());

        let mut entries = self.write();
        let result = match entries.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                let existing = self.downcast(key, occupied.get())?;
                self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    registry = %self.inner.config.name,
                    key,
                    "key created while factory ran; discarding new producer"
                );
                return Ok(existing);
            }
            Entry::Vacant(vacant) => {
                let result = AsyncResult::keyed(key, producer, &self.inner.config);
                vacant.insert(RegistryEntry::new(result.clone()));
                result
            }
        };
        drop(entries);
        self.inner.stats.misses.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            registry = %self.inner.config.name,
            key,
            result_type = type_name::<Pr::Output>(),
            "created result"
        );
        Ok(result)
    }

    /// Look up the result stored under `key` without creating it.
    pub fn get<D, E, P>(&self, key: &str) -> QueryCellResult<Option<AsyncResult<D, E, P>>>
    where
        D: Send + Sync + 'static,
        E: Send + Sync + 'static,
        P: Send + 'static,
    {
        let entries = self.read();
        match entries.get(key) {
            Some(entry) => {
                let existing = self.downcast(key, entry)?;
                self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(existing))
            }
            None => Ok(None),
        }
    }

    /// Get-or-create the result for `key` and run it.
    pub fn fetch<Pr, F>(
        &self,
        key: &str,
        factory: F,
        params: Pr::Params,
    ) -> QueryCellResult<Operation<Pr::Output>>
    where
        Pr: Producer,
        F: FnOnce() -> Pr,
    {
        Ok(self.get_or_create(key, factory)?.run(params))
    }

    /// Force the result under `key` to succeed with `value` right now.
    ///
    /// A new key is created with a producer that yields `value`, so a later
    /// `run` reproduces it. An existing key keeps its producer and only its
    /// state is replaced.
    pub fn seed<D, E, P>(&self, key: &str, value: D) -> QueryCellResult<AsyncResult<D, E, P>>
    where
        D: Clone + Send + Sync + 'static,
        E: Send + Sync + 'static,
        P: Send + 'static,
    {
        let result = self.get_or_create(key, || SeededProducer::<D, E, P>::new(value.clone()))?;
        result.seed(value);
        self.inner.stats.seeds.fetch_add(1, Ordering::Relaxed);
        Ok(result)
    }

    /// Check whether `key` has an entry, of any type.
    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Get registry statistics.
    pub fn stats(&self) -> RegistryStats {
        let entries = self.len() as u64;
        let stats = &self.inner.stats;
        RegistryStats {
            entries,
            hits: stats.hits.load(Ordering::Relaxed),
            misses: stats.misses.load(Ordering::Relaxed),
            seeds: stats.seeds.load(Ordering::Relaxed),
            type_mismatches: stats.type_mismatches.load(Ordering::Relaxed),
        }
    }

    /// Returns true if both handles refer to the same store.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    fn downcast<D, E, P>(
        &self,
        key: &str,
        entry: &RegistryEntry,
    ) -> QueryCellResult<AsyncResult<D, E, P>>
    where
        D: Send + Sync + 'static,
        E: Send + Sync + 'static,
        P: Send + 'static,
    {
        match entry.result.downcast_ref::<AsyncResult<D, E, P>>() {
            Some(result) => Ok(result.clone()),
            None => {
                self.inner
                    .stats
                    .type_mismatches
                    .fetch_add(1, Ordering::Relaxed);
                let expected = type_name::<AsyncResult<D, E, P>>();
                tracing::warn!(
                    registry = %self.inner.config.name,
                    key,
                    expected,
                    found = entry.type_name,
                    "registry key reused with a different type"
                );
                Err(RegistryError::TypeMismatch {
                    key: key.to_string(),
                    expected,
                    found: entry.type_name,
                }
                .into())
            }
        }
    }

    // Caller code never runs under these locks and the map only changes by a
    // single insert, so a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, RegistryEntry>> {
        self.inner.entries.read().unwrap_or_else(|poisoned| {
            tracing::warn!(registry = %self.inner.config.name, "recovering poisoned registry lock");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, RegistryEntry>> {
        self.inner.entries.write().unwrap_or_else(|poisoned| {
            tracing::warn!(registry = %self.inner.config.name, "recovering poisoned registry lock");
            poisoned.into_inner()
        })
    }
}

impl Default for ResultRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResultRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultRegistry")
            .field("name", &self.inner.config.name)
            .field("entries", &self.len())
            .finish()
    }
}
