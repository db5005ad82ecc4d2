//! Memoized, deduplicated reads of versions from writer logs.
//!
//! Every read of a writer log goes through the [`VersionCache`]. Completed reads are
//! kept in a bounded LRU cache. Concurrent reads of the same address while no cached
//! entry exists are coalesced into a single log read: the first caller registers a
//! shared fetch future in the pending map, later callers await that same future and
//! then re-check the cache.

use std::{
    collections::HashMap,
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use futures_util::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
    error::{Error, Result},
    keys::{Address, WriterKey},
    log::Logs,
    version::{LogPosition, MapFn, RawEntry, Version},
};

/// Default number of versions kept in the cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

type Fetch = Shared<BoxFuture<'static, Result<Version>>>;
type PendingMap = HashMap<Address, Fetch>;

/// Deduplicated, memoized point reads of versions.
#[derive(derive_more::Debug, Clone)]
pub struct VersionCache {
    logs: Logs,
    #[debug(skip)]
    map: Option<MapFn>,
    #[debug("LruCache")]
    cache: Arc<Mutex<LruCache<Address, Version>>>,
    #[debug("PendingMap")]
    pending: Arc<Mutex<PendingMap>>,
    counters: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
}

impl VersionCache {
    /// Create a cache over `logs` holding up to `capacity` versions.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(logs: Logs, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            logs,
            map: None,
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
            pending: Default::default(),
            counters: Default::default(),
        }
    }

    /// Set the function that turns decoded log entries into versions.
    pub fn with_map(mut self, map: MapFn) -> Self {
        self.map = Some(map);
        self
    }

    /// The logs this cache reads from.
    pub fn logs(&self) -> &Logs {
        &self.logs
    }

    /// Get the version at `seq` in the log of `key`.
    pub async fn get_version(&self, key: &WriterKey, seq: u64) -> Result<Version> {
        self.get(&Address::new(*key, seq)).await
    }

    /// Get the version at `address`.
    pub async fn get(&self, address: &Address) -> Result<Version> {
        if let Some(version) = self.cached(address) {
            return Ok(version);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let fetch = {
            let mut pending = self.pending.lock();
            // a fetch may have completed between the lookup above and taking the lock.
            if let Some(version) = self.cache.lock().get(address) {
                return Ok(version.clone());
            }
            match pending.get(address) {
                Some(fetch) => {
                    trace!(%address, "join pending fetch");
                    fetch.clone()
                }
                None => {
                    let fetch = self.fetch(*address).boxed().shared();
                    pending.insert(*address, fetch.clone());
                    fetch
                }
            }
        };

        let res = fetch.await;
        // read through the cache so that all callers observe the mapped version.
        if let Some(version) = self.cache.lock().get(address) {
            return Ok(version.clone());
        }
        res
    }

    /// Whether a version is currently cached.
    pub fn contains(&self, address: &Address) -> bool {
        self.cache.lock().contains(address)
    }

    /// Drop a cached version.
    pub fn invalidate(&self, address: &Address) {
        self.cache.lock().pop(address);
    }

    /// Drop all cached versions.
    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let pending = self.pending.lock().len();
        let cache = self.cache.lock();
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            pending,
            size: cache.len(),
            capacity: cache.cap().get(),
        }
    }

    fn cached(&self, address: &Address) -> Option<Version> {
        let version = self.cache.lock().get(address).cloned()?;
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(version)
    }

    fn fetch(&self, address: Address) -> impl std::future::Future<Output = Result<Version>> {
        let logs = self.logs.clone();
        let map = self.map.clone();
        let cache = self.cache.clone();
        let counters = self.counters.clone();
        let guard = PendingGuard {
            pending: Arc::downgrade(&self.pending),
            address,
        };
        async move {
            // removes the pending entry once this future completes or is dropped.
            let _guard = guard;
            counters.fetches.fetch_add(1, Ordering::Relaxed);
            debug!(%address, "fetch version");
            let log = logs.get(&address.key).ok_or_else(|| {
                Error::NotFound(format!("writer log {}", address.key.fmt_short()))
            })?;
            let bytes = log.get(address.seq).await?;
            let entry = RawEntry::decode(&bytes)?;
            let pos = LogPosition {
                key: address.key,
                seq: address.seq,
            };
            let version = match map {
                Some(map) => map(entry, pos)?,
                None => Version::from_entry(entry, pos)?,
            };
            cache.lock().put(address, version.clone());
            Ok(version)
        }
    }
}

struct PendingGuard {
    pending: Weak<Mutex<PendingMap>>,
    address: Address,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.upgrade() {
            pending.lock().remove(&self.address);
        }
    }
}

/// Statistics of a [`VersionCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that were not cached.
    pub misses: u64,
    /// Reads issued to writer logs.
    pub fetches: u64,
    /// Fetches currently in flight.
    pub pending: usize,
    /// Number of cached versions.
    pub size: usize,
    /// Maximum number of cached versions.
    pub capacity: usize,
}

impl CacheStats {
    /// Ratio of hits to all lookups.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
