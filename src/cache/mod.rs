//! Deduplicating image cache shared by every screen
//!
//! `request` is fire-and-forget: the first caller for a key starts a fetch,
//! every concurrent caller for the same key piggybacks on it. Entries are
//! never evicted or re-fetched once present. Fetch and decode failures are
//! swallowed on purpose: the key simply stays absent and a later `request`
//! tries again.

pub mod decode;

pub use decode::{DecodedImage, ImageDecoder, RasterDecoder};

use crate::config::ImageCacheConfig;
use crate::envelope::ResultEnvelope;
use crate::error::{SyncError, SyncResult};
use crate::model::ResourceKey;
use crate::repository::DynResourceFetcher;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, Semaphore};
use tracing::debug;

const EVENT_CAPACITY: usize = 256;

/// Emitted whenever a fetch for a key finishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// The key is now in the cache
    Ready(ResourceKey),
    /// The fetch or decode failed; the key is still absent
    Missed(ResourceKey),
}

impl CacheEvent {
    pub fn key(&self) -> &ResourceKey {
        match self {
            CacheEvent::Ready(key) | CacheEvent::Missed(key) => key,
        }
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub failed_fetches: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    failed_fetches: AtomicU64,
}

struct CacheInner {
    entries: RwLock<HashMap<ResourceKey, Arc<DecodedImage>>>,
    /// Keys with a fetch currently executing
    in_flight: Mutex<HashSet<ResourceKey>>,
    fetcher: DynResourceFetcher,
    decoder: Arc<dyn ImageDecoder>,
    permits: Semaphore,
    events: broadcast::Sender<CacheEvent>,
    runtime: Handle,
    counters: Counters,
}

/// Result of trying to become the fetcher for a key
enum Claim {
    Cached(Arc<DecodedImage>),
    Pending,
    Won(InFlightGuard),
}

/// Holds a key in the in-flight set until the fetch reports its outcome.
///
/// Dropped without [`InFlightGuard::finish`] (the fetch task was torn
/// down), it still releases the key and announces a miss so waiters wake.
struct InFlightGuard {
    inner: Arc<CacheInner>,
    key: ResourceKey,
    finished: bool,
}

impl InFlightGuard {
    fn release(&self) {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }

    /// Release the key, then publish `event`
    fn finish(mut self, event: CacheEvent) {
        self.finished = true;
        self.release();
        let _ = self.inner.events.send(event);
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.release();
            let _ = self.inner.events.send(CacheEvent::Missed(self.key.clone()));
        }
    }
}

/// Process-wide cache of decoded images keyed by [`ResourceKey`]
#[derive(Clone)]
pub struct ResourceCache {
    inner: Arc<CacheInner>,
}

impl ResourceCache {
    /// Create a cache whose fetches run on the current tokio runtime.
    ///
    /// The runtime handle is captured here so fetch tasks outlive whichever
    /// screen asked for them.
    pub fn new(
        fetcher: DynResourceFetcher,
        decoder: Arc<dyn ImageDecoder>,
        config: &ImageCacheConfig,
    ) -> SyncResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| SyncError::config(format!("Resource cache needs a tokio runtime: {}", e)))?;
        Ok(Self::with_runtime(fetcher, decoder, config, runtime))
    }

    pub fn with_runtime(
        fetcher: DynResourceFetcher,
        decoder: Arc<dyn ImageDecoder>,
        config: &ImageCacheConfig,
        runtime: Handle,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(CacheInner {
                entries: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashSet::new()),
                fetcher,
                decoder,
                permits: Semaphore::new(config.max_concurrent_fetches.max(1)),
                events,
                runtime,
                counters: Counters::default(),
            }),
        }
    }

    /// Non-blocking snapshot read
    pub fn get(&self, key: &ResourceKey) -> Option<Arc<DecodedImage>> {
        let found = self.read_entries().get(key).cloned();
        let counter = if found.is_some() {
            &self.inner.counters.hits
        } else {
            &self.inner.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.read_entries().contains_key(key)
    }

    /// Copy of every cached entry
    pub fn snapshot(&self) -> HashMap<ResourceKey, Arc<DecodedImage>> {
        self.read_entries().clone()
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a fetch for `key` is executing right now
    pub fn is_in_flight(&self, key: &ResourceKey) -> bool {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    /// Make sure `key` is cached or being fetched, without waiting.
    ///
    /// Returns `true` if this call started a fetch.
    pub fn request(&self, key: ResourceKey) -> bool {
        match self.claim(&key) {
            Claim::Won(guard) => {
                let inner = self.inner.clone();
                self.inner.runtime.spawn(run_fetch(inner, guard));
                true
            }
            Claim::Cached(_) | Claim::Pending => false,
        }
    }

    /// `request` every key; returns how many fetches were started
    pub fn request_all<I>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = ResourceKey>,
    {
        keys.into_iter().filter(|key| self.request(key.clone())).count()
    }

    /// Like `request`, but waits for the outcome.
    ///
    /// If another caller's fetch is already running, waits for that one
    /// instead of starting a second. A fetch started here runs on the
    /// cache's runtime, so it completes even if this caller goes away.
    pub async fn ensure(&self, key: ResourceKey) -> Option<Arc<DecodedImage>> {
        // Subscribe before claiming so the other fetch's event cannot slip by
        let mut events = self.inner.events.subscribe();

        match self.claim(&key) {
            Claim::Cached(image) => Some(image),
            Claim::Won(guard) => {
                let inner = self.inner.clone();
                match self.inner.runtime.spawn(run_fetch(inner, guard)).await {
                    Ok(image) => image,
                    Err(e) => {
                        debug!("Fetch task for {} ended early: {}", key, e);
                        self.read_entries().get(&key).cloned()
                    }
                }
            }
            Claim::Pending => loop {
                match events.recv().await {
                    Ok(event) if event.key() == &key => return self.read_entries().get(&key).cloned(),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if !self.is_in_flight(&key) {
                            return self.read_entries().get(&key).cloned();
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return self.read_entries().get(&key).cloned();
                    }
                }
            },
        }
    }

    /// Notifications for finished fetches
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    pub fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        CacheStats {
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            fetches: counters.fetches.load(Ordering::Relaxed),
            failed_fetches: counters.failed_fetches.load(Ordering::Relaxed),
        }
    }

    /// Test-and-insert into the in-flight set.
    ///
    /// The map is checked under the in-flight lock: a finished fetch inserts
    /// its entry before releasing its key, so a key can never be claimed
    /// again once cached.
    fn claim(&self, key: &ResourceKey) -> Claim {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(image) = self.read_entries().get(key) {
            return Claim::Cached(image.clone());
        }

        if !in_flight.insert(key.clone()) {
            return Claim::Pending;
        }

        Claim::Won(InFlightGuard {
            inner: self.inner.clone(),
            key: key.clone(),
            finished: false,
        })
    }

    fn read_entries(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<ResourceKey, Arc<DecodedImage>>> {
        self.inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fetch, decode and store one key. The guard is released on every path,
/// including the task being dropped mid-fetch.
async fn run_fetch(inner: Arc<CacheInner>, guard: InFlightGuard) -> Option<Arc<DecodedImage>> {
    let key = guard.key.clone();

    // The semaphore is never closed, so a permit always arrives eventually
    let _permit = inner.permits.acquire().await.ok();
    inner.counters.fetches.fetch_add(1, Ordering::Relaxed);
    debug!("Fetching resource {}", key);

    let decoded = match inner.fetcher.fetch_resource(&key).await {
        ResultEnvelope::Success(bytes) => {
            let decoder = inner.decoder.clone();
            match tokio::task::spawn_blocking(move || decoder.decode(&bytes)).await {
                Ok(Ok(image)) => Ok(Arc::new(image)),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) => Err(format!("decoder task failed: {}", e)),
            }
        }
        ResultEnvelope::Failure(message) => Err(message),
        ResultEnvelope::Loading => Err("fetch ended without a result".to_string()),
    };

    match decoded {
        Ok(image) => {
            inner
                .entries
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key.clone(), image.clone());
            debug!("Cached resource {} ({}x{})", key, image.width(), image.height());
            guard.finish(CacheEvent::Ready(key));
            Some(image)
        }
        Err(reason) => {
            inner.counters.failed_fetches.fetch_add(1, Ordering::Relaxed);
            debug!("Resource {} not cached: {}", key, reason);
            guard.finish(CacheEvent::Missed(key));
            None
        }
    }
}
