//! Context cache
//!
//! Memoizes prepared bundles by request fingerprint. Concurrent callers
//! with the same fingerprint share one computation: the first becomes the
//! leader and spawns the work, the rest wait on a watch channel. The work
//! runs as its own task, so a caller that gives up does not cancel it for
//! the others.
//!
//! Eviction removes the entry with the lowest composite of recency,
//! frequency and predicted reuse until the entry and token bounds hold.

pub mod predict;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use libkerf_core::config::CacheConfig;
use libkerf_core::error::KerfError;
use libkerf_core::types::{ContextCollection, ContextRequest, Fingerprint};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

pub use predict::PatternModel;

/// Shared outcome of one computation; errors travel as text
type Shared = Option<Result<SharedBundle, String>>;

/// A bundle as handed to every caller of one computation
#[derive(Debug, Clone)]
pub struct SharedBundle {
    pub collection: Arc<ContextCollection>,
    /// False when the computation stopped at its deadline; such bundles
    /// are not cached
    pub complete: bool,
}

/// What a computation hands back to the cache
pub struct Computed {
    pub collection: ContextCollection,
    /// Partial results (deadline hit) are returned but not cached
    pub cacheable: bool,
}

impl Computed {
    pub fn complete(collection: ContextCollection) -> Self {
        Self {
            collection,
            cacheable: true,
        }
    }

    pub fn partial(collection: ContextCollection) -> Self {
        Self {
            collection,
            cacheable: false,
        }
    }
}

struct CacheEntry {
    collection: Arc<ContextCollection>,
    task_key: Fingerprint,
    tokens: usize,
    inserted_at: Instant,
    /// Logical clock of the last access
    last_access: u64,
    hits: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub tokens: usize,
    pub hits: u64,
    pub misses: u64,
    pub computations: u64,
    pub evictions: u64,
    pub coalesced_waits: u64,
    pub oversize_skipped: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    evictions: AtomicU64,
    coalesced_waits: AtomicU64,
    oversize_skipped: AtomicU64,
}

pub struct ContextCache {
    config: CacheConfig,
    entries: Mutex<HashMap<Fingerprint, CacheEntry>>,
    inflight: Mutex<HashMap<Fingerprint, watch::Receiver<Shared>>>,
    model: Mutex<PatternModel>,
    /// Predictions queued for the warming worker
    predicted: Mutex<Vec<ContextRequest>>,
    clock: AtomicU64,
    counters: Counters,
}

impl std::fmt::Debug for ContextCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextCache")
            .field("entries", &self.entries.lock().len())
            .field("inflight", &self.inflight.lock().len())
            .finish()
    }
}

impl ContextCache {
    pub fn new(config: CacheConfig) -> Self {
        let model = PatternModel::with_capacity(config.model_capacity);
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            model: Mutex::new(model),
            predicted: Mutex::new(Vec::new()),
            clock: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        self.config.ttl_secs > 0 && entry.inserted_at.elapsed() >= Duration::from_secs(self.config.ttl_secs)
    }

    /// Cached bundle for a fingerprint, counting the hit
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<ContextCollection>> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(fingerprint) {
            Some(entry) => self.is_expired(entry),
            None => return None,
        };
        if expired {
            entries.remove(fingerprint);
            debug!(fingerprint = %fingerprint.short(), "cache entry expired");
            return None;
        }
        let now = self.tick();
        let entry = entries.get_mut(fingerprint)?;
        entry.hits += 1;
        entry.last_access = now;
        Some(entry.collection.clone())
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries
            .lock()
            .get(fingerprint)
            .is_some_and(|e| !self.is_expired(e))
    }

    /// Record a request in the pattern model
    pub fn observe(&self, agent: &str, task_key: Fingerprint, request: &ContextRequest) {
        self.model.lock().observe(agent, task_key, request);
    }

    /// Requests the pattern model expects next
    pub fn predict(&self, limit: usize) -> Vec<ContextRequest> {
        self.model.lock().predict(limit)
    }

    /// Replace the warming queue with fresh predictions. Returns its length.
    pub fn refresh_predictions(&self, limit: usize) -> usize {
        let next = self.predict(limit);
        let len = next.len();
        *self.predicted.lock() = next;
        len
    }

    /// Drain the warming queue
    pub fn take_predictions(&self) -> Vec<ContextRequest> {
        std::mem::take(&mut *self.predicted.lock())
    }

    /// Return the cached bundle, or run `compute` once for all concurrent
    /// callers with this fingerprint.
    pub async fn get_or_compute<F, Fut>(
        self: &Arc<Self>,
        fingerprint: Fingerprint,
        task_key: Fingerprint,
        compute: F,
    ) -> Result<Arc<ContextCollection>, KerfError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Computed, KerfError>> + Send + 'static,
    {
        Ok(self.get_or_compute_shared(fingerprint, task_key, compute).await?.collection)
    }

    /// Like `get_or_compute`, also telling whether the bundle is complete
    pub async fn get_or_compute_shared<F, Fut>(
        self: &Arc<Self>,
        fingerprint: Fingerprint,
        task_key: Fingerprint,
        compute: F,
    ) -> Result<SharedBundle, KerfError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Computed, KerfError>> + Send + 'static,
    {
        if let Some(hit) = self.get(&fingerprint) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = %fingerprint.short(), "cache hit");
            return Ok(SharedBundle {
                collection: hit,
                complete: true,
            });
        }

        let mut rx = {
            let mut inflight = self.inflight.lock();
            match inflight.get(&fingerprint) {
                Some(rx) => {
                    self.counters.coalesced_waits.fetch_add(1, Ordering::Relaxed);
                    debug!(fingerprint = %fingerprint.short(), "joining in-flight computation");
                    rx.clone()
                }
                None => {
                    // Another leader may have finished between the lookup
                    // above and taking the in-flight lock.
                    if let Some(hit) = self.get(&fingerprint) {
                        self.counters.hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(SharedBundle {
                            collection: hit,
                            complete: true,
                        });
                    }
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    inflight.insert(fingerprint, rx.clone());
                    self.spawn_leader(fingerprint, task_key, tx, compute());
                    rx
                }
            }
        };

        let shared = rx
            .wait_for(|v| v.is_some())
            .await
            .map_err(|_| KerfError::Cache("computation dropped before finishing".to_string()))?
            .clone();
        match shared {
            Some(Ok(bundle)) => Ok(bundle),
            Some(Err(message)) => Err(KerfError::Internal(message)),
            None => Err(KerfError::Internal("computation produced no result".to_string())),
        }
    }

    fn spawn_leader<Fut>(self: &Arc<Self>, fingerprint: Fingerprint, task_key: Fingerprint, tx: watch::Sender<Shared>, work: Fut)
    where
        Fut: Future<Output = Result<Computed, KerfError>> + Send + 'static,
    {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            cache.counters.computations.fetch_add(1, Ordering::Relaxed);
            // The work gets its own task so a panic surfaces as a JoinError
            // here and the in-flight slot is still cleared.
            let outcome = match tokio::spawn(work).await {
                Ok(Ok(computed)) => {
                    let collection = Arc::new(computed.collection);
                    if computed.cacheable {
                        cache.insert_shared(fingerprint, task_key, collection.clone());
                    }
                    Ok(SharedBundle {
                        collection,
                        complete: computed.cacheable,
                    })
                }
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) => {
                    warn!(fingerprint = %fingerprint.short(), error = %e, "cache computation panicked");
                    Err(format!("computation failed: {}", e))
                }
            };
            cache.inflight.lock().remove(&fingerprint);
            // Receivers may all be gone; the entry is cached regardless
            let _ = tx.send(Some(outcome));
        });
    }

    /// Insert a bundle, evicting others as needed
    pub fn insert(&self, fingerprint: Fingerprint, task_key: Fingerprint, collection: ContextCollection) {
        self.insert_shared(fingerprint, task_key, Arc::new(collection));
    }

    fn insert_shared(&self, fingerprint: Fingerprint, task_key: Fingerprint, collection: Arc<ContextCollection>) {
        let tokens = collection.total_tokens;
        if tokens > self.config.max_tokens || self.config.max_entries == 0 {
            self.counters.oversize_skipped.fetch_add(1, Ordering::Relaxed);
            let err = KerfError::Cache(format!(
                "bundle of {} tokens exceeds cache capacity of {}",
                tokens, self.config.max_tokens
            ));
            warn!(fingerprint = %fingerprint.short(), error = %err, "bundle not cached");
            return;
        }

        let now = self.tick();
        let mut entries = self.entries.lock();
        entries.insert(
            fingerprint,
            CacheEntry {
                collection,
                task_key,
                tokens,
                inserted_at: Instant::now(),
                last_access: now,
                hits: 0,
            },
        );
        let evicted = self.evict_locked(&mut entries, &fingerprint);
        if evicted > 0 {
            self.counters.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
    }

    /// Evict until within bounds, never choosing `keep`
    fn evict_locked(&self, entries: &mut HashMap<Fingerprint, CacheEntry>, keep: &Fingerprint) -> u64 {
        let mut evicted = 0;
        loop {
            let total_tokens: usize = entries.values().map(|e| e.tokens).sum();
            if entries.len() <= self.config.max_entries && total_tokens <= self.config.max_tokens {
                return evicted;
            }
            let Some(victim) = self.lowest_score(entries, keep) else {
                return evicted;
            };
            entries.remove(&victim);
            evicted += 1;
            debug!(fingerprint = %victim.short(), "cache entry evicted");
        }
    }

    fn lowest_score(&self, entries: &HashMap<Fingerprint, CacheEntry>, keep: &Fingerprint) -> Option<Fingerprint> {
        let scores = self.scores(entries);
        scores
            .into_iter()
            .filter(|(fp, _, _)| fp != keep)
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.2.cmp(&b.2)).then(a.0.cmp(&b.0)))
            .map(|(fp, _, _)| fp)
    }

    /// (fingerprint, composite score, last access) for every entry.
    ///
    /// Recency is the access rank scaled to [0, 1]; frequency is hits over
    /// the busiest entry's hits; prediction comes from the pattern model.
    fn scores(&self, entries: &HashMap<Fingerprint, CacheEntry>) -> Vec<(Fingerprint, f64, u64)> {
        let mut by_access: Vec<(&Fingerprint, &CacheEntry)> = entries.iter().collect();
        by_access.sort_by(|a, b| a.1.last_access.cmp(&b.1.last_access).then(a.0.cmp(b.0)));
        let n = by_access.len();
        let max_hits = entries.values().map(|e| e.hits).max().unwrap_or(0);
        let model = self.model.lock();
        let c = &self.config;

        by_access
            .into_iter()
            .enumerate()
            .map(|(rank, (fp, entry))| {
                let recency = if n > 1 { rank as f64 / (n - 1) as f64 } else { 1.0 };
                let frequency = if max_hits > 0 {
                    entry.hits as f64 / max_hits as f64
                } else {
                    0.0
                };
                let prediction = model.probability(&entry.task_key);
                let score = c.recency_weight * recency + c.frequency_weight * frequency + c.prediction_weight * prediction;
                (*fp, score, entry.last_access)
            })
            .collect()
    }

    /// Drop entries built against an older index generation
    pub fn retain_generation(&self, generation: u64) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.collection.generation >= generation);
        before - entries.len()
    }

    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.lock().remove(fingerprint).is_some()
    }

    pub fn invalidate_all(&self) -> usize {
        let mut entries = self.entries.lock();
        let n = entries.len();
        entries.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        CacheStats {
            entries: entries.len(),
            tokens: entries.values().map(|e| e.tokens).sum(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            computations: self.counters.computations.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            coalesced_waits: self.counters.coalesced_waits.load(Ordering::Relaxed),
            oversize_skipped: self.counters.oversize_skipped.load(Ordering::Relaxed),
        }
    }
}
