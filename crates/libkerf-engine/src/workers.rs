//! Background maintenance loops
//!
//! Each worker ticks on its own interval until cancelled. Ticks never
//! overlap within a worker; a slow tick delays the next one.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::ContextCache;
use crate::manager::{refresh_index, warm, Pipeline};

struct Worker {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Running workers. Each has its own token, a child of the set's.
pub struct WorkerSet {
    cancel: CancellationToken,
    workers: Vec<Worker>,
}

impl std::fmt::Debug for WorkerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSet").field("workers", &self.names()).finish()
    }
}

impl WorkerSet {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            workers: Vec::new(),
        }
    }

    /// Spawn the predict, warm and reindex loops for an engine
    pub(crate) fn start(pipeline: Arc<Pipeline>, cache: Arc<ContextCache>) -> Self {
        let mut set = Self::new();
        let cache_config = cache.config().clone();
        let limit = cache_config.warm_limit;

        let c = Arc::clone(&cache);
        set.spawn("predict", Duration::from_millis(cache_config.predict_interval_ms), move || {
            let c = Arc::clone(&c);
            async move {
                let queued = c.refresh_predictions(limit);
                if queued > 0 {
                    debug!(queued, "predictions refreshed");
                }
            }
        });

        let (p, c) = (Arc::clone(&pipeline), Arc::clone(&cache));
        set.spawn("warm", Duration::from_millis(cache_config.warm_interval_ms), move || {
            let (p, c) = (Arc::clone(&p), Arc::clone(&c));
            async move {
                let requests = c.take_predictions();
                if !requests.is_empty() {
                    warm(&p, &c, requests).await;
                }
            }
        });

        let (p, c) = (pipeline, cache);
        set.spawn(
            "reindex",
            Duration::from_millis(p.config.workers.reindex_interval_ms),
            move || {
                let (p, c) = (Arc::clone(&p), Arc::clone(&c));
                async move {
                    let result = tokio::task::spawn_blocking(move || refresh_index(&p, &c)).await;
                    match result {
                        Ok(Ok(summary)) if summary.changed() => {
                            info!(
                                indexed = summary.indexed,
                                removed = summary.removed,
                                generation = summary.generation,
                                "background re-index"
                            );
                        }
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => warn!(error = %e, "background re-index failed"),
                        Err(e) => warn!(error = %e, "background re-index panicked"),
                    }
                }
            },
        );
        set
    }

    /// Run `tick` every `interval` until cancelled. A zero interval leaves
    /// the worker disabled.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, interval: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if interval.is_zero() {
            debug!(worker = name, "interval is zero, worker disabled");
            return;
        }
        let cancel = self.cancel.child_token();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(worker = name, "worker stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        tick().await;
                    }
                }
            }
        });
        self.workers.push(Worker {
            name,
            cancel: token,
            handle,
        });
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.workers.iter().map(|w| w.name).collect()
    }

    /// Stop one worker; the others keep running. Returns false if no
    /// worker has that name.
    pub fn cancel(&self, name: &str) -> bool {
        let mut found = false;
        for worker in self.workers.iter().filter(|w| w.name == name) {
            worker.cancel.cancel();
            found = true;
        }
        found
    }

    pub fn cancel_all(&self) {
        self.cancel.cancel();
    }

    /// Cancel every worker and wait for it to finish its current tick
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for worker in std::mem::take(&mut self.workers) {
            if let Err(e) = worker.handle.await {
                warn!(worker = worker.name, error = %e, "worker ended abnormally");
            }
        }
    }
}

impl Default for WorkerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkerSet {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
