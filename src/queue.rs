// Sequential request queue for the booking frontends.
// Runs asynchronous operations one at a time in submission order, answers
// repeated keyed requests from a time-boxed result cache, and spaces
// consecutive executions by a fixed delay so bursts of page activity do not
// hammer the backing store.

use std::{
    collections::VecDeque,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::cache::{CacheStats, ResultCache};

// Queue tuning knobs. The defaults match the production frontends:
// 50ms between consecutive requests, 5s result cache window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub inter_request_delay: Duration,
    pub cache_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            inter_request_delay: Duration::from_millis(50),
            cache_timeout: Duration::from_secs(5),
        }
    }
}

// Error surface of an enqueued request
#[derive(Error, Debug, PartialEq)]
pub enum QueueError<E> {
    // The operation itself failed; the inner error is the caller's own,
    // passed through untouched.
    #[error("request failed: {0}")]
    Operation(E),

    // The drain task went away before this entry settled. Only reachable
    // when the runtime is torn down with entries still pending.
    #[error("request dropped before completion")]
    Dropped,
}

// Counters snapshot, taken via RequestQueue::stats
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: usize,
    pub completed: usize,
    pub failed: usize,
    pub cache_hits: usize,
    pub pending: usize,
}

#[derive(Debug, Default)]
struct QueueCounters {
    enqueued: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    cache_hits: AtomicUsize,
}

type Operation<T, E> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, E>> + Send>;

struct QueueEntry<T, E> {
    operation: Operation<T, E>,
    reply: oneshot::Sender<Result<T, QueueError<E>>>,
    cache_key: Option<String>,
}

struct QueueInner<T, E> {
    pending: Mutex<VecDeque<QueueEntry<T, E>>>,
    draining: AtomicBool,
    cache: ResultCache<T>,
    config: QueueConfig,
    counters: QueueCounters,
}

// Cheap-to-clone handle over the shared queue state. The owning process
// constructs one instance and hands clones to whoever needs to issue
// requests through it.
pub struct RequestQueue<T, E> {
    inner: Arc<QueueInner<T, E>>,
}

impl<T, E> Clone for RequestQueue<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> RequestQueue<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                pending: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                cache: ResultCache::new(config.cache_timeout),
                config,
                counters: QueueCounters::default(),
            }),
        }
    }

    // Run `operation` after everything enqueued before it has settled.
    // The returned future resolves with this operation's own outcome.
    pub async fn enqueue<F, Fut>(&self, operation: F) -> Result<T, QueueError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.push(None, operation).await
    }

    // Keyed variant: a success within the cache window answers later calls
    // with the same key immediately, without queueing or running them.
    // Two keyed calls racing before the first success both execute; only a
    // completed success populates the cache.
    pub async fn enqueue_cached<F, Fut>(
        &self,
        cache_key: impl Into<String>,
        operation: F,
    ) -> Result<T, QueueError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let key = cache_key.into();
        if let Some(value) = self.inner.cache.get(&key) {
            trace!(key = %key, "cache hit, skipping queue");
            self.inner
                .counters
                .cache_hits
                .fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        self.push(Some(key), operation).await
    }

    async fn push<F, Fut>(
        &self,
        cache_key: Option<String>,
        operation: F,
    ) -> Result<T, QueueError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let operation: Operation<T, E> =
            Box::new(move || -> BoxFuture<'static, Result<T, E>> { Box::pin(operation()) });

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().push_back(QueueEntry {
            operation,
            reply: tx,
            cache_key,
        });
        self.inner.counters.enqueued.fetch_add(1, Ordering::Relaxed);

        self.process();

        rx.await.unwrap_or(Err(QueueError::Dropped))
    }

    // Kick the drain task unless one is already running. Re-entrant calls
    // while a drain is active are no-ops; `draining` is the only guard.
    fn process(&self) {
        if self.inner.pending.lock().is_empty() {
            return;
        }
        if self.inner.draining.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("starting drain loop");
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            QueueInner::drain(inner).await;
        });
    }

    // Drop every cached result. Pending and in-flight entries are unaffected.
    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    // Drop one cached result by key; returns whether it was present.
    pub fn clear_cache_entry(&self, key: &str) -> bool {
        self.inner.cache.remove(key)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.inner.counters.enqueued.load(Ordering::Relaxed),
            completed: self.inner.counters.completed.load(Ordering::Relaxed),
            failed: self.inner.counters.failed.load(Ordering::Relaxed),
            cache_hits: self.inner.counters.cache_hits.load(Ordering::Relaxed),
            pending: self.inner.pending.lock().len(),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }
}

impl<T, E> Default for RequestQueue<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl<T, E> QueueInner<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    // FIFO drain: pop the head, await its operation, settle its caller,
    // sleep the inter-request delay, repeat until empty. A failure settles
    // only its own caller; the loop carries on with the next entry.
    async fn drain(inner: Arc<Self>) {
        loop {
            let entry = inner.pending.lock().pop_front();
            let Some(entry) = entry else {
                inner.draining.store(false, Ordering::SeqCst);
                // An enqueue may have landed between the pop above and the
                // store; reclaim the flag and keep going, or leave the queue
                // to the drain that enqueue started.
                if inner.pending.lock().is_empty()
                    || inner.draining.swap(true, Ordering::SeqCst)
                {
                    debug!("drain loop finished");
                    return;
                }
                continue;
            };

            match (entry.operation)().await {
                Ok(value) => {
                    if let Some(key) = &entry.cache_key {
                        inner.cache.store(key.clone(), value.clone());
                    }
                    inner.counters.completed.fetch_add(1, Ordering::Relaxed);
                    // The caller may have gone away; its loss, not ours
                    let _ = entry.reply.send(Ok(value));
                }
                Err(err) => {
                    inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                    trace!("queued operation failed");
                    let _ = entry.reply.send(Err(QueueError::Operation(err)));
                }
            }

            tokio::time::sleep(inner.config.inter_request_delay).await;
        }
    }
}
