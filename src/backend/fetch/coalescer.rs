/**
 * Fetch Coalescer
 *
 * Change notifications tend to arrive in bursts: one saved form can touch a
 * record several times, and every subscribed session would otherwise
 * re-query the same row. The coalescer keeps one pending entry per
 * `(tenant, feather, id)`:
 *
 * - a request for a key that is already pending only appends its callback;
 * - a request for a new key creates the entry and schedules one query;
 * - when the query resolves, every waiter of that key receives the same
 *   result and the entry is removed.
 *
 * Distinct keys run concurrently up to a fixed bound. The bound is a FIFO
 * semaphore, so with a bound of 1 keys are served strictly one at a time in
 * request order.
 *
 * # Failure
 *
 * A failed or panicking query is reported to every waiter. The entry is
 * always removed and the permit always released, so a failure never wedges
 * later fetches of the same key.
 */
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::{oneshot, Semaphore};

use crate::backend::fetch::executor::{FetchError, QueryExecutor};

/// Result handed to every waiter of a key
pub type FetchResult = Result<Arc<Value>, FetchError>;

/// Waiter invoked once the fetch for its key resolves
pub type FetchCallback = Box<dyn FnOnce(FetchResult) + Send + 'static>;

/// Coalescing key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchKey {
    pub tenant: String,
    pub feather: String,
    pub id: String,
}

struct PendingFetch {
    waiters: Vec<FetchCallback>,
    queued_at: Instant,
}

/// Deduplicates concurrent record fetches
#[derive(Clone)]
pub struct FetchCoalescer {
    executor: Arc<dyn QueryExecutor>,
    pending: Arc<Mutex<HashMap<FetchKey, PendingFetch>>>,
    permits: Arc<Semaphore>,
}

impl FetchCoalescer {
    /// `max_concurrent` bounds how many distinct keys are queried at once
    pub fn new(executor: Arc<dyn QueryExecutor>, max_concurrent: usize) -> Self {
        Self {
            executor,
            pending: Arc::new(Mutex::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Request the current row of `feather`/`id` on `tenant`
    ///
    /// Returns `true` when this call scheduled a new query and `false` when
    /// it joined one already pending. Must be called within a tokio runtime.
    pub fn request_fetch(&self, feather: &str, id: &str, tenant: &str, callback: FetchCallback) -> bool {
        let key = FetchKey {
            tenant: tenant.to_string(),
            feather: feather.to_string(),
            id: id.to_string(),
        };

        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = pending.get_mut(&key) {
                entry.waiters.push(callback);
                tracing::debug!(
                    "[Fetch] Joined pending fetch {}/{} on {} ({} waiters)",
                    key.feather,
                    key.id,
                    key.tenant,
                    entry.waiters.len()
                );
                return false;
            }
            pending.insert(
                key.clone(),
                PendingFetch {
                    waiters: vec![callback],
                    queued_at: Instant::now(),
                },
            );
        }

        let this = self.clone();
        tokio::spawn(async move { this.run(key).await });
        true
    }

    /// Awaitable form of [`request_fetch`](Self::request_fetch)
    pub async fn fetch(&self, feather: &str, id: &str, tenant: &str) -> FetchResult {
        let (tx, rx) = oneshot::channel();
        self.request_fetch(
            feather,
            id,
            tenant,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.await
            .unwrap_or_else(|_| Err(FetchError::Aborted("fetch dropped without result".to_string())))
    }

    /// Number of keys queued or being fetched
    pub fn in_flight(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Number of callbacks waiting on `key`
    pub fn waiters(&self, key: &FetchKey) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|entry| entry.waiters.len())
            .unwrap_or(0)
    }

    async fn run(self, key: FetchKey) {
        let result = match self.permits.clone().acquire_owned().await {
            Ok(permit) => {
                let executor = self.executor.clone();
                let (tenant, feather, id) = (key.tenant.clone(), key.feather.clone(), key.id.clone());
                // Run the query in its own task so a panic surfaces as a JoinError.
                let query = tokio::spawn(async move {
                    let _permit = permit;
                    executor.fetch_row(&tenant, &feather, &id).await
                });
                match query.await {
                    Ok(Ok(row)) => Ok(Arc::new(row)),
                    Ok(Err(e)) => Err(e),
                    Err(e) => Err(FetchError::Aborted(e.to_string())),
                }
            }
            Err(_) => Err(FetchError::Aborted("fetch permits closed".to_string())),
        };

        self.complete(&key, result);
    }

    fn complete(&self, key: &FetchKey, result: FetchResult) {
        let entry = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);

        let Some(entry) = entry else {
            tracing::debug!("[Fetch] Pending entry for {}/{} vanished before completion", key.feather, key.id);
            return;
        };

        match &result {
            Ok(_) => tracing::debug!(
                "[Fetch] Fetched {}/{} on {} for {} waiter(s) in {:?}",
                key.feather,
                key.id,
                key.tenant,
                entry.waiters.len(),
                entry.queued_at.elapsed()
            ),
            Err(e) => tracing::error!(
                "[Fetch] Fetch of {}/{} on {} failed for {} waiter(s): {}",
                key.feather,
                key.id,
                key.tenant,
                entry.waiters.len(),
                e
            ),
        }

        for waiter in entry.waiters {
            waiter(result.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Executor that blocks each query until the test releases it
    struct GatedExecutor {
        calls: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
        gate: Semaphore,
        fail: bool,
    }

    impl GatedExecutor {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
                gate: Semaphore::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl QueryExecutor for GatedExecutor {
        async fn fetch_row(&self, _tenant: &str, feather: &str, id: &str) -> Result<Value, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            self.gate.acquire().await.unwrap().forget();
            self.running.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                Err(FetchError::Query("connection reset".to_string()))
            } else {
                Ok(serde_json::json!({"feather": feather, "id": id}))
            }
        }
    }

    struct PanickingExecutor;

    #[async_trait]
    impl QueryExecutor for PanickingExecutor {
        async fn fetch_row(&self, _tenant: &str, _feather: &str, _id: &str) -> Result<Value, FetchError> {
            panic!("executor bug");
        }
    }

    fn collect(coalescer: &FetchCoalescer, id: &str) -> oneshot::Receiver<FetchResult> {
        let (tx, rx) = oneshot::channel();
        coalescer.request_fetch(
            "contact",
            id,
            "acme",
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx
    }

    #[tokio::test]
    async fn test_identical_requests_issue_one_query() {
        let executor = GatedExecutor::new(false);
        let coalescer = FetchCoalescer::new(executor.clone(), 4);

        let receivers: Vec<_> = (0..5).map(|_| collect(&coalescer, "R2")).collect();
        assert_eq!(coalescer.in_flight(), 1);

        executor.gate.add_permits(1);
        let mut results = Vec::new();
        for rx in receivers {
            results.push(rx.await.unwrap().unwrap());
        }

        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|row| Arc::ptr_eq(row, &results[0])));
        assert_eq!(results[0]["id"], "R2");
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter_and_clears_entry() {
        let executor = GatedExecutor::new(true);
        let coalescer = FetchCoalescer::new(executor.clone(), 1);

        let first = collect(&coalescer, "R1");
        let second = collect(&coalescer, "R1");
        executor.gate.add_permits(1);

        assert!(matches!(first.await.unwrap(), Err(FetchError::Query(_))));
        assert!(matches!(second.await.unwrap(), Err(FetchError::Query(_))));
        assert_eq!(coalescer.in_flight(), 0);

        // The key is not wedged: a new request schedules a new query.
        let third = collect(&coalescer, "R1");
        executor.gate.add_permits(1);
        assert!(third.await.unwrap().is_err());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_executor_reports_aborted() {
        let coalescer = FetchCoalescer::new(Arc::new(PanickingExecutor), 1);
        let result = coalescer.fetch("contact", "R1", "acme").await;
        assert!(matches!(result, Err(FetchError::Aborted(_))));
        assert_eq!(coalescer.in_flight(), 0);

        // The permit was released along with the panicking task.
        let again = coalescer.fetch("contact", "R1", "acme").await;
        assert!(matches!(again, Err(FetchError::Aborted(_))));
    }

    #[tokio::test]
    async fn test_single_permit_serializes_distinct_keys() {
        let executor = GatedExecutor::new(false);
        let coalescer = FetchCoalescer::new(executor.clone(), 1);

        let a = collect(&coalescer, "A");
        let b = collect(&coalescer, "B");
        executor.gate.add_permits(2);
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(executor.max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_concurrently() {
        let executor = GatedExecutor::new(false);
        let coalescer = FetchCoalescer::new(executor.clone(), 4);

        let a = collect(&coalescer, "A");
        let b = collect(&coalescer, "B");

        // Let both queries start before releasing either.
        while executor.running.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
        executor.gate.add_permits(2);
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert_eq!(executor.max_running.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_waiter_count() {
        let executor = GatedExecutor::new(false);
        let coalescer = FetchCoalescer::new(executor.clone(), 1);
        let _a = collect(&coalescer, "R1");
        let _b = collect(&coalescer, "R1");
        let key = FetchKey {
            tenant: "acme".to_string(),
            feather: "contact".to_string(),
            id: "R1".to_string(),
        };
        assert_eq!(coalescer.waiters(&key), 2);
        executor.gate.add_permits(1);
    }
}
