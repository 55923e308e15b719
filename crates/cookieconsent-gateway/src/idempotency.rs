//! At-most-once recording for consent submissions.
//!
//! A submission carrying an `Idempotency-Key` runs at most once per key
//! within the retention window. Concurrent requests with the same key wait
//! for the first one and share its result; a failed attempt leaves the key
//! free for a retry. [`IdempotencyCache::run_detached`] keeps recording
//! after the caller goes away, so a write that commits always fills its key.

use cookieconsent_core::ConsentTotals;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tokio::task::JoinError;

struct Entry {
    created: Instant,
    result: Arc<OnceCell<ConsentTotals>>,
}

pub struct IdempotencyCache {
    ttl: Duration,
    entries: DashMap<String, Entry>,
}

impl IdempotencyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Run `record` unless `key` already produced totals. Returns the totals
    /// and whether they were replayed from an earlier request.
    pub async fn run<F, Fut, E>(&self, key: &str, record: F) -> Result<(ConsentTotals, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ConsentTotals, E>>,
    {
        self.purge_expired();
        let cell = {
            let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
                created: Instant::now(),
                result: Arc::new(OnceCell::new()),
            });
            if entry.created.elapsed() >= self.ttl {
                *entry = Entry {
                    created: Instant::now(),
                    result: Arc::new(OnceCell::new()),
                };
            }
            entry.result.clone()
        };

        let mut ran = false;
        let totals = cell
            .get_or_try_init(|| {
                ran = true;
                record()
            })
            .await?;
        Ok((totals.clone(), !ran))
    }

    /// Like [`run`](Self::run), but on a spawned task: dropping the
    /// returned future does not cancel the record or leave its key empty.
    pub async fn run_detached<F, Fut, E>(
        self: &Arc<Self>,
        key: String,
        record: F,
    ) -> Result<(ConsentTotals, bool), E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<ConsentTotals, E>> + Send + 'static,
        E: From<JoinError> + Send + 'static,
    {
        let cache = Arc::clone(self);
        tokio::spawn(async move { cache.run(&key, record).await }).await?
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn purge_expired(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.created.elapsed() < ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn totals(accepted: u64) -> ConsentTotals {
        ConsentTotals {
            accepted,
            ..ConsentTotals::zero()
        }
    }

    #[tokio::test]
    async fn same_key_runs_once() {
        let cache = IdempotencyCache::new(Duration::from_secs(60));
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let record = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>(totals(1))
        };
        let (first, replayed) = cache.run("k", record).await.unwrap();
        assert!(!replayed);
        let (second, replayed) = cache.run("k", record).await.unwrap();
        assert!(replayed);
        assert_eq!(first, second);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_leaves_key_retryable() {
        let cache = IdempotencyCache::new(Duration::from_secs(60));
        let failed = cache.run("k", || async { Err::<ConsentTotals, _>("down") }).await;
        assert!(failed.is_err());
        let (t, replayed) = cache.run("k", || async { Ok::<_, &str>(totals(2)) }).await.unwrap();
        assert_eq!(t.accepted, 2);
        assert!(!replayed);
    }

    #[derive(Debug)]
    struct Failed;

    impl From<JoinError> for Failed {
        fn from(_: JoinError) -> Self {
            Failed
        }
    }

    #[tokio::test]
    async fn abandoned_request_still_fills_its_key() {
        let cache = Arc::new(IdempotencyCache::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicU32::new(0));

        let slow = {
            let calls = calls.clone();
            move || async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Failed>(totals(1))
            }
        };
        let abandoned = tokio::time::timeout(
            Duration::from_millis(5),
            cache.run_detached("k".to_string(), slow),
        )
        .await;
        assert!(abandoned.is_err());

        let retry = {
            let calls = calls.clone();
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Failed>(totals(99))
            }
        };
        let (t, replayed) = cache.run_detached("k".to_string(), retry).await.unwrap();
        assert!(replayed);
        assert_eq!(t.accepted, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_key_runs_again() {
        let cache = IdempotencyCache::new(Duration::ZERO);
        cache.run("k", || async { Ok::<_, ()>(totals(1)) }).await.unwrap();
        let (t, replayed) = cache.run("k", || async { Ok::<_, ()>(totals(2)) }).await.unwrap();
        assert!(!replayed);
        assert_eq!(t.accepted, 2);
    }
}
