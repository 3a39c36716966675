//! Sequence generation over a counter store.

mod settings;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use backon::Retryable;

use crate::contracts::{
    ConfigError, CounterFilter, CounterStore, CounterUpdate, CounterValue, Database,
    IncrementRequest, SequenceError, SequenceGenerator, UpsertOptions,
};
use crate::metrics::SequenceMetrics;
use crate::storage::{is_retryable_store_error, yield_then_sleep, DetectedApi, RetryConfig};

pub use settings::{
    OptionName, OptionValue, OptionsOverride, SequenceOptions, SequenceSettings,
    DEFAULT_COLLECTION, DEFAULT_FIELD, DEFAULT_STEP,
};

/// Sequence generator backed by counter documents.
///
/// Each increment is one atomic upsert-and-increment against the store. A lost
/// upsert race ([`crate::contracts::StoreError::DuplicateKey`]) is retried
/// after yielding to the scheduler; every other store error is returned as is.
pub struct CounterSequenceGenerator<S> {
    store: S,
    settings: SequenceSettings,
    retry: RetryConfig,
    metrics: Arc<SequenceMetrics>,
}

impl<D: Database> CounterSequenceGenerator<DetectedApi<D>> {
    /// Creates a generator that picks the database's API generation per call.
    pub fn detect(db: D) -> Self {
        Self::new(DetectedApi::new(db))
    }
}

impl<S: CounterStore> CounterSequenceGenerator<S> {
    /// Creates a generator with default settings and unbounded retries.
    pub fn new(store: S) -> Self {
        Self::with_settings(store, SequenceSettings::new())
    }

    /// Creates a generator with explicit settings.
    pub fn with_settings(store: S, settings: SequenceSettings) -> Self {
        Self {
            store,
            settings,
            retry: RetryConfig::default(),
            metrics: Arc::new(SequenceMetrics::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Shares a metrics registry with other components.
    pub fn with_metrics(mut self, metrics: Arc<SequenceMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<SequenceMetrics> {
        &self.metrics
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Builds the increment request for a sequence from its effective options.
    pub fn build_request(
        &self,
        sequence: &str,
        field: Option<&str>,
    ) -> Result<IncrementRequest, SequenceError> {
        if sequence.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "sequence".into(),
                reason: "sequence name must not be empty".into(),
            }
            .into());
        }
        let options = self.settings.resolve(sequence)?;
        let field = field.unwrap_or(&options.field);
        Ok(IncrementRequest {
            collection: options.collection.clone(),
            filter: CounterFilter::new(sequence, field),
            update: CounterUpdate { step: options.step },
            options: UpsertOptions::default(),
        })
    }

    /// One upsert-and-increment with options resolved at call time, so a
    /// retry sees current settings.
    async fn attempt(
        &self,
        sequence: &str,
        field: Option<&str>,
        attempt: usize,
    ) -> Result<i64, SequenceError> {
        let request = self.build_request(sequence, field)?;
        tracing::debug!(
            sequence,
            collection = %request.collection,
            field = %request.filter.field,
            step = request.update.step,
            attempt,
            "Incrementing counter"
        );
        let CounterValue { seq } = self.store.upsert_increment(&request).await?;
        Ok(seq)
    }
}

impl<S: CounterStore> SequenceGenerator for CounterSequenceGenerator<S> {
    async fn increment(&self, sequence: &str, field: Option<&str>) -> Result<i64, SequenceError> {
        let started = Instant::now();
        let attempts = AtomicUsize::new(0);

        let result = (|| {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            self.attempt(sequence, field, attempt)
        })
        .retry(self.retry.backoff())
        .sleep(yield_then_sleep)
        .when(|err: &SequenceError| err.as_store_error().is_some_and(is_retryable_store_error))
        .notify(|err: &SequenceError, delay: Duration| {
            self.metrics.record_conflict();
            tracing::debug!(
                sequence,
                error = %err,
                retry_in = ?delay,
                "Counter upsert lost a race, retrying"
            );
        })
        .await;

        let attempts = attempts.load(Ordering::Relaxed);
        match result {
            Ok(seq) => {
                self.metrics.record_increment(sequence, seq, started.elapsed());
                Ok(seq)
            }
            Err(SequenceError::Store(err)) if is_retryable_store_error(&err) => {
                Err(SequenceError::RetriesExhausted {
                    sequence: sequence.to_string(),
                    attempts,
                })
            }
            Err(err) => {
                if err.as_store_error().is_some() {
                    self.metrics.record_store_error();
                    tracing::warn!(sequence, attempts, error = %err, "Counter increment failed");
                }
                Err(err)
            }
        }
    }

    async fn get_next_sequence(
        &self,
        sequence: &str,
        field: Option<&str>,
    ) -> Result<i64, SequenceError> {
        self.store.wait_ready().await?;
        self.increment(sequence, field).await
    }

    fn settings(&self) -> &SequenceSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::contracts::{Capabilities, StoreError};
    use crate::storage::MemoryDatabase;

    /// Store that replays scripted replies and records requests.
    #[derive(Default)]
    struct ScriptedStore {
        replies: Mutex<VecDeque<Result<CounterValue, StoreError>>>,
        requests: Mutex<Vec<IncrementRequest>>,
        calls: AtomicUsize,
    }

    impl ScriptedStore {
        fn new(replies: Vec<Result<CounterValue, StoreError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CounterStore for ScriptedStore {
        async fn upsert_increment(
            &self,
            request: &IncrementRequest,
        ) -> Result<CounterValue, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(StoreError::Driver {
                    code: -1,
                    message: "script exhausted".into(),
                }))
        }
    }

    fn duplicate() -> StoreError {
        StoreError::DuplicateKey {
            collection: "counters".into(),
            key: "orders".into(),
        }
    }

    #[tokio::test]
    async fn first_increment_returns_step() {
        let gen = CounterSequenceGenerator::detect(MemoryDatabase::new());
        assert_eq!(gen.get_next_sequence("orders", None).await.unwrap(), 1);
        assert_eq!(gen.get_next_sequence("orders", None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn sequential_calls_advance_by_step() {
        let gen = CounterSequenceGenerator::detect(MemoryDatabase::new());
        gen.settings()
            .override_sequence("orders", OptionsOverride::new().with_step(4))
            .unwrap();

        for k in 1..=10 {
            assert_eq!(gen.increment("orders", None).await.unwrap(), 4 * k);
        }
    }

    #[tokio::test]
    async fn set_defaults_applies_to_new_sequences() {
        let gen = CounterSequenceGenerator::detect(MemoryDatabase::new());
        gen.settings()
            .set_defaults(OptionsOverride::new().with_step(10))
            .unwrap();
        assert_eq!(gen.increment("invoices", None).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn step_change_after_first_use_applies_going_forward() {
        let gen = CounterSequenceGenerator::detect(MemoryDatabase::new());
        assert_eq!(gen.increment("orders", None).await.unwrap(), 1);
        assert_eq!(gen.increment("orders", None).await.unwrap(), 2);

        gen.settings()
            .override_sequence("orders", OptionsOverride::new().with_step(5))
            .unwrap();
        assert_eq!(gen.increment("orders", None).await.unwrap(), 7);
        assert_eq!(gen.increment("orders", None).await.unwrap(), 12);
    }

    #[tokio::test]
    async fn request_follows_wire_contract() {
        let store = Arc::new(ScriptedStore::new(vec![Ok(CounterValue { seq: 1 })]));
        let gen = CounterSequenceGenerator::new(Arc::clone(&store));
        gen.settings()
            .override_sequence("orders", OptionsOverride::new().with_collection("ids"))
            .unwrap();

        gen.increment("orders", Some("number")).await.unwrap();

        let requests = store.requests.lock().unwrap();
        assert_eq!(
            requests[0],
            IncrementRequest {
                collection: "ids".into(),
                filter: CounterFilter::new("orders", "number"),
                update: CounterUpdate { step: 1 },
                options: UpsertOptions {
                    upsert: true,
                    return_updated: true
                },
            }
        );
    }

    #[tokio::test]
    async fn duplicate_key_is_retried_transparently() {
        let store = Arc::new(ScriptedStore::new(vec![
            Err(duplicate()),
            Err(duplicate()),
            Ok(CounterValue { seq: 1 }),
        ]));
        let gen = CounterSequenceGenerator::new(Arc::clone(&store));

        assert_eq!(gen.increment("orders", None).await.unwrap(), 1);
        assert_eq!(store.calls(), 3);
        assert_eq!(
            gen.metrics().conflicts_retried_total.load(Ordering::Relaxed),
            2
        );
    }

    #[tokio::test]
    async fn other_errors_surface_without_retry() {
        let denied = StoreError::Driver {
            code: 13,
            message: "not authorized on app to execute command".into(),
        };
        let store = Arc::new(ScriptedStore::new(vec![
            Err(denied.clone()),
            Ok(CounterValue { seq: 1 }),
        ]));
        let gen = CounterSequenceGenerator::new(Arc::clone(&store));

        let err = gen.increment("orders", None).await.unwrap_err();
        assert_eq!(err.as_store_error(), Some(&denied));
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn bounded_retry_gives_up() {
        let store = Arc::new(ScriptedStore::new(vec![
            Err(duplicate()),
            Err(duplicate()),
            Err(duplicate()),
        ]));
        let gen =
            CounterSequenceGenerator::new(Arc::clone(&store)).with_retry(RetryConfig::bounded(2));

        let err = gen.increment("orders", None).await.unwrap_err();
        assert!(matches!(
            err,
            SequenceError::RetriesExhausted { attempts: 3, .. }
        ));
        assert_eq!(store.calls(), 3);
        assert_eq!(
            gen.metrics().conflicts_retried_total.load(Ordering::Relaxed),
            2
        );
        assert_eq!(
            gen.metrics().store_errors_total.load(Ordering::Relaxed),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retries_wait_out_configured_backoff() {
        let store = Arc::new(ScriptedStore::new(vec![
            Err(duplicate()),
            Err(duplicate()),
            Ok(CounterValue { seq: 1 }),
        ]));
        let gen = CounterSequenceGenerator::new(Arc::clone(&store)).with_retry(RetryConfig {
            max_retries: None,
            initial_delay_ms: 10,
            max_delay_ms: 40,
        });

        let started = tokio::time::Instant::now();
        assert_eq!(gen.increment("orders", None).await.unwrap(), 1);
        assert!(started.elapsed() >= std::time::Duration::from_millis(20));
        assert_eq!(store.calls(), 3);
    }

    #[tokio::test]
    async fn empty_sequence_name_is_rejected() {
        let store = Arc::new(ScriptedStore::default());
        let gen = CounterSequenceGenerator::new(Arc::clone(&store));
        assert!(matches!(
            gen.increment("", None).await,
            Err(SequenceError::Config(_))
        ));
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn unsupported_store_fails_immediately() {
        let gen =
            CounterSequenceGenerator::detect(MemoryDatabase::with_capabilities(Capabilities::NONE));
        let err = gen.increment("orders", None).await.unwrap_err();
        assert!(matches!(
            err,
            SequenceError::Store(StoreError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn standalone_entry_point_waits_for_open() {
        let db = Arc::new(MemoryDatabase::connecting());
        let gen = Arc::new(CounterSequenceGenerator::detect(Arc::clone(&db)));

        let pending = {
            let gen = Arc::clone(&gen);
            tokio::spawn(async move { gen.get_next_sequence("orders", None).await })
        };
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        db.open();
        assert_eq!(pending.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn increment_does_not_wait_for_open() {
        let gen = CounterSequenceGenerator::detect(MemoryDatabase::connecting());
        let err = gen.increment("orders", None).await.unwrap_err();
        assert!(matches!(
            err,
            SequenceError::Store(StoreError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_increments_are_distinct() {
        let gen = CounterSequenceGenerator::detect(MemoryDatabase::new());
        let calls = (0..50).map(|_| gen.increment("orders", None));
        let mut values: Vec<i64> = futures::future::join_all(calls)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        values.sort();
        assert_eq!(values, (1..=50).collect::<Vec<_>>());
        assert!(gen.metrics().conflicts_retried_total.load(Ordering::Relaxed) > 0);
    }
}
