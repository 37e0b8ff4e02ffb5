// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Transient, round-scoped metric storage.
//!
//! Collectors append `(instance, metric, value)` rows while a round runs; the
//! flusher reads them back once and the scheduler clears the store before the
//! next round. Rows carry no timestamp: one shipment timestamp is attached to
//! the whole round when the payload is built.
//!
//! Persistence goes through [`MetricBackend`], a minimal relational surface
//! (insert, select, distinct, drop-and-recreate). [`InMemoryBackend`] is the
//! default implementation.

use crate::constants::MAX_CLEAR_ATTEMPTS;
use crate::errors::StoreError;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, warn};

/// One stored row.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub instance: String,
    pub metric: String,
    pub value: f64,
}

impl MetricRecord {
    pub fn new(instance: impl Into<String>, metric: impl Into<String>, value: f64) -> Self {
        Self {
            instance: instance.into(),
            metric: metric.into(),
            value,
        }
    }
}

/// Storage engine behind a [`MetricStore`].
pub trait MetricBackend: Send {
    fn insert(&mut self, record: MetricRecord) -> Result<(), StoreError>;

    /// All rows in insertion order.
    fn select_all(&self) -> Result<Vec<MetricRecord>, StoreError>;

    /// Distinct instance names in order of first insertion.
    fn select_distinct_instances(&self) -> Result<Vec<String>, StoreError>;

    fn drop_and_recreate_schema(&mut self) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    rows: Vec<MetricRecord>,
}

impl MetricBackend for InMemoryBackend {
    fn insert(&mut self, record: MetricRecord) -> Result<(), StoreError> {
        self.rows.push(record);
        Ok(())
    }

    fn select_all(&self) -> Result<Vec<MetricRecord>, StoreError> {
        Ok(self.rows.clone())
    }

    fn select_distinct_instances(&self) -> Result<Vec<String>, StoreError> {
        let mut seen = HashSet::new();
        Ok(self
            .rows
            .iter()
            .filter(|row| seen.insert(row.instance.as_str()))
            .map(|row| row.instance.clone())
            .collect())
    }

    fn drop_and_recreate_schema(&mut self) -> Result<(), StoreError> {
        self.rows = Vec::new();
        Ok(())
    }
}

struct StoreState {
    backend: Box<dyn MetricBackend>,
    pending_clear: bool,
    failed_clears: u32,
}

/// Mutex-guarded store shared by every collector of a round.
pub struct MetricStore {
    state: Mutex<StoreState>,
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new(Box::<InMemoryBackend>::default())
    }
}

impl std::fmt::Debug for MetricStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MetricStore")
    }
}

impl MetricStore {
    pub fn new(backend: Box<dyn MetricBackend>) -> Self {
        Self {
            state: Mutex::new(StoreState {
                backend,
                pending_clear: false,
                failed_clears: 0,
            }),
        }
    }

    /// Appends one row. Duplicated `(instance, metric)` pairs are kept.
    ///
    /// A backend failure drops the row and is only logged, so one bad write
    /// never aborts the collection pass. Returns whether the row was stored.
    pub fn record(&self, instance: &str, metric: &str, value: f64) -> bool {
        let mut state = self.lock();
        match state
            .backend
            .insert(MetricRecord::new(instance, metric, value))
        {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping metric {metric:?} for instance {instance:?}: {e}");
                false
            }
        }
    }

    pub fn list_instances(&self) -> Result<Vec<String>, StoreError> {
        let state = self.lock();
        state.backend.select_distinct_instances()
    }

    pub fn records_for_instance(&self, instance: &str) -> Result<Vec<MetricRecord>, StoreError> {
        let state = self.lock();
        Ok(state
            .backend
            .select_all()?
            .into_iter()
            .filter(|row| row.instance == instance)
            .collect())
    }

    pub fn all_records(&self) -> Result<Vec<MetricRecord>, StoreError> {
        let state = self.lock();
        state.backend.select_all()
    }

    /// Removes every row. Safe to call on an empty store.
    ///
    /// On failure the store remembers that a clear is owed; [`begin_round`]
    /// settles it before the next round writes anything.
    ///
    /// [`begin_round`]: MetricStore::begin_round
    pub fn clear(&self) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::clear_locked(&mut state)
    }

    /// Prepares the store for a new round.
    ///
    /// Retries an outstanding clear up to [`MAX_CLEAR_ATTEMPTS`] times and
    /// reports [`StoreError::PersistentClearFailure`] when stale rows could not
    /// be removed.
    pub fn begin_round(&self) -> Result<(), StoreError> {
        let mut state = self.lock();
        if !state.pending_clear {
            return Ok(());
        }
        debug!("Retrying clear left over from the previous round");
        for _ in 0..MAX_CLEAR_ATTEMPTS {
            if Self::clear_locked(&mut state).is_ok() {
                return Ok(());
            }
        }
        Err(StoreError::PersistentClearFailure {
            attempts: state.failed_clears,
        })
    }

    // A writer that panicked leaves at worst a partial round behind, which the
    // next clear discards.
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn clear_locked(state: &mut StoreState) -> Result<(), StoreError> {
        match state.backend.drop_and_recreate_schema() {
            Ok(()) => {
                state.pending_clear = false;
                state.failed_clears = 0;
                Ok(())
            }
            Err(e) => {
                state.pending_clear = true;
                state.failed_clears += 1;
                error!(
                    "Failed to clear metric store ({} consecutive failures): {e}",
                    state.failed_clears
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;
    use tracing_test::traced_test;

    /// Backend whose writes and clears can be made to fail on demand.
    #[derive(Default, Clone)]
    struct FlakyBackend {
        rows: Vec<MetricRecord>,
        fail_inserts: Arc<AtomicBool>,
        failing_clears: Arc<AtomicU32>,
    }

    impl MetricBackend for FlakyBackend {
        fn insert(&mut self, record: MetricRecord) -> Result<(), StoreError> {
            if self.fail_inserts.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("insert refused".to_string()));
            }
            self.rows.push(record);
            Ok(())
        }

        fn select_all(&self) -> Result<Vec<MetricRecord>, StoreError> {
            Ok(self.rows.clone())
        }

        fn select_distinct_instances(&self) -> Result<Vec<String>, StoreError> {
            InMemoryBackend {
                rows: self.rows.clone(),
            }
            .select_distinct_instances()
        }

        fn drop_and_recreate_schema(&mut self) -> Result<(), StoreError> {
            let remaining = self.failing_clears.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_clears.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Backend("drop refused".to_string()));
            }
            self.rows.clear();
            Ok(())
        }
    }

    #[test]
    fn test_record_and_read_back_in_order() {
        let store = MetricStore::default();
        assert!(store.record("sda", "Read Bytes/s", 1.5));
        assert!(store.record("", "CPU Usage %", 12.25));
        assert!(store.record("sda", "Write Bytes/s", 0.0));

        let records = store.all_records().unwrap();
        assert_eq!(
            records,
            vec![
                MetricRecord::new("sda", "Read Bytes/s", 1.5),
                MetricRecord::new("", "CPU Usage %", 12.25),
                MetricRecord::new("sda", "Write Bytes/s", 0.0),
            ]
        );
    }

    #[test]
    fn test_duplicates_are_retained() {
        let store = MetricStore::default();
        store.record("eth0", "Network Inbound Bytes/s", 1.0);
        store.record("eth0", "Network Inbound Bytes/s", 2.0);

        let records = store.records_for_instance("eth0").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value, 1.0);
        assert_eq!(records[1].value, 2.0);
    }

    #[test]
    fn test_list_instances_is_first_seen_order() {
        let store = MetricStore::default();
        store.record("b", "m", 1.0);
        store.record("a", "m", 1.0);
        store.record("b", "n", 1.0);
        store.record("", "m", 1.0);

        assert_eq!(store.list_instances().unwrap(), vec!["b", "a", ""]);
    }

    #[test]
    fn test_records_for_unknown_instance_is_empty() {
        let store = MetricStore::default();
        store.record("a", "m", 1.0);
        assert!(store.records_for_instance("z").unwrap().is_empty());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let store = MetricStore::default();
        assert!(store.clear().is_ok());
        store.record("a", "m", 1.0);
        assert!(store.clear().is_ok());
        assert!(store.clear().is_ok());
        assert!(store.all_records().unwrap().is_empty());
        assert!(store.list_instances().unwrap().is_empty());
    }

    #[test]
    #[traced_test]
    fn test_failed_insert_is_dropped_and_round_continues() {
        let backend = FlakyBackend::default();
        let fail_inserts = Arc::clone(&backend.fail_inserts);
        let store = MetricStore::new(Box::new(backend));

        assert!(store.record("a", "first", 1.0));
        fail_inserts.store(true, Ordering::SeqCst);
        assert!(!store.record("a", "dropped", 2.0));
        assert!(logs_contain("Dropping metric \"dropped\""));
        fail_inserts.store(false, Ordering::SeqCst);
        assert!(store.record("a", "third", 3.0));

        let names: Vec<String> = store
            .all_records()
            .unwrap()
            .into_iter()
            .map(|r| r.metric)
            .collect();
        assert_eq!(names, vec!["first", "third"]);
    }

    #[test]
    fn test_begin_round_settles_failed_clear() {
        let backend = FlakyBackend::default();
        let failing_clears = Arc::clone(&backend.failing_clears);
        let store = MetricStore::new(Box::new(backend));

        store.record("a", "m", 1.0);
        failing_clears.store(2, Ordering::SeqCst);
        assert!(store.clear().is_err());
        assert_eq!(store.all_records().unwrap().len(), 1);

        // one more failure, then success within the retry budget
        assert!(store.begin_round().is_ok());
        assert!(store.all_records().unwrap().is_empty());
        // nothing owed any more
        assert!(store.begin_round().is_ok());
    }

    #[test]
    fn test_begin_round_surfaces_persistent_clear_failure() {
        let backend = FlakyBackend::default();
        let failing_clears = Arc::clone(&backend.failing_clears);
        let store = MetricStore::new(Box::new(backend));

        store.record("a", "m", 1.0);
        failing_clears.store(100, Ordering::SeqCst);
        assert!(store.clear().is_err());

        let result = store.begin_round();
        assert_eq!(
            result,
            Err(StoreError::PersistentClearFailure {
                attempts: 1 + MAX_CLEAR_ATTEMPTS
            })
        );

        failing_clears.store(0, Ordering::SeqCst);
        assert!(store.begin_round().is_ok());
        assert!(store.all_records().unwrap().is_empty());
    }

    /// Backend that panics on any insert of `"boom"`.
    #[derive(Default)]
    struct PanickingBackend {
        inner: InMemoryBackend,
    }

    impl MetricBackend for PanickingBackend {
        fn insert(&mut self, record: MetricRecord) -> Result<(), StoreError> {
            assert_ne!(record.metric, "boom", "backend exploded");
            self.inner.insert(record)
        }

        fn select_all(&self) -> Result<Vec<MetricRecord>, StoreError> {
            self.inner.select_all()
        }

        fn select_distinct_instances(&self) -> Result<Vec<String>, StoreError> {
            self.inner.select_distinct_instances()
        }

        fn drop_and_recreate_schema(&mut self) -> Result<(), StoreError> {
            self.inner.drop_and_recreate_schema()
        }
    }

    #[test]
    fn test_store_survives_panicking_writer() {
        let store = Arc::new(MetricStore::new(Box::<PanickingBackend>::default()));
        store.record("host", "before", 1.0);

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || store.record("host", "boom", 0.0))
        };
        assert!(writer.join().is_err());

        assert!(store.record("host", "after", 2.0));
        assert_eq!(store.all_records().unwrap().len(), 2);
        assert!(store.clear().is_ok());
        assert!(store.begin_round().is_ok());
        assert!(store.all_records().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_writers() {
        let store = Arc::new(MetricStore::default());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.record(&format!("instance{t}"), &format!("metric{i}"), f64::from(i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.all_records().unwrap().len(), 200);
        assert_eq!(store.list_instances().unwrap().len(), 4);
        for t in 0..4 {
            let records = store.records_for_instance(&format!("instance{t}")).unwrap();
            let values: Vec<f64> = records.iter().map(|r| r.value).collect();
            let expected: Vec<f64> = (0..50).map(f64::from).collect();
            assert_eq!(values, expected);
        }
    }
}
