// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Drives collection rounds: sample, store, ship, clear.

use crate::error::RoundError;
use dex_metrics_collector::engine::SamplingEngine;
use insightfinder::flusher::Flusher;
use insightfinder::store::MetricStore;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a successful round did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoundReport {
    /// Rows written to the store.
    pub records: usize,
    /// Chunks delivered.
    pub chunks: usize,
    /// Points delivered.
    pub points: usize,
}

pub struct RoundDriver {
    engine: SamplingEngine,
    store: MetricStore,
    flusher: Flusher,
    round_interval: Duration,
}

impl RoundDriver {
    pub fn new(
        engine: SamplingEngine,
        store: MetricStore,
        flusher: Flusher,
        round_interval: Duration,
    ) -> Self {
        Self {
            engine,
            store,
            flusher,
            round_interval,
        }
    }

    pub fn store(&self) -> &MetricStore {
        &self.store
    }

    /// Runs one round started at `start`.
    ///
    /// The store is cleared after the shipment whether it succeeded or not; a
    /// clear that fails is retried at the start of the next round, which is
    /// skipped when the store still cannot be emptied.
    pub async fn run_round(&self, start: SystemTime) -> Result<RoundReport, RoundError> {
        self.store.begin_round().map_err(RoundError::Skipped)?;

        let records = self.engine.collect_and_submit(&self.store).await;
        let shipped = self.flusher.flush(&self.store, epoch_millis(start)).await;

        if let Err(e) = self.store.clear() {
            warn!("Metric store not cleared after shipment, will retry next round: {e}");
        }

        let flushed = shipped?;
        Ok(RoundReport {
            records,
            chunks: flushed.chunks,
            points: flushed.points,
        })
    }

    /// Runs rounds every `round_interval` until `cancel` fires.
    ///
    /// The first round starts immediately. A round that overruns the interval
    /// delays the next one instead of overlapping it.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.round_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let start = SystemTime::now();
            info!("Start collecting metrics");
            tokio::select! {
                () = cancel.cancelled() => {
                    self.discard_round();
                    break;
                }
                result = self.run_round(start) => match result {
                    Ok(report) => info!(
                        "End collecting metrics: {} records stored, {} points shipped in {} chunks",
                        report.records, report.points, report.chunks
                    ),
                    Err(e) => error!("Collection round failed: {e}"),
                },
            }
        }
        info!("Stopped collecting metrics");
    }

    /// Drops whatever an interrupted round left in the store.
    fn discard_round(&self) {
        debug!("Round interrupted, discarding collected metrics");
        if let Err(e) = self.store.clear() {
            warn!("Metric store not cleared after interrupted round: {e}");
        }
    }
}

/// Milliseconds since the Unix epoch, or 0 for times before it.
pub fn epoch_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use dex_metrics_collector::source::{
        CounterSnapshot, CounterSource, Family, InstanceSelector, SourceError,
    };
    use insightfinder::errors::StoreError;
    use insightfinder::store::{MetricBackend, MetricRecord};
    use tracing_test::traced_test;

    struct NoCounters;

    impl CounterSource for NoCounters {
        fn snapshot(
            &self,
            family: Family,
            _selector: InstanceSelector,
        ) -> Result<Vec<CounterSnapshot>, SourceError> {
            Err(SourceError::Unavailable(family.to_string()))
        }
    }

    /// Backend that holds rows but can never be cleared.
    #[derive(Default)]
    struct LockedBackend {
        rows: Vec<MetricRecord>,
    }

    impl MetricBackend for LockedBackend {
        fn insert(&mut self, record: MetricRecord) -> Result<(), StoreError> {
            self.rows.push(record);
            Ok(())
        }

        fn select_all(&self) -> Result<Vec<MetricRecord>, StoreError> {
            Ok(self.rows.clone())
        }

        fn select_distinct_instances(&self) -> Result<Vec<String>, StoreError> {
            Ok(self.rows.iter().map(|row| row.instance.clone()).collect())
        }

        fn drop_and_recreate_schema(&mut self) -> Result<(), StoreError> {
            Err(StoreError::Backend("table locked".to_string()))
        }
    }

    fn driver(store: MetricStore) -> RoundDriver {
        let config = AgentConfig::default();
        let engine = SamplingEngine::new(Box::new(NoCounters), config.sampling_window, false);
        let flusher = Flusher::new(config.flusher_config()).unwrap();
        RoundDriver::new(engine, store, flusher, config.round_interval)
    }

    #[test]
    #[traced_test]
    fn test_discarded_round_logs_failed_clear() {
        let driver = driver(MetricStore::new(Box::<LockedBackend>::default()));
        driver.store().record("host", "Memory Used MB", 1.0);

        driver.discard_round();

        assert!(logs_contain("not cleared after interrupted round"));
        assert!(driver.store().begin_round().is_err());
    }

    #[test]
    #[traced_test]
    fn test_discarded_round_empties_store() {
        let driver = driver(MetricStore::default());
        driver.store().record("host", "Memory Used MB", 1.0);

        driver.discard_round();

        assert!(driver.store().all_records().unwrap().is_empty());
        assert!(!logs_contain("not cleared"));
    }

    #[test]
    fn test_epoch_millis() {
        let time = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        assert_eq!(epoch_millis(time), 1_700_000_000_123);
        assert_eq!(epoch_millis(UNIX_EPOCH), 0);
        assert_eq!(epoch_millis(UNIX_EPOCH - Duration::from_secs(1)), 0);
    }
}
