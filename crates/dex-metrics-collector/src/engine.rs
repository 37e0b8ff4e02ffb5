// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns counter snapshots into published metrics.
//!
//! Cumulative families are read twice, one sampling window apart, and
//! reported as deltas: rates divide the increase by the window, ratios divide
//! one increase by another. A counter that went backwards (reset or wrap)
//! contributes a delta of 0. Instantaneous families are read once.

use crate::family::{self, Derivation, FamilySpec, MetricSpec, Sampling};
use crate::source::{CounterSnapshot, CounterSource, Family, InstanceSelector};
use insightfinder::store::MetricStore;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One metric value for one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedMetric {
    pub instance: String,
    pub name: &'static str,
    pub value: f64,
}

/// Metrics derived for one family during one sampling pass.
#[derive(Debug, Clone, PartialEq)]
pub struct FamilyMetrics {
    pub family: Family,
    pub metrics: Vec<DerivedMetric>,
}

/// Derives the metrics of a family from a single read.
pub fn derive_instantaneous(spec: &FamilySpec, snapshots: &[CounterSnapshot]) -> Vec<DerivedMetric> {
    let mut derived = Vec::new();
    for snapshot in snapshots {
        if spec.excludes(&snapshot.instance) {
            continue;
        }
        for metric in spec.metrics {
            if let Some(value) = single_read_value(metric, snapshot) {
                derived.push(DerivedMetric {
                    instance: snapshot.instance.clone(),
                    name: metric.name,
                    value: value * metric.factor,
                });
            }
        }
    }
    merge_members(spec, derived)
}

/// Derives the metrics of a family from two reads taken `window` apart.
///
/// Instances are reported in the order of the second read. An instance that
/// appears in only one of the reads is skipped; a field missing from either
/// read drops only the metrics that need it. For families with a
/// [`member_field`](FamilySpec::member_field) the same applies per member,
/// so a process that exits mid-window does not hide the others of its name.
pub fn derive_cumulative(
    spec: &FamilySpec,
    before: &[CounterSnapshot],
    after: &[CounterSnapshot],
    window: Duration,
) -> Vec<DerivedMetric> {
    let previous: HashMap<MemberKey<'_>, &CounterSnapshot> = before
        .iter()
        .map(|snapshot| (member_key(spec, snapshot), snapshot))
        .collect();

    let mut derived = Vec::new();
    for current in after {
        if spec.excludes(&current.instance) {
            continue;
        }
        let Some(previous) = previous.get(&member_key(spec, current)) else {
            debug!(
                "Skipping {} instance {:?} missing from the first read",
                spec.family, current.instance
            );
            continue;
        };
        for metric in spec.metrics {
            if let Some(value) = two_read_value(metric, previous, current, window) {
                derived.push(DerivedMetric {
                    instance: current.instance.clone(),
                    name: metric.name,
                    value: value * metric.factor,
                });
            }
        }
    }
    merge_members(spec, derived)
}

/// Instance name plus the member value, compared bitwise.
type MemberKey<'a> = (&'a str, Option<u64>);

fn member_key<'a>(spec: &FamilySpec, snapshot: &'a CounterSnapshot) -> MemberKey<'a> {
    let member = spec
        .member_field
        .and_then(|field| snapshot.field(field))
        .map(f64::to_bits);
    (snapshot.instance.as_str(), member)
}

/// Sums metrics of the same name reported by members of one instance.
fn merge_members(spec: &FamilySpec, derived: Vec<DerivedMetric>) -> Vec<DerivedMetric> {
    if spec.member_field.is_none() {
        return derived;
    }
    let mut positions: HashMap<(String, &'static str), usize> = HashMap::new();
    let mut merged: Vec<DerivedMetric> = Vec::with_capacity(derived.len());
    for metric in derived {
        match positions.entry((metric.instance.clone(), metric.name)) {
            Entry::Occupied(slot) => merged[*slot.get()].value += metric.value,
            Entry::Vacant(slot) => {
                slot.insert(merged.len());
                merged.push(metric);
            }
        }
    }
    merged
}

/// Increase of a counter, with resets counted as no increase.
pub fn counter_delta(before: f64, after: f64) -> f64 {
    if after < before {
        0.0
    } else {
        after - before
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

fn single_read_value(metric: &MetricSpec, snapshot: &CounterSnapshot) -> Option<f64> {
    match metric.derivation {
        Derivation::Gauge(field) => snapshot.field(field),
        Derivation::GaugeRatio {
            numerator,
            denominator,
        } => Some(ratio(snapshot.field(numerator)?, snapshot.field(denominator)?)),
        // a rate needs two reads
        Derivation::Rate(_) | Derivation::DeltaRatio { .. } => None,
    }
}

fn two_read_value(
    metric: &MetricSpec,
    before: &CounterSnapshot,
    after: &CounterSnapshot,
    window: Duration,
) -> Option<f64> {
    let delta = |field: &str| -> Option<f64> {
        Some(counter_delta(before.field(field)?, after.field(field)?))
    };
    match metric.derivation {
        Derivation::Gauge(_) | Derivation::GaugeRatio { .. } => single_read_value(metric, after),
        Derivation::Rate(field) => {
            let increase = delta(field)?;
            let secs = window.as_secs_f64();
            Some(if secs > 0.0 { increase / secs } else { 0.0 })
        }
        Derivation::DeltaRatio {
            numerator,
            denominator,
        } => Some(ratio(delta(numerator)?, delta(denominator)?)),
    }
}

/// Drops the families `source` can never provide.
fn supported(
    source: &dyn CounterSource,
    families: Vec<&'static FamilySpec>,
) -> Vec<&'static FamilySpec> {
    families
        .into_iter()
        .filter(|spec| {
            let supported = source.supports(spec.family);
            if !supported {
                info!("{} counters are not available on this platform", spec.family);
            }
            supported
        })
        .collect()
}

/// Samples every configured family from one [`CounterSource`].
pub struct SamplingEngine {
    source: Box<dyn CounterSource>,
    window: Duration,
    per_cpu: bool,
    families: Vec<&'static FamilySpec>,
}

impl SamplingEngine {
    /// Creates an engine over all known families.
    ///
    /// # Arguments
    ///
    /// * `source` - Where raw counters are read from
    /// * `window` - Time between the two reads of cumulative families
    /// * `per_cpu` - Also report one `cpuN` instance per logical CPU
    pub fn new(source: Box<dyn CounterSource>, window: Duration, per_cpu: bool) -> Self {
        let families = supported(source.as_ref(), family::ALL.to_vec());
        Self {
            source,
            window,
            per_cpu,
            families,
        }
    }

    /// Restricts sampling to the given families.
    #[must_use]
    pub fn with_families(mut self, families: Vec<&'static FamilySpec>) -> Self {
        self.families = supported(self.source.as_ref(), families);
        self
    }

    pub fn families(&self) -> impl Iterator<Item = Family> + '_ {
        self.families.iter().map(|spec| spec.family)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Runs one sampling pass.
    ///
    /// First reads of every cumulative family are taken together, then the
    /// engine waits out the sampling window before taking the second reads and
    /// the instantaneous reads. A family whose source fails is left out.
    pub async fn sample(&self) -> Vec<FamilyMetrics> {
        let first_reads: Vec<Option<Vec<CounterSnapshot>>> = self
            .families
            .iter()
            .map(|spec| match spec.sampling {
                Sampling::Cumulative => self.read(spec),
                Sampling::Instantaneous => None,
            })
            .collect();

        if first_reads.iter().any(Option::is_some) {
            debug!("Waiting {}s between counter reads", self.window.as_secs_f64());
            tokio::time::sleep(self.window).await;
        }

        let mut results = Vec::with_capacity(self.families.len());
        for (spec, first) in self.families.iter().zip(first_reads) {
            let metrics = match spec.sampling {
                Sampling::Instantaneous => match self.read(spec) {
                    Some(snapshots) => derive_instantaneous(spec, &snapshots),
                    None => continue,
                },
                Sampling::Cumulative => {
                    let Some(before) = first else { continue };
                    let Some(after) = self.read(spec) else {
                        continue;
                    };
                    derive_cumulative(spec, &before, &after, self.window)
                }
            };
            debug!("Derived {} {} metrics", metrics.len(), spec.family);
            results.push(FamilyMetrics {
                family: spec.family,
                metrics,
            });
        }
        results
    }

    /// Samples every family and writes the results into `store`.
    ///
    /// Returns the number of rows actually stored.
    pub async fn collect_and_submit(&self, store: &MetricStore) -> usize {
        let mut written = 0;
        for family_metrics in self.sample().await {
            for metric in &family_metrics.metrics {
                if store.record(&metric.instance, metric.name, metric.value) {
                    written += 1;
                }
            }
        }
        debug!("Stored {written} metric records");
        written
    }

    fn selector(&self, spec: &FamilySpec) -> InstanceSelector {
        if spec.system_wide_only || (spec.family == Family::Cpu && !self.per_cpu) {
            InstanceSelector::SystemWide
        } else {
            InstanceSelector::All
        }
    }

    fn read(&self, spec: &FamilySpec) -> Option<Vec<CounterSnapshot>> {
        match self.source.snapshot(spec.family, self.selector(spec)) {
            Ok(snapshots) => Some(snapshots),
            Err(e) => {
                warn!("Skipping {} metrics: {e}", spec.family);
                None
            }
        }
    }
}
