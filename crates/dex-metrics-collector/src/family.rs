// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Declarative description of every counter family and the metrics derived
//! from it.
//!
//! Field names refer to the raw fields a [`CounterSource`](crate::source::CounterSource)
//! puts into its snapshots.

use crate::source::Family;

pub const BYTES_TO_MB: f64 = 1.0 / 1_048_576.0;
pub const FRACTION_TO_PERCENT: f64 = 100.0;

/// Field holding the process id in process snapshots.
pub const PID_FIELD: &str = "pid";

/// Clock ticks per second used by `/proc/[pid]/stat`.
pub const USER_HZ: f64 = 100.0;

/// Interface name fragments that never describe a physical link.
const EXCLUDED_INTERFACE_FRAGMENTS: [&str; 4] = ["loopback", "isatap", "teredo", "pseudo-interface"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampling {
    /// One read.
    Instantaneous,
    /// Two reads one sampling window apart.
    Cumulative,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Derivation {
    /// Value of the field; for cumulative families, from the second read.
    Gauge(&'static str),
    /// Increase of the field per second over the window.
    Rate(&'static str),
    /// Increase of `numerator` divided by increase of `denominator`, or 0 when
    /// the denominator did not move.
    DeltaRatio {
        numerator: &'static str,
        denominator: &'static str,
    },
    /// `numerator / denominator` from a single read, or 0 when the denominator
    /// is 0.
    GaugeRatio {
        numerator: &'static str,
        denominator: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSpec {
    pub name: &'static str,
    pub derivation: Derivation,
    pub factor: f64,
}

impl MetricSpec {
    const fn new(name: &'static str, derivation: Derivation, factor: f64) -> Self {
        Self {
            name,
            derivation,
            factor,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FamilySpec {
    pub family: Family,
    pub sampling: Sampling,
    /// Read only the `""` instance.
    pub system_wide_only: bool,
    pub metrics: &'static [MetricSpec],
    /// Returns `true` for instances to leave out.
    pub instance_filter: Option<fn(&str) -> bool>,
    /// Field telling apart several snapshots published under one instance,
    /// such as the pids of processes sharing a name. Members are matched
    /// across reads on `(instance, member)` and their metrics summed.
    pub member_field: Option<&'static str>,
}

impl FamilySpec {
    pub fn excludes(&self, instance: &str) -> bool {
        self.instance_filter.is_some_and(|filter| filter(instance))
    }
}

/// Whether a network interface is a loopback, tunnel or pseudo device.
pub fn is_excluded_interface(name: &str) -> bool {
    let lowered = name.to_lowercase();
    lowered == "lo"
        || EXCLUDED_INTERFACE_FRAGMENTS
            .iter()
            .any(|fragment| lowered.contains(fragment))
}

pub const MEMORY: FamilySpec = FamilySpec {
    family: Family::Memory,
    sampling: Sampling::Instantaneous,
    system_wide_only: true,
    metrics: &[
        MetricSpec::new(
            "Memory Available MB",
            Derivation::Gauge("available_bytes"),
            BYTES_TO_MB,
        ),
        MetricSpec::new("Memory Used MB", Derivation::Gauge("used_bytes"), BYTES_TO_MB),
        MetricSpec::new(
            "Memory Usage %",
            Derivation::GaugeRatio {
                numerator: "used_bytes",
                denominator: "total_bytes",
            },
            FRACTION_TO_PERCENT,
        ),
    ],
    instance_filter: None,
    member_field: None,
};

pub const CPU: FamilySpec = FamilySpec {
    family: Family::Cpu,
    sampling: Sampling::Cumulative,
    system_wide_only: false,
    metrics: &[MetricSpec::new(
        "CPU Usage %",
        Derivation::DeltaRatio {
            numerator: "busy_ticks",
            denominator: "total_ticks",
        },
        FRACTION_TO_PERCENT,
    )],
    instance_filter: None,
    member_field: None,
};

pub const DISK: FamilySpec = FamilySpec {
    family: Family::Disk,
    sampling: Sampling::Cumulative,
    system_wide_only: false,
    metrics: &[
        MetricSpec::new("Read Bytes/s", Derivation::Rate("read_bytes"), 1.0),
        MetricSpec::new("Write Bytes/s", Derivation::Rate("write_bytes"), 1.0),
        MetricSpec::new("Read Ops/s", Derivation::Rate("reads"), 1.0),
        MetricSpec::new("Write Ops/s", Derivation::Rate("writes"), 1.0),
        MetricSpec::new("Queue Length", Derivation::Gauge("in_progress"), 1.0),
        MetricSpec::new(
            "Read Latency ms",
            Derivation::DeltaRatio {
                numerator: "read_time_ms",
                denominator: "reads",
            },
            1.0,
        ),
        MetricSpec::new(
            "Write Latency ms",
            Derivation::DeltaRatio {
                numerator: "write_time_ms",
                denominator: "writes",
            },
            1.0,
        ),
    ],
    instance_filter: None,
    member_field: None,
};

pub const NETWORK: FamilySpec = FamilySpec {
    family: Family::Network,
    sampling: Sampling::Cumulative,
    system_wide_only: false,
    metrics: &[
        MetricSpec::new("Network Inbound Bytes/s", Derivation::Rate("rx_bytes"), 1.0),
        MetricSpec::new("Network Outbound Bytes/s", Derivation::Rate("tx_bytes"), 1.0),
        MetricSpec::new(
            "Network Inbound MB/s",
            Derivation::Rate("rx_bytes"),
            BYTES_TO_MB,
        ),
        MetricSpec::new(
            "Network Outbound MB/s",
            Derivation::Rate("tx_bytes"),
            BYTES_TO_MB,
        ),
        MetricSpec::new(
            "Network Inbound Packets/s",
            Derivation::Rate("rx_packets"),
            1.0,
        ),
        MetricSpec::new(
            "Network Outbound Packets/s",
            Derivation::Rate("tx_packets"),
            1.0,
        ),
        MetricSpec::new("Network Inbound Errors/s", Derivation::Rate("rx_errors"), 1.0),
        MetricSpec::new(
            "Network Outbound Errors/s",
            Derivation::Rate("tx_errors"),
            1.0,
        ),
        MetricSpec::new("Network Inbound Drops/s", Derivation::Rate("rx_drops"), 1.0),
        MetricSpec::new("Network Outbound Drops/s", Derivation::Rate("tx_drops"), 1.0),
    ],
    instance_filter: Some(is_excluded_interface),
    member_field: None,
};

pub const PROCESS: FamilySpec = FamilySpec {
    family: Family::Process,
    sampling: Sampling::Cumulative,
    system_wide_only: false,
    metrics: &[
        // ticks/s over USER_HZ is a fraction of one core
        MetricSpec::new(
            "Process CPU Usage %",
            Derivation::Rate("cpu_ticks"),
            FRACTION_TO_PERCENT / USER_HZ,
        ),
        MetricSpec::new(
            "Process Memory Used MB",
            Derivation::Gauge("rss_bytes"),
            BYTES_TO_MB,
        ),
    ],
    instance_filter: None,
    member_field: Some(PID_FIELD),
};

pub const THERMAL: FamilySpec = FamilySpec {
    family: Family::Thermal,
    sampling: Sampling::Instantaneous,
    system_wide_only: false,
    metrics: &[MetricSpec::new(
        "Thermal Temperature",
        Derivation::Gauge("temp_millicelsius"),
        0.001,
    )],
    instance_filter: None,
    member_field: None,
};

pub const TCP: FamilySpec = FamilySpec {
    family: Family::Tcp,
    sampling: Sampling::Cumulative,
    system_wide_only: true,
    metrics: &[
        MetricSpec::new(
            "TCP Connections Established",
            Derivation::Gauge("CurrEstab"),
            1.0,
        ),
        MetricSpec::new("TCP Active Opens/s", Derivation::Rate("ActiveOpens"), 1.0),
        MetricSpec::new("TCP Passive Opens/s", Derivation::Rate("PassiveOpens"), 1.0),
        MetricSpec::new(
            "TCP Connection Failures/s",
            Derivation::Rate("AttemptFails"),
            1.0,
        ),
        MetricSpec::new(
            "TCP Connections Reset/s",
            Derivation::Rate("EstabResets"),
            1.0,
        ),
        MetricSpec::new("TCP Segments Received/s", Derivation::Rate("InSegs"), 1.0),
        MetricSpec::new("TCP Segments Sent/s", Derivation::Rate("OutSegs"), 1.0),
        MetricSpec::new(
            "TCP Segments Retransmitted/s",
            Derivation::Rate("RetransSegs"),
            1.0,
        ),
    ],
    instance_filter: None,
    member_field: None,
};

/// Every family, in collection order.
pub const ALL: [&FamilySpec; 7] = [&MEMORY, &CPU, &DISK, &NETWORK, &PROCESS, &THERMAL, &TCP];
