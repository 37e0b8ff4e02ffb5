// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Raw counter access.
//!
//! A [`CounterSource`] hands out [`CounterSnapshot`]s: one per instance, each a
//! bag of named numeric fields read at the same moment. Snapshots carry raw
//! values (bytes, ticks, milliseconds); turning them into published metrics is
//! the job of the [`engine`](crate::engine).

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

/// Groups of counters sampled together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Memory,
    Cpu,
    Disk,
    Network,
    Process,
    Thermal,
    Tcp,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Memory => "memory",
            Self::Cpu => "cpu",
            Self::Disk => "disk",
            Self::Network => "network",
            Self::Process => "process",
            Self::Thermal => "thermal",
            Self::Tcp => "tcp",
        };
        f.write_str(name)
    }
}

/// Which instances of a family to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceSelector {
    All,
    /// Only the system-wide instance, named `""`.
    SystemWide,
}

/// Fields of one instance read at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterSnapshot {
    pub instance: String,
    pub fields: HashMap<String, f64>,
    pub captured_at: Instant,
}

impl CounterSnapshot {
    pub fn new(instance: impl Into<String>, fields: HashMap<String, f64>) -> Self {
        Self {
            instance: instance.into(),
            fields,
            captured_at: Instant::now(),
        }
    }

    pub fn field(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("counter source unavailable: {0}")]
    Unavailable(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Provider of raw counters.
///
/// A field the platform does not provide is left out of the snapshot rather
/// than reported as zero.
pub trait CounterSource: Send + Sync {
    fn snapshot(
        &self,
        family: Family,
        selector: InstanceSelector,
    ) -> Result<Vec<CounterSnapshot>, SourceError>;

    /// Whether the platform can provide `family` at all.
    fn supports(&self, _family: Family) -> bool {
        true
    }
}
