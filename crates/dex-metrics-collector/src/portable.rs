// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Counter source backed by `sysinfo`, for hosts without procfs.
//!
//! `sysinfo` reports CPU usage as a percentage of the time since its previous
//! refresh. The source integrates those percentages over the time between
//! refreshes into tick counters, so the engine derives CPU usage from two
//! reads exactly as it does for `/proc/stat`. Disk I/O and TCP counters are
//! not exposed and those families are unsupported.

use crate::family::{PID_FIELD, USER_HZ};
use crate::source::{CounterSnapshot, CounterSource, Family, InstanceSelector, SourceError};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use sysinfo::{Components, Networks, ProcessesToUpdate, System};
use tracing::debug;

const PERCENT: f64 = 100.0;
const CELSIUS_TO_MILLICELSIUS: f64 = 1000.0;

type Fields = HashMap<String, f64>;

#[derive(Debug, Default, Clone, Copy)]
struct TickCounter {
    busy: f64,
    total: f64,
}

struct State {
    system: System,
    cpu_ticks: HashMap<String, TickCounter>,
    cpu_refreshed: Option<Instant>,
    process_ticks: HashMap<u32, f64>,
    processes_refreshed: Option<Instant>,
}

pub struct SysinfoCounterSource {
    state: Mutex<State>,
}

impl Default for SysinfoCounterSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoCounterSource {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                system: System::new(),
                cpu_ticks: HashMap::new(),
                cpu_refreshed: None,
                process_ticks: HashMap::new(),
                processes_refreshed: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Seconds since `last`, which is moved to now. 0 on the first call.
fn seconds_since(last: &mut Option<Instant>) -> f64 {
    let now = Instant::now();
    let elapsed = last.map_or(0.0, |then| now.duration_since(then).as_secs_f64());
    *last = Some(now);
    elapsed
}

impl State {
    fn read_memory(&mut self) -> Vec<(String, Fields)> {
        self.system.refresh_memory();
        let total = self.system.total_memory() as f64;
        let available = self.system.available_memory() as f64;
        vec![(
            String::new(),
            Fields::from([
                ("total_bytes".to_string(), total),
                ("available_bytes".to_string(), available),
                ("used_bytes".to_string(), (total - available).max(0.0)),
            ]),
        )]
    }

    fn read_cpus(&mut self) -> Vec<(String, Fields)> {
        self.system.refresh_cpu_usage();
        let elapsed = seconds_since(&mut self.cpu_refreshed);

        let mut usages = vec![(String::new(), self.system.global_cpu_usage())];
        usages.extend(
            self.system
                .cpus()
                .iter()
                .enumerate()
                .map(|(index, cpu)| (format!("cpu{index}"), cpu.cpu_usage())),
        );

        usages
            .into_iter()
            .map(|(instance, usage)| {
                let counter = self.cpu_ticks.entry(instance.clone()).or_default();
                counter.total += elapsed;
                counter.busy += elapsed * f64::from(usage).max(0.0).min(PERCENT) / PERCENT;
                let fields = Fields::from([
                    ("busy_ticks".to_string(), counter.busy),
                    ("total_ticks".to_string(), counter.total),
                ]);
                (instance, fields)
            })
            .collect()
    }

    fn read_processes(&mut self) -> Vec<(String, Fields)> {
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        let elapsed = seconds_since(&mut self.processes_refreshed);

        let mut processes: Vec<(u32, String, f64, f64)> = self
            .system
            .processes()
            .iter()
            .map(|(pid, process)| {
                (
                    pid.as_u32(),
                    process.name().to_string_lossy().into_owned(),
                    f64::from(process.cpu_usage()).max(0.0),
                    process.memory() as f64,
                )
            })
            .collect();
        processes.sort_unstable_by_key(|(pid, ..)| *pid);

        // pids that exited drop out of the accumulated ticks
        let mut ticks = HashMap::with_capacity(processes.len());
        let snapshots = processes
            .into_iter()
            .map(|(pid, name, usage, rss_bytes)| {
                let previous = self.process_ticks.get(&pid).copied().unwrap_or(0.0);
                let cpu_ticks = previous + elapsed * usage / PERCENT * USER_HZ;
                ticks.insert(pid, cpu_ticks);
                let fields = Fields::from([
                    (PID_FIELD.to_string(), f64::from(pid)),
                    ("cpu_ticks".to_string(), cpu_ticks),
                    ("rss_bytes".to_string(), rss_bytes),
                ]);
                (name, fields)
            })
            .collect();
        self.process_ticks = ticks;
        snapshots
    }
}

fn read_networks() -> Vec<(String, Fields)> {
    let networks = Networks::new_with_refreshed_list();
    let mut interfaces: Vec<(String, Fields)> = networks
        .list()
        .iter()
        .map(|(name, data)| {
            let fields = [
                ("rx_bytes", data.total_received()),
                ("tx_bytes", data.total_transmitted()),
                ("rx_packets", data.total_packets_received()),
                ("tx_packets", data.total_packets_transmitted()),
                ("rx_errors", data.total_errors_on_received()),
                ("tx_errors", data.total_errors_on_transmitted()),
            ]
            .map(|(field, value)| (field.to_string(), value as f64));
            (name.clone(), Fields::from(fields))
        })
        .collect();
    interfaces.sort_by(|a, b| a.0.cmp(&b.0));
    interfaces
}

fn read_components() -> Vec<(String, Fields)> {
    let components = Components::new_with_refreshed_list();
    let mut readings: Vec<(String, Fields)> = Vec::new();
    for (index, component) in components.list().iter().enumerate() {
        let celsius = component.temperature().map(f64::from).unwrap_or(f64::NAN);
        if !celsius.is_finite() {
            debug!("No temperature reading for {}", component.label());
            continue;
        }
        let mut instance = component.label().to_string();
        if readings.iter().any(|(existing, _)| *existing == instance) {
            instance = format!("{instance} {index}");
        }
        readings.push((
            instance,
            Fields::from([(
                "temp_millicelsius".to_string(),
                celsius * CELSIUS_TO_MILLICELSIUS,
            )]),
        ));
    }
    readings
}

impl CounterSource for SysinfoCounterSource {
    fn snapshot(
        &self,
        family: Family,
        selector: InstanceSelector,
    ) -> Result<Vec<CounterSnapshot>, SourceError> {
        let instances = match family {
            Family::Memory => self.lock().read_memory(),
            Family::Cpu => self.lock().read_cpus(),
            Family::Process => self.lock().read_processes(),
            Family::Network => read_networks(),
            Family::Thermal => read_components(),
            Family::Disk | Family::Tcp => {
                return Err(SourceError::Unavailable(format!(
                    "{family} counters are not exposed by sysinfo"
                )));
            }
        };

        Ok(instances
            .into_iter()
            .filter(|(instance, _)| selector == InstanceSelector::All || instance.is_empty())
            .map(|(instance, fields)| CounterSnapshot::new(instance, fields))
            .collect())
    }

    fn supports(&self, family: Family) -> bool {
        !matches!(family, Family::Disk | Family::Tcp)
    }
}
