// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Counter source backed by procfs and sysfs.
//!
//! Every family is read from plain text files:
//!
//! | Family  | Files |
//! |---------|-------|
//! | memory  | `/proc/meminfo` |
//! | cpu     | `/proc/stat` |
//! | disk    | `/proc/diskstats` |
//! | network | `/proc/net/dev` |
//! | process | `/proc/[pid]/stat`, `/proc/[pid]/status` |
//! | tcp     | `/proc/net/snmp` |
//! | thermal | `/sys/class/thermal/thermal_zone*/{type,temp}` |

use crate::family::PID_FIELD;
use crate::source::{CounterSnapshot, CounterSource, Family, InstanceSelector, SourceError};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const SECTOR_SIZE: f64 = 512.0;
const KIB: f64 = 1024.0;

/// Block devices that never carry real I/O.
const IGNORED_DEVICE_PREFIXES: [&str; 2] = ["loop", "ram"];

type Fields = HashMap<String, f64>;

/// Reads counters from `/proc` and `/sys`, or from copies of them rooted
/// elsewhere.
#[derive(Debug, Clone)]
pub struct ProcfsCounterSource {
    proc_root: PathBuf,
    sys_root: PathBuf,
}

impl Default for ProcfsCounterSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcfsCounterSource {
    pub fn new() -> Self {
        Self::with_roots("/proc", "/sys")
    }

    pub fn with_roots(proc_root: impl Into<PathBuf>, sys_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            sys_root: sys_root.into(),
        }
    }

    fn proc_file(&self, relative: &str) -> Result<(String, String), SourceError> {
        read_file(&self.proc_root.join(relative))
    }

    fn read_processes(&self) -> Result<Vec<(String, Fields)>, SourceError> {
        let entries = fs::read_dir(&self.proc_root).map_err(|source| SourceError::Io {
            path: self.proc_root.display().to_string(),
            source,
        })?;

        let mut pids: Vec<u32> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .collect();
        pids.sort_unstable();

        let mut processes: Vec<(String, Fields)> = Vec::with_capacity(pids.len());
        for pid in pids {
            let dir = self.proc_root.join(pid.to_string());
            // processes exit between listing and reading
            let Ok(stat) = fs::read_to_string(dir.join("stat")) else {
                continue;
            };
            let Some((name, cpu_ticks)) = parse_pid_stat(&stat) else {
                debug!("Could not parse {}", dir.join("stat").display());
                continue;
            };
            let mut fields = Fields::from([
                (PID_FIELD.to_string(), f64::from(pid)),
                ("cpu_ticks".to_string(), cpu_ticks),
            ]);
            if let Some(rss) = fs::read_to_string(dir.join("status"))
                .ok()
                .and_then(|status| parse_vm_rss(&status))
            {
                fields.insert("rss_bytes".to_string(), rss);
            }
            processes.push((name, fields));
        }
        Ok(processes)
    }

    fn read_thermal_zones(&self) -> Result<Vec<(String, Fields)>, SourceError> {
        let thermal_dir = self.sys_root.join("class/thermal");
        let entries = fs::read_dir(&thermal_dir).map_err(|source| SourceError::Io {
            path: thermal_dir.display().to_string(),
            source,
        })?;

        let mut zones: Vec<(u32, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let index = name.to_str()?.strip_prefix("thermal_zone")?.parse().ok()?;
                Some((index, entry.path()))
            })
            .collect();
        zones.sort_unstable_by_key(|(index, _)| *index);

        let mut readings: Vec<(String, Fields)> = Vec::new();
        for (index, path) in zones {
            let Some(temp) = fs::read_to_string(path.join("temp"))
                .ok()
                .and_then(|raw| raw.trim().parse::<f64>().ok())
            else {
                debug!("No temperature reading in {}", path.display());
                continue;
            };
            let zone_type = fs::read_to_string(path.join("type"))
                .map(|raw| raw.trim().to_string())
                .unwrap_or_default();
            let mut instance = if zone_type.is_empty() {
                format!("thermal_zone{index}")
            } else {
                zone_type
            };
            if readings.iter().any(|(existing, _)| *existing == instance) {
                instance = format!("{instance} {index}");
            }
            readings.push((
                instance,
                Fields::from([("temp_millicelsius".to_string(), temp)]),
            ));
        }
        Ok(readings)
    }
}

impl CounterSource for ProcfsCounterSource {
    fn snapshot(
        &self,
        family: Family,
        selector: InstanceSelector,
    ) -> Result<Vec<CounterSnapshot>, SourceError> {
        let instances = match family {
            Family::Memory => {
                let (_, contents) = self.proc_file("meminfo")?;
                vec![(String::new(), parse_meminfo(&contents))]
            }
            Family::Cpu => {
                let (path, contents) = self.proc_file("stat")?;
                let cpus = parse_stat(&contents);
                if cpus.is_empty() {
                    return Err(parse_error(&path, "no cpu lines"));
                }
                cpus
            }
            Family::Disk => {
                let (_, contents) = self.proc_file("diskstats")?;
                parse_diskstats(&contents)
            }
            Family::Network => {
                let (_, contents) = self.proc_file("net/dev")?;
                parse_net_dev(&contents)
            }
            Family::Tcp => {
                let (path, contents) = self.proc_file("net/snmp")?;
                let tcp = parse_snmp_tcp(&contents)
                    .ok_or_else(|| parse_error(&path, "no Tcp section"))?;
                vec![(String::new(), tcp)]
            }
            Family::Process => self.read_processes()?,
            Family::Thermal => self.read_thermal_zones()?,
        };

        Ok(instances
            .into_iter()
            .filter(|(instance, _)| selector == InstanceSelector::All || instance.is_empty())
            .map(|(instance, fields)| CounterSnapshot::new(instance, fields))
            .collect())
    }
}

fn read_file(path: &Path) -> Result<(String, String), SourceError> {
    let display = path.display().to_string();
    match fs::read_to_string(path) {
        Ok(contents) => Ok((display, contents)),
        Err(source) => Err(SourceError::Io {
            path: display,
            source,
        }),
    }
}

fn parse_error(path: &str, reason: &str) -> SourceError {
    SourceError::Parse {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

/// Parses `/proc/meminfo` into byte counts.
///
/// `used_bytes` is `MemTotal - MemAvailable`, so it is only present when both
/// are.
pub fn parse_meminfo(contents: &str) -> Fields {
    let mut values: HashMap<&str, f64> = HashMap::new();
    for line in contents.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        if let Some(kib) = rest
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<f64>().ok())
        {
            values.insert(key.trim(), kib * KIB);
        }
    }

    let mut fields = Fields::new();
    let total = values.get("MemTotal").copied();
    let available = values.get("MemAvailable").copied();
    if let Some(total) = total {
        fields.insert("total_bytes".to_string(), total);
    }
    if let Some(available) = available {
        fields.insert("available_bytes".to_string(), available);
    }
    if let (Some(total), Some(available)) = (total, available) {
        fields.insert("used_bytes".to_string(), (total - available).max(0.0));
    }
    fields
}

/// Parses the `cpu` lines of `/proc/stat` into busy and total ticks.
///
/// The aggregate `cpu` line becomes the `""` instance, `cpuN` lines keep their
/// name. Idle time includes iowait; guest time is already part of user time
/// and is not counted twice.
pub fn parse_stat(contents: &str) -> Vec<(String, Fields)> {
    let mut cpus = Vec::new();
    for line in contents.lines() {
        let mut parts = line.split_whitespace();
        let Some(label) = parts.next() else { continue };
        if !label.starts_with("cpu") {
            continue;
        }
        let ticks: Vec<f64> = parts
            .take(8)
            .filter_map(|value| value.parse::<f64>().ok())
            .collect();
        if ticks.len() < 4 {
            continue;
        }
        let total: f64 = ticks.iter().sum();
        let idle = ticks[3] + ticks.get(4).copied().unwrap_or(0.0);
        let instance = if label == "cpu" { "" } else { label };
        cpus.push((
            instance.to_string(),
            Fields::from([
                ("busy_ticks".to_string(), total - idle),
                ("total_ticks".to_string(), total),
            ]),
        ));
    }
    cpus
}

/// Parses `/proc/diskstats`, skipping loop and ram devices.
pub fn parse_diskstats(contents: &str) -> Vec<(String, Fields)> {
    let mut disks = Vec::new();
    for line in contents.lines() {
        let columns: Vec<&str> = line.split_whitespace().collect();
        if columns.len() < 12 {
            continue;
        }
        let name = columns[2];
        if IGNORED_DEVICE_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
        {
            continue;
        }
        let column = |index: usize| columns[index].parse::<f64>().ok();

        let mut fields = Fields::new();
        let mut set = |field: &str, value: Option<f64>| {
            if let Some(value) = value {
                fields.insert(field.to_string(), value);
            }
        };
        set("reads", column(3));
        set("read_bytes", column(5).map(|sectors| sectors * SECTOR_SIZE));
        set("read_time_ms", column(6));
        set("writes", column(7));
        set("write_bytes", column(9).map(|sectors| sectors * SECTOR_SIZE));
        set("write_time_ms", column(10));
        set("in_progress", column(11));
        disks.push((name.to_string(), fields));
    }
    disks
}

/// Parses `/proc/net/dev`.
pub fn parse_net_dev(contents: &str) -> Vec<(String, Fields)> {
    const RECEIVE: [(usize, &str); 4] = [
        (0, "rx_bytes"),
        (1, "rx_packets"),
        (2, "rx_errors"),
        (3, "rx_drops"),
    ];
    const TRANSMIT: [(usize, &str); 4] = [
        (8, "tx_bytes"),
        (9, "tx_packets"),
        (10, "tx_errors"),
        (11, "tx_drops"),
    ];

    let mut interfaces = Vec::new();
    // two header lines, then "iface: counters..."
    for line in contents.lines() {
        let Some((name, counters)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.contains('|') || name.is_empty() {
            continue;
        }
        let values: Vec<Option<f64>> = counters
            .split_whitespace()
            .map(|value| value.parse::<f64>().ok())
            .collect();

        let mut fields = Fields::new();
        for (index, field) in RECEIVE.iter().chain(TRANSMIT.iter()) {
            if let Some(Some(value)) = values.get(*index) {
                fields.insert(field.to_string(), *value);
            }
        }
        interfaces.push((name.to_string(), fields));
    }
    interfaces
}

/// Parses the `Tcp:` header and value lines of `/proc/net/snmp`.
pub fn parse_snmp_tcp(contents: &str) -> Option<Fields> {
    let mut tcp_lines = contents
        .lines()
        .filter_map(|line| line.strip_prefix("Tcp:"));
    let header = tcp_lines.next()?;
    let values = tcp_lines.next()?;

    Some(
        header
            .split_whitespace()
            .zip(values.split_whitespace())
            .filter_map(|(name, value)| Some((name.to_string(), value.parse::<f64>().ok()?)))
            .collect(),
    )
}

/// Extracts the command name and `utime + stime` from `/proc/[pid]/stat`.
pub fn parse_pid_stat(contents: &str) -> Option<(String, f64)> {
    // the command name is parenthesised and may itself contain spaces or ')'
    let open = contents.find('(')?;
    let close = contents.rfind(')')?;
    let name = contents.get(open + 1..close)?.to_string();
    let rest: Vec<&str> = contents.get(close + 1..)?.split_whitespace().collect();
    // rest[0] is the state; utime and stime are fields 14 and 15 of the line
    let utime = rest.get(11)?.parse::<f64>().ok()?;
    let stime = rest.get(12)?.parse::<f64>().ok()?;
    Some((name, utime + stime))
}

/// Reads `VmRSS` from `/proc/[pid]/status`, in bytes.
pub fn parse_vm_rss(contents: &str) -> Option<f64> {
    contents
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kib| kib.parse::<f64>().ok())
        .map(|kib| kib * KIB)
}
