pub mod power;
pub mod system;

use crate::config::{BatteryConfig, Config};
use crate::snapshot::{
    clamp_percent, BatteryStat, CpuInfo, CpuUsage, DiskStat, HostInfo, MemoryStat,
    MetricsSnapshot, NetworkStat, ProcessStat, TempReading,
};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

/// `unavailable` reason for a reading switched off in config.
pub const REASON_DISABLED: &str = "disabled";
/// `unavailable` reason for a host without a battery.
pub const REASON_NO_BATTERY: &str = "no battery present";
/// `unavailable` reason for a finite value that could not be read.
pub const REASON_NON_FINITE: &str = "non-finite reading";
const REASON_UNSUPPORTED: &str = "not supported on this platform";

/// Whether an `unavailable` reason records a failed read rather than a
/// reading that is switched off or absent on this host.
pub fn is_collect_failure(reason: &str) -> bool {
    reason != REASON_DISABLED && reason != REASON_NO_BATTERY && !reason.ends_with(REASON_UNSUPPORTED)
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollectError {
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
    #[error("{reading} reading failed: {reason}")]
    Failed {
        reading: &'static str,
        reason: String,
    },
    #[error("system statistics subsystem could not be initialized: {0}")]
    Init(String),
}

impl CollectError {
    pub fn failed(reading: &'static str, reason: impl Into<String>) -> Self {
        Self::Failed {
            reading,
            reason: reason.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Init(_))
    }
}

/// OS/hardware query layer. One implementation per platform is chosen at
/// startup and injected into [`MetricsCollector`].
///
/// Each method reads one metric source. `Unsupported` and `Failed` are soft and
/// only blank that reading; `Init` aborts the whole snapshot.
pub trait SystemProvider: Send + Sync {
    fn host(&self) -> Result<HostInfo, CollectError>;
    fn cpu_info(&self) -> Result<CpuInfo, CollectError>;
    fn cpu_usage(&self) -> Result<CpuUsage, CollectError>;
    fn memory(&self) -> Result<MemoryStat, CollectError>;
    fn disks(&self) -> Result<BTreeMap<String, DiskStat>, CollectError>;
    fn network(&self) -> Result<NetworkStat, CollectError>;
    fn temperatures(&self) -> Result<Vec<TempReading>, CollectError>;
    /// Whole process table. `cpu_percent` is already scaled to the machine.
    fn processes(&self) -> Result<Vec<ProcessStat>, CollectError>;
    /// `Ok(None)` means the host has no battery.
    fn battery(&self) -> Result<Option<BatteryStat>, CollectError>;
}

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub top_processes: usize,
    pub include_per_cpu: bool,
    pub include_network: bool,
    pub temperature_monitoring: bool,
    pub battery: BatteryConfig,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl CollectorSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            top_processes: cfg.monitoring.top_processes,
            include_per_cpu: cfg.monitoring.include_per_cpu,
            include_network: cfg.monitoring.include_network,
            temperature_monitoring: cfg.monitoring.temperature_monitoring,
            battery: cfg.battery.clone(),
        }
    }
}

pub struct MetricsCollector {
    provider: Box<dyn SystemProvider>,
    settings: CollectorSettings,
    cpu_info: Result<CpuInfo, CollectError>,
}

impl MetricsCollector {
    pub fn new(
        provider: Box<dyn SystemProvider>,
        settings: CollectorSettings,
    ) -> Result<Self, CollectError> {
        let cpu_info = provider.cpu_info();
        if let Err(err) = &cpu_info {
            if err.is_fatal() {
                return Err(err.clone());
            }
            debug!(error = %err, "cpu identity unavailable");
        }
        Ok(Self {
            provider,
            settings,
            cpu_info,
        })
    }

    /// Battery reading alone, with the low-battery flag and charge estimate.
    pub fn battery(&self) -> Result<Option<BatteryStat>, CollectError> {
        self.provider
            .battery()?
            .map(|stat| finish_battery(stat, &self.settings.battery))
            .transpose()
    }

    /// Reads every metric source once. Individual readings fail softly; only a
    /// fatal provider error is returned.
    pub fn snapshot(&self) -> Result<MetricsSnapshot, CollectError> {
        let mut unavailable = BTreeMap::new();
        let p = self.provider.as_ref();

        let system = soften("system", p.host(), &mut unavailable)?;
        let cpu_info = soften("cpu_info", self.cpu_info.clone(), &mut unavailable)?;

        let usage = soften("cpu_percent", p.cpu_usage(), &mut unavailable)?;
        let (cpu_percent, per_cpu_percent, load_average) = match usage {
            Some(usage) => {
                let total = clamp_percent(usage.total_percent);
                if total.is_none() {
                    unavailable.insert("cpu_percent".to_string(), REASON_NON_FINITE.to_string());
                }
                // One entry per core so position `i` is always core `i`.
                let per_cpu = if self.settings.include_per_cpu {
                    Some(
                        usage
                            .per_cpu_percent
                            .iter()
                            .map(|v| clamp_percent(*v))
                            .collect(),
                    )
                } else {
                    unavailable.insert("per_cpu_percent".to_string(), REASON_DISABLED.to_string());
                    None
                };
                if usage.load_average.is_none() {
                    unavailable.insert("load_average".to_string(), REASON_UNSUPPORTED.to_string());
                }
                (total, per_cpu, usage.load_average)
            }
            None => (None, None, None),
        };

        let memory = soften("memory", p.memory().and_then(normalize_memory), &mut unavailable)?;
        let disk = soften("disk", p.disks(), &mut unavailable)?.map(normalize_disks);

        let network = if self.settings.include_network {
            soften("network", p.network(), &mut unavailable)?
        } else {
            unavailable.insert("network".to_string(), REASON_DISABLED.to_string());
            None
        };

        let temperature_readings = if self.settings.temperature_monitoring {
            soften("temperature_readings", p.temperatures(), &mut unavailable)?
                .map(normalize_temperatures)
                .unwrap_or_default()
        } else {
            unavailable.insert("temperature_readings".to_string(), REASON_DISABLED.to_string());
            Vec::new()
        };

        let processes = soften("top_processes", p.processes(), &mut unavailable)?;
        let process_count = processes.as_ref().map(Vec::len);
        let top_processes = processes.map(|list| top_processes(list, self.settings.top_processes));

        let battery = p
            .battery()
            .and_then(|b| b.map(|stat| finish_battery(stat, &self.settings.battery)).transpose());
        let battery = match soften("battery", battery, &mut unavailable)? {
            Some(Some(stat)) => Some(stat),
            Some(None) => {
                unavailable.insert("battery".to_string(), REASON_NO_BATTERY.to_string());
                None
            }
            None => None,
        };

        Ok(MetricsSnapshot {
            timestamp: now_unix(),
            cpu_percent,
            per_cpu_percent,
            load_average,
            cpu_info,
            memory,
            disk,
            network,
            temperature_readings,
            top_processes,
            process_count,
            battery,
            system,
            unavailable,
        })
    }
}

/// Converts a soft reading error into `None` plus an `unavailable` entry.
fn soften<T>(
    reading: &str,
    result: Result<T, CollectError>,
    unavailable: &mut BTreeMap<String, String>,
) -> Result<Option<T>, CollectError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            debug!(reading, error = %err, "reading unavailable");
            unavailable.insert(reading.to_string(), err.to_string());
            Ok(None)
        }
    }
}

fn normalize_memory(mut mem: MemoryStat) -> Result<MemoryStat, CollectError> {
    mem.percent = clamp_percent(mem.percent)
        .ok_or_else(|| CollectError::failed("memory", REASON_NON_FINITE))?;
    mem.swap_percent = mem.swap_percent.and_then(clamp_percent);
    Ok(mem)
}

fn normalize_disks(mut disks: BTreeMap<String, DiskStat>) -> BTreeMap<String, DiskStat> {
    for d in disks.values_mut() {
        d.percent = d.percent.and_then(clamp_percent);
    }
    disks
}

fn normalize_temperatures(temps: Vec<TempReading>) -> Vec<TempReading> {
    temps
        .into_iter()
        .filter(|t| t.celsius.is_finite() && t.celsius > 0.0)
        .collect()
}

/// Sorts by CPU descending with ascending PID as tie-break, then truncates.
/// Processes with a non-finite CPU or memory reading are left out.
pub fn top_processes(mut processes: Vec<ProcessStat>, limit: usize) -> Vec<ProcessStat> {
    let before = processes.len();
    processes.retain_mut(|p| {
        match (clamp_percent(p.cpu_percent), clamp_percent(p.memory_percent)) {
            (Some(cpu), Some(mem)) => {
                p.cpu_percent = cpu;
                p.memory_percent = mem;
                true
            }
            _ => false,
        }
    });
    if processes.len() < before {
        debug!(dropped = before - processes.len(), "processes with non-finite usage left out");
    }
    processes.sort_by(|a, b| {
        b.cpu_percent
            .partial_cmp(&a.cpu_percent)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.pid.cmp(&b.pid))
    });
    processes.truncate(limit);
    processes
}

fn finish_battery(mut stat: BatteryStat, cfg: &BatteryConfig) -> Result<BatteryStat, CollectError> {
    stat.percent = clamp_percent(stat.percent)
        .ok_or_else(|| CollectError::failed("battery", REASON_NON_FINITE))?;
    stat.health_percent = stat.health_percent.and_then(clamp_percent);
    stat.low_battery = !stat.power_plugged && stat.percent <= cfg.low_battery_threshold;
    if stat.power_plugged && stat.time_to_full.is_none() && stat.percent < 100.0 {
        stat.time_to_full = power::estimate_charge_seconds(stat.percent, cfg);
    }
    Ok(stat)
}

pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
