use crate::collectors::{power, CollectError, SystemProvider};
use crate::snapshot::{
    percent_of, BatteryStat, CpuInfo, CpuUsage, DiskStat, HostInfo, InterfaceStat, LoadAverage,
    MemoryStat, NetworkStat, ProcessStat, TempReading,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use sysinfo::{
    ComponentExt, CpuExt, DiskExt, NetworkExt, NetworksExt, PidExt, ProcessExt, System, SystemExt,
};
use tracing::debug;

/// [`SystemProvider`] backed by `sysinfo`, with `/sys` fallbacks on Linux.
pub struct SysinfoProvider {
    system: Mutex<SysinfoState>,
    sys_root: PathBuf,
}

struct SysinfoState {
    system: System,
    last_cpu_refresh: Option<Instant>,
}

impl SysinfoProvider {
    pub fn new() -> Result<Self, CollectError> {
        Self::with_sys_root("/sys")
    }

    pub fn with_sys_root(sys_root: impl AsRef<Path>) -> Result<Self, CollectError> {
        if !System::IS_SUPPORTED {
            return Err(CollectError::Init(format!(
                "sysinfo does not support {}",
                std::env::consts::OS
            )));
        }
        let mut system = System::new();
        system.refresh_cpu();
        if system.cpus().is_empty() {
            return Err(CollectError::Init("no CPUs reported by the OS".to_string()));
        }
        Ok(Self {
            system: Mutex::new(SysinfoState {
                system,
                last_cpu_refresh: Some(Instant::now()),
            }),
            sys_root: sys_root.as_ref().to_path_buf(),
        })
    }
}

impl SysinfoState {
    /// CPU usage is a delta between two refreshes; wait out the minimum
    /// interval so the reading is not zero.
    fn refresh_cpu(&mut self) {
        if let Some(last) = self.last_cpu_refresh {
            let elapsed = last.elapsed();
            if elapsed < System::MINIMUM_CPU_UPDATE_INTERVAL {
                std::thread::sleep(System::MINIMUM_CPU_UPDATE_INTERVAL - elapsed);
            }
        }
        self.system.refresh_cpu();
        self.last_cpu_refresh = Some(Instant::now());
    }
}

impl SystemProvider for SysinfoProvider {
    fn host(&self) -> Result<HostInfo, CollectError> {
        let guard = self.system.lock();
        let system = &guard.system;
        Ok(HostInfo {
            platform: system
                .name()
                .unwrap_or_else(|| std::env::consts::OS.to_string()),
            host_name: system.host_name(),
            os_version: system.os_version(),
            kernel_version: system.kernel_version(),
            uptime_seconds: system.uptime(),
            boot_time: system.boot_time(),
        })
    }

    fn cpu_info(&self) -> Result<CpuInfo, CollectError> {
        let guard = self.system.lock();
        let system = &guard.system;
        let cpus = system.cpus();
        if cpus.is_empty() {
            return Err(CollectError::failed("cpu_info", "no CPUs reported"));
        }
        let frequency_mhz = cpus.iter().map(|c| c.frequency()).max().unwrap_or(0);
        let brand = cpus[0].brand().trim().to_string();
        Ok(CpuInfo {
            core_count: cpus.len(),
            physical_core_count: system.physical_core_count(),
            frequency_ghz: (frequency_mhz > 0).then(|| frequency_mhz as f64 / 1000.0),
            model_name: (!brand.is_empty()).then_some(brand),
        })
    }

    fn cpu_usage(&self) -> Result<CpuUsage, CollectError> {
        let mut guard = self.system.lock();
        guard.refresh_cpu();
        let system = &guard.system;
        let per_cpu_percent: Vec<f64> = system.cpus().iter().map(|c| c.cpu_usage() as f64).collect();
        if per_cpu_percent.is_empty() {
            return Err(CollectError::failed("cpu_percent", "no CPUs reported"));
        }
        let total_percent = per_cpu_percent.iter().sum::<f64>() / per_cpu_percent.len() as f64;
        Ok(CpuUsage {
            total_percent,
            per_cpu_percent,
            load_average: load_average(system),
        })
    }

    fn memory(&self) -> Result<MemoryStat, CollectError> {
        let mut guard = self.system.lock();
        guard.system.refresh_memory();
        let system = &guard.system;
        let total = system.total_memory();
        if total == 0 {
            return Err(CollectError::failed("memory", "total memory reported as zero"));
        }
        let available = system.available_memory();
        let used = total.saturating_sub(available);
        let swap_total = system.total_swap();
        let swap_used = system.used_swap();
        let percent = percent_of(used, total)
            .ok_or_else(|| CollectError::failed("memory", "non-finite usage percent"))?;
        Ok(MemoryStat {
            total_bytes: total,
            available_bytes: available,
            used_bytes: used,
            percent,
            swap_total_bytes: swap_total,
            swap_used_bytes: swap_used,
            swap_percent: percent_of(swap_used, swap_total),
        })
    }

    fn disks(&self) -> Result<BTreeMap<String, DiskStat>, CollectError> {
        let mut guard = self.system.lock();
        guard.system.refresh_disks_list();
        guard.system.refresh_disks();
        let mut out = BTreeMap::new();
        for d in guard.system.disks() {
            let total = d.total_space();
            let free = d.available_space().min(total);
            let used = total - free;
            out.insert(
                d.mount_point().to_string_lossy().to_string(),
                DiskStat {
                    total,
                    used,
                    free,
                    percent: percent_of(used, total),
                    file_system: String::from_utf8_lossy(d.file_system()).to_string(),
                    device: d.name().to_string_lossy().to_string(),
                },
            );
        }
        if out.is_empty() {
            return Err(CollectError::failed("disk", "no mounted disks reported"));
        }
        Ok(out)
    }

    fn network(&self) -> Result<NetworkStat, CollectError> {
        let mut guard = self.system.lock();
        guard.system.refresh_networks_list();
        guard.system.refresh_networks();
        let mut per_interface = BTreeMap::new();
        for (iface, data) in guard.system.networks().iter() {
            per_interface.insert(
                iface.to_string(),
                InterfaceStat {
                    bytes_sent: data.total_transmitted(),
                    bytes_recv: data.total_received(),
                    packets_sent: data.total_packets_transmitted(),
                    packets_recv: data.total_packets_received(),
                },
            );
        }
        drop(guard);

        let bytes_sent = per_interface.values().map(|i| i.bytes_sent).sum();
        let bytes_recv = per_interface.values().map(|i| i.bytes_recv).sum();
        let connected = self.network_connected(&per_interface);
        Ok(NetworkStat {
            bytes_sent,
            bytes_recv,
            connected,
            per_interface,
        })
    }

    fn temperatures(&self) -> Result<Vec<TempReading>, CollectError> {
        let mut guard = self.system.lock();
        guard.system.refresh_components_list();
        guard.system.refresh_components();
        let mut temps: Vec<TempReading> = guard
            .system
            .components()
            .iter()
            .map(|c| TempReading {
                sensor_name: c.label().to_string(),
                celsius: c.temperature() as f64,
                critical_celsius: c.critical().map(|v| v as f64),
            })
            .filter(|t| t.celsius.is_finite() && t.celsius > 0.0)
            .collect();
        drop(guard);

        let sysinfo_count = temps.len();
        if temps.is_empty() {
            temps = thermal_zone_temps(&self.sys_root);
        }
        debug!(
            sysinfo_temps = sysinfo_count,
            total_temps = temps.len(),
            "temperature sources read"
        );
        if temps.is_empty() && cfg!(not(target_os = "linux")) {
            return Err(CollectError::Unsupported("temperature_readings"));
        }
        Ok(temps)
    }

    fn processes(&self) -> Result<Vec<ProcessStat>, CollectError> {
        let mut guard = self.system.lock();
        guard.system.refresh_memory();
        guard.system.refresh_processes();
        let system = &guard.system;
        let cores = system.cpus().len().max(1) as f64;
        let total_memory = system.total_memory();
        if total_memory == 0 {
            return Err(CollectError::failed("top_processes", "total memory reported as zero"));
        }
        let list = system
            .processes()
            .iter()
            .map(|(pid, p)| ProcessStat {
                pid: pid.as_u32(),
                name: p.name().to_string(),
                // sysinfo reports per-core percent, up to 100 * cores.
                cpu_percent: p.cpu_usage() as f64 / cores,
                memory_percent: p.memory() as f64 / total_memory as f64 * 100.0,
                memory_bytes: p.memory(),
            })
            .collect();
        Ok(list)
    }

    fn battery(&self) -> Result<Option<BatteryStat>, CollectError> {
        power::read_battery()
    }
}

fn load_average(system: &System) -> Option<LoadAverage> {
    if cfg!(target_os = "windows") {
        return None;
    }
    let load = system.load_average();
    Some(LoadAverage {
        one: load.one,
        five: load.five,
        fifteen: load.fifteen,
    })
}

impl SysinfoProvider {
    #[cfg(target_os = "linux")]
    fn network_connected(&self, per_interface: &BTreeMap<String, InterfaceStat>) -> bool {
        let net_dir = self.sys_root.join("class/net");
        let operstate_up = per_interface.keys().filter(|i| *i != "lo").any(|iface| {
            fs::read_to_string(net_dir.join(iface).join("operstate"))
                .map(|s| s.trim() == "up")
                .unwrap_or(false)
        });
        operstate_up || traffic_suggests_link(per_interface)
    }

    #[cfg(not(target_os = "linux"))]
    fn network_connected(&self, per_interface: &BTreeMap<String, InterfaceStat>) -> bool {
        traffic_suggests_link(per_interface)
    }
}

/// Any non-loopback interface that has both sent and received traffic.
fn traffic_suggests_link(per_interface: &BTreeMap<String, InterfaceStat>) -> bool {
    per_interface
        .iter()
        .filter(|(name, _)| !is_loopback(name))
        .any(|(_, i)| i.bytes_sent > 0 && i.bytes_recv > 0)
}

fn is_loopback(name: &str) -> bool {
    name == "lo" || name.starts_with("lo0") || name.to_lowercase().contains("loopback")
}

#[cfg(target_os = "linux")]
fn thermal_zone_temps(sys_root: &Path) -> Vec<TempReading> {
    let Ok(entries) = fs::read_dir(sys_root.join("class/thermal")) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|v| v.to_str()) else {
            continue;
        };
        if !name.starts_with("thermal_zone") {
            continue;
        }
        let Some(celsius) = fs::read_to_string(path.join("temp"))
            .ok()
            .and_then(|raw| parse_millidegrees(&raw))
        else {
            continue;
        };
        let sensor_name = fs::read_to_string(path.join("type"))
            .ok()
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| name.to_string());
        out.push(TempReading {
            sensor_name,
            celsius,
            critical_celsius: None,
        });
    }
    out.sort_by(|a, b| a.sensor_name.cmp(&b.sensor_name));
    out
}

#[cfg(not(target_os = "linux"))]
fn thermal_zone_temps(_sys_root: &Path) -> Vec<TempReading> {
    Vec::new()
}

/// Thermal zones report millidegrees; small values are already Celsius.
fn parse_millidegrees(raw: &str) -> Option<f64> {
    let v = raw.trim().parse::<f64>().ok()?;
    let celsius = if v > 1000.0 { v / 1000.0 } else { v };
    (celsius > 0.0).then_some(celsius)
}
