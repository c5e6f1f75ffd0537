use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One read of every supported system metric.
///
/// A reading that is unsupported, disabled or failed is `None` and is named in
/// `unavailable` with the reason, so "no signal" never looks like zero usage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub timestamp: i64,
    pub cpu_percent: Option<f64>,
    /// Indexed by core; a core with a non-finite reading is `None`.
    pub per_cpu_percent: Option<Vec<Option<f64>>>,
    pub load_average: Option<LoadAverage>,
    pub cpu_info: Option<CpuInfo>,
    pub memory: Option<MemoryStat>,
    pub disk: Option<BTreeMap<String, DiskStat>>,
    pub network: Option<NetworkStat>,
    pub temperature_readings: Vec<TempReading>,
    pub top_processes: Option<Vec<ProcessStat>>,
    pub process_count: Option<usize>,
    pub battery: Option<BatteryStat>,
    pub system: Option<HostInfo>,
    pub unavailable: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CpuInfo {
    pub core_count: usize,
    pub physical_core_count: Option<usize>,
    pub frequency_ghz: Option<f64>,
    pub model_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CpuUsage {
    pub total_percent: f64,
    pub per_cpu_percent: Vec<f64>,
    pub load_average: Option<LoadAverage>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MemoryStat {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub used_bytes: u64,
    pub percent: f64,
    pub swap_total_bytes: u64,
    pub swap_used_bytes: u64,
    pub swap_percent: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DiskStat {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: Option<f64>,
    pub file_system: String,
    pub device: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NetworkStat {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub connected: bool,
    pub per_interface: BTreeMap<String, InterfaceStat>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InterfaceStat {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TempReading {
    pub sensor_name: String,
    pub celsius: f64,
    pub critical_celsius: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessStat {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatteryStat {
    pub percent: f64,
    pub power_plugged: bool,
    pub state: String,
    /// Seconds until empty while discharging.
    pub estimated_time_remaining: Option<u64>,
    /// Seconds until full while charging.
    pub time_to_full: Option<u64>,
    pub health_percent: Option<f64>,
    pub cycle_count: Option<u32>,
    pub low_battery: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostInfo {
    pub platform: String,
    pub host_name: Option<String>,
    pub os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub uptime_seconds: u64,
    pub boot_time: u64,
}

/// Clamps a percentage into `[0, 100]`; non-finite input is not a reading.
pub fn clamp_percent(value: f64) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }
    Some(value.clamp(0.0, 100.0))
}

/// `part / total` as a percentage, `None` when `total` is zero.
pub fn percent_of(part: u64, total: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    clamp_percent((part as f64 / total as f64) * 100.0)
}

impl MetricsSnapshot {
    /// Every percent value carried by the snapshot, labelled by field path.
    #[cfg(test)]
    pub fn percent_fields(&self) -> Vec<(String, f64)> {
        let mut out = Vec::new();
        if let Some(v) = self.cpu_percent {
            out.push(("cpu_percent".to_string(), v));
        }
        if let Some(per_cpu) = &self.per_cpu_percent {
            for (i, v) in per_cpu.iter().enumerate() {
                if let Some(v) = v {
                    out.push((format!("per_cpu_percent[{i}]"), *v));
                }
            }
        }
        if let Some(mem) = &self.memory {
            out.push(("memory.percent".to_string(), mem.percent));
            if let Some(v) = mem.swap_percent {
                out.push(("memory.swap_percent".to_string(), v));
            }
        }
        if let Some(disks) = &self.disk {
            for (mount, d) in disks {
                if let Some(v) = d.percent {
                    out.push((format!("disk[{mount}].percent"), v));
                }
            }
        }
        if let Some(procs) = &self.top_processes {
            for p in procs {
                out.push((format!("top_processes[{}].cpu_percent", p.pid), p.cpu_percent));
                out.push((
                    format!("top_processes[{}].memory_percent", p.pid),
                    p.memory_percent,
                ));
            }
        }
        if let Some(b) = &self.battery {
            out.push(("battery.percent".to_string(), b.percent));
            if let Some(v) = b.health_percent {
                out.push(("battery.health_percent".to_string(), v));
            }
        }
        out
    }

    /// Percentage of the most used disk, the figure trend and health scoring use.
    pub fn disk_percent(&self) -> Option<f64> {
        self.disk
            .as_ref()?
            .values()
            .filter_map(|d| d.percent)
            .max_by(|a, b| a.total_cmp(b))
    }

    pub fn memory_percent(&self) -> Option<f64> {
        self.memory.as_ref().map(|m| m.percent)
    }

    /// One-line digest for `watch`.
    pub fn render_line(&self) -> String {
        let pct = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |v| format!("{v:.1}%"));
        let net = match &self.network {
            Some(n) if n.connected => "up",
            Some(_) => "down",
            None => "n/a",
        };
        format!(
            "cpu {} | mem {} | disk {} | net {} | procs {}",
            pct(self.cpu_percent),
            pct(self.memory_percent()),
            pct(self.disk_percent()),
            net,
            self.process_count
                .map_or_else(|| "n/a".to_string(), |n| n.to_string())
        )
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        if let Some(sys) = &self.system {
            out.push_str(&format!(
                "Host:     {} ({} {})\n",
                sys.host_name.as_deref().unwrap_or("unknown"),
                sys.platform,
                sys.os_version.as_deref().unwrap_or("")
            ));
            out.push_str(&format!("Uptime:   {}s\n", sys.uptime_seconds));
        }
        if let Some(cpu) = &self.cpu_info {
            out.push_str(&format!(
                "CPU:      {} ({} cores)\n",
                cpu.model_name.as_deref().unwrap_or("unknown"),
                cpu.core_count
            ));
        }
        if let Some(v) = self.cpu_percent {
            out.push_str(&format!("CPU use:  {v:.1}%\n"));
        }
        if let Some(load) = &self.load_average {
            out.push_str(&format!(
                "Load:     {:.2} {:.2} {:.2}\n",
                load.one, load.five, load.fifteen
            ));
        }
        if let Some(mem) = &self.memory {
            out.push_str(&format!(
                "Memory:   {:.1}% of {} MiB\n",
                mem.percent,
                mem.total_bytes / (1024 * 1024)
            ));
        }
        if let Some(disks) = &self.disk {
            for (mount, d) in disks {
                out.push_str(&format!(
                    "Disk:     {mount} {} of {} GiB\n",
                    d.percent
                        .map_or_else(|| "n/a".to_string(), |p| format!("{p:.1}%")),
                    d.total / (1024 * 1024 * 1024)
                ));
            }
        }
        if let Some(net) = &self.network {
            out.push_str(&format!(
                "Network:  {} (sent {} B, recv {} B)\n",
                if net.connected { "connected" } else { "disconnected" },
                net.bytes_sent,
                net.bytes_recv
            ));
        }
        for t in &self.temperature_readings {
            out.push_str(&format!("Temp:     {} {:.1} C\n", t.sensor_name, t.celsius));
        }
        if let Some(b) = &self.battery {
            out.push_str(&format!(
                "Battery:  {:.0}% {}{}\n",
                b.percent,
                b.state,
                if b.low_battery { " (low)" } else { "" }
            ));
        }
        if let Some(procs) = &self.top_processes {
            out.push_str("Top processes:\n");
            for p in procs {
                out.push_str(&format!(
                    "  {:>7} {:<24} {:>5.1}% cpu {:>5.1}% mem\n",
                    p.pid, p.name, p.cpu_percent, p.memory_percent
                ));
            }
        }
        for (reading, reason) in &self.unavailable {
            out.push_str(&format!("n/a:      {reading} ({reason})\n"));
        }
        out
    }

    /// Set of top-level JSON keys with a non-null value.
    #[cfg(test)]
    pub fn present_fields(&self) -> Vec<String> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, _)| k)
                .collect(),
            _ => Vec::new(),
        }
    }
}
