use crate::collectors::{is_collect_failure, now_unix};
use crate::diagnostics::{DiagnosticResult, TestName};
use crate::snapshot::MetricsSnapshot;
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at_unix: i64,
    pub sysdiag_cpu_usage_percent: Gauge,
    pub sysdiag_cpu_core_usage_percent: GaugeVec,
    pub sysdiag_cpu_core_count: Gauge,
    pub sysdiag_load_average: GaugeVec,
    pub sysdiag_memory_used_bytes: Gauge,
    pub sysdiag_memory_total_bytes: Gauge,
    pub sysdiag_memory_usage_percent: Gauge,
    pub sysdiag_swap_used_bytes: Gauge,
    pub sysdiag_disk_used_bytes: GaugeVec,
    pub sysdiag_disk_total_bytes: GaugeVec,
    pub sysdiag_disk_usage_percent: GaugeVec,
    pub sysdiag_net_rx_bytes_total: GaugeVec,
    pub sysdiag_net_tx_bytes_total: GaugeVec,
    pub sysdiag_net_connected: Gauge,
    pub sysdiag_temperature_celsius: GaugeVec,
    pub sysdiag_battery_percent: Gauge,
    pub sysdiag_battery_power_plugged: Gauge,
    pub sysdiag_process_count: Gauge,
    pub sysdiag_unavailable_readings: Gauge,
    pub sysdiag_history_length: Gauge,
    pub sysdiag_diagnostic_runs_total: CounterVec,
    pub sysdiag_diagnostic_duration_seconds: GaugeVec,
    pub sysdiag_uptime_seconds: Gauge,
    pub sysdiag_scrape_count_total: Counter,
    pub sysdiag_collect_errors_total: CounterVec,
    pub sysdiag_last_snapshot_timestamp_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let sysdiag_cpu_usage_percent = Gauge::with_opts(opts!(
            "sysdiag_cpu_usage_percent",
            "Whole-machine CPU usage in percent (0..100)"
        ))?;
        let sysdiag_cpu_core_usage_percent = GaugeVec::new(
            opts!(
                "sysdiag_cpu_core_usage_percent",
                "CPU usage in percent by logical core"
            ),
            &["core"],
        )?;
        let sysdiag_cpu_core_count =
            Gauge::with_opts(opts!("sysdiag_cpu_core_count", "Number of logical cores"))?;
        let sysdiag_load_average = GaugeVec::new(
            opts!("sysdiag_load_average", "System load average by window"),
            &["window"],
        )?;
        let sysdiag_memory_used_bytes =
            Gauge::with_opts(opts!("sysdiag_memory_used_bytes", "Used memory in bytes"))?;
        let sysdiag_memory_total_bytes =
            Gauge::with_opts(opts!("sysdiag_memory_total_bytes", "Total memory in bytes"))?;
        let sysdiag_memory_usage_percent = Gauge::with_opts(opts!(
            "sysdiag_memory_usage_percent",
            "Memory usage in percent"
        ))?;
        let sysdiag_swap_used_bytes =
            Gauge::with_opts(opts!("sysdiag_swap_used_bytes", "Used swap in bytes"))?;
        let sysdiag_disk_used_bytes = GaugeVec::new(
            opts!("sysdiag_disk_used_bytes", "Disk used bytes by mount"),
            &["mount"],
        )?;
        let sysdiag_disk_total_bytes = GaugeVec::new(
            opts!("sysdiag_disk_total_bytes", "Disk total bytes by mount"),
            &["mount"],
        )?;
        let sysdiag_disk_usage_percent = GaugeVec::new(
            opts!("sysdiag_disk_usage_percent", "Disk usage in percent by mount"),
            &["mount"],
        )?;
        let sysdiag_net_rx_bytes_total = GaugeVec::new(
            opts!(
                "sysdiag_net_rx_bytes_total",
                "Received bytes since boot per interface"
            ),
            &["iface"],
        )?;
        let sysdiag_net_tx_bytes_total = GaugeVec::new(
            opts!(
                "sysdiag_net_tx_bytes_total",
                "Transmitted bytes since boot per interface"
            ),
            &["iface"],
        )?;
        let sysdiag_net_connected = Gauge::with_opts(opts!(
            "sysdiag_net_connected",
            "1 if any non-loopback interface looks connected"
        ))?;
        let sysdiag_temperature_celsius = GaugeVec::new(
            opts!(
                "sysdiag_temperature_celsius",
                "Temperature by sensor in Celsius"
            ),
            &["sensor"],
        )?;
        let sysdiag_battery_percent = Gauge::with_opts(opts!(
            "sysdiag_battery_percent",
            "Battery charge in percent (NaN without a battery)"
        ))?;
        let sysdiag_battery_power_plugged = Gauge::with_opts(opts!(
            "sysdiag_battery_power_plugged",
            "1 if external power is connected"
        ))?;
        let sysdiag_process_count =
            Gauge::with_opts(opts!("sysdiag_process_count", "Number of processes"))?;
        let sysdiag_unavailable_readings = Gauge::with_opts(opts!(
            "sysdiag_unavailable_readings",
            "Readings missing from the last snapshot"
        ))?;
        let sysdiag_history_length = Gauge::with_opts(opts!(
            "sysdiag_history_length",
            "Snapshots held in the history buffer"
        ))?;
        let sysdiag_diagnostic_runs_total = CounterVec::new(
            opts!(
                "sysdiag_diagnostic_runs_total",
                "Diagnostic runs by test and status"
            ),
            &["test", "status"],
        )?;
        let sysdiag_diagnostic_duration_seconds = GaugeVec::new(
            opts!(
                "sysdiag_diagnostic_duration_seconds",
                "Duration of the last run of each diagnostic test"
            ),
            &["test"],
        )?;
        let sysdiag_uptime_seconds =
            Gauge::with_opts(opts!("sysdiag_uptime_seconds", "Service uptime in seconds"))?;
        let sysdiag_scrape_count_total = Counter::with_opts(opts!(
            "sysdiag_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let sysdiag_collect_errors_total = CounterVec::new(
            opts!(
                "sysdiag_collect_errors_total",
                "Readings that failed or were unsupported, by source"
            ),
            &["source"],
        )?;
        let sysdiag_last_snapshot_timestamp_seconds = Gauge::with_opts(opts!(
            "sysdiag_last_snapshot_timestamp_seconds",
            "Unix timestamp of the last snapshot"
        ))?;

        register(&registry, &sysdiag_cpu_usage_percent)?;
        register(&registry, &sysdiag_cpu_core_usage_percent)?;
        register(&registry, &sysdiag_cpu_core_count)?;
        register(&registry, &sysdiag_load_average)?;
        register(&registry, &sysdiag_memory_used_bytes)?;
        register(&registry, &sysdiag_memory_total_bytes)?;
        register(&registry, &sysdiag_memory_usage_percent)?;
        register(&registry, &sysdiag_swap_used_bytes)?;
        register(&registry, &sysdiag_disk_used_bytes)?;
        register(&registry, &sysdiag_disk_total_bytes)?;
        register(&registry, &sysdiag_disk_usage_percent)?;
        register(&registry, &sysdiag_net_rx_bytes_total)?;
        register(&registry, &sysdiag_net_tx_bytes_total)?;
        register(&registry, &sysdiag_net_connected)?;
        register(&registry, &sysdiag_temperature_celsius)?;
        register(&registry, &sysdiag_battery_percent)?;
        register(&registry, &sysdiag_battery_power_plugged)?;
        register(&registry, &sysdiag_process_count)?;
        register(&registry, &sysdiag_unavailable_readings)?;
        register(&registry, &sysdiag_history_length)?;
        register(&registry, &sysdiag_diagnostic_runs_total)?;
        register(&registry, &sysdiag_diagnostic_duration_seconds)?;
        register(&registry, &sysdiag_uptime_seconds)?;
        register(&registry, &sysdiag_scrape_count_total)?;
        register(&registry, &sysdiag_collect_errors_total)?;
        register(&registry, &sysdiag_last_snapshot_timestamp_seconds)?;

        Ok(Arc::new(Self {
            registry,
            started_at_unix: now_unix(),
            sysdiag_cpu_usage_percent,
            sysdiag_cpu_core_usage_percent,
            sysdiag_cpu_core_count,
            sysdiag_load_average,
            sysdiag_memory_used_bytes,
            sysdiag_memory_total_bytes,
            sysdiag_memory_usage_percent,
            sysdiag_swap_used_bytes,
            sysdiag_disk_used_bytes,
            sysdiag_disk_total_bytes,
            sysdiag_disk_usage_percent,
            sysdiag_net_rx_bytes_total,
            sysdiag_net_tx_bytes_total,
            sysdiag_net_connected,
            sysdiag_temperature_celsius,
            sysdiag_battery_percent,
            sysdiag_battery_power_plugged,
            sysdiag_process_count,
            sysdiag_unavailable_readings,
            sysdiag_history_length,
            sysdiag_diagnostic_runs_total,
            sysdiag_diagnostic_duration_seconds,
            sysdiag_uptime_seconds,
            sysdiag_scrape_count_total,
            sysdiag_collect_errors_total,
            sysdiag_last_snapshot_timestamp_seconds,
        }))
    }

    /// Missing scalar readings are exported as NaN rather than zero.
    pub fn update_from_snapshot(&self, snapshot: &MetricsSnapshot) {
        self.sysdiag_cpu_usage_percent
            .set(snapshot.cpu_percent.unwrap_or(f64::NAN));
        self.sysdiag_cpu_core_count.set(
            snapshot
                .cpu_info
                .as_ref()
                .map(|c| c.core_count as f64)
                .unwrap_or(f64::NAN),
        );
        self.sysdiag_last_snapshot_timestamp_seconds
            .set(snapshot.timestamp as f64);
        self.sysdiag_unavailable_readings
            .set(snapshot.unavailable.len() as f64);
        self.sysdiag_process_count.set(
            snapshot
                .process_count
                .map(|n| n as f64)
                .unwrap_or(f64::NAN),
        );

        match &snapshot.memory {
            Some(mem) => {
                self.sysdiag_memory_used_bytes.set(mem.used_bytes as f64);
                self.sysdiag_memory_total_bytes.set(mem.total_bytes as f64);
                self.sysdiag_memory_usage_percent.set(mem.percent);
                self.sysdiag_swap_used_bytes.set(mem.swap_used_bytes as f64);
            }
            None => {
                self.sysdiag_memory_used_bytes.set(f64::NAN);
                self.sysdiag_memory_total_bytes.set(f64::NAN);
                self.sysdiag_memory_usage_percent.set(f64::NAN);
                self.sysdiag_swap_used_bytes.set(f64::NAN);
            }
        }

        match &snapshot.battery {
            Some(b) => {
                self.sysdiag_battery_percent.set(b.percent);
                self.sysdiag_battery_power_plugged
                    .set(if b.power_plugged { 1.0 } else { 0.0 });
            }
            None => {
                self.sysdiag_battery_percent.set(f64::NAN);
                self.sysdiag_battery_power_plugged.set(f64::NAN);
            }
        }

        self.sysdiag_cpu_core_usage_percent.reset();
        self.sysdiag_load_average.reset();
        self.sysdiag_disk_used_bytes.reset();
        self.sysdiag_disk_total_bytes.reset();
        self.sysdiag_disk_usage_percent.reset();
        self.sysdiag_net_rx_bytes_total.reset();
        self.sysdiag_net_tx_bytes_total.reset();
        self.sysdiag_temperature_celsius.reset();

        if let Some(per_cpu) = &snapshot.per_cpu_percent {
            for (i, v) in per_cpu.iter().enumerate() {
                if let Some(v) = v {
                    self.sysdiag_cpu_core_usage_percent
                        .with_label_values(&[&i.to_string()])
                        .set(*v);
                }
            }
        }

        if let Some(load) = &snapshot.load_average {
            for (window, v) in [("1m", load.one), ("5m", load.five), ("15m", load.fifteen)] {
                self.sysdiag_load_average.with_label_values(&[window]).set(v);
            }
        }

        if let Some(disks) = &snapshot.disk {
            for (mount, d) in disks {
                self.sysdiag_disk_used_bytes
                    .with_label_values(&[mount])
                    .set(d.used as f64);
                self.sysdiag_disk_total_bytes
                    .with_label_values(&[mount])
                    .set(d.total as f64);
                if let Some(pct) = d.percent {
                    self.sysdiag_disk_usage_percent
                        .with_label_values(&[mount])
                        .set(pct);
                }
            }
        }

        match &snapshot.network {
            Some(net) => {
                for (iface, i) in &net.per_interface {
                    self.sysdiag_net_rx_bytes_total
                        .with_label_values(&[iface])
                        .set(i.bytes_recv as f64);
                    self.sysdiag_net_tx_bytes_total
                        .with_label_values(&[iface])
                        .set(i.bytes_sent as f64);
                }
                self.sysdiag_net_connected
                    .set(if net.connected { 1.0 } else { 0.0 });
            }
            None => self.sysdiag_net_connected.set(f64::NAN),
        }

        for t in &snapshot.temperature_readings {
            self.sysdiag_temperature_celsius
                .with_label_values(&[&t.sensor_name])
                .set(t.celsius);
        }

        for (source, reason) in &snapshot.unavailable {
            if is_collect_failure(reason) {
                self.inc_collect_error(source);
            }
        }

        self.refresh_uptime();
    }

    /// Names outside the known test set share the `unknown` label.
    pub fn observe_diagnostic(&self, result: &DiagnosticResult) {
        let test = result
            .test_name
            .parse::<TestName>()
            .map_or("unknown", TestName::as_str);
        self.sysdiag_diagnostic_runs_total
            .with_label_values(&[test, result.status.as_str()])
            .inc();
        self.sysdiag_diagnostic_duration_seconds
            .with_label_values(&[test])
            .set(result.duration.as_secs_f64());
    }

    pub fn set_history_length(&self, len: usize) {
        self.sysdiag_history_length.set(len as f64);
    }

    pub fn refresh_uptime(&self) {
        let uptime = now_unix().saturating_sub(self.started_at_unix) as f64;
        self.sysdiag_uptime_seconds.set(uptime);
    }

    pub fn inc_scrape_count(&self) {
        self.sysdiag_scrape_count_total.inc();
    }

    pub fn inc_collect_error(&self, source: &str) {
        self.sysdiag_collect_errors_total
            .with_label_values(&[source])
            .inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
