use crate::snapshot::MetricsSnapshot;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;

pub const DEFAULT_HISTORY_LENGTH: usize = 100;
/// Samples per half when comparing recent against older readings.
pub const TREND_WINDOW: usize = 10;
const TREND_THRESHOLD: f64 = 2.0;

/// Bounded FIFO of recent snapshots, oldest evicted first.
#[derive(Debug)]
pub struct SnapshotHistory {
    capacity: usize,
    entries: Mutex<VecDeque<MetricsSnapshot>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Falling,
    Stable,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricSummary {
    pub current: Option<f64>,
    pub average: Option<f64>,
    pub peak: Option<f64>,
    pub trend: Trend,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Health {
    pub score: u8,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HistorySummary {
    pub samples: usize,
    pub window_secs: u64,
    pub cpu: MetricSummary,
    pub memory: MetricSummary,
    pub disk: MetricSummary,
    pub health: Health,
}

impl Default for SnapshotHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_LENGTH)
    }
}

impl SnapshotHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self, snapshot: MetricsSnapshot) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(snapshot);
    }

    /// Up to `n` most recent snapshots, oldest first.
    pub fn recent(&self, n: usize) -> Vec<MetricsSnapshot> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Averages and peaks over the last `window_secs` of samples, trends over
    /// the whole buffer and a health score from the newest sample.
    pub fn summary(&self, window_secs: u64) -> HistorySummary {
        let entries: Vec<MetricsSnapshot> = self.entries.lock().iter().cloned().collect();
        summarize(&entries, window_secs)
    }
}

fn summarize(entries: &[MetricsSnapshot], window_secs: u64) -> HistorySummary {
    let cutoff = entries
        .last()
        .map(|s| {
            let window = i64::try_from(window_secs).unwrap_or(i64::MAX);
            s.timestamp.saturating_sub(window)
        })
        .unwrap_or(0);
    let window: Vec<&MetricsSnapshot> = entries.iter().filter(|s| s.timestamp >= cutoff).collect();

    let cpu = metric_summary(entries, &window, |s| s.cpu_percent);
    let memory = metric_summary(entries, &window, MetricsSnapshot::memory_percent);
    let disk = metric_summary(entries, &window, MetricsSnapshot::disk_percent);
    let health = health(cpu.current, memory.current, disk.current);

    HistorySummary {
        samples: entries.len(),
        window_secs,
        cpu,
        memory,
        disk,
        health,
    }
}

fn metric_summary(
    all: &[MetricsSnapshot],
    window: &[&MetricsSnapshot],
    read: impl Fn(&MetricsSnapshot) -> Option<f64>,
) -> MetricSummary {
    let values: Vec<f64> = window.iter().filter_map(|s| read(s)).collect();
    let average = (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64);
    let peak = values.iter().copied().max_by(|a, b| a.total_cmp(b));
    let series: Vec<f64> = all.iter().filter_map(&read).collect();
    MetricSummary {
        current: all.last().and_then(&read),
        average,
        peak,
        trend: trend(&series, TREND_WINDOW),
    }
}

/// Compares the mean of the last `w` values with the `w` before them.
pub fn trend(series: &[f64], w: usize) -> Trend {
    if w == 0 || series.len() < w * 2 {
        return Trend::Stable;
    }
    let n = series.len();
    let recent = &series[n - w..];
    let older = &series[n - 2 * w..n - w];
    let mean = |s: &[f64]| s.iter().sum::<f64>() / s.len() as f64;
    let diff = mean(recent) - mean(older);
    if diff.abs() < TREND_THRESHOLD {
        Trend::Stable
    } else if diff > 0.0 {
        Trend::Rising
    } else {
        Trend::Falling
    }
}

/// Headroom score weighted 40/40/20 over cpu, memory and disk. A missing
/// reading counts as idle.
pub fn health(cpu: Option<f64>, memory: Option<f64>, disk: Option<f64>) -> Health {
    let headroom = |v: Option<f64>| (100.0 - v.unwrap_or(0.0)).clamp(0.0, 100.0);
    let score = headroom(cpu) * 0.4 + headroom(memory) * 0.4 + headroom(disk) * 0.2;
    let score = score.clamp(0.0, 100.0).round() as u8;
    let status = match score {
        90..=u8::MAX => "Excellent",
        75..=89 => "Good",
        60..=74 => "Fair",
        _ => "Poor",
    };
    Health { score, status }
}
