use crate::diagnostics::BatchReport;
use crate::snapshot::MetricsSnapshot;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// File format picked from an output path's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Csv,
    Text,
}

impl ReportFormat {
    /// `.json` and `.csv` map to their formats; anything else is text.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("json") => Self::Json,
            Some("csv") => Self::Csv,
            _ => Self::Text,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write report {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),
}

const HISTORY_HEADER: &str =
    "timestamp,cpu_percent,memory_percent,disk_percent,battery_percent,process_count";
const DIAGNOSTICS_HEADER: &str = "test_name,status,message,error,duration_secs";

/// One row per snapshot. Unavailable readings are empty cells.
pub fn history_csv(entries: &[MetricsSnapshot]) -> String {
    let mut out = String::from(HISTORY_HEADER);
    out.push('\n');
    for s in entries {
        let _ = writeln!(
            out,
            "{},{},{},{},{},{}",
            s.timestamp,
            cell(s.cpu_percent),
            cell(s.memory_percent()),
            cell(s.disk_percent()),
            cell(s.battery.as_ref().map(|b| b.percent)),
            s.process_count.map(|n| n.to_string()).unwrap_or_default(),
        );
    }
    out
}

pub fn diagnostics_csv(report: &BatchReport) -> String {
    let mut out = String::from(DIAGNOSTICS_HEADER);
    out.push('\n');
    for r in &report.results {
        let _ = writeln!(
            out,
            "{},{},{},{},{:.3}",
            quote(&r.test_name),
            r.status,
            quote(&r.message),
            quote(r.error.as_deref().unwrap_or("")),
            r.duration.as_secs_f64(),
        );
    }
    out
}

pub fn export_snapshot(snapshot: &MetricsSnapshot, path: &Path) -> Result<(), ReportError> {
    let body = match ReportFormat::from_path(path) {
        ReportFormat::Json => serde_json::to_string_pretty(snapshot)?,
        ReportFormat::Csv => history_csv(std::slice::from_ref(snapshot)),
        ReportFormat::Text => snapshot.render_text(),
    };
    write(path, &body)
}

pub fn export_diagnostics(report: &BatchReport, path: &Path) -> Result<(), ReportError> {
    let body = match ReportFormat::from_path(path) {
        ReportFormat::Json => serde_json::to_string_pretty(report)?,
        ReportFormat::Csv => diagnostics_csv(report),
        ReportFormat::Text => report.render_text(),
    };
    write(path, &body)
}

/// History as JSON or CSV; a text path gets the `watch` digest lines.
pub fn export_history(entries: &[MetricsSnapshot], path: &Path) -> Result<(), ReportError> {
    let body = match ReportFormat::from_path(path) {
        ReportFormat::Json => serde_json::to_string_pretty(entries)?,
        ReportFormat::Csv => history_csv(entries),
        ReportFormat::Text => entries
            .iter()
            .map(|s| s.render_line() + "\n")
            .collect(),
    };
    write(path, &body)
}

fn write(path: &Path, body: &str) -> Result<(), ReportError> {
    fs::write(path, body).map_err(|source| ReportError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), bytes = body.len(), "report written");
    Ok(())
}

fn cell(v: Option<f64>) -> String {
    v.map(|v| format!("{v:.2}")).unwrap_or_default()
}

/// RFC 4180 quoting for fields that need it.
fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
