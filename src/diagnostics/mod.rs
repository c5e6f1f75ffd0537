pub mod probes;
pub mod runner;
pub mod tools;

pub use runner::DiagnosticRunner;

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestName {
    Bluetooth,
    Wifi,
    Camera,
    Microphone,
    Speaker,
    Keyboard,
    Mouse,
}

impl TestName {
    pub const ALL: [TestName; 7] = [
        TestName::Bluetooth,
        TestName::Wifi,
        TestName::Camera,
        TestName::Microphone,
        TestName::Speaker,
        TestName::Keyboard,
        TestName::Mouse,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TestName::Bluetooth => "bluetooth",
            TestName::Wifi => "wifi",
            TestName::Camera => "camera",
            TestName::Microphone => "microphone",
            TestName::Speaker => "speaker",
            TestName::Keyboard => "keyboard",
            TestName::Mouse => "mouse",
        }
    }

    /// Probes that open an audio device; these never run concurrently.
    pub fn uses_audio(self) -> bool {
        matches!(self, TestName::Microphone | TestName::Speaker)
    }
}

impl fmt::Display for TestName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown diagnostic test: {0}")]
pub struct UnknownTest(pub String);

impl FromStr for TestName {
    type Err = UnknownTest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        TestName::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| UnknownTest(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Passed,
    Failed,
    Error,
    Skipped,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Passed => "passed",
            Status::Failed => "failed",
            Status::Error => "error",
            Status::Skipped => "skipped",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a probe that managed to exercise the device.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub passed: bool,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ProbeReport {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// A probe that could not exercise the device at all.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{0}")]
    Unsupported(String),
    #[error("{0}")]
    NoDevice(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
    #[error("`{command}` failed: {reason}")]
    Command { command: String, reason: String },
}

impl ProbeError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn command(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

/// One hardware check. `probe` blocks; the runner moves it onto its own
/// thread and enforces the timeout. `budget` is the time left before that
/// timeout, and external tools it starts must not outlive it.
pub trait HardwareProbe: Send + Sync {
    fn test(&self) -> TestName;
    fn probe(&self, budget: Duration) -> Result<ProbeReport, ProbeError>;
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DiagnosticResult {
    pub test_name: String,
    pub status: Status,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub error: Option<String>,
    #[serde(serialize_with = "serialize_secs")]
    pub duration: Duration,
}

impl DiagnosticResult {
    pub fn from_probe(
        test: TestName,
        outcome: Result<ProbeReport, ProbeError>,
        duration: Duration,
    ) -> Self {
        match outcome {
            Ok(report) => Self {
                test_name: test.to_string(),
                status: if report.passed {
                    Status::Passed
                } else {
                    Status::Failed
                },
                message: report.message,
                details: report.details,
                error: None,
                duration,
            },
            Err(ProbeError::Unsupported(reason)) => Self {
                test_name: test.to_string(),
                status: Status::Skipped,
                message: reason,
                details: None,
                error: None,
                duration,
            },
            Err(err) => Self::error(
                test.as_str(),
                format!("{test} test could not run"),
                err.to_string(),
                duration,
            ),
        }
    }

    pub fn error(
        test_name: impl Into<String>,
        message: impl Into<String>,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            test_name: test_name.into(),
            status: Status::Error,
            message: message.into(),
            details: None,
            error: Some(error.into()),
            duration,
        }
    }
}

fn serialize_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct BatchSummary {
    pub passed: usize,
    pub failed: usize,
    pub error: usize,
    pub skipped: usize,
    pub total: usize,
    #[serde(serialize_with = "serialize_secs")]
    pub total_duration: Duration,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BatchReport {
    pub results: Vec<DiagnosticResult>,
    pub summary: BatchSummary,
}

impl BatchReport {
    pub fn new(results: Vec<DiagnosticResult>) -> Self {
        let mut summary = BatchSummary {
            total: results.len(),
            ..BatchSummary::default()
        };
        for r in &results {
            match r.status {
                Status::Passed => summary.passed += 1,
                Status::Failed => summary.failed += 1,
                Status::Error => summary.error += 1,
                Status::Skipped => summary.skipped += 1,
            }
            summary.total_duration += r.duration;
        }
        Self { results, summary }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::from("Hardware diagnostics\n====================\n");
        for r in &self.results {
            let tag = match r.status {
                Status::Passed => "PASS",
                Status::Failed => "FAIL",
                Status::Error => "ERR ",
                Status::Skipped => "SKIP",
            };
            out.push_str(&format!(
                "[{tag}] {:<11} {} ({:.2}s)\n",
                r.test_name,
                r.message,
                r.duration.as_secs_f64()
            ));
            if let Some(err) = &r.error {
                out.push_str(&format!("       {:<11} error: {err}\n", ""));
            }
        }
        let s = &self.summary;
        out.push_str(&format!(
            "\n{} passed, {} failed, {} errors, {} skipped ({} total) in {:.2}s\n",
            s.passed,
            s.failed,
            s.error,
            s.skipped,
            s.total,
            s.total_duration.as_secs_f64()
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_case_insensitively() {
        assert_eq!("WiFi".parse::<TestName>().unwrap(), TestName::Wifi);
        assert_eq!(" mouse ".parse::<TestName>().unwrap(), TestName::Mouse);
        let err = "toaster".parse::<TestName>().unwrap_err();
        assert_eq!(err.to_string(), "unknown diagnostic test: toaster");
    }

    #[test]
    fn unsupported_probe_is_skipped() {
        let result = DiagnosticResult::from_probe(
            TestName::Camera,
            Err(ProbeError::Unsupported("not supported on this platform".into())),
            Duration::ZERO,
        );
        assert_eq!(result.status, Status::Skipped);
        assert!(result.error.is_none());
    }

    #[test]
    fn probe_error_populates_error_field() {
        let result = DiagnosticResult::from_probe(
            TestName::Wifi,
            Err(ProbeError::NoDevice("no wireless interface found".into())),
            Duration::from_millis(5),
        );
        assert_eq!(result.status, Status::Error);
        assert_eq!(result.error.as_deref(), Some("no wireless interface found"));
    }

    #[test]
    fn result_serializes_lowercase_status_and_seconds() {
        let result = DiagnosticResult::from_probe(
            TestName::Keyboard,
            Ok(ProbeReport::pass("1 keyboard found")),
            Duration::from_millis(250),
        );
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "passed");
        assert_eq!(value["test_name"], "keyboard");
        assert_eq!(value["duration"], serde_json::json!(0.25));
        assert!(value["error"].is_null());
    }

    #[test]
    fn batch_summary_counts_sum_to_total() {
        let report = BatchReport::new(vec![
            DiagnosticResult::from_probe(TestName::Mouse, Ok(ProbeReport::pass("ok")), Duration::from_secs(1)),
            DiagnosticResult::from_probe(TestName::Keyboard, Ok(ProbeReport::fail("none")), Duration::from_secs(1)),
            DiagnosticResult::error("toaster", "unknown diagnostic test: toaster", "unknown test", Duration::ZERO),
            DiagnosticResult::from_probe(TestName::Camera, Err(ProbeError::Unsupported("n/a".into())), Duration::ZERO),
        ]);
        let s = &report.summary;
        assert_eq!((s.passed, s.failed, s.error, s.skipped, s.total), (1, 1, 1, 1, 4));
        assert_eq!(s.total_duration, Duration::from_secs(2));
        let text = report.render_text();
        assert!(text.contains("[FAIL] keyboard"));
        assert!(text.contains("1 passed, 1 failed, 1 errors, 1 skipped (4 total)"));
    }
}
