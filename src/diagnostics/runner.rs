use crate::diagnostics::{BatchReport, DiagnosticResult, HardwareProbe, ProbeError, TestName};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs hardware probes one at a time, each bounded by a timeout.
#[derive(Clone)]
pub struct DiagnosticRunner {
    probes: HashMap<TestName, Arc<dyn HardwareProbe>>,
    default_timeout: Duration,
    audio_lock: Arc<Mutex<()>>,
}

enum WorkerFailure {
    Spawn(std::io::Error),
    Vanished,
}

impl DiagnosticRunner {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            probes: HashMap::new(),
            default_timeout,
            audio_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn HardwareProbe>) -> Self {
        self.probes.insert(probe.test(), probe);
        self
    }

    pub fn with_probes(self, probes: impl IntoIterator<Item = Arc<dyn HardwareProbe>>) -> Self {
        probes.into_iter().fold(self, Self::with_probe)
    }

    /// Runs one test by name. Never fails: unknown names, probe errors and
    /// timeouts all come back as an `error` result.
    pub async fn run(&self, name: &str, timeout: Option<Duration>) -> DiagnosticResult {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let test = match TestName::from_str(name) {
            Ok(test) => test,
            Err(err) => {
                warn!(test = name, "unknown diagnostic test requested");
                return DiagnosticResult::error(
                    name,
                    err.to_string(),
                    "unknown test",
                    Duration::ZERO,
                );
            }
        };
        let Some(probe) = self.probes.get(&test).cloned() else {
            return DiagnosticResult::from_probe(
                test,
                Err(ProbeError::Unsupported(format!(
                    "no {test} probe available on this platform"
                ))),
                Duration::ZERO,
            );
        };
        self.run_probe(test, probe, timeout).await
    }

    /// Runs each named test in order. An empty list runs every test.
    pub async fn run_all<S: AsRef<str>>(
        &self,
        names: &[S],
        timeout: Option<Duration>,
    ) -> BatchReport {
        let names: Vec<String> = if names.is_empty() {
            TestName::ALL.iter().map(|t| t.to_string()).collect()
        } else {
            names.iter().map(|n| n.as_ref().to_string()).collect()
        };
        let mut results = Vec::with_capacity(names.len());
        for name in &names {
            results.push(self.run(name, timeout).await);
        }
        let report = BatchReport::new(results);
        info!(
            total = report.summary.total,
            passed = report.summary.passed,
            failed = report.summary.failed,
            error = report.summary.error,
            skipped = report.summary.skipped,
            "diagnostic batch finished"
        );
        report
    }

    async fn run_probe(
        &self,
        test: TestName,
        probe: Arc<dyn HardwareProbe>,
        timeout: Duration,
    ) -> DiagnosticResult {
        let started = Instant::now();
        debug!(test = %test, ?timeout, "probe pending");

        let audio_lock = test.uses_audio().then(|| self.audio_lock.clone());
        let work = async move {
            // The guard travels with the worker so an abandoned audio probe
            // keeps the device until it actually finishes. External tools are
            // killed at the budget, so that release is bounded.
            let audio_guard = match audio_lock {
                Some(lock) => Some(lock.lock_owned().await),
                None => None,
            };
            let budget = timeout.saturating_sub(started.elapsed());
            let (tx, rx) = oneshot::channel();
            std::thread::Builder::new()
                .name(format!("probe-{test}"))
                .spawn(move || {
                    let _audio_guard = audio_guard;
                    let outcome = probe.probe(budget);
                    let _ = tx.send(outcome);
                })
                .map_err(WorkerFailure::Spawn)?;
            debug!(test = %test, "probe running");
            let outcome = rx.await.map_err(|_| WorkerFailure::Vanished)?;
            Ok::<_, WorkerFailure>(outcome)
        };

        let result = match tokio::time::timeout(timeout, work).await {
            Ok(Ok(outcome)) => DiagnosticResult::from_probe(test, outcome, started.elapsed()),
            Ok(Err(WorkerFailure::Spawn(err))) => DiagnosticResult::error(
                test.as_str(),
                format!("{test} probe could not be started"),
                err.to_string(),
                started.elapsed(),
            ),
            Ok(Err(WorkerFailure::Vanished)) => DiagnosticResult::error(
                test.as_str(),
                "probe worker exited without a result",
                "worker panicked",
                started.elapsed(),
            ),
            Err(_) => {
                warn!(test = %test, ?timeout, "probe timed out, abandoning worker");
                DiagnosticResult::error(
                    test.as_str(),
                    format!(
                        "{test} probe timed out after {}",
                        humantime::format_duration(timeout)
                    ),
                    "timeout",
                    started.elapsed(),
                )
            }
        };

        info!(
            test = %test,
            status = %result.status,
            duration_ms = result.duration.as_millis() as u64,
            "probe finished"
        );
        result
    }
}

impl Default for DiagnosticRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::tools::{SystemTools, ToolRunner};
    use crate::diagnostics::{ProbeReport, Status};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn report_for(passed: bool, message: &str) -> ProbeReport {
        if passed {
            ProbeReport::pass(message)
        } else {
            ProbeReport::fail(message)
        }
    }

    struct SleepyProbe {
        test: TestName,
        sleep: Duration,
    }

    impl HardwareProbe for SleepyProbe {
        fn test(&self) -> TestName {
            self.test
        }

        fn probe(&self, _budget: Duration) -> Result<ProbeReport, ProbeError> {
            std::thread::sleep(self.sleep);
            Ok(report_for(true, "done"))
        }
    }

    struct FixedProbe {
        test: TestName,
        passed: bool,
    }

    impl HardwareProbe for FixedProbe {
        fn test(&self) -> TestName {
            self.test
        }

        fn probe(&self, _budget: Duration) -> Result<ProbeReport, ProbeError> {
            Ok(report_for(self.passed, "fixed"))
        }
    }

    struct PanickingProbe;

    impl HardwareProbe for PanickingProbe {
        fn test(&self) -> TestName {
            TestName::Keyboard
        }

        fn probe(&self, _budget: Duration) -> Result<ProbeReport, ProbeError> {
            panic!("driver exploded");
        }
    }

    struct UnsupportedProbe;

    impl HardwareProbe for UnsupportedProbe {
        fn test(&self) -> TestName {
            TestName::Speaker
        }

        fn probe(&self, _budget: Duration) -> Result<ProbeReport, ProbeError> {
            Err(ProbeError::Unsupported("not supported on this platform".into()))
        }
    }

    /// Tracks how many audio probes run at once.
    struct OverlapProbe {
        test: TestName,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl HardwareProbe for OverlapProbe {
        fn test(&self) -> TestName {
            self.test
        }

        fn probe(&self, _budget: Duration) -> Result<ProbeReport, ProbeError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(report_for(true, "ok"))
        }
    }

    /// Speaker check whose external tool hangs past any sane deadline.
    struct HangingSpeaker;

    impl HardwareProbe for HangingSpeaker {
        fn test(&self) -> TestName {
            TestName::Speaker
        }

        fn probe(&self, budget: Duration) -> Result<ProbeReport, ProbeError> {
            SystemTools.run("sleep", &["10"], None, budget)?;
            Ok(report_for(true, "tool finished"))
        }
    }

    struct BudgetRecorder {
        seen: Arc<parking_lot::Mutex<Option<Duration>>>,
    }

    impl HardwareProbe for BudgetRecorder {
        fn test(&self) -> TestName {
            TestName::Wifi
        }

        fn probe(&self, budget: Duration) -> Result<ProbeReport, ProbeError> {
            *self.seen.lock() = Some(budget);
            Ok(report_for(true, "ok"))
        }
    }

    #[tokio::test]
    async fn worker_budget_never_exceeds_timeout() {
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let runner = DiagnosticRunner::default().with_probe(Arc::new(BudgetRecorder {
            seen: seen.clone(),
        }));
        runner.run("wifi", Some(Duration::from_secs(2))).await;
        let budget = (*seen.lock()).expect("budget recorded");
        assert!(budget <= Duration::from_secs(2));
        assert!(budget > Duration::from_secs(1));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_audio_tool_is_killed_and_frees_the_device() {
        let runner = DiagnosticRunner::default()
            .with_probe(Arc::new(HangingSpeaker))
            .with_probe(Arc::new(FixedProbe {
                test: TestName::Microphone,
                passed: true,
            }));
        let first = runner.run("speaker", Some(Duration::from_millis(300))).await;
        assert_eq!(first.status, Status::Error);

        let started = Instant::now();
        let second = runner.run("microphone", Some(Duration::from_secs(3))).await;
        assert_eq!(second.status, Status::Passed);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn camera_timeout_returns_error_promptly() {
        let runner = DiagnosticRunner::default().with_probe(Arc::new(SleepyProbe {
            test: TestName::Camera,
            sleep: Duration::from_secs(2),
        }));
        let started = Instant::now();
        let result = runner.run("camera", Some(Duration::from_millis(10))).await;
        assert_eq!(result.status, Status::Error);
        assert_eq!(result.error.as_deref(), Some("timeout"));
        assert!(result.message.contains("timed out"));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn unknown_test_is_an_error_result() {
        let runner = DiagnosticRunner::default();
        let result = runner.run("toaster", None).await;
        assert_eq!(result.status, Status::Error);
        assert_eq!(result.test_name, "toaster");
        assert_eq!(result.message, "unknown diagnostic test: toaster");
    }

    #[tokio::test]
    async fn run_all_keeps_input_order() {
        let runner = DiagnosticRunner::default()
            .with_probe(Arc::new(FixedProbe {
                test: TestName::Wifi,
                passed: false,
            }))
            .with_probe(Arc::new(FixedProbe {
                test: TestName::Bluetooth,
                passed: true,
            }));
        let report = runner.run_all(&["bluetooth", "wifi"], None).await;
        let names: Vec<&str> = report.results.iter().map(|r| r.test_name.as_str()).collect();
        assert_eq!(names, vec!["bluetooth", "wifi"]);
        let s = &report.summary;
        assert_eq!(s.total, 2);
        assert_eq!(s.passed + s.failed + s.error + s.skipped, 2);
    }

    #[tokio::test]
    async fn empty_run_all_covers_every_test() {
        let runner = DiagnosticRunner::default();
        let report = runner.run_all::<&str>(&[], None).await;
        assert_eq!(report.summary.total, TestName::ALL.len());
        assert_eq!(report.summary.skipped, TestName::ALL.len());
    }

    #[tokio::test]
    async fn panicking_probe_becomes_error() {
        let runner = DiagnosticRunner::default().with_probe(Arc::new(PanickingProbe));
        let result = runner.run("keyboard", None).await;
        assert_eq!(result.status, Status::Error);
        assert_eq!(result.message, "probe worker exited without a result");
    }

    #[tokio::test]
    async fn unsupported_probe_is_skipped() {
        let runner = DiagnosticRunner::default().with_probe(Arc::new(UnsupportedProbe));
        let result = runner.run("Speaker", None).await;
        assert_eq!(result.status, Status::Skipped);
    }

    #[tokio::test]
    async fn audio_probes_never_overlap() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let probes = [TestName::Speaker, TestName::Microphone].map(|test| {
            Arc::new(OverlapProbe {
                test,
                active: active.clone(),
                peak: peak.clone(),
            }) as Arc<dyn HardwareProbe>
        });
        let runner = DiagnosticRunner::default().with_probes(probes);
        let (a, b) = tokio::join!(runner.run("speaker", None), runner.run("microphone", None));
        assert_eq!(a.status, Status::Passed);
        assert_eq!(b.status, Status::Passed);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
