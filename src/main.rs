mod collectors;
mod config;
mod diagnostics;
mod history;
mod http;
mod metrics;
mod report;
mod snapshot;

use axum::serve;
use clap::{Parser, Subcommand};
use collectors::system::SysinfoProvider;
use collectors::{CollectError, CollectorSettings, MetricsCollector};
use config::Config;
use diagnostics::probes::{platform_probes, ProbeEnv};
use diagnostics::{DiagnosticRunner, TestName};
use history::SnapshotHistory;
use metrics::Metrics;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "./config.yaml";

#[derive(Parser, Debug)]
#[command(name = "sysdiag")]
#[command(version, about = "System metrics and hardware diagnostics")]
struct Cli {
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Take one metrics snapshot and print it.
    Snapshot {
        #[arg(long)]
        json: bool,
        /// Also write the snapshot to a file (.json, .csv, or text).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print a snapshot digest every interval.
    Watch {
        #[arg(long, default_value = "2s", value_parser = humantime::parse_duration)]
        interval: Duration,
        #[arg(long)]
        count: Option<u64>,
        /// Write the collected history to a file when watching stops.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run hardware diagnostics. Without names, runs the configured tests.
    Diagnose {
        tests: Vec<String>,
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        list: bool,
        /// Also write the report to a file (.json, .csv, or text).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Serve the HTTP API and Prometheus metrics (default).
    Serve,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return ExitCode::SUCCESS;
    }

    let loaded = if cli.config == DEFAULT_CONFIG_PATH {
        Config::load_or_default(&cli.config)
    } else {
        Config::load_from_file(&cli.config)
    };
    let cfg = match loaded {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Snapshot { json, output } => snapshot_once(&cfg, json, output.as_deref()).await,
        Command::Watch {
            interval,
            count,
            output,
        } => watch_loop(&cfg, interval, count, output.as_deref()).await,
        Command::Diagnose {
            tests,
            timeout,
            json,
            list,
            output,
        } => diagnose(&cfg, tests, timeout, json, list, output.as_deref()).await,
        Command::Serve => run_server(cfg).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_collector(cfg: &Config) -> Result<Arc<MetricsCollector>, CollectError> {
    let provider = SysinfoProvider::new()?;
    let collector = MetricsCollector::new(Box::new(provider), CollectorSettings::from_config(cfg))?;
    Ok(Arc::new(collector))
}

fn build_runner(cfg: &Config) -> DiagnosticRunner {
    let env = ProbeEnv::from_config(&cfg.diagnostics);
    DiagnosticRunner::new(cfg.diagnostics.timeout()).with_probes(platform_probes(&env))
}

async fn take_snapshot(
    collector: &Arc<MetricsCollector>,
) -> Result<snapshot::MetricsSnapshot, CollectError> {
    let collector = collector.clone();
    tokio::task::spawn_blocking(move || collector.snapshot())
        .await
        .unwrap_or_else(|err| Err(CollectError::failed("snapshot", err.to_string())))
}

async fn snapshot_once(cfg: &Config, json: bool, output: Option<&Path>) -> ExitCode {
    let collector = match build_collector(cfg) {
        Ok(c) => c,
        Err(err) => {
            error!(error = %err, "metrics collector unavailable");
            return ExitCode::FAILURE;
        }
    };
    let snapshot = match take_snapshot(&collector).await {
        Ok(s) => s,
        Err(err) => {
            error!(error = %err, "snapshot failed");
            return ExitCode::FAILURE;
        }
    };
    if json {
        match serde_json::to_string_pretty(&snapshot) {
            Ok(text) => println!("{text}"),
            Err(err) => {
                error!(error = %err, "failed to encode snapshot");
                return ExitCode::FAILURE;
            }
        }
    } else {
        print!("{}", snapshot.render_text());
    }
    if let Some(path) = output {
        if let Err(err) = report::export_snapshot(&snapshot, path) {
            error!(error = %err, "snapshot export failed");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

async fn watch_loop(
    cfg: &Config,
    interval: Duration,
    count: Option<u64>,
    output: Option<&Path>,
) -> ExitCode {
    let collector = match build_collector(cfg) {
        Ok(c) => c,
        Err(err) => {
            error!(error = %err, "metrics collector unavailable");
            return ExitCode::FAILURE;
        }
    };
    let history = SnapshotHistory::with_capacity(cfg.monitoring.history_length);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut taken = 0_u64;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                match take_snapshot(&collector).await {
                    Ok(snapshot) => {
                        println!("{}", snapshot.render_line());
                        history.record(snapshot);
                    }
                    Err(err) => warn!(error = %err, "snapshot failed"),
                }
                taken += 1;
                if count.is_some_and(|n| taken >= n) {
                    break;
                }
            }
        }
    }

    let window = interval.as_secs().saturating_mul(taken).max(1);
    let summary = history.summary(window);
    println!(
        "{} samples, health {} ({}), cpu avg {}",
        summary.samples,
        summary.health.score,
        summary.health.status,
        summary
            .cpu
            .average
            .map_or_else(|| "n/a".to_string(), |v| format!("{v:.1}%"))
    );
    if let Some(path) = output {
        if let Err(err) = report::export_history(&history.recent(history.capacity()), path) {
            error!(error = %err, "history export failed");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

async fn diagnose(
    cfg: &Config,
    tests: Vec<String>,
    timeout: Option<Duration>,
    json: bool,
    list: bool,
    output: Option<&Path>,
) -> ExitCode {
    if list {
        for test in TestName::ALL {
            println!("{test}");
        }
        return ExitCode::SUCCESS;
    }

    let tests = if tests.is_empty() {
        cfg.diagnostics.tests.clone()
    } else {
        tests
    };
    let runner = build_runner(cfg);
    let report = runner.run_all(&tests, timeout).await;

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{text}"),
            Err(err) => {
                error!(error = %err, "failed to encode report");
                return ExitCode::FAILURE;
            }
        }
    } else {
        print!("{}", report.render_text());
    }
    if let Some(path) = output {
        if let Err(err) = report::export_diagnostics(&report, path) {
            error!(error = %err, "report export failed");
            return ExitCode::FAILURE;
        }
    }

    if report.summary.failed + report.summary.error > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn run_server(cfg: Config) -> ExitCode {
    info!(
        listen = %cfg.listen,
        interval_secs = cfg.interval_secs,
        "starting sysdiag"
    );

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialize metrics");
            return ExitCode::FAILURE;
        }
    };
    let addr: SocketAddr = match cfg.listen.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, listen = %cfg.listen, "invalid listen address");
            return ExitCode::FAILURE;
        }
    };

    let (collector, degraded_reason) = match build_collector(&cfg) {
        Ok(c) => (Some(c), None),
        Err(err) => {
            error!(error = %err, "metrics collector unavailable, serving diagnostics only");
            (None, Some(err.to_string()))
        }
    };
    let history = Arc::new(SnapshotHistory::with_capacity(
        cfg.monitoring.history_length,
    ));
    let app_state = http::HttpAppState {
        metrics: metrics.clone(),
        collector: collector.clone(),
        degraded_reason,
        history: history.clone(),
        runner: Arc::new(build_runner(&cfg)),
        default_tests: cfg.diagnostics.tests.clone(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(app_state);
            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "failed to bind HTTP listener");
                    return;
                }
            };

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    let collector_task = collector.map(|collector| {
        let metrics = metrics.clone();
        let history = history.clone();
        let mut shutdown = shutdown_rx.clone();
        let interval = Duration::from_secs(cfg.interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("collector loop stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        match take_snapshot(&collector).await {
                            Ok(snapshot) => {
                                metrics.update_from_snapshot(&snapshot);
                                history.record(snapshot);
                                metrics.set_history_length(history.len());
                            }
                            Err(err) => {
                                metrics.inc_collect_error("snapshot");
                                warn!(error = %err, "periodic snapshot failed");
                            }
                        }
                    }
                }
            }
        })
    });

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for Ctrl+C");
    }
    info!("Ctrl+C received, shutting down");

    let _ = shutdown_tx.send(true);

    if let Some(task) = collector_task {
        let _ = task.await;
    }
    let _ = http_task.await;
    ExitCode::SUCCESS
}
