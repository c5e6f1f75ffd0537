use crate::collectors::MetricsCollector;
use crate::config::{diagnostic_timeout, MAX_DIAGNOSTIC_TIMEOUT_SECS};
use crate::diagnostics::{DiagnosticRunner, TestName};
use crate::history::SnapshotHistory;
use crate::metrics::Metrics;
use crate::report::history_csv;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

const DEFAULT_SUMMARY_WINDOW_SECS: u64 = 300;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    /// `None` when the collector failed to start; diagnostics keep working.
    pub collector: Option<Arc<MetricsCollector>>,
    pub degraded_reason: Option<String>,
    pub history: Arc<SnapshotHistory>,
    pub runner: Arc<DiagnosticRunner>,
    /// Tests `run_all` uses when the request names none.
    pub default_tests: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub window_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub test: String,
    pub timeout_secs: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct RunAllRequest {
    #[serde(default)]
    pub tests: Vec<String>,
    pub timeout_secs: Option<f64>,
}

pub fn build_router(state: HttpAppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/snapshot", get(snapshot_handler))
        .route(
            "/api/history",
            get(history_handler).delete(clear_history_handler),
        )
        .route("/api/history/summary", get(summary_handler))
        .route("/api/history/export.csv", get(history_csv_handler))
        .route("/api/battery", get(battery_handler))
        .route("/api/diagnostics/tests", get(tests_handler))
        .route("/api/diagnostics/run", post(run_handler))
        .route("/api/diagnostics/run_all", post(run_all_handler))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    state.metrics.refresh_uptime();
    state.metrics.set_history_length(state.history.len());
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn unavailable(state: &HttpAppState) -> Response {
    let reason = state
        .degraded_reason
        .clone()
        .unwrap_or_else(|| "metrics collector unavailable".to_string());
    error_response(StatusCode::SERVICE_UNAVAILABLE, reason)
}

async fn snapshot_handler(State(state): State<HttpAppState>) -> Response {
    let Some(collector) = state.collector.clone() else {
        return unavailable(&state);
    };
    match tokio::task::spawn_blocking(move || collector.snapshot()).await {
        Ok(Ok(snapshot)) => {
            state.history.record(snapshot.clone());
            state.metrics.update_from_snapshot(&snapshot);
            state.metrics.set_history_length(state.history.len());
            Json(snapshot).into_response()
        }
        Ok(Err(err)) => {
            error!(error = %err, "snapshot failed");
            state.metrics.inc_collect_error("snapshot");
            error_response(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
        Err(err) => {
            error!(error = %err, "snapshot task panicked");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "snapshot task failed")
        }
    }
}

async fn history_handler(
    State(state): State<HttpAppState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(state.history.capacity());
    Json(state.history.recent(limit))
}

async fn history_csv_handler(State(state): State<HttpAppState>) -> Response {
    let csv = history_csv(&state.history.recent(state.history.capacity()));
    let mut response = Response::new(Body::from(csv));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/csv; charset=utf-8"));
    response
}

async fn clear_history_handler(State(state): State<HttpAppState>) -> StatusCode {
    state.history.clear();
    state.metrics.set_history_length(0);
    StatusCode::NO_CONTENT
}

async fn summary_handler(
    State(state): State<HttpAppState>,
    Query(query): Query<SummaryQuery>,
) -> impl IntoResponse {
    let window = query.window_secs.unwrap_or(DEFAULT_SUMMARY_WINDOW_SECS);
    Json(state.history.summary(window))
}

async fn battery_handler(State(state): State<HttpAppState>) -> Response {
    let Some(collector) = state.collector.clone() else {
        return unavailable(&state);
    };
    match tokio::task::spawn_blocking(move || collector.battery()).await {
        Ok(Ok(battery)) => Json(json!({ "battery": battery })).into_response(),
        Ok(Err(err)) if err.is_fatal() => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
        Ok(Err(err)) => {
            warn!(error = %err, "battery reading unavailable");
            state.metrics.inc_collect_error("battery");
            Json(json!({ "battery": null, "reason": err.to_string() })).into_response()
        }
        Err(err) => {
            error!(error = %err, "battery task panicked");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "battery task failed")
        }
    }
}

async fn tests_handler() -> impl IntoResponse {
    let names: Vec<&str> = TestName::ALL.iter().map(|t| t.as_str()).collect();
    Json(names)
}

fn parse_timeout(timeout_secs: Option<f64>) -> Result<Option<Duration>, Response> {
    match timeout_secs {
        None => Ok(None),
        Some(secs) => diagnostic_timeout(secs).map(Some).ok_or_else(|| {
            error_response(
                StatusCode::BAD_REQUEST,
                format!("timeout_secs must be in range (0, {MAX_DIAGNOSTIC_TIMEOUT_SECS}]"),
            )
        }),
    }
}

async fn run_handler(
    State(state): State<HttpAppState>,
    Json(req): Json<RunRequest>,
) -> Response {
    let timeout = match parse_timeout(req.timeout_secs) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let result = state.runner.run(&req.test, timeout).await;
    state.metrics.observe_diagnostic(&result);
    Json(result).into_response()
}

async fn run_all_handler(
    State(state): State<HttpAppState>,
    Json(req): Json<RunAllRequest>,
) -> Response {
    let timeout = match parse_timeout(req.timeout_secs) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let tests: &[String] = if req.tests.is_empty() {
        &state.default_tests
    } else {
        &req.tests
    };
    let report = state.runner.run_all(tests, timeout).await;
    for result in &report.results {
        state.metrics.observe_diagnostic(result);
    }
    Json(report).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::tests::FakeProvider;
    use crate::collectors::CollectorSettings;
    use crate::diagnostics::{HardwareProbe, ProbeError, ProbeReport};
    use axum::body::to_bytes;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    struct MouseProbe;

    impl HardwareProbe for MouseProbe {
        fn test(&self) -> TestName {
            TestName::Mouse
        }

        fn probe(&self, _budget: Duration) -> Result<ProbeReport, ProbeError> {
            Ok(ProbeReport::pass("1 mouse(s) detected"))
        }
    }

    fn app_state(with_collector: bool) -> HttpAppState {
        let collector = with_collector.then(|| {
            Arc::new(
                MetricsCollector::new(
                    Box::new(FakeProvider::default()),
                    CollectorSettings::default(),
                )
                .expect("fake collector"),
            )
        });
        HttpAppState {
            metrics: Metrics::new().expect("metrics init"),
            collector,
            degraded_reason: (!with_collector).then(|| "no /proc".to_string()),
            history: Arc::new(SnapshotHistory::with_capacity(5)),
            runner: Arc::new(DiagnosticRunner::default().with_probe(Arc::new(MouseProbe))),
            default_tests: Vec::new(),
        }
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let (status, body) = send(build_router(app_state(true)), get_req("/healthz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn snapshot_is_recorded_in_history() {
        let state = app_state(true);
        let history = state.history.clone();
        let app = build_router(state);

        let (status, body) = send(app.clone(), get_req("/api/snapshot")).await;
        assert_eq!(status, StatusCode::OK);
        let snapshot: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(snapshot["cpu_percent"], json!(37.5));
        assert_eq!(history.len(), 1);

        let (_, body) = send(app, get_req("/api/history?limit=10")).await;
        let list: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(list.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn delete_history_empties_buffer() {
        let state = app_state(true);
        let history = state.history.clone();
        let app = build_router(state);
        let _ = send(app.clone(), get_req("/api/snapshot")).await;
        assert_eq!(history.len(), 1);

        let req = Request::builder()
            .method("DELETE")
            .uri("/api/history")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(app, req).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(history.len(), 0);
    }

    #[tokio::test]
    async fn history_exports_as_csv() {
        let state = app_state(true);
        let app = build_router(state);
        let _ = send(app.clone(), get_req("/api/snapshot")).await;
        let _ = send(app.clone(), get_req("/api/snapshot")).await;

        let resp = app.oneshot(get_req("/api/history/export.csv")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(CONTENT_TYPE).unwrap(),
            "text/csv; charset=utf-8"
        );
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,cpu_percent"));
        assert!(lines[1].contains(",37.50,60.00,25.00,,3"));
    }

    #[tokio::test]
    async fn snapshot_is_503_when_collector_is_down() {
        let (status, body) = send(build_router(app_state(false)), get_req("/api/snapshot")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let err: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(err["error"], "no /proc");
    }

    #[tokio::test]
    async fn diagnostics_work_while_degraded() {
        let app = build_router(app_state(false));
        let (status, body) = send(
            app,
            post_json("/api/diagnostics/run", json!({ "test": "mouse" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let result: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(result["status"], "passed");
    }

    #[tokio::test]
    async fn unknown_test_is_an_error_result() {
        let app = build_router(app_state(true));
        let (status, body) = send(
            app,
            post_json("/api/diagnostics/run", json!({ "test": "toaster" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let result: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(result["status"], "error");
        assert_eq!(result["message"], "unknown diagnostic test: toaster");
    }

    #[tokio::test]
    async fn bad_timeout_is_rejected() {
        let app = build_router(app_state(true));
        let (status, _) = send(
            app,
            post_json(
                "/api/diagnostics/run",
                json!({ "test": "mouse", "timeout_secs": -1.0 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn enormous_timeout_is_rejected() {
        let app = build_router(app_state(true));
        let (status, body) = send(
            app,
            post_json(
                "/api/diagnostics/run",
                json!({ "test": "mouse", "timeout_secs": 1e300 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: Value = serde_json::from_slice(&body).unwrap();
        assert!(err["error"].as_str().unwrap().contains("timeout_secs"));
        assert!(parse_timeout(Some(1e300)).is_err());
        assert_eq!(
            parse_timeout(Some(1.5)).ok().flatten(),
            Some(Duration::from_millis(1500))
        );
    }

    #[tokio::test]
    async fn run_all_reports_in_order() {
        let app = build_router(app_state(true));
        let (status, body) = send(
            app,
            post_json(
                "/api/diagnostics/run_all",
                json!({ "tests": ["mouse", "bluetooth"] }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let report: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(report["results"][0]["test_name"], "mouse");
        assert_eq!(report["results"][1]["test_name"], "bluetooth");
        assert_eq!(report["summary"]["total"], 2);
        assert_eq!(report["summary"]["passed"], 1);
        assert_eq!(report["summary"]["skipped"], 1);
    }

    #[tokio::test]
    async fn metrics_contains_uptime_and_runs() {
        let state = app_state(true);
        let app = build_router(state);
        let _ = send(
            app.clone(),
            post_json("/api/diagnostics/run", json!({ "test": "mouse" })),
        )
        .await;
        let (status, body) = send(app, get_req("/metrics")).await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("sysdiag_uptime_seconds"));
        assert!(text.contains("sysdiag_diagnostic_runs_total"));
    }

    #[tokio::test]
    async fn battery_endpoint_reports_null_without_battery() {
        let (status, body) = send(build_router(app_state(true)), get_req("/api/battery")).await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert!(value["battery"].is_null());
    }

    #[tokio::test]
    async fn tests_endpoint_lists_all_tests() {
        let (_, body) = send(build_router(app_state(true)), get_req("/api/diagnostics/tests")).await;
        let names: Vec<String> = serde_json::from_slice(&body).unwrap();
        assert_eq!(names.len(), 7);
        assert_eq!(names[0], "bluetooth");
    }

    #[tokio::test]
    async fn concurrent_snapshots_fill_history_exactly() {
        let state = app_state(true);
        let history = Arc::new(SnapshotHistory::with_capacity(100));
        let state = HttpAppState {
            history: history.clone(),
            ..state
        };
        let app = build_router(state);
        let mut handles = Vec::new();
        for _ in 0..10 {
            let app = app.clone();
            handles.push(tokio::spawn(async move {
                send(app, get_req("/api/snapshot")).await.0
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), StatusCode::OK);
        }
        assert_eq!(history.len(), 10);
    }
}
