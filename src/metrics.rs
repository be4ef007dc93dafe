use axum::Router;
use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::get;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::future::{Future, ready};
use std::time::Instant;

pub fn metrics_app() -> Router {
    // Fetches can legitimately run up to the 30s timeout, so the buckets
    // stretch well past typical request latencies.
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000, 30.000,
    ];

    let prom_handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_requests_duration_seconds".to_string()),
            EXPONENTIAL_SECONDS,
        )
        .unwrap()
        .set_buckets_for_metric(
            Matcher::Full("pipeline_duration_seconds".to_string()),
            EXPONENTIAL_SECONDS,
        )
        .unwrap()
        .install_recorder()
        .unwrap();

    Router::new().route("/metrics", get(move || ready(prom_handle.render())))
}

pub async fn record_metrics(req: Request, next: Next) -> impl IntoResponse {
    let start = Instant::now();
    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };
    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    tracing::info!(method = %method, path = %path, status = %status, latency, "request handled");

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}

/// Times one pipeline stage (fetch or decrypt) into a labeled histogram,
/// passing the result through untouched.
pub async fn observe_stage<T, E>(
    stage: &'static str,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, E> {
    let start = Instant::now();
    let result = fut.await;
    let duration = start.elapsed();

    let labels = [
        ("stage", stage),
        (
            "status",
            if result.is_ok() { "success" } else { "failure" },
        ),
    ];
    metrics::histogram!("pipeline_duration_seconds", &labels).record(duration.as_secs_f64());

    result
}
