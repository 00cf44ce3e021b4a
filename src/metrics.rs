//! Prometheus metrics HTTP server.
//!
//! Exposes scan statistics in Prometheus text format via HTTP endpoint.

use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use tokio::net::TcpListener;
use tracing::info;

use crate::stats::{HistogramPercentiles, ScanStats};

/// Start the Prometheus metrics HTTP server.
///
/// Runs until the task is dropped and serves metrics at `/metrics`.
/// Returns an error if the server fails to bind to the port.
pub async fn start_metrics_server(port: u16, stats: Arc<ScanStats>) -> Result<(), std::io::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(stats);

    let listener = TcpListener::bind(addr).await?;
    info!("Prometheus metrics server listening on http://{}/metrics", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn metrics_handler(State(stats): State<Arc<ScanStats>>) -> impl IntoResponse {
    let output = format_prometheus_metrics(&stats);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        output,
    )
}

fn write_counter(output: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(output, "# HELP {} {}", name, help);
    let _ = writeln!(output, "# TYPE {} counter", name);
    let _ = writeln!(output, "{} {}", name, value);
}

fn write_summary(output: &mut String, name: &str, help: &str, p: &HistogramPercentiles, count: u64) {
    let _ = writeln!(output, "# HELP {} {}", name, help);
    let _ = writeln!(output, "# TYPE {} summary", name);
    let _ = writeln!(output, "{}{{quantile=\"0.5\"}} {}", name, p.p50);
    let _ = writeln!(output, "{}{{quantile=\"0.9\"}} {}", name, p.p90);
    let _ = writeln!(output, "{}{{quantile=\"0.99\"}} {}", name, p.p99);
    let _ = writeln!(output, "{}_count {}", name, count);
}

/// Format statistics as Prometheus text format.
fn format_prometheus_metrics(stats: &ScanStats) -> String {
    let summary = stats.summary();
    let mut output = String::with_capacity(4096);

    let _ = writeln!(output, "# HELP tower_uptime_seconds Time since the scanner started");
    let _ = writeln!(output, "# TYPE tower_uptime_seconds gauge");
    let _ = writeln!(output, "tower_uptime_seconds {:.3}", summary.elapsed_secs);

    write_counter(
        &mut output,
        "tower_scans_total",
        "Scans committed to shared state",
        summary.scans_completed,
    );
    write_counter(
        &mut output,
        "tower_scans_valid_total",
        "Scans that produced a valid serving cell",
        summary.scans_valid,
    );
    write_counter(
        &mut output,
        "tower_scans_not_ready_total",
        "Scans requested while the modem was not ready",
        summary.scans_not_ready,
    );
    write_counter(
        &mut output,
        "tower_busy_rejections_total",
        "Scan requests rejected because one was already pending",
        summary.busy_rejections,
    );

    let _ = writeln!(output, "# HELP tower_parse_failures_total Response lines that failed to parse");
    let _ = writeln!(output, "# TYPE tower_parse_failures_total counter");
    let _ = writeln!(
        output,
        "tower_parse_failures_total{{record=\"serving\"}} {}",
        summary.serving_parse_failures
    );
    let _ = writeln!(
        output,
        "tower_parse_failures_total{{record=\"neighbor\"}} {}",
        summary.neighbor_parse_failures
    );

    let _ = writeln!(output, "# HELP tower_command_failures_total QENG commands that did not finish with OK");
    let _ = writeln!(output, "# TYPE tower_command_failures_total counter");
    let _ = writeln!(
        output,
        "tower_command_failures_total{{status=\"timeout\"}} {}",
        summary.command_timeouts
    );
    let _ = writeln!(
        output,
        "tower_command_failures_total{{status=\"error\"}} {}",
        summary.command_errors
    );

    write_counter(
        &mut output,
        "tower_signal_samples_total",
        "Usable signal strength samples",
        summary.signal_samples,
    );
    write_counter(
        &mut output,
        "tower_signal_unusable_total",
        "Signal samples without a usable measurement",
        summary.stale_samples,
    );
    write_counter(
        &mut output,
        "tower_neighbors_seen_total",
        "Neighbor cells across all scans",
        summary.neighbors_seen,
    );

    let _ = writeln!(output, "# HELP tower_scans_by_rat_total Scans broken down by serving cell technology");
    let _ = writeln!(output, "# TYPE tower_scans_by_rat_total counter");
    for (rat, count) in &summary.scans_by_rat {
        let _ = writeln!(output, "tower_scans_by_rat_total{{rat=\"{}\"}} {}", rat, count);
    }

    if let Some(ref p) = summary.duration_percentiles {
        write_summary(
            &mut output,
            "tower_scan_duration_ms",
            "Scan duration in milliseconds",
            p,
            summary.scans_completed,
        );
    }

    if let Some(ref p) = summary.neighbor_percentiles {
        write_summary(
            &mut output,
            "tower_neighbors_per_scan",
            "Neighbor cells per scan",
            p,
            summary.scans_completed,
        );
    }

    output
}
