//! HTTP surface: landing page plus the Prometheus text endpoint.

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, TextEncoder};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::collector::ZfsCollector;
use crate::metrics::Metric;

/// Capacity of the channel between a scrape and the response renderer
const SCRAPE_BUFFER: usize = 256;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub collector: Arc<ZfsCollector>,
    pub telemetry_path: String,
}

/// Build the router with the landing page and the metrics endpoint
pub fn router(state: AppState) -> Router {
    let path = state.telemetry_path.clone();
    let mut router = Router::new().route(&path, get(metrics_handler));
    if path != "/" {
        router = router.route("/", get(landing_handler));
    }
    router.with_state(state)
}

/// Bind `addr` and serve until Ctrl-C
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}{}", addr, state.telemetry_path);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}

async fn landing_handler(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        "<html>\n<head><title>ZFS Exporter</title></head>\n<body>\n<h1>ZFS Exporter</h1>\n<p><a href=\"{}\">Metrics</a></p>\n</body>\n</html>\n",
        state.telemetry_path
    ))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    let metrics = scrape(&state.collector).await;
    debug!("Scrape produced {} samples", metrics.len());

    match render(metrics) {
        Ok(body) => (
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("failed to encode metrics: {}", e)).into_response()
        }
    }
}

/// Run one collection, draining the sink while the coordinator writes to it
pub async fn scrape(collector: &ZfsCollector) -> Vec<Metric> {
    let (tx, mut rx) = mpsc::channel::<Metric>(SCRAPE_BUFFER);

    let drain = async {
        let mut metrics = Vec::new();
        while let Some(metric) = rx.recv().await {
            metrics.push(metric);
        }
        metrics
    };

    let ((), metrics) = tokio::join!(collector.collect(tx), drain);
    metrics
}

/// Group samples into families sorted by name and encode them as text
pub fn render(mut metrics: Vec<Metric>) -> prometheus::Result<String> {
    metrics.sort_by(|a, b| a.identity().cmp(b.identity()));

    let mut families: BTreeMap<String, MetricFamily> = BTreeMap::new();
    for metric in metrics {
        let mut family = metric.into_family();
        let grouped = families.entry(family.get_name().to_string()).or_insert_with(|| {
            let mut empty = MetricFamily::default();
            empty.set_name(family.get_name().to_string());
            empty.set_help(family.get_help().to_string());
            empty.set_field_type(family.get_field_type());
            empty
        });
        for sample in family.take_metric().into_iter() {
            grouped.mut_metric().push(sample);
        }
    }

    let families: Vec<MetricFamily> = families.into_values().collect();
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricDesc;

    #[test]
    fn render_groups_samples_by_family() {
        let used = MetricDesc::new("dataset", "used_bytes", "Used.", &["name"]);
        let size = MetricDesc::new("pool", "size_bytes", "Size.", &["pool"]);
        let metrics = vec![
            used.gauge(2.0, &["tank/b"]).unwrap(),
            size.gauge(10.0, &["tank"]).unwrap(),
            used.gauge(1.0, &["tank/a"]).unwrap(),
        ];

        let text = render(metrics).unwrap();
        assert_eq!(text.matches("# HELP zfs_dataset_used_bytes").count(), 1);
        assert_eq!(text.matches("# TYPE zfs_pool_size_bytes gauge").count(), 1);

        let a = text.find("name=\"tank/a\"").unwrap();
        let b = text.find("name=\"tank/b\"").unwrap();
        let pool = text.find("zfs_pool_size_bytes{").unwrap();
        assert!(a < b && b < pool);
    }

    #[test]
    fn render_of_nothing_is_empty() {
        assert_eq!(render(Vec::new()).unwrap(), "");
    }
}
