use std::net::SocketAddr;
use std::sync::OnceLock;

use axum::{http::StatusCode, routing::get, Router};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json())
        .init();
}

pub fn init_metrics_recorder() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("metrics recorder already installed")
        })
        .clone()
}

/// Register an existing Prometheus handle without installing a new recorder.
/// Useful when embedding the manager into a daemon that already installed a
/// global recorder.
pub fn register_metrics_handle(handle: PrometheusHandle) -> PrometheusHandle {
    METRICS_HANDLE.get_or_init(|| handle).clone()
}

pub async fn serve_metrics_with_shutdown<S>(
    handle: PrometheusHandle,
    addr: SocketAddr,
    shutdown: S,
) -> anyhow::Result<()>
where
    S: std::future::Future<Output = ()> + Send + 'static,
{
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let body = handle.render();
            async move {
                (
                    StatusCode::OK,
                    [(
                        axum::http::header::CONTENT_TYPE,
                        "text/plain; version=0.0.4",
                    )],
                    body,
                )
            }
        }),
    );

    let listener = TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr().unwrap_or(addr);
    info!(%bound_addr, "metrics server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

pub fn record_probe_result(result: &str) {
    counter!(
        "dpcm_probe_total",
        "result" => result.to_string()
    )
    .increment(1);
}

pub fn record_verification_verdict(verdict: &str) {
    counter!(
        "dpcm_verification_total",
        "verdict" => verdict.to_string()
    )
    .increment(1);
}

pub fn record_fallback() {
    counter!("dpcm_fallback_total").increment(1);
}

pub fn record_compression(removed: usize) {
    counter!("dpcm_compression_removed_total").increment(removed as u64);
}

pub fn record_dns_publication() {
    counter!("dpcm_dns_publications_total").increment(1);
}

pub fn record_wwan_config_push() {
    counter!("dpcm_wwan_config_pushes_total").increment(1);
}

pub fn record_dpc_list_len(len: usize) {
    gauge!("dpcm_dpc_list_entries").set(len as f64);
}

pub fn record_geo_lookup(result: &str) {
    counter!(
        "dpcm_geo_lookup_total",
        "result" => result.to_string()
    )
    .increment(1);
}
