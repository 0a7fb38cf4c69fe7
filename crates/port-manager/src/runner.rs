use std::net::SocketAddr;
use std::path::Path;

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::manager::{self, Deps, ManagerHandle};
use crate::persist::DpcListStore;
use crate::telemetry;

/// Controls optional behaviours when starting the manager programmatically.
#[derive(Clone, Debug)]
pub struct ManagerOptions {
    /// Initialize a tracing subscriber before starting.
    pub init_tracing: bool,
    /// Start the dedicated `/metrics` HTTP server.
    pub serve_metrics: bool,
    /// Reuse an existing Prometheus recorder instead of installing a new one.
    pub metrics_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
    /// Persist the candidate list under the configured directory. Disabled
    /// in tests that do not care about reboots.
    pub persist_list: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            init_tracing: true,
            serve_metrics: true,
            metrics_handle: None,
            persist_list: true,
        }
    }
}

/// Start the port configuration manager with the provided collaborators.
///
/// The embedding daemon owns the real network monitor, reconciler,
/// geolocation service and cellular agent; tests inject the in-memory ones.
/// The returned handle is the only way to feed inputs to the reactor and to
/// read its publications.
pub async fn start_manager(
    cfg: AppConfig,
    deps: Deps,
    mut options: ManagerOptions,
) -> anyhow::Result<ManagerHandle> {
    if options.init_tracing {
        telemetry::init_tracing();
    }
    cfg.validate()?;

    let metrics_handle = match options.metrics_handle.take() {
        Some(handle) => telemetry::register_metrics_handle(handle),
        None => telemetry::init_metrics_recorder(),
    };

    let store = options
        .persist_list
        .then(|| DpcListStore::new(Path::new(&cfg.persist_dir)));
    let persisted = match &store {
        Some(store) => match store.load() {
            Ok(persisted) => persisted,
            Err(err) => {
                warn!(%err, "failed to load the persisted candidate list; starting empty");
                None
            }
        },
        None => None,
    };
    if let Some(persisted) = &persisted {
        info!(
            entries = persisted.entries.len(),
            current_index = persisted.current_index,
            "loaded persisted candidate list"
        );
    }

    if options.serve_metrics {
        let addr: SocketAddr = format!("{}:{}", cfg.metrics_host, cfg.metrics_port)
            .parse()
            .map_err(|err| anyhow::anyhow!("invalid metrics bind address: {err}"))?;
        tokio::spawn(async move {
            if let Err(err) =
                telemetry::serve_metrics_with_shutdown(metrics_handle, addr, std::future::pending())
                    .await
            {
                warn!(%err, "metrics server exited with error");
            }
        });
    }

    info!(
        server_file = %cfg.server_file,
        api_version = cfg.api_version,
        test_interval_secs = cfg.network_test_interval_secs,
        "port configuration manager starting"
    );

    Ok(manager::spawn(cfg.timings(), deps, persisted, store))
}
