use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::Mutex;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::trace;

/// Port of the standalone scrape endpoint installed by [`init_metrics`].
pub const DEFAULT_METRICS_PORT: u16 = 9000;

/// Interval between histogram upkeep runs of the cached recorder.
const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

// The recorder is process-global and can only be installed once, while tests call
// `init_metrics_handle` many times.
static PROMETHEUS_HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Installs the Prometheus recorder once and returns a handle for rendering metrics from an
/// existing HTTP endpoint.
///
/// Must be called from within a Tokio runtime, which runs the recorder upkeep.
pub fn init_metrics_handle() -> Result<PrometheusHandle, BuildError> {
    let mut prometheus_handle = PROMETHEUS_HANDLE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(handle) = &*prometheus_handle {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    *prometheus_handle = Some(handle.clone());

    let upkeep_handle = handle.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(UPKEEP_INTERVAL).await;
            trace!("running metrics upkeep");
            upkeep_handle.run_upkeep();
        }
    });

    Ok(handle)
}

/// Installs the Prometheus recorder with its own scrape endpoint on `[::]:{port}/metrics`.
///
/// `deployment` is attached to every series as the `deployment` label.
pub fn init_metrics(port: u16, deployment: Option<&str>) -> Result<(), BuildError> {
    let mut builder = PrometheusBuilder::new()
        .with_http_listener(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port));

    if let Some(deployment) = deployment {
        builder = builder.add_global_label("deployment", deployment);
    }

    builder.install()
}
