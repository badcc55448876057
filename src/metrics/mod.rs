//! Phase-organized metrics for the event pipeline.
//!
//! Each phase (ingest, enrichment, store) owns its metric names in a
//! dedicated submodule. Recording is always safe: without an installed
//! recorder the `metrics` macros are no-ops.

pub mod enrichment;
pub mod ingest;
pub mod registry;
pub mod store;

pub use enrichment::EnrichmentMetrics;
pub use ingest::IngestMetrics;
pub use store::StoreMetrics;

use std::sync::Once;
use tracing::{info, warn};

pub const METRICS_ADDR_ENV: &str = "TOURIST_EVENTS_METRICS_ADDR";

static INIT: Once = Once::new();

/// Install the Prometheus exporter if `TOURIST_EVENTS_METRICS_ADDR` is set.
///
/// Idempotent. Without the variable nothing is installed and every metric
/// call stays a no-op.
pub fn init_metrics() {
    INIT.call_once(|| {
        let addr_str = match std::env::var(METRICS_ADDR_ENV) {
            Ok(v) if !v.trim().is_empty() => v,
            _ => {
                info!("{} not set, metrics exporter disabled", METRICS_ADDR_ENV);
                return;
            }
        };

        let addr = match addr_str.trim().parse::<std::net::SocketAddr>() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Invalid metrics addr '{}': {}", addr_str, e);
                return;
            }
        };

        match metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
        {
            Ok(()) => {
                info!("Prometheus exporter listening on http://{}/metrics", addr);
                registry::register_all_metrics();
            }
            Err(e) => warn!("Failed to install Prometheus exporter: {}", e),
        }
    });
}

/// Implemented by each phase so its metrics can be registered up front
/// and documented in one place.
pub trait PhaseMetrics {
    fn register_metrics();

    fn phase_name() -> &'static str;

    fn metrics_documentation() -> Vec<MetricDoc>;
}

#[derive(Debug, Clone)]
pub struct MetricDoc {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub help: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
    Gauge,
}

/// Metric names follow `tourist_events_{phase}_{name}[_total]`.
macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("tourist_events_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("tourist_events_", $phase, "_", $name)
    };
    (gauge, $phase:literal, $name:literal) => {
        concat!("tourist_events_", $phase, "_", $name)
    };
}

pub(crate) use phase_metric;
