//! Registers every phase's metrics once the exporter is installed and warns
//! about name collisions between phases.

use crate::metrics::{MetricDoc, PhaseMetrics};
use std::collections::HashMap;
use tracing::{info, warn};

pub fn register_all_metrics() {
    let mut all_metrics = HashMap::new();

    register_phase_metrics::<super::ingest::IngestMetrics>(&mut all_metrics);
    register_phase_metrics::<super::enrichment::EnrichmentMetrics>(&mut all_metrics);
    register_phase_metrics::<super::store::StoreMetrics>(&mut all_metrics);

    info!("Registered {} metrics across all phases", all_metrics.len());
}

fn register_phase_metrics<T: PhaseMetrics>(all_metrics: &mut HashMap<&'static str, (&'static str, MetricDoc)>) {
    T::register_metrics();
    let phase_name = T::phase_name();

    for doc in T::metrics_documentation() {
        if let Some((owner, _)) = all_metrics.get(doc.name) {
            warn!(
                "Metric '{}' defined by both '{}' and '{}'",
                doc.name, owner, phase_name
            );
        } else {
            all_metrics.insert(doc.name, (phase_name, doc));
        }
    }
}

/// All documented metrics, for `--help`-style listings and tests.
pub fn documented_metrics() -> Vec<MetricDoc> {
    use super::{EnrichmentMetrics, IngestMetrics, StoreMetrics};

    let mut docs = IngestMetrics::metrics_documentation();
    docs.extend(EnrichmentMetrics::metrics_documentation());
    docs.extend(StoreMetrics::metrics_documentation());
    docs
}
