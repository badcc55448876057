//! Ingest phase metrics: normalization, identity resolution and upserts.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct IngestMetrics;

impl IngestMetrics {
    /// Record a finished ingest run
    pub fn record_run(stored: usize, rejected: usize, duration_secs: f64) {
        ::metrics::counter!(phase_metric!(counter, "ingest", "runs")).increment(1);
        ::metrics::counter!(phase_metric!(counter, "ingest", "records_stored")).increment(stored as u64);
        ::metrics::counter!(phase_metric!(counter, "ingest", "records_rejected"))
            .increment(rejected as u64);
        ::metrics::histogram!(phase_metric!(histogram, "ingest", "run_duration_seconds"))
            .record(duration_secs);
    }

    pub fn record_invalid() {
        ::metrics::counter!(phase_metric!(counter, "ingest", "records_invalid")).increment(1);
    }

    pub fn record_store_failure() {
        ::metrics::counter!(phase_metric!(counter, "ingest", "store_failures")).increment(1);
    }

    /// Record how an upsert landed (`created`, `merged`, `fuzzy_merged`, `unchanged`)
    pub fn record_upsert(change: &'static str) {
        ::metrics::counter!(phase_metric!(counter, "ingest", "upserts"), "change" => change).increment(1);
    }

    pub fn record_unresolved_date() {
        ::metrics::counter!(phase_metric!(counter, "ingest", "dates_unresolved")).increment(1);
    }
}

impl PhaseMetrics for IngestMetrics {
    fn register_metrics() {
        use metrics::{counter, histogram};
        let _ = counter!(phase_metric!(counter, "ingest", "runs"));
        let _ = counter!(phase_metric!(counter, "ingest", "records_stored"));
        let _ = counter!(phase_metric!(counter, "ingest", "records_rejected"));
        let _ = counter!(phase_metric!(counter, "ingest", "records_invalid"));
        let _ = counter!(phase_metric!(counter, "ingest", "store_failures"));
        let _ = counter!(phase_metric!(counter, "ingest", "upserts"));
        let _ = counter!(phase_metric!(counter, "ingest", "dates_unresolved"));
        let _ = histogram!(phase_metric!(histogram, "ingest", "run_duration_seconds"));
    }

    fn phase_name() -> &'static str {
        "ingest"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "ingest", "runs"),
                metric_type: MetricType::Counter,
                help: "Ingest runs completed",
            },
            MetricDoc {
                name: phase_metric!(counter, "ingest", "records_stored"),
                metric_type: MetricType::Counter,
                help: "Raw records that ended up in a canonical event",
            },
            MetricDoc {
                name: phase_metric!(counter, "ingest", "records_rejected"),
                metric_type: MetricType::Counter,
                help: "Raw records dropped by a run for any reason",
            },
            MetricDoc {
                name: phase_metric!(counter, "ingest", "records_invalid"),
                metric_type: MetricType::Counter,
                help: "Raw records rejected by the normalizer",
            },
            MetricDoc {
                name: phase_metric!(counter, "ingest", "store_failures"),
                metric_type: MetricType::Counter,
                help: "Upserts that failed because the store was unavailable",
            },
            MetricDoc {
                name: phase_metric!(counter, "ingest", "upserts"),
                metric_type: MetricType::Counter,
                help: "Upserts by outcome",
            },
            MetricDoc {
                name: phase_metric!(counter, "ingest", "dates_unresolved"),
                metric_type: MetricType::Counter,
                help: "Records whose date text could not be resolved",
            },
            MetricDoc {
                name: phase_metric!(histogram, "ingest", "run_duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Wall time of one ingest run",
            },
        ]
    }
}
