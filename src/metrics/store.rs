//! Store phase metrics: expiry sweeps and event counts.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct StoreMetrics;

impl StoreMetrics {
    pub fn record_sweep(expired: usize, purged: usize, skipped_locked: usize) {
        ::metrics::counter!(phase_metric!(counter, "store", "sweeps")).increment(1);
        ::metrics::counter!(phase_metric!(counter, "store", "events_expired")).increment(expired as u64);
        ::metrics::counter!(phase_metric!(counter, "store", "events_purged")).increment(purged as u64);
        ::metrics::counter!(phase_metric!(counter, "store", "purge_skipped_locked"))
            .increment(skipped_locked as u64);
    }

    pub fn record_event_count(count: usize) {
        ::metrics::gauge!(phase_metric!(gauge, "store", "events")).set(count as f64);
    }
}

impl PhaseMetrics for StoreMetrics {
    fn register_metrics() {
        use metrics::{counter, gauge};
        let _ = counter!(phase_metric!(counter, "store", "sweeps"));
        let _ = counter!(phase_metric!(counter, "store", "events_expired"));
        let _ = counter!(phase_metric!(counter, "store", "events_purged"));
        let _ = counter!(phase_metric!(counter, "store", "purge_skipped_locked"));
        let _ = gauge!(phase_metric!(gauge, "store", "events"));
    }

    fn phase_name() -> &'static str {
        "store"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "store", "sweeps"),
                metric_type: MetricType::Counter,
                help: "Expiry sweeps run",
            },
            MetricDoc {
                name: phase_metric!(counter, "store", "events_expired"),
                metric_type: MetricType::Counter,
                help: "Events stamped as expired",
            },
            MetricDoc {
                name: phase_metric!(counter, "store", "events_purged"),
                metric_type: MetricType::Counter,
                help: "Events permanently removed after retention",
            },
            MetricDoc {
                name: phase_metric!(counter, "store", "purge_skipped_locked"),
                metric_type: MetricType::Counter,
                help: "Purge candidates skipped because a merge held their lock",
            },
            MetricDoc {
                name: phase_metric!(gauge, "store", "events"),
                metric_type: MetricType::Gauge,
                help: "Canonical events currently stored",
            },
        ]
    }
}
