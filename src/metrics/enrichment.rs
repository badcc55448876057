//! Enrichment phase metrics: external calls, cache hits and the rate limiter.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct EnrichmentMetrics;

impl EnrichmentMetrics {
    pub fn record_call(duration_secs: f64) {
        ::metrics::counter!(phase_metric!(counter, "enrichment", "calls")).increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "enrichment", "call_duration_seconds"))
            .record(duration_secs);
    }

    /// Record a failed attempt (`transient` or `permanent`)
    pub fn record_call_error(kind: &'static str) {
        ::metrics::counter!(phase_metric!(counter, "enrichment", "call_errors"), "kind" => kind)
            .increment(1);
    }

    pub fn record_retry() {
        ::metrics::counter!(phase_metric!(counter, "enrichment", "retries")).increment(1);
    }

    pub fn record_cache_hit() {
        ::metrics::counter!(phase_metric!(counter, "enrichment", "cache_hits")).increment(1);
    }

    pub fn record_outcome(status: &'static str) {
        ::metrics::counter!(phase_metric!(counter, "enrichment", "outcomes"), "status" => status)
            .increment(1);
    }

    pub fn record_limiter_wait(wait_secs: f64) {
        ::metrics::histogram!(phase_metric!(histogram, "enrichment", "limiter_wait_seconds"))
            .record(wait_secs);
    }

    pub fn record_rate_limited() {
        ::metrics::counter!(phase_metric!(counter, "enrichment", "rate_limited")).increment(1);
    }
}

impl PhaseMetrics for EnrichmentMetrics {
    fn register_metrics() {
        use metrics::{counter, histogram};
        let _ = counter!(phase_metric!(counter, "enrichment", "calls"));
        let _ = counter!(phase_metric!(counter, "enrichment", "call_errors"));
        let _ = counter!(phase_metric!(counter, "enrichment", "retries"));
        let _ = counter!(phase_metric!(counter, "enrichment", "cache_hits"));
        let _ = counter!(phase_metric!(counter, "enrichment", "outcomes"));
        let _ = counter!(phase_metric!(counter, "enrichment", "rate_limited"));
        let _ = histogram!(phase_metric!(histogram, "enrichment", "call_duration_seconds"));
        let _ = histogram!(phase_metric!(histogram, "enrichment", "limiter_wait_seconds"));
    }

    fn phase_name() -> &'static str {
        "enrichment"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "enrichment", "calls"),
                metric_type: MetricType::Counter,
                help: "Requests sent to the text service",
            },
            MetricDoc {
                name: phase_metric!(counter, "enrichment", "call_errors"),
                metric_type: MetricType::Counter,
                help: "Failed text service attempts by kind",
            },
            MetricDoc {
                name: phase_metric!(counter, "enrichment", "retries"),
                metric_type: MetricType::Counter,
                help: "Attempts scheduled after a transient failure",
            },
            MetricDoc {
                name: phase_metric!(counter, "enrichment", "cache_hits"),
                metric_type: MetricType::Counter,
                help: "Enrichments served from the content cache",
            },
            MetricDoc {
                name: phase_metric!(counter, "enrichment", "outcomes"),
                metric_type: MetricType::Counter,
                help: "Finished enrichment tasks by final status",
            },
            MetricDoc {
                name: phase_metric!(counter, "enrichment", "rate_limited"),
                metric_type: MetricType::Counter,
                help: "Tasks failed because no token arrived in time",
            },
            MetricDoc {
                name: phase_metric!(histogram, "enrichment", "call_duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Latency of one text service request",
            },
            MetricDoc {
                name: phase_metric!(histogram, "enrichment", "limiter_wait_seconds"),
                metric_type: MetricType::Histogram,
                help: "Time spent waiting for a rate limiter token",
            },
        ]
    }
}
