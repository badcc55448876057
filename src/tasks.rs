//! Long-running background loops: the expiry sweeper and the enrichment
//! backlog worker. Both stop promptly when the cancel signal fires.

use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn};

use crate::enrichment::EnrichmentClient;
use crate::shutdown::CancelSignal;
use crate::storage::{EventStore, SweepReport};

/// Run `expire_and_purge` every `interval` until cancelled.
/// Returns the totals over every completed sweep.
pub async fn run_expiry_sweeper(store: EventStore, interval: Duration, mut cancel: CancelSignal) -> SweepReport {
    let mut totals = SweepReport::default();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!("Expiry sweeper started (every {:?})", interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {},
            _ = cancel.cancelled() => break,
        }

        let sweep = tokio::select! {
            result = store.expire_and_purge(Utc::now()) => result,
            _ = cancel.cancelled() => break,
        };
        match sweep {
            Ok(report) => {
                totals.expired += report.expired;
                totals.purged += report.purged;
                totals.skipped_locked += report.skipped_locked;
            }
            Err(e) => warn!("Expiry sweep failed: {}", e),
        }
    }

    info!(
        "Expiry sweeper stopped: {} expired, {} purged in total",
        totals.expired, totals.purged
    );
    totals
}

/// Work through the pending-enrichment backlog in batches of `batch`,
/// checking again every `interval`. An interrupted batch leaves its events
/// pending for the next run.
pub async fn run_enrichment_worker(
    client: EnrichmentClient,
    batch: usize,
    interval: Duration,
    mut cancel: CancelSignal,
) {
    info!("Enrichment worker started");
    loop {
        let pass = tokio::select! {
            result = client.enrich_pending(batch) => result,
            _ = cancel.cancelled() => break,
        };

        // A full batch means there is probably more waiting.
        let busy = match pass {
            Ok(report) => {
                report.enriched + report.failed + report.skipped >= batch && batch > 0
            }
            Err(e) => {
                warn!("Enrichment pass failed: {}", e);
                false
            }
        };
        if busy {
            continue;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {},
            _ = cancel.cancelled() => break,
        }
    }
    info!("Enrichment worker stopped");
}
