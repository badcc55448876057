// Event processing pipeline: normalize, resolve dates, resolve identity, store, enrich

pub mod dates;
pub mod identity;
pub mod normalize;

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{DateConfidence, EnrichmentStatus};
use crate::enrichment::{EnrichmentClient, EnrichmentReport};
use crate::error::Result;
use crate::metrics::IngestMetrics;
use crate::storage::{ChangeType, EventStore, UpsertOutcome};
use crate::types::{EventCollector, RawRecord};
use normalize::Normalizer;

/// What happened to one raw record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordOutcome {
    Stored {
        identity: String,
        change: ChangeType,
        date_confidence: DateConfidence,
    },
    /// Dropped by the normalizer
    Invalid { reason: String },
    /// The store refused the upsert; nothing was written
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordReport {
    /// Position in the submitted batch
    pub index: usize,
    pub source_url: String,
    pub outcome: RecordOutcome,
}

/// Result of one ingest run
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub run_id: String,
    pub total_records: usize,
    pub created: usize,
    pub merged: usize,
    pub fuzzy_merged: usize,
    pub unchanged: usize,
    pub invalid: usize,
    pub store_failures: usize,
    pub unresolved_dates: usize,
    pub records: Vec<RecordReport>,
    /// Present when the run enriched what it stored
    pub enrichment: Option<EnrichmentReport>,
}

impl IngestReport {
    pub fn stored(&self) -> usize {
        self.created + self.merged + self.fuzzy_merged + self.unchanged
    }

    pub fn rejected(&self) -> usize {
        self.invalid + self.store_failures
    }

    fn tally(&mut self, report: RecordReport) {
        match &report.outcome {
            RecordOutcome::Stored {
                change,
                date_confidence,
                ..
            } => {
                match change {
                    ChangeType::Created => self.created += 1,
                    ChangeType::Merged => self.merged += 1,
                    ChangeType::FuzzyMerged => self.fuzzy_merged += 1,
                    ChangeType::Unchanged => self.unchanged += 1,
                }
                if *date_confidence == DateConfidence::Unresolved {
                    self.unresolved_dates += 1;
                }
            }
            RecordOutcome::Invalid { .. } => self.invalid += 1,
            RecordOutcome::Failed { .. } => self.store_failures += 1,
        }
        self.records.push(report);
    }

    /// Identities whose stored event changed during the run
    pub fn touched_identities(&self) -> BTreeSet<String> {
        self.records
            .iter()
            .filter_map(|r| match &r.outcome {
                RecordOutcome::Stored { identity, change, .. } if *change != ChangeType::Unchanged => {
                    Some(identity.clone())
                }
                _ => None,
            })
            .collect()
    }
}

/// Drives raw records into the event store and hands new work to enrichment.
pub struct Pipeline {
    normalizer: Normalizer,
    store: EventStore,
    enricher: Option<EnrichmentClient>,
}

impl Pipeline {
    pub fn new(normalizer: Normalizer, store: EventStore) -> Self {
        Self {
            normalizer,
            store,
            enricher: None,
        }
    }

    pub fn from_config(config: &Config, store: EventStore) -> Result<Self> {
        Ok(Self::new(Normalizer::from_config(&config.normalizer)?, store))
    }

    /// Enrich touched events at the end of each run.
    pub fn with_enricher(mut self, enricher: EnrichmentClient) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    /// Ingest a batch. A bad record never stops the others; the report says
    /// what happened to each.
    pub async fn ingest(&self, records: Vec<RawRecord>) -> IngestReport {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("ingest", run_id = %run_id, records = records.len());
        self.ingest_inner(run_id, records).instrument(span).await
    }

    async fn ingest_inner(&self, run_id: String, records: Vec<RawRecord>) -> IngestReport {
        let started = std::time::Instant::now();
        info!("Starting ingest of {} records", records.len());

        let mut report = IngestReport {
            run_id,
            total_records: records.len(),
            ..IngestReport::default()
        };

        for (index, raw) in records.iter().enumerate() {
            let outcome = self.process_record(raw).await;
            match &outcome {
                RecordOutcome::Invalid { reason } => {
                    IngestMetrics::record_invalid();
                    warn!("Record {} rejected: {}", index, reason);
                }
                RecordOutcome::Failed { reason } => {
                    IngestMetrics::record_store_failure();
                    warn!("Record {} not stored: {}", index, reason);
                }
                RecordOutcome::Stored {
                    change,
                    date_confidence,
                    ..
                } => {
                    IngestMetrics::record_upsert(change.as_str());
                    if *date_confidence == DateConfidence::Unresolved {
                        IngestMetrics::record_unresolved_date();
                    }
                }
            }
            report.tally(RecordReport {
                index,
                source_url: raw.source_url.clone(),
                outcome,
            });
        }

        if let Some(enricher) = &self.enricher {
            report.enrichment = Some(self.enrich_touched(enricher, &report).await);
        }

        let elapsed = started.elapsed().as_secs_f64();
        IngestMetrics::record_run(report.stored(), report.rejected(), elapsed);
        info!(
            "Ingest finished in {:.2}s: {} created, {} merged, {} fuzzy-merged, {} unchanged, {} invalid, {} store failures",
            elapsed,
            report.created,
            report.merged,
            report.fuzzy_merged,
            report.unchanged,
            report.invalid,
            report.store_failures
        );
        report
    }

    async fn process_record(&self, raw: &RawRecord) -> RecordOutcome {
        let record = match self.normalizer.normalize(raw) {
            Ok(record) => record,
            Err(e) => {
                return RecordOutcome::Invalid {
                    reason: e.to_string(),
                }
            }
        };

        let date = dates::resolve(&record.raw_date_text, record.locale, record.collected_at);
        if !date.is_resolved() {
            debug!("Unresolved date '{}' for '{}'", record.raw_date_text, record.title);
        }
        let confidence = date.confidence;
        let candidate = identity::candidate_event(&record, date, Utc::now());

        match self.store.upsert(candidate, Utc::now()).await {
            Ok(UpsertOutcome { identity, change }) => RecordOutcome::Stored {
                identity,
                change,
                date_confidence: confidence,
            },
            Err(e) => RecordOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }

    async fn enrich_touched(&self, enricher: &EnrichmentClient, report: &IngestReport) -> EnrichmentReport {
        let mut pending = Vec::new();
        for identity in report.touched_identities() {
            match self.store.get(&identity).await {
                Ok(Some(event)) if event.enrichment_status == EnrichmentStatus::Pending => pending.push(event),
                Ok(_) => {}
                Err(e) => warn!("Could not load {} for enrichment: {}", identity, e),
            }
        }

        match enricher.enrich_all(pending).await {
            Ok(enrichment) => enrichment,
            Err(e) => {
                warn!("Enrichment pass failed: {}", e);
                EnrichmentReport::default()
            }
        }
    }

    /// Collect from one source and ingest what it returned.
    pub async fn run_collector(&self, collector: &dyn EventCollector) -> Result<IngestReport> {
        info!("Collecting from {}", collector.name());
        let records = collector.collect().await?;
        Ok(self.ingest(records).await)
    }
}
