//! Canonical event persistence.
//!
//! [`Storage`] is the backend seam (SQLite in production, in-memory for
//! tests). [`EventStore`] layers the merge protocol on top of it: keyed
//! per-identity locks, the fuzzy same-day pass and the expiry sweep.

pub mod schema;
pub mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::config::ExpiryConfig;
use crate::domain::{
    CanonicalEvent, DateConfidence, EnrichmentOutcome, EnrichmentStatus, EventType, EventView,
};
use crate::enrichment::content_hash;
use crate::error::{PipelineError, Result};
use crate::locks::KeyedLocks;
use crate::metrics::StoreMetrics;
use crate::pipeline::identity::{best_fuzzy_match, merge};

/// Filters for [`EventStore::query`]. The default shows upcoming and
/// recently ended events with a resolved date, in start order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventQuery {
    /// Only events still running at or after this instant
    pub from: Option<NaiveDateTime>,
    /// Only events starting at or before this instant
    pub to: Option<NaiveDateTime>,
    #[serde(default)]
    pub event_types: Vec<EventType>,
    #[serde(default)]
    pub site_ids: Vec<String>,
    #[serde(default)]
    pub include_past: bool,
    #[serde(default)]
    pub include_unresolved: bool,
    #[serde(default)]
    pub offset: usize,
    pub limit: Option<usize>,
}

impl EventQuery {
    /// Predicate applied by backends that filter in memory. Mirrors the SQL
    /// in [`SqliteStorage`].
    pub fn matches(&self, event: &CanonicalEvent, visible_from: NaiveDateTime) -> bool {
        if !self.include_unresolved && event.date_confidence == DateConfidence::Unresolved {
            return false;
        }
        if event.effective_end() < visible_from {
            return false;
        }
        if self.from.is_some_and(|from| event.effective_end() < from) {
            return false;
        }
        if self.to.is_some_and(|to| event.start > to) {
            return false;
        }
        if !self.event_types.is_empty()
            && !event.event_type.is_some_and(|t| self.event_types.contains(&t))
        {
            return false;
        }
        if !self.site_ids.is_empty()
            && !event.sources.iter().any(|s| self.site_ids.contains(&s.site_id))
        {
            return false;
        }
        true
    }
}

/// Grace and retention windows for time-based visibility and purging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    pub grace: Duration,
    pub retention: Duration,
    pub batch_size: usize,
}

impl ExpiryPolicy {
    pub fn from_config(config: &ExpiryConfig) -> Self {
        Self {
            grace: Duration::hours(config.grace_hours),
            retention: Duration::days(config.retention_days),
            batch_size: config.batch_size.max(1),
        }
    }

    /// Events ending before this are hidden from default queries.
    pub fn expiry_cutoff(&self, now: DateTime<Utc>) -> NaiveDateTime {
        now.naive_utc() - self.grace
    }

    /// Events ending before this are purged and hidden everywhere.
    pub fn retention_cutoff(&self, now: DateTime<Utc>) -> NaiveDateTime {
        now.naive_utc() - self.retention
    }
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self::from_config(&ExpiryConfig::default())
    }
}

/// How an upsert landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Merged,
    FuzzyMerged,
    Unchanged,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Merged => "merged",
            ChangeType::FuzzyMerged => "fuzzy_merged",
            ChangeType::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    /// Identity of the stored event the candidate ended up in
    pub identity: String,
    pub change: ChangeType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub expired: usize,
    pub purged: usize,
    pub skipped_locked: usize,
}

/// Cached result of enriching one (title, description) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEnrichment {
    pub description: String,
    pub event_type: EventType,
    pub created_at: DateTime<Utc>,
}

/// Storage backend for canonical events and the enrichment cache.
///
/// Backends are plain row stores: every rule about merging, locking and
/// expiry lives in [`EventStore`].
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_event(&self, identity: &str) -> Result<Option<CanonicalEvent>>;
    async fn events_on_day(&self, day: NaiveDate) -> Result<Vec<CanonicalEvent>>;
    /// Insert or replace; durable once this returns
    async fn put_event(&self, event: &CanonicalEvent) -> Result<()>;
    async fn delete_event(&self, identity: &str) -> Result<bool>;
    /// Matching events ordered by (start, identity), paginated per `query`
    async fn query_events(&self, query: &EventQuery, visible_from: NaiveDateTime) -> Result<Vec<CanonicalEvent>>;
    /// Stamp up to `limit` unstamped events ending before `ended_before`
    async fn stamp_expired(&self, ended_before: NaiveDateTime, at: DateTime<Utc>, limit: usize) -> Result<usize>;
    /// Up to `limit` identities of events ending before `cutoff`
    async fn ended_before(&self, cutoff: NaiveDateTime, limit: usize) -> Result<Vec<String>>;
    async fn pending_events(&self, limit: usize) -> Result<Vec<CanonicalEvent>>;
    /// failed/skipped -> pending for every such event
    async fn reset_for_retry(&self) -> Result<usize>;
    async fn count_events(&self) -> Result<usize>;
    async fn get_cached_enrichment(&self, content_hash: &str) -> Result<Option<CachedEnrichment>>;
    async fn put_cached_enrichment(&self, content_hash: &str, entry: &CachedEnrichment) -> Result<()>;
}

/// In-memory storage for development and tests
#[derive(Default)]
pub struct InMemoryStorage {
    events: Mutex<HashMap<String, CanonicalEvent>>,
    cache: Mutex<HashMap<String, CachedEnrichment>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn events(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, CanonicalEvent>>> {
        self.events
            .lock()
            .map_err(|_| PipelineError::StoreUnavailable("in-memory event map poisoned".to_string()))
    }

    fn cache(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, CachedEnrichment>>> {
        self.cache
            .lock()
            .map_err(|_| PipelineError::StoreUnavailable("in-memory cache poisoned".to_string()))
    }
}

fn sorted(mut events: Vec<CanonicalEvent>) -> Vec<CanonicalEvent> {
    events.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.identity.cmp(&b.identity)));
    events
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get_event(&self, identity: &str) -> Result<Option<CanonicalEvent>> {
        Ok(self.events()?.get(identity).cloned())
    }

    async fn events_on_day(&self, day: NaiveDate) -> Result<Vec<CanonicalEvent>> {
        let events = self.events()?;
        Ok(sorted(
            events.values().filter(|e| e.start_day() == day).cloned().collect(),
        ))
    }

    async fn put_event(&self, event: &CanonicalEvent) -> Result<()> {
        self.events()?.insert(event.identity.clone(), event.clone());
        Ok(())
    }

    async fn delete_event(&self, identity: &str) -> Result<bool> {
        Ok(self.events()?.remove(identity).is_some())
    }

    async fn query_events(&self, query: &EventQuery, visible_from: NaiveDateTime) -> Result<Vec<CanonicalEvent>> {
        let events = self.events()?;
        let matching = sorted(
            events
                .values()
                .filter(|e| query.matches(e, visible_from))
                .cloned()
                .collect(),
        );
        Ok(matching
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn stamp_expired(&self, ended_before: NaiveDateTime, at: DateTime<Utc>, limit: usize) -> Result<usize> {
        let mut events = self.events()?;
        let mut stamped = 0;
        for event in events.values_mut() {
            if stamped == limit {
                break;
            }
            if event.expired_at.is_none() && event.effective_end() < ended_before {
                event.expired_at = Some(at);
                stamped += 1;
            }
        }
        Ok(stamped)
    }

    async fn ended_before(&self, cutoff: NaiveDateTime, limit: usize) -> Result<Vec<String>> {
        let events = self.events()?;
        let mut ids: Vec<String> = events
            .values()
            .filter(|e| e.effective_end() < cutoff)
            .map(|e| e.identity.clone())
            .collect();
        ids.sort();
        ids.truncate(limit);
        Ok(ids)
    }

    async fn pending_events(&self, limit: usize) -> Result<Vec<CanonicalEvent>> {
        let events = self.events()?;
        let mut pending: Vec<CanonicalEvent> = events
            .values()
            .filter(|e| e.enrichment_status == EnrichmentStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.identity.cmp(&b.identity)));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn reset_for_retry(&self) -> Result<usize> {
        let mut events = self.events()?;
        let mut reset = 0;
        for event in events.values_mut() {
            if matches!(
                event.enrichment_status,
                EnrichmentStatus::Failed | EnrichmentStatus::Skipped
            ) {
                event.enrichment_status = EnrichmentStatus::Pending;
                event.enrichment_error = None;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn count_events(&self) -> Result<usize> {
        Ok(self.events()?.len())
    }

    async fn get_cached_enrichment(&self, content_hash: &str) -> Result<Option<CachedEnrichment>> {
        Ok(self.cache()?.get(content_hash).cloned())
    }

    async fn put_cached_enrichment(&self, content_hash: &str, entry: &CachedEnrichment) -> Result<()> {
        self.cache()?.insert(content_hash.to_string(), entry.clone());
        Ok(())
    }
}

/// Shared handle to the event store. Cloning is cheap.
#[derive(Clone)]
pub struct EventStore {
    backend: Arc<dyn Storage>,
    locks: KeyedLocks,
    policy: ExpiryPolicy,
}

impl EventStore {
    pub fn new(backend: Arc<dyn Storage>, policy: ExpiryPolicy) -> Self {
        Self {
            backend,
            locks: KeyedLocks::new(),
            policy,
        }
    }

    /// Open (or create) the SQLite store at `path`.
    pub async fn open(path: impl AsRef<Path>, policy: ExpiryPolicy) -> Result<Self> {
        let backend = SqliteStorage::open(path).await?;
        Ok(Self::new(Arc::new(backend), policy))
    }

    pub fn in_memory(policy: ExpiryPolicy) -> Self {
        Self::new(Arc::new(InMemoryStorage::new()), policy)
    }

    pub fn policy(&self) -> ExpiryPolicy {
        self.policy
    }

    pub(crate) fn locks(&self) -> &KeyedLocks {
        &self.locks
    }

    /// Insert `candidate` or merge it into the event it duplicates.
    ///
    /// Exact identity first, then the fuzzy pass over events on the same
    /// start day. Creating a new identity also holds that day's lock so two
    /// near-duplicates arriving together cannot both be inserted.
    ///
    /// Lock order is candidate identity, then day. While a day lock is held
    /// other identity locks are only tried, never awaited; on contention the
    /// day lock is released and the pass starts over.
    #[instrument(skip(self, candidate), fields(identity = %candidate.identity))]
    pub async fn upsert(&self, candidate: CanonicalEvent, now: DateTime<Utc>) -> Result<UpsertOutcome> {
        let _identity_guard = self.locks.lock(&candidate.identity).await;

        loop {
            if let Some(existing) = self.backend.get_event(&candidate.identity).await? {
                return self.write_merge(&existing, &candidate, now, ChangeType::Merged).await;
            }

            let day_guard = self.locks.lock(&day_lock_key(candidate.start_day())).await;

            let same_day = self.backend.events_on_day(candidate.start_day()).await?;
            let Some((target, score)) = best_fuzzy_match(&candidate, &same_day) else {
                self.backend.put_event(&candidate).await?;
                debug!("Created event '{}'", candidate.title);
                return Ok(UpsertOutcome {
                    identity: candidate.identity,
                    change: ChangeType::Created,
                });
            };

            let Some(_target_guard) = self.locks.try_lock(&target.identity) else {
                debug!("Fuzzy target '{}' is busy, retrying", target.title);
                drop(day_guard);
                tokio::time::sleep(LOCK_RETRY_DELAY).await;
                continue;
            };
            debug!(
                "Fuzzy match '{}' -> '{}' ({:.2})",
                candidate.title, target.title, score
            );
            // Gone if the sweep purged it after the day scan.
            if let Some(existing) = self.backend.get_event(&target.identity).await? {
                return self
                    .write_merge(&existing, &candidate, now, ChangeType::FuzzyMerged)
                    .await;
            }
        }
    }

    async fn write_merge(
        &self,
        existing: &CanonicalEvent,
        candidate: &CanonicalEvent,
        now: DateTime<Utc>,
        change: ChangeType,
    ) -> Result<UpsertOutcome> {
        let mut merged = merge(existing, candidate, now);

        // Re-ingesting what is already stored writes nothing.
        merged.updated_at = existing.updated_at;
        if merged == *existing {
            return Ok(UpsertOutcome {
                identity: existing.identity.clone(),
                change: ChangeType::Unchanged,
            });
        }
        merged.updated_at = now;

        self.backend.put_event(&merged).await?;
        if merged.identity != existing.identity {
            // Re-keyed by a fuzzy merge; the caller holds both identities' locks.
            self.backend.delete_event(&existing.identity).await?;
            debug!("Re-keyed {} -> {}", existing.identity, merged.identity);
        }
        Ok(UpsertOutcome {
            identity: merged.identity,
            change,
        })
    }

    /// Visible events matching `query`, as presentation views.
    pub async fn query(&self, query: &EventQuery, now: DateTime<Utc>) -> Result<Vec<EventView>> {
        let visible_from = if query.include_past {
            self.policy.retention_cutoff(now)
        } else {
            self.policy.expiry_cutoff(now)
        };
        let events = self.backend.query_events(query, visible_from).await?;
        Ok(events.iter().map(CanonicalEvent::view).collect())
    }

    pub async fn get(&self, identity: &str) -> Result<Option<CanonicalEvent>> {
        self.backend.get_event(identity).await
    }

    /// Stamp events past the grace window, then purge those past retention.
    ///
    /// Runs in batches and yields between them. A purge candidate whose
    /// identity lock is held is skipped and picked up by a later sweep.
    #[instrument(skip(self))]
    pub async fn expire_and_purge(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let batch = self.policy.batch_size;

        let expiry_cutoff = self.policy.expiry_cutoff(now);
        loop {
            let stamped = self.backend.stamp_expired(expiry_cutoff, now, batch).await?;
            report.expired += stamped;
            tokio::task::yield_now().await;
            if stamped < batch {
                break;
            }
        }

        let retention_cutoff = self.policy.retention_cutoff(now);
        loop {
            let candidates = self.backend.ended_before(retention_cutoff, batch).await?;
            let mut purged_in_batch = 0;

            for identity in &candidates {
                let Some(_guard) = self.locks.try_lock(identity) else {
                    report.skipped_locked += 1;
                    continue;
                };
                // Re-check under the lock; a merge may have moved the dates.
                let still_past = self
                    .backend
                    .get_event(identity)
                    .await?
                    .is_some_and(|e| e.effective_end() < retention_cutoff);
                if still_past && self.backend.delete_event(identity).await? {
                    purged_in_batch += 1;
                }
            }

            report.purged += purged_in_batch;
            tokio::task::yield_now().await;
            if candidates.len() < batch || purged_in_batch == 0 {
                break;
            }
        }

        StoreMetrics::record_sweep(report.expired, report.purged, report.skipped_locked);
        if report.expired > 0 || report.purged > 0 {
            info!(
                "Sweep: {} expired, {} purged, {} skipped (locked)",
                report.expired, report.purged, report.skipped_locked
            );
        }
        Ok(report)
    }

    /// Record the result of an enrichment task.
    ///
    /// Returns false when the event is gone or already enriched; a finished
    /// enrichment is never overwritten.
    pub async fn apply_enrichment(
        &self,
        identity: &str,
        outcome: EnrichmentOutcome,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.record_enrichment(identity, None, outcome, now).await
    }

    /// [`apply_enrichment`](Self::apply_enrichment) for a result computed
    /// from the text hashing to `source_hash`. If a merge changed the title
    /// or description meanwhile, nothing is recorded and the event stays
    /// pending for the next pass.
    pub async fn apply_enrichment_for(
        &self,
        identity: &str,
        source_hash: &str,
        outcome: EnrichmentOutcome,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.record_enrichment(identity, Some(source_hash), outcome, now).await
    }

    async fn record_enrichment(
        &self,
        identity: &str,
        source_hash: Option<&str>,
        outcome: EnrichmentOutcome,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let _guard = self.locks.lock(identity).await;

        let Some(mut event) = self.backend.get_event(identity).await? else {
            warn!("Enrichment finished for missing event {}", identity);
            return Ok(false);
        };
        if event.enrichment_status == EnrichmentStatus::Done {
            return Ok(false);
        }
        if source_hash.is_some_and(|hash| content_hash(&event.title, &event.description) != hash) {
            debug!("Text of {} changed during enrichment; left pending", identity);
            return Ok(false);
        }

        event.enrichment_status = outcome.status();
        match outcome {
            EnrichmentOutcome::Enriched {
                description,
                event_type,
                enriched_at,
            } => {
                event.enriched_description = Some(description);
                event.event_type = Some(event_type);
                event.enriched_at = Some(enriched_at);
                event.enrichment_error = None;
            }
            EnrichmentOutcome::Failed(reason) => event.enrichment_error = Some(reason),
            EnrichmentOutcome::Skipped => event.enrichment_error = None,
        }
        event.updated_at = now;

        self.backend.put_event(&event).await?;
        Ok(true)
    }

    /// Oldest pending events first.
    pub async fn pending_enrichment(&self, limit: usize) -> Result<Vec<CanonicalEvent>> {
        self.backend.pending_events(limit).await
    }

    /// Move every failed or skipped event back to pending, e.g. after an
    /// API key was configured. The only backward transition.
    pub async fn retry_failed(&self) -> Result<usize> {
        let reset = self.backend.reset_for_retry().await?;
        info!("Reset {} failed or skipped enrichments to pending", reset);
        Ok(reset)
    }

    pub async fn count(&self) -> Result<usize> {
        let count = self.backend.count_events().await?;
        StoreMetrics::record_event_count(count);
        Ok(count)
    }

    pub async fn cached_enrichment(&self, content_hash: &str) -> Result<Option<CachedEnrichment>> {
        self.backend.get_cached_enrichment(content_hash).await
    }

    pub async fn cache_enrichment(&self, content_hash: &str, entry: &CachedEnrichment) -> Result<()> {
        self.backend.put_cached_enrichment(content_hash, entry).await
    }
}

const LOCK_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(5);

fn day_lock_key(day: NaiveDate) -> String {
    format!("day:{}", day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventSource;
    use crate::pipeline::identity::identity_key;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
    }

    fn at(m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn event(title: &str, site: &str, start: NaiveDateTime) -> CanonicalEvent {
        CanonicalEvent {
            identity: identity_key(title, start.date()),
            title: title.to_string(),
            description: String::new(),
            enriched_description: None,
            event_type: None,
            start,
            end: None,
            date_confidence: DateConfidence::Exact,
            image_url: None,
            sources: vec![EventSource {
                site_id: site.to_string(),
                url: format!("https://{}.it/{}", site, title.len()),
            }],
            enrichment_status: EnrichmentStatus::Pending,
            enrichment_error: None,
            enriched_at: None,
            first_collected_at: now(),
            created_at: now(),
            updated_at: now(),
            expired_at: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_merges_same_identity() {
        let store = EventStore::in_memory(ExpiryPolicy::default());
        let a = event("Festa del Mare", "salernotoday", at(7, 5, 21));
        let b = event("festa  del mare ", "ilportico", at(7, 5, 21));

        let first = store.upsert(a.clone(), now()).await.unwrap();
        assert_eq!(first.change, ChangeType::Created);

        let second = store.upsert(b, now()).await.unwrap();
        assert_eq!(second.change, ChangeType::Merged);
        assert_eq!(second.identity, first.identity);

        let stored = store.get(&first.identity).await.unwrap().unwrap();
        assert_eq!(stored.sources.len(), 2);
        assert_eq!(store.count().await.unwrap(), 1);

        let again = store.upsert(a, now()).await.unwrap();
        assert_eq!(again.change, ChangeType::Unchanged);
    }

    #[tokio::test]
    async fn test_upsert_fuzzy_merges_same_day() {
        let store = EventStore::in_memory(ExpiryPolicy::default());
        let a = event("Sagra del pesce azzurro di Cetara edizione 2024", "amalfinews", at(7, 20, 19));
        let b = event("Sagra del pesce azzurro di Cetara edizione", "maiorinews", at(7, 20, 20));

        store.upsert(a, now()).await.unwrap();
        let second = store.upsert(b.clone(), now()).await.unwrap();
        assert_eq!(second.change, ChangeType::FuzzyMerged);
        assert_eq!(store.count().await.unwrap(), 1);

        // Equal collection times: the smaller title wins and keys the event.
        let stored = store.get(&second.identity).await.unwrap().unwrap();
        assert_eq!(stored.title, b.title);
        assert_eq!(stored.identity, b.identity);
        assert_eq!(stored.sources.len(), 2);
    }

    #[tokio::test]
    async fn test_fuzzy_merge_identity_ignores_arrival_order() {
        let a = event("Sagra del pesce azzurro di Cetara edizione 2024", "amalfinews", at(7, 20, 19));
        let b = event("Sagra del pesce azzurro di Cetara edizione", "maiorinews", at(7, 20, 20));

        let forward = EventStore::in_memory(ExpiryPolicy::default());
        forward.upsert(a.clone(), now()).await.unwrap();
        forward.upsert(b.clone(), now()).await.unwrap();

        let backward = EventStore::in_memory(ExpiryPolicy::default());
        backward.upsert(b, now()).await.unwrap();
        backward.upsert(a, now()).await.unwrap();

        let all = EventQuery {
            include_past: true,
            ..EventQuery::default()
        };
        let forward = forward.query(&all, now()).await.unwrap();
        let backward = backward.query(&all, now()).await.unwrap();
        assert_eq!(forward.len(), 1);
        assert_eq!(forward, backward);
    }

    #[tokio::test]
    async fn test_busy_fuzzy_target_does_not_hold_the_day() {
        let store = EventStore::in_memory(ExpiryPolicy::default());
        let target = event("Sagra del pesce azzurro di Cetara edizione", "amalfinews", at(7, 20, 19));
        store.upsert(target.clone(), now()).await.unwrap();

        // Someone else is working on the target identity.
        let target_guard = store.locks().lock(&target.identity).await;

        let fuzzy = event("Sagra del pesce azzurro di Cetara edizione 2024", "maiorinews", at(7, 20, 20));
        let task = {
            let store = store.clone();
            tokio::spawn(async move { store.upsert(fuzzy, now()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // The waiting upsert must leave the day lock free for that other holder.
        let day = day_lock_key(target.start_day());
        let day_guard = tokio::time::timeout(std::time::Duration::from_secs(1), store.locks().lock(&day))
            .await
            .expect("day lock stays available while the target is busy");
        drop(day_guard);
        drop(target_guard);

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.change, ChangeType::FuzzyMerged);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_query_order_and_filters() {
        let store = EventStore::in_memory(ExpiryPolicy::default());
        let mut concert = event("Concerto all'alba", "amalfinews", at(7, 10, 5));
        concert.event_type = Some(EventType::Concert);
        store.upsert(concert, now()).await.unwrap();
        store.upsert(event("Mostra di ceramiche", "ilvescovado", at(7, 3, 10)), now()).await.unwrap();
        store.upsert(event("Regata storica", "amalfinews", at(7, 3, 10)), now()).await.unwrap();

        let all = store.query(&EventQuery::default(), now()).await.unwrap();
        assert_eq!(all.len(), 3);
        for pair in all.windows(2) {
            assert!((pair[0].start, &pair[0].id) < (pair[1].start, &pair[1].id));
        }

        let concerts = EventQuery {
            event_types: vec![EventType::Concert],
            ..EventQuery::default()
        };
        assert_eq!(store.query(&concerts, now()).await.unwrap().len(), 1);

        let amalfi = EventQuery {
            site_ids: vec!["amalfinews".to_string()],
            limit: Some(1),
            offset: 1,
            ..EventQuery::default()
        };
        let page = store.query(&amalfi, now()).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].title, "Concerto all'alba");
    }

    #[tokio::test]
    async fn test_expiry_visibility_and_purge() {
        let store = EventStore::in_memory(ExpiryPolicy::default());
        let past = event("Processione di San Matteo", "salernotoday", at(6, 20, 18));
        let identity = past.identity.clone();
        store.upsert(past, now()).await.unwrap();

        assert!(store.query(&EventQuery::default(), now()).await.unwrap().is_empty());
        let with_past = EventQuery {
            include_past: true,
            ..EventQuery::default()
        };
        assert_eq!(store.query(&with_past, now()).await.unwrap().len(), 1);

        let report = store.expire_and_purge(now()).await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.purged, 0);
        assert!(store.get(&identity).await.unwrap().unwrap().expired_at.is_some());

        let later = now() + Duration::days(40);
        let report = store.expire_and_purge(later).await.unwrap();
        assert_eq!(report.purged, 1);
        assert!(store.get(&identity).await.unwrap().is_none());

        let report = store.expire_and_purge(later).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn test_purge_skips_locked_identity() {
        let store = EventStore::in_memory(ExpiryPolicy::default());
        let past = event("Processione di San Matteo", "salernotoday", at(5, 1, 18));
        let identity = past.identity.clone();
        store.upsert(past, now()).await.unwrap();

        let guard = store.locks().lock(&identity).await;
        let report = store.expire_and_purge(now()).await.unwrap();
        assert_eq!(report.skipped_locked, 1);
        assert!(store.get(&identity).await.unwrap().is_some());
        drop(guard);

        let report = store.expire_and_purge(now()).await.unwrap();
        assert_eq!(report.purged, 1);
    }

    #[tokio::test]
    async fn test_enrichment_status_transitions() {
        let store = EventStore::in_memory(ExpiryPolicy::default());
        let e = event("Festa del Mare", "salernotoday", at(7, 5, 21));
        let identity = e.identity.clone();
        store.upsert(e, now()).await.unwrap();

        assert!(store
            .apply_enrichment(&identity, EnrichmentOutcome::Failed("rate-limited".into()), now())
            .await
            .unwrap());
        assert!(store.pending_enrichment(10).await.unwrap().is_empty());
        assert_eq!(store.retry_failed().await.unwrap(), 1);
        assert_eq!(store.pending_enrichment(10).await.unwrap().len(), 1);

        assert!(store
            .apply_enrichment(&identity, EnrichmentOutcome::Skipped, now())
            .await
            .unwrap());
        assert!(store.pending_enrichment(10).await.unwrap().is_empty());
        assert_eq!(store.retry_failed().await.unwrap(), 1);
        assert_eq!(store.pending_enrichment(10).await.unwrap().len(), 1);

        let enriched = EnrichmentOutcome::Enriched {
            description: "Seaside festival with fireworks".into(),
            event_type: EventType::Festival,
            enriched_at: now(),
        };
        assert!(store.apply_enrichment(&identity, enriched, now()).await.unwrap());
        assert!(!store
            .apply_enrichment(&identity, EnrichmentOutcome::Failed("late".into()), now())
            .await
            .unwrap());

        let stored = store.get(&identity).await.unwrap().unwrap();
        assert_eq!(stored.enrichment_status, EnrichmentStatus::Done);
        assert_eq!(stored.view().description, "Seaside festival with fireworks");
    }
}
