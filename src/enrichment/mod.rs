//! Enrichment of pending events through the external text service.
//!
//! Each pending event runs one task: cache lookup, then a single-flight,
//! rate-limited, retried service call. Failures end up on the event as
//! `failed` and never abort ingestion.

pub mod rate_limiter;
pub mod retry;
pub mod service;

pub use rate_limiter::RateLimiter;
pub use retry::RetryPolicy;
pub use service::{EnrichMode, EnrichmentRequest, EnrichmentResponse, OpenAiTextService, TextService};

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::config::EnrichmentConfig;
use crate::domain::{CanonicalEvent, EnrichmentOutcome, EnrichmentStatus, EventType};
use crate::error::{PipelineError, Result};
use crate::metrics::EnrichmentMetrics;
use crate::storage::{CachedEnrichment, EventStore};

/// Failure reason recorded when no limiter token arrived in time.
pub const RATE_LIMITED: &str = "rate-limited";

/// SHA-256 over (title, original description); keys the enrichment cache.
pub fn content_hash(title: &str, description: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update([0u8]);
    hasher.update(description.as_bytes());
    hex::encode(hasher.finalize())
}

/// Where one enrichment task stands.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
    Pending,
    /// Waiting to make attempt `n` (2-based: the first retry is `Retrying(2)`)
    Retrying(u32),
    Done {
        description: String,
        event_type: EventType,
    },
    Failed(String),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done { .. } | TaskState::Failed(_))
    }

    fn attempt(&self) -> u32 {
        match self {
            TaskState::Retrying(n) => *n,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrichmentFailure {
    pub identity: String,
    pub title: String,
    pub reason: String,
}

/// Tally of one enrichment pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentReport {
    pub enriched: usize,
    /// Enriched without a service call
    pub cache_hits: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Tasks whose outcome could not be recorded (store errors, missing events)
    pub not_applied: usize,
    pub failures: Vec<EnrichmentFailure>,
}

impl EnrichmentReport {
    fn absorb(&mut self, other: EnrichmentReport) {
        self.enriched += other.enriched;
        self.cache_hits += other.cache_hits;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.not_applied += other.not_applied;
        self.failures.extend(other.failures);
    }
}

struct TaskResult {
    outcome: EnrichmentOutcome,
    from_cache: bool,
}

/// Drives pending events to `done`, `failed` or `skipped`.
///
/// Cloning is cheap: clones share the store, the service and one limiter.
#[derive(Clone)]
pub struct EnrichmentClient {
    store: EventStore,
    service: Option<Arc<dyn TextService>>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    target_language: String,
}

impl EnrichmentClient {
    /// `service = None` means enrichment is not configured; events are skipped.
    pub fn new(
        store: EventStore,
        service: Option<Arc<dyn TextService>>,
        limiter: RateLimiter,
        target_language: impl Into<String>,
    ) -> Self {
        Self {
            store,
            service,
            limiter,
            retry: RetryPolicy::default(),
            target_language: target_language.into(),
        }
    }

    pub fn from_config(store: EventStore, config: &EnrichmentConfig) -> Result<Self> {
        let service: Option<Arc<dyn TextService>> = if config.is_active() {
            Some(Arc::new(OpenAiTextService::new(config)?))
        } else {
            info!("Enrichment service not configured; new events will be marked skipped");
            None
        };
        Ok(Self::new(
            store,
            service,
            RateLimiter::from_config(config),
            config.target_language.clone(),
        ))
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn is_active(&self) -> bool {
        self.service.is_some()
    }

    /// Enrich one event and record the outcome on it.
    ///
    /// Returns `None` when the event is no longer pending. Dropping the
    /// future before it completes leaves the event pending.
    #[instrument(skip(self, event), fields(identity = %event.identity))]
    pub async fn enrich_event(&self, event: &CanonicalEvent) -> Result<Option<EnrichmentOutcome>> {
        if event.enrichment_status != EnrichmentStatus::Pending {
            return Ok(None);
        }

        let hash = content_hash(&event.title, &event.description);
        let TaskResult { outcome, from_cache } = self.run_task(event, &hash).await?;
        if from_cache {
            EnrichmentMetrics::record_cache_hit();
        }
        EnrichmentMetrics::record_outcome(outcome.status().as_str());

        if !self
            .store
            .apply_enrichment_for(&event.identity, &hash, outcome.clone(), Utc::now())
            .await?
        {
            return Ok(None);
        }
        Ok(Some(outcome))
    }

    /// Enrich up to `limit` pending events, oldest first, concurrently.
    /// The limiter bounds how many are in flight and how fast they reach
    /// the service.
    #[instrument(skip(self))]
    pub async fn enrich_pending(&self, limit: usize) -> Result<EnrichmentReport> {
        let pending = self.store.pending_enrichment(limit).await?;
        self.enrich_all(pending).await
    }

    /// Enrich the given events concurrently and tally the outcomes.
    pub async fn enrich_all(&self, events: Vec<CanonicalEvent>) -> Result<EnrichmentReport> {
        let mut report = EnrichmentReport::default();
        if events.is_empty() {
            return Ok(report);
        }
        debug!("Enriching {} events", events.len());

        let mut tasks = JoinSet::new();
        for event in events {
            let client = self.clone();
            tasks.spawn(async move {
                let mut single = EnrichmentReport::default();
                match client.enrich_event(&event).await {
                    Ok(Some(outcome)) => single.count(&event, &outcome),
                    Ok(None) => single.not_applied += 1,
                    Err(e) => {
                        warn!("Enrichment of '{}' not recorded: {}", event.title, e);
                        single.not_applied += 1;
                    }
                }
                single
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(single) => report.absorb(single),
                Err(e) => {
                    warn!("Enrichment task aborted: {}", e);
                    report.not_applied += 1;
                }
            }
        }

        info!(
            "Enrichment pass: {} enriched ({} cached), {} failed, {} skipped",
            report.enriched, report.cache_hits, report.failed, report.skipped
        );
        Ok(report)
    }

    async fn run_task(&self, event: &CanonicalEvent, hash: &str) -> Result<TaskResult> {
        let Some(service) = &self.service else {
            return Ok(TaskResult {
                outcome: EnrichmentOutcome::Skipped,
                from_cache: false,
            });
        };

        if let Some(hit) = self.store.cached_enrichment(hash).await? {
            return Ok(cached(hit));
        }

        let _admitted = self.limiter.admit().await?;

        // Identical content in flight elsewhere: wait for it, then hit the cache.
        let _flight = self.store.locks().lock(&format!("content:{}", hash)).await;
        if let Some(hit) = self.store.cached_enrichment(hash).await? {
            return Ok(cached(hit));
        }

        let request = EnrichmentRequest {
            title: event.title.clone(),
            text: if event.description.is_empty() {
                event.title.clone()
            } else {
                event.description.clone()
            },
            target_language: self.target_language.clone(),
            modes: EnrichMode::ALL.to_vec(),
        };

        let mut state = TaskState::Pending;
        while !state.is_terminal() {
            state = self.step(service.as_ref(), &request, state.attempt()).await;
        }

        let outcome = match state {
            TaskState::Done {
                description,
                event_type,
            } => {
                let entry = CachedEnrichment {
                    description: description.clone(),
                    event_type,
                    created_at: Utc::now(),
                };
                self.store.cache_enrichment(hash, &entry).await?;
                EnrichmentOutcome::Enriched {
                    description,
                    event_type,
                    enriched_at: entry.created_at,
                }
            }
            TaskState::Failed(reason) => {
                warn!("Enrichment of '{}' failed: {}", event.title, reason);
                EnrichmentOutcome::Failed(reason)
            }
            TaskState::Pending | TaskState::Retrying(_) => {
                return Err(PipelineError::EnrichmentTransient("task ended unfinished".to_string()))
            }
        };

        Ok(TaskResult {
            outcome,
            from_cache: false,
        })
    }

    /// One attempt: take a token, call the service, pick the next state.
    async fn step(&self, service: &dyn TextService, request: &EnrichmentRequest, attempt: u32) -> TaskState {
        if self.limiter.acquire().await.is_err() {
            return TaskState::Failed(RATE_LIMITED.to_string());
        }

        let started = Instant::now();
        let result = service.enrich(request).await.and_then(interpret);
        EnrichmentMetrics::record_call(started.elapsed().as_secs_f64());

        match result {
            Ok((description, event_type)) => TaskState::Done {
                description,
                event_type,
            },
            Err(PipelineError::EnrichmentPermanent(reason)) => {
                EnrichmentMetrics::record_call_error("permanent");
                TaskState::Failed(format!("permanent: {}", reason))
            }
            Err(e) if self.retry.allows_retry(attempt) => {
                EnrichmentMetrics::record_call_error("transient");
                EnrichmentMetrics::record_retry();
                let delay = self.retry.delay_for(attempt);
                debug!(
                    "Attempt {}/{} for '{}' failed: {} (retry in {:?})",
                    attempt, self.retry.max_attempts, request.title, e, delay
                );
                tokio::time::sleep(delay).await;
                TaskState::Retrying(attempt + 1)
            }
            Err(e) => {
                EnrichmentMetrics::record_call_error("transient");
                TaskState::Failed(format!("retries exhausted: {}", e))
            }
        }
    }
}

impl EnrichmentReport {
    fn count(&mut self, event: &CanonicalEvent, outcome: &EnrichmentOutcome) {
        match outcome {
            EnrichmentOutcome::Enriched { .. } => self.enriched += 1,
            EnrichmentOutcome::Skipped => self.skipped += 1,
            EnrichmentOutcome::Failed(reason) => {
                self.failed += 1;
                self.failures.push(EnrichmentFailure {
                    identity: event.identity.clone(),
                    title: event.title.clone(),
                    reason: reason.clone(),
                });
            }
        }
    }
}

fn cached(hit: CachedEnrichment) -> TaskResult {
    TaskResult {
        outcome: EnrichmentOutcome::Enriched {
            description: hit.description,
            event_type: hit.event_type,
            enriched_at: Utc::now(),
        },
        from_cache: true,
    }
}

/// A reply without a usable summary is treated like a garbled response.
fn interpret(response: EnrichmentResponse) -> Result<(String, EventType)> {
    let description = response
        .result_text
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PipelineError::EnrichmentTransient("reply without a summary".to_string()))?;
    let event_type = response
        .event_type
        .as_deref()
        .map(EventType::from_label)
        .unwrap_or(EventType::Other);
    Ok((description, event_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DateConfidence, EventSource};
    use crate::storage::ExpiryPolicy;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Plays back scripted replies, then repeats the last one.
    struct Scripted {
        replies: Mutex<Vec<Result<EnrichmentResponse>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(mut replies: Vec<Result<EnrichmentResponse>>) -> Arc<Self> {
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextService for Scripted {
        async fn enrich(&self, _request: &EnrichmentRequest) -> Result<EnrichmentResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.pop().unwrap()
            } else {
                match replies.last().unwrap() {
                    Ok(r) => Ok(r.clone()),
                    Err(e) => Err(PipelineError::EnrichmentTransient(e.to_string())),
                }
            }
        }
    }

    fn ok() -> Result<EnrichmentResponse> {
        Ok(EnrichmentResponse {
            result_text: Some("Fireworks over the Salerno seafront.".to_string()),
            event_type: Some("festa".to_string()),
        })
    }

    fn transient() -> Result<EnrichmentResponse> {
        Err(PipelineError::EnrichmentTransient("status 503".to_string()))
    }

    fn event(title: &str) -> CanonicalEvent {
        let now = Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 7, 5).unwrap().and_hms_opt(21, 0, 0).unwrap();
        CanonicalEvent {
            identity: crate::pipeline::identity::identity_key(title, start.date()),
            title: title.to_string(),
            description: "Fuochi d'artificio sul lungomare.".to_string(),
            enriched_description: None,
            event_type: None,
            start,
            end: None,
            date_confidence: DateConfidence::Exact,
            image_url: None,
            sources: vec![EventSource {
                site_id: "salernotoday".to_string(),
                url: "https://www.salernotoday.it/e/1".to_string(),
            }],
            enrichment_status: EnrichmentStatus::Pending,
            enrichment_error: None,
            enriched_at: None,
            first_collected_at: now,
            created_at: now,
            updated_at: now,
            expired_at: None,
        }
    }

    async fn setup(service: Option<Arc<dyn TextService>>) -> (EventStore, EnrichmentClient, CanonicalEvent) {
        let store = EventStore::in_memory(ExpiryPolicy::default());
        let e = event("Festa del Mare");
        store.upsert(e.clone(), e.created_at).await.unwrap();
        let limiter = RateLimiter::new(600, 10, Duration::from_secs(60));
        let client = EnrichmentClient::new(store.clone(), service, limiter, "English");
        (store, client, e)
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let service = Scripted::new(vec![transient(), transient(), ok()]);
        let (store, client, e) = setup(Some(service.clone())).await;

        let outcome = client.enrich_event(&e).await.unwrap().unwrap();
        assert_eq!(outcome.status(), EnrichmentStatus::Done);
        assert_eq!(service.calls(), 3);

        let stored = store.get(&e.identity).await.unwrap().unwrap();
        assert_eq!(stored.event_type, Some(EventType::Festival));
        assert_eq!(stored.view().description, "Fireworks over the Salerno seafront.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let service = Scripted::new(vec![transient()]);
        let (store, client, e) = setup(Some(service.clone())).await;

        let outcome = client.enrich_event(&e).await.unwrap().unwrap();
        assert!(matches!(outcome, EnrichmentOutcome::Failed(ref r) if r.starts_with("retries exhausted")));
        assert_eq!(service.calls(), retry::MAX_ATTEMPTS as usize);
        assert_eq!(
            store.get(&e.identity).await.unwrap().unwrap().enrichment_status,
            EnrichmentStatus::Failed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let service = Scripted::new(vec![
            Err(PipelineError::EnrichmentPermanent("status 400".to_string())),
            ok(),
        ]);
        let (_store, client, e) = setup(Some(service.clone())).await;

        let outcome = client.enrich_event(&e).await.unwrap().unwrap();
        assert!(matches!(outcome, EnrichmentOutcome::Failed(ref r) if r.starts_with("permanent")));
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_service_skips() {
        let (store, client, e) = setup(None).await;
        let report = client.enrich_pending(10).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(
            store.get(&e.identity).await.unwrap().unwrap().enrichment_status,
            EnrichmentStatus::Skipped
        );
    }

    #[tokio::test]
    async fn test_skipped_events_are_enriched_after_retry() {
        let (store, unconfigured, e) = setup(None).await;
        assert_eq!(unconfigured.enrich_pending(10).await.unwrap().skipped, 1);

        let service = Scripted::new(vec![ok()]);
        let limiter = RateLimiter::new(6000, 10, Duration::from_secs(60));
        let configured = EnrichmentClient::new(store.clone(), Some(service.clone()), limiter, "English");
        assert_eq!(configured.enrich_pending(10).await.unwrap().enriched, 0);

        assert_eq!(store.retry_failed().await.unwrap(), 1);
        let report = configured.enrich_pending(10).await.unwrap();
        assert_eq!(report.enriched, 1);
        assert_eq!(service.calls(), 1);
        assert_eq!(
            store.get(&e.identity).await.unwrap().unwrap().enrichment_status,
            EnrichmentStatus::Done
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_backlog_larger_than_one_timeout_window_is_not_rate_limited() {
        let service = Scripted::new(vec![ok()]);
        let store = EventStore::in_memory(ExpiryPolicy::default());
        for i in 0..60 {
            let e = event(&format!("Concerto numero {}", i));
            store.upsert(e.clone(), e.created_at).await.unwrap();
        }
        // 60/min with a 10 s timeout: only ~10 tokens per timeout window.
        let limiter = RateLimiter::new(60, 1, Duration::from_secs(10));
        let client = EnrichmentClient::new(store.clone(), Some(service.clone()), limiter, "English");

        let report = client.enrich_pending(100).await.unwrap();
        assert_eq!(report.failed, 0, "{:?}", report.failures.first());
        assert_eq!(report.enriched, 60);
        assert!(store.pending_enrichment(100).await.unwrap().is_empty());
    }

    /// Merges a longer listing of the same event while the call is running.
    struct MergesDuringCall {
        store: EventStore,
        update: Mutex<Option<CanonicalEvent>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextService for MergesDuringCall {
        async fn enrich(&self, _request: &EnrichmentRequest) -> Result<EnrichmentResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let update = self.update.lock().unwrap().take();
            if let Some(update) = update {
                self.store.upsert(update, Utc::now()).await?;
            }
            ok()
        }
    }

    #[tokio::test]
    async fn test_text_changed_during_call_stays_pending() {
        let store = EventStore::in_memory(ExpiryPolicy::default());
        let e = event("Festa del Mare");
        store.upsert(e.clone(), e.created_at).await.unwrap();

        let mut longer = e.clone();
        longer.description = format!("{} Musica dal vivo fino a mezzanotte.", e.description);
        longer.sources[0].url = "https://www.ilportico.it/e/7".to_string();

        let service = Arc::new(MergesDuringCall {
            store: store.clone(),
            update: Mutex::new(Some(longer.clone())),
            calls: AtomicUsize::new(0),
        });
        let limiter = RateLimiter::new(6000, 10, Duration::from_secs(60));
        let client = EnrichmentClient::new(store.clone(), Some(service.clone()), limiter, "English");

        assert_eq!(client.enrich_event(&e).await.unwrap(), None);
        let stored = store.get(&e.identity).await.unwrap().unwrap();
        assert_eq!(stored.enrichment_status, EnrichmentStatus::Pending);
        assert_eq!(stored.description, longer.description);

        let outcome = client.enrich_event(&stored).await.unwrap().unwrap();
        assert_eq!(outcome.status(), EnrichmentStatus::Done);
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_when_no_token_arrives() {
        let service = Scripted::new(vec![ok()]);
        let store = EventStore::in_memory(ExpiryPolicy::default());
        let e = event("Festa del Mare");
        store.upsert(e.clone(), e.created_at).await.unwrap();
        let limiter = RateLimiter::new(1, 1, Duration::from_secs(5));
        let client = EnrichmentClient::new(store.clone(), Some(service.clone()), limiter, "English");

        let outcome = client.enrich_event(&e).await.unwrap().unwrap();
        assert_eq!(outcome, EnrichmentOutcome::Failed(RATE_LIMITED.to_string()));
        assert_eq!(service.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_content_costs_one_call() {
        let service = Scripted::new(vec![ok()]);
        let store = EventStore::in_memory(ExpiryPolicy::default());
        let a = event("Festa del Mare");
        let mut b = event("Festa del Mare");
        b.start += chrono::Duration::days(7);
        b.identity = crate::pipeline::identity::identity_key(&b.title, b.start.date());
        store.upsert(a.clone(), a.created_at).await.unwrap();
        store.upsert(b.clone(), b.created_at).await.unwrap();

        let limiter = RateLimiter::new(600, 10, Duration::from_secs(60));
        let client = EnrichmentClient::new(store, Some(service.clone()), limiter, "English");
        let report = client.enrich_pending(10).await.unwrap();

        assert_eq!(report.enriched, 2);
        assert_eq!(report.cache_hits, 1);
        assert_eq!(service.calls(), 1);
    }

    #[test]
    fn test_content_hash_separates_fields() {
        assert_ne!(content_hash("ab", "c"), content_hash("a", "bc"));
        assert_eq!(content_hash("a", "b").len(), 64);
    }
}
