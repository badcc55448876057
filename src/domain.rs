use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Qualitative reliability of a resolved date. Ordered: unresolved < approximate < exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateConfidence {
    Unresolved,
    Approximate,
    Exact,
}

impl DateConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            DateConfidence::Unresolved => "unresolved",
            DateConfidence::Approximate => "approximate",
            DateConfidence::Exact => "exact",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unresolved" => Some(DateConfidence::Unresolved),
            "approximate" => Some(DateConfidence::Approximate),
            "exact" => Some(DateConfidence::Exact),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentStatus {
    Pending,
    Done,
    Failed,
    Skipped,
}

impl EnrichmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentStatus::Pending => "pending",
            EnrichmentStatus::Done => "done",
            EnrichmentStatus::Failed => "failed",
            EnrichmentStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EnrichmentStatus::Pending),
            "done" => Some(EnrichmentStatus::Done),
            "failed" => Some(EnrichmentStatus::Failed),
            "skipped" => Some(EnrichmentStatus::Skipped),
            _ => None,
        }
    }

    /// Merge rank; a merge keeps the higher one so status never moves backward.
    pub fn rank(&self) -> u8 {
        match self {
            EnrichmentStatus::Pending => 0,
            EnrichmentStatus::Skipped => 1,
            EnrichmentStatus::Failed => 2,
            EnrichmentStatus::Done => 3,
        }
    }

    /// No pass picks it up again on its own. `retry_failed` moves failed
    /// and skipped events back to pending.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EnrichmentStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Concert,
    Festival,
    Exhibition,
    Theatre,
    Sport,
    Conference,
    Food,
    Religious,
    Tour,
    Other,
}

impl EventType {
    pub const ALL: [EventType; 10] = [
        EventType::Concert,
        EventType::Festival,
        EventType::Exhibition,
        EventType::Theatre,
        EventType::Sport,
        EventType::Conference,
        EventType::Food,
        EventType::Religious,
        EventType::Tour,
        EventType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Concert => "concert",
            EventType::Festival => "festival",
            EventType::Exhibition => "exhibition",
            EventType::Theatre => "theatre",
            EventType::Sport => "sport",
            EventType::Conference => "conference",
            EventType::Food => "food",
            EventType::Religious => "religious",
            EventType::Tour => "tour",
            EventType::Other => "other",
        }
    }

    /// Lenient mapping of a classifier label (English or Italian) to a type.
    /// Labels that name nothing known become `Other`.
    pub fn from_label(label: &str) -> EventType {
        let label = label
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        match label.as_str() {
            "concert" | "concerts" | "concerto" | "music" | "musica" | "live music" => {
                EventType::Concert
            }
            "festival" | "festa" | "fiera" | "carnival" | "carnevale" => EventType::Festival,
            "exhibition" | "exhibit" | "mostra" | "esposizione" | "art" => EventType::Exhibition,
            "theatre" | "theater" | "teatro" | "cinema" | "dance" | "danza" => EventType::Theatre,
            "sport" | "sports" | "gara" | "race" | "regata" => EventType::Sport,
            "conference" | "convegno" | "talk" | "workshop" | "presentation" | "presentazione" => {
                EventType::Conference
            }
            "food" | "sagra" | "degustazione" | "tasting" | "wine" | "food & wine" => {
                EventType::Food
            }
            "religious" | "processione" | "procession" | "religione" => EventType::Religious,
            "tour" | "visita guidata" | "guided tour" | "escursione" | "excursion" => EventType::Tour,
            other => EventType::ALL
                .iter()
                .copied()
                .find(|t| t.as_str() == other)
                .unwrap_or(EventType::Other),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One contributing listing of a canonical event.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventSource {
    pub site_id: String,
    pub url: String,
}

/// Deduplicated, persisted event record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub identity: String,
    pub title: String,
    /// Original-language description
    pub description: String,
    pub enriched_description: Option<String>,
    pub event_type: Option<EventType>,
    pub start: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
    pub date_confidence: DateConfidence,
    pub image_url: Option<String>,
    /// Sorted, no duplicates
    pub sources: Vec<EventSource>,
    pub enrichment_status: EnrichmentStatus,
    pub enrichment_error: Option<String>,
    pub enriched_at: Option<DateTime<Utc>>,
    pub first_collected_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set by the expiry sweep once the event left the active window
    pub expired_at: Option<DateTime<Utc>>,
}

impl CanonicalEvent {
    pub fn source_urls(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.url.clone()).collect()
    }

    pub fn start_day(&self) -> NaiveDate {
        self.start.date()
    }

    /// The instant expiry is measured from: the end if there is one, else the start.
    pub fn effective_end(&self) -> NaiveDateTime {
        self.end.unwrap_or(self.start)
    }

    pub fn view(&self) -> EventView {
        EventView {
            id: self.identity.clone(),
            title: self.title.clone(),
            description: self
                .enriched_description
                .clone()
                .unwrap_or_else(|| self.description.clone()),
            start: self.start,
            end: self.end,
            event_type: self.event_type,
            date_confidence: self.date_confidence,
            image_url: self.image_url.clone(),
            source_urls: self.source_urls(),
        }
    }
}

/// Result of one enrichment task, applied to the stored event.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentOutcome {
    Enriched {
        description: String,
        event_type: EventType,
        enriched_at: DateTime<Utc>,
    },
    Failed(String),
    Skipped,
}

impl EnrichmentOutcome {
    pub fn status(&self) -> EnrichmentStatus {
        match self {
            EnrichmentOutcome::Enriched { .. } => EnrichmentStatus::Done,
            EnrichmentOutcome::Failed(_) => EnrichmentStatus::Failed,
            EnrichmentOutcome::Skipped => EnrichmentStatus::Skipped,
        }
    }
}

/// What the presentation layer gets back from a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventView {
    pub id: String,
    pub title: String,
    /// Enriched when available, original otherwise
    pub description: String,
    pub start: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
    #[serde(rename = "type")]
    pub event_type: Option<EventType>,
    pub date_confidence: DateConfidence,
    pub image_url: Option<String>,
    pub source_urls: Vec<String>,
}
