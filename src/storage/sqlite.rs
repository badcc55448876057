//! [`SqliteStorage`]: the durable [`Storage`] backend.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension as _};
use std::path::Path;
use tracing::info;

use super::schema::{EVENT_COLUMNS, SCHEMA};
use super::{CachedEnrichment, EventQuery, Storage};
use crate::domain::{CanonicalEvent, DateConfidence, EnrichmentStatus, EventSource, EventType};
use crate::error::{PipelineError, Result};

const WALL_CLOCK: &str = "%Y-%m-%dT%H:%M:%S";

/// Event store backed by a single SQLite file in WAL mode.
///
/// Cloning is cheap; the connection runs on its own thread and is shared.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: tokio_rusqlite::Connection,
}

impl SqliteStorage {
    /// Open (or create) the database at `path`, creating parent directories.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = tokio_rusqlite::Connection::open(path).await?;
        let storage = Self { conn };
        storage.init_schema().await?;
        info!("Opened event store at {}", path.display());
        Ok(storage)
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        let storage = Self { conn };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn select_events(&self, sql: String, values: Vec<Value>) -> Result<Vec<CanonicalEvent>> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(values.iter()), RawEventRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter().map(RawEventRow::into_event).collect()
    }
}

// Encoding

pub fn encode_wall(dt: NaiveDateTime) -> String {
    dt.format(WALL_CLOCK).to_string()
}

pub fn decode_wall(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, WALL_CLOCK).map_err(|e| corrupt("wall-clock time", s, e))
}

/// Fixed-width RFC 3339 so text order is time order.
pub fn encode_dt(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| corrupt("timestamp", s, e))
}

fn decode_event_type(s: &str) -> Result<EventType> {
    EventType::ALL
        .iter()
        .copied()
        .find(|t| t.as_str() == s)
        .ok_or_else(|| corrupt("event type", s, "unknown value"))
}

fn corrupt(what: &str, value: &str, err: impl std::fmt::Display) -> PipelineError {
    PipelineError::StoreUnavailable(format!("corrupt {} '{}': {}", what, value, err))
}

fn limit_value(limit: usize) -> Value {
    Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX))
}

/// One `events` row as stored, decoded outside the connection thread.
struct RawEventRow {
    identity: String,
    title: String,
    description: String,
    enriched_description: Option<String>,
    event_type: Option<String>,
    start_at: String,
    end_at: Option<String>,
    date_confidence: String,
    image_url: Option<String>,
    sources: String,
    enrichment_status: String,
    enrichment_error: Option<String>,
    enriched_at: Option<String>,
    first_collected_at: String,
    created_at: String,
    updated_at: String,
    expired_at: Option<String>,
}

impl RawEventRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            identity: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            enriched_description: row.get(3)?,
            event_type: row.get(4)?,
            start_at: row.get(5)?,
            end_at: row.get(6)?,
            date_confidence: row.get(7)?,
            image_url: row.get(8)?,
            sources: row.get(9)?,
            enrichment_status: row.get(10)?,
            enrichment_error: row.get(11)?,
            enriched_at: row.get(12)?,
            first_collected_at: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
            expired_at: row.get(16)?,
        })
    }

    fn into_event(self) -> Result<CanonicalEvent> {
        let date_confidence = DateConfidence::parse(&self.date_confidence)
            .ok_or_else(|| corrupt("date confidence", &self.date_confidence, "unknown value"))?;
        let enrichment_status = EnrichmentStatus::parse(&self.enrichment_status)
            .ok_or_else(|| corrupt("enrichment status", &self.enrichment_status, "unknown value"))?;
        let sources: Vec<EventSource> =
            serde_json::from_str(&self.sources).map_err(|e| corrupt("sources", &self.sources, e))?;

        Ok(CanonicalEvent {
            start: decode_wall(&self.start_at)?,
            end: self.end_at.as_deref().map(decode_wall).transpose()?,
            event_type: self.event_type.as_deref().map(decode_event_type).transpose()?,
            enriched_at: self.enriched_at.as_deref().map(decode_dt).transpose()?,
            first_collected_at: decode_dt(&self.first_collected_at)?,
            created_at: decode_dt(&self.created_at)?,
            updated_at: decode_dt(&self.updated_at)?,
            expired_at: self.expired_at.as_deref().map(decode_dt).transpose()?,
            identity: self.identity,
            title: self.title,
            description: self.description,
            enriched_description: self.enriched_description,
            date_confidence,
            image_url: self.image_url,
            sources,
            enrichment_status,
            enrichment_error: self.enrichment_error,
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn get_event(&self, identity: &str) -> Result<Option<CanonicalEvent>> {
        let identity = identity.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        &format!("SELECT {} FROM events WHERE identity = ?1", EVENT_COLUMNS),
                        params![identity],
                        RawEventRow::from_row,
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        row.map(RawEventRow::into_event).transpose()
    }

    async fn events_on_day(&self, day: NaiveDate) -> Result<Vec<CanonicalEvent>> {
        self.select_events(
            format!(
                "SELECT {} FROM events WHERE start_day = ?1 ORDER BY start_at, identity",
                EVENT_COLUMNS
            ),
            vec![Value::Text(day.format("%Y-%m-%d").to_string())],
        )
        .await
    }

    async fn put_event(&self, event: &CanonicalEvent) -> Result<()> {
        let sources = serde_json::to_string(&event.sources)?;
        let identity = event.identity.clone();
        let title = event.title.clone();
        let description = event.description.clone();
        let enriched_description = event.enriched_description.clone();
        let event_type = event.event_type.map(|t| t.as_str().to_string());
        let start_at = encode_wall(event.start);
        let end_at = event.end.map(encode_wall);
        let effective_end_at = encode_wall(event.effective_end());
        let start_day = event.start_day().format("%Y-%m-%d").to_string();
        let date_confidence = event.date_confidence.as_str().to_string();
        let image_url = event.image_url.clone();
        let enrichment_status = event.enrichment_status.as_str().to_string();
        let enrichment_error = event.enrichment_error.clone();
        let enriched_at = event.enriched_at.map(encode_dt);
        let first_collected_at = encode_dt(event.first_collected_at);
        let created_at = encode_dt(event.created_at);
        let updated_at = encode_dt(event.updated_at);
        let expired_at = event.expired_at.map(encode_dt);

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO events (
                        identity, title, description, enriched_description, event_type,
                        start_at, end_at, effective_end_at, start_day, date_confidence,
                        image_url, sources, enrichment_status, enrichment_error, enriched_at,
                        first_collected_at, created_at, updated_at, expired_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
                    params![
                        identity,
                        title,
                        description,
                        enriched_description,
                        event_type,
                        start_at,
                        end_at,
                        effective_end_at,
                        start_day,
                        date_confidence,
                        image_url,
                        sources,
                        enrichment_status,
                        enrichment_error,
                        enriched_at,
                        first_collected_at,
                        created_at,
                        updated_at,
                        expired_at,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn delete_event(&self, identity: &str) -> Result<bool> {
        let identity = identity.to_string();
        let deleted = self
            .conn
            .call(move |conn| Ok(conn.execute("DELETE FROM events WHERE identity = ?1", params![identity])?))
            .await?;
        Ok(deleted > 0)
    }

    async fn query_events(&self, query: &EventQuery, visible_from: NaiveDateTime) -> Result<Vec<CanonicalEvent>> {
        let mut sql = format!("SELECT {} FROM events WHERE effective_end_at >= ?", EVENT_COLUMNS);
        let mut values = vec![Value::Text(encode_wall(visible_from))];

        if !query.include_unresolved {
            sql.push_str(" AND date_confidence != 'unresolved'");
        }
        if let Some(from) = query.from {
            sql.push_str(" AND effective_end_at >= ?");
            values.push(Value::Text(encode_wall(from)));
        }
        if let Some(to) = query.to {
            sql.push_str(" AND start_at <= ?");
            values.push(Value::Text(encode_wall(to)));
        }
        if !query.event_types.is_empty() {
            sql.push_str(&format!(
                " AND event_type IN ({})",
                vec!["?"; query.event_types.len()].join(", ")
            ));
            values.extend(
                query
                    .event_types
                    .iter()
                    .map(|t| Value::Text(t.as_str().to_string())),
            );
        }
        if !query.site_ids.is_empty() {
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM json_each(events.sources) AS s \
                 WHERE json_extract(s.value, '$.site_id') IN ({}))",
                vec!["?"; query.site_ids.len()].join(", ")
            ));
            values.extend(query.site_ids.iter().cloned().map(Value::Text));
        }

        sql.push_str(" ORDER BY start_at, identity LIMIT ? OFFSET ?");
        values.push(match query.limit {
            Some(limit) => limit_value(limit),
            None => Value::Integer(-1),
        });
        values.push(limit_value(query.offset));

        self.select_events(sql, values).await
    }

    async fn stamp_expired(&self, ended_before: NaiveDateTime, at: DateTime<Utc>, limit: usize) -> Result<usize> {
        let cutoff = encode_wall(ended_before);
        let at = encode_dt(at);
        let limit = limit_value(limit);
        let stamped = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE events SET expired_at = ?1 WHERE identity IN (
                        SELECT identity FROM events
                        WHERE expired_at IS NULL AND effective_end_at < ?2
                        ORDER BY effective_end_at, identity LIMIT ?3
                    )",
                    params![at, cutoff, limit],
                )?)
            })
            .await?;
        Ok(stamped)
    }

    async fn ended_before(&self, cutoff: NaiveDateTime, limit: usize) -> Result<Vec<String>> {
        let cutoff = encode_wall(cutoff);
        let limit = limit_value(limit);
        let ids = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT identity FROM events WHERE effective_end_at < ?1
                     ORDER BY effective_end_at, identity LIMIT ?2",
                )?;
                let ids = stmt
                    .query_map(params![cutoff, limit], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    async fn pending_events(&self, limit: usize) -> Result<Vec<CanonicalEvent>> {
        self.select_events(
            format!(
                "SELECT {} FROM events WHERE enrichment_status = 'pending' \
                 ORDER BY created_at, identity LIMIT ?1",
                EVENT_COLUMNS
            ),
            vec![limit_value(limit)],
        )
        .await
    }

    async fn reset_for_retry(&self) -> Result<usize> {
        let reset = self
            .conn
            .call(|conn| {
                Ok(conn.execute(
                    "UPDATE events SET enrichment_status = 'pending', enrichment_error = NULL
                     WHERE enrichment_status IN ('failed', 'skipped')",
                    [],
                )?)
            })
            .await?;
        Ok(reset)
    }

    async fn count_events(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?))
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn get_cached_enrichment(&self, content_hash: &str) -> Result<Option<CachedEnrichment>> {
        let content_hash = content_hash.to_string();
        let row: Option<(String, String, String)> = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT description, event_type, created_at FROM enrichment_cache
                         WHERE content_hash = ?1",
                        params![content_hash],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?)
            })
            .await?;

        row.map(|(description, event_type, created_at)| {
            Ok(CachedEnrichment {
                description,
                event_type: decode_event_type(&event_type)?,
                created_at: decode_dt(&created_at)?,
            })
        })
        .transpose()
    }

    async fn put_cached_enrichment(&self, content_hash: &str, entry: &CachedEnrichment) -> Result<()> {
        let content_hash = content_hash.to_string();
        let description = entry.description.clone();
        let event_type = entry.event_type.as_str().to_string();
        let created_at = encode_dt(entry.created_at);
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO enrichment_cache (content_hash, description, event_type, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![content_hash, description, event_type, created_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::identity::identity_key;
    use chrono::TimeZone;

    fn event(title: &str, start: NaiveDateTime) -> CanonicalEvent {
        let collected = Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap();
        CanonicalEvent {
            identity: identity_key(title, start.date()),
            title: title.to_string(),
            description: "Descrizione".to_string(),
            enriched_description: None,
            event_type: Some(EventType::Festival),
            start,
            end: Some(start + chrono::Duration::hours(3)),
            date_confidence: DateConfidence::Exact,
            image_url: Some("https://example.com/a.jpg".to_string()),
            sources: vec![
                EventSource {
                    site_id: "ilportico".to_string(),
                    url: "https://www.ilportico.it/e/1".to_string(),
                },
                EventSource {
                    site_id: "salernotoday".to_string(),
                    url: "https://www.salernotoday.it/e/1".to_string(),
                },
            ],
            enrichment_status: EnrichmentStatus::Pending,
            enrichment_error: None,
            enriched_at: None,
            first_collected_at: collected,
            created_at: collected,
            updated_at: collected,
            expired_at: None,
        }
    }

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, 5).unwrap().and_hms_opt(21, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_put_get_preserves_event() {
        let storage = SqliteStorage::open_in_memory().await.unwrap();
        let original = event("Festa del Mare", start());
        storage.put_event(&original).await.unwrap();

        let loaded = storage.get_event(&original.identity).await.unwrap().unwrap();
        assert_eq!(loaded, original);
        assert!(storage.get_event("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_site_filter_uses_sources_json() {
        let storage = SqliteStorage::open_in_memory().await.unwrap();
        storage.put_event(&event("Festa del Mare", start())).await.unwrap();

        let visible_from = start() - chrono::Duration::days(1);
        let portico = EventQuery {
            site_ids: vec!["ilportico".to_string()],
            ..EventQuery::default()
        };
        assert_eq!(storage.query_events(&portico, visible_from).await.unwrap().len(), 1);

        let other = EventQuery {
            site_ids: vec!["amalfinews".to_string()],
            ..EventQuery::default()
        };
        assert!(storage.query_events(&other, visible_from).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.db");
        let original = event("Festa del Mare", start());

        {
            let storage = SqliteStorage::open(&path).await.unwrap();
            storage.put_event(&original).await.unwrap();
            storage
                .put_cached_enrichment(
                    "abc",
                    &CachedEnrichment {
                        description: "Seaside festival".to_string(),
                        event_type: EventType::Festival,
                        created_at: original.created_at,
                    },
                )
                .await
                .unwrap();
        }

        let storage = SqliteStorage::open(&path).await.unwrap();
        assert_eq!(storage.count_events().await.unwrap(), 1);
        assert_eq!(storage.get_event(&original.identity).await.unwrap(), Some(original));
        let cached = storage.get_cached_enrichment("abc").await.unwrap().unwrap();
        assert_eq!(cached.event_type, EventType::Festival);
    }

    #[tokio::test]
    async fn test_stamp_and_reset() {
        let storage = SqliteStorage::open_in_memory().await.unwrap();
        let mut failed = event("Mostra di ceramiche", start());
        failed.enrichment_status = EnrichmentStatus::Failed;
        failed.enrichment_error = Some("content_filter".to_string());
        storage.put_event(&failed).await.unwrap();

        let later = start() + chrono::Duration::days(2);
        let at = Utc.with_ymd_and_hms(2024, 7, 8, 0, 0, 0).unwrap();
        assert_eq!(storage.stamp_expired(later, at, 10).await.unwrap(), 1);
        assert_eq!(storage.stamp_expired(later, at, 10).await.unwrap(), 0);
        assert_eq!(storage.ended_before(later, 10).await.unwrap(), vec![failed.identity.clone()]);

        let mut skipped = event("Concerto all'alba", start());
        skipped.enrichment_status = EnrichmentStatus::Skipped;
        storage.put_event(&skipped).await.unwrap();
        assert_eq!(storage.reset_for_retry().await.unwrap(), 2);
        storage.delete_event(&skipped.identity).await.unwrap();
        let pending = storage.pending_events(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].enrichment_error.is_none());
        assert!(storage.delete_event(&failed.identity).await.unwrap());
        assert!(!storage.delete_event(&failed.identity).await.unwrap());
    }
}
