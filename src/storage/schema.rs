//! SQL schema for the event store.
//!
//! Event times are stored as `YYYY-MM-DDTHH:MM:SS` local wall-clock text so
//! string order is time order. Audit timestamps are RFC 3339 UTC.

/// Idempotent DDL run on every open.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = FULL;

CREATE TABLE IF NOT EXISTS events (
    identity             TEXT PRIMARY KEY,
    title                TEXT NOT NULL,
    description          TEXT NOT NULL DEFAULT '',
    enriched_description TEXT,
    event_type           TEXT,
    start_at             TEXT NOT NULL,
    end_at               TEXT,
    effective_end_at     TEXT NOT NULL,   -- end_at, or start_at when there is no end
    start_day            TEXT NOT NULL,   -- YYYY-MM-DD, for the same-day fuzzy pass
    date_confidence      TEXT NOT NULL,
    image_url            TEXT,
    sources              TEXT NOT NULL DEFAULT '[]',  -- JSON [{site_id, url}]
    enrichment_status    TEXT NOT NULL DEFAULT 'pending',
    enrichment_error     TEXT,
    enriched_at          TEXT,
    first_collected_at   TEXT NOT NULL,
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL,
    expired_at           TEXT
);

CREATE INDEX IF NOT EXISTS events_start_idx         ON events(start_at, identity);
CREATE INDEX IF NOT EXISTS events_start_day_idx     ON events(start_day);
CREATE INDEX IF NOT EXISTS events_effective_end_idx ON events(effective_end_at);
CREATE INDEX IF NOT EXISTS events_status_idx        ON events(enrichment_status, created_at);

-- Keyed by SHA-256 of (title, original description).
CREATE TABLE IF NOT EXISTS enrichment_cache (
    content_hash TEXT PRIMARY KEY,
    description  TEXT NOT NULL,
    event_type   TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

PRAGMA user_version = 1;
";

/// Column list shared by every event SELECT, in `RawEventRow` order.
pub const EVENT_COLUMNS: &str = "identity, title, description, enriched_description, event_type, \
     start_at, end_at, date_confidence, image_url, sources, enrichment_status, enrichment_error, \
     enriched_at, first_collected_at, created_at, updated_at, expired_at";
