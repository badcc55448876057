//! Identity resolution and merge rules for canonical events.

use chrono::{DateTime, NaiveDate, Utc};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::BTreeSet;

use super::dates::ResolvedDate;
use super::normalize::NormalizedRecord;
use crate::domain::{CanonicalEvent, EnrichmentStatus, EventSource};

/// Token-set similarity at or above which two same-day titles are one event.
pub const FUZZY_MATCH_THRESHOLD: f64 = 0.85;
/// Titles with fewer tokens than this only ever match exactly.
pub const MIN_FUZZY_TOKENS: usize = 2;

/// Lowercase, keep Unicode alphanumerics, turn everything else into single spaces.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hex SHA-256 over the normalized title and the start day. The site is not
/// part of the key so that listings of one event on different sites collide.
pub fn identity_key(title: &str, day: NaiveDate) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_title(title).as_bytes());
    hasher.update(b"|");
    hasher.update(day.format("%Y-%m-%d").to_string().as_bytes());
    hex::encode(hasher.finalize())
}

pub fn title_tokens(title: &str) -> BTreeSet<String> {
    normalize_title(title)
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity of the two titles' token sets.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = title_tokens(a);
    let b = title_tokens(b);
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// Pick the stored same-day event a candidate should fold into, if any.
///
/// Highest similarity wins; ties go to the lower identity so the choice does
/// not depend on scan order.
pub fn best_fuzzy_match<'a>(
    candidate: &CanonicalEvent,
    same_day: &'a [CanonicalEvent],
) -> Option<(&'a CanonicalEvent, f64)> {
    if title_tokens(&candidate.title).len() < MIN_FUZZY_TOKENS {
        return None;
    }

    same_day
        .iter()
        .filter(|stored| stored.identity != candidate.identity)
        .filter(|stored| stored.start_day() == candidate.start_day())
        .filter(|stored| title_tokens(&stored.title).len() >= MIN_FUZZY_TOKENS)
        .map(|stored| (stored, similarity(&candidate.title, &stored.title)))
        .filter(|(_, score)| *score >= FUZZY_MATCH_THRESHOLD)
        .min_by(|(a, sa), (b, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.identity.cmp(&b.identity))
        })
}

/// Fresh canonical event for a single normalized record.
pub fn candidate_event(record: &NormalizedRecord, date: ResolvedDate, now: DateTime<Utc>) -> CanonicalEvent {
    CanonicalEvent {
        identity: identity_key(&record.title, date.start.date()),
        title: record.title.clone(),
        description: record.description.clone(),
        enriched_description: None,
        event_type: None,
        start: date.start,
        end: date.end,
        date_confidence: date.confidence,
        image_url: record.image_url.clone(),
        sources: vec![EventSource {
            site_id: record.source_site_id.clone(),
            url: record.source_url.clone(),
        }],
        enrichment_status: EnrichmentStatus::Pending,
        enrichment_error: None,
        enriched_at: None,
        first_collected_at: record.collected_at,
        created_at: now,
        updated_at: now,
        expired_at: None,
    }
}

/// Value from the side that was collected first; equal times fall back to the smaller value.
fn by_precedence<T: Ord + Clone>(a: &CanonicalEvent, av: &T, b: &CanonicalEvent, bv: &T) -> T {
    match a.first_collected_at.cmp(&b.first_collected_at) {
        Ordering::Less => av.clone(),
        Ordering::Greater => bv.clone(),
        Ordering::Equal => av.min(bv).clone(),
    }
}

fn longer_description(a: &str, b: &str) -> String {
    match a.chars().count().cmp(&b.chars().count()) {
        Ordering::Greater => a.to_string(),
        Ordering::Less => b.to_string(),
        Ordering::Equal => a.max(b).to_string(),
    }
}

/// Merge `incoming` into `existing`. Apart from `updated_at` the result does
/// not depend on argument order; its identity is re-derived from the merged
/// title and start day, so a fuzzy merge may land on either side's key.
pub fn merge(existing: &CanonicalEvent, incoming: &CanonicalEvent, now: DateTime<Utc>) -> CanonicalEvent {
    let a = existing;
    let b = incoming;

    let title = by_precedence(a, &a.title, b, &b.title);
    let image_url = match (&a.image_url, &b.image_url) {
        (Some(ai), Some(bi)) => Some(by_precedence(a, ai, b, bi)),
        (Some(only), None) | (None, Some(only)) => Some(only.clone()),
        (None, None) => None,
    };

    let (start, end, date_confidence) = match a.date_confidence.cmp(&b.date_confidence) {
        Ordering::Greater => (a.start, a.end, a.date_confidence),
        Ordering::Less => (b.start, b.end, b.date_confidence),
        Ordering::Equal => {
            let (start, end) = by_precedence(a, &(a.start, a.end), b, &(b.start, b.end));
            (start, end, a.date_confidence)
        }
    };

    let mut sources: Vec<EventSource> = a.sources.iter().chain(&b.sources).cloned().collect();
    sources.sort();
    sources.dedup();

    let enrichment = merge_enrichment(a, b);

    // An expiry stamp survives only while the dates it was taken for do.
    let effective_end = end.unwrap_or(start);
    let expired_at = [a, b]
        .iter()
        .filter(|e| e.effective_end() == effective_end)
        .filter_map(|e| e.expired_at)
        .min();

    CanonicalEvent {
        identity: identity_key(&title, start.date()),
        title,
        description: longer_description(&a.description, &b.description),
        enriched_description: enrichment.description,
        event_type: enrichment.event_type,
        start,
        end,
        date_confidence,
        image_url,
        sources,
        enrichment_status: enrichment.status,
        enrichment_error: enrichment.error,
        enriched_at: enrichment.enriched_at,
        first_collected_at: a.first_collected_at.min(b.first_collected_at),
        created_at: a.created_at.min(b.created_at),
        updated_at: now,
        expired_at,
    }
}

struct MergedEnrichment {
    status: EnrichmentStatus,
    description: Option<String>,
    event_type: Option<crate::domain::EventType>,
    error: Option<String>,
    enriched_at: Option<DateTime<Utc>>,
}

impl MergedEnrichment {
    fn from_event(event: &CanonicalEvent) -> Self {
        Self {
            status: event.enrichment_status,
            description: event.enriched_description.clone(),
            event_type: event.event_type,
            error: event.enrichment_error.clone(),
            enriched_at: event.enriched_at,
        }
    }
}

fn merge_enrichment(a: &CanonicalEvent, b: &CanonicalEvent) -> MergedEnrichment {
    use EnrichmentStatus::Done;

    match (a.enrichment_status, b.enrichment_status) {
        (Done, Done) => {
            let key_a = (a.enriched_at, a.enriched_description.as_deref());
            let key_b = (b.enriched_at, b.enriched_description.as_deref());
            // First enrichment wins; it is what readers may already have seen.
            if key_a <= key_b {
                MergedEnrichment::from_event(a)
            } else {
                MergedEnrichment::from_event(b)
            }
        }
        (Done, _) => MergedEnrichment::from_event(a),
        (_, Done) => MergedEnrichment::from_event(b),
        (sa, sb) => {
            let status = if sa.rank() >= sb.rank() { sa } else { sb };
            let error = match (sa == status, sb == status) {
                (true, true) => match (&a.enrichment_error, &b.enrichment_error) {
                    (Some(x), Some(y)) => Some(x.min(y).clone()),
                    (x, y) => x.clone().or_else(|| y.clone()),
                },
                (true, false) => a.enrichment_error.clone(),
                _ => b.enrichment_error.clone(),
            };
            MergedEnrichment {
                status,
                description: None,
                event_type: None,
                error,
                enriched_at: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DateConfidence, EventType};
    use chrono::{Duration, NaiveDateTime, TimeZone};

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 20, h, 0, 0).unwrap()
    }

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, 5).unwrap().and_hms_opt(21, 0, 0).unwrap()
    }

    fn event(title: &str, site: &str, collected: DateTime<Utc>) -> CanonicalEvent {
        CanonicalEvent {
            identity: identity_key(title, start().date()),
            title: title.to_string(),
            description: String::new(),
            enriched_description: None,
            event_type: None,
            start: start(),
            end: None,
            date_confidence: DateConfidence::Exact,
            image_url: None,
            sources: vec![EventSource {
                site_id: site.to_string(),
                url: format!("https://{}.it/evento", site),
            }],
            enrichment_status: EnrichmentStatus::Pending,
            enrichment_error: None,
            enriched_at: None,
            first_collected_at: collected,
            created_at: collected,
            updated_at: collected,
            expired_at: None,
        }
    }

    fn without_updated_at(mut e: CanonicalEvent) -> CanonicalEvent {
        e.updated_at = ts(0);
        e
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  Festa  del   Mare! "), "festa del mare");
        assert_eq!(normalize_title("Caffè-Concerto: \"È\" Jazz"), "caffè concerto è jazz");
    }

    #[test]
    fn test_identity_ignores_site_and_formatting() {
        let day = start().date();
        assert_eq!(identity_key("Festa del Mare", day), identity_key("festa  del mare ", day));
        assert_ne!(
            identity_key("Festa del Mare", day),
            identity_key("Festa del Mare", day + Duration::days(1))
        );
        assert_eq!(identity_key("x", day).len(), 64);
    }

    #[test]
    fn test_fuzzy_match_threshold_and_ties() {
        let candidate = event("Sagra del pesce azzurro di Cetara edizione 2024", "a", ts(1));
        let close = event("Sagra del pesce azzurro di Cetara edizione", "b", ts(1));
        let far = event("Concerto all'alba", "c", ts(1));
        let stored = vec![far.clone(), close.clone()];

        let (matched, score) = best_fuzzy_match(&candidate, &stored).unwrap();
        assert_eq!(matched.identity, close.identity);
        assert!(score >= FUZZY_MATCH_THRESHOLD);

        let single = event("Mostra", "a", ts(1));
        let stored_single = vec![event("mostra!", "b", ts(2))];
        assert!(best_fuzzy_match(&single, &stored_single).is_none());
    }

    #[test]
    fn test_fuzzy_match_rejects_scores_below_threshold() {
        // 6 shared tokens out of 8: 0.75
        let candidate = event("Sagra del pesce azzurro di Cetara edizione 2024", "a", ts(1));
        let near = event("Sagra del pesce azzurro di Cetara", "b", ts(1));
        let score = similarity(&candidate.title, &near.title);
        assert!(score < FUZZY_MATCH_THRESHOLD, "{}", score);
        assert!(best_fuzzy_match(&candidate, &[near]).is_none());
    }

    #[test]
    fn test_fuzzy_match_tie_goes_to_lower_identity() {
        // Both stored titles share 7 of 8 tokens with the candidate.
        let candidate = event("Sagra del pesce azzurro di Cetara edizione estiva", "a", ts(1));
        let first = event("Sagra del pesce azzurro di Cetara edizione", "b", ts(1));
        let second = event("Sagra del pesce azzurro di Cetara estiva", "c", ts(1));
        assert_eq!(
            similarity(&candidate.title, &first.title),
            similarity(&candidate.title, &second.title)
        );

        let lower = first.identity.clone().min(second.identity.clone());
        let forward = vec![first.clone(), second.clone()];
        let backward = vec![second, first];
        assert_eq!(best_fuzzy_match(&candidate, &forward).unwrap().0.identity, lower);
        assert_eq!(best_fuzzy_match(&candidate, &backward).unwrap().0.identity, lower);
    }

    #[test]
    fn test_fuzzy_merge_identity_follows_merged_title() {
        let long = event("Sagra del pesce azzurro di Cetara edizione 2024", "a", ts(1));
        let short = event("Sagra del pesce azzurro di Cetara edizione", "b", ts(1));

        let ab = merge(&long, &short, ts(2));
        let ba = merge(&short, &long, ts(2));
        assert_eq!(ab.identity, ba.identity);
        assert_eq!(ab.identity, identity_key(&ab.title, ab.start.date()));
    }

    #[test]
    fn test_merge_is_commutative() {
        let mut a = event("Festa del Mare", "salernotoday", ts(8));
        a.description = "Fuochi d'artificio sul lungomare".to_string();
        a.image_url = Some("https://salernotoday.it/a.jpg".to_string());

        let mut b = event("festa  del mare", "ilportico", ts(9));
        b.description = "Fuochi".to_string();
        b.image_url = Some("https://ilportico.it/b.jpg".to_string());
        b.date_confidence = DateConfidence::Approximate;

        let ab = without_updated_at(merge(&a, &b, ts(12)));
        let ba = without_updated_at(merge(&b, &a, ts(12)));

        assert_eq!(ab.title, ba.title);
        assert_eq!(ab.description, ba.description);
        assert_eq!(ab.image_url, ba.image_url);
        assert_eq!(ab.sources, ba.sources);
        assert_eq!(ab.start, ba.start);
        assert_eq!(ab.date_confidence, ba.date_confidence);
        assert_eq!(ab.first_collected_at, ba.first_collected_at);

        assert_eq!(ab.title, "Festa del Mare");
        assert_eq!(ab.image_url.as_deref(), Some("https://salernotoday.it/a.jpg"));
        assert_eq!(ab.sources.len(), 2);
        assert_eq!(ab.date_confidence, DateConfidence::Exact);
    }

    #[test]
    fn test_merge_with_self_is_idempotent() {
        let a = event("Festa del Mare", "salernotoday", ts(8));
        let merged = merge(&a, &a, ts(10));
        assert_eq!(without_updated_at(merged), without_updated_at(a));
    }

    #[test]
    fn test_enrichment_never_regresses() {
        let mut done = event("Festa del Mare", "a", ts(8));
        done.enrichment_status = EnrichmentStatus::Done;
        done.enriched_description = Some("Seaside festival".to_string());
        done.event_type = Some(EventType::Festival);
        done.enriched_at = Some(ts(10));

        let pending = event("Festa del Mare", "b", ts(7));
        let merged = merge(&pending, &done, ts(11));
        assert_eq!(merged.enrichment_status, EnrichmentStatus::Done);
        assert_eq!(merged.enriched_description.as_deref(), Some("Seaside festival"));

        let mut later = done.clone();
        later.enriched_at = Some(ts(11));
        later.event_type = Some(EventType::Food);
        let merged = merge(&later, &done, ts(12));
        assert_eq!(merged.event_type, Some(EventType::Festival));

        let mut failed = event("Festa del Mare", "c", ts(7));
        failed.enrichment_status = EnrichmentStatus::Failed;
        failed.enrichment_error = Some("rate-limited".to_string());
        let merged = merge(&pending, &failed, ts(12));
        assert_eq!(merged.enrichment_status, EnrichmentStatus::Failed);
        assert_eq!(merged.enrichment_error.as_deref(), Some("rate-limited"));
    }
}
