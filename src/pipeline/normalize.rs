use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use tracing::{debug, warn};
use url::Url;

use crate::config::NormalizerConfig;
use crate::constants;
use crate::error::{PipelineError, Result};
use crate::types::{Locale, RawRecord};

/// Descriptions longer than this many characters are cut; collectors sometimes
/// hand over whole article bodies.
pub const MAX_DESCRIPTION_CHARS: usize = 4000;
pub const MAX_TITLE_CHARS: usize = 300;

/// Query parameters that only identify the referrer and never the page.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid", "igshid", "yclid", "_ga", "ref",
];

static BLOCK_BOUNDARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<\s*(?:br|/p|/div|/li|/h[1-6]|/tr|/td)\b[^>]*>").expect("static regex")
});

/// A raw record whose fields have been validated and canonicalized.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub source_site_id: String,
    pub source_url: String,
    pub title: String,
    pub description: String,
    pub raw_date_text: String,
    pub locale: Locale,
    pub image_url: Option<String>,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    max_description_chars: usize,
    default_locale: Locale,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            max_description_chars: MAX_DESCRIPTION_CHARS,
            default_locale: Locale::ITALIAN,
        }
    }
}

impl Normalizer {
    pub fn new(max_description_chars: usize, default_locale: Locale) -> Self {
        Self {
            max_description_chars,
            default_locale,
        }
    }

    pub fn from_config(config: &NormalizerConfig) -> Result<Self> {
        let default_locale = Locale::parse(&config.default_locale).ok_or_else(|| {
            PipelineError::Config(format!(
                "Unsupported default locale '{}'",
                config.default_locale
            ))
        })?;
        Ok(Self::new(config.max_description_chars, default_locale))
    }

    /// Validate and canonicalize one raw record. Never touches storage.
    pub fn normalize(&self, raw: &RawRecord) -> Result<NormalizedRecord> {
        let title = truncate_chars(&clean_text(&raw.title), MAX_TITLE_CHARS);
        if title.is_empty() {
            return Err(PipelineError::InvalidRecord(format!(
                "missing title (source: '{}')",
                raw.source_url.trim()
            )));
        }

        let raw_url = raw.source_url.trim();
        if raw_url.is_empty() {
            return Err(PipelineError::InvalidRecord(format!(
                "missing source URL for '{}'",
                title
            )));
        }
        let source = parse_http_url(raw_url).ok_or_else(|| {
            PipelineError::InvalidRecord(format!("unparseable source URL '{}'", raw_url))
        })?;
        let source_url = canonicalize_parsed(source.clone());

        let mut source_site_id = raw.source_site_id.trim().to_lowercase();
        if source_site_id.is_empty() {
            source_site_id = constants::site_id_from_host(source.host_str().unwrap_or_default());
            debug!("Derived site id '{}' from {}", source_site_id, source_url);
        }

        let locale = self.resolve_locale(&raw.locale, &source_site_id);

        let description = truncate_chars(&clean_text(&raw.description), self.max_description_chars);

        let image_url = raw
            .image_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|image| {
                let resolved = source.join(image).ok().and_then(|u| {
                    matches!(u.scheme(), "http" | "https").then(|| canonicalize_parsed(u))
                });
                if resolved.is_none() {
                    warn!("Dropping unusable image URL '{}' for '{}'", image, title);
                }
                resolved
            });

        Ok(NormalizedRecord {
            source_site_id,
            source_url,
            title,
            description,
            raw_date_text: clean_text(&raw.raw_date_text),
            locale,
            image_url,
            collected_at: raw.collected_at,
        })
    }

    fn resolve_locale(&self, tag: &str, site_id: &str) -> Locale {
        if !tag.trim().is_empty() {
            if let Some(locale) = Locale::parse(tag) {
                return locale;
            }
            warn!("Unknown locale '{}' declared by {}, falling back", tag, site_id);
        }
        constants::default_locale_for_site(site_id)
            .and_then(Locale::parse)
            .unwrap_or(self.default_locale)
    }
}

/// Strip markup remnants and entities, then collapse whitespace.
pub fn clean_text(input: &str) -> String {
    if input.contains('<') || input.contains('&') {
        let spaced = BLOCK_BOUNDARY.replace_all(input, " ");
        let fragment = Html::parse_fragment(&spaced);
        let text: String = fragment.root_element().text().collect();
        collapse_whitespace(&text)
    } else {
        collapse_whitespace(input)
    }
}

pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut to at most `max` characters on a char boundary.
pub fn truncate_chars(input: &str, max: usize) -> String {
    match input.char_indices().nth(max) {
        Some((idx, _)) => input[..idx].trim_end().to_string(),
        None => input.to_string(),
    }
}

/// Canonical form of an absolute http(s) URL, or `None` if it is not one.
pub fn canonicalize_url(raw: &str) -> Option<String> {
    parse_http_url(raw.trim()).map(canonicalize_parsed)
}

fn parse_http_url(raw: &str) -> Option<Url> {
    let url = Url::parse(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    Some(url)
}

fn canonicalize_parsed(mut url: Url) -> String {
    // Scheme and host are lowercased by the parser already.
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept.iter());
    }
    url.to_string()
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}
