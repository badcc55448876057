use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unvalidated event candidate as produced by a collector.
///
/// Collectors map their site-specific markup into this one shape; nothing
/// here is trusted until it has been through the normalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub source_site_id: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "date_text")]
    pub raw_date_text: String,
    /// Locale tag declared by the source site (`it`, `it-IT`, `en-US`, ...).
    #[serde(default)]
    pub locale: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    Italian,
    English,
}

/// How numeric dates such as `05/07` should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateOrder {
    DayFirst,
    MonthFirst,
    /// The locale does not settle it; day-first is tried, ambiguity lowers confidence.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locale {
    pub language: Language,
    pub date_order: DateOrder,
}

impl Locale {
    pub const ITALIAN: Locale = Locale {
        language: Language::Italian,
        date_order: DateOrder::DayFirst,
    };

    /// Parse a BCP-47-ish tag. Only the languages the sources publish in are known.
    pub fn parse(tag: &str) -> Option<Locale> {
        let tag = tag.trim().to_lowercase().replace('_', "-");
        let mut parts = tag.split('-');
        let language = parts.next().unwrap_or_default();
        let region = parts.next();

        match language {
            "it" | "ita" | "italian" => Some(Locale::ITALIAN),
            "en" | "eng" | "english" => {
                let date_order = match region {
                    Some("us") => DateOrder::MonthFirst,
                    Some(_) => DateOrder::DayFirst,
                    None => DateOrder::Unknown,
                };
                Some(Locale {
                    language: Language::English,
                    date_order,
                })
            }
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match (self.language, self.date_order) {
            (Language::Italian, _) => "it",
            (Language::English, DateOrder::MonthFirst) => "en-US",
            (Language::English, DateOrder::DayFirst) => "en-GB",
            (Language::English, DateOrder::Unknown) => "en",
        }
    }
}

/// Anything that produces raw records for the pipeline.
#[async_trait::async_trait]
pub trait EventCollector: Send + Sync {
    /// Identifier used in logs and reports
    fn name(&self) -> &str;

    /// Fetch every candidate the source currently lists
    async fn collect(&self) -> Result<Vec<RawRecord>>;
}
