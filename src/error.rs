use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed collector output; dropped at the boundary and never stored.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Event store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Transient enrichment failure: {0}")]
    EnrichmentTransient(String),

    #[error("Permanent enrichment failure: {0}")]
    EnrichmentPermanent(String),

    /// No limiter token arrived within the acquisition timeout.
    #[error("Rate limited: no token within {0:?}")]
    RateLimited(std::time::Duration),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<tokio_rusqlite::Error> for PipelineError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        PipelineError::StoreUnavailable(err.to_string())
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        PipelineError::StoreUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
