use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::types::{EventCollector, RawRecord};

/// Reads raw records that a crawler dumped to disk.
///
/// Accepts either one JSON array or newline-delimited JSON. In NDJSON a
/// malformed line is logged and skipped; the rest of the file still loads.
pub struct JsonFileCollector {
    path: PathBuf,
    name: String,
}

impl JsonFileCollector {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = format!("file:{}", path.display());
        Self { path, name }
    }
}

#[async_trait]
impl EventCollector for JsonFileCollector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self) -> Result<Vec<RawRecord>> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let records = parse_records(&content)?;
        info!("Loaded {} raw records from {}", records.len(), self.path.display());
        Ok(records)
    }
}

/// Parse a JSON array or NDJSON body into raw records.
pub fn parse_records(content: &str) -> Result<Vec<RawRecord>> {
    let trimmed = content.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }

    let mut records = Vec::new();
    let mut bad_lines = 0;
    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<RawRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                bad_lines += 1;
                warn!("Skipping line {}: {}", number + 1, e);
            }
        }
    }

    if records.is_empty() && bad_lines > 0 {
        return Err(PipelineError::InvalidRecord(format!(
            "no readable records ({} malformed lines)",
            bad_lines
        )));
    }
    Ok(records)
}
