pub mod collectors;
pub mod config;
pub mod constants;
pub mod domain;
pub mod enrichment;
pub mod error;
pub mod locks;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod shutdown;
pub mod storage;
pub mod tasks;
pub mod types;

pub use config::Config;
pub use domain::{CanonicalEvent, EventView};
pub use error::{PipelineError, Result};
pub use pipeline::{IngestReport, Pipeline};
pub use storage::{EventQuery, EventStore};
