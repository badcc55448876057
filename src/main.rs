use anyhow::{bail, Context};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

use tourist_events::collectors::JsonFileCollector;
use tourist_events::config::Config;
use tourist_events::domain::EventType;
use tourist_events::enrichment::EnrichmentClient;
use tourist_events::pipeline::Pipeline;
use tourist_events::storage::{EventQuery, EventStore, ExpiryPolicy};
use tourist_events::{logging, metrics, shutdown, tasks};

#[derive(Parser)]
#[command(name = "tourist_events")]
#[command(about = "Tourist event processing and storage pipeline")]
#[command(version = "0.1.0")]
struct Cli {
    /// Config file (defaults to $TOURIST_EVENTS_CONFIG, then config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest raw records from a JSON or NDJSON file
    Ingest {
        file: PathBuf,
        /// Store only; leave new events pending
        #[arg(long)]
        no_enrich: bool,
    },
    /// Enrich pending events
    Enrich {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Print matching events as JSON
    Query {
        /// YYYY-MM-DD or YYYY-MM-DDTHH:MM
        #[arg(long)]
        from: Option<String>,
        /// YYYY-MM-DD (whole day) or YYYY-MM-DDTHH:MM
        #[arg(long)]
        to: Option<String>,
        /// Event type, repeatable
        #[arg(long = "type")]
        event_types: Vec<String>,
        /// Source site id, repeatable
        #[arg(long = "site")]
        sites: Vec<String>,
        #[arg(long)]
        include_past: bool,
        #[arg(long)]
        include_unresolved: bool,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Stamp expired events and purge those past retention
    Sweep {
        /// Keep sweeping (and enriching the backlog) until Ctrl-C
        #[arg(long)]
        daemon: bool,
    },
    /// Move failed and skipped enrichments back to pending
    RetryFailed,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => {
            dotenv::dotenv().ok();
            let mut config = Config::load_from(path)?;
            config.enrichment.api_key = std::env::var(tourist_events::config::API_KEY_ENV).ok();
            config
        }
        None => Config::load()?,
    };
    Ok(config)
}

fn parse_bound(value: &str, end_of_day: bool) -> anyhow::Result<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M") {
        return Ok(dt);
    }
    let day = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}'", value))?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    };
    match time {
        Some(time) => Ok(day.and_time(time)),
        None => bail!("invalid time of day"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = logging::init_logging();
    metrics::init_metrics();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let store = EventStore::open(&config.storage.path, ExpiryPolicy::from_config(&config.expiry))
        .await
        .context("opening event store")?;

    match cli.command {
        Commands::Ingest { file, no_enrich } => {
            let mut pipeline = Pipeline::from_config(&config, store.clone())?;
            if !no_enrich {
                pipeline = pipeline.with_enricher(EnrichmentClient::from_config(store, &config.enrichment)?);
            }
            let report = pipeline.run_collector(&JsonFileCollector::new(&file)).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Enrich { limit } => {
            let client = EnrichmentClient::from_config(store, &config.enrichment)?;
            let report = client.enrich_pending(limit).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Query {
            from,
            to,
            event_types,
            sites,
            include_past,
            include_unresolved,
            offset,
            limit,
        } => {
            let query = EventQuery {
                from: from.as_deref().map(|v| parse_bound(v, false)).transpose()?,
                to: to.as_deref().map(|v| parse_bound(v, true)).transpose()?,
                event_types: event_types.iter().map(|t| EventType::from_label(t)).collect(),
                site_ids: sites,
                include_past,
                include_unresolved,
                offset,
                limit,
            };
            let views = store.query(&query, Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&views)?);
        }
        Commands::Sweep { daemon: false } => {
            let report = store.expire_and_purge(Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Sweep { daemon: true } => {
            let (handle, signal) = shutdown::channel();
            let client = EnrichmentClient::from_config(store.clone(), &config.enrichment)?;

            let sweeper = tokio::spawn(tasks::run_expiry_sweeper(
                store,
                Duration::from_secs(config.expiry.sweep_interval_secs.max(1)),
                signal.clone(),
            ));
            let worker = tokio::spawn(tasks::run_enrichment_worker(
                client,
                config.expiry.batch_size,
                Duration::from_secs(60),
                signal,
            ));

            tokio::signal::ctrl_c().await?;
            info!("Shutdown requested");
            handle.cancel();

            if let Err(e) = worker.await {
                error!("Enrichment worker panicked: {}", e);
            }
            match sweeper.await {
                Ok(totals) => println!("{}", serde_json::to_string_pretty(&totals)?),
                Err(e) => error!("Expiry sweeper panicked: {}", e),
            }
        }
        Commands::RetryFailed => {
            let reset = store.retry_failed().await?;
            println!("Reset {} failed or skipped enrichments to pending", reset);
        }
    }

    Ok(())
}
