// # parcelsd - Parcel Tracking Lookup
//
// This binary is a THIN integration layer over parcels-core:
// - DO NOT add freshness, fetch or reconciliation logic here
// - All aggregation logic lives in parcels-core
// - Configuration is via environment variables ONLY
//
// parcelsd is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Registering tracking sources and opening the history store
// 4. Running one lookup per tracking number argument and printing JSON
//
// ## Configuration
//
// ### Sources
// - `PARCELS_SOURCES`: Comma-separated tracking sources, in output order (default: cainiao)
// - `PARCELS_CAINIAO_BASE_URL`: Override the Cainiao API endpoint
//
// ### History Store
// - `PARCELS_STORE_TYPE`: Type of history store (memory, file, sqlite; default: sqlite)
// - `PARCELS_STORE_PATH`: Path to the history file or database
//
// ### Freshness
// - `PARCELS_OK_CHECK_INTERVAL_SECS`: Recheck interval after a successful fetch
// - `PARCELS_NOT_FOUND_CHECK_INTERVAL_SECS`: Recheck interval after "not found"
// - `PARCELS_UNKNOWN_ERROR_CHECK_INTERVAL_SECS`: Recheck interval after an error
// - `PARCELS_RATE_LIMITED_CHECK_INTERVAL_SECS`: Recheck interval after rate limiting
// - `PARCELS_EXPIRY_SECS`: Age after which history is ignored
// - `PARCELS_FETCH_TIMEOUT_MS`: Deadline for all fetches of one lookup
//
// ### Logging
// - `PARCELS_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
//
// ## Example
//
// ```bash
// export PARCELS_STORE_TYPE=sqlite
// export PARCELS_STORE_PATH=/var/lib/parcels/history.db
//
// parcelsd RS0814398526Y LP00567890123456
// ```

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use parcels_core::{
    AggregatorConfig, AggregatorEvent, FileHistoryStore, HistoryStore, HistoryStoreConfig,
    MemoryHistoryStore, SourceRegistry, SystemClock, TrackingAggregator, TrackingInfo,
    TrackingStatus,
};
use parcels_source_cainiao::CainiaoSource;
use parcels_store_sqlite::SqliteHistoryStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

/// Database file used when `PARCELS_STORE_TYPE=sqlite` has no path
const DEFAULT_SQLITE_PATH: &str = "parcels.db";

const SUPPORTED_SOURCES: &[&str] = &[parcels_source_cainiao::SOURCE_NAME];

/// Exit codes for different termination scenarios
///
/// - 0: Every lookup succeeded
/// - 1: Configuration or startup error
/// - 2: At least one lookup failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParcelsExitCode {
    /// All lookups answered
    Success = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (a lookup or the store failed)
    RuntimeError = 2,
}

impl From<ParcelsExitCode> for ExitCode {
    fn from(code: ParcelsExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
#[derive(Debug)]
struct Config {
    sources: Vec<String>,
    cainiao_base_url: Option<String>,
    store_type: String,
    store_path: Option<String>,
    ok_check_interval_secs: Option<u64>,
    not_found_check_interval_secs: Option<u64>,
    unknown_error_check_interval_secs: Option<u64>,
    rate_limited_check_interval_secs: Option<u64>,
    expiry_secs: Option<u64>,
    fetch_timeout_ms: Option<u64>,
    log_level: String,
    tracking_numbers: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables and arguments
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok(), env::args().skip(1))
    }

    /// Load configuration from any variable lookup (used by tests)
    fn from_lookup<F, I>(var: F, args: I) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
        I: IntoIterator<Item = String>,
    {
        let number = |key: &str| -> Result<Option<u64>> {
            var(key)
                .map(|value| {
                    value
                        .trim()
                        .parse::<u64>()
                        .with_context(|| format!("{} must be a whole number, got '{}'", key, value))
                })
                .transpose()
        };

        Ok(Self {
            sources: split_list(&var("PARCELS_SOURCES").unwrap_or_else(|| "cainiao".to_string())),
            cainiao_base_url: var("PARCELS_CAINIAO_BASE_URL"),
            store_type: var("PARCELS_STORE_TYPE").unwrap_or_else(|| "sqlite".to_string()),
            store_path: var("PARCELS_STORE_PATH"),
            ok_check_interval_secs: number("PARCELS_OK_CHECK_INTERVAL_SECS")?,
            not_found_check_interval_secs: number("PARCELS_NOT_FOUND_CHECK_INTERVAL_SECS")?,
            unknown_error_check_interval_secs: number("PARCELS_UNKNOWN_ERROR_CHECK_INTERVAL_SECS")?,
            rate_limited_check_interval_secs: number("PARCELS_RATE_LIMITED_CHECK_INTERVAL_SECS")?,
            expiry_secs: number("PARCELS_EXPIRY_SECS")?,
            fetch_timeout_ms: number("PARCELS_FETCH_TIMEOUT_MS")?,
            log_level: var("PARCELS_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            tracking_numbers: args
                .into_iter()
                .map(|arg| arg.trim().to_string())
                .filter(|arg| !arg.is_empty())
                .collect(),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.tracking_numbers.is_empty() {
            anyhow::bail!("Usage: parcelsd <TRACKING_NUMBER>...");
        }

        if self.sources.is_empty() {
            anyhow::bail!(
                "PARCELS_SOURCES must name at least one source. \
                Supported sources: {}",
                SUPPORTED_SOURCES.join(", ")
            );
        }

        for source in &self.sources {
            if !SUPPORTED_SOURCES.contains(&source.as_str()) {
                anyhow::bail!(
                    "Tracking source '{}' is not supported. Supported sources: {}",
                    source,
                    SUPPORTED_SOURCES.join(", ")
                );
            }
        }

        if let Some(ref url) = self.cainiao_base_url
            && !url.starts_with("https://")
            && !url.starts_with("http://")
        {
            anyhow::bail!(
                "PARCELS_CAINIAO_BASE_URL must use HTTP or HTTPS scheme. Got: {}",
                url
            );
        }

        let store = self.history_store_config()?;
        store
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid history store configuration: {}", e))?;

        let store_path = match store {
            HistoryStoreConfig::File { ref path } | HistoryStoreConfig::Sqlite { ref path } => {
                Some(path.as_str())
            }
            HistoryStoreConfig::Memory => None,
        };
        if let Some(path) = store_path
            && let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!(
                "PARCELS_STORE_PATH parent directory does not exist: {}. \
                Create it first: mkdir -p {}",
                parent.display(),
                parent.display()
            );
        }

        self.aggregator_config()
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid aggregator configuration: {}", e))?;

        parse_log_level(&self.log_level)?;

        Ok(())
    }

    fn history_store_config(&self) -> Result<HistoryStoreConfig> {
        match self.store_type.as_str() {
            "memory" => Ok(HistoryStoreConfig::Memory),
            "file" => match self.store_path {
                Some(ref path) => Ok(HistoryStoreConfig::File { path: path.clone() }),
                None => anyhow::bail!(
                    "PARCELS_STORE_PATH is required when PARCELS_STORE_TYPE=file. \
                    Set it via: export PARCELS_STORE_PATH=/var/lib/parcels/history.json"
                ),
            },
            "sqlite" => Ok(HistoryStoreConfig::Sqlite {
                path: self
                    .store_path
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SQLITE_PATH.to_string()),
            }),
            other => anyhow::bail!(
                "PARCELS_STORE_TYPE '{}' is not supported. \
                Supported types: memory, file, sqlite",
                other
            ),
        }
    }

    fn aggregator_config(&self) -> AggregatorConfig {
        let mut config = AggregatorConfig::default();
        let freshness = &mut config.freshness;

        if let Some(secs) = self.ok_check_interval_secs {
            freshness.ok_check_interval_secs = secs;
        }
        if let Some(secs) = self.not_found_check_interval_secs {
            freshness.not_found_check_interval_secs = secs;
        }
        if let Some(secs) = self.unknown_error_check_interval_secs {
            freshness.unknown_error_check_interval_secs = secs;
        }
        if let Some(secs) = self.rate_limited_check_interval_secs {
            freshness.rate_limited_check_interval_secs = secs;
        }
        if let Some(secs) = self.expiry_secs {
            freshness.expiry_secs = secs;
        }
        if let Some(ms) = self.fetch_timeout_ms {
            config.fetch_timeout_ms = ms;
        }

        config
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!(
            "PARCELS_LOG_LEVEL '{}' is not valid. \
            Valid levels: trace, debug, info, warn, error",
            level
        ),
    }
}

/// One lookup, as printed
#[derive(Debug, Serialize)]
struct LookupOutput {
    tracking_number: String,
    sources: Vec<SourceOutput>,
}

#[derive(Debug, Serialize)]
struct SourceOutput {
    tracking_number: String,
    api_name: String,
    is_delivered: bool,
    last_checked_at: String,
    /// Time of the latest event, `null` when the source reported none
    last_updated_at: Option<String>,
    origin_country: String,
    destination_country: String,
    events: Vec<EventOutput>,
}

#[derive(Debug, Serialize)]
struct EventOutput {
    time: String,
    description: String,
    status: TrackingStatus,
}

impl LookupOutput {
    fn new(tracking_number: &str, infos: &[TrackingInfo]) -> Self {
        Self {
            tracking_number: tracking_number.to_string(),
            sources: infos.iter().map(SourceOutput::from).collect(),
        }
    }
}

impl From<&TrackingInfo> for SourceOutput {
    fn from(info: &TrackingInfo) -> Self {
        Self {
            tracking_number: info.tracking_number.clone(),
            api_name: info.source_name.to_string(),
            is_delivered: info.is_delivered(),
            last_checked_at: rfc3339(info.last_fetched_at),
            last_updated_at: info.events.iter().map(|event| event.time).max().map(rfc3339),
            origin_country: info.origin_country.clone(),
            destination_country: info.destination_country.clone(),
            events: info
                .events
                .iter()
                .map(|event| EventOutput {
                    time: rfc3339(event.time),
                    description: event.description.clone(),
                    status: event.status,
                })
                .collect(),
        }
    }
}

fn rfc3339(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Per-kind counts of aggregator events seen during one run
#[derive(Debug, Default)]
struct EventTally {
    counts: BTreeMap<String, u64>,
}

impl EventTally {
    fn record(&mut self, event: &AggregatorEvent) {
        let key = match event {
            AggregatorEvent::ParcelDelivered { .. } => "parcel_delivered".to_string(),
            AggregatorEvent::FetchedFirst { source } => format!("fetched_first.{}", source),
            AggregatorEvent::FetchedChanged { source } => format!("fetched_changed.{}", source),
            AggregatorEvent::FetchedUnchanged { source } => format!("fetched_unchanged.{}", source),
            AggregatorEvent::SourceHit { source } => format!("source_hit.{}", source),
            AggregatorEvent::ParseError { source } => format!("parse_error.{}", source),
            AggregatorEvent::CacheDecision {
                source,
                category,
                refetch,
            } => format!(
                "cache_{}.{}.{}",
                if *refetch { "miss" } else { "hit" },
                source,
                category.as_str()
            ),
            AggregatorEvent::HistoryWriteFailed {
                source, operation, ..
            } => format!("history_write_failed.{}.{}", source, operation.as_str()),
        };

        *self.counts.entry(key).or_default() += 1;
    }

    fn log_summary(&self) {
        for (kind, count) in &self.counts {
            info!(kind = kind.as_str(), count, "Aggregator events");
        }
    }
}

/// Drain the event channel until every sender is gone
async fn tally_events(rx: mpsc::Receiver<AggregatorEvent>) -> EventTally {
    let mut stream = ReceiverStream::new(rx);
    let mut tally = EventTally::default();
    while let Some(event) = stream.next().await {
        tally.record(&event);
    }
    tally
}

fn build_registry(config: &Config) -> Result<SourceRegistry> {
    let mut registry = SourceRegistry::new();

    for source in &config.sources {
        match source.as_str() {
            parcels_source_cainiao::SOURCE_NAME => {
                if let Some(ref base_url) = config.cainiao_base_url {
                    info!("Registering Cainiao source at {}", base_url);
                    registry.register(Arc::new(CainiaoSource::with_base_url(base_url.as_str())?))?;
                } else {
                    info!("Registering Cainiao source");
                    parcels_source_cainiao::register(&mut registry)?;
                }
            }
            other => anyhow::bail!("Tracking source '{}' is not supported", other),
        }
    }

    Ok(registry)
}

async fn open_history_store(config: &HistoryStoreConfig) -> Result<Arc<dyn HistoryStore>> {
    let store: Arc<dyn HistoryStore> = match config {
        HistoryStoreConfig::Memory => Arc::new(MemoryHistoryStore::new()),
        HistoryStoreConfig::File { path } => Arc::new(
            FileHistoryStore::new(path)
                .await
                .with_context(|| format!("Failed to open history file {}", path))?,
        ),
        HistoryStoreConfig::Sqlite { path } => Arc::new(
            SqliteHistoryStore::open(path)
                .await
                .with_context(|| format!("Failed to open history database {}", path))?,
        ),
    };
    info!("History store: {}", config.type_name());
    Ok(store)
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return ParcelsExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return ParcelsExitCode::ConfigError.into();
    }

    let log_level = parse_log_level(&config.log_level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ParcelsExitCode::ConfigError.into();
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return ParcelsExitCode::RuntimeError.into();
        }
    };

    rt.block_on(run(config)).into()
}

async fn run(config: Config) -> ParcelsExitCode {
    let (aggregator, events) = match setup(&config).await {
        Ok(parts) => parts,
        Err(e) => {
            error!("Startup failed: {:#}", e);
            return ParcelsExitCode::ConfigError;
        }
    };
    let tally = tokio::spawn(tally_events(events));

    let mut failed = 0usize;
    for tracking_number in &config.tracking_numbers {
        match aggregator.get_tracking_info(tracking_number).await {
            Ok(infos) => {
                let output = LookupOutput::new(tracking_number, &infos);
                match serde_json::to_string_pretty(&output) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        error!(
                            tracking_number = tracking_number.as_str(),
                            "Failed to render result: {}",
                            e
                        );
                        failed += 1;
                    }
                }
            }
            Err(e) => {
                error!(tracking_number = tracking_number.as_str(), "Lookup failed: {}", e);
                failed += 1;
            }
        }
    }

    // Closes the event channel so the tally task finishes
    drop(aggregator);
    match tally.await {
        Ok(tally) => tally.log_summary(),
        Err(e) => error!("Event tally task failed: {}", e),
    }

    if failed > 0 {
        error!("{} of {} lookup(s) failed", failed, config.tracking_numbers.len());
        ParcelsExitCode::RuntimeError
    } else {
        ParcelsExitCode::Success
    }
}

async fn setup(config: &Config) -> Result<(TrackingAggregator, mpsc::Receiver<AggregatorEvent>)> {
    let registry = build_registry(config)?;
    let history = open_history_store(&config.history_store_config()?).await?;

    let (aggregator, events) = TrackingAggregator::new(
        registry,
        history,
        Arc::new(SystemClock),
        config.aggregator_config(),
    )?;

    info!(
        "Looking up {} tracking number(s) across {} source(s)",
        config.tracking_numbers.len(),
        config.sources.len()
    );
    Ok((aggregator, events))
}
