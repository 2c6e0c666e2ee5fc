//! Tracking aggregator
//!
//! The TrackingAggregator answers "what do we know about this parcel?" by
//! combining cached history with fresh upstream fetches:
//! - Loading the latest stored response per source
//! - Deciding which sources are stale (freshness analysis)
//! - Fetching stale sources concurrently under one deadline
//! - Reconciling fetched responses with history (append or bump)
//! - Returning normalized tracking info in registry order
//!
//! ## Architecture
//!
//! ```text
//!                   get_tracking_info(tn)
//!                            │
//!                            ▼
//!                    ┌──────────────┐
//!                    │ HistoryStore │ get_latest
//!                    └──────────────┘
//!                            │
//!                            ▼
//!                    ┌──────────────┐  delivered
//!                    │  Freshness   │──────────────► cached result
//!                    └──────────────┘
//!                            │ stale sources
//!                            ▼
//!                    ┌──────────────┐
//!                    │   Fan-out    │ TrackingSource::fetch × N
//!                    └──────────────┘
//!                            │
//!                            ▼
//!                    ┌──────────────┐
//!                    │  Reconcile   │ insert / update
//!                    └──────────────┘
//!                            │
//!                            ▼
//!                  Vec<TrackingInfo> + events
//! ```

mod fanout;
mod freshness;
mod reconcile;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::AggregatorConfig;
use crate::error::{Error, Result};
use crate::model::{RawResponse, SourceName, TrackingInfo};
use crate::registry::SourceRegistry;
use crate::traits::{HistoryStore, TrackingSource};
use reconcile::{LookupState, build_result};

/// Status category of a cached response, as reported in cache decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCategory {
    Success,
    UnknownError,
    NotFound,
    RateLimited,
}

impl StatusCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCategory::Success => "success",
            StatusCategory::UnknownError => "unknown_error",
            StatusCategory::NotFound => "not_found",
            StatusCategory::RateLimited => "rate_limited",
        }
    }
}

/// History write that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteOperation {
    Insert,
    Update,
}

impl WriteOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteOperation::Insert => "insert",
            WriteOperation::Update => "update",
        }
    }
}

/// Events emitted by the TrackingAggregator
///
/// Purely observational: dropping the receiver, or letting the channel
/// fill up, never changes what a lookup returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregatorEvent {
    /// Stored history shows the parcel as delivered; nothing was fetched
    ParcelDelivered { tracking_number: String },

    /// Source fetched for a tracking number it had no history for
    FetchedFirst { source: SourceName },

    /// Source returned a body different from the stored one
    FetchedChanged { source: SourceName },

    /// Source returned exactly the stored body
    FetchedUnchanged { source: SourceName },

    /// A fetch was launched against the source
    SourceHit { source: SourceName },

    /// A freshly fetched success response could not be parsed
    ParseError { source: SourceName },

    /// Interval-based refetch decision for a cached response
    CacheDecision {
        source: SourceName,
        category: StatusCategory,
        refetch: bool,
    },

    /// Writing history failed (the lookup still succeeded)
    HistoryWriteFailed {
        source: SourceName,
        operation: WriteOperation,
        error: String,
    },
}

/// Multi-source tracking aggregator
///
/// ## Concurrency
///
/// `get_tracking_info` takes `&self` and keeps all per-lookup state local,
/// so one aggregator can serve many lookups at once, including concurrent
/// lookups of the same tracking number. Those may race and insert the same
/// change twice; preventing that is up to the history store.
///
/// ## Lifecycle
///
/// 1. Build a [`SourceRegistry`]
/// 2. Create with [`TrackingAggregator::new()`], keep the event receiver
/// 3. Call [`TrackingAggregator::get_tracking_info()`] per request
pub struct TrackingAggregator {
    /// Registered sources, in output order
    sources: SourceRegistry,

    /// History of raw responses
    history: Arc<dyn HistoryStore>,

    /// Source of "now" for freshness decisions and history timestamps
    clock: Arc<dyn Clock>,

    config: AggregatorConfig,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<AggregatorEvent>,
}

impl TrackingAggregator {
    /// Create a new aggregator
    ///
    /// # Parameters
    ///
    /// - `sources`: Registered tracking sources (must not be empty)
    /// - `history`: History store implementation
    /// - `clock`: Clock implementation
    /// - `config`: Aggregator configuration
    ///
    /// # Returns
    ///
    /// A tuple of (aggregator, event_receiver) where event_receiver yields
    /// aggregator events
    pub fn new(
        sources: SourceRegistry,
        history: Arc<dyn HistoryStore>,
        clock: Arc<dyn Clock>,
        config: AggregatorConfig,
    ) -> Result<(Self, mpsc::Receiver<AggregatorEvent>)> {
        config.validate()?;
        if sources.is_empty() {
            return Err(Error::config("At least one tracking source must be registered"));
        }

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let aggregator = Self {
            sources,
            history,
            clock,
            config,
            event_tx: tx,
        };

        Ok((aggregator, rx))
    }

    /// Registered sources
    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    /// Look up everything known about a tracking number
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<TrackingInfo>)`: One entry per source with usable data, in
    ///   registry order (possibly empty)
    /// - `Err(Error::HistoryRead)`: Stored history could not be read
    pub async fn get_tracking_info(&self, tracking_number: &str) -> Result<Vec<TrackingInfo>> {
        let now = self.clock.now();

        let stored = self.load_latest(tracking_number).await?;
        debug!(tracking_number, count = stored.len(), "Loaded stored responses");

        let report = freshness::analyze(&self.sources, &stored, now, &self.config.freshness);
        for decision in &report.decisions {
            self.emit_event(AggregatorEvent::CacheDecision {
                source: decision.source.clone(),
                category: decision.category,
                refetch: decision.refetch,
            });
        }

        if report.delivered {
            info!(tracking_number, "Parcel is delivered, serving history");
            self.emit_event(AggregatorEvent::ParcelDelivered {
                tracking_number: tracking_number.to_string(),
            });
            return Ok(build_result(&self.sources, report.cached));
        }

        for name in &report.refetch {
            self.emit_event(AggregatorEvent::SourceHit {
                source: name.clone(),
            });
        }

        let deadline = tokio::time::Instant::now() + self.config.fetch_timeout();
        let fetched =
            fanout::fetch_all(&self.sources, tracking_number, &report.refetch, deadline).await;
        debug!(
            tracking_number,
            requested = report.refetch.len(),
            completed = fetched.len(),
            "Fetches finished"
        );

        let state = LookupState {
            stored,
            fetched,
            cached: report.cached,
        };
        let surfaced = self.reconcile(tracking_number, state, now).await;

        Ok(build_result(&self.sources, surfaced))
    }

    /// Load the latest stored response of every registered source
    async fn load_latest(&self, tracking_number: &str) -> Result<HashMap<SourceName, RawResponse>> {
        let rows = self
            .history
            .get_latest(tracking_number, &self.sources.names())
            .await
            .map_err(|e| Error::history_read(tracking_number, "load latest responses", e))?;

        Ok(rows
            .into_iter()
            .map(|row| (row.source_name.clone(), row))
            .collect())
    }

    /// Emit an aggregator event
    ///
    /// Never blocks. A full channel drops the event with a warning; a closed
    /// channel (nobody listening) drops it silently.
    fn emit_event(&self, event: AggregatorEvent) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.event_tx.try_send(event) {
            warn!(
                "Event channel full, dropping event. Consider increasing event_channel_capacity."
            );
        }
    }
}

/// Parse a success response, stamping the result with the response's
/// `last_fetched_at`
pub(crate) fn parse_response(
    source: &dyn TrackingSource,
    response: &RawResponse,
) -> Result<TrackingInfo> {
    let mut info = source.parse(response)?;
    info.last_fetched_at = response.last_fetched_at;
    Ok(info)
}
