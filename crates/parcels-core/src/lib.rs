// # parcels-core
//
// Core library for the multi-source parcel tracking aggregator.
//
// ## Architecture Overview
//
// This library decides, per tracking source and per request, whether cached
// tracking data is fresh enough to serve or has to be fetched again:
// - **TrackingSource**: Trait for fetching and parsing one carrier's tracking data
// - **HistoryStore**: Trait for the append-biased history of raw responses
// - **SourceRegistry**: Fixed, ordered set of tracking sources
// - **TrackingAggregator**: Freshness analysis, fetch fan-out and reconciliation
// - **Clock**: Injectable "now" so freshness decisions can be tested
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Carrier and storage specifics live in plugin crates
// 2. **Bounded Latency**: One shared deadline for all upstream fetches of a request
// 3. **Append-Biased History**: A changed body is a new row, an unchanged one a timestamp bump
// 4. **Library-First**: The binary is a thin wrapper around this crate
// 5. **Best-Effort Bookkeeping**: History writes never fail a lookup

pub mod aggregator;
pub mod clock;
pub mod config;
pub mod error;
pub mod history;
pub mod model;
pub mod registry;
pub mod traits;

// Re-export core types for convenience
pub use aggregator::{AggregatorEvent, StatusCategory, TrackingAggregator, WriteOperation};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AggregatorConfig, FreshnessConfig, HistoryStoreConfig};
pub use error::{Error, Result};
pub use history::{FileHistoryStore, MemoryHistoryStore};
pub use model::{
    RawResponse, ResponseStatus, SourceName, TrackingEvent, TrackingInfo, TrackingStatus,
};
pub use registry::SourceRegistry;
pub use traits::{HistoryStore, TrackingSource};
