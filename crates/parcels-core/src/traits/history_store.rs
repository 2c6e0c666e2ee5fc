// # History Store Trait
//
// Defines the interface for the history of raw source responses.
//
// ## Purpose
//
// The store keeps every distinct response body ever fetched, so the full
// change history can be analysed later. The aggregator itself only reads
// the latest row per source:
// - A changed body is appended as a new row (`insert`)
// - An unchanged refetch only bumps `last_fetched_at` (`update`)
// - Rows are never deleted
//
// ## Implementations
//
// - In-memory: `MemoryHistoryStore`
// - JSON file: `FileHistoryStore`
// - SQLite: `parcels-store-sqlite` crate

use async_trait::async_trait;

use crate::model::{RawResponse, SourceName};

/// Trait for history store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
///
/// # Concurrent Lookups
///
/// Two concurrent lookups of the same tracking number may both insert the
/// same change. Stores that need stronger guarantees must enforce them
/// themselves (for example with a unique index).
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Get the latest response per source for a tracking number
    ///
    /// # Parameters
    ///
    /// - `tracking_number`: The tracking number
    /// - `source_names`: Sources to look up
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<RawResponse>)`: At most one row per requested source, the
    ///   one with the greatest `last_fetched_at`
    /// - `Err(Error)`: Storage error
    async fn get_latest(
        &self,
        tracking_number: &str,
        source_names: &[SourceName],
    ) -> Result<Vec<RawResponse>, crate::Error>;

    /// Append a new response row
    ///
    /// The store assigns the row identity; `response.id` is ignored.
    async fn insert(
        &self,
        tracking_number: &str,
        source_name: &SourceName,
        response: &RawResponse,
    ) -> Result<(), crate::Error>;

    /// Overwrite an existing row, matched by `response.id`
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Row updated
    /// - `Err(Error)`: Row has no id, does not exist, or storage error
    async fn update(&self, response: &RawResponse) -> Result<(), crate::Error>;
}
