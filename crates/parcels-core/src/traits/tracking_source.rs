// # Tracking Source Trait
//
// Defines the interface for one upstream tracking integration.
//
// ## Implementations
//
// - Cainiao: `parcels-source-cainiao` crate
//
// ## Usage
//
// ```rust,ignore
// use parcels_core::TrackingSource;
// use std::time::Duration;
//
// let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
// let raw = source.fetch("RS0814398526Y", deadline).await;
// if raw.is_success() {
//     let info = source.parse(&raw)?;
// }
// ```

use async_trait::async_trait;
use tokio::time::Instant;

use crate::model::{RawResponse, SourceName, TrackingInfo};

/// Trait for tracking source implementations
///
/// A source knows two things: how to fetch a raw response from its
/// carrier, and how to parse that raw response into [`TrackingInfo`].
///
/// # Fetch Contract
///
/// `fetch` never fails. Transport errors, timeouts and unexpected replies
/// are encoded in [`RawResponse::status`] (usually
/// [`ResponseStatus::UnknownError`](crate::model::ResponseStatus::UnknownError)).
///
/// # Deadline
///
/// Every fetch of one lookup shares a single deadline. Sources should stop
/// work once it passes; the aggregator stops waiting for them either way,
/// and a response arriving late is discarded.
///
/// # Forbidden Capabilities
/// - ❌ Retry or back off (one bounded attempt per lookup)
/// - ❌ Access the history store (owned by `TrackingAggregator`)
/// - ❌ Decide whether a fetch is needed (owned by `TrackingAggregator`)
#[async_trait]
pub trait TrackingSource: Send + Sync {
    /// Fetch the raw tracking response for a tracking number
    ///
    /// # Parameters
    ///
    /// - `tracking_number`: The tracking number to look up
    /// - `deadline`: Instant after which the result will no longer be used
    async fn fetch(&self, tracking_number: &str, deadline: Instant) -> RawResponse;

    /// Parse a raw response into normalized tracking info
    ///
    /// Only called with responses whose status is `Success`.
    ///
    /// # Returns
    ///
    /// - `Ok(TrackingInfo)`: Parsed tracking info
    /// - `Err(Error::Parse)`: The body could not be understood
    fn parse(&self, response: &RawResponse) -> Result<TrackingInfo, crate::Error>;

    /// Name of this source (for logging/debugging)
    fn source_name(&self) -> SourceName;
}
