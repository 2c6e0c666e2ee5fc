//! Core traits for the parcels aggregator
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`TrackingSource`]: Fetch and parse one carrier's tracking data
//! - [`HistoryStore`]: Append-biased history of raw responses

pub mod history_store;
pub mod tracking_source;

pub use history_store::HistoryStore;
pub use tracking_source::TrackingSource;
