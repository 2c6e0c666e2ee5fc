// # History Store Implementations
//
// This module provides implementations of the HistoryStore trait for
// different persistence strategies.

pub mod file;
pub mod memory;

pub use file::FileHistoryStore;
pub use memory::MemoryHistoryStore;

use crate::model::{RawResponse, SourceName};

/// Pick the latest row per requested source out of `rows`
///
/// Latest means greatest `last_fetched_at`; ties go to the most recently
/// inserted row. Output follows the order of `source_names`.
pub(crate) fn latest_per_source<'a>(
    rows: impl Iterator<Item = &'a RawResponse> + Clone,
    tracking_number: &str,
    source_names: &[SourceName],
) -> Vec<RawResponse> {
    source_names
        .iter()
        .filter_map(|source_name| {
            rows.clone()
                .filter(|row| {
                    row.tracking_number == tracking_number && &row.source_name == source_name
                })
                .max_by_key(|row| (row.last_fetched_at, row.id))
                .cloned()
        })
        .collect()
}
