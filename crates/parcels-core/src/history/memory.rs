// # Memory History Store
//
// In-memory implementation of HistoryStore.
//
// ## Purpose
//
// Provides a simple, fast history store that doesn't persist across restarts.
// Useful for testing and for deployments where every restart may refetch
// all sources once.
//
// ## Crash Behavior
//
// - All history is lost on restart/crash
// - First lookup after a restart fetches every source again

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::latest_per_source;
use crate::Error;
use crate::model::{RawResponse, SourceName};
use crate::traits::HistoryStore;

/// In-memory history store implementation
///
/// Rows live in a Vec protected by a RwLock; ids are assigned sequentially
/// starting at 1.
///
/// # Example
///
/// ```rust,no_run
/// use parcels_core::history::MemoryHistoryStore;
/// use parcels_core::model::{RawResponse, ResponseStatus, SourceName};
/// use parcels_core::traits::HistoryStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryHistoryStore::new();
///     let source = SourceName::from("cainiao");
///
///     let response =
///         RawResponse::new("RS0814398526Y", source.clone(), ResponseStatus::Success, "{}");
///     store.insert("RS0814398526Y", &source, &response).await?;
///
///     let latest = store.get_latest("RS0814398526Y", &[source]).await?;
///     assert_eq!(latest.len(), 1);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryHistoryStore {
    inner: Arc<RwLock<MemoryRows>>,
}

#[derive(Debug, Default)]
struct MemoryRows {
    rows: Vec<RawResponse>,
    next_id: i64,
}

impl MemoryHistoryStore {
    /// Create a new empty memory history store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of rows in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.rows.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.rows.is_empty()
    }

    /// All rows for one (tracking number, source) pair, in insertion order
    pub async fn rows_for(&self, tracking_number: &str, source_name: &str) -> Vec<RawResponse> {
        let guard = self.inner.read().await;
        guard
            .rows
            .iter()
            .filter(|row| {
                row.tracking_number == tracking_number && row.source_name.as_str() == source_name
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn get_latest(
        &self,
        tracking_number: &str,
        source_names: &[SourceName],
    ) -> Result<Vec<RawResponse>, Error> {
        let guard = self.inner.read().await;
        Ok(latest_per_source(guard.rows.iter(), tracking_number, source_names))
    }

    async fn insert(
        &self,
        tracking_number: &str,
        source_name: &SourceName,
        response: &RawResponse,
    ) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.next_id += 1;

        let mut row = response.clone();
        row.id = Some(guard.next_id);
        row.tracking_number = tracking_number.to_string();
        row.source_name = source_name.clone();
        guard.rows.push(row);
        Ok(())
    }

    async fn update(&self, response: &RawResponse) -> Result<(), Error> {
        let id = response
            .id
            .ok_or_else(|| Error::history_store("Cannot update a response without an id"))?;

        let mut guard = self.inner.write().await;
        let row = guard
            .rows
            .iter_mut()
            .find(|row| row.id == Some(id))
            .ok_or_else(|| Error::not_found(format!("History row {}", id)))?;
        *row = response.clone();
        Ok(())
    }
}
