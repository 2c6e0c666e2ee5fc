// # File History Store
//
// JSON file implementation of HistoryStore with crash recovery.
//
// ## Purpose
//
// Keeps raw response history across restarts for single-host deployments
// that don't want a database. Every write rewrites the whole file, so this
// is meant for personal-scale history (hundreds of parcels, not millions).
//
// ## Crash Recovery
//
// - Atomic writes: the new file is written next to the old one, then renamed
// - Backup: the previous good file is copied to `.backup` before each rename
// - Recovery: an unparseable main file is replaced by the backup on load
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "next_id": 3,
//   "records": [
//     {
//       "id": 1,
//       "tracking_number": "RS0814398526Y",
//       "source_name": "cainiao",
//       "first_fetched_at": "2024-01-09T12:00:00Z",
//       "last_fetched_at": "2024-01-10T12:00:00Z",
//       "body": [123, 125],
//       "status": "success"
//     }
//   ]
// }
// ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use super::latest_per_source;
use crate::Error;
use crate::model::{RawResponse, SourceName};
use crate::traits::HistoryStore;

/// History file format version
const HISTORY_FILE_VERSION: &str = "1.0";

/// File-based history store with crash recovery
///
/// All rows are held in memory and the file is rewritten after every
/// insert or update. A failed write leaves the in-memory rows changed, so
/// the next successful write persists them.
///
/// # Example
///
/// ```rust,no_run
/// use parcels_core::history::FileHistoryStore;
/// use parcels_core::model::SourceName;
/// use parcels_core::traits::HistoryStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileHistoryStore::new("/var/lib/parcels/history.json").await?;
///     let latest = store
///         .get_latest("RS0814398526Y", &[SourceName::from("cainiao")])
///         .await?;
///     println!("{} cached responses", latest.len());
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileHistoryStore {
    path: PathBuf,
    state: Arc<RwLock<HistoryFile>>,
}

/// Serializable history file format
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct HistoryFile {
    version: String,
    next_id: i64,
    records: Vec<RawResponse>,
}

impl FileHistoryStore {
    /// Create or load a file history store
    ///
    /// Creates missing parent directories. A corrupted file is recovered
    /// from its backup; if that fails too, history starts empty.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create history directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let state = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(state)),
        })
    }

    /// Load the history file, falling back to the backup on corruption
    async fn load_with_recovery(path: &Path) -> Result<HistoryFile, Error> {
        match Self::load(path).await {
            Ok(state) => {
                tracing::debug!("Loaded history from file: {} records", state.records.len());
                Ok(state)
            }
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "History file {} appears corrupted: {}. Attempting recovery from backup.",
                    path.display(),
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with empty history.");
                    return Ok(Self::empty());
                }

                match Self::load(&backup_path).await {
                    Ok(state) => {
                        tracing::info!(
                            "Recovered history from backup: {} records",
                            state.records.len()
                        );
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            tracing::error!(
                                "Failed to restore history file from backup: {}",
                                restore_err
                            );
                        }
                        Ok(state)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also corrupted: {}. Starting with empty history.",
                            backup_err
                        );
                        Ok(Self::empty())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn load(path: &Path) -> Result<HistoryFile, Error> {
        if !path.exists() {
            tracing::debug!("History file does not exist: {}", path.display());
            return Ok(Self::empty());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::history_store(format!(
                "Failed to read history file {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut state: HistoryFile = serde_json::from_str(&content)?;

        if state.version != HISTORY_FILE_VERSION {
            tracing::warn!(
                "History file version mismatch: expected {}, got {}. Attempting to load anyway.",
                HISTORY_FILE_VERSION,
                state.version
            );
        }

        // Never hand out an id that is already taken
        let max_id = state.records.iter().filter_map(|r| r.id).max().unwrap_or(0);
        state.next_id = state.next_id.max(max_id);

        Ok(state)
    }

    fn empty() -> HistoryFile {
        HistoryFile {
            version: HISTORY_FILE_VERSION.to_string(),
            ..HistoryFile::default()
        }
    }

    /// Write the given state to disk atomically
    async fn persist(&self, state: &HistoryFile) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| Error::history_store(format!("Failed to serialize history: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::history_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::history_store(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.flush().await.map_err(|e| {
                Error::history_store(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create history backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::history_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("History written to file: {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }

    /// Number of stored rows
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn get_latest(
        &self,
        tracking_number: &str,
        source_names: &[SourceName],
    ) -> Result<Vec<RawResponse>, Error> {
        let guard = self.state.read().await;
        Ok(latest_per_source(guard.records.iter(), tracking_number, source_names))
    }

    async fn insert(
        &self,
        tracking_number: &str,
        source_name: &SourceName,
        response: &RawResponse,
    ) -> Result<(), Error> {
        // Held across the write so concurrent writers serialize on the file
        let mut guard = self.state.write().await;
        guard.next_id += 1;

        let mut row = response.clone();
        row.id = Some(guard.next_id);
        row.tracking_number = tracking_number.to_string();
        row.source_name = source_name.clone();
        guard.records.push(row);

        self.persist(&guard).await
    }

    async fn update(&self, response: &RawResponse) -> Result<(), Error> {
        let id = response
            .id
            .ok_or_else(|| Error::history_store("Cannot update a response without an id"))?;

        let mut guard = self.state.write().await;
        let row = guard
            .records
            .iter_mut()
            .find(|row| row.id == Some(id))
            .ok_or_else(|| Error::not_found(format!("History row {}", id)))?;
        *row = response.clone();

        self.persist(&guard).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResponseStatus;
    use tempfile::TempDir;

    fn response(body: &str) -> RawResponse {
        RawResponse::new(
            "RS0814398526Y",
            SourceName::from("cainiao"),
            ResponseStatus::Success,
            body,
        )
    }

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("history.json");
        let source = SourceName::from("cainiao");

        {
            let store = FileHistoryStore::new(&path).await.unwrap();
            store
                .insert("RS0814398526Y", &source, &response("first"))
                .await
                .unwrap();
        }

        let store = FileHistoryStore::new(&path).await.unwrap();
        assert_eq!(store.len().await, 1);

        let latest = store
            .get_latest("RS0814398526Y", &[source.clone()])
            .await
            .unwrap();
        assert_eq!(latest[0].id, Some(1));
        assert_eq!(latest[0].body, b"first".to_vec());

        // Ids keep counting after a reload
        store
            .insert("RS0814398526Y", &source, &response("second"))
            .await
            .unwrap();
        let rows = store.state.read().await.records.clone();
        assert_eq!(rows[1].id, Some(2));
    }

    #[tokio::test]
    async fn test_file_store_update_rewrites_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("history.json");
        let source = SourceName::from("cainiao");

        let store = FileHistoryStore::new(&path).await.unwrap();
        store
            .insert("RS0814398526Y", &source, &response("body"))
            .await
            .unwrap();

        let mut latest = store
            .get_latest("RS0814398526Y", &[source.clone()])
            .await
            .unwrap()
            .remove(0);
        latest.last_fetched_at += chrono::TimeDelta::hours(1);
        store.update(&latest).await.unwrap();
        drop(store);

        let reopened = FileHistoryStore::new(&path).await.unwrap();
        let stored = reopened
            .get_latest("RS0814398526Y", &[source])
            .await
            .unwrap()
            .remove(0);
        assert_eq!(stored.last_fetched_at, latest.last_fetched_at);
        assert_eq!(reopened.len().await, 1);
    }

    #[tokio::test]
    async fn test_file_store_recovers_from_backup() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("history.json");
        let source = SourceName::from("cainiao");

        {
            let store = FileHistoryStore::new(&path).await.unwrap();
            store
                .insert("RS0814398526Y", &source, &response("one"))
                .await
                .unwrap();
            // Second write copies the first file to .backup
            store
                .insert("RS0814398526Y", &source, &response("two"))
                .await
                .unwrap();
        }

        fs::write(&path, "{ not json").await.unwrap();

        let store = FileHistoryStore::new(&path).await.unwrap();
        assert_eq!(store.len().await, 1);

        let restored = fs::read_to_string(&path).await.unwrap();
        assert!(serde_json::from_str::<serde_json::Value>(&restored).is_ok());
    }

    #[tokio::test]
    async fn test_file_store_corrupted_without_backup_starts_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("history.json");
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        fs::write(&path, "garbage").await.unwrap();

        let store = FileHistoryStore::new(&path).await.unwrap();
        assert!(store.is_empty().await);
    }
}
