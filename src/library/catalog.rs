//! Persistent store of registered roots, directories, tracks and analysis results.
//!
//! The indexer only talks to the store through [`Catalog`], so the engine can be driven against
//! any backend. [`sqlite::SqliteCatalog`] is the one used by the application.

pub mod sqlite;

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use rustc_hash::FxHashMap;
use serde::Serialize;
use thiserror::Error;

use crate::media::metadata::Metadata;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Could not migrate catalog: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("Catalog connection is closed")]
    Closed,
}

impl CatalogError {
    /// Whether the connection itself is unusable, as opposed to a single statement failing.
    ///
    /// A fatal error aborts the current pass; anything else only skips the offending item.
    pub fn is_fatal(&self) -> bool {
        match self {
            CatalogError::Closed | CatalogError::Migrate(_) => true,
            CatalogError::Database(e) => matches!(
                e,
                sqlx::Error::PoolClosed
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Io(_)
                    | sqlx::Error::Configuration(_)
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootRecord {
    pub id: i64,
    pub path: Utf8PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub id: i64,
    pub root_id: i64,
    pub parent_id: Option<i64>,
    pub path: Utf8PathBuf,
}

/// What the catalog knows about a file's state on disk when it was last indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackStamp {
    pub id: i64,
    pub directory_id: i64,
    /// Modification time, unix milliseconds.
    pub modified: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRecord {
    pub id: i64,
    pub directory_id: i64,
    pub path: Utf8PathBuf,
    pub modified: i64,
    pub file_size: u64,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Copy)]
pub struct NewTrack<'a> {
    pub path: &'a Utf8Path,
    pub directory_id: i64,
    pub modified: i64,
    pub file_size: u64,
    pub metadata: &'a Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(i64),
    Updated(i64),
}

impl UpsertOutcome {
    pub fn id(&self) -> i64 {
        match self {
            UpsertOutcome::Created(id) | UpsertOutcome::Updated(id) => *id,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogCounts {
    pub roots: u64,
    pub directories: u64,
    pub tracks: u64,
    pub analysis_results: u64,
}

/// Transactional access to the catalog. Every write method is atomic on its own.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn roots(&self) -> Result<Vec<RootRecord>, CatalogError>;

    /// Insert a root, returning its id. Inserting an existing root returns the existing id.
    async fn insert_root(&self, path: &Utf8Path) -> Result<i64, CatalogError>;

    /// Delete a root along with every directory, track and analysis result under it.
    async fn remove_root(&self, path: &Utf8Path) -> Result<bool, CatalogError>;

    async fn find_directory(
        &self,
        root_id: i64,
        path: &Utf8Path,
    ) -> Result<Option<i64>, CatalogError>;

    async fn create_directory(
        &self,
        root_id: i64,
        parent_id: Option<i64>,
        path: &Utf8Path,
    ) -> Result<i64, CatalogError>;

    async fn directories(&self, root_id: i64) -> Result<Vec<DirectoryRecord>, CatalogError>;

    /// Delete a directory only if it holds neither tracks nor child directories.
    async fn delete_empty_directory(&self, id: i64) -> Result<bool, CatalogError>;

    async fn track_stamps(
        &self,
        root_id: i64,
    ) -> Result<FxHashMap<Utf8PathBuf, TrackStamp>, CatalogError>;

    async fn upsert_track(&self, track: NewTrack<'_>) -> Result<UpsertOutcome, CatalogError>;

    async fn delete_track(&self, path: &Utf8Path) -> Result<bool, CatalogError>;

    async fn tracks_missing_analysis(
        &self,
        analyzer: &str,
    ) -> Result<Vec<TrackRecord>, CatalogError>;

    async fn store_analysis(
        &self,
        track_id: i64,
        analyzer: &str,
        value: f64,
    ) -> Result<(), CatalogError>;

    async fn counts(&self) -> Result<CatalogCounts, CatalogError>;

    /// Compact the underlying storage. Not required for correctness.
    async fn optimize(&self) -> Result<(), CatalogError>;

    async fn close(&self);
}
