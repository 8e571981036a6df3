use std::time::Duration;

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use rustc_hash::FxHashMap;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use tracing::{debug, info};

use crate::{
    library::catalog::{
        Catalog, CatalogCounts, CatalogError, DirectoryRecord, NewTrack, RootRecord, TrackRecord,
        TrackStamp, UpsertOutcome,
    },
    media::metadata::Metadata,
};

fn to_db(value: Option<u64>) -> Option<i64> {
    value.and_then(|v| i64::try_from(v).ok())
}

fn from_db(value: Option<i64>) -> Option<u64> {
    value.and_then(|v| u64::try_from(v).ok())
}

#[derive(sqlx::FromRow)]
struct TrackRow {
    id: i64,
    directory_id: i64,
    path: String,
    modified: i64,
    file_size: i64,
    title: Option<String>,
    artist: Option<String>,
    album_artist: Option<String>,
    album: Option<String>,
    composer: Option<String>,
    genre: Option<String>,
    track_number: Option<i64>,
    track_total: Option<i64>,
    disc_number: Option<i64>,
    disc_total: Option<i64>,
    vinyl_numbering: bool,
    year: Option<i32>,
    duration: Option<i64>,
}

impl From<TrackRow> for TrackRecord {
    fn from(row: TrackRow) -> Self {
        TrackRecord {
            id: row.id,
            directory_id: row.directory_id,
            path: Utf8PathBuf::from(row.path),
            modified: row.modified,
            file_size: u64::try_from(row.file_size).unwrap_or_default(),
            metadata: Metadata {
                name: row.title,
                artist: row.artist,
                album_artist: row.album_artist,
                album: row.album,
                composer: row.composer,
                genre: row.genre,
                track_current: from_db(row.track_number),
                track_max: from_db(row.track_total),
                disc_current: from_db(row.disc_number),
                disc_max: from_db(row.disc_total),
                vinyl_numbering: row.vinyl_numbering,
                year: row.year,
                duration_secs: from_db(row.duration),
            },
        }
    }
}

/// SQLite-backed catalog. The schema is created and migrated on open.
#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub async fn open(location: &Utf8Path) -> Result<Self, CatalogError> {
        let options = SqliteConnectOptions::new()
            .filename(location)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("Opened catalog at {}", location);

        Ok(SqliteCatalog { pool })
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn roots(&self) -> Result<Vec<RootRecord>, CatalogError> {
        let rows: Vec<(i64, String)> =
            sqlx::query_as(include_str!("../../../queries/catalog/list_roots.sql"))
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(id, path)| RootRecord {
                id,
                path: path.into(),
            })
            .collect())
    }

    async fn insert_root(&self, path: &Utf8Path) -> Result<i64, CatalogError> {
        let (id,): (i64,) =
            sqlx::query_as(include_str!("../../../queries/catalog/insert_root.sql"))
                .bind(path.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(id)
    }

    async fn remove_root(&self, path: &Utf8Path) -> Result<bool, CatalogError> {
        let result = sqlx::query(include_str!("../../../queries/catalog/delete_root.sql"))
            .bind(path.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_directory(
        &self,
        root_id: i64,
        path: &Utf8Path,
    ) -> Result<Option<i64>, CatalogError> {
        let row: Option<(i64,)> =
            sqlx::query_as(include_str!("../../../queries/catalog/get_directory_id.sql"))
                .bind(root_id)
                .bind(path.as_str())
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id,)| id))
    }

    async fn create_directory(
        &self,
        root_id: i64,
        parent_id: Option<i64>,
        path: &Utf8Path,
    ) -> Result<i64, CatalogError> {
        let (id,): (i64,) =
            sqlx::query_as(include_str!("../../../queries/catalog/create_directory.sql"))
                .bind(root_id)
                .bind(parent_id)
                .bind(path.as_str())
                .fetch_one(&self.pool)
                .await?;

        debug!("created directory record {} for {}", id, path);
        Ok(id)
    }

    async fn directories(&self, root_id: i64) -> Result<Vec<DirectoryRecord>, CatalogError> {
        let rows: Vec<(i64, i64, Option<i64>, String)> =
            sqlx::query_as(include_str!("../../../queries/catalog/list_directories.sql"))
                .bind(root_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(id, root_id, parent_id, path)| DirectoryRecord {
                id,
                root_id,
                parent_id,
                path: path.into(),
            })
            .collect())
    }

    async fn delete_empty_directory(&self, id: i64) -> Result<bool, CatalogError> {
        let result = sqlx::query(include_str!(
            "../../../queries/catalog/delete_empty_directory.sql"
        ))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn track_stamps(
        &self,
        root_id: i64,
    ) -> Result<FxHashMap<Utf8PathBuf, TrackStamp>, CatalogError> {
        let rows: Vec<(i64, i64, String, i64)> =
            sqlx::query_as(include_str!("../../../queries/catalog/track_stamps.sql"))
                .bind(root_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(id, directory_id, path, modified)| {
                (
                    Utf8PathBuf::from(path),
                    TrackStamp {
                        id,
                        directory_id,
                        modified,
                    },
                )
            })
            .collect())
    }

    async fn upsert_track(&self, track: NewTrack<'_>) -> Result<UpsertOutcome, CatalogError> {
        let metadata = track.metadata;
        let file_size = i64::try_from(track.file_size).unwrap_or(i64::MAX);
        let indexed_at = chrono::Utc::now();

        let mut tx = self.pool.begin().await?;

        let existing: Option<(i64,)> =
            sqlx::query_as(include_str!("../../../queries/catalog/get_track_id.sql"))
                .bind(track.path.as_str())
                .fetch_optional(&mut *tx)
                .await?;

        let query = match existing {
            Some(_) => include_str!("../../../queries/catalog/update_track.sql"),
            None => include_str!("../../../queries/catalog/insert_track.sql"),
        };

        let bound = sqlx::query_as::<_, (i64,)>(query)
            .bind(track.directory_id)
            .bind(track.path.as_str())
            .bind(track.modified)
            .bind(file_size)
            .bind(&metadata.name)
            .bind(&metadata.artist)
            .bind(&metadata.album_artist)
            .bind(&metadata.album)
            .bind(&metadata.composer)
            .bind(&metadata.genre)
            .bind(to_db(metadata.track_current))
            .bind(to_db(metadata.track_max))
            .bind(to_db(metadata.disc_current))
            .bind(to_db(metadata.disc_max))
            .bind(metadata.vinyl_numbering)
            .bind(metadata.year)
            .bind(to_db(metadata.duration_secs))
            .bind(indexed_at);

        let (id,) = bound.fetch_one(&mut *tx).await?;

        let outcome = if existing.is_some() {
            // the file changed, so whatever was derived from it is stale
            sqlx::query(include_str!(
                "../../../queries/catalog/clear_track_analysis.sql"
            ))
            .bind(id)
            .execute(&mut *tx)
            .await?;

            UpsertOutcome::Updated(id)
        } else {
            UpsertOutcome::Created(id)
        };

        tx.commit().await?;

        Ok(outcome)
    }

    async fn delete_track(&self, path: &Utf8Path) -> Result<bool, CatalogError> {
        let result = sqlx::query(include_str!("../../../queries/catalog/delete_track.sql"))
            .bind(path.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn tracks_missing_analysis(
        &self,
        analyzer: &str,
    ) -> Result<Vec<TrackRecord>, CatalogError> {
        let rows: Vec<TrackRow> = sqlx::query_as(include_str!(
            "../../../queries/catalog/tracks_missing_analysis.sql"
        ))
        .bind(analyzer)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TrackRecord::from).collect())
    }

    async fn store_analysis(
        &self,
        track_id: i64,
        analyzer: &str,
        value: f64,
    ) -> Result<(), CatalogError> {
        sqlx::query(include_str!("../../../queries/catalog/store_analysis.sql"))
            .bind(track_id)
            .bind(analyzer)
            .bind(value)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn counts(&self) -> Result<CatalogCounts, CatalogError> {
        let (roots, directories, tracks, analysis_results): (i64, i64, i64, i64) =
            sqlx::query_as(include_str!("../../../queries/catalog/counts.sql"))
                .fetch_one(&self.pool)
                .await?;

        Ok(CatalogCounts {
            roots: roots.max(0) as u64,
            directories: directories.max(0) as u64,
            tracks: tracks.max(0) as u64,
            analysis_results: analysis_results.max(0) as u64,
        })
    }

    async fn optimize(&self) -> Result<(), CatalogError> {
        sqlx::query("PRAGMA optimize").execute(&self.pool).await?;
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
