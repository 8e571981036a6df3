#![allow(dead_code)]

use std::{
    fs,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use kestrel::{
    library::{
        catalog::{
            Catalog, CatalogCounts, CatalogError, DirectoryRecord, NewTrack, RootRecord,
            TrackRecord, TrackStamp, UpsertOutcome, sqlite::SqliteCatalog,
        },
        scan::{
            engine::{Shared, SyncEngine},
            events::IndexerEvent,
        },
    },
    media::{
        errors::ExtractError,
        metadata::Metadata,
        traits::{MetadataReader, has_extension},
    },
    settings::scan::ScanSettings,
};
use rustc_hash::FxHashMap;
use tempfile::TempDir;

/// Reads "tags" from plain text files: the file content becomes the title. Files whose content
/// starts with `bad` fail to extract.
#[derive(Clone, Default)]
pub struct TextReader {
    pub extracts: Arc<AtomicUsize>,
}

impl MetadataReader for TextReader {
    fn accepts(&self, path: &Utf8Path) -> bool {
        has_extension(path, &["mp3"])
    }

    fn extract(&mut self, path: &Utf8Path) -> Result<Metadata, ExtractError> {
        self.extracts.fetch_add(1, Ordering::SeqCst);
        let content = fs::read_to_string(path)?;
        if content.starts_with("bad") {
            return Err(ExtractError::FileCorrupt);
        }
        Ok(Metadata {
            name: Some(content.trim().to_string()),
            duration_secs: Some(60),
            ..Default::default()
        })
    }
}

/// SQLite catalog that counts writes and can be told to behave like a dead connection.
#[derive(Clone)]
pub struct Instrumented {
    pub inner: SqliteCatalog,
    pub writes: Arc<AtomicUsize>,
    pub optimizes: Arc<AtomicUsize>,
    pub broken: Arc<AtomicBool>,
}

impl Instrumented {
    fn write(&self) -> Result<(), CatalogError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(CatalogError::Closed);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Catalog for Instrumented {
    async fn roots(&self) -> Result<Vec<RootRecord>, CatalogError> {
        self.inner.roots().await
    }

    async fn insert_root(&self, path: &Utf8Path) -> Result<i64, CatalogError> {
        self.write()?;
        self.inner.insert_root(path).await
    }

    async fn remove_root(&self, path: &Utf8Path) -> Result<bool, CatalogError> {
        self.write()?;
        self.inner.remove_root(path).await
    }

    async fn find_directory(
        &self,
        root_id: i64,
        path: &Utf8Path,
    ) -> Result<Option<i64>, CatalogError> {
        self.inner.find_directory(root_id, path).await
    }

    async fn create_directory(
        &self,
        root_id: i64,
        parent_id: Option<i64>,
        path: &Utf8Path,
    ) -> Result<i64, CatalogError> {
        self.write()?;
        self.inner.create_directory(root_id, parent_id, path).await
    }

    async fn directories(&self, root_id: i64) -> Result<Vec<DirectoryRecord>, CatalogError> {
        self.inner.directories(root_id).await
    }

    async fn delete_empty_directory(&self, id: i64) -> Result<bool, CatalogError> {
        self.write()?;
        self.inner.delete_empty_directory(id).await
    }

    async fn track_stamps(
        &self,
        root_id: i64,
    ) -> Result<FxHashMap<Utf8PathBuf, TrackStamp>, CatalogError> {
        self.inner.track_stamps(root_id).await
    }

    async fn upsert_track(&self, track: NewTrack<'_>) -> Result<UpsertOutcome, CatalogError> {
        self.write()?;
        self.inner.upsert_track(track).await
    }

    async fn delete_track(&self, path: &Utf8Path) -> Result<bool, CatalogError> {
        self.write()?;
        self.inner.delete_track(path).await
    }

    async fn tracks_missing_analysis(
        &self,
        analyzer: &str,
    ) -> Result<Vec<TrackRecord>, CatalogError> {
        self.inner.tracks_missing_analysis(analyzer).await
    }

    async fn store_analysis(
        &self,
        track_id: i64,
        analyzer: &str,
        value: f64,
    ) -> Result<(), CatalogError> {
        self.write()?;
        self.inner.store_analysis(track_id, analyzer, value).await
    }

    async fn counts(&self) -> Result<CatalogCounts, CatalogError> {
        self.inner.counts().await
    }

    async fn optimize(&self) -> Result<(), CatalogError> {
        self.optimizes.fetch_add(1, Ordering::SeqCst);
        self.inner.optimize().await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub music: Utf8PathBuf,
    pub catalog: Instrumented,
    pub shared: Shared,
    pub reader: TextReader,
    pub events: Arc<Mutex<Vec<IndexerEvent>>>,
}

impl Fixture {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::try_from(dir.path().to_path_buf())
            .unwrap()
            .canonicalize_utf8()
            .unwrap();
        let music = base.join("music");
        fs::create_dir_all(&music).unwrap();

        let inner = SqliteCatalog::open(&base.join("library.db")).await.unwrap();
        let catalog = Instrumented {
            inner,
            writes: Arc::default(),
            optimizes: Arc::default(),
            broken: Arc::default(),
        };

        let shared = Shared::default();
        let events = Arc::new(Mutex::new(Vec::new()));
        for event in [
            IndexerEvent::SynchronizeStart,
            IndexerEvent::SynchronizeEnd,
            IndexerEvent::PathsUpdated,
            IndexerEvent::TrackRefreshed,
        ] {
            let events = events.clone();
            shared
                .events
                .subscribe(event, move |e| events.lock().unwrap().push(e));
        }

        Fixture {
            dir,
            music,
            catalog,
            shared,
            reader: TextReader::default(),
            events,
        }
    }

    pub fn settings() -> ScanSettings {
        ScanSettings {
            optimize: false,
            ..Default::default()
        }
    }

    pub fn engine(&self) -> SyncEngine {
        self.engine_with(vec![Box::new(self.reader.clone())])
    }

    pub fn engine_with(&self, readers: Vec<Box<dyn MetadataReader>>) -> SyncEngine {
        self.engine_configured(Self::settings(), readers)
    }

    pub fn engine_configured(
        &self,
        settings: ScanSettings,
        readers: Vec<Box<dyn MetadataReader>>,
    ) -> SyncEngine {
        SyncEngine::new(Box::new(self.catalog.clone()), self.shared.clone(), settings)
            .with_readers(readers)
    }

    pub fn write(&self, relative: &str, content: &str) -> Utf8PathBuf {
        let path = self.music.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    pub fn extracts(&self) -> usize {
        self.reader.extracts.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.catalog.writes.load(Ordering::SeqCst)
    }

    pub fn optimizes(&self) -> usize {
        self.catalog.optimizes.load(Ordering::SeqCst)
    }

    pub fn count_events(&self, event: IndexerEvent) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| **e == event)
            .count()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }

    pub async fn counts(&self) -> CatalogCounts {
        self.catalog.inner.counts().await.unwrap()
    }

    /// Track stamps of every registered root, keyed by path.
    pub async fn stamps(&self) -> FxHashMap<Utf8PathBuf, TrackStamp> {
        let mut all = FxHashMap::default();
        for root in self.catalog.inner.roots().await.unwrap() {
            all.extend(self.catalog.inner.track_stamps(root.id).await.unwrap());
        }
        all
    }
}

/// Push a file's modification time forward so the change is seen regardless of timestamp
/// granularity.
pub fn touch(path: &Utf8Path, content: &str) {
    fs::write(path, content).unwrap();
    let later = SystemTime::now() + Duration::from_secs(10);
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(later)
        .unwrap();
}
