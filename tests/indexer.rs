mod common;

use std::{
    fs,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    time::Duration,
};

use camino::{Utf8Path, Utf8PathBuf};
use common::TextReader;
use kestrel::{
    Catalog, Indexer, IndexerError, IndexerEvent, RunState, SqliteCatalog,
    media::{errors::ExtractError, metadata::Metadata, traits::MetadataReader},
    settings::scan::ScanSettings,
};

const PATIENCE: Duration = Duration::from_secs(20);

fn settings() -> ScanSettings {
    ScanSettings {
        optimize: false,
        ..Default::default()
    }
}

fn indexer() -> Indexer {
    let mut indexer = Indexer::new(settings());
    indexer
        .add_reader(Box::new(TextReader::default()))
        .unwrap();
    indexer
}

fn temp_base() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let base = Utf8PathBuf::try_from(dir.path().to_path_buf())
        .unwrap()
        .canonicalize_utf8()
        .unwrap();
    (dir, base)
}

fn notify_on(indexer: &Indexer, event: IndexerEvent) -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel();
    indexer.events().subscribe(event, move |_| {
        let _ = tx.send(());
    });
    rx
}

fn catalog_counts(location: &Utf8Path) -> kestrel::library::catalog::CatalogCounts {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let catalog = SqliteCatalog::open(location).await.unwrap();
        let counts = catalog.counts().await.unwrap();
        catalog.close().await;
        counts
    })
}

/// Parks the worker on its `park_at`th `accepts` call until the test lets it go on.
struct ParkingReader {
    inner: TextReader,
    calls: AtomicUsize,
    park_at: usize,
    parked: mpsc::Sender<()>,
    resume: mpsc::Receiver<()>,
}

impl MetadataReader for ParkingReader {
    fn accepts(&self, path: &Utf8Path) -> bool {
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.park_at {
            let _ = self.parked.send(());
            let _ = self.resume.recv_timeout(PATIENCE);
        }
        self.inner.accepts(path)
    }

    fn extract(&mut self, path: &Utf8Path) -> Result<Metadata, ExtractError> {
        self.inner.extract(path)
    }
}

/// Wait for pass ends until one finishes having saved `saved` files.
fn wait_for_saved(indexer: &Indexer, ended: &mpsc::Receiver<()>, saved: u64) {
    loop {
        ended
            .recv_timeout(PATIENCE)
            .expect("indexer never finished a pass");
        let status = indexer.status();
        if status.state == RunState::Idle
            && status.last_error.is_none()
            && status.progress.files_saved == saved
            && status.progress.overall >= 1.0
        {
            return;
        }
    }
}

#[test]
fn worker_indexes_registered_roots_and_persists_them() {
    let dir = tempfile::tempdir().unwrap();
    let base = Utf8PathBuf::try_from(dir.path().to_path_buf())
        .unwrap()
        .canonicalize_utf8()
        .unwrap();
    let music = base.join("music");
    fs::create_dir_all(&music).unwrap();
    fs::write(music.join("a.mp3"), "a").unwrap();
    fs::write(music.join("b.mp3"), "b").unwrap();
    let location = base.join("data/library.db");

    {
        let mut indexer = indexer();
        let (tx, ended) = mpsc::channel();
        indexer
            .events()
            .subscribe(IndexerEvent::SynchronizeEnd, move |_| {
                let _ = tx.send(());
            });

        indexer.startup(&location).unwrap();
        assert!(indexer.is_running());
        assert!(matches!(
            indexer.startup(&location),
            Err(IndexerError::AlreadyStarted)
        ));
        assert!(matches!(
            indexer.add_reader(Box::new(TextReader::default())),
            Err(IndexerError::AlreadyStarted)
        ));

        assert!(indexer.add_path(&music));
        assert!(!indexer.add_path(&music));
        wait_for_saved(&indexer, &ended, 2);

        let json = indexer.status_json().unwrap();
        assert!(json.contains("\"state\":\"idle\""));

        indexer.shutdown();
        assert!(!indexer.is_running());
    }

    // roots survive a restart of the program
    let mut indexer = indexer();
    indexer.startup(&location).unwrap();
    assert_eq!(indexer.paths(), vec![music.clone()]);
    indexer.shutdown();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let counts = runtime.block_on(async {
        let catalog = SqliteCatalog::open(&location).await.unwrap();
        let counts = catalog.counts().await.unwrap();
        catalog.close().await;
        counts
    });
    assert_eq!(counts.roots, 1);
    assert_eq!(counts.tracks, 2);
}

#[test]
fn restart_request_wakes_an_idle_worker() {
    let (_dir, base) = temp_base();
    let location = base.join("library.db");

    let mut indexer = indexer();
    let started = notify_on(&indexer, IndexerEvent::SynchronizeStart);

    indexer.startup(&location).unwrap();
    started.recv_timeout(PATIENCE).unwrap();

    indexer.restart_sync(true);
    started
        .recv_timeout(PATIENCE)
        .expect("restart did not wake the worker");

    indexer.shutdown();
}

#[test]
fn restart_mid_walk_cuts_the_pass_short_and_starts_over() {
    let (_dir, base) = temp_base();
    let music = base.join("music");
    fs::create_dir_all(music.join("sub")).unwrap();
    fs::write(music.join("a.mp3"), "a").unwrap();
    fs::write(music.join("sub/b.mp3"), "b").unwrap();
    let location = base.join("library.db");

    // two calls while counting, the third is the first file of the directory walk
    let (parked_tx, parked) = mpsc::channel();
    let (resume, resume_rx) = mpsc::channel();
    let mut indexer = Indexer::new(settings());
    indexer
        .add_reader(Box::new(ParkingReader {
            inner: TextReader::default(),
            calls: AtomicUsize::new(0),
            park_at: 3,
            parked: parked_tx,
            resume: resume_rx,
        }))
        .unwrap();

    let starts = Arc::new(AtomicUsize::new(0));
    let counter = starts.clone();
    indexer
        .events()
        .subscribe(IndexerEvent::SynchronizeStart, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    let ended = notify_on(&indexer, IndexerEvent::SynchronizeEnd);

    assert!(indexer.add_path(&music));
    indexer.startup(&location).unwrap();

    parked.recv_timeout(PATIENCE).expect("walk never reached the file");
    indexer.restart_sync(true);
    resume.send(()).unwrap();

    ended
        .recv_timeout(PATIENCE)
        .expect("interrupted pass never ended");
    assert!(indexer.restarted());
    assert!(!indexer.restarted());

    // the worker starts over by itself
    wait_for_saved(&indexer, &ended, 2);
    assert_eq!(starts.load(Ordering::SeqCst), 2);
    assert!(!indexer.restarted());
    indexer.shutdown();

    let counts = catalog_counts(&location);
    assert_eq!(counts.tracks, 2);
    assert_eq!(counts.directories, 2);
}

#[test]
fn failed_startup_can_be_retried_with_the_same_readers() {
    let (_dir, base) = temp_base();
    let music = base.join("music");
    fs::create_dir_all(&music).unwrap();
    fs::write(music.join("a.mp3"), "a").unwrap();
    fs::write(music.join("b.mp3"), "b").unwrap();

    // a directory where the catalog file should be
    let occupied = base.join("occupied");
    fs::create_dir_all(&occupied).unwrap();

    let mut indexer = indexer();
    let ended = notify_on(&indexer, IndexerEvent::SynchronizeEnd);
    assert!(indexer.add_path(&music));

    assert!(indexer.startup(&occupied).is_err());
    assert!(!indexer.is_running());

    let location = base.join("library.db");
    indexer.startup(&location).unwrap();
    wait_for_saved(&indexer, &ended, 2);
    indexer.shutdown();

    let counts = catalog_counts(&location);
    assert_eq!(counts.roots, 1);
    assert_eq!(counts.tracks, 2);
}

#[test]
fn removing_a_path_is_applied_by_the_worker() {
    let dir = tempfile::tempdir().unwrap();
    let base = Utf8PathBuf::try_from(dir.path().to_path_buf())
        .unwrap()
        .canonicalize_utf8()
        .unwrap();
    let music = base.join("music");
    fs::create_dir_all(&music).unwrap();
    fs::write(music.join("a.mp3"), "a").unwrap();
    let location = base.join("library.db");

    let mut indexer = indexer();
    let (tx, updated) = mpsc::channel();
    indexer
        .events()
        .subscribe(IndexerEvent::PathsUpdated, move |_| {
            let _ = tx.send(());
        });

    // registered before startup, written by the first pass
    assert!(indexer.add_path(&music));
    indexer.startup(&location).unwrap();
    updated.recv_timeout(PATIENCE).unwrap();

    assert!(indexer.remove_path(&music));
    assert!(indexer.paths().is_empty());
    updated.recv_timeout(PATIENCE).unwrap();
    indexer.shutdown();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let counts = runtime.block_on(async {
        let catalog = SqliteCatalog::open(&location).await.unwrap();
        catalog.counts().await.unwrap()
    });
    assert_eq!(counts.roots, 0);
    assert_eq!(counts.tracks, 0);
}
