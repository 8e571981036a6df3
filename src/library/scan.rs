//! Background synchronization of registered roots against the catalog.
//!
//! [`Indexer`] is the control surface used by the foreground. It owns a worker thread running a
//! [`SyncEngine`], which walks the roots, diffs them against the catalog and applies the
//! resulting directives one by one. Progress and run state are shared through
//! [`SyncControl`](progress::SyncControl),
//! lifecycle events through [`EventBus`].

pub mod analyze;
pub mod discover;
pub mod engine;
pub mod events;
pub mod progress;
pub mod queue;
pub mod registry;

use std::{sync::mpsc, thread::JoinHandle};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    library::{
        catalog::{Catalog, CatalogError, sqlite::SqliteCatalog},
        scan::{
            analyze::{Analyzer, BitrateAnalyzer},
            engine::{Shared, SyncEngine},
            events::EventBus,
            progress::IndexerStatus,
            registry::PathRegistry,
        },
    },
    media::{builtin::symphonia::SymphoniaReader, traits::MetadataReader},
    settings::scan::ScanSettings,
};

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("The indexer has already been started")]
    AlreadyStarted,
    #[error("Could not build the worker runtime: {0}")]
    Runtime(std::io::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("The worker thread exited before reporting readiness")]
    WorkerExited,
}

/// Readers and analyzers, handed to the worker once the catalog is open.
struct Plugins {
    readers: Vec<Box<dyn MetadataReader>>,
    analyzers: Vec<Box<dyn Analyzer>>,
}

/// Owns the indexer worker and exposes its controls to the foreground.
pub struct Indexer {
    shared: Shared,
    settings: ScanSettings,
    readers: Vec<Box<dyn MetadataReader>>,
    analyzers: Vec<Box<dyn Analyzer>>,
    worker: Option<JoinHandle<()>>,
}

impl Indexer {
    pub fn new(settings: ScanSettings) -> Self {
        Indexer {
            shared: Shared::default(),
            settings,
            readers: Vec::new(),
            analyzers: Vec::new(),
            worker: None,
        }
    }

    /// An indexer with the built-in reader and analyzer installed.
    pub fn with_defaults(settings: ScanSettings) -> Self {
        let mut indexer = Self::new(settings);
        indexer.readers.push(Box::new(SymphoniaReader::default()));
        indexer.analyzers.push(Box::new(BitrateAnalyzer));
        indexer
    }

    /// Append a reader. Readers are consulted in the order they were added.
    pub fn add_reader(&mut self, reader: Box<dyn MetadataReader>) -> Result<(), IndexerError> {
        if self.worker.is_some() {
            return Err(IndexerError::AlreadyStarted);
        }
        self.readers.push(reader);
        Ok(())
    }

    pub fn add_analyzer(&mut self, analyzer: Box<dyn Analyzer>) -> Result<(), IndexerError> {
        if self.worker.is_some() {
            return Err(IndexerError::AlreadyStarted);
        }
        self.analyzers.push(analyzer);
        Ok(())
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    /// Register a root. Returns false if it was already registered.
    pub fn add_path(&self, path: &Utf8Path) -> bool {
        let added = self.shared.registry.add(path);
        if added {
            self.shared.control.request_restart(true);
        }
        added
    }

    /// Unregister a root. Its records are deleted at the start of the next pass.
    pub fn remove_path(&self, path: &Utf8Path) -> bool {
        let removed = self.shared.registry.remove(path);
        if removed {
            self.shared.control.request_restart(true);
        }
        removed
    }

    pub fn paths(&self) -> Vec<Utf8PathBuf> {
        self.shared.registry.paths()
    }

    /// Open the catalog at `location` and start the worker thread, which begins with a pass.
    ///
    /// Returns once the catalog is open and the persisted roots are loaded, so `paths()` is
    /// complete afterwards.
    pub fn startup(&mut self, location: &Utf8Path) -> Result<(), IndexerError> {
        if self.worker.is_some() {
            return Err(IndexerError::AlreadyStarted);
        }

        if let Some(parent) = location.parent()
            && !parent.as_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(IndexerError::Runtime)?;

        let location = location.to_path_buf();
        let shared = self.shared.clone();
        let settings = self.settings.clone();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CatalogError>>();
        let (plugins_tx, plugins_rx) = mpsc::channel::<Plugins>();

        let worker = std::thread::Builder::new()
            .name("indexer".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let catalog = match open_catalog(&location, &shared.registry).await {
                        Ok(catalog) => catalog,
                        Err(e) => {
                            error!("Could not open catalog at {}: {}", location, e);
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));

                    let Ok(plugins) = plugins_rx.recv() else {
                        catalog.close().await;
                        return;
                    };

                    SyncEngine::new(Box::new(catalog), shared, settings)
                        .with_readers(plugins.readers)
                        .with_analyzers(plugins.analyzers)
                        .run()
                        .await;
                })
            })?;

        // readers stay with the indexer until the catalog is open, so a failed startup can be
        // retried with the same setup
        match ready_rx.recv() {
            Ok(Ok(())) => {
                let plugins = Plugins {
                    readers: std::mem::take(&mut self.readers),
                    analyzers: std::mem::take(&mut self.analyzers),
                };
                if let Err(mpsc::SendError(plugins)) = plugins_tx.send(plugins) {
                    self.readers = plugins.readers;
                    self.analyzers = plugins.analyzers;
                    let _ = worker.join();
                    return Err(IndexerError::WorkerExited);
                }

                info!("Indexer started");
                self.worker = Some(worker);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e.into())
            }
            Err(_) => {
                let _ = worker.join();
                Err(IndexerError::WorkerExited)
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|worker| !worker.is_finished())
    }

    pub fn status(&self) -> IndexerStatus {
        self.shared.control.status()
    }

    pub fn status_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.status())
    }

    /// Ask the worker to abandon the current pass and start over, or withdraw that request.
    pub fn restart_sync(&self, restart: bool) {
        self.shared.control.request_restart(restart);
    }

    /// Whether a pass was cut short by a restart since the last call.
    pub fn restarted(&self) -> bool {
        self.shared.control.take_restarted()
    }

    /// Stop the worker and wait for it. The current directory or directive is finished first.
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        self.shared.control.request_stop();
        if worker.join().is_err() {
            warn!("Indexer worker panicked");
        }
    }
}

impl Drop for Indexer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn open_catalog(
    location: &Utf8Path,
    registry: &PathRegistry,
) -> Result<SqliteCatalog, CatalogError> {
    let catalog = SqliteCatalog::open(location).await?;
    let roots = catalog.roots().await?;
    registry.seed(roots.into_iter().map(|root| root.path));
    Ok(catalog)
}
