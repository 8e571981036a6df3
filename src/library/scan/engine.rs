use std::{fmt::Display, path::PathBuf, sync::Arc, time::Instant};

use camino::{Utf8Path, Utf8PathBuf};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, error, info, warn};

use crate::{
    library::{
        catalog::{Catalog, CatalogError, NewTrack, RootRecord, TrackStamp, UpsertOutcome},
        scan::{
            analyze::Analyzer,
            discover::{count_files, first_visit, is_indexable, list_directory},
            events::{EventBus, IndexerEvent},
            progress::{Interrupt, PassOutcome, Phase, SyncControl, Wake},
            queue::{Directive, MutationQueue},
            registry::{PathRegistry, RootChange},
        },
    },
    media::traits::MetadataReader,
    settings::scan::ScanSettings,
};

/// State shared between the engine and the foreground.
#[derive(Debug, Clone, Default)]
pub struct Shared {
    pub registry: Arc<PathRegistry>,
    pub control: Arc<SyncControl>,
    pub events: EventBus,
}

#[derive(Debug)]
enum Abort {
    Interrupted(Interrupt),
    Catalog(CatalogError),
}

impl From<Interrupt> for Abort {
    fn from(interrupt: Interrupt) -> Self {
        Abort::Interrupted(interrupt)
    }
}

/// Pass a catalog result through, turning non-fatal errors into a logged `None` and fatal ones
/// into an abort.
fn tolerate<T>(result: Result<T, CatalogError>, context: impl Display) -> Result<Option<T>, Abort> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_fatal() => Err(Abort::Catalog(e)),
        Err(e) => {
            warn!("{}: {}", context, e);
            Ok(None)
        }
    }
}

/// What the directory walk of a single root saw.
#[derive(Debug, Default)]
struct Observation {
    directories: FxHashSet<i64>,
    /// Directories that could not be listed or recorded. Records under them are kept as is.
    shielded: Vec<Utf8PathBuf>,
    stamps: FxHashMap<Utf8PathBuf, TrackStamp>,
}

impl Observation {
    fn is_shielded(&self, path: &Utf8Path) -> bool {
        self.shielded.iter().any(|dir| path.starts_with(dir))
    }
}

/// Runs synchronization passes against a catalog.
///
/// The engine is single-threaded: the indexer drives it from its worker thread, tests drive it
/// directly with [`SyncEngine::run_pass`].
pub struct SyncEngine {
    catalog: Box<dyn Catalog>,
    readers: Vec<Box<dyn MetadataReader>>,
    analyzers: Vec<Box<dyn Analyzer>>,
    shared: Shared,
    settings: ScanSettings,
    queue: MutationQueue,
    /// Files no reader could extract, with the mtime at the time of failure. They are retried
    /// once they change on disk.
    failed: FxHashMap<Utf8PathBuf, i64>,
    /// Whether the current pass has written anything to the catalog.
    wrote: bool,
}

impl SyncEngine {
    pub fn new(catalog: Box<dyn Catalog>, shared: Shared, settings: ScanSettings) -> Self {
        SyncEngine {
            catalog,
            readers: Vec::new(),
            analyzers: Vec::new(),
            shared,
            settings,
            queue: MutationQueue::new(),
            failed: FxHashMap::default(),
            wrote: false,
        }
    }

    pub fn with_readers(mut self, readers: Vec<Box<dyn MetadataReader>>) -> Self {
        self.readers = readers;
        self
    }

    pub fn with_analyzers(mut self, analyzers: Vec<Box<dyn Analyzer>>) -> Self {
        self.analyzers = analyzers;
        self
    }

    fn control(&self) -> &SyncControl {
        &self.shared.control
    }

    /// Run passes until stopped, idling in between. Closes the catalog on the way out.
    pub async fn run(mut self) {
        let interval = self.settings.rescan_interval();

        loop {
            match self.run_pass().await {
                PassOutcome::Restarted => continue,
                PassOutcome::Stopped => break,
                PassOutcome::Completed | PassOutcome::Failed(_) => {}
            }

            match self.shared.control.idle(interval).await {
                Wake::Stop => break,
                Wake::Restart => debug!("restart requested, starting pass"),
                Wake::Interval => debug!("rescan interval elapsed, starting pass"),
            }
        }

        self.catalog.close().await;
        info!("Indexer stopped");
    }

    /// Run one full pass. `SynchronizeStart` and `SynchronizeEnd` are emitted around it no matter
    /// how it ends.
    pub async fn run_pass(&mut self) -> PassOutcome {
        self.control().begin_pass();
        self.wrote = false;
        self.shared.events.emit(IndexerEvent::SynchronizeStart);
        let started = Instant::now();

        let outcome = match self.synchronize().await {
            Ok(()) => PassOutcome::Completed,
            Err(Abort::Interrupted(Interrupt::Restart)) => PassOutcome::Restarted,
            Err(Abort::Interrupted(Interrupt::Stop)) => PassOutcome::Stopped,
            Err(Abort::Catalog(e)) => {
                error!("Synchronization aborted, catalog unusable: {}", e);
                PassOutcome::Failed(e.to_string())
            }
        };

        let dropped = self.queue.clear();
        if dropped > 0 {
            debug!("discarded {} queued directives", dropped);
        }

        let progress = self.control().progress();
        self.control().end_pass(&outcome);
        info!(
            outcome = ?outcome,
            indexed = progress.files_indexed,
            saved = progress.files_saved,
            "Pass finished in {:.2} seconds",
            started.elapsed().as_secs_f32()
        );

        self.shared.events.emit(IndexerEvent::SynchronizeEnd);
        outcome
    }

    async fn synchronize(&mut self) -> Result<(), Abort> {
        self.apply_root_changes().await?;

        let roots: Vec<RootRecord> = self
            .catalog
            .roots()
            .await
            .map_err(Abort::Catalog)?
            .into_iter()
            .filter(|root| self.shared.registry.contains(&root.path))
            .collect();
        let root_paths: Vec<Utf8PathBuf> = roots.iter().map(|root| root.path.clone()).collect();

        self.control().enter_phase(Phase::Counting)?;
        let discovered = count_files(
            &root_paths,
            &self.readers,
            self.settings.follow_symlinks,
            &self.shared.control,
            |dir| root_paths.iter().any(|root| root == dir),
        )?;
        info!("Found {} indexable files under {} roots", discovered, roots.len());

        self.control().enter_phase(Phase::SyncDirectories)?;
        let mut walks = Vec::with_capacity(roots.len());
        let mut seen_files: FxHashSet<Utf8PathBuf> = FxHashSet::default();
        for (done, root) in roots.iter().enumerate() {
            let observation = self.sync_directory(root, &root_paths, &mut seen_files).await?;
            walks.push((root, observation));
            self.control().set_phase_progress(done as u64 + 1, roots.len() as u64);
        }

        self.control().enter_phase(Phase::SyncDelete)?;
        self.sync_delete(&walks, &seen_files);

        self.control().enter_phase(Phase::DrainQueue)?;
        self.process_queue().await?;

        self.control().enter_phase(Phase::Cleanup)?;
        self.sync_cleanup(&walks).await?;

        self.control().enter_phase(Phase::Optimize)?;
        // compacting rewrites the whole file, a pass that changed nothing leaves it be
        if self.settings.optimize
            && self.wrote
            && let Err(e) = self.catalog.optimize().await
        {
            warn!("Could not optimize catalog: {}", e);
        }

        self.control().enter_phase(Phase::Analyze)?;
        self.run_analyzers().await?;

        Ok(())
    }

    /// Write root changes made by the foreground since the last pass to the catalog.
    async fn apply_root_changes(&mut self) -> Result<(), Abort> {
        let mut changes = self.shared.registry.take_pending().into_iter();
        let mut retry = Vec::new();
        let mut applied = 0;

        while let Some(change) = changes.next() {
            let result = match &change {
                RootChange::Add(path) => self.catalog.insert_root(path).await.map(|_| ()),
                RootChange::Remove(path) => self.catalog.remove_root(path).await.map(|_| ()),
            };

            match result {
                Ok(()) => {
                    debug!("applied root change {:?}", change);
                    applied += 1;
                }
                Err(e) if e.is_fatal() => {
                    retry.push(change);
                    retry.extend(changes);
                    self.shared.registry.requeue(retry);
                    return Err(Abort::Catalog(e));
                }
                Err(e) => {
                    warn!("Could not apply root change {:?}, will retry: {}", change, e);
                    retry.push(change);
                }
            }
        }

        self.shared.registry.requeue(retry);

        if applied > 0 {
            self.wrote = true;
            self.shared.events.emit(IndexerEvent::PathsUpdated);
        }
        Ok(())
    }

    async fn directory_id(
        &mut self,
        root_id: i64,
        parent_id: Option<i64>,
        path: &Utf8Path,
    ) -> Result<i64, CatalogError> {
        match self.catalog.find_directory(root_id, path).await? {
            Some(id) => Ok(id),
            None => {
                debug!("new directory {}", path);
                let id = self.catalog.create_directory(root_id, parent_id, path).await?;
                self.wrote = true;
                Ok(id)
            }
        }
    }

    /// Walk one root, recording every directory in the catalog and queueing an `Add` for every
    /// accepted file that is new or changed.
    async fn sync_directory(
        &mut self,
        root: &RootRecord,
        root_paths: &[Utf8PathBuf],
        seen_files: &mut FxHashSet<Utf8PathBuf>,
    ) -> Result<Observation, Abort> {
        let mut observation = Observation::default();

        let Some(stamps) = tolerate(
            self.catalog.track_stamps(root.id).await,
            format_args!("Could not load tracks under {}", root.path),
        )?
        else {
            observation.shielded.push(root.path.clone());
            return Ok(observation);
        };
        observation.stamps = stamps;

        let mut visited: FxHashSet<PathBuf> = FxHashSet::default();
        let mut worklist: Vec<(Utf8PathBuf, Option<i64>)> = vec![(root.path.clone(), None)];

        while let Some((dir, parent_id)) = worklist.pop() {
            self.control().check()?;

            if !self.shared.registry.contains(&root.path) {
                debug!("root {} was unregistered mid-walk", root.path);
                observation.shielded.push(root.path.clone());
                break;
            }

            if !first_visit(&mut visited, &dir) {
                continue;
            }

            let listing = match list_directory(&dir, self.settings.follow_symlinks) {
                Ok(listing) => listing,
                Err(e) => {
                    warn!("Failed to read directory {}: {:?}", dir, e);
                    observation.shielded.push(dir);
                    continue;
                }
            };

            let recorded = tolerate(
                self.directory_id(root.id, parent_id, &dir).await,
                format_args!("Could not record directory {}", dir),
            )?;
            let Some(directory_id) = recorded else {
                observation.shielded.push(dir);
                continue;
            };
            observation.directories.insert(directory_id);

            for file in listing.files {
                if !is_indexable(&file.path, &self.readers) {
                    continue;
                }

                seen_files.insert(file.path.clone());

                if observation
                    .stamps
                    .get(&file.path)
                    .is_some_and(|stamp| stamp.modified == file.modified)
                {
                    continue;
                }

                if self.failed.get(&file.path) == Some(&file.modified) {
                    continue;
                }

                self.queue.enqueue(Directive::Add {
                    path: file.path,
                    directory_id,
                    modified: file.modified,
                    file_size: file.size,
                });
            }

            for sub in listing.directories.into_iter().rev() {
                // a nested root is walked on its own
                if root_paths.contains(&sub) {
                    continue;
                }
                worklist.push((sub, Some(directory_id)));
            }
        }

        Ok(observation)
    }

    /// Queue a `Remove` for every catalog track that no walk saw on disk.
    fn sync_delete(
        &mut self,
        walks: &[(&RootRecord, Observation)],
        seen_files: &FxHashSet<Utf8PathBuf>,
    ) {
        for (root, observation) in walks {
            let mut gone: Vec<&Utf8PathBuf> = observation
                .stamps
                .keys()
                .filter(|path| !seen_files.contains(*path) && !observation.is_shielded(path))
                .collect();
            gone.sort();

            if !gone.is_empty() {
                debug!("{} tracks under {} are gone", gone.len(), root.path);
            }

            for path in gone {
                self.queue.enqueue(Directive::Remove { path: path.clone() });
            }

            self.failed.retain(|path, _| {
                !path.starts_with(&root.path)
                    || seen_files.contains(path)
                    || observation.is_shielded(path)
            });
        }

        // memo entries of roots that are no longer registered
        self.failed
            .retain(|path, _| walks.iter().any(|(root, _)| path.starts_with(&root.path)));
    }

    async fn process_queue(&mut self) -> Result<(), Abort> {
        let total = self.queue.len() as u64;
        let mut done = 0;

        while let Some(directive) = self.queue.pop() {
            self.control().check()?;

            match directive {
                Directive::Add {
                    path,
                    directory_id,
                    modified,
                    file_size,
                } => {
                    self.index_file(path, directory_id, modified, file_size)
                        .await?
                }
                Directive::Remove { path } => {
                    if let Some(true) = tolerate(
                        self.catalog.delete_track(&path).await,
                        format_args!("Could not remove track {}", path),
                    )? {
                        debug!("removed track {}", path);
                        self.wrote = true;
                    }
                }
            }

            done += 1;
            self.control().set_phase_progress(done, total);
        }

        Ok(())
    }

    async fn index_file(
        &mut self,
        path: Utf8PathBuf,
        directory_id: i64,
        modified: i64,
        file_size: u64,
    ) -> Result<(), Abort> {
        let Some(reader) = self.readers.iter_mut().find(|reader| reader.accepts(&path)) else {
            debug!("no reader accepts {}", path);
            return Ok(());
        };

        let metadata = match reader.extract(&path) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Could not read metadata for file {}: {}", path, e);
                self.control().record_indexed(false);

                // a record from an older version of the file would now be stale
                let deleted = tolerate(
                    self.catalog.delete_track(&path).await,
                    format_args!("Could not remove stale track {}", path),
                )?;
                if deleted == Some(true) {
                    debug!("removed stale track {}", path);
                    self.wrote = true;
                }
                self.failed.insert(path, modified);
                return Ok(());
            }
        };
        self.failed.remove(&path);

        let track = NewTrack {
            path: &path,
            directory_id,
            modified,
            file_size,
            metadata: &metadata,
        };

        match self.catalog.upsert_track(track).await {
            Ok(outcome) => {
                self.control().record_indexed(true);
                self.wrote = true;
                if let UpsertOutcome::Updated(id) = outcome {
                    debug!("refreshed track {} ({})", id, path);
                    self.shared.events.emit(IndexerEvent::TrackRefreshed);
                }
                Ok(())
            }
            Err(e) => {
                self.control().record_indexed(false);
                if e.is_fatal() {
                    return Err(Abort::Catalog(e));
                }
                error!("Failed to save track {}: {}", path, e);
                Ok(())
            }
        }
    }

    /// Delete directory records that were not observed and hold nothing, deepest first, until a
    /// round removes nothing.
    async fn sync_cleanup(&mut self, walks: &[(&RootRecord, Observation)]) -> Result<(), Abort> {
        for (done, (root, observation)) in walks.iter().enumerate() {
            self.control().check()?;

            let Some(directories) = tolerate(
                self.catalog.directories(root.id).await,
                format_args!("Could not list directories under {}", root.path),
            )?
            else {
                continue;
            };

            let mut candidates: Vec<_> = directories
                .into_iter()
                .filter(|dir| {
                    !observation.directories.contains(&dir.id)
                        && !observation.is_shielded(&dir.path)
                })
                .collect();
            candidates.sort_by_key(|dir| std::cmp::Reverse(dir.path.components().count()));

            loop {
                let mut kept = Vec::with_capacity(candidates.len());
                let before = candidates.len();

                for dir in candidates {
                    let deleted = tolerate(
                        self.catalog.delete_empty_directory(dir.id).await,
                        format_args!("Could not delete directory {}", dir.path),
                    )?;
                    if deleted == Some(true) {
                        debug!("removed directory {}", dir.path);
                        self.wrote = true;
                    } else {
                        kept.push(dir);
                    }
                }

                candidates = kept;
                if candidates.is_empty() || candidates.len() == before {
                    break;
                }
            }

            self.control()
                .set_phase_progress(done as u64 + 1, walks.len() as u64);
        }

        Ok(())
    }

    async fn run_analyzers(&mut self) -> Result<(), Abort> {
        let total = self.analyzers.len() as u64;

        for index in 0..self.analyzers.len() {
            let name = self.analyzers[index].name().to_owned();

            let Some(tracks) = tolerate(
                self.catalog.tracks_missing_analysis(&name).await,
                format_args!("Could not load tracks for analyzer {}", name),
            )?
            else {
                continue;
            };

            if !tracks.is_empty() {
                info!("Running analyzer {} over {} tracks", name, tracks.len());
            }

            for track in tracks {
                self.control().check()?;

                let value = match self.analyzers[index].analyze(&track) {
                    Ok(Some(value)) => value,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("Analyzer {} failed on {}: {:?}", name, track.path, e);
                        continue;
                    }
                };

                if tolerate(
                    self.catalog.store_analysis(track.id, &name, value).await,
                    format_args!("Could not store {} for {}", name, track.path),
                )?
                .is_some()
                {
                    self.shared.events.emit(IndexerEvent::TrackRefreshed);
                }
            }

            self.control().set_phase_progress(index as u64 + 1, total);
        }

        Ok(())
    }
}
