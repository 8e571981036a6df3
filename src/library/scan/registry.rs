use std::sync::{Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexSet;
use tracing::debug;

/// A root change made by the foreground that the catalog has not seen yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootChange {
    Add(Utf8PathBuf),
    Remove(Utf8PathBuf),
}

#[derive(Debug, Default)]
struct Roots {
    paths: IndexSet<Utf8PathBuf>,
    pending: Vec<RootChange>,
}

/// The roots the indexer scans, in registration order.
///
/// The in-memory set is authoritative for the foreground and for an in-flight pass (a removed
/// root stops being walked at the next directory). The catalog copy is brought up to date by the
/// worker, which applies [`RootChange`]s at the start of each pass.
#[derive(Debug, Default)]
pub struct PathRegistry {
    roots: Mutex<Roots>,
}

/// Canonicalize `path` if it exists, otherwise make it absolute against the working directory
/// and drop trailing separators, so the same directory is not registered twice under different
/// spellings.
pub fn normalize_root(path: &Utf8Path) -> Utf8PathBuf {
    if let Ok(canonical) = path.canonicalize_utf8() {
        return canonical;
    }

    let absolute = std::path::absolute(path)
        .ok()
        .and_then(|absolute| Utf8PathBuf::from_path_buf(absolute).ok())
        .unwrap_or_else(|| path.to_path_buf());

    let trimmed = absolute.as_str().trim_end_matches(['/', '\\']);
    if trimmed.is_empty() {
        absolute
    } else {
        Utf8PathBuf::from(trimmed)
    }
}

impl PathRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Roots> {
        self.roots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merge roots loaded from the catalog ahead of anything registered before startup.
    pub fn seed(&self, persisted: impl IntoIterator<Item = Utf8PathBuf>) {
        let mut roots = self.lock();
        let mut merged: IndexSet<Utf8PathBuf> = persisted.into_iter().collect();
        // a root removed before startup must stay removed
        for change in &roots.pending {
            if let RootChange::Remove(path) = change {
                merged.shift_remove(path);
            }
        }
        merged.extend(roots.paths.drain(..));
        roots.paths = merged;
    }

    /// Returns false if the root was already registered.
    pub fn add(&self, path: &Utf8Path) -> bool {
        let path = normalize_root(path);
        let mut roots = self.lock();
        if !roots.paths.insert(path.clone()) {
            return false;
        }
        debug!("registered root {}", path);
        roots.pending.push(RootChange::Add(path));
        true
    }

    /// Returns false if the root was not registered.
    pub fn remove(&self, path: &Utf8Path) -> bool {
        let mut roots = self.lock();
        let path = if roots.paths.contains(path) {
            path.to_path_buf()
        } else {
            normalize_root(path)
        };
        if !roots.paths.shift_remove(&path) {
            return false;
        }
        debug!("unregistered root {}", path);
        roots.pending.push(RootChange::Remove(path));
        true
    }

    pub fn contains(&self, path: &Utf8Path) -> bool {
        self.lock().paths.contains(path)
    }

    pub fn paths(&self) -> Vec<Utf8PathBuf> {
        self.lock().paths.iter().cloned().collect()
    }

    pub fn take_pending(&self) -> Vec<RootChange> {
        std::mem::take(&mut self.lock().pending)
    }

    /// Put back changes that could not be written, ahead of anything queued since.
    pub fn requeue(&self, changes: Vec<RootChange>) {
        if changes.is_empty() {
            return;
        }
        let mut roots = self.lock();
        let newer = std::mem::replace(&mut roots.pending, changes);
        roots.pending.extend(newer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_roots_are_ignored() {
        let registry = PathRegistry::new();
        assert!(registry.add(Utf8Path::new("/nonexistent/music")));
        assert!(!registry.add(Utf8Path::new("/nonexistent/music/")));

        assert_eq!(registry.paths(), vec![Utf8PathBuf::from("/nonexistent/music")]);
        assert_eq!(registry.take_pending().len(), 1);
    }

    #[test]
    fn missing_relative_roots_are_made_absolute() {
        let root = normalize_root(Utf8Path::new("kestrel-missing-root/"));
        assert!(root.is_absolute());
        assert_eq!(root.file_name(), Some("kestrel-missing-root"));
        assert!(!root.as_str().ends_with('/'));

        let registry = PathRegistry::new();
        assert!(registry.add(Utf8Path::new("kestrel-missing-root")));
        assert!(!registry.add(Utf8Path::new("kestrel-missing-root/")));
        assert!(registry.paths()[0].is_absolute());
    }

    #[test]
    fn paths_is_a_snapshot() {
        let registry = PathRegistry::new();
        registry.add(Utf8Path::new("/nonexistent/a"));
        let snapshot = registry.paths();
        registry.add(Utf8Path::new("/nonexistent/b"));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.paths().len(), 2);
    }

    #[test]
    fn changes_are_recorded_in_order() {
        let registry = PathRegistry::new();
        registry.add(Utf8Path::new("/nonexistent/a"));
        assert!(registry.remove(Utf8Path::new("/nonexistent/a")));
        assert!(!registry.remove(Utf8Path::new("/nonexistent/a")));

        assert_eq!(
            registry.take_pending(),
            vec![
                RootChange::Add("/nonexistent/a".into()),
                RootChange::Remove("/nonexistent/a".into()),
            ]
        );
        assert!(registry.take_pending().is_empty());
    }

    #[test]
    fn seeding_keeps_catalog_order_and_pending_removals() {
        let registry = PathRegistry::new();
        registry.add(Utf8Path::new("/nonexistent/new"));
        registry.remove(Utf8Path::new("/nonexistent/new"));
        registry.add(Utf8Path::new("/nonexistent/extra"));

        // simulate a removal of a persisted root made before startup
        registry.requeue(vec![RootChange::Remove("/nonexistent/old".into())]);

        registry.seed(vec![
            Utf8PathBuf::from("/nonexistent/old"),
            Utf8PathBuf::from("/nonexistent/kept"),
        ]);

        assert_eq!(
            registry.paths(),
            vec![
                Utf8PathBuf::from("/nonexistent/kept"),
                Utf8PathBuf::from("/nonexistent/extra"),
            ]
        );
        assert_eq!(registry.take_pending()[0], RootChange::Remove("/nonexistent/old".into()));
    }
}
