use std::{fs, io, path::PathBuf, time::UNIX_EPOCH};

use camino::{Utf8Path, Utf8PathBuf};
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::{
    library::scan::progress::{Interrupt, SyncControl},
    media::traits::MetadataReader,
};

/// A regular file seen during traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: Utf8PathBuf,
    /// Modification time, unix milliseconds.
    pub modified: i64,
    pub size: u64,
}

#[derive(Debug, Default)]
pub struct Listing {
    pub files: Vec<FileEntry>,
    pub directories: Vec<Utf8PathBuf>,
}

pub fn modified_millis(metadata: &fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .and_then(|d| i64::try_from(d.as_millis()).ok())
        .unwrap_or(0)
}

/// Whether any reader is able to handle the file.
pub fn is_indexable(path: &Utf8Path, readers: &[Box<dyn MetadataReader>]) -> bool {
    readers.iter().any(|reader| reader.accepts(path))
}

/// Record `dir` as visited. Returns false if it (or whatever it resolves to through symlinks)
/// has been visited already.
pub fn first_visit(visited: &mut FxHashSet<PathBuf>, dir: &Utf8Path) -> bool {
    let key = dir
        .as_std_path()
        .canonicalize()
        .unwrap_or_else(|_| dir.as_std_path().to_path_buf());
    visited.insert(key)
}

/// List the immediate children of `dir`, sorted by path.
///
/// Entries that cannot be inspected are logged and left out. Symlinks are resolved only when
/// `follow_symlinks` is set.
pub fn list_directory(dir: &Utf8Path, follow_symlinks: bool) -> io::Result<Listing> {
    let mut listing = Listing::default();

    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Failed to read directory entry in {}: {:?}", dir, e);
                continue;
            }
        };

        let path = match Utf8PathBuf::try_from(entry.path()) {
            Ok(path) => path,
            Err(e) => {
                warn!("Skipping non UTF-8 path {:?}", e.into_path_buf());
                continue;
            }
        };

        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(e) => {
                warn!("Failed to get file type of {}: {:?}", path, e);
                continue;
            }
        };

        if file_type.is_symlink() && !follow_symlinks {
            debug!("not following symlink {}", path);
            continue;
        }

        // follows symlinks, which were filtered above if unwanted
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Failed to read metadata for {}: {:?}", path, e);
                continue;
            }
        };

        if metadata.is_dir() {
            listing.directories.push(path);
        } else if metadata.is_file() {
            listing.files.push(FileEntry {
                modified: modified_millis(&metadata),
                size: metadata.len(),
                path,
            });
        }
    }

    listing.files.sort_by(|a, b| a.path.cmp(&b.path));
    listing.directories.sort();

    Ok(listing)
}

/// Walk every root and count the files some reader accepts.
///
/// `skip` is consulted for every subdirectory, so nested roots are not counted twice. The
/// running total is published to `control` after each directory.
pub fn count_files(
    roots: &[Utf8PathBuf],
    readers: &[Box<dyn MetadataReader>],
    follow_symlinks: bool,
    control: &SyncControl,
    skip: impl Fn(&Utf8Path) -> bool,
) -> Result<u64, Interrupt> {
    let mut visited: FxHashSet<PathBuf> = FxHashSet::default();
    let mut stack: Vec<Utf8PathBuf> = roots.iter().rev().cloned().collect();
    let mut total: u64 = 0;

    while let Some(dir) = stack.pop() {
        control.check()?;

        if !first_visit(&mut visited, &dir) {
            continue;
        }

        let listing = match list_directory(&dir, follow_symlinks) {
            Ok(listing) => listing,
            Err(e) => {
                warn!("Failed to read directory {}: {:?}", dir, e);
                continue;
            }
        };

        total += listing
            .files
            .iter()
            .filter(|file| is_indexable(&file.path, readers))
            .count() as u64;

        stack.extend(
            listing
                .directories
                .into_iter()
                .rev()
                .filter(|sub| !skip(sub)),
        );

        control.set_discovered(total);
    }

    Ok(total)
}
