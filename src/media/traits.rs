use camino::Utf8Path;

use crate::media::{errors::ExtractError, metadata::Metadata};

/// A pluggable source of track metadata.
///
/// The indexer keeps an ordered list of readers and offers each eligible file to the first one
/// whose [`MetadataReader::accepts`] returns true. Readers run on the indexer's worker thread, one
/// file at a time.
pub trait MetadataReader: Send {
    /// Whether this reader is able to handle the file at `path`. This is called for every file
    /// during traversal and must not touch the file contents.
    fn accepts(&self, path: &Utf8Path) -> bool;

    /// Extract metadata from the file at `path`.
    fn extract(&mut self, path: &Utf8Path) -> Result<Metadata, ExtractError>;
}

/// Case-insensitive extension check shared by extension-driven readers.
pub fn has_extension(path: &Utf8Path, exts: &[&str]) -> bool {
    let Some(ext) = path.extension() else {
        return false;
    };

    exts.iter().any(|candidate| candidate.eq_ignore_ascii_case(ext))
}
