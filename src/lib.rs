//! Keeps a catalog of audio tracks in sync with a set of directories on disk.

pub mod library;
pub mod media;
pub mod settings;

pub use library::{
    catalog::{Catalog, CatalogError, sqlite::SqliteCatalog},
    scan::{
        Indexer, IndexerError,
        events::{IndexerEvent, SubscriptionId},
        progress::{IndexerStatus, Progress, RunState},
    },
};
