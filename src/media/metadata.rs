use serde::{Deserialize, Serialize};

/// Tag and stream information extracted from a media file.
///
/// Every field is optional: readers fill in whatever the container exposes, and the catalog
/// stores the rest as NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: Option<String>,
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub composer: Option<String>,
    pub genre: Option<String>,

    pub track_current: Option<u64>,
    pub track_max: Option<u64>,
    pub disc_current: Option<u64>,
    pub disc_max: Option<u64>,
    /// Set when the track number was written vinyl-style ("A1", "B3"); the side is then stored
    /// as the disc number.
    pub vinyl_numbering: bool,

    pub year: Option<i32>,
    pub duration_secs: Option<u64>,
}
