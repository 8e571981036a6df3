pub mod scan;
pub mod storage;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::settings::scan::ScanSettings;

pub const CATALOG_FILE: &str = "library.db";
pub const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    #[serde(default)]
    pub scanning: ScanSettings,
}

pub fn get_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "kestrel", "kestrel")
}

/// Where the catalog lives unless told otherwise: the platform data directory.
pub fn default_data_dir() -> Option<Utf8PathBuf> {
    let dirs = get_dirs()?;
    Utf8PathBuf::from_path_buf(dirs.data_dir().to_path_buf()).ok()
}
