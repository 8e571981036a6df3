use std::{fs::exists, time::Duration};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanSettings {
    /// Compact the catalog at the end of every pass.
    #[serde(default = "default_true")]
    pub optimize: bool,
    /// Start a new pass this many seconds after the last one ended. `None` or `0` disables
    /// periodic rescans.
    #[serde(default)]
    pub rescan_interval_secs: Option<u64>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            optimize: true,
            rescan_interval_secs: None,
            follow_symlinks: false,
        }
    }
}

impl ScanSettings {
    pub fn rescan_interval(&self) -> Option<Duration> {
        self.rescan_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// The user's music directory, if there is one, used when no root is given on the command line.
pub fn default_music_dir() -> Option<Utf8PathBuf> {
    let Some(user_directories) = directories::UserDirs::new() else {
        error!("Couldn't find your home directory.");
        warn!("Please create a home directory for this user.");
        return None;
    };

    let dir = match user_directories.audio_dir() {
        Some(dir) => dir.to_path_buf(),
        None => {
            warn!("Music directory couldn't be discovered normally, using $HOME/Music.");
            user_directories.home_dir().join("Music")
        }
    };

    if !exists(&dir).unwrap_or(false) {
        warn!("Music directory {:?} doesn't exist.", dir);
        return None;
    }

    match Utf8PathBuf::from_path_buf(dir) {
        Ok(path) => Some(path),
        Err(dir) => {
            warn!("Music directory {:?} is not UTF-8.", dir);
            None
        }
    }
}
