use std::fs;

use camino::Utf8PathBuf;

use crate::settings::Settings;

#[derive(Debug, Clone)]
pub struct SettingsStorage {
    /// File path to store settings
    path: Utf8PathBuf,
}

impl SettingsStorage {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Save `Settings` on the file system
    pub fn save(&self, settings: &Settings) {
        if let Some(parent) = self.path.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            tracing::warn!("could not create settings directory {}: {:?}", parent, e);
            return;
        }

        let result = fs::File::create(&self.path)
            .and_then(|file| serde_json::to_writer_pretty(file, settings).map_err(|e| e.into()));
        // ignore error, but log it
        if let Err(e) = result {
            tracing::warn!("could not save settings to {}: {:?}", self.path, e);
        };
    }

    /// Load `Settings` from storage or use `Settings::default` in case of any errors
    pub fn load_or_default(&self) -> Settings {
        fs::File::open(&self.path)
            .and_then(|file| serde_json::from_reader(file).map_err(|e| e.into()))
            .unwrap_or_else(|e: std::io::Error| {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("could not load settings from {}, using defaults: {:?}", self.path, e);
                }
                Settings::default()
            })
    }
}
