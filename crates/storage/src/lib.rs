//! On-disk persistence for settings and the recently-opened list.

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

mod recent;
mod settings;

pub use recent::{RecentFiles, RECENT_FILES_CAP};
pub use settings::{Settings, DEFAULT_PREVIEW_DPI};

const SETTINGS_SCHEMA_VERSION: u32 = 1;
const RECENT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unable to resolve local data directory")]
    NoDataDirectory,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SettingsEnvelope {
    version: u32,
    settings: Settings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecentEnvelope {
    version: u32,
    recent: RecentFiles,
}

impl Storage {
    pub fn from_default_project() -> Result<Self, StorageError> {
        let dirs =
            ProjectDirs::from("dev", "Quire", "Quire").ok_or(StorageError::NoDataDirectory)?;

        Ok(Self { root: dirs.data_local_dir().to_path_buf() })
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn load_settings(&self) -> Result<Settings, StorageError> {
        let path = self.settings_path();
        if !path.exists() {
            return Ok(Settings::default());
        }

        let bytes = fs::read(path)?;
        let envelope: SettingsEnvelope = serde_json::from_slice(&bytes)?;

        Ok(envelope.settings)
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)?;

        let envelope =
            SettingsEnvelope { version: SETTINGS_SCHEMA_VERSION, settings: settings.clone() };

        let bytes = serde_json::to_vec_pretty(&envelope)?;
        fs::write(self.settings_path(), bytes)?;
        Ok(())
    }

    /// Loads the recently-opened list, dropping entries whose file has
    /// vanished since the list was saved.
    pub fn load_recent_files(&self) -> Result<RecentFiles, StorageError> {
        let path = self.recent_files_path();
        if !path.exists() {
            return Ok(RecentFiles::default());
        }

        let bytes = fs::read(path)?;
        let envelope: RecentEnvelope = serde_json::from_slice(&bytes)?;

        let mut recent = envelope.recent;
        recent.retain_existing();
        Ok(recent)
    }

    pub fn save_recent_files(&self, recent: &RecentFiles) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)?;

        let envelope = RecentEnvelope { version: RECENT_SCHEMA_VERSION, recent: recent.clone() };

        let bytes = serde_json::to_vec_pretty(&envelope)?;
        fs::write(self.recent_files_path(), bytes)?;
        Ok(())
    }

    fn settings_path(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    fn recent_files_path(&self) -> PathBuf {
        self.root.join("recent_files.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_round_trip() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let store = Storage::with_root(temp.path());

        let settings = Settings::default().with_preview_dpi(300).with_toolkit_path("/opt/qpdf");

        store.save_settings(&settings).expect("save should succeed");
        let loaded = store.load_settings().expect("load should succeed");

        assert_eq!(loaded, settings);
    }

    #[test]
    fn load_defaults_when_files_absent() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let store = Storage::with_root(temp.path());

        assert_eq!(store.load_settings().expect("load should succeed"), Settings::default());
        assert!(store.load_recent_files().expect("load should succeed").is_empty());
    }

    #[test]
    fn recent_files_round_trip_keeps_order() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let store = Storage::with_root(temp.path());

        let first = temp.path().join("first.pdf");
        let second = temp.path().join("second.pdf");
        fs::write(&first, b"%PDF-1.7").expect("fixture should be written");
        fs::write(&second, b"%PDF-1.7").expect("fixture should be written");

        let mut recent = RecentFiles::default();
        recent.record(&first);
        recent.record(&second);

        store.save_recent_files(&recent).expect("save should succeed");
        let loaded = store.load_recent_files().expect("load should succeed");

        let order: Vec<_> = loaded.iter().collect();
        assert_eq!(order, vec![second.as_path(), first.as_path()]);
    }

    #[test]
    fn vanished_files_are_dropped_on_load() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let store = Storage::with_root(temp.path());

        let kept = temp.path().join("kept.pdf");
        fs::write(&kept, b"%PDF-1.7").expect("fixture should be written");

        let mut recent = RecentFiles::default();
        recent.record(temp.path().join("deleted.pdf"));
        recent.record(&kept);

        store.save_recent_files(&recent).expect("save should succeed");
        let loaded = store.load_recent_files().expect("load should succeed");

        let order: Vec<_> = loaded.iter().collect();
        assert_eq!(order, vec![kept.as_path()]);
    }
}
