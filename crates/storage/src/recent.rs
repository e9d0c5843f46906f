use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Most entries kept in the recently-opened list.
pub const RECENT_FILES_CAP: usize = 10;

/// Most-recently-used list of opened documents.
///
/// Recording a path moves it to the front, duplicates are collapsed,
/// and the list never grows past [`RECENT_FILES_CAP`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecentFiles {
    entries: Vec<PathBuf>,
}

impl RecentFiles {
    pub fn record(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.entries.retain(|entry| entry != &path);
        self.entries.insert(0, path);
        self.entries.truncate(RECENT_FILES_CAP);
    }

    pub fn remove(&mut self, path: &Path) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry != path);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drops entries whose file no longer exists on disk.
    pub fn retain_existing(&mut self) {
        self.entries.retain(|entry| entry.exists());
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
