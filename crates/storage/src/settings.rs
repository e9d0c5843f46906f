use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PREVIEW_DPI: u32 = 150;

/// User-tunable knobs read at startup. Nothing on the editing path
/// consults these directly; callers pass the values they need down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Resolution used for preview renders.
    pub preview_dpi: u32,
    /// External PDF toolkit binary, when one is installed.
    pub toolkit_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self { preview_dpi: DEFAULT_PREVIEW_DPI, toolkit_path: None }
    }
}

impl Settings {
    pub fn with_preview_dpi(mut self, dpi: u32) -> Self {
        self.preview_dpi = dpi.max(1);
        self
    }

    pub fn with_toolkit_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.toolkit_path = Some(path.into());
        self
    }
}
