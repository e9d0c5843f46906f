use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of an originating source document. Pages arranged after a merge
/// keep pointing at the source they were loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId(pub u64);

/// Stable synthetic identity of one displayed page. Survives reorder,
/// rotation, and selection changes; never reused within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageUid(Uuid);

impl PageUid {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PageUid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PageUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Display rotation in quarter turns, applied at render time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    R0,
    R90,
    R180,
    R270,
}

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::R0 => 0,
            Rotation::R90 => 90,
            Rotation::R180 => 180,
            Rotation::R270 => 270,
        }
    }

    /// Normalizes any multiple of 90 (including negatives) into a rotation.
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        if degrees % 90 != 0 {
            return None;
        }

        Some(match degrees.rem_euclid(360) {
            0 => Rotation::R0,
            90 => Rotation::R90,
            180 => Rotation::R180,
            _ => Rotation::R270,
        })
    }

    /// Adds another rotation, modulo a full turn.
    pub fn compose(self, delta: Rotation) -> Rotation {
        match (self.degrees() + delta.degrees()) % 360 {
            0 => Rotation::R0,
            90 => Rotation::R90,
            180 => Rotation::R180,
            _ => Rotation::R270,
        }
    }

    /// True when the rotation swaps page width and height.
    pub fn is_quarter_turn(self) -> bool {
        matches!(self, Rotation::R90 | Rotation::R270)
    }
}

/// Handle for one displayed page: where it came from, how it is rotated, and
/// a stable uid distinct from its position in the working set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRef {
    source_id: SourceId,
    source_page_index: u32,
    rotation: Rotation,
    uid: PageUid,
}

impl PageRef {
    pub fn new(source_id: SourceId, source_page_index: u32) -> Self {
        Self { source_id, source_page_index, rotation: Rotation::R0, uid: PageUid::new() }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn source_id(&self) -> SourceId {
        self.source_id
    }

    pub fn source_page_index(&self) -> u32 {
        self.source_page_index
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn uid(&self) -> PageUid {
        self.uid
    }

    /// Copy of this page with a fresh uid. Used by duplicate and insert_from;
    /// the underlying source reference and rotation carry over.
    pub fn duplicate_of(&self) -> Self {
        Self { uid: PageUid::new(), ..*self }
    }

    /// Equality ignoring uid: same source page at the same rotation.
    pub fn same_content(&self, other: &PageRef) -> bool {
        self.source_id == other.source_id
            && self.source_page_index == other.source_page_index
            && self.rotation == other.rotation
    }

    pub(crate) fn set_rotation(&mut self, rotation: Rotation) {
        self.rotation = rotation;
    }
}
