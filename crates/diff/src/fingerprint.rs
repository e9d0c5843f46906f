use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use quire_doc_model::{DocumentModel, PageRef, PageUid, Rotation, SourceId};

/// Longest text excerpt kept for pairwise similarity scoring.
const EXCERPT_CHARS: usize = 240;

/// Everything the diff engine knows about one page.
///
/// A bare fingerprint carries the page identity only. Callers that
/// have extracted text or a rendered image attach them through the
/// builder methods, which unlocks content-based matching across
/// documents that were loaded from different sources.
#[derive(Debug, Clone, PartialEq)]
pub struct PageFingerprint {
    pub(crate) uid: PageUid,
    pub(crate) source_id: SourceId,
    pub(crate) source_page_index: u32,
    pub(crate) rotation: Rotation,
    pub(crate) text_digest: Option<u64>,
    pub(crate) text_excerpt: Option<String>,
    pub(crate) visual_hash: Option<u64>,
}

impl PageFingerprint {
    pub fn new(page: &PageRef) -> Self {
        Self {
            uid: page.uid(),
            source_id: page.source_id(),
            source_page_index: page.source_page_index(),
            rotation: page.rotation(),
            text_digest: None,
            text_excerpt: None,
            visual_hash: None,
        }
    }

    /// Attaches extracted text. Blank text leaves the fingerprint bare.
    pub fn with_text(mut self, text: &str) -> Self {
        let normalized = normalize_text(text);
        if !normalized.is_empty() {
            self.text_digest = Some(digest_text(&normalized));
            self.text_excerpt = Some(normalized.chars().take(EXCERPT_CHARS).collect());
        }
        self
    }

    /// Attaches an [`average_hash`](crate::average_hash) of the page as displayed.
    pub fn with_visual_hash(mut self, hash: u64) -> Self {
        self.visual_hash = Some(hash);
        self
    }

    pub fn uid(&self) -> PageUid {
        self.uid
    }

    /// True when both fingerprints provably show the same content.
    pub(crate) fn same_display(&self, other: &Self) -> bool {
        self.source_id == other.source_id
            && self.source_page_index == other.source_page_index
            && self.rotation == other.rotation
    }

    /// True when both point at the same stored page, rotated or not.
    pub(crate) fn same_source_page(&self, other: &Self) -> bool {
        self.source_id == other.source_id && self.source_page_index == other.source_page_index
    }

    /// Key the sequence alignment runs over. Text wins over the visual
    /// hash, which wins over raw page identity, so two documents loaded
    /// from separate files can still line up on matching content.
    pub(crate) fn align_key(&self) -> AlignKey {
        if let Some(digest) = self.text_digest {
            return AlignKey::Text(digest, self.rotation);
        }
        if let Some(hash) = self.visual_hash {
            return AlignKey::Visual(hash);
        }
        AlignKey::Identity(self.source_id, self.source_page_index, self.rotation)
    }
}

/// Bare fingerprints for every page of a model, in display order.
pub fn fingerprint_pages(model: &DocumentModel) -> Vec<PageFingerprint> {
    model.pages().iter().map(PageFingerprint::new).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum AlignKey {
    Text(u64, Rotation),
    Visual(u64),
    Identity(SourceId, u32, Rotation),
}

/// Lowercases and collapses whitespace so digests ignore layout noise.
fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn digest_text(normalized: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    normalized.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(source: u64, index: u32) -> PageRef {
        PageRef::new(SourceId(source), index)
    }

    #[test]
    fn matching_text_produces_matching_keys_across_sources() {
        let left = PageFingerprint::new(&page(1, 0)).with_text("Quarterly  Report\n2026");
        let right = PageFingerprint::new(&page(2, 5)).with_text("quarterly report 2026");
        assert_eq!(left.align_key(), right.align_key());
    }

    #[test]
    fn blank_text_falls_back_to_identity() {
        let source = page(3, 1);
        let bare = PageFingerprint::new(&source);
        let blank = PageFingerprint::new(&source).with_text("  \n\t ");
        assert_eq!(blank.align_key(), bare.align_key());
    }

    #[test]
    fn rotation_distinguishes_text_keys() {
        let source = page(1, 0);
        let upright = PageFingerprint::new(&source).with_text("same words");
        let turned = PageFingerprint::new(&source.with_rotation(Rotation::R90)).with_text("same words");
        assert_ne!(upright.align_key(), turned.align_key());
        assert!(upright.same_source_page(&turned));
        assert!(!upright.same_display(&turned));
    }

    #[test]
    fn visual_hash_outranks_identity() {
        let left = PageFingerprint::new(&page(1, 0)).with_visual_hash(0xF0F0);
        let right = PageFingerprint::new(&page(2, 9)).with_visual_hash(0xF0F0);
        assert_eq!(left.align_key(), right.align_key());
    }

    #[test]
    fn excerpt_is_capped() {
        let long = "word ".repeat(200);
        let fingerprint = PageFingerprint::new(&page(1, 0)).with_text(&long);
        let excerpt = fingerprint.text_excerpt.as_deref().unwrap();
        assert_eq!(excerpt.chars().count(), EXCERPT_CHARS);
    }
}
