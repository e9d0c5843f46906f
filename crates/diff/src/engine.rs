use serde::{Deserialize, Serialize};
use similar::{capture_diff_slices, Algorithm, DiffOp};
use tracing::debug;

use quire_doc_model::PageUid;

use crate::fingerprint::PageFingerprint;
use crate::hash::hamming_distance;

/// Thresholds for deciding when two aligned pages count as modified
/// rather than as a removal plus an addition.
#[derive(Debug, Clone, Copy)]
pub struct DiffConfig {
    /// Minimum normalized text similarity, in `0.0..=1.0`.
    pub modified_threshold: f64,
    /// Maximum hamming distance between average hashes, in `0..=64`.
    pub max_hash_distance: u32,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self { modified_threshold: 0.55, max_hash_distance: 10 }
    }
}

impl DiffConfig {
    pub fn with_modified_threshold(mut self, threshold: f64) -> Self {
        self.modified_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_hash_distance(mut self, distance: u32) -> Self {
        self.max_hash_distance = distance.min(64);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Unchanged,
    Added,
    Removed,
    Modified,
}

/// One row of the comparison. Unchanged and modified rows carry a page
/// from each side, added rows only a right page, removed rows only a
/// left page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDiff {
    pub left: Option<PageUid>,
    pub right: Option<PageUid>,
    pub status: PageStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub unchanged: usize,
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    pub pages: Vec<PageDiff>,
    pub summary: DiffSummary,
}

impl DiffResult {
    pub fn is_identical(&self) -> bool {
        self.summary.added == 0 && self.summary.removed == 0 && self.summary.modified == 0
    }
}

/// Aligns two page sequences and classifies every page.
///
/// Alignment runs a Myers diff over per-page keys, so runs of matching
/// pages pair up with the earliest possible counterpart. Replaced runs
/// are then re-examined pairwise with [`DiffConfig`] thresholds to
/// separate edited pages from genuine removals and additions.
#[derive(Debug, Default)]
pub struct DiffEngine {
    config: DiffConfig,
}

impl DiffEngine {
    pub fn new(config: DiffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiffConfig {
        &self.config
    }

    pub fn compare(&self, left: &[PageFingerprint], right: &[PageFingerprint]) -> DiffResult {
        let left_keys: Vec<_> = left.iter().map(PageFingerprint::align_key).collect();
        let right_keys: Vec<_> = right.iter().map(PageFingerprint::align_key).collect();

        let mut pages = Vec::with_capacity(left.len().max(right.len()));
        for op in capture_diff_slices(Algorithm::Myers, &left_keys, &right_keys) {
            match op {
                DiffOp::Equal { old_index, new_index, len } => {
                    for offset in 0..len {
                        pages.push(PageDiff {
                            left: Some(left[old_index + offset].uid),
                            right: Some(right[new_index + offset].uid),
                            status: PageStatus::Unchanged,
                        });
                    }
                }
                DiffOp::Delete { old_index, old_len, .. } => {
                    for page in &left[old_index..old_index + old_len] {
                        pages.push(removed(page));
                    }
                }
                DiffOp::Insert { new_index, new_len, .. } => {
                    for page in &right[new_index..new_index + new_len] {
                        pages.push(added(page));
                    }
                }
                DiffOp::Replace { old_index, old_len, new_index, new_len } => {
                    self.resolve_replace(
                        &left[old_index..old_index + old_len],
                        &right[new_index..new_index + new_len],
                        &mut pages,
                    );
                }
            }
        }

        let summary = summarize(&pages);
        debug!(
            unchanged = summary.unchanged,
            added = summary.added,
            removed = summary.removed,
            modified = summary.modified,
            "compared page sequences"
        );
        DiffResult { pages, summary }
    }

    /// Walks a replaced run pairwise. Pages close enough in content
    /// merge into one modified row, everything else splits into a
    /// removal and an addition. The longer side's tail is emitted as
    /// plain removals or additions.
    fn resolve_replace(
        &self,
        left: &[PageFingerprint],
        right: &[PageFingerprint],
        pages: &mut Vec<PageDiff>,
    ) {
        let paired = left.len().min(right.len());
        for (old, new) in left.iter().zip(right.iter()) {
            if old.same_display(new) {
                pages.push(PageDiff {
                    left: Some(old.uid),
                    right: Some(new.uid),
                    status: PageStatus::Unchanged,
                });
            } else if self.looks_modified(old, new) {
                pages.push(PageDiff {
                    left: Some(old.uid),
                    right: Some(new.uid),
                    status: PageStatus::Modified,
                });
            } else {
                pages.push(removed(old));
                pages.push(added(new));
            }
        }
        for page in &left[paired..] {
            pages.push(removed(page));
        }
        for page in &right[paired..] {
            pages.push(added(page));
        }
    }

    fn looks_modified(&self, old: &PageFingerprint, new: &PageFingerprint) -> bool {
        // The same stored page shown differently is an edit by definition.
        if old.same_source_page(new) {
            return true;
        }
        if let (Some(a), Some(b)) = (old.text_excerpt.as_deref(), new.text_excerpt.as_deref()) {
            if strsim::normalized_levenshtein(a, b) >= self.config.modified_threshold {
                return true;
            }
        }
        if let (Some(a), Some(b)) = (old.visual_hash, new.visual_hash) {
            if hamming_distance(a, b) <= self.config.max_hash_distance {
                return true;
            }
        }
        false
    }
}

fn removed(page: &PageFingerprint) -> PageDiff {
    PageDiff { left: Some(page.uid), right: None, status: PageStatus::Removed }
}

fn added(page: &PageFingerprint) -> PageDiff {
    PageDiff { left: None, right: Some(page.uid), status: PageStatus::Added }
}

fn summarize(pages: &[PageDiff]) -> DiffSummary {
    let mut summary = DiffSummary::default();
    for page in pages {
        match page.status {
            PageStatus::Unchanged => summary.unchanged += 1,
            PageStatus::Added => summary.added += 1,
            PageStatus::Removed => summary.removed += 1,
            PageStatus::Modified => summary.modified += 1,
        }
    }
    summary
}
