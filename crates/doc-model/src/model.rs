use crate::history::{HistoryEntry, StateEdit};
use crate::page::{PageRef, PageUid, Rotation, SourceId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown page uid {0}")]
    UnknownUid(PageUid),
    #[error("page uid {0} referenced more than once in one operation")]
    RepeatedUid(PageUid),
    #[error("page uid {0} is already present in this document")]
    UidCollision(PageUid),
    #[error("rotation delta {0} is not a multiple of 90 degrees")]
    InvalidRotation(i32),
    #[error("index {index} out of bounds for {len} pages")]
    OutOfBounds { index: usize, len: usize },
    #[error("order snapshot does not match the current page set")]
    OrderMismatch,
}

/// What a structural mutation did, reported so the owner can keep caches,
/// search entries, and background jobs consistent.
#[derive(Debug, Clone, Default)]
pub struct Mutation {
    /// Fresh uids minted by duplicate/insert_from, in display order.
    pub created: Vec<PageUid>,
    /// (original, copy) pairs from duplicate, for carrying indexed text over.
    pub duplicated: Vec<(PageUid, PageUid)>,
    /// Uids whose rotation changed; their cached renders are stale.
    pub rotated: Vec<PageUid>,
    /// Uids removed from the working set, in their previous display order.
    pub removed: Vec<PageUid>,
    /// Undo/redo record, absent when the operation turned out to be a no-op.
    pub entry: Option<HistoryEntry>,
}

/// What applying a [`StateEdit`] did. Same purpose as [`Mutation`] but for
/// undo/redo, where the owner did not issue the original operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditEffects {
    pub rotated: Vec<PageUid>,
    pub inserted: Vec<PageUid>,
    pub removed: Vec<PageUid>,
}

/// Ordered working set of pages with selection state and a dirty flag.
///
/// Display order is the vector order. Every mutation validates its inputs in
/// full before touching state, so a failed call leaves the model untouched.
/// When an operation takes several uids, their relative order in the current
/// sequence decides the result order, not the order they were passed in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentModel {
    pages: Vec<PageRef>,
    selection: HashSet<PageUid>,
    dirty: bool,
}

impl DocumentModel {
    /// Model over every native page of one source, rotation 0, native order.
    pub fn from_source(source_id: SourceId, page_count: u32) -> Self {
        let pages = (0..page_count).map(|index| PageRef::new(source_id, index)).collect();

        Self { pages, selection: HashSet::new(), dirty: false }
    }

    pub fn pages(&self) -> &[PageRef] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn contains(&self, uid: PageUid) -> bool {
        self.pages.iter().any(|page| page.uid() == uid)
    }

    pub fn page(&self, uid: PageUid) -> Option<&PageRef> {
        self.pages.iter().find(|page| page.uid() == uid)
    }

    pub fn position(&self, uid: PageUid) -> Option<usize> {
        self.pages.iter().position(|page| page.uid() == uid)
    }

    pub fn uid_order(&self) -> Vec<PageUid> {
        self.pages.iter().map(PageRef::uid).collect()
    }

    pub fn dirty(&self) -> bool {
        self.dirty
    }

    /// Clears the dirty flag after the caller has written the document out.
    pub fn mark_saved(&mut self) {
        self.dirty = false;
    }

    pub fn selection(&self) -> &HashSet<PageUid> {
        &self.selection
    }

    /// Selected uids sorted by their current display position.
    pub fn selection_in_order(&self) -> Vec<PageUid> {
        self.pages
            .iter()
            .map(PageRef::uid)
            .filter(|uid| self.selection.contains(uid))
            .collect()
    }

    /// Replaces the selection. Every uid must exist in the working set.
    pub fn set_selection<I>(&mut self, uids: I) -> Result<(), ModelError>
    where
        I: IntoIterator<Item = PageUid>,
    {
        let uids: Vec<PageUid> = uids.into_iter().collect();
        for uid in &uids {
            if !self.contains(*uid) {
                return Err(ModelError::UnknownUid(*uid));
            }
        }

        self.selection = uids.into_iter().collect();
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Validated copies of the referenced pages in current display order.
    /// This is the ordering contract for extract and image export.
    pub fn in_display_order(&self, uids: &[PageUid]) -> Result<Vec<PageRef>, ModelError> {
        let wanted = self.validate_batch(uids)?;

        Ok(self.pages.iter().filter(|page| wanted.contains(&page.uid())).copied().collect())
    }

    /// Moves the given pages (keeping their relative order) so the block
    /// starts at `target_index`, counted against the sequence after removal.
    pub fn reorder(&mut self, moved: &[PageUid], target_index: usize) -> Result<Mutation, ModelError> {
        let moved_set = self.validate_batch(moved)?;
        let remaining = self.pages.len() - moved.len();
        if target_index > remaining {
            return Err(ModelError::OutOfBounds { index: target_index, len: remaining });
        }

        if moved.is_empty() {
            return Ok(Mutation::default());
        }

        let before = self.uid_order();

        let mut kept: Vec<PageRef> = Vec::with_capacity(remaining);
        let mut block: Vec<PageRef> = Vec::with_capacity(moved.len());
        for page in &self.pages {
            if moved_set.contains(&page.uid()) {
                block.push(*page);
            } else {
                kept.push(*page);
            }
        }
        kept.splice(target_index..target_index, block);
        self.pages = kept;

        let after = self.uid_order();
        if before == after {
            return Ok(Mutation::default());
        }

        self.dirty = true;
        Ok(Mutation {
            entry: Some(HistoryEntry::new(
                "reorder",
                StateEdit::SetOrder(before),
                StateEdit::SetOrder(after),
            )),
            ..Mutation::default()
        })
    }

    /// Adds `delta_degrees` (any multiple of 90) to each page's rotation,
    /// modulo a full turn.
    pub fn rotate(&mut self, uids: &[PageUid], delta_degrees: i32) -> Result<Mutation, ModelError> {
        let delta = Rotation::from_degrees(delta_degrees)
            .ok_or(ModelError::InvalidRotation(delta_degrees))?;
        let targets = self.validate_batch(uids)?;

        if uids.is_empty() || delta == Rotation::R0 {
            return Ok(Mutation::default());
        }

        let mut previous = Vec::with_capacity(uids.len());
        let mut updated = Vec::with_capacity(uids.len());
        let mut rotated = Vec::with_capacity(uids.len());
        for page in &mut self.pages {
            if targets.contains(&page.uid()) {
                previous.push((page.uid(), page.rotation()));
                page.set_rotation(page.rotation().compose(delta));
                updated.push((page.uid(), page.rotation()));
                rotated.push(page.uid());
            }
        }

        self.dirty = true;
        Ok(Mutation {
            rotated,
            entry: Some(HistoryEntry::new(
                "rotate",
                StateEdit::SetRotations(previous),
                StateEdit::SetRotations(updated),
            )),
            ..Mutation::default()
        })
    }

    /// Inserts a fresh-uid copy of each page immediately after its original,
    /// walking the current sequence; duplicating a contiguous block therefore
    /// yields original/copy pairs side by side.
    pub fn duplicate(&mut self, uids: &[PageUid]) -> Result<Mutation, ModelError> {
        let targets = self.validate_batch(uids)?;

        if uids.is_empty() {
            return Ok(Mutation::default());
        }

        let mut next = Vec::with_capacity(self.pages.len() + uids.len());
        let mut created = Vec::with_capacity(uids.len());
        let mut duplicated = Vec::with_capacity(uids.len());
        let mut inserted = Vec::with_capacity(uids.len());
        for page in &self.pages {
            next.push(*page);
            if targets.contains(&page.uid()) {
                let copy = page.duplicate_of();
                duplicated.push((page.uid(), copy.uid()));
                created.push(copy.uid());
                inserted.push((next.len(), copy));
                next.push(copy);
            }
        }
        self.pages = next;

        self.dirty = true;
        Ok(Mutation {
            created: created.clone(),
            duplicated,
            entry: Some(HistoryEntry::new(
                "duplicate",
                StateEdit::RemovePages(created),
                StateEdit::InsertPages(inserted),
            )),
            ..Mutation::default()
        })
    }

    /// Removes the given pages and prunes them from the selection.
    pub fn remove(&mut self, uids: &[PageUid]) -> Result<Mutation, ModelError> {
        let targets = self.validate_batch(uids)?;

        if uids.is_empty() {
            return Ok(Mutation::default());
        }

        let mut removed_pages = Vec::with_capacity(uids.len());
        for (index, page) in self.pages.iter().enumerate() {
            if targets.contains(&page.uid()) {
                removed_pages.push((index, *page));
            }
        }

        self.pages.retain(|page| !targets.contains(&page.uid()));
        self.selection.retain(|uid| !targets.contains(uid));

        let removed: Vec<PageUid> = removed_pages.iter().map(|(_, page)| page.uid()).collect();

        self.dirty = true;
        Ok(Mutation {
            removed: removed.clone(),
            entry: Some(HistoryEntry::new(
                "remove",
                StateEdit::InsertPages(removed_pages),
                StateEdit::RemovePages(removed),
            )),
            ..Mutation::default()
        })
    }

    /// Copies pages out of another model (fresh uids, same source reference
    /// and rotation) into this one starting at `at_index`. Backs merge.
    pub fn insert_from(
        &mut self,
        other: &DocumentModel,
        uids: &[PageUid],
        at_index: usize,
    ) -> Result<Mutation, ModelError> {
        if at_index > self.pages.len() {
            return Err(ModelError::OutOfBounds { index: at_index, len: self.pages.len() });
        }
        let copies: Vec<PageRef> =
            other.in_display_order(uids)?.iter().map(PageRef::duplicate_of).collect();

        if copies.is_empty() {
            return Ok(Mutation::default());
        }

        let created: Vec<PageUid> = copies.iter().map(PageRef::uid).collect();
        let inserted: Vec<(usize, PageRef)> =
            copies.iter().enumerate().map(|(offset, page)| (at_index + offset, *page)).collect();

        self.pages.splice(at_index..at_index, copies);

        self.dirty = true;
        Ok(Mutation {
            created: created.clone(),
            entry: Some(HistoryEntry::new(
                "insert",
                StateEdit::RemovePages(created),
                StateEdit::InsertPages(inserted),
            )),
            ..Mutation::default()
        })
    }

    /// Applies a captured undo/redo edit. Validation mirrors the structural
    /// operations: the whole edit is checked before any state changes.
    pub fn apply_edit(&mut self, edit: &StateEdit) -> Result<EditEffects, ModelError> {
        match edit {
            StateEdit::SetOrder(order) => {
                if order.len() != self.pages.len() {
                    return Err(ModelError::OrderMismatch);
                }
                let unique: HashSet<PageUid> = order.iter().copied().collect();
                if unique.len() != order.len() {
                    return Err(ModelError::OrderMismatch);
                }

                let mut by_uid: Vec<PageRef> = Vec::with_capacity(order.len());
                for uid in order {
                    let page = self.page(*uid).ok_or(ModelError::OrderMismatch)?;
                    by_uid.push(*page);
                }

                self.pages = by_uid;
                self.dirty = true;
                Ok(EditEffects::default())
            }
            StateEdit::SetRotations(rotations) => {
                for (uid, _) in rotations {
                    if !self.contains(*uid) {
                        return Err(ModelError::UnknownUid(*uid));
                    }
                }

                let mut rotated = Vec::with_capacity(rotations.len());
                for (uid, rotation) in rotations {
                    if let Some(page) = self.pages.iter_mut().find(|page| page.uid() == *uid) {
                        page.set_rotation(*rotation);
                        rotated.push(*uid);
                    }
                }

                self.dirty = true;
                Ok(EditEffects { rotated, ..EditEffects::default() })
            }
            StateEdit::InsertPages(pages) => {
                for (step, (index, page)) in pages.iter().enumerate() {
                    if self.contains(page.uid()) {
                        return Err(ModelError::UidCollision(page.uid()));
                    }
                    if *index > self.pages.len() + step {
                        return Err(ModelError::OutOfBounds {
                            index: *index,
                            len: self.pages.len() + step,
                        });
                    }
                }

                let mut inserted = Vec::with_capacity(pages.len());
                for (index, page) in pages {
                    self.pages.insert(*index, *page);
                    inserted.push(page.uid());
                }

                self.dirty = true;
                Ok(EditEffects { inserted, ..EditEffects::default() })
            }
            StateEdit::RemovePages(uids) => {
                let targets = self.validate_batch(uids)?;

                self.pages.retain(|page| !targets.contains(&page.uid()));
                self.selection.retain(|uid| !targets.contains(uid));

                self.dirty = true;
                Ok(EditEffects { removed: uids.clone(), ..EditEffects::default() })
            }
        }
    }

    /// Rejects repeated or unknown uids up front so batch operations stay
    /// all-or-nothing.
    fn validate_batch(&self, uids: &[PageUid]) -> Result<HashSet<PageUid>, ModelError> {
        let mut set = HashSet::with_capacity(uids.len());
        for uid in uids {
            if !set.insert(*uid) {
                return Err(ModelError::RepeatedUid(*uid));
            }
            if !self.contains(*uid) {
                return Err(ModelError::UnknownUid(*uid));
            }
        }

        Ok(set)
    }
}
