use crate::model::{DocumentModel, EditEffects, ModelError};
use crate::page::{PageRef, PageUid, Rotation};
use std::collections::VecDeque;

pub const DEFAULT_UNDO_LIMIT: usize = 100;

/// A captured, replayable change to the page sequence. Edits carry concrete
/// page data so replaying never mints new uids: redoing a duplicate reinserts
/// the same copies it created the first time.
#[derive(Debug, Clone, PartialEq)]
pub enum StateEdit {
    /// Full uid order snapshot; the page set itself is unchanged.
    SetOrder(Vec<PageUid>),
    SetRotations(Vec<(PageUid, Rotation)>),
    /// Pages with their final indices, applied lowest index first.
    InsertPages(Vec<(usize, PageRef)>),
    RemovePages(Vec<PageUid>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub label: &'static str,
    pub undo: StateEdit,
    pub redo: StateEdit,
}

impl HistoryEntry {
    pub fn new(label: &'static str, undo: StateEdit, redo: StateEdit) -> Self {
        Self { label, undo, redo }
    }
}

/// Undo/redo stacks over structural mutations. Recording a fresh entry
/// clears the redo side; the undo side drops its oldest entry past the limit.
#[derive(Debug, Clone)]
pub struct History {
    undo_stack: VecDeque<HistoryEntry>,
    redo_stack: Vec<HistoryEntry>,
    limit: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::with_limit(DEFAULT_UNDO_LIMIT)
    }
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self { undo_stack: VecDeque::new(), redo_stack: Vec::new(), limit: limit.max(1) }
    }

    pub fn record(&mut self, entry: HistoryEntry) {
        self.redo_stack.clear();
        if self.undo_stack.len() == self.limit {
            self.undo_stack.pop_front();
        }
        self.undo_stack.push_back(entry);
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Label of the mutation that undo would revert next.
    pub fn undo_label(&self) -> Option<&'static str> {
        self.undo_stack.back().map(|entry| entry.label)
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    /// Reverts the most recent mutation. Returns `None` when there is
    /// nothing to undo. On failure the entry stays on the undo stack.
    pub fn undo(&mut self, model: &mut DocumentModel) -> Result<Option<EditEffects>, ModelError> {
        let Some(entry) = self.undo_stack.pop_back() else {
            return Ok(None);
        };

        match model.apply_edit(&entry.undo) {
            Ok(effects) => {
                self.redo_stack.push(entry);
                Ok(Some(effects))
            }
            Err(err) => {
                self.undo_stack.push_back(entry);
                Err(err)
            }
        }
    }

    /// Re-applies the most recently undone mutation.
    pub fn redo(&mut self, model: &mut DocumentModel) -> Result<Option<EditEffects>, ModelError> {
        let Some(entry) = self.redo_stack.pop() else {
            return Ok(None);
        };

        match model.apply_edit(&entry.redo) {
            Ok(effects) => {
                self.undo_stack.push_back(entry);
                Ok(Some(effects))
            }
            Err(err) => {
                self.redo_stack.push(entry);
                Err(err)
            }
        }
    }
}
