//! Page arrangement model: stable page identities, the ordered working set,
//! and the undo history over structural edits.

mod history;
mod model;
mod page;

pub use history::{History, HistoryEntry, StateEdit, DEFAULT_UNDO_LIMIT};
pub use model::{DocumentModel, EditEffects, ModelError, Mutation};
pub use page::{PageRef, PageUid, Rotation, SourceId};
