//! Structural comparison of two page sequences.
//!
//! The engine aligns both sequences with a Myers diff over per-page
//! similarity keys, then classifies every page as unchanged, added,
//! removed, or modified. Callers describe each page with a
//! [`PageFingerprint`]; the richer the fingerprint (extracted text,
//! perceptual hash), the better the classification. Output is a list
//! of [`PageDiff`] records, nothing is rendered here.

mod engine;
mod fingerprint;
mod hash;

pub use engine::{DiffConfig, DiffEngine, DiffResult, DiffSummary, PageDiff, PageStatus};
pub use fingerprint::{fingerprint_pages, PageFingerprint};
pub use hash::{average_hash, hamming_distance};
