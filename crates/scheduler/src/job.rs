//! Job descriptions and queue ordering.

use quire_doc_model::{PageRef, PageUid};
use std::cmp::Ordering;

/// Monotonic job identifier, unique for the lifetime of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

/// Document generation the job was submitted under. A session bumps its
/// generation when it closes; consumers drop results stamped with an older
/// value.
pub type Generation = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Render,
    ExtractText,
    Ocr,
}

/// Deduplication key: at most one live job per (uid, kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub uid: PageUid,
    pub kind: JobKind,
}

/// Queue priority, highest first. Renders are user-visible, text extraction
/// feeds search lazily, OCR is the most expensive and least urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobPriority {
    Ocr = 0,
    Text = 1,
    Render = 2,
}

/// What a worker should do. Jobs carry a frozen copy of the page handle so
/// workers never read the live document model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JobRequest {
    Render { page: PageRef, resolution: u32 },
    ExtractText { page: PageRef },
    Ocr { page: PageRef, resolution: u32 },
}

impl JobRequest {
    pub fn page(&self) -> PageRef {
        match self {
            JobRequest::Render { page, .. }
            | JobRequest::ExtractText { page }
            | JobRequest::Ocr { page, .. } => *page,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::Render { .. } => JobKind::Render,
            JobRequest::ExtractText { .. } => JobKind::ExtractText,
            JobRequest::Ocr { .. } => JobKind::Ocr,
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey { uid: self.page().uid(), kind: self.kind() }
    }

    pub fn priority(&self) -> JobPriority {
        match self {
            JobRequest::Render { .. } => JobPriority::Render,
            JobRequest::ExtractText { .. } => JobPriority::Text,
            JobRequest::Ocr { .. } => JobPriority::Ocr,
        }
    }
}

/// A scheduled unit of work.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub request: JobRequest,
    pub generation: Generation,
    pub(crate) insertion_order: u64,
}

impl Job {
    pub fn key(&self) -> JobKey {
        self.request.key()
    }

    pub fn uid(&self) -> PageUid {
        self.request.page().uid()
    }

    pub fn priority(&self) -> JobPriority {
        self.request.priority()
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Job {}

/// Max-heap order: higher priority first, then first-in-first-out within a
/// priority level (lower insertion order wins).
impl Ord for Job {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority()
            .cmp(&other.priority())
            .then_with(|| other.insertion_order.cmp(&self.insertion_order))
    }
}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
