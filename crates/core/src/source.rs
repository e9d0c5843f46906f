//! Shared ownership of engine document handles.

use std::sync::Arc;

use quire_pdf_engine::DocumentHandle;

use crate::session::SharedEngine;

/// Keeps an engine document open for as long as anything references it.
/// Merging pages between sessions clones this, so closing the session a
/// page came from never invalidates the copies. The last clone to drop
/// closes the handle.
#[derive(Clone)]
pub(crate) struct SourceHandle {
    inner: Arc<OwnedHandle>,
}

impl SourceHandle {
    pub(crate) fn new(engine: SharedEngine, handle: DocumentHandle) -> Self {
        Self { inner: Arc::new(OwnedHandle { engine, handle }) }
    }

    pub(crate) fn handle(&self) -> DocumentHandle {
        self.inner.handle
    }
}

struct OwnedHandle {
    engine: SharedEngine,
    handle: DocumentHandle,
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if let Ok(mut engine) = self.engine.lock() {
            let _ = engine.close(self.handle);
        }
    }
}
