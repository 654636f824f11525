//! Corpus paginator.
//!
//! Thin layer over [`RecordStore`] scans that maps store failures to
//! [`CorpusError`] so the orchestrator can tell "could not read the
//! corpus" apart from merge failures.

use std::sync::Arc;

use tracing::debug;

use crate::error::CorpusError;
use crate::traits::RecordStore;
use crate::types::{ScanPage, ScanStart};

/// Reads the domain corpus page by page through an opaque scan token.
#[derive(Clone)]
pub struct CorpusPaginator {
    store: Arc<dyn RecordStore>,
}

impl CorpusPaginator {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Open a snapshot scan. The returned total is the number of domains the
    /// scan will yield.
    pub async fn open(&self, page_size: u32) -> Result<ScanStart, CorpusError> {
        let start = self
            .store
            .open_scan(page_size)
            .await
            .map_err(CorpusError::SourceUnavailable)?;
        debug!(total = start.total, page_size, "corpus scan opened");
        Ok(start)
    }

    /// Fetch the page for `token`.
    pub async fn next(&self, token: &str) -> Result<ScanPage, CorpusError> {
        self.store
            .next_page(token)
            .await
            .map_err(CorpusError::SourceUnavailable)
    }
}
