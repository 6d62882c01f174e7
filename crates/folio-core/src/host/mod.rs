//! The host document tree seam.
//!
//! The pipeline never owns the document. It reserves a placeholder per task
//! and later swaps that placeholder for content through [`HostTree`]. Each
//! mutation is a single replace of a node range.

mod memory;

pub use memory::MemoryTree;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HostError;
use crate::reconstruct::DocumentNode;

/// Half-open range of top-level node positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub from: usize,
    pub to: usize,
}

impl Range {
    pub fn new(from: usize, to: usize) -> Self {
        Self { from, to }
    }

    /// Zero-width range at `at`; replacing it inserts without removing.
    pub fn empty_at(at: usize) -> Self {
        Self { from: at, to: at }
    }

    pub fn len(&self) -> usize {
        self.to.saturating_sub(self.from)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A live, mutable document the pipeline inserts into.
///
/// Implementations must reject a second placeholder with an id that is
/// already live. `replace_range` with an empty node list removes the range.
#[async_trait]
pub trait HostTree: Send + Sync {
    /// Reserve a placeholder for `id` at position `at`.
    async fn create_placeholder(&self, id: &str, at: usize) -> Result<Range, HostError>;

    /// Replace `range` with `nodes` in one step.
    async fn replace_range(&self, range: Range, nodes: Vec<DocumentNode>) -> Result<(), HostError>;

    /// Where the placeholder for `id` currently is, if it still exists.
    async fn find_placeholder(&self, id: &str) -> Option<Range>;

    /// Give the host a chance to run between insertion batches.
    async fn yield_now(&self) {
        tokio::task::yield_now().await;
    }
}
