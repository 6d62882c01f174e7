//! Chunked insertion of reconstructed nodes into the host tree.
//!
//! Small sequences replace the placeholder in one step. Longer ones go in
//! batches: every batch but the last is inserted just before the placeholder
//! (which shifts right), then the host gets a turn; the last batch replaces
//! the placeholder itself. The placeholder is looked up again before every
//! dispatch, so a user deleting it mid-way stops the task cleanly.

use crate::config::InsertConfig;
use crate::error::HostError;
use crate::events::{EventSink, ProgressTick};
use crate::host::{HostTree, Range};
use crate::reconstruct::DocumentNode;
use crate::upload::{remove_placeholder, Resolution};

/// Result of an insertion.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted { nodes: usize, batches: usize },
    /// The placeholder vanished; `inserted` nodes had already landed
    Abandoned { inserted: usize },
    /// A dispatch failed and the placeholder was resolved to error text
    /// (or removed when even that failed)
    RecoveredWithError {
        error: HostError,
        resolution: Resolution,
    },
}

/// Splits node sequences into batches and dispatches them.
#[derive(Debug, Clone, Default)]
pub struct InsertScheduler {
    config: InsertConfig,
}

impl InsertScheduler {
    pub fn new(config: InsertConfig) -> Self {
        Self { config }
    }

    fn batches(&self, mut nodes: Vec<DocumentNode>) -> Vec<Vec<DocumentNode>> {
        if nodes.len() <= self.config.single_batch_max {
            return vec![nodes];
        }

        let size = self.config.batch_size.max(1);
        let mut batches = Vec::with_capacity(nodes.len().div_ceil(size));
        while nodes.len() > size {
            let rest = nodes.split_off(size);
            batches.push(std::mem::replace(&mut nodes, rest));
        }
        batches.push(nodes);
        batches
    }

    /// Replace the placeholder of `task_id` with `nodes`.
    pub async fn insert(
        &self,
        host: &dyn HostTree,
        task_id: &str,
        nodes: Vec<DocumentNode>,
        sink: &dyn EventSink,
    ) -> InsertOutcome {
        let total = nodes.len();
        let batches = self.batches(nodes);
        let count = batches.len();
        let mut inserted = 0;

        tracing::debug!(task_id, nodes = total, batches = count, "Inserting nodes");

        for (i, batch) in batches.into_iter().enumerate() {
            let is_final = i + 1 == count;

            let Some(placeholder) = host.find_placeholder(task_id).await else {
                tracing::info!(
                    task_id,
                    inserted,
                    dropped = total - inserted,
                    "Placeholder gone, abandoning insertion"
                );
                return InsertOutcome::Abandoned { inserted };
            };

            let target = if is_final {
                placeholder
            } else {
                Range::empty_at(placeholder.from)
            };

            let len = batch.len();
            if let Err(e) = host.replace_range(target, batch).await {
                return recover(host, task_id, e).await;
            }
            inserted += len;

            sink.on_progress(ProgressTick::Batch {
                task_id: task_id.to_string(),
                batch: i + 1,
                batches: count,
                inserted,
                total,
            });

            if !is_final {
                host.yield_now().await;
            }
        }

        InsertOutcome::Inserted {
            nodes: inserted,
            batches: count,
        }
    }
}

/// Put a plain text node describing `error` where the placeholder was.
///
/// Only the base text node is used here, so a host that rejected the
/// structured content still has something it accepts.
async fn recover(host: &dyn HostTree, task_id: &str, error: HostError) -> InsertOutcome {
    tracing::warn!(task_id, error = %error, "Insertion dispatch failed");

    let resolution = match host.find_placeholder(task_id).await {
        Some(range) => {
            let message = DocumentNode::text(format!("Could not insert document content: {}", error));
            match host.replace_range(range, vec![message]).await {
                Ok(()) => Resolution::Replaced,
                Err(e) => {
                    tracing::warn!(task_id, error = %e, "Error text rejected, removing placeholder");
                    remove_placeholder(host, task_id).await
                }
            }
        }
        None => Resolution::Vanished,
    };

    InsertOutcome::RecoveredWithError { error, resolution }
}
