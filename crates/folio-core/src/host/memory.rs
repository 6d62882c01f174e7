//! In-memory host tree.
//!
//! Backs the command-line runner and the tests. Besides the [`HostTree`]
//! operations it can simulate what a live editor does to a placeholder
//! while a task is running: the user deleting it, typing around it, or the
//! host rejecting updates.

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{HostTree, Range};
use crate::error::HostError;
use crate::reconstruct::DocumentNode;

#[derive(Debug, Clone)]
enum Slot {
    Node(DocumentNode),
    Placeholder(String),
}

#[derive(Debug, Default)]
struct State {
    slots: Vec<Slot>,
    /// Replaces left to fail before the tree accepts updates again
    fail_next: usize,
    /// Reject any replace carrying more than base text nodes
    reject_structural: bool,
    /// Placeholder ids to delete after the given number of yields
    delete_on_yield: Vec<(String, usize)>,
    replaces: usize,
}

impl State {
    fn position(&self, id: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| matches!(slot, Slot::Placeholder(p) if p == id))
    }
}

/// A document held in memory.
#[derive(Debug, Default)]
pub struct MemoryTree {
    state: Mutex<State>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tree that already holds some content.
    pub fn with_nodes(nodes: Vec<DocumentNode>) -> Self {
        Self {
            state: Mutex::new(State {
                slots: nodes.into_iter().map(Slot::Node).collect(),
                ..Default::default()
            }),
        }
    }

    /// Content nodes in document order, placeholders left out.
    pub async fn nodes(&self) -> Vec<DocumentNode> {
        self.state
            .lock()
            .await
            .slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Node(node) => Some(node.clone()),
                Slot::Placeholder(_) => None,
            })
            .collect()
    }

    /// Ids of the live placeholders in document order.
    pub async fn placeholders(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Placeholder(id) => Some(id.clone()),
                Slot::Node(_) => None,
            })
            .collect()
    }

    /// Number of top-level slots, placeholders included.
    pub async fn len(&self) -> usize {
        self.state.lock().await.slots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Replace operations that succeeded so far.
    pub async fn replace_count(&self) -> usize {
        self.state.lock().await.replaces
    }

    /// The user deletes the placeholder. Returns whether it existed.
    pub async fn delete_placeholder(&self, id: &str) -> bool {
        let mut state = self.state.lock().await;
        match state.position(id) {
            Some(pos) => {
                state.slots.remove(pos);
                true
            }
            None => false,
        }
    }

    /// The user types a paragraph at `at`, shifting everything after it.
    pub async fn type_at(&self, at: usize, text: &str) {
        let mut state = self.state.lock().await;
        let at = at.min(state.slots.len());
        state
            .slots
            .insert(at, Slot::Node(DocumentNode::paragraph(text)));
    }

    /// Fail the next `count` replace operations.
    pub async fn fail_next_replaces(&self, count: usize) {
        self.state.lock().await.fail_next = count;
    }

    /// Reject replaces that carry structural nodes; base text still goes in.
    pub async fn reject_structural(&self, reject: bool) {
        self.state.lock().await.reject_structural = reject;
    }

    /// Delete placeholder `id` once the pipeline has yielded `yields` times.
    pub async fn delete_placeholder_after_yields(&self, id: &str, yields: usize) {
        self.state
            .lock()
            .await
            .delete_on_yield
            .push((id.to_string(), yields.max(1)));
    }
}

#[async_trait]
impl HostTree for MemoryTree {
    async fn create_placeholder(&self, id: &str, at: usize) -> Result<Range, HostError> {
        let mut state = self.state.lock().await;
        if state.position(id).is_some() {
            return Err(HostError::DuplicatePlaceholder(id.to_string()));
        }
        let len = state.slots.len();
        if at > len {
            return Err(HostError::StaleRange { from: at, to: at, len });
        }

        state.slots.insert(at, Slot::Placeholder(id.to_string()));
        Ok(Range::new(at, at + 1))
    }

    async fn replace_range(&self, range: Range, nodes: Vec<DocumentNode>) -> Result<(), HostError> {
        let mut state = self.state.lock().await;

        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(HostError::Rejected("injected failure".to_string()));
        }
        if state.reject_structural
            && nodes
                .iter()
                .any(|node| !matches!(node, DocumentNode::Text { .. }))
        {
            return Err(HostError::Rejected(
                "structural nodes are not accepted".to_string(),
            ));
        }

        let len = state.slots.len();
        if range.from > range.to || range.to > len {
            return Err(HostError::StaleRange {
                from: range.from,
                to: range.to,
                len,
            });
        }

        state
            .slots
            .splice(range.from..range.to, nodes.into_iter().map(Slot::Node));
        state.replaces += 1;
        Ok(())
    }

    async fn find_placeholder(&self, id: &str) -> Option<Range> {
        let state = self.state.lock().await;
        state.position(id).map(|pos| Range::new(pos, pos + 1))
    }

    async fn yield_now(&self) {
        {
            let mut state = self.state.lock().await;
            let mut due = Vec::new();
            for (id, remaining) in state.delete_on_yield.iter_mut() {
                *remaining -= 1;
                if *remaining == 0 {
                    due.push(id.clone());
                }
            }
            state.delete_on_yield.retain(|(_, remaining)| *remaining > 0);

            for id in due {
                if let Some(pos) = state.position(&id) {
                    tracing::debug!(placeholder = %id, "Simulated user deleted placeholder");
                    state.slots.remove(pos);
                }
            }
        }
        tokio::task::yield_now().await;
    }
}
