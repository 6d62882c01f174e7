//! Status tracking for in-flight upload tasks.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::types::{TaskStatus, UploadTask};

/// Task counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub queued: usize,
    /// Classifying, extracting, reconstructing or inserting
    pub processing: usize,
    pub uploading: usize,
    pub finished: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.queued + self.processing + self.uploading + self.finished
    }

    pub fn is_active(&self) -> bool {
        self.queued > 0 || self.processing > 0 || self.uploading > 0
    }
}

/// Tracks every task between placeholder creation and resolution.
#[derive(Clone, Default)]
pub struct TaskTracker {
    tasks: Arc<RwLock<HashMap<String, UploadTask>>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, task: UploadTask) {
        self.tasks.write().await.insert(task.id.clone(), task);
    }

    /// Move a task to `next`.
    ///
    /// Transitions the state machine has no edge for are logged and ignored.
    /// Returns whether the transition was applied.
    pub async fn transition(&self, task_id: &str, next: TaskStatus) -> bool {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(task_id) else {
            tracing::warn!(task_id, status = %next, "Transition for unknown task");
            return false;
        };

        if !task.status.can_transition_to(next) {
            tracing::warn!(
                task_id,
                from = %task.status,
                to = %next,
                "Ignoring invalid task transition"
            );
            return false;
        }

        tracing::debug!(task_id, from = %task.status, to = %next, "Task transition");
        task.status = next;
        true
    }

    pub async fn get(&self, task_id: &str) -> Option<UploadTask> {
        self.tasks.read().await.get(task_id).cloned()
    }

    pub async fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks.read().await.get(task_id).map(|t| t.status)
    }

    /// Tasks not yet in a terminal status.
    pub async fn active(&self) -> Vec<UploadTask> {
        self.tasks
            .read()
            .await
            .values()
            .filter(|t| !t.status.is_terminal())
            .cloned()
            .collect()
    }

    pub async fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for task in self.tasks.read().await.values() {
            match task.status {
                TaskStatus::Queued => counts.queued += 1,
                TaskStatus::Classifying
                | TaskStatus::Extracting
                | TaskStatus::Reconstructing
                | TaskStatus::Inserting => counts.processing += 1,
                TaskStatus::UploadingRaw => counts.uploading += 1,
                TaskStatus::Done | TaskStatus::Failed => counts.finished += 1,
            }
        }
        counts
    }

    /// Stop tracking a task once its placeholder is resolved.
    pub async fn remove(&self, task_id: &str) -> Option<UploadTask> {
        self.tasks.write().await.remove(task_id)
    }
}
