//! Task types for the ingestion pipeline.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::{Decision, FormatKind};
use crate::extract::ExtractSummary;
use crate::upload::UploadResponse;

/// A file handed to the pipeline by the host.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub media_type: String,
    pub bytes: Bytes,
}

impl UploadFile {
    pub fn new(
        filename: impl Into<String>,
        media_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            filename: filename.into(),
            media_type: media_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Where a task is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Classifying,
    Extracting,
    Reconstructing,
    Inserting,
    UploadingRaw,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }

    /// Whether the state machine has an edge from `self` to `next`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Queued, Classifying)
                | (Classifying, Extracting)
                | (Classifying, UploadingRaw)
                | (Extracting, Reconstructing)
                | (Extracting, UploadingRaw)
                | (Reconstructing, Inserting)
                | (Reconstructing, UploadingRaw)
                | (Inserting, Done)
                | (Inserting, Failed)
                | (Inserting, UploadingRaw)
                | (UploadingRaw, Done)
                | (UploadingRaw, Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Classifying => write!(f, "classifying"),
            TaskStatus::Extracting => write!(f, "extracting"),
            TaskStatus::Reconstructing => write!(f, "reconstructing"),
            TaskStatus::Inserting => write!(f, "inserting"),
            TaskStatus::UploadingRaw => write!(f, "uploading_raw"),
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One file moving through the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct UploadTask {
    /// UUID v4, also the placeholder id
    pub id: String,
    pub filename: String,
    pub declared_media_type: String,
    pub size_bytes: u64,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
}

impl UploadTask {
    pub fn new(file: &UploadFile) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            filename: file.filename.clone(),
            declared_media_type: file.media_type.clone(),
            size_bytes: file.size(),
            status: TaskStatus::Queued,
            started_at: Utc::now(),
        }
    }
}

/// How a task resolved its placeholder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// Reconstructed content replaced the placeholder
    Inserted { nodes: usize, batches: usize },
    /// The placeholder disappeared; remaining content was dropped
    Abandoned { inserted: usize },
    /// Insertion failed; the placeholder now holds error text or is gone
    RecoveredWithError { error: String },
    /// The raw file was uploaded and referenced in place
    Uploaded { response: UploadResponse },
    /// The raw upload failed; the placeholder was removed
    UploadFailed { error: String },
}

/// Summary of a finished task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task_id: String,
    pub filename: String,
    pub kind: FormatKind,
    pub decision: Decision,
    pub status: TaskStatus,
    pub outcome: TaskOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract: Option<ExtractSummary>,
    /// Distinct image assets produced
    pub assets: usize,
    /// Why the task fell back to a raw upload, if it did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            TaskStatus::Queued,
            TaskStatus::Classifying,
            TaskStatus::Extracting,
            TaskStatus::Reconstructing,
            TaskStatus::Inserting,
            TaskStatus::Done,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_fallback_edges() {
        for from in [
            TaskStatus::Classifying,
            TaskStatus::Extracting,
            TaskStatus::Reconstructing,
            TaskStatus::Inserting,
        ] {
            assert!(from.can_transition_to(TaskStatus::UploadingRaw));
        }
        assert!(TaskStatus::UploadingRaw.can_transition_to(TaskStatus::Done));
        assert!(TaskStatus::UploadingRaw.can_transition_to(TaskStatus::Failed));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!TaskStatus::Queued.can_transition_to(TaskStatus::Inserting));
        assert!(!TaskStatus::Done.can_transition_to(TaskStatus::Classifying));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Done));
        assert!(!TaskStatus::Extracting.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Done.is_terminal());
        assert!(!TaskStatus::UploadingRaw.is_terminal());
    }

    #[test]
    fn test_new_task_ids_are_unique() {
        let file = UploadFile::new("a.txt", "text/plain", &b"hi"[..]);
        let a = UploadTask::new(&file);
        let b = UploadTask::new(&file);
        assert_ne!(a.id, b.id);
        assert_eq!(a.status, TaskStatus::Queued);
        assert_eq!(a.size_bytes, 2);
    }
}
