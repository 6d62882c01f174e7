//! Pipeline events for UI collaborators.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::IngestError;
use crate::pipeline::{TaskStatus, UploadFile};
use crate::upload::UploadResponse;

/// Coarse-grained progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressTick {
    /// A task entered a new status
    Status { task_id: String, status: TaskStatus },
    /// An insertion batch landed in the host tree
    Batch {
        task_id: String,
        batch: usize,
        batches: usize,
        inserted: usize,
        total: usize,
    },
}

impl ProgressTick {
    pub fn task_id(&self) -> &str {
        match self {
            ProgressTick::Status { task_id, .. } | ProgressTick::Batch { task_id, .. } => task_id,
        }
    }
}

/// Receives pipeline events.
///
/// Called from inside the pipeline; implementations must not block.
pub trait EventSink: Send + Sync {
    fn on_upload_success(&self, file: &UploadFile, result: &UploadResponse);
    fn on_upload_error(&self, file: &UploadFile, error: &IngestError);
    fn on_progress(&self, tick: ProgressTick);
}

/// No-op implementation for testing
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn on_upload_success(&self, _file: &UploadFile, _result: &UploadResponse) {}
    fn on_upload_error(&self, _file: &UploadFile, _error: &IngestError) {}
    fn on_progress(&self, _tick: ProgressTick) {}
}

/// An event as delivered through [`ChannelSink`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    UploadSucceeded {
        filename: String,
        response: UploadResponse,
    },
    UploadFailed {
        filename: String,
        error: String,
    },
    Progress(ProgressTick),
}

/// Forwards events into a bounded channel.
///
/// Events are dropped when the receiver falls behind.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<PipelineEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PipelineEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    fn send(&self, event: PipelineEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::trace!(error = %e, "Dropping pipeline event");
        }
    }
}

impl EventSink for ChannelSink {
    fn on_upload_success(&self, file: &UploadFile, result: &UploadResponse) {
        self.send(PipelineEvent::UploadSucceeded {
            filename: file.filename.clone(),
            response: result.clone(),
        });
    }

    fn on_upload_error(&self, file: &UploadFile, error: &IngestError) {
        self.send(PipelineEvent::UploadFailed {
            filename: file.filename.clone(),
            error: error.to_string(),
        });
    }

    fn on_progress(&self, tick: ProgressTick) {
        self.send(PipelineEvent::Progress(tick));
    }
}
