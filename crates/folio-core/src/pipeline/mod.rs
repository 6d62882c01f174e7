//! Upload ingestion pipeline.
//!
//! # Architecture
//!
//! Every uploaded file becomes an [`UploadTask`] with its own placeholder in
//! the host tree. The task runs its stages in order and always ends by
//! resolving that placeholder:
//!
//! ```text
//! UploadFile ──► create_placeholder(task.id)
//!                      │
//!                      ▼
//!                  classify ──── not eligible ────────────────┐
//!                      │                                      │
//!                      ▼                                      │
//!              extract (blocking pool) ── error / empty ──────┤
//!                      │                                      │
//!                      ▼                                      ▼
//!          AssetPipeline + reconstruct              FallbackUploader
//!                      │                          (reference or removal)
//!                      ▼
//!              InsertScheduler (batched replace)
//! ```
//!
//! Tasks share nothing but the host tree. Several files run interleaved on
//! one runtime thread through [`IngestPipeline::ingest_many`].

mod progress;
mod types;


pub use progress::{StatusCounts, TaskTracker};
pub use types::{TaskOutcome, TaskReport, TaskStatus, UploadFile, UploadTask};

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;

use crate::assets::AssetPipeline;
use crate::classify::{classify, Classification};
use crate::config::{PipelineConfig, ValidationState};
use crate::error::{HostError, IngestError};
use crate::events::{EventSink, ProgressTick};
use crate::extract::{extract_blocking, extractor_for, ExtractResult, ExtractSummary};
use crate::host::HostTree;
use crate::insert::{InsertOutcome, InsertScheduler};
use crate::reconstruct::reconstruct;
use crate::upload::{FallbackUploader, Resolution, Uploader};

/// Runs uploaded files into a host tree.
pub struct IngestPipeline {
    config: PipelineConfig,
    /// Computed once from `config`
    validation: ValidationState,
    host: Arc<dyn HostTree>,
    sink: Arc<dyn EventSink>,
    fallback: FallbackUploader,
    scheduler: InsertScheduler,
    tracker: TaskTracker,
}

impl IngestPipeline {
    pub fn new(
        config: PipelineConfig,
        host: Arc<dyn HostTree>,
        uploader: Arc<dyn Uploader>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let validation = config.validate();
        let fallback = FallbackUploader::new(uploader, &config.upload);
        let scheduler = InsertScheduler::new(config.insert.clone());

        Self {
            config,
            validation,
            host,
            sink,
            fallback,
            scheduler,
            tracker: TaskTracker::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn validation(&self) -> &ValidationState {
        &self.validation
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Create the task and its placeholder at `at`.
    pub async fn start(&self, file: &UploadFile, at: usize) -> Result<UploadTask, HostError> {
        let task = UploadTask::new(file);
        self.host.create_placeholder(&task.id, at).await?;
        self.tracker.register(task.clone()).await;

        tracing::info!(
            task_id = %task.id,
            filename = %task.filename,
            size = task.size_bytes,
            "Queued upload"
        );
        Ok(task)
    }

    /// Ingest one file at position `at`.
    pub async fn ingest(&self, file: UploadFile, at: usize) -> Result<TaskReport, HostError> {
        let task = self.start(&file, at).await?;
        Ok(self.run(task, file).await)
    }

    /// Ingest several files, placing them in order from `at`.
    ///
    /// All placeholders are created first; the tasks then run interleaved.
    pub async fn ingest_many(
        &self,
        files: Vec<UploadFile>,
        at: usize,
    ) -> Vec<Result<TaskReport, HostError>> {
        let mut started = Vec::with_capacity(files.len());
        for (offset, file) in files.into_iter().enumerate() {
            let task = self.start(&file, at + offset).await;
            started.push((task, file));
        }

        join_all(started.into_iter().map(|(task, file)| async move {
            match task {
                Ok(task) => Ok(self.run(task, file).await),
                Err(e) => {
                    tracing::warn!(filename = %file.filename, error = %e, "Failed to create placeholder");
                    Err(e)
                }
            }
        }))
        .await
    }

    /// Run a started task to completion.
    pub async fn run(&self, task: UploadTask, file: UploadFile) -> TaskReport {
        let task_id = task.id.clone();
        let report = self.run_stages(&task, &file).await;
        self.tracker.remove(&task_id).await;

        tracing::info!(
            task_id = %task_id,
            filename = %file.filename,
            status = %report.status,
            elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "Task finished"
        );
        report
    }

    async fn run_stages(&self, task: &UploadTask, file: &UploadFile) -> TaskReport {
        self.transition(&task.id, TaskStatus::Classifying).await;
        let classification = classify(
            &file.filename,
            &file.media_type,
            file.size(),
            &self.config.extraction,
        );
        tracing::debug!(
            task_id = %task.id,
            kind = %classification.kind,
            reason = ?classification.reason,
            "Classified"
        );

        let mut report = TaskReport {
            task_id: task.id.clone(),
            filename: file.filename.clone(),
            kind: classification.kind,
            decision: classification.reason,
            status: TaskStatus::Classifying,
            outcome: TaskOutcome::Abandoned { inserted: 0 },
            extract: None,
            assets: 0,
            fallback_reason: None,
            started_at: task.started_at,
            finished_at: task.started_at,
        };

        if !classification.attempt_extraction {
            report.fallback_reason = Some(format!("{:?}", classification.reason));
            return self.upload_raw(task, file, report).await;
        }

        self.transition(&task.id, TaskStatus::Extracting).await;
        let result = match self.extract(task, file, &classification).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    task_id = %task.id,
                    error = %e,
                    "Extraction failed, falling back to raw upload"
                );
                report.fallback_reason = Some(e.to_string());
                return self.upload_raw(task, file, report).await;
            }
        };
        report.extract = Some(ExtractSummary::from(&result));

        self.transition(&task.id, TaskStatus::Reconstructing).await;
        let ExtractResult { text, images, .. } = result;
        let assets = AssetPipeline::new(self.config.images.clone())
            .ingest_all(images)
            .await;
        report.assets = assets.assets().len();
        let nodes = reconstruct(&text, &assets, &file.filename);
        drop(assets);

        self.transition(&task.id, TaskStatus::Inserting).await;
        let outcome = self
            .scheduler
            .insert(self.host.as_ref(), &task.id, nodes, self.sink.as_ref())
            .await;

        let status = match outcome {
            InsertOutcome::Inserted { nodes, batches } => {
                report.outcome = TaskOutcome::Inserted { nodes, batches };
                TaskStatus::Done
            }
            InsertOutcome::Abandoned { inserted } => {
                report.outcome = TaskOutcome::Abandoned { inserted };
                TaskStatus::Done
            }
            InsertOutcome::RecoveredWithError { error, .. } => {
                let error = IngestError::InsertionDispatchFailure(error);
                report.outcome = TaskOutcome::RecoveredWithError {
                    error: error.to_string(),
                };
                TaskStatus::Failed
            }
        };

        self.finish(report, status).await
    }

    /// Extract text and images, treating empty output as a failure.
    async fn extract(
        &self,
        task: &UploadTask,
        file: &UploadFile,
        classification: &Classification,
    ) -> Result<ExtractResult, IngestError> {
        let extractor = extractor_for(classification.kind, &self.config);
        let result = extract_blocking(extractor, file.bytes.clone(), self.config.max_text_bytes).await?;

        if result.truncated {
            tracing::warn!(
                task_id = %task.id,
                budget = self.config.max_text_bytes,
                "Extracted text truncated"
            );
        }

        if !result.has_content() {
            return Err(IngestError::ReconstructionDegenerate {
                filename: file.filename.clone(),
            });
        }
        Ok(result)
    }

    async fn upload_raw(&self, task: &UploadTask, file: &UploadFile, mut report: TaskReport) -> TaskReport {
        self.transition(&task.id, TaskStatus::UploadingRaw).await;

        let status = match self
            .fallback
            .upload(
                &self.validation,
                self.host.as_ref(),
                &task.id,
                file,
                self.sink.as_ref(),
            )
            .await
        {
            Ok((response, resolution)) => {
                if resolution == Resolution::Stranded {
                    tracing::warn!(task_id = %task.id, "Upload stored but placeholder left in document");
                }
                report.outcome = TaskOutcome::Uploaded { response };
                TaskStatus::Done
            }
            Err(e) => {
                report.outcome = TaskOutcome::UploadFailed {
                    error: e.to_string(),
                };
                TaskStatus::Failed
            }
        };

        self.finish(report, status).await
    }

    async fn finish(&self, mut report: TaskReport, status: TaskStatus) -> TaskReport {
        self.transition(&report.task_id, status).await;
        report.status = status;
        report.finished_at = Utc::now();
        report
    }

    async fn transition(&self, task_id: &str, status: TaskStatus) {
        if self.tracker.transition(task_id, status).await {
            self.sink.on_progress(ProgressTick::Status {
                task_id: task_id.to_string(),
                status,
            });
        }
    }
}
