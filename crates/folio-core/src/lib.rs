//! Folio Core - Document ingestion for the Folio editor
//!
//! This crate turns uploaded files into editor content:
//! - Format classification and the extract-or-upload decision
//! - Text and image extraction (PDF via lopdf, DOCX via zip + quick-xml)
//! - Image deduplication and recompression
//! - Structure reconstruction from extracted text
//! - Batched insertion into a live host document tree
//! - Raw upload fallback for everything that is not extracted

pub mod assets;
pub mod classify;
pub mod config;
pub mod error;
pub mod events;
pub mod extract;
pub mod host;
pub mod insert;
pub mod pipeline;
pub mod reconstruct;
pub mod upload;

#[cfg(test)]
mod testing;

pub use assets::{AssetPipeline, AssetSet, ImageAsset};
pub use classify::{classify, Classification, Decision, FormatKind};
pub use config::{ParseMode, PipelineConfig, ValidationState};
pub use error::{ExtractError, HostError, IngestError, UploadError};
pub use events::{ChannelSink, EventSink, NoOpSink, PipelineEvent, ProgressTick};
pub use extract::{ExtractResult, Extractor, ImageRef};
pub use host::{HostTree, MemoryTree, Range};
pub use insert::{InsertOutcome, InsertScheduler};
pub use pipeline::{IngestPipeline, TaskReport, TaskStatus, UploadFile, UploadTask};
pub use reconstruct::{reconstruct, DocumentNode};
pub use upload::{UploadResponse, Uploader};
