//! Raw file upload, used when a file is not extracted.
//!
//! The network side is a seam: the host supplies an [`Uploader`]. The
//! [`FallbackUploader`] checks the validated endpoint, calls it, and resolves
//! the task's placeholder with a reference to the stored file.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::classify::is_image;
use crate::config::{EndpointStatus, UploadConfig, ValidationState};
use crate::error::{IngestError, UploadError};
use crate::events::EventSink;
use crate::host::HostTree;
use crate::pipeline::UploadFile;
use crate::reconstruct::{DocumentNode, ImageNode, ImageSource};

/// What an uploader returns: a URL object or a bare reference string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UploadResponse {
    Url { url: String },
    Text(String),
}

/// Stores a raw file somewhere and returns a reference to it.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(
        &self,
        file: &UploadFile,
        field_name: &str,
        endpoint: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<UploadResponse, UploadError>;
}

/// How the placeholder ended up after a fallback upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Replaced,
    Removed,
    /// The placeholder was already gone
    Vanished,
    /// The host refused to remove the placeholder; it is still in the tree
    Stranded,
}

/// Nodes that reference an uploaded file.
pub fn reference_nodes(file: &UploadFile, response: &UploadResponse) -> Vec<DocumentNode> {
    match response {
        UploadResponse::Url { url } if is_image(&file.filename, &file.media_type) => {
            vec![DocumentNode::Image(ImageNode {
                source: ImageSource::Remote { url: url.clone() },
                alt: Some(file.filename.clone()),
                editable: true,
            })]
        }
        UploadResponse::Url { url } => {
            vec![DocumentNode::text(format!("{} [{}]", file.filename, url))]
        }
        UploadResponse::Text(reference) => vec![DocumentNode::text(reference.clone())],
    }
}

/// Uploads raw files and resolves their placeholders.
pub struct FallbackUploader {
    uploader: Arc<dyn Uploader>,
    field_name: String,
    headers: BTreeMap<String, String>,
}

impl FallbackUploader {
    pub fn new(uploader: Arc<dyn Uploader>, config: &UploadConfig) -> Self {
        Self {
            uploader,
            field_name: config.field_name.clone(),
            headers: config.headers.clone(),
        }
    }

    /// Upload `file` and replace the placeholder of `task_id` with a reference.
    ///
    /// On failure the placeholder is removed and the sink hears about it.
    pub async fn upload(
        &self,
        validation: &ValidationState,
        host: &dyn HostTree,
        task_id: &str,
        file: &UploadFile,
        sink: &dyn EventSink,
    ) -> Result<(UploadResponse, Resolution), UploadError> {
        let result = match &validation.endpoint {
            EndpointStatus::Valid(endpoint) => {
                tracing::info!(
                    task_id,
                    filename = %file.filename,
                    size = file.bytes.len(),
                    "Uploading raw file"
                );
                self.uploader
                    .upload(file, &self.field_name, endpoint, &self.headers)
                    .await
            }
            EndpointStatus::Missing => Err(UploadError::EndpointNotConfigured),
            EndpointStatus::Invalid(endpoint) => Err(UploadError::InvalidEndpoint(endpoint.clone())),
        };

        match result {
            Ok(response) => {
                let resolution = self
                    .resolve(host, task_id, reference_nodes(file, &response))
                    .await;
                sink.on_upload_success(file, &response);
                Ok((response, resolution))
            }
            Err(e) => {
                tracing::warn!(task_id, filename = %file.filename, error = %e, "Raw upload failed");
                remove_placeholder(host, task_id).await;
                sink.on_upload_error(file, &IngestError::UploadFailure(e.clone()));
                Err(e)
            }
        }
    }

    async fn resolve(&self, host: &dyn HostTree, task_id: &str, nodes: Vec<DocumentNode>) -> Resolution {
        let Some(range) = host.find_placeholder(task_id).await else {
            tracing::debug!(task_id, "Placeholder gone before upload finished");
            return Resolution::Vanished;
        };

        match host.replace_range(range, nodes).await {
            Ok(()) => Resolution::Replaced,
            Err(e) => {
                tracing::warn!(task_id, error = %e, "Failed to insert upload reference");
                remove_placeholder(host, task_id).await
            }
        }
    }
}

/// Remove the placeholder of `task_id` if it is still there.
pub(crate) async fn remove_placeholder(host: &dyn HostTree, task_id: &str) -> Resolution {
    let Some(range) = host.find_placeholder(task_id).await else {
        return Resolution::Vanished;
    };
    match host.replace_range(range, Vec::new()).await {
        Ok(()) => Resolution::Removed,
        Err(e) => {
            tracing::error!(task_id, error = %e, "Failed to remove placeholder");
            Resolution::Stranded
        }
    }
}
