//! Error types for the ingestion pipeline.
//!
//! Each seam has its own enum. `IngestError` is the taxonomy the pipeline
//! reports to the event sink; the decision not to extract is not an error and
//! lives in [`crate::classify::Classification`].

use thiserror::Error;

/// Failure to turn a binary container into text.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    #[error("malformed {format} container: {message}")]
    Malformed {
        format: &'static str,
        message: String,
    },

    #[error("encrypted {format} containers are not supported")]
    Encrypted { format: &'static str },

    #[error("failed to read {part}: {message}")]
    Io { part: String, message: String },

    #[error("extractor panicked: {0}")]
    Panicked(String),
}

impl ExtractError {
    pub fn malformed(format: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            format,
            message: message.into(),
        }
    }

    pub fn io(part: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Io {
            part: part.into(),
            message: err.to_string(),
        }
    }
}

/// Errors reported by the host document tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("placeholder {0} not found")]
    PlaceholderMissing(String),

    #[error("placeholder {0} already exists")]
    DuplicatePlaceholder(String),

    #[error("range {from}..{to} is outside the document (len {len})")]
    StaleRange { from: usize, to: usize, len: usize },

    #[error("host rejected the update: {0}")]
    Rejected(String),
}

/// Errors from the raw upload path.
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    #[error("no upload endpoint configured")]
    EndpointNotConfigured,

    #[error("invalid upload endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("upload rejected: {0}")]
    Rejected(String),

    #[error("upload I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Pipeline-level failure taxonomy.
///
/// Every variant except `UploadFailure` is recovered inside the pipeline;
/// they still travel through the event sink and the logs.
#[derive(Debug, Clone, Error)]
pub enum IngestError {
    #[error("extraction failed: {0}")]
    ExtractionFailure(#[from] ExtractError),

    #[error("no content could be extracted from {filename}")]
    ReconstructionDegenerate { filename: String },

    #[error("insertion failed: {0}")]
    InsertionDispatchFailure(#[from] HostError),

    #[error("upload failed: {0}")]
    UploadFailure(#[from] UploadError),
}

impl IngestError {
    /// Whether the pipeline can still fall back to a raw upload.
    pub fn falls_back_to_upload(&self) -> bool {
        matches!(
            self,
            Self::ExtractionFailure(_) | Self::ReconstructionDegenerate { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_error_messages() {
        let err = ExtractError::malformed("pdf", "missing trailer");
        assert_eq!(err.to_string(), "malformed pdf container: missing trailer");

        let err = ExtractError::io("word/document.xml", "unexpected eof");
        assert!(err.to_string().contains("word/document.xml"));
    }

    #[test]
    fn test_ingest_error_fallback_classes() {
        let extract: IngestError = ExtractError::Encrypted { format: "pdf" }.into();
        assert!(extract.falls_back_to_upload());

        let degenerate = IngestError::ReconstructionDegenerate {
            filename: "empty.txt".to_string(),
        };
        assert!(degenerate.falls_back_to_upload());
        assert!(degenerate.to_string().contains("empty.txt"));

        let host: IngestError = HostError::Rejected("stale".to_string()).into();
        assert!(!host.falls_back_to_upload());

        let upload: IngestError = UploadError::EndpointNotConfigured.into();
        assert!(!upload.falls_back_to_upload());
    }
}
