//! Pipeline configuration.
//!
//! Loaded once from a JSON settings file (or built in code) and handed to
//! [`crate::pipeline::IngestPipeline::new`]. Upload endpoint validation is
//! computed once at that point and carried as [`ValidationState`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::classify::FormatKind;

/// How eagerly uploads are parsed instead of attached as raw files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    /// Extract PDFs, plain text and markup; attach everything else.
    #[default]
    Auto,
    /// Would prompt the user; with no prompt available it behaves like `Always`.
    Ask,
    /// Extract every allowed format under the size ceiling.
    Always,
    /// Never extract.
    Never,
}

impl std::str::FromStr for ParseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "ask" => Ok(Self::Ask),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            other => Err(format!("unknown parse mode: {}", other)),
        }
    }
}

/// Which files the classifier may send to an extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionPolicy {
    pub enabled: bool,
    pub max_extract_size_bytes: u64,
    pub allowed_formats: BTreeSet<FormatKind>,
    pub mode: ParseMode,
}

impl Default for ExtractionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_extract_size_bytes: 50 * 1024 * 1024,
            allowed_formats: [
                FormatKind::PagedBinary,
                FormatKind::CompoundBinary,
                FormatKind::PlainText,
                FormatKind::MarkupPassthrough,
            ]
            .into_iter()
            .collect(),
            mode: ParseMode::Auto,
        }
    }
}

/// Limits for extracted images.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageBudget {
    /// Encoded size an asset should fit in after recompression
    pub target_bytes: usize,
    /// Longest edge after scaling
    pub max_dimension: u32,
    /// Images narrower or shorter than this are treated as decoration
    pub min_dimension: u32,
    pub initial_quality: f32,
    pub min_quality: f32,
    /// Re-encode attempts; values below 4 are raised to 4
    pub max_attempts: u32,
}

impl Default for ImageBudget {
    fn default() -> Self {
        Self {
            target_bytes: 500_000,
            max_dimension: 1200,
            min_dimension: 10,
            initial_quality: 0.9,
            min_quality: 0.3,
            max_attempts: 4,
        }
    }
}

impl ImageBudget {
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(4)
    }
}

/// Batch sizes for the insertion scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InsertConfig {
    /// Sequences up to this length are inserted with a single replace
    pub single_batch_max: usize,
    /// Nodes per batch for longer sequences
    pub batch_size: usize,
}

impl Default for InsertConfig {
    fn default() -> Self {
        Self {
            single_batch_max: 64,
            batch_size: 32,
        }
    }
}

/// Where raw files go when they are not extracted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub endpoint: Option<String>,
    pub field_name: String,
    pub headers: BTreeMap<String, String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            field_name: "file".to_string(),
            headers: BTreeMap::new(),
        }
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub extraction: ExtractionPolicy,
    /// Upper bound on extracted text per file
    pub max_text_bytes: usize,
    /// Pages processed per batch by the PDF extractor
    pub pdf_page_batch: usize,
    pub images: ImageBudget,
    pub insert: InsertConfig,
    pub upload: UploadConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extraction: ExtractionPolicy::default(),
            max_text_bytes: 8 * 1024 * 1024,
            pdf_page_batch: 5,
            images: ImageBudget::default(),
            insert: InsertConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a JSON file.
    ///
    /// A missing file yields the defaults. A file that exists but does not
    /// parse is an error, so a typo never silently disables a policy.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Validate the parts of the configuration that are checked once.
    pub fn validate(&self) -> ValidationState {
        ValidationState::check(self.upload.endpoint.as_deref())
    }
}

/// Result of validating the upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointStatus {
    Missing,
    Invalid(String),
    Valid(String),
}

/// Validation results computed once when the pipeline is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationState {
    pub endpoint: EndpointStatus,
}

impl ValidationState {
    fn check(endpoint: Option<&str>) -> Self {
        let endpoint = match endpoint.map(str::trim) {
            None | Some("") => EndpointStatus::Missing,
            Some(url) if is_acceptable_endpoint(url) => EndpointStatus::Valid(url.to_string()),
            Some(url) => {
                tracing::warn!(endpoint = %url, "Upload endpoint is not a usable URL");
                EndpointStatus::Invalid(url.to_string())
            }
        };
        Self { endpoint }
    }
}

fn is_acceptable_endpoint(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    let rest = ["https://", "http://", "file://"]
        .iter()
        .find_map(|scheme| lower.strip_prefix(scheme));

    match rest {
        Some(rest) => !rest.is_empty() && !rest.contains(char::is_whitespace),
        // Same-origin paths are accepted as-is
        None => url.starts_with('/') && !url.contains(char::is_whitespace),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.images.target_bytes, 500_000);
        assert_eq!(config.images.max_dimension, 1200);
        assert_eq!(config.pdf_page_batch, 5);
        assert_eq!(config.extraction.mode, ParseMode::Auto);
        assert!(config
            .extraction
            .allowed_formats
            .contains(&FormatKind::CompoundBinary));
        assert!(!config
            .extraction
            .allowed_formats
            .contains(&FormatKind::Unsupported));
    }

    #[test]
    fn test_attempts_floor() {
        let budget = ImageBudget {
            max_attempts: 1,
            ..Default::default()
        };
        assert_eq!(budget.attempts(), 4);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load(&temp_dir.path().join("nope.json")).unwrap();
        assert_eq!(config.max_text_bytes, PipelineConfig::default().max_text_bytes);
    }

    #[test]
    fn test_load_partial_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "extraction": { "mode": "never" },
                "images": { "target_bytes": 1000 },
                "upload": { "endpoint": "https://example.com/upload" }
            }"#,
        )
        .unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.extraction.mode, ParseMode::Never);
        assert!(config.extraction.enabled);
        assert_eq!(config.images.target_bytes, 1000);
        assert_eq!(config.images.max_dimension, 1200);
        assert_eq!(config.upload.field_name, "file");
        assert_eq!(
            config.validate().endpoint,
            EndpointStatus::Valid("https://example.com/upload".to_string())
        );
    }

    #[test]
    fn test_load_invalid_json_is_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = PipelineConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_endpoint_validation() {
        assert_eq!(ValidationState::check(None).endpoint, EndpointStatus::Missing);
        assert_eq!(
            ValidationState::check(Some("  ")).endpoint,
            EndpointStatus::Missing
        );
        assert_eq!(
            ValidationState::check(Some("/api/upload")).endpoint,
            EndpointStatus::Valid("/api/upload".to_string())
        );
        assert!(matches!(
            ValidationState::check(Some("ftp://host/x")).endpoint,
            EndpointStatus::Invalid(_)
        ));
        assert!(matches!(
            ValidationState::check(Some("https://")).endpoint,
            EndpointStatus::Invalid(_)
        ));
    }

    #[test]
    fn test_parse_mode_from_str() {
        assert_eq!("ALWAYS".parse::<ParseMode>().unwrap(), ParseMode::Always);
        assert!("sometimes".parse::<ParseMode>().is_err());
    }
}
