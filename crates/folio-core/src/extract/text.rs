//! Plain text and markup passthrough.

use super::{ExtractResult, Extractor, TextBuilder};
use crate::error::ExtractError;

const BOM: char = '\u{feff}';

/// Passes text through with minimal normalization.
///
/// Used for plain text, Markdown, HTML and CSV. Markup is not interpreted;
/// it reaches the reconstructor as literal text.
#[derive(Debug, Default)]
pub struct TextExtractor;

impl TextExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for TextExtractor {
    fn extract(&self, bytes: &[u8], size_budget: usize) -> Result<ExtractResult, ExtractError> {
        let decoded = String::from_utf8_lossy(bytes);
        let decoded = decoded.strip_prefix(BOM).unwrap_or(&decoded);
        let normalized = decoded.replace("\r\n", "\n").replace('\r', "\n");

        let mut builder = TextBuilder::new(size_budget);
        builder.push_str(&normalized);
        let (text, truncated) = builder.finish();

        if truncated {
            tracing::warn!(budget = size_budget, "Text truncated at size budget");
        }

        Ok(ExtractResult {
            text,
            images: Vec::new(),
            page_count: None,
            truncated,
        })
    }
}

/// Formats we recognise but do not parse (RTF and similar).
#[derive(Debug, Default)]
pub struct UnsupportedExtractor;

impl Extractor for UnsupportedExtractor {
    fn extract(&self, bytes: &[u8], _size_budget: usize) -> Result<ExtractResult, ExtractError> {
        tracing::debug!(len = bytes.len(), "No extractor for format, returning empty text");
        Ok(ExtractResult::default())
    }
}
