//! Format extractors.
//!
//! Every extractor turns raw bytes into an [`ExtractResult`]: flat text with
//! in-band structure markers plus the images it surfaced, referenced from the
//! text as `IMAGE_PLACEHOLDER_<n>` lines.
//!
//! ```text
//! FormatKind ──► extractor_for() ──► Extractor::extract(bytes, budget)
//!                                          │
//!                     ┌────────────────────┼────────────────────┐
//!                     ▼                    ▼                    ▼
//!               PdfExtractor         DocxExtractor      Text / Unsupported
//!              (lopdf, pages)     (zip + quick-xml)      (passthrough)
//! ```

mod docx;
mod pdf;
mod text;

pub use docx::DocxExtractor;
pub use pdf::PdfExtractor;
pub use text::{TextExtractor, UnsupportedExtractor};

use bytes::Bytes;
use serde::Serialize;

use crate::classify::FormatKind;
use crate::config::PipelineConfig;
use crate::error::ExtractError;

/// Prefix of the in-band image marker.
pub const IMAGE_PLACEHOLDER_PREFIX: &str = "IMAGE_PLACEHOLDER_";

/// The marker for image `index`.
pub fn image_placeholder(index: usize) -> String {
    format!("{}{}", IMAGE_PLACEHOLDER_PREFIX, index)
}

/// The separator line written before page `number` (1-indexed).
pub fn page_separator(number: usize) -> String {
    format!("--- Page {} ---", number)
}

/// Whether `line` is a page separator.
pub fn is_page_separator(line: &str) -> bool {
    line.trim()
        .strip_prefix("--- Page ")
        .and_then(|rest| rest.strip_suffix(" ---"))
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Image payload as surfaced by an extractor.
#[derive(Debug, Clone)]
pub enum ImageData {
    Raw { bytes: Bytes, mime_type: String },
    DataUri(String),
}

/// An image found during extraction, before deduplication.
#[derive(Debug, Clone)]
pub struct ImageRef {
    pub data: ImageData,
    pub alt_text: Option<String>,
    /// Whether the host should let the user edit the image in place
    pub editable: bool,
}

impl ImageRef {
    pub fn raw(bytes: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        Self {
            data: ImageData::Raw {
                bytes: bytes.into(),
                mime_type: mime_type.into(),
            },
            alt_text: None,
            editable: true,
        }
    }

    pub fn with_alt(mut self, alt_text: Option<String>) -> Self {
        self.alt_text = alt_text.filter(|a| !a.trim().is_empty());
        self
    }
}

/// Output of a single extractor run.
#[derive(Debug, Clone, Default)]
pub struct ExtractResult {
    pub text: String,
    pub images: Vec<ImageRef>,
    /// Number of pages, for paged formats
    pub page_count: Option<usize>,
    /// Text stopped at the size budget
    pub truncated: bool,
}

impl ExtractResult {
    /// Whether the extraction produced anything worth reconstructing.
    ///
    /// Page separators alone do not count: a scanned PDF yields one per page
    /// and nothing else.
    pub fn has_content(&self) -> bool {
        !self.images.is_empty()
            || self
                .text
                .lines()
                .any(|line| !line.trim().is_empty() && !is_page_separator(line))
    }
}

/// Summary of an extraction, for logs and progress reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractSummary {
    pub chars: usize,
    pub images: usize,
    pub page_count: Option<usize>,
    pub truncated: bool,
}

impl From<&ExtractResult> for ExtractSummary {
    fn from(result: &ExtractResult) -> Self {
        Self {
            chars: result.text.chars().count(),
            images: result.images.len(),
            page_count: result.page_count,
            truncated: result.truncated,
        }
    }
}

/// Turns the bytes of one container format into text and images.
///
/// Implementations return `Err` only when the container as a whole cannot be
/// read; damage inside it (a bad page, a broken image part) degrades to
/// partial output and a logged warning.
pub trait Extractor: Send + Sync {
    fn extract(&self, bytes: &[u8], size_budget: usize) -> Result<ExtractResult, ExtractError>;
}

/// The extractor for a format.
pub fn extractor_for(kind: FormatKind, config: &PipelineConfig) -> Box<dyn Extractor> {
    match kind {
        FormatKind::PagedBinary => Box::new(PdfExtractor::new(
            config.pdf_page_batch,
            config.images.min_dimension,
        )),
        FormatKind::CompoundBinary => Box::new(DocxExtractor::new()),
        FormatKind::PlainText | FormatKind::MarkupPassthrough => Box::new(TextExtractor::new()),
        FormatKind::Unsupported => Box::new(UnsupportedExtractor),
    }
}

/// Run an extractor on the blocking pool.
///
/// Errors and panics both come back as `Err` so the caller can fall back to
/// a raw upload without ever unwinding through the pipeline.
pub async fn extract_blocking(
    extractor: Box<dyn Extractor>,
    bytes: Bytes,
    size_budget: usize,
) -> Result<ExtractResult, ExtractError> {
    match tokio::task::spawn_blocking(move || extractor.extract(&bytes, size_budget)).await {
        Ok(result) => result,
        Err(e) => Err(ExtractError::Panicked(e.to_string())),
    }
}

/// Accumulates extracted text up to a byte budget.
#[derive(Debug)]
pub(crate) struct TextBuilder {
    text: String,
    budget: usize,
    truncated: bool,
}

impl TextBuilder {
    pub(crate) fn new(budget: usize) -> Self {
        Self {
            text: String::new(),
            budget,
            truncated: false,
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.truncated
    }

    /// Append text, cutting at a char boundary when the budget runs out.
    pub(crate) fn push_str(&mut self, s: &str) {
        if self.truncated {
            return;
        }
        let room = self.budget.saturating_sub(self.text.len());
        if s.len() <= room {
            self.text.push_str(s);
            return;
        }

        let mut cut = room;
        while cut > 0 && !s.is_char_boundary(cut) {
            cut -= 1;
        }
        self.text.push_str(&s[..cut]);
        self.truncated = true;
    }

    /// Append a line, making sure it starts on a fresh line.
    pub(crate) fn push_line(&mut self, line: &str) {
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.push_str("\n");
        }
        self.push_str(line);
        self.push_str("\n");
    }

    /// Append a line only if all of it fits; otherwise stop accepting text.
    ///
    /// Markers must never be cut, since a partial `IMAGE_PLACEHOLDER_12`
    /// reads as a different image.
    pub(crate) fn push_whole_line(&mut self, line: &str) -> bool {
        if self.truncated {
            return false;
        }
        let lead = usize::from(!self.text.is_empty() && !self.text.ends_with('\n'));
        let needed = lead + line.len() + 1;
        if self.text.len() + needed > self.budget {
            self.truncated = true;
            return false;
        }
        self.push_line(line);
        true
    }

    /// Append multi-line text, stopping before any image marker that would
    /// be cut by the budget.
    pub(crate) fn push_marked_text(&mut self, s: &str) {
        for chunk in s.split_inclusive('\n') {
            if self.truncated {
                return;
            }
            let is_marker = chunk.trim_start().starts_with(IMAGE_PLACEHOLDER_PREFIX);
            if is_marker && self.text.len() + chunk.len() > self.budget {
                self.truncated = true;
                return;
            }
            self.push_str(chunk);
        }
    }

    /// Append an empty line unless the text already ends with one.
    pub(crate) fn push_break(&mut self) {
        if !self.text.is_empty() && !self.text.ends_with("\n\n") {
            if self.text.ends_with('\n') {
                self.push_str("\n");
            } else {
                self.push_str("\n\n");
            }
        }
    }

    pub(crate) fn finish(self) -> (String, bool) {
        (self.text, self.truncated)
    }
}
