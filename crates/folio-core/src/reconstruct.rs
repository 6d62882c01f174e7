//! Rebuilds document structure from extracted text.
//!
//! The extractors flatten every format into lines with a few in-band markers.
//! [`reconstruct`] reads them back in one pass and produces the node sequence
//! the insertion scheduler hands to the host tree.

use std::sync::LazyLock;

use regex::Regex;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::assets::{AssetSet, ImageAsset};
use crate::extract::IMAGE_PLACEHOLDER_PREFIX;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"IMAGE_PLACEHOLDER_(\d+)").expect("valid regex"));

static PAGE_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^--- Page (\d+) ---$").expect("valid regex"));

const CODE_FENCE: &str = "```";
const MAX_HEADING_LEVEL: usize = 4;

/// A run of inline text with its marks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineRun {
    pub text: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub bold: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub italic: bool,
}

impl InlineRun {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            bold: false,
            italic: false,
        }
    }

    pub fn italic(text: impl Into<String>) -> Self {
        Self {
            italic: true,
            ..Self::plain(text)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListItem {
    pub text: String,
}

/// Where an image node gets its pixels.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    /// An asset of this task, by asset index
    Asset { index: usize, asset: ImageAsset },
    /// A file the uploader stored elsewhere
    Remote { url: String },
}

impl Serialize for ImageSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ImageSource::Asset { index, asset } => {
                let mut s = serializer.serialize_struct("ImageSource", 7)?;
                s.serialize_field("kind", "asset")?;
                s.serialize_field("index", index)?;
                s.serialize_field("content_hash", &asset.content_hash)?;
                s.serialize_field("mime_type", &asset.mime_type)?;
                s.serialize_field("width", &asset.width)?;
                s.serialize_field("height", &asset.height)?;
                s.serialize_field("src", &asset.data_uri())?;
                s.end()
            }
            ImageSource::Remote { url } => {
                let mut s = serializer.serialize_struct("ImageSource", 2)?;
                s.serialize_field("kind", "remote")?;
                s.serialize_field("src", url)?;
                s.end()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageNode {
    pub source: ImageSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    pub editable: bool,
}

/// A node of the host document tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentNode {
    Paragraph { runs: Vec<InlineRun> },
    Heading { level: u8, runs: Vec<InlineRun> },
    List { items: Vec<ListItem> },
    CodeBlock { text: String },
    Image(ImageNode),
    /// Rendered bold by the host
    PageMarker { label: String },
    /// The host's base text node. Used for error text and upload references,
    /// never for reconstructed content.
    Text { text: String },
}

impl DocumentNode {
    pub fn paragraph(text: impl Into<String>) -> Self {
        DocumentNode::Paragraph {
            runs: vec![InlineRun::plain(text)],
        }
    }

    pub fn heading(level: u8, text: impl Into<String>) -> Self {
        DocumentNode::Heading {
            level,
            runs: vec![InlineRun::plain(text)],
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        DocumentNode::Text { text: text.into() }
    }

    /// The node's text with marks dropped.
    pub fn plain_text(&self) -> String {
        match self {
            DocumentNode::Paragraph { runs } | DocumentNode::Heading { runs, .. } => {
                runs.iter().map(|r| r.text.as_str()).collect()
            }
            DocumentNode::List { items } => items
                .iter()
                .map(|i| i.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            DocumentNode::CodeBlock { text } | DocumentNode::Text { text } => text.clone(),
            DocumentNode::PageMarker { label } => label.clone(),
            DocumentNode::Image(image) => image.alt.clone().unwrap_or_default(),
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, DocumentNode::Image(_))
    }
}

/// Rebuild nodes from extracted text.
///
/// Never returns an empty sequence: text with no content produces a single
/// paragraph naming `source_name`.
pub fn reconstruct(text: &str, assets: &AssetSet, source_name: &str) -> Vec<DocumentNode> {
    let mut reconstructor = Reconstructor::new(assets);
    for line in text.lines() {
        reconstructor.line(line);
    }
    let mut nodes = reconstructor.finish();

    if nodes.is_empty() {
        nodes.push(DocumentNode::paragraph(format!(
            "No content could be extracted from {}.",
            source_name
        )));
    }
    nodes
}

struct Reconstructor<'a> {
    assets: &'a AssetSet,
    nodes: Vec<DocumentNode>,
    paragraph: String,
    in_code_block: bool,
    code: Vec<String>,
    list_items: Vec<ListItem>,
}

impl<'a> Reconstructor<'a> {
    fn new(assets: &'a AssetSet) -> Self {
        Self {
            assets,
            nodes: Vec::new(),
            paragraph: String::new(),
            in_code_block: false,
            code: Vec::new(),
            list_items: Vec::new(),
        }
    }

    fn line(&mut self, line: &str) {
        let trimmed = line.trim();

        if trimmed.contains(IMAGE_PLACEHOLDER_PREFIX) {
            if let Some(caps) = PLACEHOLDER.captures(trimmed) {
                if caps.get(0).map(|m| m.as_str()) == Some(trimmed) {
                    self.image(&caps[1]);
                    return;
                }
                self.split_inline(line);
                return;
            }
        }

        if trimmed.starts_with(CODE_FENCE) {
            if self.in_code_block {
                self.flush_code();
                self.in_code_block = false;
            } else {
                self.flush_paragraph();
                self.flush_list();
                self.in_code_block = true;
            }
            return;
        }

        if self.in_code_block {
            self.code.push(line.to_string());
            return;
        }

        if trimmed.starts_with("[Image:") && trimmed.ends_with(']') {
            self.flush_paragraph();
            self.flush_list();
            self.nodes.push(DocumentNode::Paragraph {
                runs: vec![InlineRun::italic(trimmed)],
            });
            return;
        }

        if let Some(caps) = PAGE_SEPARATOR.captures(trimmed) {
            self.flush_paragraph();
            self.flush_list();
            self.nodes.push(DocumentNode::PageMarker {
                label: format!("Page {}", &caps[1]),
            });
            return;
        }

        if let Some((level, text)) = heading(trimmed) {
            self.flush_paragraph();
            self.flush_list();
            self.nodes.push(DocumentNode::heading(level, text));
            return;
        }

        if let Some(item) = trimmed
            .strip_prefix("• ")
            .or_else(|| trimmed.strip_prefix("- "))
        {
            self.flush_paragraph();
            self.list_items.push(ListItem {
                text: item.trim().to_string(),
            });
            return;
        }

        self.flush_list();

        if trimmed.is_empty() {
            self.flush_paragraph();
            return;
        }

        if self
            .paragraph
            .chars()
            .last()
            .is_some_and(|c| !c.is_whitespace())
        {
            self.paragraph.push(' ');
        }
        self.paragraph.push_str(line);
    }

    /// Handle a line with placeholders mixed into other text.
    fn split_inline(&mut self, line: &str) {
        let mut last = 0;
        let matches: Vec<(usize, usize, String)> = PLACEHOLDER
            .captures_iter(line)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                Some((whole.start(), whole.end(), caps[1].to_string()))
            })
            .collect();

        for (start, end, index) in matches {
            let before = &line[last..start];
            if !before.trim().is_empty() {
                self.line(before);
            }
            self.image(&index);
            last = end;
        }

        let rest = &line[last..];
        if !rest.trim().is_empty() {
            self.line(rest);
        }
    }

    fn image(&mut self, index: &str) {
        self.flush_paragraph();
        self.flush_list();
        if self.in_code_block {
            // Split the block around the image
            self.flush_code();
        }

        let resolved = index
            .parse::<usize>()
            .ok()
            .and_then(|n| self.assets.resolve(n));

        match resolved {
            Some((asset_index, asset)) => {
                self.nodes.push(DocumentNode::Image(ImageNode {
                    alt: asset.alt_text.clone(),
                    editable: asset.editable,
                    source: ImageSource::Asset {
                        index: asset_index,
                        asset: asset.clone(),
                    },
                }));
            }
            None => {
                tracing::debug!(index, "Image placeholder has no asset");
                self.nodes
                    .push(DocumentNode::paragraph(format!("[Image {} unavailable]", index)));
            }
        }
        self.nodes.push(DocumentNode::Paragraph { runs: Vec::new() });
    }

    fn flush_paragraph(&mut self) {
        let text = self.paragraph.trim();
        if !text.is_empty() {
            self.nodes.push(DocumentNode::paragraph(text));
        }
        self.paragraph.clear();
    }

    fn flush_list(&mut self) {
        if !self.list_items.is_empty() {
            self.nodes.push(DocumentNode::List {
                items: std::mem::take(&mut self.list_items),
            });
        }
    }

    fn flush_code(&mut self) {
        if !self.code.is_empty() {
            self.nodes.push(DocumentNode::CodeBlock {
                text: self.code.join("\n"),
            });
            self.code.clear();
        }
    }

    fn finish(mut self) -> Vec<DocumentNode> {
        self.flush_list();
        self.flush_code();
        self.flush_paragraph();
        self.nodes
    }
}

/// `#`..`####` followed by a space and some text.
fn heading(line: &str) -> Option<(u8, &str)> {
    let level = line.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > MAX_HEADING_LEVEL {
        return None;
    }
    let text = line[level..].strip_prefix(' ')?.trim();
    (!text.is_empty()).then_some((level as u8, text))
}
