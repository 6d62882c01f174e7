//! Compound-binary (DOCX) extraction.
//!
//! DOCX files are zip archives of Open XML parts; the body lives in
//! `word/document.xml` and images are relationship targets under
//! `word/media/`. Extraction runs in two passes:
//!
//! 1. element handlers convert the body into a small HTML-like markup,
//!    replacing every picture with an `IMAGE_PLACEHOLDER_<n>` token and
//!    recording its bytes;
//! 2. the markup is stripped to the text form the reconstructor reads:
//!    `#` headings, blank-line paragraphs, `•` bullets, `text [url]` links.

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek};

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use zip::ZipArchive;

use super::{
    image_placeholder, ExtractResult, Extractor, ImageRef, TextBuilder, IMAGE_PLACEHOLDER_PREFIX,
};
use crate::error::ExtractError;

const DOCUMENT_PART: &str = "word/document.xml";
const RELATIONSHIPS_PART: &str = "word/_rels/document.xml.rels";

/// Deepest heading level the markup keeps.
const MAX_HEADING_LEVEL: u8 = 4;

/// Extracts text and pictures from Word packages.
#[derive(Debug, Default)]
pub struct DocxExtractor;

impl DocxExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for DocxExtractor {
    fn extract(&self, bytes: &[u8], size_budget: usize) -> Result<ExtractResult, ExtractError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| ExtractError::malformed("docx", format!("failed to open archive: {}", e)))?;

        let document = read_part(&mut archive, DOCUMENT_PART)?
            .ok_or_else(|| ExtractError::malformed("docx", "missing word/document.xml"))?;

        let relationships = match read_part(&mut archive, RELATIONSHIPS_PART) {
            Ok(Some(xml)) => parse_relationships(&xml),
            Ok(None) => HashMap::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read relationships, images and links dropped");
                HashMap::new()
            }
        };

        let mut converter = MarkupConverter::new(&relationships, &mut archive);
        converter.convert(&document);
        let (markup, mut images) = converter.finish();

        let mut builder = TextBuilder::new(size_budget);
        builder.push_marked_text(&strip_markup(&markup));
        let (text, truncated) = builder.finish();

        if truncated {
            // Markers are numbered in document order, so the kept ones are a prefix
            let kept = text
                .lines()
                .filter(|line| line.trim_start().starts_with(IMAGE_PLACEHOLDER_PREFIX))
                .count();
            images.truncate(kept);
        }

        tracing::debug!(
            chars = text.len(),
            images = images.len(),
            truncated,
            "Extracted DOCX"
        );

        Ok(ExtractResult {
            text,
            images,
            page_count: None,
            truncated,
        })
    }
}

fn read_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, ExtractError> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(ExtractError::io(name, e)),
    };

    let mut content = String::new();
    file.read_to_string(&mut content)
        .map_err(|e| ExtractError::io(name, e))?;
    Ok(Some(content))
}

#[derive(Debug, Clone)]
struct Relationship {
    target: String,
    external: bool,
}

fn attribute(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .filter_map(Result::ok)
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn parse_relationships(xml: &str) -> HashMap<String, Relationship> {
    let mut relationships = HashMap::new();
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (attribute(e, b"Id"), attribute(e, b"Target")) {
                    let external = attribute(e, b"TargetMode")
                        .map(|mode| mode.eq_ignore_ascii_case("External"))
                        .unwrap_or(false);
                    relationships.insert(id, Relationship { target, external });
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed relationships part");
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    relationships
}

/// Resolve a relationship target relative to `word/`.
fn part_path(target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }

    let mut segments: Vec<&str> = vec!["word"];
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

fn mime_for_part(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "emf" => "image/emf",
        "wmf" => "image/wmf",
        _ => "application/octet-stream",
    }
}

fn heading_level(style: &str) -> Option<u8> {
    let lower = style.to_ascii_lowercase();
    if lower == "title" {
        return Some(1);
    }
    if lower == "subtitle" {
        return Some(2);
    }
    let rest = lower.strip_prefix("heading")?;
    let level: u8 = rest.trim().parse().ok()?;
    (level >= 1).then_some(level.min(MAX_HEADING_LEVEL))
}

/// Per-paragraph state while walking `w:p`.
#[derive(Debug, Default)]
struct Paragraph {
    heading: Option<u8>,
    list_item: bool,
    content: String,
}

/// First pass: Open XML body to intermediate markup.
struct MarkupConverter<'a, R: Read + Seek> {
    relationships: &'a HashMap<String, Relationship>,
    archive: &'a mut ZipArchive<R>,
    markup: String,
    images: Vec<ImageRef>,
    /// Nested paragraphs (text boxes) stack on top of their container
    paragraphs: Vec<Paragraph>,
    in_list: bool,
    in_text: bool,
    /// Whether each open hyperlink emitted an `<a>` tag
    links: Vec<bool>,
    pending_alt: Option<String>,
}

impl<'a, R: Read + Seek> MarkupConverter<'a, R> {
    fn new(relationships: &'a HashMap<String, Relationship>, archive: &'a mut ZipArchive<R>) -> Self {
        Self {
            relationships,
            archive,
            markup: String::new(),
            images: Vec::new(),
            paragraphs: Vec::new(),
            in_list: false,
            in_text: false,
            links: Vec::new(),
            pending_alt: None,
        }
    }

    fn convert(&mut self, xml: &str) {
        let mut reader = Reader::from_str(xml);
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => self.on_start(e),
                Ok(Event::Empty(ref e)) => self.on_empty(e),
                Ok(Event::End(ref e)) => self.on_end(e.local_name().as_ref()),
                Ok(Event::Text(ref t)) => {
                    if self.in_text {
                        match t.unescape() {
                            Ok(text) => self.push_content(&escape(text.as_ref())),
                            Err(e) => tracing::debug!(error = %e, "Bad text escape"),
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    // Keep everything converted so far
                    tracing::warn!(
                        position = reader.buffer_position(),
                        error = %e,
                        "DOCX body is malformed, stopping early"
                    );
                    break;
                }
                _ => {}
            }
            buf.clear();
        }

        while let Some(paragraph) = self.paragraphs.pop() {
            self.emit_paragraph(paragraph);
        }
        self.close_list();
    }

    fn on_start(&mut self, e: &BytesStart) {
        match e.local_name().as_ref() {
            b"p" => self.paragraphs.push(Paragraph::default()),
            b"t" => self.in_text = true,
            b"hyperlink" => {
                let href = attribute(e, b"id")
                    .and_then(|id| self.relationships.get(&id))
                    .filter(|rel| rel.external)
                    .map(|rel| rel.target.clone());
                match href {
                    Some(href) => {
                        self.push_content(&format!("<a href=\"{}\">", escape(href.as_str())));
                        self.links.push(true);
                    }
                    None => self.links.push(false),
                }
            }
            _ => self.on_empty(e),
        }
    }

    fn on_empty(&mut self, e: &BytesStart) {
        match e.local_name().as_ref() {
            b"pStyle" => {
                if let (Some(style), Some(paragraph)) = (attribute(e, b"val"), self.paragraphs.last_mut()) {
                    paragraph.heading = heading_level(&style);
                    if style.eq_ignore_ascii_case("ListBullet") {
                        paragraph.list_item = true;
                    }
                }
            }
            b"numPr" => {
                if let Some(paragraph) = self.paragraphs.last_mut() {
                    paragraph.list_item = true;
                }
            }
            b"tab" if self.in_run_content() => self.push_content(" "),
            b"br" | b"cr" if self.in_run_content() => self.push_content("<br/>"),
            b"docPr" => {
                self.pending_alt = attribute(e, b"descr")
                    .or_else(|| attribute(e, b"title"))
                    .filter(|alt| !alt.trim().is_empty());
            }
            b"blip" => {
                if let Some(id) = attribute(e, b"embed") {
                    self.on_image(&id);
                }
            }
            _ => {}
        }
    }

    fn on_end(&mut self, name: &[u8]) {
        match name {
            b"t" => self.in_text = false,
            b"hyperlink" => {
                if self.links.pop() == Some(true) {
                    self.push_content("</a>");
                }
            }
            b"p" => {
                if let Some(paragraph) = self.paragraphs.pop() {
                    self.emit_paragraph(paragraph);
                }
            }
            _ => {}
        }
    }

    fn in_run_content(&self) -> bool {
        !self.paragraphs.is_empty()
    }

    fn push_content(&mut self, s: &str) {
        match self.paragraphs.last_mut() {
            Some(paragraph) => paragraph.content.push_str(s),
            None => self.markup.push_str(s),
        }
    }

    /// Record a picture and leave its token in the markup.
    fn on_image(&mut self, rel_id: &str) {
        let alt = self.pending_alt.take();
        let Some(rel) = self.relationships.get(rel_id) else {
            tracing::debug!(rel_id, "Image relationship not found");
            return;
        };
        if rel.external {
            tracing::debug!(target = %rel.target, "Skipping linked (external) image");
            return;
        }

        let path = part_path(&rel.target);
        let mut bytes = Vec::new();
        let read = self
            .archive
            .by_name(&path)
            .map_err(|e| e.to_string())
            .and_then(|mut file| file.read_to_end(&mut bytes).map_err(|e| e.to_string()));
        if let Err(e) = read {
            tracing::warn!(part = %path, error = %e, "Failed to read image part");
            return;
        }

        let token = image_placeholder(self.images.len());
        let alt_attr = alt.as_deref().map(|a| escape(a).into_owned()).unwrap_or_default();
        self.images
            .push(ImageRef::raw(bytes, mime_for_part(&path)).with_alt(alt));
        self.push_content(&format!("<img src=\"{}\" alt=\"{}\"/>", token, alt_attr));
    }

    fn emit_paragraph(&mut self, paragraph: Paragraph) {
        let content = paragraph.content.trim();

        if paragraph.list_item && paragraph.heading.is_none() {
            if !self.in_list {
                self.markup.push_str("<ul>");
                self.in_list = true;
            }
            if !content.is_empty() {
                self.markup.push_str(&format!("<li>{}</li>", content));
            }
            return;
        }

        self.close_list();
        if content.is_empty() {
            return;
        }

        match paragraph.heading {
            Some(level) => self
                .markup
                .push_str(&format!("<h{level}>{content}</h{level}>")),
            None => self.markup.push_str(&format!("<p>{}</p>", content)),
        }
    }

    fn close_list(&mut self) {
        if self.in_list {
            self.markup.push_str("</ul>");
            self.in_list = false;
        }
    }

    fn finish(self) -> (String, Vec<ImageRef>) {
        (self.markup, self.images)
    }
}

/// Second pass: intermediate markup to marker text.
fn strip_markup(markup: &str) -> String {
    let wrapped = format!("<body>{}</body>", markup);
    let mut reader = Reader::from_str(&wrapped);
    let mut buf = Vec::new();

    let mut out = String::new();
    // (href, position where the link text starts)
    let mut links: Vec<(Option<String>, usize)> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"h1" | b"h2" | b"h3" | b"h4" => {
                    let level = (e.local_name().as_ref()[1] - b'0') as usize;
                    start_line(&mut out);
                    out.push_str(&"#".repeat(level));
                    out.push(' ');
                }
                b"li" => {
                    start_line(&mut out);
                    out.push_str("• ");
                }
                b"a" => links.push((attribute(e, b"href"), out.len())),
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"h1" | b"h2" | b"h3" | b"h4" | b"p" => {
                    trim_trailing_spaces(&mut out);
                    out.push_str("\n\n");
                }
                b"li" => {
                    trim_trailing_spaces(&mut out);
                    out.push('\n');
                }
                b"ul" => out.push('\n'),
                b"a" => {
                    if let Some((Some(href), start)) = links.pop() {
                        let label = out.get(start..).unwrap_or_default().trim();
                        if label != href {
                            out.push_str(&format!(" [{}]", href));
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"br" => out.push('\n'),
                b"img" => {
                    if let Some(src) = attribute(e, b"src") {
                        start_line(&mut out);
                        out.push_str(&src);
                        out.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::Text(ref t)) => {
                if let Ok(text) = t.unescape() {
                    out.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to strip intermediate markup");
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    collapse_blank_lines(out.trim())
}

fn start_line(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

fn trim_trailing_spaces(out: &mut String) {
    let trimmed = out.trim_end_matches([' ', '\t']).len();
    out.truncate(trimmed);
}

/// Collapse runs of blank lines to a single blank line.
fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0;
    for c in text.chars() {
        if c == '\n' {
            newlines += 1;
            if newlines <= 2 {
                out.push(c);
            }
        } else {
            newlines = 0;
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use crate::extract::ImageData;

    const RELS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="media/image1.png"/>
  <Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://example.com/docs" TargetMode="External"/>
  <Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="../word/media/missing.png"/>
</Relationships>"#;

    fn body(inner: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"
            xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"
            xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main"
            xmlns:wp="http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing">
<w:body>{}</w:body></w:document>"#,
            inner
        )
    }

    fn para(style: Option<&str>, text: &str) -> String {
        let props = style
            .map(|s| format!(r#"<w:pPr><w:pStyle w:val="{}"/></w:pPr>"#, s))
            .unwrap_or_default();
        format!(r#"<w:p>{}<w:r><w:t xml:space="preserve">{}</w:t></w:r></w:p>"#, props, text)
    }

    fn list_item(text: &str) -> String {
        format!(
            r#"<w:p><w:pPr><w:numPr><w:ilvl w:val="0"/><w:numId w:val="1"/></w:numPr></w:pPr><w:r><w:t>{}</w:t></w:r></w:p>"#,
            text
        )
    }

    fn picture(rel_id: &str, descr: &str) -> String {
        format!(
            r#"<w:p><w:r><w:drawing><wp:inline><wp:docPr id="1" name="Picture 1" descr="{}"/><a:graphic><a:graphicData><a:blip r:embed="{}"/></a:graphicData></a:graphic></wp:inline></w:drawing></w:r></w:p>"#,
            descr, rel_id
        )
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(12, 12, image::Rgb([10, 20, 30]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn create_docx(document: &str, with_rels: bool) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

        writer.start_file(DOCUMENT_PART, options).unwrap();
        writer.write_all(document.as_bytes()).unwrap();

        if with_rels {
            writer.start_file(RELATIONSHIPS_PART, options).unwrap();
            writer.write_all(RELS.as_bytes()).unwrap();
            writer.start_file("word/media/image1.png", options).unwrap();
            writer.write_all(&png_bytes()).unwrap();
        }

        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_headings_paragraphs_and_lists() {
        let document = body(&[
            para(Some("Title"), "Quarterly Report"),
            para(Some("Heading2"), "Summary"),
            para(None, "Revenue grew."),
            list_item("First point"),
            list_item("Second point"),
            para(Some("Heading4"), "Detail"),
            para(Some("Heading6"), "Deep"),
        ]
        .concat());

        let result = DocxExtractor::new()
            .extract(&create_docx(&document, false), 1 << 20)
            .unwrap();

        assert_eq!(
            result.text,
            "# Quarterly Report\n\n## Summary\n\nRevenue grew.\n\n• First point\n• Second point\n\n#### Detail\n\n#### Deep"
        );
        assert!(result.images.is_empty());
    }

    #[test]
    fn test_images_become_placeholders() {
        let document = body(&[
            para(None, "Before"),
            picture("rId1", "A chart"),
            picture("rId1", ""),
            picture("rId3", "gone"),
            para(None, "After"),
        ]
        .concat());

        let result = DocxExtractor::new()
            .extract(&create_docx(&document, true), 1 << 20)
            .unwrap();

        assert_eq!(
            result.text,
            "Before\n\nIMAGE_PLACEHOLDER_0\n\nIMAGE_PLACEHOLDER_1\n\nAfter"
        );
        assert_eq!(result.images.len(), 2);
        assert_eq!(result.images[0].alt_text.as_deref(), Some("A chart"));
        assert_eq!(result.images[1].alt_text, None);
        match &result.images[0].data {
            ImageData::Raw { bytes, mime_type } => {
                assert_eq!(mime_type, "image/png");
                assert_eq!(bytes.as_ref(), png_bytes().as_slice());
            }
            other => panic!("unexpected image data {:?}", other),
        }
    }

    #[test]
    fn test_budget_drops_cut_image_markers() {
        let document = body(&[
            para(None, "Before"),
            picture("rId1", "First"),
            picture("rId1", "Second"),
            para(None, "After"),
        ]
        .concat());

        let result = DocxExtractor::new()
            .extract(&create_docx(&document, true), 35)
            .unwrap();

        assert!(result.truncated);
        assert_eq!(result.text, "Before\n\nIMAGE_PLACEHOLDER_0\n\n");
        assert_eq!(result.images.len(), 1);
        assert_eq!(result.images[0].alt_text.as_deref(), Some("First"));
    }

    #[test]
    fn test_links_rendered_with_url() {
        let document = body(
            r#"<w:p><w:r><w:t xml:space="preserve">See </w:t></w:r><w:hyperlink r:id="rId2"><w:r><w:t>the docs</w:t></w:r></w:hyperlink><w:r><w:t xml:space="preserve"> for more &amp; less.</w:t></w:r></w:p>"#,
        );

        let result = DocxExtractor::new()
            .extract(&create_docx(&document, true), 1 << 20)
            .unwrap();

        assert_eq!(
            result.text,
            "See the docs [https://example.com/docs] for more & less."
        );
    }

    #[test]
    fn test_markup_characters_in_text_survive() {
        let document = body(&para(None, "a &lt;b&gt; c"));
        let result = DocxExtractor::new()
            .extract(&create_docx(&document, false), 1 << 20)
            .unwrap();
        assert_eq!(result.text, "a <b> c");
    }

    #[test]
    fn test_truncated_body_keeps_converted_text() {
        let mut document = body(&[para(None, "Kept"), para(None, "Also kept")].concat());
        document.truncate(document.find("</w:body>").unwrap());
        document.push_str("<w:p><w:r><w:t>broken");

        let result = DocxExtractor::new()
            .extract(&create_docx(&document, false), 1 << 20)
            .unwrap();
        assert!(result.text.starts_with("Kept\n\nAlso kept"));
    }

    #[test]
    fn test_not_a_zip() {
        let err = DocxExtractor::new()
            .extract(b"plain bytes", 1024)
            .unwrap_err();
        assert!(matches!(err, ExtractError::Malformed { format: "docx", .. }));
    }

    #[test]
    fn test_missing_document_part() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("other.txt", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"hi").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let err = DocxExtractor::new().extract(&bytes, 1024).unwrap_err();
        assert!(err.to_string().contains("missing word/document.xml"));
    }

    #[test]
    fn test_part_path() {
        assert_eq!(part_path("media/image1.png"), "word/media/image1.png");
        assert_eq!(part_path("../media/a.png"), "media/a.png");
        assert_eq!(part_path("/word/media/b.jpeg"), "word/media/b.jpeg");
        assert_eq!(mime_for_part("word/media/b.JPEG"), "image/jpeg");
    }

    #[test]
    fn test_heading_level() {
        assert_eq!(heading_level("Heading1"), Some(1));
        assert_eq!(heading_level("heading 3"), Some(3));
        assert_eq!(heading_level("Heading9"), Some(4));
        assert_eq!(heading_level("Title"), Some(1));
        assert_eq!(heading_level("Normal"), None);
        assert_eq!(heading_level("Heading0"), None);
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\n\n\nb\nc"), "a\n\nb\nc");
    }
}
