//! Paged-binary (PDF) extraction with lopdf.
//!
//! Pages are walked in fixed-size batches, with the text budget checked
//! before every page and progress logged per batch. For each page the text run comes
//! from `Document::extract_text`, and the page's content stream is walked
//! separately for `Do` operators so embedded raster images can be surfaced in
//! reading order after the page text.

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use super::{image_placeholder, page_separator, ExtractResult, Extractor, ImageRef, TextBuilder};
use crate::error::ExtractError;

/// Form XObjects can nest; deeper nesting is ignored.
const MAX_FORM_DEPTH: usize = 4;

/// Parent links followed when looking for inherited page resources.
const MAX_PARENT_DEPTH: usize = 32;

/// Extracts text and images from PDF bytes.
#[derive(Debug, Clone)]
pub struct PdfExtractor {
    page_batch: usize,
    min_dimension: u32,
}

impl PdfExtractor {
    pub fn new(page_batch: usize, min_dimension: u32) -> Self {
        Self {
            page_batch: page_batch.max(1),
            min_dimension,
        }
    }
}

impl Default for PdfExtractor {
    fn default() -> Self {
        Self::new(5, 10)
    }
}

impl Extractor for PdfExtractor {
    fn extract(&self, bytes: &[u8], size_budget: usize) -> Result<ExtractResult, ExtractError> {
        let doc = Document::load_mem(bytes).map_err(|e| ExtractError::malformed("pdf", e.to_string()))?;
        if doc.is_encrypted() {
            return Err(ExtractError::Encrypted { format: "pdf" });
        }

        let pages: Vec<(u32, ObjectId)> = doc.get_pages().into_iter().collect();
        let page_count = pages.len();

        let mut builder = TextBuilder::new(size_budget);
        let mut images = Vec::new();

        'batches: for (batch_index, batch) in pages.chunks(self.page_batch).enumerate() {
            for &(page_num, page_id) in batch {
                if builder.is_full() {
                    break 'batches;
                }
                self.extract_page(&doc, page_num, page_id, &mut builder, &mut images);
            }

            tracing::debug!(
                batch = batch_index,
                pages = batch.len(),
                images = images.len(),
                "Processed page batch"
            );
        }

        let (text, truncated) = builder.finish();
        if truncated {
            tracing::warn!(budget = size_budget, page_count, "PDF text truncated at size budget");
        }

        tracing::debug!(
            chars = text.len(),
            page_count,
            images = images.len(),
            "Extracted PDF"
        );

        Ok(ExtractResult {
            text,
            images,
            page_count: Some(page_count),
            truncated,
        })
    }
}

impl PdfExtractor {
    fn extract_page(
        &self,
        doc: &Document,
        page_num: u32,
        page_id: ObjectId,
        builder: &mut TextBuilder,
        images: &mut Vec<ImageRef>,
    ) {
        if !builder.push_whole_line(&page_separator(page_num as usize)) {
            return;
        }

        match doc.extract_text(&[page_num]) {
            Ok(page_text) => {
                let page_text = page_text.trim_end();
                if !page_text.is_empty() {
                    builder.push_str(page_text);
                    builder.push_str("\n");
                }
            }
            Err(e) => {
                tracing::warn!(page = page_num, error = %e, "Failed to extract page text");
            }
        }

        if builder.is_full() {
            return;
        }

        let resources = page_resources(doc, page_id);
        let content = match doc.get_page_content(page_id) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(page = page_num, error = %e, "Failed to read page content");
                return;
            }
        };

        let mut found = Vec::new();
        self.walk_content(doc, &content, resources, 0, &mut found);

        for image in found {
            if !builder.push_whole_line(&image_placeholder(images.len())) {
                break;
            }
            images.push(image);
        }
    }

    /// Collect images drawn by `Do` operators in a content stream.
    fn walk_content(
        &self,
        doc: &Document,
        content: &[u8],
        resources: Option<&Dictionary>,
        depth: usize,
        found: &mut Vec<ImageRef>,
    ) {
        let operations = match Content::decode(content) {
            Ok(content) => content.operations,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to decode content stream");
                return;
            }
        };

        for op in operations.iter().filter(|op| op.operator == "Do") {
            let Some(name) = op.operands.first().and_then(|o| o.as_name().ok()) else {
                continue;
            };
            let Some(stream) = resources.and_then(|r| lookup_xobject(doc, r, name)) else {
                tracing::debug!(name = %String::from_utf8_lossy(name), "XObject not found");
                continue;
            };

            match stream.dict.get(b"Subtype").and_then(Object::as_name) {
                Ok(b"Image") => {
                    if let Some(image) = self.surface_image(doc, stream) {
                        found.push(image);
                    }
                }
                Ok(b"Form") if depth < MAX_FORM_DEPTH => {
                    let form_content = stream_bytes(stream);
                    let form_resources = stream
                        .dict
                        .get(b"Resources")
                        .ok()
                        .and_then(|o| resolve_dict(doc, o))
                        .or(resources);
                    if let Some(form_content) = form_content {
                        self.walk_content(doc, &form_content, form_resources, depth + 1, found);
                    }
                }
                _ => {}
            }
        }
    }

    /// Decode, filter, sign and re-encode one image XObject.
    fn surface_image(&self, doc: &Document, stream: &Stream) -> Option<ImageRef> {
        let decoded = match decode_image(doc, stream) {
            Ok(decoded) => decoded,
            Err(reason) => {
                tracing::debug!(reason = %reason, "Skipping image XObject");
                return None;
            }
        };

        if decoded.width() < self.min_dimension || decoded.height() < self.min_dimension {
            tracing::trace!(
                width = decoded.width(),
                height = decoded.height(),
                "Skipping decorative image"
            );
            return None;
        }

        let alt_text = stream.dict.get(b"Alt").ok().and_then(text_string);

        let mut canvas = decoded.to_rgba8();
        stamp_signature(&mut canvas, alt_text.as_deref());

        let mut encoded = Vec::new();
        if let Err(e) =
            DynamicImage::ImageRgba8(canvas).write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
        {
            tracing::warn!(error = %e, "Failed to encode extracted image");
            return None;
        }

        Some(ImageRef::raw(encoded, "image/png").with_alt(alt_text))
    }
}

/// Mark a render with a digest of its pixels and its annotation.
///
/// Two draws of the same image with the same annotation produce identical
/// bytes and later collapse to one asset; the same pixels with different
/// annotations stay distinct.
fn stamp_signature(canvas: &mut RgbaImage, annotation: Option<&str>) {
    let (width, height) = canvas.dimensions();
    if width == 0 || height == 0 {
        return;
    }

    let mut hasher = blake3::Hasher::new();
    hasher.update(canvas.as_raw());
    hasher.update(annotation.unwrap_or_default().as_bytes());
    let digest = hasher.finalize();
    let signature = digest.as_bytes();

    let pixel = canvas.get_pixel_mut(width - 1, height - 1);
    for (channel, bits) in pixel.0.iter_mut().take(3).zip(signature.iter()) {
        *channel = (*channel & !0b11) | (bits & 0b11);
    }
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    resolve(doc, obj).and_then(|o| o.as_dict().ok())
}

/// Resources of a page, following `Parent` links for inherited entries.
fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = doc.get_dictionary(page_id).ok()?;

    for _ in 0..MAX_PARENT_DEPTH {
        if let Some(resources) = node.get(b"Resources").ok().and_then(|o| resolve_dict(doc, o)) {
            return Some(resources);
        }
        node = node
            .get(b"Parent")
            .ok()
            .and_then(|o| resolve_dict(doc, o))?;
    }
    None
}

fn lookup_xobject<'a>(doc: &'a Document, resources: &'a Dictionary, name: &[u8]) -> Option<&'a Stream> {
    let xobjects = resources
        .get(b"XObject")
        .ok()
        .and_then(|o| resolve_dict(doc, o))?;
    let entry = xobjects.get(name).ok()?;
    resolve(doc, entry).and_then(|o| o.as_stream().ok())
}

fn stream_filters(dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|o| o.as_name().ok().map(<[u8]>::to_vec))
            .collect(),
        _ => Vec::new(),
    }
}

/// Stream contents with Flate removed, or `None` for filters we do not undo.
fn stream_bytes(stream: &Stream) -> Option<Vec<u8>> {
    let filters = stream_filters(&stream.dict);
    if filters.is_empty() {
        return Some(stream.content.clone());
    }
    if filters.iter().all(|f| f.as_slice() == b"FlateDecode") {
        return stream.decompressed_content().ok();
    }
    None
}

fn text_string(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) => {
            // UTF-16BE strings carry a byte order mark
            if bytes.starts_with(&[0xfe, 0xff]) {
                let units: Vec<u16> = bytes[2..]
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                Some(String::from_utf16_lossy(&units))
            } else {
                Some(String::from_utf8_lossy(bytes).into_owned())
            }
        }
        _ => None,
    }
}

/// Number of color components for an image color space.
fn color_components(doc: &Document, color_space: Option<&Object>) -> Result<usize, String> {
    let Some(color_space) = color_space.and_then(|cs| resolve(doc, cs)) else {
        return Err("missing color space".to_string());
    };

    match color_space {
        Object::Name(name) => match name.as_slice() {
            b"DeviceRGB" | b"CalRGB" => Ok(3),
            b"DeviceGray" | b"CalGray" => Ok(1),
            b"DeviceCMYK" => Ok(4),
            other => Err(format!(
                "unsupported color space {}",
                String::from_utf8_lossy(other)
            )),
        },
        Object::Array(items) => {
            let family = items.first().and_then(|o| o.as_name().ok());
            match family {
                Some(b"ICCBased") => items
                    .get(1)
                    .and_then(|o| resolve(doc, o))
                    .and_then(|o| o.as_stream().ok())
                    .and_then(|s| s.dict.get(b"N").and_then(Object::as_i64).ok())
                    .map(|n| n as usize)
                    .ok_or_else(|| "ICC profile without component count".to_string()),
                Some(b"CalRGB") => Ok(3),
                Some(b"CalGray") => Ok(1),
                _ => Err("unsupported color space array".to_string()),
            }
        }
        _ => Err("malformed color space".to_string()),
    }
}

/// Rasterize an image XObject into an in-memory buffer.
fn decode_image(doc: &Document, stream: &Stream) -> Result<DynamicImage, String> {
    let dict = &stream.dict;

    if matches!(dict.get(b"ImageMask"), Ok(Object::Boolean(true))) {
        return Err("stencil mask".to_string());
    }

    let filters = stream_filters(dict);
    if filters.len() == 1 && filters[0].as_slice() == b"DCTDecode" {
        return image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg)
            .map_err(|e| format!("bad JPEG data: {}", e));
    }

    let width = dict
        .get(b"Width")
        .and_then(Object::as_i64)
        .map_err(|_| "missing width".to_string())?;
    let height = dict
        .get(b"Height")
        .and_then(Object::as_i64)
        .map_err(|_| "missing height".to_string())?;
    if width <= 0 || height <= 0 || width > u32::MAX as i64 || height > u32::MAX as i64 {
        return Err(format!("bad dimensions {}x{}", width, height));
    }
    let (width, height) = (width as u32, height as u32);

    let bits = dict
        .get(b"BitsPerComponent")
        .and_then(Object::as_i64)
        .unwrap_or(8);
    if bits != 8 {
        return Err(format!("{} bits per component", bits));
    }

    let components = color_components(doc, dict.get(b"ColorSpace").ok())?;
    let samples = stream_bytes(stream).ok_or_else(|| {
        let names: Vec<String> = filters
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect();
        format!("unsupported filter {:?}", names)
    })?;

    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(components))
        .ok_or_else(|| format!("image too large: {}x{}", width, height))?;
    if samples.len() < expected {
        return Err(format!(
            "short sample data: {} < {}",
            samples.len(),
            expected
        ));
    }
    let samples = &samples[..expected];

    let image = match components {
        1 => GrayImage::from_raw(width, height, samples.to_vec()).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(width, height, samples.to_vec()).map(DynamicImage::ImageRgb8),
        4 => {
            let rgb: Vec<u8> = samples.chunks_exact(4).flat_map(cmyk_to_rgb).collect();
            RgbImage::from_raw(width, height, rgb).map(DynamicImage::ImageRgb8)
        }
        n => return Err(format!("{} color components", n)),
    };

    image.ok_or_else(|| "sample buffer does not match dimensions".to_string())
}

fn cmyk_to_rgb(cmyk: &[u8]) -> [u8; 3] {
    let k = 255 - cmyk[3] as u16;
    let channel = |c: u8| ((255 - c as u16) * k / 255) as u8;
    [channel(cmyk[0]), channel(cmyk[1]), channel(cmyk[2])]
}
