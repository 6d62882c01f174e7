//! Image asset deduplication and recompression.
//!
//! One [`AssetPipeline`] per upload task. Extracted images are hashed on a
//! sample of their encoded bytes; a repeat of an earlier image resolves to the
//! same asset. New images over the byte target are scaled down and re-encoded
//! as JPEG at decreasing quality.

use std::collections::HashMap;
use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageEncoder};

use crate::config::ImageBudget;
use crate::extract::{ImageData, ImageRef};

/// Bytes sampled from each of the head, middle and tail of a payload.
const HASH_WINDOW: usize = 4096;

/// Quality lost per re-encode attempt.
const QUALITY_STEP: f32 = 0.2;

/// A deduplicated, size-bounded image ready for the host tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAsset {
    pub content_hash: String,
    pub encoded_bytes: Bytes,
    pub mime_type: String,
    pub size_bytes: usize,
    /// Zero when the payload could not be decoded
    pub width: u32,
    pub height: u32,
    pub alt_text: Option<String>,
    pub editable: bool,
}

impl ImageAsset {
    /// The asset as a `data:` URI.
    pub fn data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            STANDARD.encode(&self.encoded_bytes)
        )
    }
}

/// Sampled content hash of an encoded payload.
///
/// Payloads up to three windows long are hashed whole.
pub fn content_hash(mime_type: &str, bytes: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(mime_type.as_bytes());

    if bytes.len() <= HASH_WINDOW * 3 {
        hasher.update(bytes);
    } else {
        let mid = bytes.len() / 2 - HASH_WINDOW / 2;
        hasher.update(&bytes[..HASH_WINDOW]);
        hasher.update(&bytes[mid..mid + HASH_WINDOW]);
        hasher.update(&bytes[bytes.len() - HASH_WINDOW..]);
    }

    hasher.finalize().to_hex().to_string()
}

/// Split a `data:` URI into its media type and decoded payload.
pub fn decode_data_uri(uri: &str) -> Option<(String, Bytes)> {
    let rest = uri.trim().strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;

    let (mime_type, is_base64) = match header.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (header, false),
    };
    let mime_type = if mime_type.is_empty() {
        "application/octet-stream"
    } else {
        mime_type
    };

    let bytes = if is_base64 {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD.decode(compact).ok()?
    } else {
        payload.as_bytes().to_vec()
    };

    Some((mime_type.to_string(), Bytes::from(bytes)))
}

/// Result of [`recompress`].
#[derive(Debug, Clone)]
pub struct Recompressed {
    pub bytes: Bytes,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    /// Encode attempts made, zero when the payload was kept as is
    pub attempts: u32,
    pub within_budget: bool,
}

impl Recompressed {
    fn original(bytes: Bytes, mime_type: &str, budget: &ImageBudget) -> Self {
        let (width, height) = image::ImageReader::new(Cursor::new(bytes.as_ref()))
            .with_guessed_format()
            .ok()
            .and_then(|reader| reader.into_dimensions().ok())
            .unwrap_or((0, 0));
        Self {
            within_budget: bytes.len() <= budget.target_bytes,
            bytes,
            mime_type: mime_type.to_string(),
            width,
            height,
            attempts: 0,
        }
    }
}

/// Bring a payload under the byte target if it can be done.
///
/// The result is never larger than the input: if no attempt beats the
/// original, the original is returned unchanged. Yields to the runtime after
/// every encode attempt.
pub async fn recompress(bytes: Bytes, mime_type: &str, budget: &ImageBudget) -> Recompressed {
    if bytes.len() <= budget.target_bytes {
        return Recompressed::original(bytes, mime_type, budget);
    }

    let decoded = match image::load_from_memory(&bytes) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::debug!(mime_type, error = %e, "Undecodable image kept verbatim");
            return Recompressed::original(bytes, mime_type, budget);
        }
    };

    let (width, height) = (decoded.width(), decoded.height());
    let scale = (budget.target_bytes as f64 / bytes.len() as f64).sqrt().min(1.0);
    let mut target_w = ((width as f64 * scale).round() as u32).max(1);
    let mut target_h = ((height as f64 * scale).round() as u32).max(1);
    let longest = target_w.max(target_h);
    if longest > budget.max_dimension {
        let cap = budget.max_dimension as f64 / longest as f64;
        target_w = ((target_w as f64 * cap).round() as u32).max(1);
        target_h = ((target_h as f64 * cap).round() as u32).max(1);
    }

    let rgb = if (target_w, target_h) == (width, height) {
        decoded.to_rgb8()
    } else {
        decoded
            .resize(target_w, target_h, FilterType::Triangle)
            .to_rgb8()
    };
    drop(decoded);

    let mut best: Option<Vec<u8>> = None;
    let mut quality = budget.initial_quality;
    let mut attempts = 0;

    for _ in 0..budget.attempts() {
        attempts += 1;

        let mut encoded = Vec::new();
        let percent = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
        let result = JpegEncoder::new_with_quality(&mut encoded, percent).write_image(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            ExtendedColorType::Rgb8,
        );

        match result {
            Ok(()) => {
                if best.as_ref().map_or(true, |b| encoded.len() < b.len()) {
                    best = Some(encoded);
                }
            }
            Err(e) => tracing::warn!(quality = percent, error = %e, "JPEG encode failed"),
        }

        tokio::task::yield_now().await;

        if best.as_ref().is_some_and(|b| b.len() <= budget.target_bytes) {
            break;
        }
        quality = (quality - QUALITY_STEP).max(budget.min_quality);
    }

    match best {
        Some(encoded) if encoded.len() < bytes.len() => {
            tracing::debug!(
                from = bytes.len(),
                to = encoded.len(),
                attempts,
                "Recompressed image"
            );
            Recompressed {
                within_budget: encoded.len() <= budget.target_bytes,
                bytes: Bytes::from(encoded),
                mime_type: "image/jpeg".to_string(),
                width: rgb.width(),
                height: rgb.height(),
                attempts,
            }
        }
        _ => {
            let mut original = Recompressed::original(bytes, mime_type, budget);
            original.width = width;
            original.height = height;
            original.attempts = attempts;
            original
        }
    }
}

/// The assets of one task and how extractor image indices map onto them.
#[derive(Debug, Clone, Default)]
pub struct AssetSet {
    assets: Vec<ImageAsset>,
    /// Extractor image index to asset index; `None` when the image was unusable
    slots: Vec<Option<usize>>,
}

impl AssetSet {
    /// The asset for extractor image `n`, with its asset index.
    pub fn resolve(&self, n: usize) -> Option<(usize, &ImageAsset)> {
        let index = (*self.slots.get(n)?)?;
        self.assets.get(index).map(|asset| (index, asset))
    }

    pub fn assets(&self) -> &[ImageAsset] {
        &self.assets
    }

    /// Number of extractor images, including duplicates.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

/// Per-task image deduplication.
pub struct AssetPipeline {
    budget: ImageBudget,
    set: AssetSet,
    by_hash: HashMap<String, usize>,
}

impl AssetPipeline {
    pub fn new(budget: ImageBudget) -> Self {
        Self {
            budget,
            set: AssetSet::default(),
            by_hash: HashMap::new(),
        }
    }

    /// Add an extracted image and return the asset index it resolves to.
    ///
    /// Returns `None` for data URIs that cannot be decoded.
    pub async fn ingest(&mut self, image: ImageRef) -> Option<usize> {
        let index = self.add(image).await;
        self.set.slots.push(index);
        index
    }

    async fn add(&mut self, image: ImageRef) -> Option<usize> {
        let (mime_type, bytes) = match image.data {
            ImageData::Raw { bytes, mime_type } => (mime_type, bytes),
            ImageData::DataUri(uri) => match decode_data_uri(&uri) {
                Some(decoded) => decoded,
                None => {
                    tracing::warn!("Dropping image with undecodable data URI");
                    return None;
                }
            },
        };

        let hash = content_hash(&mime_type, &bytes);
        if let Some(&existing) = self.by_hash.get(&hash) {
            tracing::trace!(hash = %hash, index = existing, "Duplicate image");
            return Some(existing);
        }

        let recompressed = recompress(bytes, &mime_type, &self.budget).await;
        if !recompressed.within_budget {
            tracing::debug!(
                hash = %hash,
                size = recompressed.bytes.len(),
                target = self.budget.target_bytes,
                "Image still over budget, keeping it"
            );
        }

        let index = self.set.assets.len();
        self.set.assets.push(ImageAsset {
            content_hash: hash.clone(),
            size_bytes: recompressed.bytes.len(),
            encoded_bytes: recompressed.bytes,
            mime_type: recompressed.mime_type,
            width: recompressed.width,
            height: recompressed.height,
            alt_text: image.alt_text,
            editable: image.editable,
        });
        self.by_hash.insert(hash, index);
        Some(index)
    }

    /// Ingest every image of an extraction in order.
    pub async fn ingest_all(mut self, images: Vec<ImageRef>) -> AssetSet {
        for image in images {
            self.ingest(image).await;
        }
        self.finish()
    }

    pub fn finish(self) -> AssetSet {
        self.set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

    fn png(width: u32, height: u32, noisy: bool) -> Vec<u8> {
        let mut state: u32 = 0x1234_5678;
        let img = RgbImage::from_fn(width, height, |x, y| {
            if noisy {
                // xorshift, so the PNG does not compress away
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                let [r, g, b, _] = state.to_le_bytes();
                Rgb([r, g, b])
            } else {
                Rgb([(x % 256) as u8, (y % 256) as u8, 128])
            }
        });
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn small_budget(target_bytes: usize) -> ImageBudget {
        ImageBudget {
            target_bytes,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_duplicate_images_share_an_asset() {
        let bytes = png(20, 20, false);
        let mut pipeline = AssetPipeline::new(ImageBudget::default());

        let first = pipeline.ingest(ImageRef::raw(bytes.clone(), "image/png")).await;
        let second = pipeline.ingest(ImageRef::raw(bytes.clone(), "image/png")).await;
        let third = pipeline.ingest(ImageRef::raw(bytes, "image/png")).await;

        assert_eq!(first, Some(0));
        assert_eq!(second, Some(0));
        assert_eq!(third, Some(0));

        let set = pipeline.finish();
        assert_eq!(set.assets().len(), 1);
        assert_eq!(set.slot_count(), 3);
        assert_eq!(set.resolve(2).unwrap().0, 0);
        assert_eq!(set.assets()[0].width, 20);
    }

    #[tokio::test]
    async fn test_hash_includes_mime_type() {
        let bytes = png(16, 16, false);
        let mut pipeline = AssetPipeline::new(ImageBudget::default());

        let a = pipeline.ingest(ImageRef::raw(bytes.clone(), "image/png")).await;
        let b = pipeline.ingest(ImageRef::raw(bytes, "image/x-png")).await;
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_no_two_assets_share_a_hash() {
        let images: Vec<ImageRef> = [png(12, 12, false), png(14, 14, false), png(12, 12, false)]
            .into_iter()
            .map(|b| ImageRef::raw(b, "image/png"))
            .collect();

        let set = AssetPipeline::new(ImageBudget::default())
            .ingest_all(images)
            .await;

        let mut hashes: Vec<&str> = set.assets().iter().map(|a| a.content_hash.as_str()).collect();
        hashes.sort();
        hashes.dedup();
        assert_eq!(hashes.len(), set.assets().len());
        assert_eq!(set.assets().len(), 2);
        assert_eq!(set.resolve(0).unwrap().0, set.resolve(2).unwrap().0);
    }

    #[test]
    fn test_content_hash_samples_windows() {
        let mut a = vec![0u8; HASH_WINDOW * 8];
        let b = a.clone();
        assert_eq!(content_hash("image/png", &a), content_hash("image/png", &b));

        // A byte outside every window does not change the hash
        a[HASH_WINDOW * 2] = 1;
        assert_eq!(content_hash("image/png", &a), content_hash("image/png", &b));

        // A byte in the tail window does
        let last = a.len() - 1;
        a[last] = 1;
        assert_ne!(content_hash("image/png", &a), content_hash("image/png", &b));
    }

    #[tokio::test]
    async fn test_recompress_never_grows() {
        let original = Bytes::from(png(200, 200, true));
        let budget = small_budget(2_000);

        let result = recompress(original.clone(), "image/png", &budget).await;

        assert!(result.bytes.len() <= original.len());
        assert!(result.attempts >= 1);
        assert!(result.attempts <= budget.attempts());
        // Either under budget or every quality step was tried
        assert!(result.within_budget || result.attempts == budget.attempts());
        assert_eq!(result.within_budget, result.bytes.len() <= budget.target_bytes);
        if result.bytes != original {
            assert_eq!(result.mime_type, "image/jpeg");
            assert!(result.width <= 200 && result.height <= 200);
        }
    }

    #[tokio::test]
    async fn test_recompress_meets_reachable_budget() {
        let original = Bytes::from(png(300, 300, true));
        let budget = small_budget(original.len() / 4);

        let result = recompress(original.clone(), "image/png", &budget).await;

        assert!(result.within_budget);
        assert!(result.bytes.len() <= budget.target_bytes);
        assert_eq!(result.mime_type, "image/jpeg");
        assert!(result.attempts >= 1 && result.attempts <= budget.attempts());
        assert!(result.width < 300 && result.height < 300);
    }

    #[tokio::test]
    async fn test_recompress_caps_dimension() {
        let original = Bytes::from(png(400, 100, true));
        let budget = ImageBudget {
            target_bytes: original.len() - 1,
            max_dimension: 64,
            ..Default::default()
        };

        let result = recompress(original.clone(), "image/png", &budget).await;
        assert_eq!(result.mime_type, "image/jpeg");
        assert!(result.width <= 64);
        assert!(result.height <= 64);
        assert!(result.bytes.len() < original.len());
    }

    #[tokio::test]
    async fn test_small_images_are_untouched() {
        let original = Bytes::from(png(30, 20, false));
        let result = recompress(original.clone(), "image/png", &ImageBudget::default()).await;

        assert_eq!(result.bytes, original);
        assert_eq!(result.mime_type, "image/png");
        assert_eq!((result.width, result.height), (30, 20));
        assert_eq!(result.attempts, 0);
        assert!(result.within_budget);
    }

    #[tokio::test]
    async fn test_undecodable_payload_kept_verbatim() {
        let junk = Bytes::from(vec![0xAB; 4_000]);
        let result = recompress(junk.clone(), "image/emf", &small_budget(100)).await;

        assert_eq!(result.bytes, junk);
        assert_eq!(result.mime_type, "image/emf");
        assert!(!result.within_budget);
    }

    #[tokio::test]
    async fn test_data_uri_images() {
        let bytes = png(10, 10, false);
        let uri = format!("data:image/png;base64,{}", STANDARD.encode(&bytes));

        let mut pipeline = AssetPipeline::new(ImageBudget::default());
        let from_uri = pipeline
            .ingest(ImageRef {
                data: ImageData::DataUri(uri),
                alt_text: Some("dot".to_string()),
                editable: false,
            })
            .await;
        let from_raw = pipeline.ingest(ImageRef::raw(bytes, "image/png")).await;
        let broken = pipeline
            .ingest(ImageRef {
                data: ImageData::DataUri("data:image/png;base64,@@@".to_string()),
                alt_text: None,
                editable: true,
            })
            .await;

        assert_eq!(from_uri, Some(0));
        assert_eq!(from_raw, Some(0));
        assert_eq!(broken, None);

        let set = pipeline.finish();
        assert_eq!(set.assets()[0].alt_text.as_deref(), Some("dot"));
        assert!(set.resolve(2).is_none());
        assert!(set.resolve(3).is_none());
    }

    #[test]
    fn test_data_uri_round_trip() {
        let asset = ImageAsset {
            content_hash: "h".to_string(),
            encoded_bytes: Bytes::from_static(b"abc"),
            mime_type: "image/png".to_string(),
            size_bytes: 3,
            width: 0,
            height: 0,
            alt_text: None,
            editable: true,
        };
        let uri = asset.data_uri();
        assert_eq!(uri, "data:image/png;base64,YWJj");
        let (mime, bytes) = decode_data_uri(&uri).unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(bytes.as_ref(), b"abc");
    }
}
