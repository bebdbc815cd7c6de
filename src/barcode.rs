//! Barcode fallback resolution for image-valued download targets.
//!
//! Some download controls resolve to a QR image instead of a direct link.
//! This module owns the retry/preprocessing strategy around a single-shot
//! decode primitive: the raw bytes are canonicalized to grayscale, then an
//! ordered list of preprocessing variants is tried until one yields decoded
//! text. The decode primitive itself sits behind the [`BarcodeDecoder`]
//! trait; the production implementation wraps `rqrr`.
//!
//! Decoding is CPU-bound, so [`BarcodeResolver::resolve`] runs the whole
//! pipeline under `spawn_blocking` and never stalls the scheduling loop.

use std::sync::Arc;

use image::GrayImage;
use imageproc::contrast::{ThresholdType, adaptive_threshold, otsu_level, threshold};
use imageproc::distance_transform::Norm;
use imageproc::filter::{gaussian_blur_f32, median_filter};
use imageproc::morphology::close;
use tracing::{debug, warn};

/// File-extension heuristic set used to classify a target address as an
/// image. Matched case-insensitively, by substring: addresses in the wild
/// frequently carry query strings after the extension.
const IMAGE_EXTENSIONS: [&str; 8] = [
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".tiff", ".webp", ".svg",
];

/// Returns true if the address looks like an image resource.
#[must_use]
pub fn is_image_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| lower.contains(ext))
}

/// Single-shot image-to-text decode primitive.
///
/// Implementations decode one prepared grayscale image; the surrounding
/// variant strategy lives in [`BarcodeResolver`].
pub trait BarcodeDecoder: Send + Sync {
    /// Attempts one decode. `None` means no barcode was found; the resolver
    /// moves on to the next preprocessing variant.
    fn decode(&self, image: &GrayImage) -> Option<String>;
}

/// Production decoder backed by `rqrr`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RqrrDecoder;

impl BarcodeDecoder for RqrrDecoder {
    fn decode(&self, image: &GrayImage) -> Option<String> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return None;
        }
        let mut prepared =
            rqrr::PreparedImage::prepare_from_greyscale(width as usize, height as usize, |x, y| {
                image.get_pixel(x as u32, y as u32).0[0]
            });
        for grid in prepared.detect_grids() {
            match grid.decode() {
                Ok((_meta, content)) if !content.is_empty() => return Some(content),
                Ok(_) => {}
                Err(error) => debug!(%error, "grid decode failed"),
            }
        }
        None
    }
}

/// Ordered preprocessing variants tried against the decode primitive.
fn preprocessing_variants(gray: &GrayImage) -> Vec<(&'static str, GrayImage)> {
    vec![
        ("plain", gray.clone()),
        ("median-blur", median_filter(gray, 2, 2)),
        ("adaptive-threshold", adaptive_threshold(gray, 5)),
        (
            "gaussian-otsu",
            threshold(
                &gaussian_blur_f32(gray, 1.0),
                otsu_level(gray),
                ThresholdType::Binary,
            ),
        ),
        ("morph-close", close(gray, Norm::LInf, 2)),
    ]
}

/// Tries preprocessing variants in order against a decode primitive.
pub struct BarcodeResolver {
    decoder: Arc<dyn BarcodeDecoder>,
}

impl BarcodeResolver {
    /// Creates a resolver over the given decode primitive.
    #[must_use]
    pub fn new(decoder: Arc<dyn BarcodeDecoder>) -> Self {
        Self { decoder }
    }

    /// Decodes `bytes` into a resolved address, or `None` when every
    /// variant fails (soft failure - the caller keeps the original image
    /// address as a degraded fallback).
    ///
    /// Runs off the scheduling loop's synchronous path via `spawn_blocking`.
    pub async fn resolve(&self, bytes: Vec<u8>) -> Option<String> {
        let decoder = Arc::clone(&self.decoder);
        let result = tokio::task::spawn_blocking(move || decode_variants(&decoder, &bytes)).await;
        match result {
            Ok(decoded) => decoded,
            Err(error) => {
                warn!(%error, "barcode decode task failed");
                None
            }
        }
    }
}

impl std::fmt::Debug for BarcodeResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BarcodeResolver").finish_non_exhaustive()
    }
}

/// Synchronous pipeline: canonical grayscale, then first-wins variants.
fn decode_variants(decoder: &Arc<dyn BarcodeDecoder>, bytes: &[u8]) -> Option<String> {
    let gray = match image::load_from_memory(bytes) {
        Ok(img) => img.to_luma8(),
        Err(error) => {
            warn!(%error, "could not decode image bytes");
            return None;
        }
    };

    for (variant, processed) in preprocessing_variants(&gray) {
        if let Some(content) = decoder.decode(&processed) {
            debug!(variant, "barcode decoded");
            return Some(content);
        }
    }
    debug!("all preprocessing variants failed to decode");
    None
}
