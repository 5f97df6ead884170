//! Screenshot comparison and cropping

use image::{DynamicImage, GenericImageView, ImageFormat, Pixel, RgbaImage};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use tracing::{debug, warn};

use docrun_common::step::Padding;

use crate::driver::Rect;
use crate::error::RunnerResult;

/// Result of comparing a capture against an existing image
#[derive(Debug, Clone, PartialEq)]
pub struct VisualDiff {
    /// Pixels that differ, including any area only one image covers
    pub diff_pixels: u64,

    pub total_pixels: u64,

    /// `diff_pixels / total_pixels`, 0.0 - 1.0
    pub variation: f64,

    pub actual_hash: String,
    pub baseline_hash: String,
}

impl VisualDiff {
    pub fn exceeds(&self, max_variation: f64) -> bool {
        self.variation > max_variation
    }
}

/// Compare two encoded images pixel by pixel
pub fn compare(actual: &[u8], baseline: &[u8]) -> RunnerResult<VisualDiff> {
    let actual_hash = hash_bytes(actual);
    let baseline_hash = hash_bytes(baseline);

    if actual_hash == baseline_hash {
        debug!("Screenshots match exactly (same hash)");
        let (width, height) = image::load_from_memory(actual)?.dimensions();
        return Ok(VisualDiff {
            diff_pixels: 0,
            total_pixels: width as u64 * height as u64,
            variation: 0.0,
            actual_hash,
            baseline_hash,
        });
    }

    let actual_img = image::load_from_memory(actual)?.to_rgba8();
    let baseline_img = image::load_from_memory(baseline)?.to_rgba8();

    if actual_img.dimensions() != baseline_img.dimensions() {
        warn!(
            "Screenshot dimensions differ: actual {:?} vs existing {:?}",
            actual_img.dimensions(),
            baseline_img.dimensions()
        );
    }

    let (diff_pixels, total_pixels) = count_differences(&actual_img, &baseline_img);
    let variation = if total_pixels == 0 {
        0.0
    } else {
        diff_pixels as f64 / total_pixels as f64
    };

    Ok(VisualDiff {
        diff_pixels,
        total_pixels,
        variation,
        actual_hash,
        baseline_hash,
    })
}

fn count_differences(actual: &RgbaImage, baseline: &RgbaImage) -> (u64, u64) {
    let width = actual.width().max(baseline.width());
    let height = actual.height().max(baseline.height());
    let overlap_w = actual.width().min(baseline.width());
    let overlap_h = actual.height().min(baseline.height());

    let total = width as u64 * height as u64;
    let mut diff = total - overlap_w as u64 * overlap_h as u64;

    for y in 0..overlap_h {
        for x in 0..overlap_w {
            if pixels_differ(actual.get_pixel(x, y), baseline.get_pixel(x, y)) {
                diff += 1;
            }
        }
    }

    (diff, total)
}

/// Small channel differences come from anti-aliasing and compression
fn pixels_differ(a: &image::Rgba<u8>, b: &image::Rgba<u8>) -> bool {
    const TOLERANCE: i32 = 5;

    a.channels()
        .iter()
        .zip(b.channels())
        .any(|(x, y)| (*x as i32 - *y as i32).abs() > TOLERANCE)
}

/// Crop a PNG to an element's rect plus padding, clamped to the image.
/// `scale` converts CSS pixels to device pixels.
pub fn crop_png(png: &[u8], rect: Rect, padding: Padding, scale: f64) -> RunnerResult<Vec<u8>> {
    let img = image::load_from_memory(png)?;
    let (img_w, img_h) = img.dimensions();

    let left = ((rect.x - padding.left as f64) * scale).max(0.0) as u32;
    let top = ((rect.y - padding.top as f64) * scale).max(0.0) as u32;
    let right = (((rect.x + rect.width + padding.right as f64) * scale).ceil() as u32).min(img_w);
    let bottom = (((rect.y + rect.height + padding.bottom as f64) * scale).ceil() as u32).min(img_h);

    let left = left.min(img_w);
    let top = top.min(img_h);
    let cropped = img.crop_imm(left, top, right.saturating_sub(left), bottom.saturating_sub(top));
    encode_png(&cropped)
}

pub fn encode_png(img: &DynamicImage) -> RunnerResult<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(width: u32, height: u32, paint: impl Fn(u32, u32) -> [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_fn(width, height, |x, y| image::Rgba(paint(x, y)));
        encode_png(&DynamicImage::ImageRgba8(img)).unwrap()
    }

    #[test]
    fn test_identical_images() {
        let a = png(10, 10, |_, _| [255, 255, 255, 255]);
        let diff = compare(&a, &a).unwrap();
        assert_eq!(diff.variation, 0.0);
        assert_eq!(diff.total_pixels, 100);
        assert_eq!(diff.actual_hash, diff.baseline_hash);
    }

    #[test]
    fn test_partial_difference() {
        let a = png(10, 10, |_, _| [255, 255, 255, 255]);
        let b = png(10, 10, |x, _| if x == 0 { [0, 0, 0, 255] } else { [255, 255, 255, 255] });
        let diff = compare(&a, &b).unwrap();
        assert_eq!(diff.diff_pixels, 10);
        assert!((diff.variation - 0.1).abs() < f64::EPSILON);
        assert!(diff.exceeds(0.05));
        assert!(!diff.exceeds(0.1));
    }

    #[test]
    fn test_small_channel_noise_is_tolerated() {
        let a = png(4, 4, |_, _| [100, 100, 100, 255]);
        let b = png(4, 4, |_, _| [103, 98, 100, 255]);
        assert_eq!(compare(&a, &b).unwrap().diff_pixels, 0);
    }

    #[test]
    fn test_size_mismatch_counts_uncovered_area() {
        let a = png(10, 10, |_, _| [0, 0, 0, 255]);
        let b = png(10, 5, |_, _| [0, 0, 0, 255]);
        let diff = compare(&a, &b).unwrap();
        assert_eq!(diff.total_pixels, 100);
        assert_eq!(diff.diff_pixels, 50);
    }

    #[test]
    fn test_crop_with_padding_is_clamped() {
        let a = png(20, 20, |_, _| [0, 0, 0, 255]);
        let rect = Rect {
            x: 2.0,
            y: 2.0,
            width: 5.0,
            height: 5.0,
        };
        let padding = Padding {
            top: 5,
            left: 1,
            right: 1,
            bottom: 1,
        };
        let cropped = crop_png(&a, rect, padding, 1.0).unwrap();
        let img = image::load_from_memory(&cropped).unwrap();
        assert_eq!(img.dimensions(), (7, 8));
    }
}
