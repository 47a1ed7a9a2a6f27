//! Before/after screenshot comparison

use image::{GenericImageView, Pixel};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::HarnessResult;

/// Per-channel difference tolerated before a pixel counts as changed
/// (anti-aliasing, font hinting, compression noise)
pub const CHANNEL_TOLERANCE: i32 = 5;

/// How much a page changed between the two captures
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureComparison {
    /// Percentage of pixels that differ
    pub change_percent: f64,
    pub changed_pixels: u64,
    pub total_pixels: u64,
    pub before_sha256: String,
    pub after_sha256: String,
}

impl CaptureComparison {
    pub fn identical(&self) -> bool {
        self.changed_pixels == 0
    }
}

/// Compare the before and after screenshots.
///
/// Both files must decode as images. Pixels outside the overlap of
/// differently-sized captures count as changed; full-page screenshots grow
/// when an interaction adds content.
pub fn compare_captures(before: &Path, after: &Path) -> HarnessResult<CaptureComparison> {
    let before_bytes = std::fs::read(before)?;
    let after_bytes = std::fs::read(after)?;

    let before_sha256 = sha256_hex(&before_bytes);
    let after_sha256 = sha256_hex(&after_bytes);

    let before_img = image::load_from_memory(&before_bytes)?;
    let after_img = image::load_from_memory(&after_bytes)?;

    let (bw, bh) = before_img.dimensions();
    let (aw, ah) = after_img.dimensions();
    let total_pixels = (bw.max(aw) as u64) * (bh.max(ah) as u64);

    if before_sha256 == after_sha256 {
        debug!("Captures are byte-identical");
        return Ok(CaptureComparison {
            change_percent: 0.0,
            changed_pixels: 0,
            total_pixels,
            before_sha256,
            after_sha256,
        });
    }

    if (bw, bh) != (aw, ah) {
        warn!(
            "Capture dimensions differ: before {:?} vs after {:?}",
            (bw, bh),
            (aw, ah)
        );
    }

    let before_rgba = before_img.to_rgba8();
    let after_rgba = after_img.to_rgba8();

    let (ow, oh) = (bw.min(aw), bh.min(ah));
    let overlap = (ow as u64) * (oh as u64);
    let mut changed_pixels = total_pixels - overlap;

    for y in 0..oh {
        for x in 0..ow {
            if pixels_differ(before_rgba.get_pixel(x, y), after_rgba.get_pixel(x, y)) {
                changed_pixels += 1;
            }
        }
    }

    let change_percent = if total_pixels == 0 {
        0.0
    } else {
        (changed_pixels as f64 / total_pixels as f64) * 100.0
    };

    debug!(
        "{} of {} pixels changed ({:.2}%)",
        changed_pixels, total_pixels, change_percent
    );

    Ok(CaptureComparison {
        change_percent,
        changed_pixels,
        total_pixels,
        before_sha256,
        after_sha256,
    })
}

fn pixels_differ(a: &image::Rgba<u8>, b: &image::Rgba<u8>) -> bool {
    a.channels()
        .iter()
        .zip(b.channels())
        .any(|(x, y)| (*x as i32 - *y as i32).abs() > CHANNEL_TOLERANCE)
}

/// Hex SHA-256 of a byte slice
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;
    use image::{Rgba, RgbaImage};

    fn write_png(path: &Path, width: u32, height: u32, f: impl Fn(u32, u32) -> [u8; 4]) {
        let img = RgbaImage::from_fn(width, height, |x, y| Rgba(f(x, y)));
        img.save(path).unwrap();
    }

    #[test]
    fn test_identical_captures() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        write_png(&a, 10, 10, |_, _| [255, 255, 255, 255]);
        write_png(&b, 10, 10, |_, _| [255, 255, 255, 255]);

        let cmp = compare_captures(&a, &b).unwrap();
        assert!(cmp.identical());
        assert_eq!(cmp.change_percent, 0.0);
        assert_eq!(cmp.before_sha256, cmp.after_sha256);
        assert_eq!(cmp.before_sha256.len(), 64);
    }

    #[test]
    fn test_small_noise_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        write_png(&a, 10, 10, |_, _| [100, 100, 100, 255]);
        write_png(&b, 10, 10, |_, _| [104, 97, 100, 255]);

        let cmp = compare_captures(&a, &b).unwrap();
        assert_ne!(cmp.before_sha256, cmp.after_sha256);
        assert_eq!(cmp.changed_pixels, 0);
    }

    #[test]
    fn test_changed_region_percent() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        write_png(&a, 10, 10, |_, _| [255, 255, 255, 255]);
        // Top row turned black: 10 of 100 pixels.
        write_png(&b, 10, 10, |_, y| {
            if y == 0 {
                [0, 0, 0, 255]
            } else {
                [255, 255, 255, 255]
            }
        });

        let cmp = compare_captures(&a, &b).unwrap();
        assert_eq!(cmp.changed_pixels, 10);
        assert!((cmp.change_percent - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_grown_page_counts_new_area() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        write_png(&a, 10, 10, |_, _| [255, 255, 255, 255]);
        write_png(&b, 10, 20, |_, _| [255, 255, 255, 255]);

        let cmp = compare_captures(&a, &b).unwrap();
        assert_eq!(cmp.total_pixels, 200);
        assert_eq!(cmp.changed_pixels, 100);
        assert!((cmp.change_percent - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_image_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        write_png(&a, 4, 4, |_, _| [0, 0, 0, 255]);
        std::fs::write(&b, b"not a png").unwrap();

        let err = compare_captures(&a, &b).unwrap_err();
        assert!(matches!(err, HarnessError::Image(_)));
    }
}
