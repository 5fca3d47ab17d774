//! Eye-region conditioning: blur, erode, binarize.
//!
//! The binarized mask isolates the dark pupil/iris blob. Its dark share is
//! recorded with each measurement; the circle search itself runs on the
//! unprocessed region.

use image::GrayImage;
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::filter::separable_filter_equal;
use imageproc::morphology::{grayscale_erode, Mask};

use crate::config::PupilConfig;

/// Result of conditioning one eye region.
#[derive(Debug, Clone)]
pub struct PreparedRegion {
    /// Binary mask, 255 where the eroded region is brighter than the level.
    pub mask: GrayImage,
    /// Otsu level chosen for the eroded region.
    pub otsu_level: u8,
    /// Fraction of mask pixels that are dark.
    pub dark_fraction: f32,
}

/// Normalized 1-D Gaussian kernel of odd length `ksize`.
#[must_use]
pub fn gaussian_kernel(ksize: u32, sigma: f32) -> Vec<f32> {
    let ksize = ksize.max(1) | 1;
    let center = (ksize / 2) as f32;
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..ksize)
        .map(|i| {
            let d = i as f32 - center;
            (-(d * d) / two_sigma_sq).exp()
        })
        .collect();
    let total: f32 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= total;
    }
    kernel
}

/// Gaussian blur with a fixed `ksize × ksize` kernel.
#[must_use]
pub fn gaussian_blur(gray: &GrayImage, ksize: u32, sigma: f32) -> GrayImage {
    let kernel = gaussian_kernel(ksize, sigma);
    separable_filter_equal(gray, &kernel)
}

/// Grayscale erosion (local minimum) with a square `ksize × ksize` kernel,
/// applied `iterations` times. Kernel cells outside the image are ignored.
#[must_use]
pub fn erode(gray: &GrayImage, ksize: u32, iterations: u32) -> GrayImage {
    let radius = u8::try_from(ksize / 2).unwrap_or(u8::MAX);
    if radius == 0 {
        return gray.clone();
    }
    let mask = Mask::square(radius);
    (0..iterations).fold(gray.clone(), |img, _| grayscale_erode(&img, &mask))
}

/// Binarize at the Otsu level: pixels above it become 255, the rest 0.
#[must_use]
pub fn otsu_binarize(gray: &GrayImage) -> (u8, GrayImage) {
    let level = otsu_level(gray);
    (level, threshold(gray, level, ThresholdType::Binary))
}

/// Blur, erode and binarize an eye region.
#[must_use]
pub fn prepare_eye_region(region: &GrayImage, config: &PupilConfig) -> PreparedRegion {
    let blurred = gaussian_blur(region, config.blur_kernel, config.blur_sigma);
    let eroded = erode(&blurred, config.erode_kernel, config.erode_iterations);
    let (otsu_level, mask) = otsu_binarize(&eroded);

    let total = mask.width() as usize * mask.height() as usize;
    let dark = mask.pixels().filter(|p| p[0] == 0).count();
    let dark_fraction = if total == 0 {
        0.0
    } else {
        dark as f32 / total as f32
    };

    PreparedRegion {
        mask,
        otsu_level,
        dark_fraction,
    }
}
