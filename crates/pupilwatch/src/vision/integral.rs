//! Summed-area tables for Haar feature evaluation.
//!
//! Upright tables come from `imageproc::integral_image`. The 45° table
//! follows OpenCV's tilted integral definition:
//!
//! `tilted(X, Y) = Σ image(x, y)` over `y < Y` and `|x - X + 1| <= Y - y - 1`,
//!
//! i.e. an upward-opening triangle whose apex sits at `(X - 1, Y - 1)`.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::integral_image::{integral_image, integral_squared_image};

/// Upright summed-area tables of pixel values and squared values.
#[derive(Debug, Clone)]
pub struct IntegralImage {
    sum: ImageBuffer<Luma<u64>, Vec<u64>>,
    sq_sum: ImageBuffer<Luma<u64>, Vec<u64>>,
}

impl IntegralImage {
    /// Build the tables for `gray`. Tables are one pixel larger on each axis.
    #[must_use]
    pub fn new(gray: &GrayImage) -> Self {
        Self {
            sum: integral_image::<_, u64>(gray),
            sq_sum: integral_squared_image::<_, u64>(gray),
        }
    }

    /// Width of the source image.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.sum.width() - 1
    }

    /// Height of the source image.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.sum.height() - 1
    }

    fn corners(table: &ImageBuffer<Luma<u64>, Vec<u64>>, x: u32, y: u32, w: u32, h: u32) -> u64 {
        let (x1, y1) = (x + w, y + h);
        let a = table.get_pixel(x, y)[0];
        let b = table.get_pixel(x1, y)[0];
        let c = table.get_pixel(x, y1)[0];
        let d = table.get_pixel(x1, y1)[0];
        (a + d) - (b + c)
    }

    /// Sum of pixels in `[x, x + w) × [y, y + h)`.
    ///
    /// The rectangle must lie inside the image.
    #[must_use]
    pub fn rect_sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::corners(&self.sum, x, y, w, h)
    }

    /// Sum of squared pixels in `[x, x + w) × [y, y + h)`.
    #[must_use]
    pub fn rect_sq_sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::corners(&self.sq_sum, x, y, w, h)
    }
}

/// Rotated (45°) summed-area table.
///
/// Triangles centred outside the image still hold partial sums, so the table
/// is padded by `height + 2` columns on both sides.
#[derive(Debug, Clone)]
pub struct TiltedIntegral {
    height: usize,
    offset: usize,
    stride: usize,
    data: Vec<i64>,
}

impl TiltedIntegral {
    /// Build the table for `gray`.
    #[must_use]
    pub fn new(gray: &GrayImage) -> Self {
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let offset = h + 2;
        let stride = w + 2 * offset + 1;
        let mut data = vec![0i64; stride * (h + 1)];
        let raw = gray.as_raw();

        let pixel = |xc: isize, y: usize| -> i64 {
            if xc >= 0 && (xc as usize) < w && y < h {
                i64::from(raw[y * w + xc as usize])
            } else {
                0
            }
        };

        for yy in 1..=h {
            let row = yy * stride;
            let prev = (yy - 1) * stride;
            for col in 1..stride - 1 {
                // Apex column of this triangle, in image coordinates
                let xc = col as isize - offset as isize - 1;
                let mut v = data[prev + col - 1] + data[prev + col + 1] + pixel(xc, yy - 1);
                if yy >= 2 {
                    v += pixel(xc, yy - 2) - data[(yy - 2) * stride + col];
                }
                data[row + col] = v;
            }
        }

        Self {
            height: h,
            offset,
            stride,
            data,
        }
    }

    fn at(&self, x: i64, y: i64) -> i64 {
        debug_assert!(y >= 0 && y as usize <= self.height);
        let col = (x + self.offset as i64) as usize;
        self.data[y as usize * self.stride + col]
    }

    /// Sum over the 45° rectangle with top corner `(x, y)`.
    ///
    /// The rectangle's corners are `(x, y)`, `(x + w, y + w)`,
    /// `(x - h, y + h)` and `(x + w - h, y + w + h)`; its bottom corner must
    /// not pass the bottom of the image.
    #[must_use]
    pub fn rotated_sum(&self, x: i64, y: i64, w: i64, h: i64) -> i64 {
        self.at(x, y) - self.at(x - h, y + h) - self.at(x + w, y + w)
            + self.at(x + w - h, y + w + h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern_image(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| Luma([((x * 37 + y * 91 + x * y) % 251) as u8]))
    }

    /// Direct evaluation of the tilted definition.
    fn tilted_brute(img: &GrayImage, big_x: i64, big_y: i64) -> i64 {
        let mut s = 0;
        for y in 0..big_y {
            for x in 0..i64::from(img.width()) {
                if (x - big_x + 1).abs() <= big_y - y - 1 {
                    s += i64::from(img.get_pixel(x as u32, y as u32)[0]);
                }
            }
        }
        s
    }

    #[test]
    fn test_rect_sum_uniform() {
        let img = GrayImage::from_pixel(10, 8, Luma([3]));
        let ii = IntegralImage::new(&img);
        assert_eq!(ii.width(), 10);
        assert_eq!(ii.height(), 8);
        assert_eq!(ii.rect_sum(0, 0, 10, 8), 240);
        assert_eq!(ii.rect_sum(2, 3, 4, 2), 24);
        assert_eq!(ii.rect_sq_sum(2, 3, 4, 2), 72);
    }

    #[test]
    fn test_rect_sum_matches_direct_sum() {
        let img = pattern_image(13, 9);
        let ii = IntegralImage::new(&img);
        let mut direct = 0u64;
        for y in 2..7 {
            for x in 4..11 {
                direct += u64::from(img.get_pixel(x, y)[0]);
            }
        }
        assert_eq!(ii.rect_sum(4, 2, 7, 5), direct);
    }

    #[test]
    fn test_tilted_table_matches_definition() {
        let img = pattern_image(9, 7);
        let t = TiltedIntegral::new(&img);
        for y in 0..=7i64 {
            for x in 0..=9i64 {
                assert_eq!(t.at(x, y), tilted_brute(&img, x, y), "at ({x}, {y})");
            }
        }
    }

    #[test]
    fn test_rotated_sum_area_on_flat_image() {
        let img = GrayImage::from_pixel(12, 12, Luma([1]));
        let t = TiltedIntegral::new(&img);
        // A w×h tilted rectangle covers 2·w·h pixels
        assert_eq!(t.rotated_sum(4, 0, 1, 1), 2);
        assert_eq!(t.rotated_sum(4, 0, 2, 2), 8);
        assert_eq!(t.rotated_sum(5, 1, 3, 2), 12);
        assert_eq!(t.rotated_sum(6, 2, 2, 4), 16);
    }
}
