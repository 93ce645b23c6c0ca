//! Difference-based edit mask synthesis.
//!
//! Given a `before` and an `after` image, [`synthesize`] derives a soft
//! single-channel mask covering the region that changed:
//!
//! 1. `after` is resampled to `before`'s dimensions when they differ.
//! 2. Both are reduced to luminance.
//! 3. A full-resolution SSIM map is computed (7x7 uniform window).
//! 4. The map is scaled to `0..=255` and binarised with an inverted Otsu
//!    threshold, so dissimilar pixels become foreground.
//! 5. The background connected to the top-left corner is flood-filled and
//!    its complement OR-ed back in, closing enclosed holes.
//! 6. The result is intersected with a brightness mask of `before`.
//! 7. A 51x51 Gaussian blur feathers the edges.
//!
//! The pipeline is pure: identical inputs always produce identical bytes.
//!
//! The blur accumulates in `f64` and rounds half to even. OpenCV's 8-bit
//! path uses fixed-point coefficients instead, so a feathered pixel may
//! differ from its output by at most 1. Pixels outside the feathered band
//! (0 or 255 after blurring) match exactly.

use std::collections::VecDeque;

use image::{GrayImage, Luma};

use crate::image_io::ImageBuffer;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Side length of the uniform SSIM window.
pub const SSIM_WINDOW: usize = 7;

/// Luminance above which a `before` pixel may belong to the mask.
pub const BRIGHTNESS_CUTOFF: u8 = 200;

/// Side length of the feathering Gaussian kernel.
pub const BLUR_KERNEL_SIZE: usize = 51;

const SSIM_K1: f64 = 0.01;
const SSIM_K2: f64 = 0.03;

/// Dynamic range of 8-bit input.
const DATA_RANGE: f64 = 255.0;

const FOREGROUND: u8 = 255;
const BACKGROUND: u8 = 0;

// ---------------------------------------------------------------------------
// Parameters and result
// ---------------------------------------------------------------------------

/// Tunables for [`synthesize_with`]. [`Default`] gives the reference values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskParams {
    pub ssim_window: usize,
    pub brightness_cutoff: u8,
    /// Must be odd.
    pub blur_kernel_size: usize,
}

impl Default for MaskParams {
    fn default() -> Self {
        Self {
            ssim_window: SSIM_WINDOW,
            brightness_cutoff: BRIGHTNESS_CUTOFF,
            blur_kernel_size: BLUR_KERNEL_SIZE,
        }
    }
}

/// Soft membership mask of the edited region, same size as `before`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskResult {
    mask: GrayImage,
}

impl MaskResult {
    pub fn width(&self) -> u32 {
        self.mask.width()
    }

    pub fn height(&self) -> u32 {
        self.mask.height()
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.mask
    }

    pub fn into_buffer(self) -> ImageBuffer {
        ImageBuffer::from(self.mask)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Synthesize an edit mask with the reference parameters.
pub fn synthesize(before: &ImageBuffer, after: &ImageBuffer) -> MaskResult {
    synthesize_with(before, after, &MaskParams::default())
}

/// Synthesize an edit mask with explicit parameters.
pub fn synthesize_with(
    before: &ImageBuffer,
    after: &ImageBuffer,
    params: &MaskParams,
) -> MaskResult {
    let binary = binary_mask(before, after, params);
    MaskResult {
        mask: gaussian_blur(&binary, params.blur_kernel_size),
    }
}

/// Steps 1-6: the hard binary mask before feathering.
pub fn binary_mask(before: &ImageBuffer, after: &ImageBuffer, params: &MaskParams) -> GrayImage {
    let after = after.resize_to(before.height(), before.width());
    let gray_before = before.luma();
    let gray_after = after.luma();

    let similarity = ssim_map(&gray_before, &gray_after, params.ssim_window);
    let diff = similarity_to_u8(&similarity, gray_before.width(), gray_before.height());

    let threshold = otsu_threshold(&diff);
    let candidates = threshold_binary_inv(&diff, threshold);
    let closed = fill_enclosed(&candidates);

    let bright = threshold_binary(&gray_before, params.brightness_cutoff);
    bitwise_and(&closed, &bright)
}

// ---------------------------------------------------------------------------
// Structural similarity
// ---------------------------------------------------------------------------

/// Per-pixel SSIM between two equally sized luminance images.
///
/// Local statistics use a `window` x `window` uniform filter with
/// half-sample symmetric borders and sample covariance. Returned in
/// row-major order; values near 1.0 mean structurally similar.
pub fn ssim_map(x: &GrayImage, y: &GrayImage, window: usize) -> Vec<f64> {
    debug_assert_eq!(x.dimensions(), y.dimensions());
    let width = x.width() as usize;
    let height = x.height() as usize;

    let xs: Vec<f64> = x.as_raw().iter().map(|&v| f64::from(v)).collect();
    let ys: Vec<f64> = y.as_raw().iter().map(|&v| f64::from(v)).collect();
    let xx: Vec<f64> = xs.iter().map(|v| v * v).collect();
    let yy: Vec<f64> = ys.iter().map(|v| v * v).collect();
    let xy: Vec<f64> = xs.iter().zip(&ys).map(|(a, b)| a * b).collect();

    let ux = uniform_filter(&xs, width, height, window);
    let uy = uniform_filter(&ys, width, height, window);
    let uxx = uniform_filter(&xx, width, height, window);
    let uyy = uniform_filter(&yy, width, height, window);
    let uxy = uniform_filter(&xy, width, height, window);

    let np = (window * window) as f64;
    let cov_norm = np / (np - 1.0);
    let c1 = (SSIM_K1 * DATA_RANGE).powi(2);
    let c2 = (SSIM_K2 * DATA_RANGE).powi(2);

    (0..xs.len())
        .map(|i| {
            let vx = cov_norm * (uxx[i] - ux[i] * ux[i]);
            let vy = cov_norm * (uyy[i] - uy[i] * uy[i]);
            let vxy = cov_norm * (uxy[i] - ux[i] * uy[i]);

            let a1 = 2.0 * ux[i] * uy[i] + c1;
            let a2 = 2.0 * vxy + c2;
            let b1 = ux[i] * ux[i] + uy[i] * uy[i] + c1;
            let b2 = vx + vy + c2;
            (a1 * a2) / (b1 * b2)
        })
        .collect()
}

/// Scale an SSIM map to 8 bits. Negative similarity clamps to 0; the
/// fractional part is truncated.
fn similarity_to_u8(similarity: &[f64], width: u32, height: u32) -> GrayImage {
    let raw = similarity
        .iter()
        .map(|s| (s.clamp(0.0, 1.0) * 255.0) as u8)
        .collect();
    // Length always equals width * height.
    GrayImage::from_raw(width, height, raw).unwrap_or_else(|| GrayImage::new(width, height))
}

/// Separable mean filter over a `size` x `size` window.
fn uniform_filter(data: &[f64], width: usize, height: usize, size: usize) -> Vec<f64> {
    let half = (size / 2) as isize;
    let scale = 1.0 / size as f64;

    let mut rows = vec![0.0; data.len()];
    for y in 0..height {
        let row = &data[y * width..(y + 1) * width];
        for x in 0..width {
            let sum: f64 = (-half..=half)
                .map(|d| row[reflect(x as isize + d, width)])
                .sum();
            rows[y * width + x] = sum * scale;
        }
    }

    let mut out = vec![0.0; data.len()];
    for y in 0..height {
        for x in 0..width {
            let sum: f64 = (-half..=half)
                .map(|d| rows[reflect(y as isize + d, height) * width + x])
                .sum();
            out[y * width + x] = sum * scale;
        }
    }
    out
}

/// Half-sample symmetric border: `d c b a | a b c d | d c b a`.
fn reflect(i: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let m = i.rem_euclid(period);
    if m < n as isize {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

/// Whole-sample symmetric border: `d c b | a b c d | c b a`.
fn reflect_101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * n as isize - 2;
    let m = i.rem_euclid(period);
    if m < n as isize {
        m as usize
    } else {
        (period - m) as usize
    }
}

// ---------------------------------------------------------------------------
// Thresholding
// ---------------------------------------------------------------------------

/// Global threshold maximising between-class variance (Otsu).
///
/// Ties resolve to the lowest level. A single-valued image yields 0.
pub fn otsu_threshold(image: &GrayImage) -> u8 {
    let total = image.as_raw().len();
    if total == 0 {
        return 0;
    }

    let mut histogram = [0usize; 256];
    for &v in image.as_raw() {
        histogram[v as usize] += 1;
    }

    let scale = 1.0 / total as f64;
    let p: Vec<f64> = histogram.iter().map(|&c| c as f64 * scale).collect();
    let mu: f64 = p.iter().enumerate().map(|(i, pi)| i as f64 * pi).sum();

    let eps = f64::from(f32::EPSILON);
    let mut q1 = 0.0;
    let mut mu1 = 0.0;
    let mut max_sigma = 0.0;
    let mut max_level = 0u8;

    for (i, &p_i) in p.iter().enumerate() {
        mu1 *= q1;
        q1 += p_i;
        let q2 = 1.0 - q1;

        if q1.min(q2) < eps || q1.max(q2) > 1.0 - eps {
            continue;
        }

        mu1 = (mu1 + i as f64 * p_i) / q1;
        let mu2 = (mu - q1 * mu1) / q2;
        let sigma = q1 * q2 * (mu1 - mu2) * (mu1 - mu2);
        if sigma > max_sigma {
            max_sigma = sigma;
            max_level = i as u8;
        }
    }

    max_level
}

/// Pixels above `threshold` become foreground.
pub fn threshold_binary(image: &GrayImage, threshold: u8) -> GrayImage {
    map_pixels(image, |v| if v > threshold { FOREGROUND } else { BACKGROUND })
}

/// Pixels at or below `threshold` become foreground.
pub fn threshold_binary_inv(image: &GrayImage, threshold: u8) -> GrayImage {
    map_pixels(image, |v| if v > threshold { BACKGROUND } else { FOREGROUND })
}

// ---------------------------------------------------------------------------
// Region fill
// ---------------------------------------------------------------------------

/// 4-connected flood fill of the region sharing the seed pixel's value.
pub fn flood_fill(image: &mut GrayImage, seed_x: u32, seed_y: u32, fill: u8) {
    let (width, height) = image.dimensions();
    if seed_x >= width || seed_y >= height {
        return;
    }

    let target = image.get_pixel(seed_x, seed_y).0[0];
    let mut visited = vec![false; (width * height) as usize];
    let mut queue = VecDeque::from([(seed_x, seed_y)]);
    visited[(seed_y * width + seed_x) as usize] = true;

    while let Some((x, y)) = queue.pop_front() {
        image.put_pixel(x, y, Luma([fill]));

        let neighbours = [
            (x.wrapping_sub(1), y),
            (x + 1, y),
            (x, y.wrapping_sub(1)),
            (x, y + 1),
        ];
        for (nx, ny) in neighbours {
            if nx >= width || ny >= height {
                continue;
            }
            let idx = (ny * width + nx) as usize;
            if !visited[idx] && image.get_pixel(nx, ny).0[0] == target {
                visited[idx] = true;
                queue.push_back((nx, ny));
            }
        }
    }
}

/// Close enclosed holes: `binary | !flood_fill(binary, (0, 0))`.
pub fn fill_enclosed(binary: &GrayImage) -> GrayImage {
    let mut flooded = binary.clone();
    flood_fill(&mut flooded, 0, 0, FOREGROUND);
    zip_pixels(binary, &flooded, |b, f| b | !f)
}

pub fn bitwise_and(a: &GrayImage, b: &GrayImage) -> GrayImage {
    zip_pixels(a, b, |x, y| x & y)
}

// ---------------------------------------------------------------------------
// Gaussian blur
// ---------------------------------------------------------------------------

/// Sigma derived from kernel size when none is given.
pub fn auto_sigma(kernel_size: usize) -> f64 {
    0.3 * ((kernel_size as f64 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Normalised 1-D Gaussian kernel of odd length `size`.
pub fn gaussian_kernel(size: usize) -> Vec<f64> {
    let sigma = auto_sigma(size);
    let center = (size as f64 - 1.0) * 0.5;
    let weights: Vec<f64> = (0..size)
        .map(|i| {
            let x = i as f64 - center;
            (-(x * x) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

/// Separable Gaussian blur with whole-sample symmetric borders.
///
/// Within 1 of OpenCV's `GaussianBlur` on 8-bit input; see the module
/// docs.
pub fn gaussian_blur(image: &GrayImage, kernel_size: usize) -> GrayImage {
    let (width, height) = image.dimensions();
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 {
        return image.clone();
    }

    let kernel = gaussian_kernel(kernel_size);
    let half = (kernel_size / 2) as isize;
    let src = image.as_raw();

    let mut rows = vec![0.0f64; w * h];
    for y in 0..h {
        for x in 0..w {
            rows[y * w + x] = kernel
                .iter()
                .enumerate()
                .map(|(k, weight)| {
                    let sx = reflect_101(x as isize + k as isize - half, w);
                    weight * f64::from(src[y * w + sx])
                })
                .sum();
        }
    }

    let mut out = GrayImage::new(width, height);
    for y in 0..h {
        for x in 0..w {
            let value: f64 = kernel
                .iter()
                .enumerate()
                .map(|(k, weight)| {
                    let sy = reflect_101(y as isize + k as isize - half, h);
                    weight * rows[sy * w + x]
                })
                .sum();
            out.put_pixel(
                x as u32,
                y as u32,
                Luma([value.round_ties_even().clamp(0.0, 255.0) as u8]),
            );
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn map_pixels(image: &GrayImage, f: impl Fn(u8) -> u8) -> GrayImage {
    let mut out = image.clone();
    for px in out.pixels_mut() {
        px.0[0] = f(px.0[0]);
    }
    out
}

fn zip_pixels(a: &GrayImage, b: &GrayImage, f: impl Fn(u8, u8) -> u8) -> GrayImage {
    debug_assert_eq!(a.dimensions(), b.dimensions());
    let mut out = a.clone();
    for (px, other) in out.pixels_mut().zip(b.pixels()) {
        px.0[0] = f(px.0[0], other.0[0]);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
