//! # Single-Cell Boundary Detection Library
//!
//! This crate finds the boundary of a single roughly-centered cell in a small
//! 2D grayscale image. It combines edge detection with a marker-controlled
//! watershed segmentation: a foreground seed is planted at the image center, a
//! background seed is painted along the image border, and both are flooded
//! across an edge-strength map so that the flood line settles on the cell
//! boundary.
//!
//! ## Features
//!
//! - Radial edge detection via a Cartesian↔polar resampling transform
//! - Planar Sobel gradient-magnitude edge detection as an alternative mode
//! - Parallel Sobel gradient computation
//! - Deterministic marker-controlled watershed flooding
//! - Mask visualization utilities
//! - Optional debug logging (enable with `logger` feature)
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use cell_detect::{watershed_edge, CellImage};
//! use image::Luma;
//!
//! // Synthetic image: dark cell of radius 15 on a bright background.
//! let image = CellImage::from_fn(50, 50, |x, y| {
//!     let dx = x as f32 - 25.0;
//!     let dy = y as f32 - 25.0;
//!     Luma([if dx * dx + dy * dy <= 225.0 { 0.0 } else { 1.0 }])
//! });
//!
//! let mask = watershed_edge(&image, 2, true, 1).unwrap();
//! let cell_pixels = mask.pixels().filter(|p| p[0] != 0).count();
//! println!("cell covers {cell_pixels} pixels");
//! ```
//!
//! ## Optional Features
//!
//! ### Logger Feature
//!
//! Enable debug logging to monitor the detection pipeline:
//!
//! ```toml
//! [dependencies]
//! cell-detect = { version = "0.1.0", features = ["logger"] }
//! log = "0.4"
//! env_logger = "0.11"
//! ```
//!
//! ```rust,no_run
//! use cell_detect::{watershed_edge, CellImage};
//!
//! // Initialize logger to see debug output
//! env_logger::init();
//!
//! let image = CellImage::new(64, 64);
//! let _ = watershed_edge(&image, 2, true, 1);
//! // With logger feature, you'll see debug messages like:
//! // DEBUG cell_detect: start watershed_edge 64x64 radial=true
//! // DEBUG cell_detect: elevation map ready
//! // DEBUG cell_detect: flood finished
//! ```
//!
//! ## Radial vs. Planar Mode
//!
//! In radial mode (`radial = true`) the image is first resampled into polar
//! coordinates around its center, smoothed tangentially (along the angular
//! axis only, so radial edges survive), filtered for radial edges, and mapped
//! back to Cartesian space. This favors boundaries that are roughly circular
//! around the image center. In planar mode (`radial = false`) a plain Sobel
//! gradient magnitude is used, median-smoothed with a disk window.
//!
//! ```rust,no_run
//! use cell_detect::{watershed_edge, CellImage};
//!
//! let image = CellImage::new(64, 64);
//!
//! // Radial mode: favors circular boundaries around the center
//! let radial_mask = watershed_edge(&image, 2, true, 1).unwrap();
//!
//! // Planar mode: direction-agnostic gradient magnitude
//! let planar_mask = watershed_edge(&image, 2, false, 1).unwrap();
//!
//! assert_eq!(radial_mask.dimensions(), planar_mask.dimensions());
//! ```

use image::{buffer::ConvertBuffer, GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::definitions::HasWhite;
use imageproc::filter::median_filter;
use rayon::prelude::*;
use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    f32::consts::PI,
    sync::{Arc, Mutex},
};
use thiserror::Error;

// Conditional logging macros
#[cfg(feature = "logger")]
macro_rules! debug {
    ($($arg:tt)*) => {
        log::debug!($($arg)*);
    };
}

#[cfg(not(feature = "logger"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "logger")]
macro_rules! warn {
    ($($arg:tt)*) => {
        log::warn!($($arg)*);
    };
}

#[cfg(not(feature = "logger"))]
macro_rules! warn {
    ($($arg:tt)*) => {};
}

/// Real-valued grayscale image used throughout the detection pipeline.
pub type CellImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Errors raised by the detection pipeline.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DetectError {
    /// The caller passed an image or parameter the pipeline cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A resampled coordinate fell outside the padded image. The padding
    /// logic is sized to make this unreachable; seeing it means a defect in
    /// the transform, not a usage error.
    #[error("geometry error: {0}")]
    Geometry(String),
}

/// Segments a single cell mask using a marker-controlled watershed on the
/// edges of the image.
///
/// A foreground seed is planted at the image center and grown into a disk of
/// radius `dilation_size`; the whole image border is marked as background.
/// Both seeds are then flooded across the edge map in order of increasing
/// edge strength, and the returned mask is the region claimed by the center
/// seed (white = cell, black = background).
///
/// # Arguments
///
/// * `image` - Input image, assumed to contain one cell near the center
/// * `dilation_size` - Radius of the disk grown from the center seed
///   (default choice: 0, a single-pixel seed)
/// * `radial` - If true, edges are detected radially by first transforming
///   the image to polar coordinates (default choice: true)
/// * `filter_size` - Median smoothing applied to the edge response before
///   flooding; tangential window in radial mode, disk window in planar mode
///   (default choice: 0)
///
/// # Returns
///
/// A binary mask of the same dimensions as `image`, white where the cell was
/// detected.
///
/// # Errors
///
/// Returns [`DetectError::InvalidInput`] for degenerate image shapes
/// (anything smaller than 3×3 has no interior to segment).
///
/// # Determinism
///
/// The flood order is a priority queue keyed on (edge value, insertion
/// order), so repeated calls with identical inputs produce bit-identical
/// masks. If `dilation_size` is large enough that the center seed touches the
/// border, the two seed regions merge and the result is unspecified; keep
/// the seed disk small relative to the image.
///
/// # Examples
///
/// ```rust,no_run
/// use cell_detect::{watershed_edge, CellImage};
/// use image::Luma;
///
/// let image = CellImage::from_fn(50, 50, |x, y| {
///     let dx = x as f32 - 25.0;
///     let dy = y as f32 - 25.0;
///     Luma([if dx * dx + dy * dy <= 225.0 { 0.0 } else { 1.0 }])
/// });
///
/// let mask = watershed_edge(&image, 2, false, 1).unwrap();
/// assert_eq!(mask.get_pixel(25, 25)[0], 255);
/// ```
pub fn watershed_edge(
    image: &CellImage,
    dilation_size: u32,
    radial: bool,
    filter_size: u32,
) -> Result<GrayImage, DetectError> {
    let (width, height) = image.dimensions();
    if width < 3 || height < 3 {
        return Err(DetectError::InvalidInput(format!(
            "image must be at least 3x3 to segment, got {width}x{height}"
        )));
    }

    debug!("start watershed_edge {width}x{height} radial={radial}");

    let elevation = if radial {
        // High edge strength must act as a barrier, so the signed radial
        // response is negated before flooding.
        negate(&radial_sobel(image, filter_size)?)
    } else {
        let (gx, gy) = sobel_gradients(image);
        let magnitude: Vec<f32> = gx
            .iter()
            .zip(gy.iter())
            .map(|(dx, dy)| dx.hypot(*dy))
            .collect();
        let magnitude = CellImage::from_raw(width, height, magnitude).unwrap();
        let normed = norm(&magnitude, 0.0, 100.0)?;
        let smoothed = median_filter_disk(&quantize_unit(&normed), filter_size);
        dequantize_unit(&smoothed)
    };

    debug!("elevation map ready");

    let markers = build_markers(width, height, dilation_size);
    let labels = marker_watershed(&elevation, &markers);

    debug!("flood finished");

    let mut mask = GrayImage::new(width, height);
    for (x, y, label) in labels.enumerate_pixels() {
        if label[0] == 1 {
            mask.put_pixel(x, y, Luma::<u8>::white());
        }
    }

    let cell_pixels = mask.pixels().filter(|p| p[0] != 0).count();
    let interior = ((width - 2) * (height - 2)) as usize;
    if cell_pixels == 0 || cell_pixels >= interior {
        warn!(
            "degenerate segmentation: {cell_pixels} of {interior} interior pixels \
             labeled as cell; check dilation_size and filter_size"
        );
    }

    Ok(mask)
}

/// Convenience wrapper running [`watershed_edge`] on an 8-bit grayscale image.
pub fn watershed_edge_u8(
    image: &GrayImage,
    dilation_size: u32,
    radial: bool,
    filter_size: u32,
) -> Result<GrayImage, DetectError> {
    let float = CellImage::from_raw(
        image.width(),
        image.height(),
        image.as_raw().iter().map(|&v| v as f32).collect(),
    )
    .unwrap();
    watershed_edge(&float, dilation_size, radial, filter_size)
}

/// Applies an edge filter radially by transforming the image to polar
/// coordinates, detecting constant-radius edges there, and transforming the
/// response back to Cartesian coordinates.
///
/// The polar transform uses `max_radius = width / 2`, an angular resolution
/// of roughly ten samples per boundary pixel, and 2× upsampling to soften
/// nearest-neighbor gather artifacts at small radii. Before the edge filter,
/// the polar image is normalized to `[0, 1]` and median-smoothed with a
/// `1 × (2·filter_size + 1)` window. Smoothing runs along the angular axis
/// only, so edges at constant radius are preserved.
///
/// The response is signed, positive where intensity falls with increasing
/// radius. Callers feeding it to a watershed negate it first so that strong
/// edges become barriers.
///
/// # Errors
///
/// Returns [`DetectError::InvalidInput`] if the image is smaller than 2×2
/// (there is no radius range to sample).
pub fn radial_sobel(image: &CellImage, filter_size: u32) -> Result<CellImage, DetectError> {
    let (width, height) = image.dimensions();
    if width < 2 || height < 2 {
        return Err(DetectError::InvalidInput(format!(
            "image must be at least 2x2 for radial edge detection, got {width}x{height}"
        )));
    }

    let max_radius = width / 2;
    let phase_width = (2.0 * PI * max_radius as f32 * 10.0) as u32;
    let center = ((height / 2) as f32, (width / 2) as f32);

    let polar = image_cart_to_polar(image, center, 0, max_radius, phase_width, 2)?;
    debug!("polar image {}x{} (angle x radius)", polar.width(), polar.height());

    let normed = norm(&polar, 0.0, 100.0)?;
    let smoothed = median_filter(&quantize_unit(&normed), filter_size, 0);
    let smoothed = dequantize_unit(&smoothed);

    // Horizontal Sobel with the row axis being radius: positive response
    // where intensity falls as the radius grows.
    let (_, gy) = sobel_gradients(&smoothed);
    let response = CellImage::from_raw(
        smoothed.width(),
        smoothed.height(),
        gy.into_iter().map(|v| -v).collect(),
    )
    .unwrap();

    image_polar_to_cart(&response, center, 0, max_radius, (height, width), 2)
}

/// Computes Sobel gradients in parallel.
///
/// Calculates the horizontal (Gx) and vertical (Gy) gradients of a
/// real-valued image using 3x3 Sobel operators, parallelized across image
/// rows with rayon. Border pixels are left at zero.
///
/// # Returns
///
/// A tuple of `(gx, gy)` gradient buffers flattened in row-major order, each
/// of length `width * height`.
///
/// # Sobel Operators
///
/// Horizontal (Gx):
/// ```text
/// [-1  0  1]
/// [-2  0  2]
/// [-1  0  1]
/// ```
///
/// Vertical (Gy):
/// ```text
/// [-1 -2 -1]
/// [ 0  0  0]
/// [ 1  2  1]
/// ```
pub fn sobel_gradients(image: &CellImage) -> (Vec<f32>, Vec<f32>) {
    let (width, height) = image.dimensions();
    let len = (width * height) as usize;
    if width < 3 || height < 3 {
        return (vec![0.0; len], vec![0.0; len]);
    }

    // Thread-safe storage for gradient results
    let gx = Arc::new(Mutex::new(vec![0.0; len]));
    let gy = Arc::new(Mutex::new(vec![0.0; len]));

    let pixels = image.as_raw();

    const SOBEL_KERNEL_X: [f32; 9] = [-1.0, 0.0, 1.0, -2.0, 0.0, 2.0, -1.0, 0.0, 1.0];
    const SOBEL_KERNEL_Y: [f32; 9] = [-1.0, -2.0, -1.0, 0.0, 0.0, 0.0, 1.0, 2.0, 1.0];

    // Parallel processing of each row (excluding border rows)
    (1..height - 1).into_par_iter().for_each(|y| {
        let w = width as usize;
        let row_start = y as usize * w;

        // Pixel slices for the 3x3 neighborhood: rows y-1, y, y+1
        let prev_row = &pixels[row_start - w..row_start];
        let curr_row = &pixels[row_start..row_start + w];
        let next_row = &pixels[row_start + w..row_start + 2 * w];

        let mut gx_rows = gx.lock().unwrap();
        let mut gy_rows = gy.lock().unwrap();

        for x in 1..w - 1 {
            let mut gx_val = 0.0;
            let mut gy_val = 0.0;

            for ky in 0..3 {
                let row = match ky {
                    0 => prev_row,
                    1 => curr_row,
                    _ => next_row,
                };
                for kx in 0..3 {
                    let pixel = row[x + kx - 1];
                    let kernel_index = ky * 3 + kx;
                    gx_val += pixel * SOBEL_KERNEL_X[kernel_index];
                    gy_val += pixel * SOBEL_KERNEL_Y[kernel_index];
                }
            }

            gx_rows[row_start + x] = gx_val;
            gy_rows[row_start + x] = gy_val;
        }
    });

    let gx = Arc::try_unwrap(gx).unwrap().into_inner().unwrap();
    let gy = Arc::try_unwrap(gy).unwrap().into_inner().unwrap();
    (gx, gy)
}

/// Resamples an image from Cartesian to polar coordinates around `center`.
///
/// The result has one row per integer radius in `[min_radius, max_radius)`
/// (top to bottom) and `phase_width` columns covering the angle range
/// `[0, 2π)` (left to right). Sampling gathers the nearest pixel for each
/// `(radius, angle)` pair, deliberately without interpolation at gather time;
/// use `zoom_factor > 1` to soften the resulting aliasing at small radii.
///
/// With `zoom_factor != 1` the image is first upsampled by that factor using
/// Catmull-Rom (cubic) interpolation and `center`, `min_radius` and
/// `max_radius` are rescaled to match. If `center ± max_radius` would leave
/// the image, the image is zero-padded symmetrically by the minimal amount
/// that keeps every sample in bounds.
///
/// `center` is `(row, column)` in pixel coordinates; angle zero points along
/// the +row axis.
///
/// # Errors
///
/// [`DetectError::InvalidInput`] for an empty image, `min_radius >=
/// max_radius`, zero `phase_width` or zero `zoom_factor`;
/// [`DetectError::Geometry`] if a sample falls outside the padded image
/// (unreachable unless the padding logic is broken).
///
/// # Examples
///
/// ```rust,no_run
/// use cell_detect::{image_cart_to_polar, CellImage};
///
/// let image = CellImage::new(64, 64);
/// let polar = image_cart_to_polar(&image, (32.0, 32.0), 0, 32, 512, 1).unwrap();
/// assert_eq!(polar.dimensions(), (512, 32));
/// ```
pub fn image_cart_to_polar(
    image: &CellImage,
    center: (f32, f32),
    min_radius: u32,
    max_radius: u32,
    phase_width: u32,
    zoom_factor: u32,
) -> Result<CellImage, DetectError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(DetectError::InvalidInput(
            "cannot transform an empty image".into(),
        ));
    }
    validate_polar_params(min_radius, max_radius, phase_width, zoom_factor)?;

    // Upsample image
    let (mut cy, mut cx) = center;
    let mut min_r = min_radius;
    let mut max_r = max_radius;
    let mut working = if zoom_factor != 1 {
        let z = zoom_factor;
        cy = cy * z as f32 + (z / 2) as f32;
        cx = cx * z as f32 + (z / 2) as f32;
        min_r *= z;
        max_r *= z;
        resample_catmull_rom(image, image.width() * z, image.height() * z)
    } else {
        image.clone()
    };

    // Pad if necessary
    let (w, h) = working.dimensions();
    let pad_rows = ((cy + max_r as f32) - h as f32).max(max_r as f32 - cy);
    let pad_cols = ((cx + max_r as f32) - w as f32).max(max_r as f32 - cx);
    let pad = pad_rows.max(pad_cols).max(0.0).ceil() as u32;
    if pad != 0 {
        working = pad_with_zeros(&working, pad);
        cy += pad as f32;
        cx += pad as f32;
    }

    // Coordinate conversion: nearest-neighbor gather over the (r, theta) grid
    let (w, h) = working.dimensions();
    let mut polar = CellImage::new(phase_width, max_r - min_r);
    let step = 2.0 * PI / phase_width as f32;
    for (i, r) in (min_r..max_r).enumerate() {
        for j in 0..phase_width {
            let theta = j as f32 * step;
            let (row, col) = coord_polar_to_cart(r as f32, theta, (cy, cx));
            let (row, col) = (row.round(), col.round());
            if row < 0.0 || col < 0.0 || row >= h as f32 || col >= w as f32 {
                return Err(DetectError::Geometry(format!(
                    "sample (r={r}, theta={theta:.4}) landed at ({row}, {col}) \
                     outside the {w}x{h} padded image"
                )));
            }
            let value = working.get_pixel(col as u32, row as u32)[0];
            polar.put_pixel(j, i as u32, Luma([value]));
        }
    }

    Ok(polar)
}

/// Resamples a polar-space grid (mask or edge response) back to Cartesian
/// coordinates, writing into a zero image of `output_shape` (height, width).
///
/// Every polar sample is scattered to its rounded Cartesian pixel, clipped to
/// the output bounds. Near the center many angle samples round to the same
/// pixel; the last writer wins, with rows (radii) iterated outermost and
/// columns (angles) innermost. Pixels never reached by any `(radius, angle)`
/// pair keep their zero value.
///
/// `zoom_factor` must match the forward transform: center and radii are
/// rescaled the same way, the scatter happens at the upsampled resolution and
/// the result is downsampled back to `output_shape` with Catmull-Rom
/// interpolation.
///
/// # Errors
///
/// [`DetectError::InvalidInput`] for an empty polar grid, an empty output
/// shape, `min_radius >= max_radius`, or zero `zoom_factor`.
pub fn image_polar_to_cart(
    polar: &CellImage,
    center: (f32, f32),
    min_radius: u32,
    max_radius: u32,
    output_shape: (u32, u32),
    zoom_factor: u32,
) -> Result<CellImage, DetectError> {
    if polar.width() == 0 || polar.height() == 0 {
        return Err(DetectError::InvalidInput(
            "cannot transform an empty polar grid".into(),
        ));
    }
    if output_shape.0 == 0 || output_shape.1 == 0 {
        return Err(DetectError::InvalidInput(
            "output shape must be non-empty".into(),
        ));
    }
    validate_polar_params(min_radius, max_radius, polar.width(), zoom_factor)?;

    // Account for upsampling
    let z = zoom_factor;
    let (mut cy, mut cx) = center;
    let mut min_r = min_radius;
    if z != 1 {
        cy = cy * z as f32 + (z / 2) as f32;
        cx = cx * z as f32 + (z / 2) as f32;
        min_r *= z;
    }
    let out_h = output_shape.0 * z;
    let out_w = output_shape.1 * z;

    let mut out = CellImage::new(out_w, out_h);
    let step = 2.0 * PI / polar.width() as f32;
    for i in 0..polar.height() {
        let r = (min_r + i) as f32;
        for j in 0..polar.width() {
            let theta = j as f32 * step;
            let (row, col) = coord_polar_to_cart(r, theta, (cy, cx));
            let row = row.round().clamp(0.0, (out_h - 1) as f32) as u32;
            let col = col.round().clamp(0.0, (out_w - 1) as f32) as u32;
            out.put_pixel(col, row, *polar.get_pixel(j, i));
        }
    }

    // Downsample back to the requested shape
    if z != 1 {
        out = resample_catmull_rom(&out, output_shape.1, output_shape.0);
    }

    Ok(out)
}

/// Converts polar coordinates around `center` to Cartesian `(row, column)`.
#[inline]
pub fn coord_polar_to_cart(r: f32, theta: f32, center: (f32, f32)) -> (f32, f32) {
    (r * theta.cos() + center.0, r * theta.sin() + center.1)
}

/// Converts Cartesian `(row, column)` coordinates to polar around `center`.
#[inline]
pub fn coord_cart_to_polar(row: f32, col: f32, center: (f32, f32)) -> (f32, f32) {
    let dy = row - center.0;
    let dx = col - center.1;
    (dy.hypot(dx), dx.atan2(dy))
}

/// Clips an image between two percentiles and rescales it to `[0, 1]`.
///
/// Percentiles follow the linear-interpolation convention: `norm(img, 0.0,
/// 100.0)` is a plain min/max rescale, while tighter percentiles suppress
/// outliers before rescaling. A flat image (no value range after clipping)
/// maps to all zeros.
///
/// # Errors
///
/// [`DetectError::InvalidInput`] for an empty image or a percentile range
/// with `min_percentile >= max_percentile`.
pub fn norm(
    image: &CellImage,
    min_percentile: f32,
    max_percentile: f32,
) -> Result<CellImage, DetectError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(DetectError::InvalidInput(
            "cannot normalize an empty image".into(),
        ));
    }
    if min_percentile >= max_percentile {
        return Err(DetectError::InvalidInput(format!(
            "min_percentile ({min_percentile}) must be smaller than \
             max_percentile ({max_percentile})"
        )));
    }

    let mut sorted = image.as_raw().clone();
    sorted.sort_unstable_by(f32::total_cmp);
    let lo = percentile_of_sorted(&sorted, min_percentile);
    let hi = percentile_of_sorted(&sorted, max_percentile);

    let clipped: Vec<f32> = image
        .as_raw()
        .iter()
        .map(|&v| if v < lo { lo } else if v > hi { hi } else { v })
        .collect();
    let min_v = clipped.iter().copied().fold(f32::INFINITY, f32::min);
    let max_v = clipped.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max_v - min_v;

    let data = if range > 0.0 && range.is_finite() {
        clipped.into_iter().map(|v| (v - min_v) / range).collect()
    } else {
        vec![0.0; clipped.len()]
    };

    Ok(CellImage::from_raw(image.width(), image.height(), data).unwrap())
}

/// Median filter with a disk-shaped window of the given radius.
///
/// Only in-bounds pixels contribute near the borders. A radius of zero
/// returns the image unchanged.
pub fn median_filter_disk(image: &GrayImage, radius: u32) -> GrayImage {
    if radius == 0 {
        return image.clone();
    }

    let (width, height) = image.dimensions();
    let offsets = disk_offsets(radius);
    let mut out = GrayImage::new(width, height);
    let mut window = Vec::with_capacity(offsets.len());

    for y in 0..height {
        for x in 0..width {
            window.clear();
            for &(dy, dx) in &offsets {
                let ny = y as i64 + dy as i64;
                let nx = x as i64 + dx as i64;
                if ny >= 0 && nx >= 0 && (ny as u32) < height && (nx as u32) < width {
                    window.push(image.get_pixel(nx as u32, ny as u32)[0]);
                }
            }
            window.sort_unstable();
            out.put_pixel(x, y, Luma([window[window.len() / 2]]));
        }
    }

    out
}

/// Visualizes a detection result by tracing the mask boundary in red on top
/// of the input image.
///
/// The input is rescaled to 8-bit for display; boundary pixels are mask
/// pixels with at least one non-mask 4-neighbor (or lying on the image
/// border).
pub fn visualize_mask(image: &CellImage, mask: &GrayImage) -> RgbImage {
    let canvas_gray = match norm(image, 0.0, 100.0) {
        Ok(normed) => quantize_unit(&normed),
        Err(_) => GrayImage::new(image.width(), image.height()),
    };
    let mut canvas: RgbImage = canvas_gray.convert();
    let red = Rgb([255u8, 0, 0]);

    let (width, height) = mask.dimensions();
    for y in 0..height.min(canvas.height()) {
        for x in 0..width.min(canvas.width()) {
            if mask.get_pixel(x, y)[0] == 0 {
                continue;
            }
            let on_border = x == 0 || y == 0 || x == width - 1 || y == height - 1;
            let has_background_neighbor =
                [(1i64, 0i64), (-1, 0), (0, 1), (0, -1)].iter().any(|&(dy, dx)| {
                    let ny = y as i64 + dy;
                    let nx = x as i64 + dx;
                    ny >= 0
                        && nx >= 0
                        && (ny as u32) < height
                        && (nx as u32) < width
                        && mask.get_pixel(nx as u32, ny as u32)[0] == 0
                });
            if on_border || has_background_neighbor {
                canvas.put_pixel(x, y, red);
            }
        }
    }

    canvas
}

// --- private helpers -------------------------------------------------------

fn validate_polar_params(
    min_radius: u32,
    max_radius: u32,
    phase_width: u32,
    zoom_factor: u32,
) -> Result<(), DetectError> {
    if min_radius >= max_radius {
        return Err(DetectError::InvalidInput(format!(
            "min_radius ({min_radius}) must be smaller than max_radius ({max_radius})"
        )));
    }
    if phase_width == 0 {
        return Err(DetectError::InvalidInput(
            "phase_width must be positive".into(),
        ));
    }
    if zoom_factor == 0 {
        return Err(DetectError::InvalidInput(
            "zoom_factor must be at least 1".into(),
        ));
    }
    Ok(())
}

/// Linear-interpolation percentile over an ascending-sorted slice.
fn percentile_of_sorted(sorted: &[f32], percentile: f32) -> f32 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = (percentile / 100.0).clamp(0.0, 1.0) * (n - 1) as f32;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f32;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

fn negate(image: &CellImage) -> CellImage {
    CellImage::from_raw(
        image.width(),
        image.height(),
        image.as_raw().iter().map(|v| -v).collect(),
    )
    .unwrap()
}

/// Quantizes a `[0, 1]` image to 8 bits for rank filtering.
fn quantize_unit(image: &CellImage) -> GrayImage {
    GrayImage::from_raw(
        image.width(),
        image.height(),
        image
            .as_raw()
            .iter()
            .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect(),
    )
    .unwrap()
}

fn dequantize_unit(image: &GrayImage) -> CellImage {
    CellImage::from_raw(
        image.width(),
        image.height(),
        image.as_raw().iter().map(|&v| v as f32 / 255.0).collect(),
    )
    .unwrap()
}

fn pad_with_zeros(image: &CellImage, pad: u32) -> CellImage {
    let (w, h) = image.dimensions();
    let mut out = CellImage::new(w + 2 * pad, h + 2 * pad);
    for y in 0..h {
        for x in 0..w {
            out.put_pixel(x + pad, y + pad, *image.get_pixel(x, y));
        }
    }
    out
}

/// Offsets `(dy, dx)` of a disk structuring element: `dy² + dx² <= r²`.
fn disk_offsets(radius: u32) -> Vec<(i32, i32)> {
    let r = radius as i32;
    let r2 = r * r;
    let mut offsets = Vec::new();
    for dy in -r..=r {
        for dx in -r..=r {
            if dy * dy + dx * dx <= r2 {
                offsets.push((dy, dx));
            }
        }
    }
    offsets
}

/// Separable Catmull-Rom (cubic) resampler for real-valued images.
///
/// Border handling replicates edge pixels. Unlike `image::imageops::resize`,
/// sample values are not clamped to `[0, 1]`, so signed edge responses
/// survive the round trip.
fn resample_catmull_rom(image: &CellImage, new_width: u32, new_height: u32) -> CellImage {
    fn weight(t: f32) -> f32 {
        let t = t.abs();
        if t < 1.0 {
            (1.5 * t - 2.5) * t * t + 1.0
        } else if t < 2.0 {
            ((-0.5 * t + 2.5) * t - 4.0) * t + 2.0
        } else {
            0.0
        }
    }

    fn resample_axis(
        get: impl Fn(u32, u32) -> f32,
        src_len: u32,
        dst_len: u32,
        other_len: u32,
    ) -> Vec<f32> {
        // Output indexed [other * dst_len + dst]
        let scale = src_len as f32 / dst_len as f32;
        let mut out = vec![0.0; (dst_len * other_len) as usize];
        for other in 0..other_len {
            for dst in 0..dst_len {
                let src = (dst as f32 + 0.5) * scale - 0.5;
                let base = src.floor();
                let frac = src - base;
                let mut acc = 0.0;
                let mut total = 0.0;
                for k in -1i64..=2 {
                    let wt = weight(k as f32 - frac);
                    let idx = (base as i64 + k).clamp(0, src_len as i64 - 1) as u32;
                    acc += wt * get(idx, other);
                    total += wt;
                }
                out[(other * dst_len + dst) as usize] = acc / total;
            }
        }
        out
    }

    let (w, h) = image.dimensions();

    // Horizontal pass: rows keep their height, columns resample
    let horizontal = resample_axis(|x, y| image.get_pixel(x, y)[0], w, new_width, h);

    // Vertical pass over the horizontal result, indexed [x * new_height + y]
    let vertical = resample_axis(
        |y, x| horizontal[(y * new_width + x) as usize],
        h,
        new_height,
        new_width,
    );

    let mut data = vec![0.0; (new_width * new_height) as usize];
    for x in 0..new_width {
        for y in 0..new_height {
            data[(y * new_width + x) as usize] = vertical[(x * new_height + y) as usize];
        }
    }
    CellImage::from_raw(new_width, new_height, data).unwrap()
}

/// Builds the two-seed marker image: a disk of label 1 grown from the center
/// pixel, label 2 along the whole border, 0 elsewhere.
fn build_markers(width: u32, height: u32, dilation_size: u32) -> GrayImage {
    let mut markers = GrayImage::new(width, height);
    let cy = height / 2;
    let cx = width / 2;

    for (dy, dx) in disk_offsets(dilation_size) {
        let y = cy as i64 + dy as i64;
        let x = cx as i64 + dx as i64;
        if y >= 0 && x >= 0 && (y as u32) < height && (x as u32) < width {
            markers.put_pixel(x as u32, y as u32, Luma([1]));
        }
    }

    for x in 0..width {
        markers.put_pixel(x, 0, Luma([2]));
        markers.put_pixel(x, height - 1, Luma([2]));
    }
    for y in 0..height {
        markers.put_pixel(0, y, Luma([2]));
        markers.put_pixel(width - 1, y, Luma([2]));
    }

    markers
}

/// Queue entry for the watershed flood. Ordered by elevation first, then by
/// insertion order, which makes ties deterministic (FIFO within one level).
#[derive(Clone, Copy, Debug)]
struct FloodCandidate {
    elevation: f32,
    order: u64,
    x: u32,
    y: u32,
    label: u8,
}

impl PartialEq for FloodCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FloodCandidate {}

impl PartialOrd for FloodCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloodCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.elevation
            .total_cmp(&other.elevation)
            .then(self.order.cmp(&other.order))
    }
}

/// Marker-controlled region growing: floods all seed labels outward across
/// the elevation map, lowest elevation first, until every pixel is claimed.
///
/// Each unlabeled pixel takes the label of the first flood front to reach it.
/// Seeds enqueue in row-major scan order and 4-connected neighbors are
/// visited in a fixed order, so the output is fully deterministic.
fn marker_watershed(elevation: &CellImage, markers: &GrayImage) -> GrayImage {
    let (width, height) = elevation.dimensions();
    let mut labels = markers.clone();
    let mut queue = BinaryHeap::new();
    let mut order = 0u64;

    for y in 0..height {
        for x in 0..width {
            let label = labels.get_pixel(x, y)[0];
            if label != 0 {
                queue.push(Reverse(FloodCandidate {
                    elevation: elevation.get_pixel(x, y)[0],
                    order,
                    x,
                    y,
                    label,
                }));
                order += 1;
            }
        }
    }

    while let Some(Reverse(candidate)) = queue.pop() {
        let neighbors = [
            (candidate.x, candidate.y.wrapping_sub(1)),
            (candidate.x.wrapping_sub(1), candidate.y),
            (candidate.x + 1, candidate.y),
            (candidate.x, candidate.y + 1),
        ];
        for &(nx, ny) in &neighbors {
            if nx >= width || ny >= height {
                continue;
            }
            if labels.get_pixel(nx, ny)[0] != 0 {
                continue;
            }
            labels.put_pixel(nx, ny, Luma([candidate.label]));
            queue.push(Reverse(FloodCandidate {
                elevation: elevation.get_pixel(nx, ny)[0],
                order,
                x: nx,
                y: ny,
                label: candidate.label,
            }));
            order += 1;
        }
    }

    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageBuffer;

    /// Dark or bright disk of the given radius centered in a square image.
    fn disk_image(size: u32, radius: f32, cell: f32, background: f32) -> CellImage {
        let c = (size / 2) as f32;
        ImageBuffer::from_fn(size, size, |x, y| {
            let dx = x as f32 - c;
            let dy = y as f32 - c;
            Luma([if dx * dx + dy * dy <= radius * radius {
                cell
            } else {
                background
            }])
        })
    }

    fn gradient_image(width: u32, height: u32) -> CellImage {
        ImageBuffer::from_fn(width, height, |x, y| Luma([(x + y) as f32]))
    }

    /// Returns (total pixels with `label`, size of the 4-connected component
    /// containing the first such pixel in scan order).
    fn count_connected(markers: &GrayImage, label: u8) -> (usize, usize) {
        let (width, height) = markers.dimensions();
        let total = markers.pixels().filter(|p| p[0] == label).count();
        let start = (0..width * height)
            .map(|i| (i % width, i / width))
            .find(|&(x, y)| markers.get_pixel(x, y)[0] == label);
        let Some(start) = start else {
            return (0, 0);
        };
        let mut visited = vec![false; (width * height) as usize];
        let mut stack = vec![start];
        visited[(start.1 * width + start.0) as usize] = true;
        let mut component = 0;
        while let Some((x, y)) = stack.pop() {
            component += 1;
            let neighbors = [
                (x.wrapping_sub(1), y),
                (x + 1, y),
                (x, y.wrapping_sub(1)),
                (x, y + 1),
            ];
            for &(nx, ny) in &neighbors {
                if nx >= width || ny >= height {
                    continue;
                }
                let idx = (ny * width + nx) as usize;
                if !visited[idx] && markers.get_pixel(nx, ny)[0] == label {
                    visited[idx] = true;
                    stack.push((nx, ny));
                }
            }
        }
        (total, component)
    }

    #[test]
    fn round_trip_preserves_shape() {
        let image = gradient_image(40, 40);
        let polar = image_cart_to_polar(&image, (20.0, 20.0), 0, 20, 128, 1).unwrap();
        assert_eq!(polar.dimensions(), (128, 20));
        let back = image_polar_to_cart(&polar, (20.0, 20.0), 0, 20, (40, 40), 1).unwrap();
        assert_eq!(back.dimensions(), (40, 40));
    }

    #[test]
    fn round_trip_preserves_shape_with_zoom() {
        let image = gradient_image(40, 40);
        let polar = image_cart_to_polar(&image, (20.0, 20.0), 0, 20, 256, 2).unwrap();
        assert_eq!(polar.dimensions(), (256, 40));
        let back = image_polar_to_cart(&polar, (20.0, 20.0), 0, 20, (40, 40), 2).unwrap();
        assert_eq!(back.dimensions(), (40, 40));
    }

    #[test]
    fn polar_gather_hits_known_angle() {
        // Bright pixel five columns right of center: radius 5, angle pi/2.
        let mut image = CellImage::new(21, 21);
        image.put_pixel(15, 10, Luma([1.0]));
        let polar = image_cart_to_polar(&image, (10.0, 10.0), 0, 10, 40, 1).unwrap();
        assert_eq!(polar.get_pixel(10, 5)[0], 1.0);
        // Angle zero points along the +row axis.
        let mut image = CellImage::new(21, 21);
        image.put_pixel(10, 15, Luma([1.0]));
        let polar = image_cart_to_polar(&image, (10.0, 10.0), 0, 10, 40, 1).unwrap();
        assert_eq!(polar.get_pixel(0, 5)[0], 1.0);
    }

    #[test]
    fn polar_to_cart_leaves_unreached_pixels_zero() {
        let polar = CellImage::from_pixel(64, 10, Luma([1.0]));
        let out = image_polar_to_cart(&polar, (20.0, 20.0), 0, 10, (40, 40), 1).unwrap();
        assert_eq!(out.get_pixel(20, 20)[0], 1.0);
        assert_eq!(out.get_pixel(0, 0)[0], 0.0);
        assert_eq!(out.get_pixel(39, 39)[0], 0.0);
    }

    #[test]
    fn cart_to_polar_pads_off_center_images() {
        let image = gradient_image(20, 20);
        let polar = image_cart_to_polar(&image, (2.0, 2.0), 0, 10, 64, 1).unwrap();
        assert_eq!(polar.dimensions(), (64, 10));
    }

    #[test]
    fn transform_rejects_bad_parameters() {
        let image = gradient_image(20, 20);
        assert!(matches!(
            image_cart_to_polar(&image, (10.0, 10.0), 10, 10, 64, 1),
            Err(DetectError::InvalidInput(_))
        ));
        assert!(matches!(
            image_cart_to_polar(&image, (10.0, 10.0), 0, 10, 0, 1),
            Err(DetectError::InvalidInput(_))
        ));
        assert!(matches!(
            image_cart_to_polar(&image, (10.0, 10.0), 0, 10, 64, 0),
            Err(DetectError::InvalidInput(_))
        ));
        let empty = CellImage::new(0, 0);
        assert!(matches!(
            image_cart_to_polar(&empty, (0.0, 0.0), 0, 10, 64, 1),
            Err(DetectError::InvalidInput(_))
        ));
    }

    #[test]
    fn coord_conversions_round_trip() {
        let center = (12.0, 7.0);
        let (row, col) = coord_polar_to_cart(5.0, 1.1, center);
        let (r, theta) = coord_cart_to_polar(row, col, center);
        assert!((r - 5.0).abs() < 1e-4);
        assert!((theta - 1.1).abs() < 1e-4);
    }

    #[test]
    fn norm_rescales_to_unit_range() {
        let normed = norm(&gradient_image(16, 16), 0.0, 100.0).unwrap();
        let min = normed.as_raw().iter().copied().fold(f32::INFINITY, f32::min);
        let max = normed
            .as_raw()
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
        assert!(min.abs() < 1e-6);
        assert!((max - 1.0).abs() < 1e-6);
    }

    #[test]
    fn norm_clips_percentiles() {
        // 101 distinct values 0..=100 in a single row.
        let image = CellImage::from_raw(101, 1, (0..=100).map(|v| v as f32).collect()).unwrap();
        let normed = norm(&image, 10.0, 90.0).unwrap();
        assert_eq!(normed.get_pixel(0, 0)[0], 0.0);
        assert_eq!(normed.get_pixel(100, 0)[0], 1.0);
        assert!((normed.get_pixel(50, 0)[0] - 0.5).abs() < 1e-5);
        // Everything at or below the 10th percentile collapses to zero.
        assert_eq!(normed.get_pixel(10, 0)[0], 0.0);
        assert!(normed.get_pixel(11, 0)[0] > 0.0);
    }

    #[test]
    fn norm_flat_image_maps_to_zeros() {
        let flat = CellImage::from_pixel(8, 8, Luma([3.5]));
        let normed = norm(&flat, 0.0, 100.0).unwrap();
        assert!(normed.as_raw().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn norm_rejects_bad_inputs() {
        let empty = CellImage::new(0, 0);
        assert!(norm(&empty, 0.0, 100.0).is_err());
        let image = gradient_image(4, 4);
        assert!(norm(&image, 60.0, 40.0).is_err());
    }

    #[test]
    fn markers_have_single_foreground_blob_and_full_border() {
        let markers = build_markers(30, 30, 5);
        let (fg_total, fg_component) = count_connected(&markers, 1);
        assert_eq!(fg_total, disk_offsets(5).len());
        assert_eq!(fg_total, fg_component);
        for x in 0..30 {
            assert_eq!(markers.get_pixel(x, 0)[0], 2);
            assert_eq!(markers.get_pixel(x, 29)[0], 2);
        }
        for y in 0..30 {
            assert_eq!(markers.get_pixel(0, y)[0], 2);
            assert_eq!(markers.get_pixel(29, y)[0], 2);
        }
    }

    #[test]
    fn markers_border_covers_non_square_shapes() {
        let markers = build_markers(13, 7, 2);
        for x in 0..13 {
            assert_eq!(markers.get_pixel(x, 0)[0], 2);
            assert_eq!(markers.get_pixel(x, 6)[0], 2);
        }
        for y in 0..7 {
            assert_eq!(markers.get_pixel(0, y)[0], 2);
            assert_eq!(markers.get_pixel(12, y)[0], 2);
        }
        // The border ring itself is one connected component.
        let (bg_total, bg_component) = count_connected(&markers, 2);
        assert_eq!(bg_total, bg_component);
    }

    #[test]
    fn markers_zero_dilation_is_single_pixel() {
        let markers = build_markers(15, 15, 0);
        let (fg_total, _) = count_connected(&markers, 1);
        assert_eq!(fg_total, 1);
        assert_eq!(markers.get_pixel(7, 7)[0], 1);
    }

    #[test]
    fn watershed_on_flat_elevation_labels_everything_deterministically() {
        let elevation = CellImage::new(21, 21);
        let markers = build_markers(21, 21, 1);
        let first = marker_watershed(&elevation, &markers);
        let second = marker_watershed(&elevation, &markers);
        assert_eq!(first.as_raw(), second.as_raw());
        assert!(first.pixels().all(|p| p[0] != 0));
        // The center seed keeps its own label.
        assert_eq!(first.get_pixel(10, 10)[0], 1);
    }

    #[test]
    fn watershed_respects_elevation_barrier() {
        // A high-elevation vertical wall at x=10 separates seed 1 (left)
        // from seed 2 (right): neither basin may leak across before the
        // wall itself floods.
        let elevation =
            CellImage::from_fn(21, 9, |x, _| Luma([if x == 10 { 10.0 } else { 0.0 }]));
        let mut markers = GrayImage::new(21, 9);
        markers.put_pixel(2, 4, Luma([1]));
        markers.put_pixel(18, 4, Luma([2]));
        let labels = marker_watershed(&elevation, &markers);
        for y in 0..9 {
            for x in 0..10 {
                assert_eq!(labels.get_pixel(x, y)[0], 1, "left of wall at ({x},{y})");
            }
            for x in 11..21 {
                assert_eq!(labels.get_pixel(x, y)[0], 2, "right of wall at ({x},{y})");
            }
        }
    }

    #[test]
    fn sobel_gradients_cover_whole_buffer() {
        let image = CellImage::from_pixel(10, 10, Luma([0.5]));
        let (gx, gy) = sobel_gradients(&image);
        assert_eq!(gx.len(), 100);
        assert_eq!(gy.len(), 100);
        assert!(gx.iter().all(|&v| v == 0.0));
        assert!(gy.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn sobel_gradients_sign_on_vertical_step() {
        // Top half 0, bottom half 1: gy positive at the step, gx zero.
        let image = CellImage::from_fn(9, 9, |_, y| Luma([if y < 4 { 0.0 } else { 1.0 }]));
        let (gx, gy) = sobel_gradients(&image);
        let idx = 4 * 9 + 4;
        assert!(gy[idx] > 0.0);
        assert_eq!(gx[idx], 0.0);
    }

    #[test]
    fn median_filter_disk_removes_salt_noise() {
        let mut image = GrayImage::new(9, 9);
        image.put_pixel(4, 4, Luma([255]));
        let filtered = median_filter_disk(&image, 1);
        assert_eq!(filtered.get_pixel(4, 4)[0], 0);
    }

    #[test]
    fn median_filter_disk_zero_radius_is_identity() {
        let image = quantize_unit(&gradient_image(7, 7));
        let filtered = median_filter_disk(&image, 0);
        assert_eq!(filtered.as_raw(), image.as_raw());
    }

    #[test]
    fn resample_preserves_constant_images() {
        let image = CellImage::from_pixel(12, 8, Luma([0.37]));
        let up = resample_catmull_rom(&image, 24, 16);
        assert_eq!(up.dimensions(), (24, 16));
        assert!(up.as_raw().iter().all(|&v| (v - 0.37).abs() < 1e-5));
        let down = resample_catmull_rom(&up, 12, 8);
        assert!(down.as_raw().iter().all(|&v| (v - 0.37).abs() < 1e-5));
    }

    #[test]
    fn resample_keeps_signed_values() {
        let image = CellImage::from_pixel(10, 10, Luma([-2.0]));
        let up = resample_catmull_rom(&image, 20, 20);
        assert!(up.as_raw().iter().all(|&v| (v + 2.0).abs() < 1e-5));
    }

    #[test]
    fn radial_sobel_matches_input_shape() {
        let image = disk_image(50, 15.0, 0.0, 1.0);
        let response = radial_sobel(&image, 1).unwrap();
        assert_eq!(response.dimensions(), (50, 50));
        // Corners sit beyond the sampled radius range and stay zero.
        assert_eq!(response.get_pixel(0, 0)[0], 0.0);
        assert_eq!(response.get_pixel(49, 49)[0], 0.0);
    }

    #[test]
    fn radial_sobel_peaks_near_boundary() {
        let image = disk_image(50, 15.0, 0.0, 1.0);
        let response = radial_sobel(&image, 1).unwrap();
        let mut best = (0u32, 0u32, 0.0f32);
        for (x, y, p) in response.enumerate_pixels() {
            if p[0].abs() > best.2 {
                best = (x, y, p[0].abs());
            }
        }
        let dx = best.0 as f32 - 25.0;
        let dy = best.1 as f32 - 25.0;
        let r = (dx * dx + dy * dy).sqrt();
        assert!(best.2 > 0.0);
        assert!(
            (10.0..20.0).contains(&r),
            "strongest response at radius {r:.1}, expected near 15"
        );
    }

    #[test]
    fn planar_mask_contains_center_and_tracks_disk() {
        let image = disk_image(50, 15.0, 0.0, 1.0);
        let mask = watershed_edge(&image, 2, false, 1).unwrap();
        assert_eq!(mask.dimensions(), (50, 50));
        assert_eq!(mask.get_pixel(25, 25)[0], 255);
        assert_eq!(mask.get_pixel(0, 0)[0], 0);
        assert_eq!(mask.get_pixel(25, 44)[0], 0);

        let mut area = 0usize;
        for (x, y, p) in mask.enumerate_pixels() {
            if p[0] == 0 {
                continue;
            }
            area += 1;
            let dx = x as f32 - 25.0;
            let dy = y as f32 - 25.0;
            let r = (dx * dx + dy * dy).sqrt();
            assert!(r < 20.0, "cell pixel at radius {r:.1} is far off the disk");
        }
        // Area of a radius-15 disk, give or take boundary pixels.
        assert!((380..=1150).contains(&area), "implausible cell area {area}");
        for (x, y, p) in mask.enumerate_pixels() {
            let dx = x as f32 - 25.0;
            let dy = y as f32 - 25.0;
            if dx * dx + dy * dy <= 11.0 * 11.0 {
                assert_eq!(p[0], 255, "interior pixel ({x},{y}) not labeled as cell");
            }
        }
    }

    #[test]
    fn radial_mask_contains_center() {
        let image = disk_image(50, 15.0, 0.0, 1.0);
        let mask = watershed_edge(&image, 2, true, 1).unwrap();
        assert_eq!(mask.dimensions(), (50, 50));
        assert_eq!(mask.get_pixel(25, 25)[0], 255);
        assert_eq!(mask.get_pixel(2, 2)[0], 0);
        let area = mask.pixels().filter(|p| p[0] != 0).count();
        assert!((300..=1300).contains(&area), "implausible cell area {area}");
    }

    #[test]
    fn segmentation_is_deterministic() {
        let image = disk_image(50, 15.0, 0.0, 1.0);
        let planar_a = watershed_edge(&image, 2, false, 1).unwrap();
        let planar_b = watershed_edge(&image, 2, false, 1).unwrap();
        assert_eq!(planar_a.as_raw(), planar_b.as_raw());
        let radial_a = watershed_edge(&image, 2, true, 1).unwrap();
        let radial_b = watershed_edge(&image, 2, true, 1).unwrap();
        assert_eq!(radial_a.as_raw(), radial_b.as_raw());
    }

    #[test]
    fn watershed_edge_rejects_degenerate_shapes() {
        let tiny = CellImage::new(2, 2);
        assert!(matches!(
            watershed_edge(&tiny, 0, false, 0),
            Err(DetectError::InvalidInput(_))
        ));
        let empty = CellImage::new(0, 0);
        assert!(watershed_edge(&empty, 0, true, 0).is_err());
    }

    #[test]
    fn u8_wrapper_matches_float_pipeline() {
        let float = disk_image(50, 15.0, 0.0, 255.0);
        let bytes =
            GrayImage::from_raw(50, 50, float.as_raw().iter().map(|&v| v as u8).collect())
                .unwrap();
        let from_u8 = watershed_edge_u8(&bytes, 2, false, 1).unwrap();
        let from_f32 = watershed_edge(&float, 2, false, 1).unwrap();
        assert_eq!(from_u8.as_raw(), from_f32.as_raw());
    }

    #[test]
    fn visualize_marks_mask_boundary_in_red() {
        let image = disk_image(50, 15.0, 0.0, 1.0);
        let mask = watershed_edge(&image, 2, false, 1).unwrap();
        let overlay = visualize_mask(&image, &mask);
        assert_eq!(overlay.dimensions(), (50, 50));
        // The mask center is deep inside the cell, so it keeps its gray value.
        assert_ne!(*overlay.get_pixel(25, 25), Rgb([255, 0, 0]));
        // Some pixel on the ring must be painted red.
        let red_pixels = overlay.pixels().filter(|&&p| p == Rgb([255, 0, 0])).count();
        assert!(red_pixels > 0);
    }
}
