//! Pixel transforms over padded BGR rows.
//!
//! Every filter works one row at a time with no state carried between rows, so any set of
//! disjoint row bands can be processed concurrently.

use crate::types::FilterId;
use crate::utils::config::{BRIGHTNESS_OFFSET, ImageConsts};

/// Filter plus its resolved parameters, ready to run on a band.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFilter {
    Grayscale,
    Negative,
    Brightness { offset: i32 },
}

impl PixelFilter {
    /// Resolve a request's filter id. Brightness always shifts by `BRIGHTNESS_OFFSET`; request
    /// parameters travel with the job but do not change any filter.
    pub fn from_id(filter: FilterId) -> Self {
        match filter {
            FilterId::Grayscale => PixelFilter::Grayscale,
            FilterId::Negative => PixelFilter::Negative,
            FilterId::Brightness => PixelFilter::Brightness {
                offset: BRIGHTNESS_OFFSET,
            },
        }
    }

    /// Apply to every pixel of `band`: whole rows of `stride` bytes, `width` pixels each.
    /// Padding bytes are left untouched.
    pub fn apply(self, band: &mut [u8], width: usize, stride: usize) {
        match self {
            PixelFilter::Grayscale => for_each_pixel(band, width, stride, grayscale_px),
            PixelFilter::Negative => for_each_pixel(band, width, stride, negative_px),
            PixelFilter::Brightness { offset } => {
                for_each_pixel(band, width, stride, |px| brightness_px(px, offset))
            }
        }
    }
}

fn for_each_pixel(band: &mut [u8], width: usize, stride: usize, mut f: impl FnMut(&mut [u8])) {
    let row_bytes = width * ImageConsts::BYTES_PER_PIXEL;
    for row in band.chunks_mut(stride) {
        let used = row_bytes.min(row.len());
        for px in row[..used].chunks_exact_mut(ImageConsts::BYTES_PER_PIXEL) {
            f(px);
        }
    }
}

/// Rounded BT.601 luma of a BGR pixel.
pub fn luma(b: u8, g: u8, r: u8) -> u8 {
    let y = 0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b);
    y.round().clamp(0.0, 255.0) as u8
}

fn grayscale_px(px: &mut [u8]) {
    let y = luma(px[0], px[1], px[2]);
    px.fill(y);
}

fn negative_px(px: &mut [u8]) {
    for c in px {
        *c = 255 - *c;
    }
}

/// `clamp(v + offset, 0, 255)`.
pub fn brighten(v: u8, offset: i32) -> u8 {
    i32::from(v).saturating_add(offset).clamp(0, 255) as u8
}

fn brightness_px(px: &mut [u8], offset: i32) {
    for c in px {
        *c = brighten(*c, offset);
    }
}

/// Apply `filter` to a whole padded image buffer on the calling thread.
pub fn apply_to_image(filter: PixelFilter, pixels: &mut [u8], width: usize, rows: usize) {
    let stride = crate::image::bmp::row_stride(width);
    let len = (stride * rows).min(pixels.len());
    filter.apply(&mut pixels[..len], width, stride);
}
