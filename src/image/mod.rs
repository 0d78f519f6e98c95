//! BMP codec, per-job image buffers and the pixel filters.

pub mod bmp;
pub mod buffer;
pub mod filters;

pub use bmp::{FileHeader, InfoHeader, ResultImage, row_stride};
pub use buffer::ImageBuffer;
pub use filters::PixelFilter;
