//! BMP header codec with explicit byte offsets (all fields little-endian, no implicit padding).
//!
//! File header (14 bytes):
//!
//! | offset | size | field        |
//! |--------|------|--------------|
//! | 0      | 2    | signature    |
//! | 2      | 4    | file_size    |
//! | 6      | 2    | reserved1    |
//! | 8      | 2    | reserved2    |
//! | 10     | 4    | pixel_offset |
//!
//! Info header (40 bytes):
//!
//! | offset | size | field            |
//! |--------|------|------------------|
//! | 0      | 4    | header_size      |
//! | 4      | 4    | width (signed)   |
//! | 8      | 4    | height (signed, negative = top-down) |
//! | 12     | 2    | planes           |
//! | 14     | 2    | bit_count        |
//! | 16     | 4    | compression      |
//! | 20     | 4    | image_size       |
//! | 24     | 4    | x_ppm (signed)   |
//! | 28     | 4    | y_ppm (signed)   |
//! | 32     | 4    | colors_used      |
//! | 36     | 4    | colors_important |

use crate::error::CodecError;
use crate::utils::config::ImageConsts;

fn u16_at(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn u32_at(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

fn i32_at(b: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

fn put(b: &mut [u8], at: usize, bytes: &[u8]) {
    b[at..at + bytes.len()].copy_from_slice(bytes);
}

fn need(buf: &[u8], needed: usize) -> Result<(), CodecError> {
    if buf.len() < needed {
        return Err(CodecError::Truncated {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

/// Bytes per pixel row, padded to a 4-byte boundary.
pub fn row_stride(width: usize) -> usize {
    (width * ImageConsts::BYTES_PER_PIXEL + 3) & !3
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileHeader {
    pub signature: u16,
    pub file_size: u32,
    pub reserved1: u16,
    pub reserved2: u16,
    pub pixel_offset: u32,
}

impl FileHeader {
    pub const LEN: usize = ImageConsts::FILE_HEADER_LEN;

    pub fn parse(buf: &[u8]) -> Result<Self, CodecError> {
        need(buf, Self::LEN)?;
        Ok(Self {
            signature: u16_at(buf, 0),
            file_size: u32_at(buf, 2),
            reserved1: u16_at(buf, 6),
            reserved2: u16_at(buf, 8),
            pixel_offset: u32_at(buf, 10),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut b = [0u8; Self::LEN];
        put(&mut b, 0, &self.signature.to_le_bytes());
        put(&mut b, 2, &self.file_size.to_le_bytes());
        put(&mut b, 6, &self.reserved1.to_le_bytes());
        put(&mut b, 8, &self.reserved2.to_le_bytes());
        put(&mut b, 10, &self.pixel_offset.to_le_bytes());
        b
    }

    pub fn check_signature(&self) -> Result<(), CodecError> {
        if self.signature != ImageConsts::SIGNATURE {
            return Err(CodecError::BadSignature(self.signature));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InfoHeader {
    pub header_size: u32,
    pub width: i32,
    pub height: i32,
    pub planes: u16,
    pub bit_count: u16,
    pub compression: u32,
    pub image_size: u32,
    pub x_ppm: i32,
    pub y_ppm: i32,
    pub colors_used: u32,
    pub colors_important: u32,
}

impl InfoHeader {
    pub const LEN: usize = ImageConsts::INFO_HEADER_LEN;

    pub fn parse(buf: &[u8]) -> Result<Self, CodecError> {
        need(buf, Self::LEN)?;
        Ok(Self {
            header_size: u32_at(buf, 0),
            width: i32_at(buf, 4),
            height: i32_at(buf, 8),
            planes: u16_at(buf, 12),
            bit_count: u16_at(buf, 14),
            compression: u32_at(buf, 16),
            image_size: u32_at(buf, 20),
            x_ppm: i32_at(buf, 24),
            y_ppm: i32_at(buf, 28),
            colors_used: u32_at(buf, 32),
            colors_important: u32_at(buf, 36),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut b = [0u8; Self::LEN];
        put(&mut b, 0, &self.header_size.to_le_bytes());
        put(&mut b, 4, &self.width.to_le_bytes());
        put(&mut b, 8, &self.height.to_le_bytes());
        put(&mut b, 12, &self.planes.to_le_bytes());
        put(&mut b, 14, &self.bit_count.to_le_bytes());
        put(&mut b, 16, &self.compression.to_le_bytes());
        put(&mut b, 20, &self.image_size.to_le_bytes());
        put(&mut b, 24, &self.x_ppm.to_le_bytes());
        put(&mut b, 28, &self.y_ppm.to_le_bytes());
        put(&mut b, 32, &self.colors_used.to_le_bytes());
        put(&mut b, 36, &self.colors_important.to_le_bytes());
        b
    }

    /// Pixels per row.
    pub fn width_px(&self) -> usize {
        self.width.unsigned_abs() as usize
    }

    /// Row count, regardless of row order.
    pub fn rows(&self) -> usize {
        self.height.unsigned_abs() as usize
    }

    pub fn is_top_down(&self) -> bool {
        self.height < 0
    }

    pub fn row_stride(&self) -> usize {
        row_stride(self.width_px())
    }

    /// Bytes covered by pixel rows: stride × |height|.
    pub fn rows_len(&self) -> usize {
        self.row_stride() * self.rows()
    }

    /// Declared pixel payload; `image_size == 0` means stride × |height|.
    pub fn pixel_data_size(&self) -> usize {
        if self.image_size == 0 {
            self.rows_len()
        } else {
            self.image_size as usize
        }
    }

    /// Only uncompressed 24-bit images with a payload large enough for every row are accepted.
    pub fn check_supported(&self) -> Result<(), CodecError> {
        if self.bit_count != ImageConsts::BITS_PER_PIXEL {
            return Err(CodecError::Unsupported(format!(
                "{} bits per pixel (only 24 supported)",
                self.bit_count
            )));
        }
        if self.compression != ImageConsts::COMPRESSION_NONE {
            return Err(CodecError::Unsupported(format!(
                "compression mode {} (only uncompressed supported)",
                self.compression
            )));
        }
        if self.width <= 0 || self.height == 0 {
            return Err(CodecError::Unsupported(format!(
                "dimensions {}x{}",
                self.width, self.height
            )));
        }
        let size = self.pixel_data_size();
        if size > ImageConsts::MAX_IMAGE_SIZE || self.rows_len() > ImageConsts::MAX_IMAGE_SIZE {
            return Err(CodecError::TooLarge {
                size: size.max(self.rows_len()),
                limit: ImageConsts::MAX_IMAGE_SIZE,
            });
        }
        if size < self.rows_len() {
            return Err(CodecError::Unsupported(format!(
                "declared image size {size} smaller than {} bytes of rows",
                self.rows_len()
            )));
        }
        Ok(())
    }
}

/// Headers for a payload forwarded as a standalone file: pixels right after the 54 header bytes.
pub fn normalized_file_header(original: &FileHeader, pixel_len: usize) -> FileHeader {
    FileHeader {
        file_size: (ImageConsts::HEADERS_LEN + pixel_len) as u32,
        pixel_offset: ImageConsts::HEADERS_LEN as u32,
        ..*original
    }
}

/// A received result stream split into its three parts.
#[derive(Debug)]
pub struct ResultImage<'a> {
    pub file_header: FileHeader,
    pub info_header: InfoHeader,
    pub pixels: &'a [u8],
}

impl<'a> ResultImage<'a> {
    /// Split `stream` as file header, info header, then exactly `pixel_data_size` bytes.
    pub fn from_stream(stream: &'a [u8]) -> Result<Self, crate::error::ServiceError> {
        use crate::error::ServiceError;

        let headers = ImageConsts::HEADERS_LEN;
        if stream.len() < headers {
            return Err(ServiceError::TruncatedResult {
                expected: headers,
                received: stream.len(),
            });
        }
        let file_header = FileHeader::parse(&stream[..FileHeader::LEN])?;
        file_header.check_signature()?;
        let info_header = InfoHeader::parse(&stream[FileHeader::LEN..headers])?;
        let expected = headers + info_header.pixel_data_size();
        if stream.len() != expected {
            return Err(ServiceError::TruncatedResult {
                expected,
                received: stream.len(),
            });
        }
        Ok(Self {
            file_header,
            info_header,
            pixels: &stream[headers..],
        })
    }
}

/// Encode a complete 24-bit BMP (bottom-up) from unpadded BGR rows.
pub fn encode_bgr24(width: usize, height: usize, bgr: &[u8]) -> Vec<u8> {
    let stride = row_stride(width);
    let pixel_len = stride * height;
    let info = InfoHeader {
        header_size: InfoHeader::LEN as u32,
        width: width as i32,
        height: height as i32,
        planes: 1,
        bit_count: ImageConsts::BITS_PER_PIXEL,
        compression: ImageConsts::COMPRESSION_NONE,
        image_size: pixel_len as u32,
        x_ppm: 2835,
        y_ppm: 2835,
        colors_used: 0,
        colors_important: 0,
    };
    let file = FileHeader {
        signature: ImageConsts::SIGNATURE,
        file_size: 0,
        reserved1: 0,
        reserved2: 0,
        pixel_offset: 0,
    };
    let file = normalized_file_header(&file, pixel_len);

    let mut out = Vec::with_capacity(ImageConsts::HEADERS_LEN + pixel_len);
    out.extend_from_slice(&file.to_bytes());
    out.extend_from_slice(&info.to_bytes());
    let row_bytes = width * ImageConsts::BYTES_PER_PIXEL;
    for row in bgr.chunks(row_bytes).take(height) {
        out.extend_from_slice(row);
        out.resize(out.len() + (stride - row.len()), 0);
    }
    out
}
