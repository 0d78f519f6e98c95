//! Image buffer for one job, held in a private shared segment.
//!
//! Segment layout: the 54 encoded header bytes (file header with its pixel offset normalised to
//! 54, then the info header) followed by the pixel payload. The segment is marked for removal as
//! soon as it is mapped, so nothing else can attach and it vanishes with the worker.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use log::debug;

use crate::error::CodecError;
use crate::image::bmp::{FileHeader, InfoHeader, normalized_file_header};
use crate::ipc::shm::SharedSegment;
use crate::utils::config::ImageConsts;

pub struct ImageBuffer {
    file_header: FileHeader,
    info_header: InfoHeader,
    pixel_len: usize,
    segment: SharedSegment,
}

impl ImageBuffer {
    /// Read and validate `path`, then copy headers and pixels into a fresh private segment.
    pub fn load(path: &Path) -> Result<Self, CodecError> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut head = [0u8; ImageConsts::HEADERS_LEN];
        reader.read_exact(&mut head)?;
        let file_header = FileHeader::parse(&head[..FileHeader::LEN])?;
        file_header.check_signature()?;
        let info_header = InfoHeader::parse(&head[FileHeader::LEN..])?;
        info_header.check_supported()?;

        let pixel_len = info_header.pixel_data_size();
        let mut segment = SharedSegment::create_private(ImageConsts::HEADERS_LEN + pixel_len)?;
        let buf = segment.as_mut_slice();
        buf[..FileHeader::LEN].copy_from_slice(&normalized_file_header(&file_header, pixel_len).to_bytes());
        buf[FileHeader::LEN..ImageConsts::HEADERS_LEN].copy_from_slice(&info_header.to_bytes());

        reader.seek(SeekFrom::Start(u64::from(file_header.pixel_offset)))?;
        reader
            .read_exact(&mut buf[ImageConsts::HEADERS_LEN..])
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => CodecError::Truncated {
                    needed: file_header.pixel_offset as usize + pixel_len,
                    available: std::fs::metadata(path).map(|m| m.len() as usize).unwrap_or(0),
                },
                _ => CodecError::Io(e),
            })?;

        debug!(
            "Loaded {} ({}x{}, {} pixel bytes) into private segment {}",
            path.display(),
            info_header.width,
            info_header.height,
            pixel_len,
            segment.id()
        );
        Ok(Self {
            file_header,
            info_header,
            pixel_len,
            segment,
        })
    }

    /// Header as found in the source file.
    pub fn source_file_header(&self) -> &FileHeader {
        &self.file_header
    }

    pub fn width(&self) -> usize {
        self.info_header.width_px()
    }

    pub fn rows(&self) -> usize {
        self.info_header.rows()
    }

    pub fn row_stride(&self) -> usize {
        self.info_header.row_stride()
    }

    pub fn pixel_data_size(&self) -> usize {
        self.pixel_len
    }

    /// Encoded file header as forwarded to the client.
    pub fn file_header_bytes(&self) -> &[u8] {
        &self.segment.as_slice()[..FileHeader::LEN]
    }

    pub fn info_header_bytes(&self) -> &[u8] {
        &self.segment.as_slice()[FileHeader::LEN..ImageConsts::HEADERS_LEN]
    }

    pub fn pixels(&self) -> &[u8] {
        &self.segment.as_slice()[ImageConsts::HEADERS_LEN..]
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.segment.as_mut_slice()[ImageConsts::HEADERS_LEN..]
    }
}
