//! Error taxonomy for the service.
//!
//! Library code returns these typed errors; the binaries wrap them in `anyhow` with context.
//! Each variant maps to one failure class a caller can act on:
//! - the dispatcher is not reachable (fail fast, never block)
//! - the request was rejected before it entered the queue
//! - no response arrived in time (crash, slowness and bad input look the same)
//! - the response stream was cut short

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failures of the request/result protocol.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("service unavailable: {what}: {source}")]
    ServiceUnavailable {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("request queue full ({capacity} requests pending)")]
    QueueFull { capacity: usize },

    #[error("request queue empty: a wakeup arrived with no published request")]
    QueueEmpty,

    #[error("timeout: no response within {0:?} (worker slow, crashed, or input rejected)")]
    Timeout(Duration),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("truncated result: expected {expected} bytes, received {received}")]
    TruncatedResult { expected: usize, received: usize },

    #[error("image error: {0}")]
    Codec(#[from] CodecError),

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl ServiceError {
    pub fn io(context: &'static str, source: io::Error) -> Self {
        ServiceError::Io { context, source }
    }

    pub fn unavailable(what: &'static str, source: io::Error) -> Self {
        ServiceError::ServiceUnavailable { what, source }
    }
}

/// Failures decoding or loading a BMP image.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("read image: {0}")]
    Io(#[from] io::Error),

    #[error("not a BMP file (signature {0:#06x}, expected 0x4d42)")]
    BadSignature(u16),

    #[error("unsupported BMP: {0}")]
    Unsupported(String),

    #[error("pixel data of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("truncated BMP: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
}
