//! Application configuration constants.
//! Well-known IPC names, limits and timeouts in one place.

use std::sync::OnceLock;

// ---- Package / names (from CARGO_PKG_NAME, cached) ----

/// Package-derived names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    config_filename: String,
    output_filename: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache names from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                config_filename: format!(".{pkg}.toml"),
                output_filename: "result.bmp".to_string(),
            }
        })
    }

    /// Default IPC namespace (semaphore and FIFO name prefix).
    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    pub fn output_filename(&self) -> &str {
        &self.output_filename
    }
}

// ---- Request queue ----

/// Request segment sizing and identity.
pub struct QueueConsts;

impl QueueConsts {
    /// `ftok` project id for the request segment.
    pub const SHM_REQUEST_KEY: i32 = 1234;
    /// Byte budget for request slots; capacity is this divided by the slot size.
    pub const SHM_REQUEST_SIZE: usize = 4096;
    /// Permissions for the segment, the semaphores and the FIFOs.
    pub const IPC_MODE: u32 = 0o666;
    /// Directory handed to `ftok` when nothing else is configured.
    pub const DEFAULT_IPC_DIR: &'static str = ".";
    /// FIFOs live under this directory as `<namespace>_rep_<pid>`.
    pub const FIFO_DIR: &'static str = "/tmp";
}

// ---- Requests ----

/// Path field width in a request slot, NUL included.
pub const MAX_PATH_LEN: usize = 256;

/// Numeric parameters carried per request.
pub const MAX_PARAMS: usize = 5;

// ---- Images ----

/// BMP limits and fixed header sizes.
pub struct ImageConsts;

impl ImageConsts {
    /// Pixel payload cap (bytes). 100 MB.
    pub const MAX_IMAGE_SIZE: usize = 100 * 1024 * 1024;
    pub const FILE_HEADER_LEN: usize = 14;
    pub const INFO_HEADER_LEN: usize = 40;
    pub const HEADERS_LEN: usize = Self::FILE_HEADER_LEN + Self::INFO_HEADER_LEN;
    /// "BM", little-endian.
    pub const SIGNATURE: u16 = 0x4D42;
    pub const BITS_PER_PIXEL: u16 = 24;
    pub const BYTES_PER_PIXEL: usize = 3;
    /// `BI_RGB`: uncompressed.
    pub const COMPRESSION_NONE: u32 = 0;
}

/// Brightness offset used when the client passes no parameter.
pub const BRIGHTNESS_OFFSET: i32 = 50;

// ---- Worker threads ----

/// Thread pool sizing for one worker process.
#[derive(Clone, Copy, Debug)]
pub struct WorkerThreadLimits {
    /// Bands (and threads) per image.
    pub pool_size: usize,
    /// Upper bound accepted from config or CLI.
    pub max: usize,
}

impl Default for WorkerThreadLimits {
    fn default() -> Self {
        Self {
            pool_size: Self::DEFAULT_THREADS,
            max: Self::MAX_THREADS,
        }
    }
}

impl WorkerThreadLimits {
    pub const DEFAULT_THREADS: usize = 8;
    pub const MAX_THREADS: usize = 64;

    /// Clamp a requested pool size into `1..=MAX_THREADS`.
    pub fn clamp(requested: usize) -> usize {
        requested.clamp(1, Self::MAX_THREADS)
    }
}

// ---- Client ----

/// Result channel wait and read tuning.
pub struct ResponseConsts;

impl ResponseConsts {
    /// Seconds the client waits for the FIFO to become readable.
    pub const TIMEOUT_SECS: u64 = 5;
    /// Read buffer when draining the FIFO (bytes).
    pub const READ_CHUNK_SIZE: usize = 4096;
}
