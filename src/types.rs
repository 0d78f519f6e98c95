//! Public types shared by the client, the dispatcher and the worker.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ServiceError;
use crate::utils::config::{
    MAX_PARAMS, MAX_PATH_LEN, PackagePaths, QueueConsts, ResponseConsts, WorkerThreadLimits,
};

/// Filter selected by a request. Discriminants are the ids carried in a request slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FilterId {
    Grayscale = 1,
    Negative = 2,
    Brightness = 3,
}

impl FilterId {
    pub const ALL: [FilterId; 3] = [FilterId::Grayscale, FilterId::Negative, FilterId::Brightness];

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(FilterId::Grayscale),
            2 => Some(FilterId::Negative),
            3 => Some(FilterId::Brightness),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FilterId::Grayscale => "grayscale",
            FilterId::Negative => "negative",
            FilterId::Brightness => "brightness",
        }
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.id())
    }
}

/// Accepts the numeric id or the filter name (case-insensitive).
impl FromStr for FilterId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(id) = s.parse::<u32>() {
            return FilterId::from_id(id).ok_or_else(|| format!("unknown filter id {id} (1-3)"));
        }
        FilterId::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown filter '{s}' (grayscale, negative, brightness)"))
    }
}

/// One filter job. Copied by value into a queue slot; never shared by reference across processes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterRequest {
    /// Pid of the submitting client; names its result FIFO.
    pub origin: i32,
    /// Source image path, at most `MAX_PATH_LEN - 1` bytes.
    pub path: PathBuf,
    pub filter: FilterId,
    /// Up to `MAX_PARAMS` numeric parameters, in submission order.
    pub params: Vec<i32>,
}

impl FilterRequest {
    /// Build a request, rejecting what would not fit in a queue slot.
    pub fn new(
        origin: i32,
        path: impl Into<PathBuf>,
        filter: FilterId,
        params: &[i32],
    ) -> Result<Self, ServiceError> {
        let path = path.into();
        let len = path.as_os_str().len();
        if len == 0 {
            return Err(ServiceError::InvalidRequest("empty image path".into()));
        }
        if len >= MAX_PATH_LEN {
            return Err(ServiceError::InvalidRequest(format!(
                "image path is {len} bytes; at most {} fit in a request",
                MAX_PATH_LEN - 1
            )));
        }
        if params.len() > MAX_PARAMS {
            return Err(ServiceError::InvalidRequest(format!(
                "{} parameters given; at most {MAX_PARAMS} are carried",
                params.len()
            )));
        }
        Ok(Self {
            origin,
            path,
            filter,
            params: params.to_vec(),
        })
    }
}

/// Full runtime options for both binaries: defaults, then `.imgfilter.toml`, then CLI flags.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Prefix for semaphore and FIFO names.
    pub namespace: String,
    /// Directory resolved by `ftok` into the request segment key.
    pub ipc_dir: PathBuf,
    /// How long the client waits for its result channel to become readable.
    pub timeout: Duration,
    /// Worker pool size (row bands per image).
    pub threads: usize,
    /// Where the client writes the processed image.
    pub output: PathBuf,
    /// Dispatcher: stay attached to the terminal.
    pub foreground: bool,
    pub verbose: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let paths = PackagePaths::get();
        Self {
            namespace: paths.pkg_name().to_string(),
            ipc_dir: PathBuf::from(QueueConsts::DEFAULT_IPC_DIR),
            timeout: Duration::from_secs(ResponseConsts::TIMEOUT_SECS),
            threads: WorkerThreadLimits::default().pool_size,
            output: PathBuf::from(paths.output_filename()),
            foreground: false,
            verbose: false,
        }
    }
}

impl ServiceConfig {
    /// Counting semaphore posted once per enqueued request.
    pub fn request_sem_name(&self) -> String {
        format!("/{}_request", self.namespace)
    }

    /// Binary semaphore guarding the producer side of the ring.
    pub fn mutex_sem_name(&self) -> String {
        format!("/{}_mutex", self.namespace)
    }

    /// Result FIFO of the client with pid `origin`.
    pub fn fifo_path(&self, origin: i32) -> PathBuf {
        Path::new(QueueConsts::FIFO_DIR).join(format!("{}_rep_{origin}", self.namespace))
    }
}
