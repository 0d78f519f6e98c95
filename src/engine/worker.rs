//! One-shot worker: load the image, filter it across the band pool, stream it to the client.

use anyhow::{Context, Result};
use log::{debug, error, info};
use std::path::PathBuf;
use std::time::Instant;

use crate::engine::parallel::run_bands;
use crate::image::{ImageBuffer, PixelFilter};
use crate::ipc::ResultWriter;
use crate::types::{FilterRequest, ServiceConfig};

/// What a worker needs besides its request.
#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub threads: usize,
    /// Result FIFO of the requesting client.
    pub fifo_path: PathBuf,
}

impl WorkerSettings {
    pub fn for_request(config: &ServiceConfig, request: &FilterRequest) -> Self {
        Self {
            threads: config.threads,
            fifo_path: config.fifo_path(request.origin),
        }
    }
}

/// Outcome of a worker that got as far as writing its result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerReport {
    pub bands: usize,
    pub bytes_sent: usize,
}

/// Run one job to completion. An image that cannot be loaded produces no response at all; the
/// client observes a timeout.
pub fn run_worker(request: &FilterRequest, settings: &WorkerSettings) -> Result<WorkerReport> {
    let start = Instant::now();
    let mut image = ImageBuffer::load(&request.path)
        .with_context(|| format!("load {}", request.path.display()))?;

    let filter = PixelFilter::from_id(request.filter);
    let (width, rows, stride) = (image.width(), image.rows(), image.row_stride());
    let workspaces = run_bands(image.pixels_mut(), width, rows, stride, filter, settings.threads)?;

    // Client gone (FIFO unlinked, or no reader) fails here instead of blocking.
    let writer = ResultWriter::open(&settings.fifo_path)
        .with_context(|| format!("open result fifo {}", settings.fifo_path.display()))?;
    let bytes_sent = writer
        .send(image.file_header_bytes(), image.info_header_bytes(), image.pixels())
        .with_context(|| format!("write result to {}", settings.fifo_path.display()))?;

    info!(
        "{} on {} ({}x{}) for client {}: {} bytes in {:?}",
        request.filter,
        request.path.display(),
        width,
        rows,
        request.origin,
        bytes_sent,
        start.elapsed()
    );
    Ok(WorkerReport {
        bands: workspaces.len(),
        bytes_sent,
    })
}

/// Body of a forked worker process. Never returns: panics are contained and the process leaves
/// through `_exit`, so nothing of the dispatcher's stack is unwound or dropped in the child.
pub fn worker_process_main(request: FilterRequest, settings: WorkerSettings) -> ! {
    let outcome = std::panic::catch_unwind(|| run_worker(&request, &settings));
    let code = match outcome {
        Ok(Ok(report)) => {
            debug!("worker finished: {:?}", report);
            0
        }
        Ok(Err(e)) => {
            error!("Job from client {} failed: {:#}", request.origin, e);
            1
        }
        Err(_) => {
            error!("Job from client {} panicked", request.origin);
            2
        }
    };
    unsafe { libc::_exit(code) }
}
