//! Client side of a job: private result channel, enqueue, bounded wait, reconstruct output.

use log::info;
use std::path::PathBuf;

use crate::error::ServiceError;
use crate::image::ResultImage;
use crate::ipc::{RequestQueue, ResultChannel};
use crate::types::{FilterId, ServiceConfig};
use crate::utils::output::write_output_atomically;

/// Summary of a finished job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobOutcome {
    pub output: PathBuf,
    pub width: i32,
    pub height: i32,
    pub bytes_received: usize,
}

/// Submit one job as process `origin` and wait for its result.
///
/// The FIFO is created and opened before anything is published, and both the FIFO and the queue
/// attachment are released by their guards on every return path.
pub fn submit_and_wait(
    config: &ServiceConfig,
    origin: i32,
    image: impl Into<PathBuf>,
    filter: FilterId,
    params: &[i32],
) -> Result<JobOutcome, ServiceError> {
    let request = crate::types::FilterRequest::new(origin, image, filter, params)?;
    let mut channel = ResultChannel::create(&config.fifo_path(origin))?;

    {
        let queue = RequestQueue::attach(config)?;
        queue.enqueue(&request)?;
        info!(
            "Request sent: {} on {} (queue capacity {})",
            request.filter,
            request.path.display(),
            queue.capacity()
        );
    }

    info!("Waiting for result (timeout {:?})...", config.timeout);
    channel.wait_readable(config.timeout)?;
    let stream = channel.read_to_end()?;
    let result = ResultImage::from_stream(&stream)?;
    info!(
        "Received {} bytes ({}x{})",
        stream.len(),
        result.info_header.width,
        result.info_header.height
    );

    write_output_atomically(&config.output, &stream)
        .map_err(|e| ServiceError::io("write output image", e))?;
    info!("Result saved to {}", config.output.display());

    Ok(JobOutcome {
        output: config.output.clone(),
        width: result.info_header.width,
        height: result.info_header.height,
        bytes_received: stream.len(),
    })
}
