//! imgfilter: persistent BMP filtering service over System V shared memory, POSIX named
//! semaphores and per-client FIFOs.
//!
//! Clients publish [`FilterRequest`]s into a shared ring ([`ipc::RequestQueue`]); the dispatcher
//! ([`engine::Dispatcher`]) forks one worker per request; the worker filters the image across a
//! fixed band pool ([`engine::run_bands`]) and streams it back through the client's
//! [`ipc::ResultChannel`].

pub mod engine;
pub mod error;
pub mod image;
pub mod ipc;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use error::{CodecError, ServiceError};
pub use types::*;

/// Result alias used by the public imgfilter API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Submit one job as the current process and wait for the result, using the config found in the
/// current directory (defaults otherwise).
///
/// ```ignore
/// let outcome = imgfilter::filter_image("photo.bmp", imgfilter::FilterId::Grayscale, &[])?;
/// println!("wrote {}", outcome.output.display());
/// ```
pub fn filter_image(
    image: impl Into<std::path::PathBuf>,
    filter: FilterId,
    params: &[i32],
) -> Result<engine::JobOutcome> {
    let config = engine::base_config(std::path::Path::new("."));
    let origin = std::process::id() as i32;
    Ok(engine::submit_and_wait(&config, origin, image, filter, params)?)
}
