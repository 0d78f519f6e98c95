//! Long-lived dispatcher: owns the request channel, forks one worker per dequeued request and
//! reaps them asynchronously.
//!
//! All IPC state lives in one [`Dispatcher`] value created at startup. Dropping it (normal
//! return, fatal error, or unwinding) detaches and removes the request segment and unlinks both
//! semaphores, logging each step.

use anyhow::{Context, Result, bail};
use log::{debug, error, info, warn};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::engine::worker::{WorkerSettings, worker_process_main};
use crate::error::ServiceError;
use crate::ipc::RequestQueue;
use crate::types::{FilterRequest, ServiceConfig};
use crate::utils::logger::mark_worker_process;
use crate::utils::proc_limit::max_user_processes;

/// Children collected by the SIGCHLD handler since startup.
static REAPED: AtomicUsize = AtomicUsize::new(0);

pub fn reaped_count() -> usize {
    REAPED.load(Ordering::Relaxed)
}

#[cfg(target_os = "linux")]
unsafe fn errno_location() -> *mut libc::c_int {
    unsafe { libc::__errno_location() }
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
unsafe fn errno_location() -> *mut libc::c_int {
    unsafe { libc::__error() }
}

#[cfg(any(target_os = "android", target_os = "netbsd", target_os = "openbsd"))]
unsafe fn errno_location() -> *mut libc::c_int {
    unsafe { libc::__errno() }
}

// No known errno accessor: the handler reaps without preserving errno.
#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "android",
    target_os = "netbsd",
    target_os = "openbsd"
)))]
unsafe fn errno_location() -> *mut libc::c_int {
    std::ptr::null_mut()
}

/// SIGCHLD handler: collect every exited child without blocking. Only async-signal-safe calls;
/// errno is preserved for whatever call the main thread was in.
extern "C" fn reap_children(_signum: libc::c_int) {
    unsafe {
        let errno = errno_location();
        let saved = if errno.is_null() { 0 } else { *errno };
        while libc::waitpid(-1, std::ptr::null_mut(), libc::WNOHANG) > 0 {
            REAPED.fetch_add(1, Ordering::Relaxed);
        }
        if !errno.is_null() {
            *errno = saved;
        }
    }
}

/// Install the asynchronous reaper. `SA_NOCLDSTOP`: stopped children are not reported.
pub fn install_reaper() -> io::Result<()> {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = reap_children as extern "C" fn(libc::c_int) as libc::sighandler_t;
        libc::sigemptyset(&mut sa.sa_mask);
        sa.sa_flags = libc::SA_RESTART | libc::SA_NOCLDSTOP;
        if libc::sigaction(libc::SIGCHLD, &sa, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn reset_child_signals() {
    unsafe {
        libc::signal(libc::SIGCHLD, libc::SIG_DFL);
        libc::signal(libc::SIGINT, libc::SIG_DFL);
        libc::signal(libc::SIGTERM, libc::SIG_DFL);
        // Writes to a FIFO whose reader left must fail with EPIPE, not kill the worker.
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

/// Detach from the controlling terminal: fork (parent leaves at once), new session, umask 0,
/// stdin on /dev/null. Call after the IPC state exists so startup errors still reach the caller.
pub fn daemonize() -> Result<()> {
    match unsafe { libc::fork() } {
        -1 => return Err(io::Error::last_os_error()).context("fork for daemon"),
        0 => {}
        pid => {
            info!("Dispatcher detached as pid {pid}");
            // The child owns the IPC state now; skip every destructor here.
            unsafe { libc::_exit(0) }
        }
    }
    if unsafe { libc::setsid() } < 0 {
        return Err(io::Error::last_os_error()).context("setsid");
    }
    unsafe { libc::umask(0) };
    let devnull = std::fs::File::open("/dev/null").context("open /dev/null")?;
    {
        use std::os::fd::AsRawFd;
        if unsafe { libc::dup2(devnull.as_raw_fd(), libc::STDIN_FILENO) } < 0 {
            return Err(io::Error::last_os_error()).context("redirect stdin");
        }
    }
    Ok(())
}

pub struct Dispatcher {
    queue: RequestQueue,
    config: ServiceConfig,
    stop: Arc<AtomicBool>,
    spawned: usize,
}

impl Dispatcher {
    /// Create (or adopt) the request segment and both semaphores.
    pub fn start(config: &ServiceConfig) -> Result<Self> {
        let queue = RequestQueue::create(config).context("set up request channel")?;
        info!(
            "Request channel ready: segment {}, capacity {}, semaphores {} / {}",
            queue.segment_id(),
            queue.capacity(),
            config.request_sem_name(),
            config.mutex_sem_name()
        );
        match max_user_processes() {
            Some(limit) => info!("Worker fan-out bounded by the process limit ({limit})"),
            None => debug!("No process limit reported; worker fan-out unbounded"),
        }
        Ok(Self {
            queue,
            config: config.clone(),
            stop: Arc::new(AtomicBool::new(false)),
            spawned: 0,
        })
    }

    /// Stop on SIGINT/SIGTERM: set the flag, then post the request semaphore so a blocked wait
    /// returns and sees it.
    pub fn install_shutdown_handler(&self) -> Result<()> {
        let stop = Arc::clone(&self.stop);
        let waker = RequestQueue::consumer_waker(&self.config).context("open shutdown waker")?;
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
            if let Err(e) = waker.post() {
                warn!("wake dispatcher for shutdown: {e}");
            }
        })
        .context("install shutdown handler")?;
        Ok(())
    }

    /// Main loop: wait, take, fork, repeat. Signal interruptions are retried; any other wait
    /// failure ends the loop with an error.
    pub fn run(&mut self) -> Result<()> {
        info!("Waiting for requests...");
        loop {
            if let Err(e) = self.queue.wait_available() {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e).context("wait for request");
            }
            if self.stop.load(Ordering::SeqCst) {
                info!("Shutdown requested");
                return Ok(());
            }
            match self.queue.take() {
                Ok(request) => self.spawn_worker(request)?,
                Err(ServiceError::InvalidRequest(msg)) => {
                    warn!("Dropping malformed request: {msg}");
                }
                Err(ServiceError::QueueEmpty) => {
                    warn!("Spurious request wakeup; nothing pending");
                }
                Err(e) => return Err(e).context("read request slot"),
            }
        }
    }

    /// Fork one worker bound to `request` and return without waiting for it.
    fn spawn_worker(&mut self, request: FilterRequest) -> Result<()> {
        let settings = WorkerSettings::for_request(&self.config, &request);
        match unsafe { libc::fork() } {
            -1 => {
                let err = io::Error::last_os_error();
                // Out of process budget: this job is lost, the service carries on.
                error!(
                    "fork worker for client {} ({}): {}",
                    request.origin,
                    request.path.display(),
                    err
                );
                if err.raw_os_error() == Some(libc::EAGAIN) {
                    return Ok(());
                }
                bail!("fork worker: {err}");
            }
            0 => {
                mark_worker_process();
                reset_child_signals();
                worker_process_main(request, settings)
            }
            pid => {
                self.spawned += 1;
                info!(
                    "Worker {pid} spawned: {} on {} for client {}",
                    request.filter,
                    request.path.display(),
                    request.origin
                );
                Ok(())
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        info!(
            "Tearing down: {} workers spawned, {} reaped",
            self.spawned,
            reaped_count()
        );
    }
}
