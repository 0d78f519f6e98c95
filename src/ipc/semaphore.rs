//! POSIX named semaphores.

use std::ffi::CString;
use std::io;

use log::{info, warn};

use crate::utils::config::QueueConsts;

/// Handle on a named semaphore. Closed on drop; unlinked on drop too when this handle created it.
pub struct NamedSemaphore {
    sem: *mut libc::sem_t,
    name: CString,
    owner: bool,
}

// sem_t operations are safe to call from any thread.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

fn c_name(name: &str) -> io::Result<CString> {
    CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

impl NamedSemaphore {
    /// Create `name` with `initial` count, or open it if it already exists. The handle owns the
    /// name and unlinks it on drop.
    pub fn create(name: &str, initial: u32) -> io::Result<Self> {
        let c = c_name(name)?;
        let sem = unsafe {
            libc::sem_open(
                c.as_ptr(),
                libc::O_CREAT,
                QueueConsts::IPC_MODE as libc::c_uint,
                initial as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            sem,
            name: c,
            owner: true,
        })
    }

    /// Unlink `name` if it exists. Handles already open keep working.
    pub fn remove(name: &str) -> io::Result<()> {
        let c = c_name(name)?;
        if unsafe { libc::sem_unlink(c.as_ptr()) } != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(err);
            }
        } else {
            info!("Stale semaphore {name} unlinked");
        }
        Ok(())
    }

    /// Open an existing semaphore; never creates one.
    pub fn open(name: &str) -> io::Result<Self> {
        let c = c_name(name)?;
        let sem = unsafe { libc::sem_open(c.as_ptr(), 0) };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            sem,
            name: c,
            owner: false,
        })
    }

    pub fn name(&self) -> &str {
        self.name.to_str().unwrap_or("<non-utf8>")
    }

    /// One blocking wait. A signal surfaces as `ErrorKind::Interrupted`; retrying is the caller's call.
    pub fn wait(&self) -> io::Result<()> {
        if unsafe { libc::sem_wait(self.sem) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Wait, retrying on signal interruption.
    pub fn wait_uninterrupted(&self) -> io::Result<()> {
        loop {
            match self.wait() {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    pub fn post(&self) -> io::Result<()> {
        if unsafe { libc::sem_post(self.sem) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        if unsafe { libc::sem_close(self.sem) } != 0 {
            warn!("sem_close {}: {}", self.name(), io::Error::last_os_error());
        }
        if self.owner {
            if unsafe { libc::sem_unlink(self.name.as_ptr()) } != 0 {
                warn!("sem_unlink {}: {}", self.name(), io::Error::last_os_error());
            } else {
                info!("Semaphore {} unlinked", self.name());
            }
        }
    }
}
