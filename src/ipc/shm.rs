//! System V shared memory segments with scoped attach/detach.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr::NonNull;

use log::{info, warn};

use crate::utils::config::QueueConsts;

/// Resolve the well-known key for `dir` (must exist) and project id.
pub fn segment_key(dir: &Path, proj_id: i32) -> io::Result<libc::key_t> {
    let c_dir = CString::new(dir.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let key = unsafe { libc::ftok(c_dir.as_ptr(), proj_id) };
    if key == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(key)
}

/// An attached segment. Detached on drop; removed on drop as well when this handle owns it.
pub struct SharedSegment {
    id: libc::c_int,
    base: NonNull<u8>,
    len: usize,
    owner: bool,
}

impl SharedSegment {
    /// Create the segment for `key`, or attach to it if it already exists.
    /// Returns the segment (owning) and whether it was freshly created.
    pub fn create_or_attach(key: libc::key_t, len: usize) -> io::Result<(Self, bool)> {
        let mode = QueueConsts::IPC_MODE as libc::c_int;
        let mut created = true;
        let mut id = unsafe { libc::shmget(key, len, libc::IPC_CREAT | libc::IPC_EXCL | mode) };
        if id < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EEXIST) {
                return Err(err);
            }
            created = false;
            id = unsafe { libc::shmget(key, len, mode) };
            if id < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        let mut seg = Self::attach_id(id, len)?;
        seg.owner = true;
        Ok((seg, created))
    }

    /// Attach to an existing segment without ever creating one. Fails at once when absent or
    /// smaller than `min_len`.
    pub fn attach_existing(key: libc::key_t, min_len: usize) -> io::Result<Self> {
        let id = unsafe { libc::shmget(key, 0, 0) };
        if id < 0 {
            return Err(io::Error::last_os_error());
        }
        let len = segment_size(id)?;
        if len < min_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("segment is {len} bytes, expected at least {min_len}"),
            ));
        }
        Self::attach_id(id, len)
    }

    /// Fresh segment only this process can reach: marked for removal right after attaching, so
    /// it disappears once detached (explicitly or at process exit).
    pub fn create_private(len: usize) -> io::Result<Self> {
        let id = unsafe {
            libc::shmget(
                libc::IPC_PRIVATE,
                len,
                libc::IPC_CREAT | QueueConsts::IPC_MODE as libc::c_int,
            )
        };
        if id < 0 {
            return Err(io::Error::last_os_error());
        }
        let attached = Self::attach_id(id, len);
        let rc = unsafe { libc::shmctl(id, libc::IPC_RMID, std::ptr::null_mut()) };
        if rc != 0 {
            warn!("IPC_RMID on private segment {id}: {}", io::Error::last_os_error());
        }
        attached
    }

    fn attach_id(id: libc::c_int, len: usize) -> io::Result<Self> {
        let addr = unsafe { libc::shmat(id, std::ptr::null(), 0) };
        if addr as isize == -1 {
            return Err(io::Error::last_os_error());
        }
        let base = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::other("shmat returned a null mapping"))?;
        Ok(Self {
            id,
            base,
            len,
            owner: false,
        })
    }

    pub fn id(&self) -> libc::c_int {
        self.id
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), self.len) }
    }

    /// Exclusive view. Only sound for segments no other process writes (private segments).
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.base.as_ptr(), self.len) }
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        if unsafe { libc::shmdt(self.base.as_ptr().cast::<libc::c_void>()) } != 0 {
            warn!("shmdt segment {}: {}", self.id, io::Error::last_os_error());
        }
        if self.owner {
            if unsafe { libc::shmctl(self.id, libc::IPC_RMID, std::ptr::null_mut()) } != 0 {
                warn!("remove segment {}: {}", self.id, io::Error::last_os_error());
            } else {
                info!("Shared memory segment {} removed", self.id);
            }
        }
    }
}

fn segment_size(id: libc::c_int) -> io::Result<usize> {
    let mut ds = std::mem::MaybeUninit::<libc::shmid_ds>::uninit();
    if unsafe { libc::shmctl(id, libc::IPC_STAT, ds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let ds = unsafe { ds.assume_init() };
    Ok(ds.shm_segsz as usize)
}
