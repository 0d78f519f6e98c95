//! Result channel: a one-shot named pipe from one worker back to one client.
//!
//! The client creates and opens the read end before publishing its request, waits for
//! readability with a deadline, drains to end-of-stream and unlinks the FIFO on drop. The worker
//! opens the write end once, writes file header, info header and pixels, then closes.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::error::ServiceError;
use crate::utils::config::{QueueConsts, ResponseConsts};

fn set_nonblocking(file: &File, nonblocking: bool) -> io::Result<()> {
    let fd = file.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let flags = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn make_fifo(path: &Path) -> io::Result<()> {
    let c = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    if unsafe { libc::mkfifo(c.as_ptr(), QueueConsts::IPC_MODE as libc::mode_t) } != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EEXIST) {
            return Err(err);
        }
    }
    Ok(())
}

/// Client end. Unlinks the FIFO when dropped, on every exit path.
pub struct ResultChannel {
    path: PathBuf,
    reader: Option<File>,
}

impl ResultChannel {
    /// Create the FIFO at `path` and open its read end without blocking.
    pub fn create(path: &Path) -> Result<Self, ServiceError> {
        make_fifo(path).map_err(|e| ServiceError::io("create result fifo", e))?;
        // From here on the drop guard owns the name.
        let mut channel = Self {
            path: path.to_path_buf(),
            reader: None,
        };
        let reader = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| ServiceError::io("open result fifo", e))?;
        channel.reader = Some(reader);
        Ok(channel)
    }

    fn reader(&self) -> Result<&File, ServiceError> {
        self.reader.as_ref().ok_or_else(|| {
            ServiceError::io(
                "result fifo",
                io::Error::new(io::ErrorKind::NotConnected, "read end not open"),
            )
        })
    }

    /// Block until the channel is readable or `timeout` elapses. Signals do not shorten the wait.
    pub fn wait_readable(&self, timeout: Duration) -> Result<(), ServiceError> {
        let fd = self.reader()?.as_raw_fd();
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ServiceError::Timeout(timeout));
            }
            let mut pfd = libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            };
            let ms = remaining.as_millis().clamp(1, i32::MAX as u128) as libc::c_int;
            let rc = unsafe { libc::poll(&mut pfd, 1, ms) };
            match rc {
                0 => continue,
                n if n > 0 => {
                    debug!("result fifo ready (revents {:#x})", pfd.revents);
                    return Ok(());
                }
                _ => {
                    let err = io::Error::last_os_error();
                    if err.kind() == io::ErrorKind::Interrupted {
                        continue;
                    }
                    return Err(ServiceError::io("poll result fifo", err));
                }
            }
        }
    }

    /// Read everything up to end-of-stream, in blocking mode.
    pub fn read_to_end(&mut self) -> Result<Vec<u8>, ServiceError> {
        let reader = self.reader()?;
        set_nonblocking(reader, false).map_err(|e| ServiceError::io("configure result fifo", e))?;
        let mut reader = reader;
        let mut out = Vec::new();
        let mut buf = vec![0u8; ResponseConsts::READ_CHUNK_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ServiceError::io("read result fifo", e)),
            }
        }
        Ok(out)
    }
}

impl Drop for ResultChannel {
    fn drop(&mut self) {
        self.reader.take();
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!("unlink {}: {}", self.path.display(), e);
        }
    }
}

/// Worker end of a client's result channel.
pub struct ResultWriter {
    file: File,
}

impl ResultWriter {
    /// Open the write end. Fails instead of blocking when the FIFO is gone (`NotFound`) or
    /// nobody holds the read end (`ENXIO`).
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)?;
        set_nonblocking(&file, false)?;
        Ok(Self { file })
    }

    /// File header, info header, pixels: three writes in that order, no framing.
    pub fn send(mut self, file_header: &[u8], info_header: &[u8], pixels: &[u8]) -> io::Result<usize> {
        self.file.write_all(file_header)?;
        self.file.write_all(info_header)?;
        self.file.write_all(pixels)?;
        self.file.flush()?;
        Ok(file_header.len() + info_header.len() + pixels.len())
    }
}
