//! Request channel: a ring of fixed-size request slots in a shared segment, fed by any number of
//! client processes and drained by the single dispatcher.
//!
//! Segment layout (`repr(C)`): a [`QueueHeader`] followed by `capacity` [`RequestSlot`]s.
//! Two named semaphores drive it: `request` counts published slots (initial 0) and `mutex`
//! (initial 1) serializes producers around `write_index` and the slot it points at.
//! The consumer needs no lock: there is only ever one.

use std::io;
use std::mem::size_of;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use log::{debug, info};

use crate::error::ServiceError;
use crate::ipc::semaphore::NamedSemaphore;
use crate::ipc::shm::{SharedSegment, segment_key};
use crate::types::{FilterId, FilterRequest, ServiceConfig};
use crate::utils::config::{MAX_PARAMS, MAX_PATH_LEN, QueueConsts};

/// Shared header. Indices stay in `[0, capacity)`; `pending` counts published, unconsumed slots.
#[repr(C)]
pub struct QueueHeader {
    write_index: AtomicU32,
    read_index: AtomicU32,
    pending: AtomicU32,
    capacity: u32,
}

/// One request as laid out in shared memory. Plain bytes, copied in and out by value.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RequestSlot {
    origin: i32,
    path: [u8; MAX_PATH_LEN],
    filter: u32,
    params: [i32; MAX_PARAMS],
    param_count: u32,
}

impl RequestSlot {
    pub fn encode(req: &FilterRequest) -> Self {
        use std::os::unix::ffi::OsStrExt;

        let mut path = [0u8; MAX_PATH_LEN];
        let bytes = req.path.as_os_str().as_bytes();
        let n = bytes.len().min(MAX_PATH_LEN - 1);
        path[..n].copy_from_slice(&bytes[..n]);
        let mut params = [0i32; MAX_PARAMS];
        let count = req.params.len().min(MAX_PARAMS);
        params[..count].copy_from_slice(&req.params[..count]);
        Self {
            origin: req.origin,
            path,
            filter: req.filter.id(),
            params,
            param_count: count as u32,
        }
    }

    pub fn decode(&self) -> Result<FilterRequest, ServiceError> {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let filter = FilterId::from_id(self.filter).ok_or_else(|| {
            ServiceError::InvalidRequest(format!("unknown filter id {}", self.filter))
        })?;
        let end = self.path.iter().position(|&b| b == 0).unwrap_or(MAX_PATH_LEN);
        let path = PathBuf::from(OsStr::from_bytes(&self.path[..end]));
        let count = (self.param_count as usize).min(MAX_PARAMS);
        FilterRequest::new(self.origin, path, filter, &self.params[..count])
    }
}

/// Slots that fit in the request byte budget.
pub const fn queue_capacity() -> usize {
    QueueConsts::SHM_REQUEST_SIZE / size_of::<RequestSlot>()
}

/// Segment bytes: header plus every slot.
pub const fn segment_len() -> usize {
    size_of::<QueueHeader>() + queue_capacity() * size_of::<RequestSlot>()
}

/// Attached request channel. The dispatcher's handle owns the segment and both semaphore names
/// and removes them on drop; a client handle only detaches and closes.
///
/// Field order is teardown order: segment, then `request`, then `mutex`.
pub struct RequestQueue {
    segment: SharedSegment,
    request: NamedSemaphore,
    mutex: NamedSemaphore,
    capacity: usize,
}

// The raw segment is only touched through atomics and mutex/semaphore-ordered slot copies.
unsafe impl Send for RequestQueue {}
unsafe impl Sync for RequestQueue {}

impl RequestQueue {
    /// Dispatcher side: create (or adopt) the segment and both semaphores. Indices are reset only
    /// when the segment is freshly created.
    pub fn create(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let key = segment_key(&config.ipc_dir, QueueConsts::SHM_REQUEST_KEY)
            .map_err(|e| ServiceError::io("resolve request segment key", e))?;
        let (segment, created) = SharedSegment::create_or_attach(key, segment_len())
            .map_err(|e| ServiceError::io("create request segment", e))?;
        let capacity = if created {
            let header = segment.as_ptr() as *mut QueueHeader;
            // Nothing else can be attached to a segment created with IPC_EXCL.
            unsafe {
                header.write(QueueHeader {
                    write_index: AtomicU32::new(0),
                    read_index: AtomicU32::new(0),
                    pending: AtomicU32::new(0),
                    capacity: queue_capacity() as u32,
                });
            }
            info!(
                "Request segment {} created (key {key:#x}, {} slots)",
                segment.id(),
                queue_capacity()
            );
            queue_capacity()
        } else {
            let header = unsafe { &*(segment.as_ptr() as *const QueueHeader) };
            let capacity = header.capacity as usize;
            if capacity == 0 || capacity > queue_capacity() {
                return Err(ServiceError::io(
                    "adopt request segment",
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("existing segment advertises {capacity} slots"),
                    ),
                ));
            }
            info!(
                "Request segment {} already present (key {key:#x}, {} pending); reusing it",
                segment.id(),
                header.pending.load(Ordering::Acquire)
            );
            capacity
        };
        if created {
            // Names left by a dispatcher that never tore down would keep their old counts.
            for name in [config.request_sem_name(), config.mutex_sem_name()] {
                NamedSemaphore::remove(&name)
                    .map_err(|e| ServiceError::io("remove stale semaphore", e))?;
            }
        }
        let request = NamedSemaphore::create(&config.request_sem_name(), 0)
            .map_err(|e| ServiceError::io("create request semaphore", e))?;
        let mutex = NamedSemaphore::create(&config.mutex_sem_name(), 1)
            .map_err(|e| ServiceError::io("create mutex semaphore", e))?;
        Ok(Self {
            segment,
            request,
            mutex,
            capacity,
        })
    }

    /// Client side: attach to what the dispatcher published. Never creates anything and never
    /// blocks; a missing dispatcher is `ServiceUnavailable`.
    pub fn attach(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let key = segment_key(&config.ipc_dir, QueueConsts::SHM_REQUEST_KEY)
            .map_err(|e| ServiceError::unavailable("request segment key", e))?;
        let segment = SharedSegment::attach_existing(key, segment_len())
            .map_err(|e| ServiceError::unavailable("request segment", e))?;
        let request = NamedSemaphore::open(&config.request_sem_name())
            .map_err(|e| ServiceError::unavailable("request semaphore", e))?;
        let mutex = NamedSemaphore::open(&config.mutex_sem_name())
            .map_err(|e| ServiceError::unavailable("mutex semaphore", e))?;
        let capacity = {
            let header = unsafe { &*(segment.as_ptr() as *const QueueHeader) };
            header.capacity as usize
        };
        if capacity == 0 || capacity > queue_capacity() {
            return Err(ServiceError::unavailable(
                "request segment",
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("segment advertises {capacity} slots"),
                ),
            ));
        }
        Ok(Self {
            segment,
            request,
            mutex,
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Published requests not yet taken by the consumer.
    pub fn pending(&self) -> usize {
        self.header().pending.load(Ordering::Acquire) as usize
    }

    pub fn segment_id(&self) -> libc::c_int {
        self.segment.id()
    }

    fn header(&self) -> &QueueHeader {
        unsafe { &*(self.segment.as_ptr() as *const QueueHeader) }
    }

    fn slot_ptr(&self, index: usize) -> *mut RequestSlot {
        debug_assert!(index < self.capacity);
        unsafe {
            (self.segment.as_ptr().add(size_of::<QueueHeader>()) as *mut RequestSlot).add(index)
        }
    }

    /// Copy `req` into the next slot and wake the consumer. Rejects with `QueueFull` instead of
    /// overwriting a slot the consumer has not read yet.
    pub fn enqueue(&self, req: &FilterRequest) -> Result<(), ServiceError> {
        let slot = RequestSlot::encode(req);
        self.mutex
            .wait_uninterrupted()
            .map_err(|e| ServiceError::io("acquire queue mutex", e))?;
        let published = self.publish_locked(slot);
        self.mutex
            .post()
            .map_err(|e| ServiceError::io("release queue mutex", e))?;
        let index = published?;
        self.request
            .post()
            .map_err(|e| ServiceError::io("signal request semaphore", e))?;
        debug!("Enqueued request from {} into slot {index}", req.origin);
        Ok(())
    }

    /// Caller holds the queue mutex.
    fn publish_locked(&self, slot: RequestSlot) -> Result<usize, ServiceError> {
        let header = self.header();
        if header.pending.load(Ordering::Acquire) as usize >= self.capacity {
            return Err(ServiceError::QueueFull {
                capacity: self.capacity,
            });
        }
        let index = header.write_index.load(Ordering::Relaxed) as usize % self.capacity;
        unsafe { self.slot_ptr(index).write_volatile(slot) };
        header
            .write_index
            .store(((index + 1) % self.capacity) as u32, Ordering::Release);
        header.pending.fetch_add(1, Ordering::AcqRel);
        Ok(index)
    }

    /// One blocking wait for a published request. A signal surfaces as
    /// `ErrorKind::Interrupted` without consuming anything.
    pub fn wait_available(&self) -> io::Result<()> {
        self.request.wait()
    }

    /// Read the slot at `read_index` and advance it. Call exactly once per successful
    /// [`wait_available`](Self::wait_available).
    /// A wakeup with nothing published (stale semaphore count) is `QueueEmpty` and leaves the
    /// ring untouched.
    pub fn take(&self) -> Result<FilterRequest, ServiceError> {
        let header = self.header();
        // Only the consumer decrements, so a non-zero count cannot drop to zero under us.
        if header.pending.load(Ordering::Acquire) == 0 {
            return Err(ServiceError::QueueEmpty);
        }
        let index = header.read_index.load(Ordering::Acquire) as usize % self.capacity;
        let slot = unsafe { self.slot_ptr(index).read_volatile() };
        header
            .read_index
            .store(((index + 1) % self.capacity) as u32, Ordering::Release);
        // Slot fully copied out; producers may reuse it now.
        header.pending.fetch_sub(1, Ordering::AcqRel);
        slot.decode()
    }

    /// Blocking dequeue: wait (retrying on signals) then take.
    pub fn dequeue(&self) -> Result<FilterRequest, ServiceError> {
        self.request
            .wait_uninterrupted()
            .map_err(|e| ServiceError::io("wait for request", e))?;
        self.take()
    }

    /// Wake a blocked consumer without publishing a request (shutdown).
    pub fn wake_consumer(&self) -> io::Result<()> {
        self.request.post()
    }

    /// Separate handle on the request semaphore, for waking the consumer from another thread.
    pub fn consumer_waker(config: &ServiceConfig) -> io::Result<NamedSemaphore> {
        NamedSemaphore::open(&config.request_sem_name())
    }
}
