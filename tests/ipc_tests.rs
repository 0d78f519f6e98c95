//! IPC tests against real System V segments, named semaphores and FIFOs. Each test gets its own
//! namespace and `ftok` directory so tests can run in parallel.

use imgfilter::engine::{WorkerSettings, run_worker};
use imgfilter::image::ImageBuffer;
use imgfilter::image::bmp::encode_bgr24;
use imgfilter::ipc::{NamedSemaphore, RequestQueue, ResultChannel, ResultWriter, queue_capacity};
use imgfilter::{FilterId, FilterRequest, ServiceConfig, ServiceError};
use std::collections::HashMap;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

static NEXT: AtomicUsize = AtomicUsize::new(0);

fn test_config(dir: &TempDir) -> ServiceConfig {
    let n = NEXT.fetch_add(1, Ordering::SeqCst);
    ServiceConfig {
        namespace: format!("imgfilter_t{}_{}", std::process::id(), n),
        ipc_dir: dir.path().to_path_buf(),
        ..ServiceConfig::default()
    }
}

fn request(origin: i32, tag: usize) -> FilterRequest {
    FilterRequest::new(origin, format!("/img/{origin}/{tag}.bmp"), FilterId::Negative, &[tag as i32])
        .unwrap()
}

fn write_bmp(path: &Path, width: usize, height: usize) -> Vec<u8> {
    let bgr: Vec<u8> = (0..width * height * 3).map(|i| (i * 7 % 256) as u8).collect();
    let bmp = encode_bgr24(width, height, &bgr);
    std::fs::write(path, &bmp).unwrap();
    bmp
}

// --- request queue ---

#[test]
fn test_attach_without_dispatcher_fails_fast() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let start = Instant::now();
    let err = RequestQueue::attach(&config).err().expect("attach must fail");
    assert!(matches!(err, ServiceError::ServiceUnavailable { .. }), "{err}");
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_concurrent_producers_each_dequeued_once_in_producer_order() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let owner = Arc::new(RequestQueue::create(&config).unwrap());
    let producers = 4;
    let per_producer = 3; // 12 < capacity, so no producer is ever rejected
    assert!(producers * per_producer < queue_capacity());

    let consumer = {
        let owner = Arc::clone(&owner);
        thread::spawn(move || {
            (0..producers * per_producer)
                .map(|_| owner.dequeue().unwrap())
                .collect::<Vec<_>>()
        })
    };
    let handles: Vec<_> = (0..producers)
        .map(|p| {
            let config = config.clone();
            thread::spawn(move || {
                let queue = RequestQueue::attach(&config).unwrap();
                for tag in 0..per_producer {
                    queue.enqueue(&request(1000 + p as i32, tag)).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    let got = consumer.join().unwrap();
    assert_eq!(got.len(), producers * per_producer);

    let mut by_origin: HashMap<i32, Vec<i32>> = HashMap::new();
    for r in &got {
        by_origin.entry(r.origin).or_default().push(r.params[0]);
    }
    assert_eq!(by_origin.len(), producers);
    for tags in by_origin.values() {
        assert_eq!(tags, &(0..per_producer as i32).collect::<Vec<_>>());
    }
    assert_eq!(owner.pending(), 0);
}

#[test]
fn test_full_queue_rejects_instead_of_overwriting() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let owner = RequestQueue::create(&config).unwrap();
    let client = RequestQueue::attach(&config).unwrap();
    let cap = client.capacity();
    for tag in 0..cap {
        client.enqueue(&request(7, tag)).unwrap();
    }
    assert_eq!(owner.pending(), cap);
    let err = client.enqueue(&request(7, cap)).err().expect("queue is full");
    assert!(matches!(err, ServiceError::QueueFull { capacity } if capacity == cap));

    // Oldest slot intact; freeing it lets the next request in and wraps the index.
    assert_eq!(owner.dequeue().unwrap(), request(7, 0));
    client.enqueue(&request(7, cap)).unwrap();
    for tag in 1..=cap {
        assert_eq!(owner.dequeue().unwrap(), request(7, tag));
    }
    assert_eq!(owner.pending(), 0);
}

#[test]
fn test_owner_drop_removes_segment_and_semaphores() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let owner = RequestQueue::create(&config).unwrap();
    assert!(RequestQueue::attach(&config).is_ok());
    drop(owner);
    assert!(matches!(
        RequestQueue::attach(&config),
        Err(ServiceError::ServiceUnavailable { .. })
    ));
    assert!(RequestQueue::consumer_waker(&config).is_err());
}

#[test]
fn test_client_drop_leaves_dispatcher_state() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let owner = RequestQueue::create(&config).unwrap();
    drop(RequestQueue::attach(&config).unwrap());
    let again = RequestQueue::attach(&config).unwrap();
    again.enqueue(&request(9, 0)).unwrap();
    assert_eq!(owner.dequeue().unwrap(), request(9, 0));
}

#[test]
fn test_wake_consumer_interrupts_wait_without_request() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let owner = RequestQueue::create(&config).unwrap();
    let waker = RequestQueue::consumer_waker(&config).unwrap();
    waker.post().unwrap();
    owner.wait_available().unwrap();
    owner.wake_consumer().unwrap();
    owner.wait_available().unwrap();
    assert_eq!(owner.pending(), 0);
}

/// Current count of the named semaphore `name`, read through a separate handle.
fn sem_value(name: &str) -> i32 {
    let c = CString::new(name).unwrap();
    unsafe {
        let sem = libc::sem_open(c.as_ptr(), 0);
        assert_ne!(sem, libc::SEM_FAILED, "{name} missing");
        let mut v = 0;
        assert_eq!(libc::sem_getvalue(sem, &mut v), 0);
        libc::sem_close(sem);
        v
    }
}

#[test]
fn test_fresh_segment_resets_stale_semaphore_counts() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    // Left behind by a dispatcher that never tore down: name still linked, count 1.
    let stale = NamedSemaphore::create(&config.request_sem_name(), 1).unwrap();
    std::mem::forget(stale);

    let owner = RequestQueue::create(&config).unwrap();
    assert_eq!(sem_value(&config.request_sem_name()), 0);
    assert_eq!(sem_value(&config.mutex_sem_name()), 1);

    let client = RequestQueue::attach(&config).unwrap();
    client.enqueue(&request(3, 0)).unwrap();
    assert_eq!(owner.dequeue().unwrap(), request(3, 0));
    assert_eq!(owner.pending(), 0);
}

#[test]
fn test_take_with_nothing_pending_leaves_ring_intact() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let owner = RequestQueue::create(&config).unwrap();
    owner.wake_consumer().unwrap();
    owner.wait_available().unwrap();
    assert!(matches!(owner.take(), Err(ServiceError::QueueEmpty)));
    assert_eq!(owner.pending(), 0);

    // Every slot is still usable afterwards.
    let client = RequestQueue::attach(&config).unwrap();
    for tag in 0..client.capacity() {
        client.enqueue(&request(5, tag)).unwrap();
    }
    for tag in 0..client.capacity() {
        assert_eq!(owner.dequeue().unwrap(), request(5, tag));
    }
}

// --- result channel ---

fn fifo_in(dir: &TempDir, name: &str) -> std::path::PathBuf {
    dir.path().join(name)
}

#[test]
fn test_wait_times_out_without_writer_and_unlinks() {
    let dir = TempDir::new().unwrap();
    let path = fifo_in(&dir, "rep_timeout");
    let start = Instant::now();
    {
        let channel = ResultChannel::create(&path).unwrap();
        assert!(path.exists());
        let err = channel.wait_readable(Duration::from_millis(300)).unwrap_err();
        assert!(matches!(err, ServiceError::Timeout(_)));
    }
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(3));
    assert!(!path.exists());
}

#[test]
fn test_three_writes_arrive_in_order() {
    let dir = TempDir::new().unwrap();
    let path = fifo_in(&dir, "rep_order");
    let mut channel = ResultChannel::create(&path).unwrap();
    let writer_path = path.clone();
    let big: Vec<u8> = (0..200_000).map(|i| (i % 251) as u8).collect();
    let expected: Vec<u8> = [&[1u8; 14][..], &[2u8; 40][..], &big[..]].concat();
    let writer = thread::spawn(move || {
        ResultWriter::open(&writer_path)
            .unwrap()
            .send(&[1u8; 14], &[2u8; 40], &big)
            .unwrap()
    });
    channel.wait_readable(Duration::from_secs(5)).unwrap();
    let got = channel.read_to_end().unwrap();
    assert_eq!(writer.join().unwrap(), expected.len());
    assert_eq!(got, expected);
}

#[test]
fn test_writer_fails_when_client_gone() {
    let dir = TempDir::new().unwrap();
    // FIFO removed: NotFound.
    let missing = fifo_in(&dir, "rep_missing");
    assert!(ResultWriter::open(&missing).is_err());

    // FIFO present but no reader: fails with ENXIO instead of blocking.
    let orphan = fifo_in(&dir, "rep_orphan");
    let c = CString::new(orphan.as_os_str().as_bytes()).unwrap();
    assert_eq!(unsafe { libc::mkfifo(c.as_ptr(), 0o600) }, 0);
    let err = ResultWriter::open(&orphan).err().expect("no reader");
    assert_eq!(err.raw_os_error(), Some(libc::ENXIO));
}

// --- worker, in-process ---

#[test]
fn test_image_buffer_loads_headers_and_pixels() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("in.bmp");
    let bmp = write_bmp(&src, 5, 3);
    let image = ImageBuffer::load(&src).unwrap();
    assert_eq!((image.width(), image.rows(), image.row_stride()), (5, 3, 16));
    assert_eq!(image.pixel_data_size(), 48);
    assert_eq!(image.file_header_bytes(), &bmp[..14]);
    assert_eq!(image.info_header_bytes(), &bmp[14..54]);
    assert_eq!(image.pixels(), &bmp[54..]);
}

#[test]
fn test_image_buffer_normalizes_pixel_offset_gap() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("gap.bmp");
    let bmp = encode_bgr24(4, 2, &[9u8; 24]);
    // Same image with 10 junk bytes between the headers and the pixels.
    let mut gapped = bmp[..54].to_vec();
    gapped[10..14].copy_from_slice(&64u32.to_le_bytes());
    gapped[2..6].copy_from_slice(&((64 + 24) as u32).to_le_bytes());
    gapped.extend_from_slice(&[0xEE; 10]);
    gapped.extend_from_slice(&bmp[54..]);
    std::fs::write(&src, &gapped).unwrap();

    let image = ImageBuffer::load(&src).unwrap();
    assert_eq!(image.source_file_header().pixel_offset, 64);
    assert_eq!(image.file_header_bytes(), &bmp[..14]);
    assert_eq!(image.pixels(), &bmp[54..]);
}

#[test]
fn test_image_buffer_rejects_bad_input() {
    let dir = TempDir::new().unwrap();
    assert!(ImageBuffer::load(&dir.path().join("nope.bmp")).is_err());

    let not_bmp = dir.path().join("text.bmp");
    std::fs::write(&not_bmp, vec![b'x'; 200]).unwrap();
    assert!(matches!(
        ImageBuffer::load(&not_bmp),
        Err(imgfilter::CodecError::BadSignature(_))
    ));

    let cut = dir.path().join("cut.bmp");
    let bmp = encode_bgr24(8, 8, &[1u8; 192]);
    std::fs::write(&cut, &bmp[..100]).unwrap();
    assert!(matches!(
        ImageBuffer::load(&cut),
        Err(imgfilter::CodecError::Truncated { .. })
    ));
}

#[test]
fn test_run_worker_streams_negative_image() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("in.bmp");
    let bmp = write_bmp(&src, 16, 16);
    let fifo = fifo_in(&dir, "rep_worker");
    let mut channel = ResultChannel::create(&fifo).unwrap();

    let req = FilterRequest::new(1, &src, FilterId::Negative, &[]).unwrap();
    let settings = WorkerSettings {
        threads: 4,
        fifo_path: fifo.clone(),
    };
    let worker = thread::spawn(move || run_worker(&req, &settings).unwrap());
    channel.wait_readable(Duration::from_secs(5)).unwrap();
    let got = channel.read_to_end().unwrap();
    let report = worker.join().unwrap();

    assert_eq!(report.bands, 4);
    assert_eq!(report.bytes_sent, bmp.len());
    assert_eq!(&got[..54], &bmp[..54]);
    let inverted: Vec<u8> = bmp[54..].iter().map(|b| 255 - b).collect();
    assert_eq!(&got[54..], &inverted[..]);
}

#[test]
fn test_run_worker_missing_image_sends_nothing() {
    let dir = TempDir::new().unwrap();
    let fifo = fifo_in(&dir, "rep_missing_image");
    let channel = ResultChannel::create(&fifo).unwrap();
    let req = FilterRequest::new(1, dir.path().join("absent.bmp"), FilterId::Grayscale, &[]).unwrap();
    let settings = WorkerSettings {
        threads: 2,
        fifo_path: fifo.clone(),
    };
    assert!(run_worker(&req, &settings).is_err());
    assert!(matches!(
        channel.wait_readable(Duration::from_millis(200)),
        Err(ServiceError::Timeout(_))
    ));
}
