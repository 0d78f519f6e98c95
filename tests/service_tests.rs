//! End-to-end: a foreground `imgfilterd` and real `imgfilter` client processes.

#![cfg(target_os = "linux")]

use imgfilter::image::bmp::encode_bgr24;
use imgfilter::image::filters::luma;
use imgfilter::ipc::RequestQueue;
use imgfilter::{ServiceConfig, ServiceError};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

static NEXT: AtomicUsize = AtomicUsize::new(0);

/// A dispatcher running in its own tempdir with a private namespace. Killed on drop.
struct Service {
    dir: TempDir,
    config: ServiceConfig,
    child: Option<Child>,
}

impl Service {
    fn start(timeout_secs: u64) -> Self {
        let dir = TempDir::new().unwrap();
        let namespace = format!(
            "imgfilter_e2e{}_{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::SeqCst)
        );
        std::fs::write(
            dir.path().join(".imgfilter.toml"),
            format!("[service]\nnamespace = \"{namespace}\"\ntimeout = {timeout_secs}\nthreads = 4\n"),
        )
        .unwrap();
        let config = ServiceConfig {
            namespace,
            ipc_dir: dir.path().to_path_buf(),
            ..ServiceConfig::default()
        };
        let log = std::fs::File::create(dir.path().join("imgfilterd.log")).unwrap();
        let child = Command::new(env!("CARGO_BIN_EXE_imgfilterd"))
            .arg("--foreground")
            .current_dir(dir.path())
            .env("NO_COLOR", "1")
            .stdout(Stdio::null())
            .stderr(log)
            .spawn()
            .unwrap();
        let service = Self {
            dir,
            config,
            child: Some(child),
        };
        service.wait_ready();
        service
    }

    fn wait_ready(&self) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if RequestQueue::attach(&self.config).is_ok() {
                return;
            }
            thread::sleep(Duration::from_millis(50));
        }
        panic!("dispatcher did not come up");
    }

    fn pid(&self) -> i32 {
        self.child.as_ref().unwrap().id() as i32
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn client(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_imgfilter"))
            .args(args)
            .current_dir(self.path())
            .output()
            .unwrap()
    }

    /// Dispatcher log lines announcing a forked worker.
    fn spawned_workers(&self) -> usize {
        std::fs::read_to_string(self.path().join("imgfilterd.log"))
            .unwrap_or_default()
            .lines()
            .filter(|l| l.contains(" spawned: "))
            .count()
    }

    fn is_running(&mut self) -> bool {
        self.child.as_mut().unwrap().try_wait().unwrap().is_none()
    }

    fn write_image(&self, name: &str, width: usize, height: usize) -> (PathBuf, Vec<u8>) {
        let bgr: Vec<u8> = (0..width * height * 3).map(|i| (i * 31 % 256) as u8).collect();
        let bmp = encode_bgr24(width, height, &bgr);
        let path = self.path().join(name);
        std::fs::write(&path, &bmp).unwrap();
        (path, bmp)
    }

    fn terminate(&mut self) -> ExitStatus {
        let mut child = self.child.take().unwrap();
        unsafe { libc::kill(child.id() as i32, libc::SIGTERM) };
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(status) = child.try_wait().unwrap() {
                return status;
            }
            if Instant::now() > deadline {
                let _ = child.kill();
                panic!("dispatcher ignored SIGTERM");
            }
            thread::sleep(Duration::from_millis(50));
        }
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            unsafe { libc::kill(child.id() as i32, libc::SIGTERM) };
            thread::sleep(Duration::from_millis(200));
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// `(pid, state)` of every process whose parent is `ppid`.
fn children_of(ppid: i32) -> Vec<(i32, char)> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|e| std::fs::read_to_string(e.path().join("stat")).ok())
        .filter_map(|stat| {
            // "pid (comm) state ppid ..." with comm possibly containing spaces.
            let pid = stat.split_whitespace().next()?.parse::<i32>().ok()?;
            let rest = &stat[stat.rfind(')')? + 1..];
            let mut fields = rest.split_whitespace();
            let state = fields.next()?.chars().next()?;
            let parent = fields.next()?.parse::<i32>().ok()?;
            (parent == ppid).then_some((pid, state))
        })
        .collect()
}

/// Children of `ppid` currently in state Z.
fn zombies_of(ppid: i32) -> usize {
    children_of(ppid).iter().filter(|(_, s)| *s == 'Z').count()
}

fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    done()
}

#[test]
fn test_grayscale_job_end_to_end() {
    let service = Service::start(5);
    let (image, source) = service.write_image("in.bmp", 64, 64);

    let out = service.client(&[image.to_str().unwrap(), "1"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let result = std::fs::read(service.path().join("result.bmp")).unwrap();
    assert_eq!(result.len(), 54 + 64 * 64 * 3);
    assert_eq!(&result[..54], &source[..54]);
    for (src, dst) in source[54..].chunks_exact(3).zip(result[54..].chunks_exact(3)) {
        let y = luma(src[0], src[1], src[2]);
        assert_eq!(dst, &[y, y, y]);
    }
    assert!(!service.path().join("result.bmp.tmp").exists());

    // One request, one worker, and it has been reaped.
    assert!(wait_until(Duration::from_secs(2), || service.spawned_workers() >= 1));
    assert_eq!(service.spawned_workers(), 1);
    assert!(wait_until(Duration::from_secs(5), || children_of(service.pid()).is_empty()));
}

#[test]
fn test_killed_worker_is_reaped_and_service_continues() {
    let mut service = Service::start(2);
    // Opening a FIFO with no writer blocks, so the worker stays mid-job until killed.
    let stall = service.path().join("stall.bmp");
    let c = std::ffi::CString::new(stall.to_str().unwrap()).unwrap();
    assert_eq!(unsafe { libc::mkfifo(c.as_ptr(), 0o600) }, 0);

    let client = Command::new(env!("CARGO_BIN_EXE_imgfilter"))
        .args([stall.to_str().unwrap(), "grayscale", "-o", "never.bmp"])
        .current_dir(service.path())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let dispatcher = service.pid();
    assert!(wait_until(Duration::from_secs(5), || !children_of(dispatcher).is_empty()));
    let workers = children_of(dispatcher);
    assert_eq!(workers.len(), 1, "{workers:?}");
    unsafe { libc::kill(workers[0].0, libc::SIGKILL) };

    let status = client.wait_with_output().unwrap().status;
    assert!(!status.success());
    assert!(!service.path().join("never.bmp").exists());

    assert!(wait_until(Duration::from_secs(5), || children_of(dispatcher).is_empty()));
    assert_eq!(zombies_of(dispatcher), 0);
    assert!(service.is_running());

    let (image, source) = service.write_image("after.bmp", 8, 8);
    let out = service.client(&[image.to_str().unwrap(), "negative", "-o", "after_out.bmp"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let result = std::fs::read(service.path().join("after_out.bmp")).unwrap();
    assert_eq!(result.len(), source.len());
    assert_eq!(service.spawned_workers(), 2);
}

#[test]
fn test_brightness_ignores_param_and_honors_output_flag() {
    let service = Service::start(5);
    let (image, source) = service.write_image("in.bmp", 10, 7);
    let out = service.client(&[
        image.to_str().unwrap(),
        "brightness",
        "-20",
        "-o",
        "brighter.bmp",
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let result = std::fs::read(service.path().join("brighter.bmp")).unwrap();
    assert_eq!(result.len(), source.len());
    let stride = 32; // 10 px * 3 = 30, padded to 32
    for row in 0..7 {
        let start = 54 + row * stride;
        for i in 0..30 {
            let expected = source[start + i].saturating_add(50);
            assert_eq!(result[start + i], expected);
        }
    }
}

#[test]
fn test_concurrent_clients_all_served() {
    let service = Service::start(10);
    let (image, source) = service.write_image("in.bmp", 33, 21);
    let image = image.to_str().unwrap().to_string();

    let clients: Vec<_> = (0..6)
        .map(|i| {
            Command::new(env!("CARGO_BIN_EXE_imgfilter"))
                .args([image.as_str(), "negative", "-o", &format!("out{i}.bmp")])
                .current_dir(service.path())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .unwrap()
        })
        .collect();
    for mut c in clients {
        assert!(c.wait().unwrap().success());
    }
    for i in 0..6 {
        let result = std::fs::read(service.path().join(format!("out{i}.bmp"))).unwrap();
        assert_eq!(result.len(), source.len());
        // Pixel bytes of the first row inverted.
        for k in 0..99 {
            assert_eq!(result[54 + k], 255 - source[54 + k]);
        }
    }

    // Every worker has exited; the reaper must leave no zombies behind.
    let deadline = Instant::now() + Duration::from_secs(5);
    while zombies_of(service.pid()) > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(zombies_of(service.pid()), 0);
}

#[test]
fn test_missing_image_times_out() {
    let service = Service::start(2);
    let missing = service.path().join("does_not_exist.bmp");
    let start = Instant::now();
    let out = service.client(&[missing.to_str().unwrap(), "grayscale"]);
    let elapsed = start.elapsed();
    assert!(!out.status.success());
    assert!(elapsed >= Duration::from_secs(2), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(10), "{elapsed:?}");
    assert!(!service.path().join("result.bmp").exists());

    // The dispatcher survives the failed worker.
    let (image, _) = service.write_image("ok.bmp", 4, 4);
    let out = service.client(&[image.to_str().unwrap(), "2"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
}

#[test]
fn test_client_without_dispatcher_fails_immediately() {
    let dir = TempDir::new().unwrap();
    let (path, _) = {
        let bmp = encode_bgr24(2, 2, &[0u8; 12]);
        let p = dir.path().join("in.bmp");
        std::fs::write(&p, &bmp).unwrap();
        (p, bmp)
    };
    let start = Instant::now();
    let out = Command::new(env!("CARGO_BIN_EXE_imgfilter"))
        .args([
            path.to_str().unwrap(),
            "1",
            "--namespace",
            &format!("imgfilter_absent{}", std::process::id()),
            "--timeout",
            "30",
        ])
        .current_dir(dir.path())
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(!dir.path().join("result.bmp").exists());
}

#[test]
fn test_rejects_bad_arguments() {
    let service = Service::start(2);
    let (image, _) = service.write_image("in.bmp", 2, 2);
    let image = image.to_str().unwrap();
    assert!(!service.client(&[image, "7"]).status.success());
    assert!(!service.client(&[image, "sepia"]).status.success());
    assert!(!service.client(&[image, "3", "1", "2", "3", "4", "5", "6"]).status.success());
}

#[test]
fn test_sigterm_tears_down_ipc_state() {
    let mut service = Service::start(2);
    let config = service.config.clone();
    let status = service.terminate();
    assert!(status.success(), "{status:?}");
    assert!(matches!(
        RequestQueue::attach(&config),
        Err(ServiceError::ServiceUnavailable { .. })
    ));
}
