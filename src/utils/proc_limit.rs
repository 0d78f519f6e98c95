//! Process budget detection for the dispatcher's fork-per-job fan-out (Unix).

/// Returns the soft limit on processes for this user, or `None` if unlimited or unavailable.
/// Every queued job becomes a process, so this is the ceiling on concurrent workers.
#[cfg(target_os = "linux")]
pub fn max_user_processes() -> Option<u64> {
    use std::mem::MaybeUninit;
    let mut rlim = MaybeUninit::<libc::rlimit>::uninit();
    if unsafe { libc::getrlimit(libc::RLIMIT_NPROC, rlim.as_mut_ptr()) } != 0 {
        return None;
    }
    let rlim = unsafe { rlim.assume_init() };
    let cur = rlim.rlim_cur;
    // RLIM_INFINITY is typically !0 or u64::MAX; treat as "no practical limit"
    if cur == libc::RLIM_INFINITY || cur > i64::MAX as u64 {
        return None;
    }
    Some(cur)
}

#[cfg(not(target_os = "linux"))]
pub fn max_user_processes() -> Option<u64> {
    None
}
