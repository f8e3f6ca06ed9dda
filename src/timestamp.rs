use once_cell::sync::Lazy;
use std::time::Instant;

static ANCHOR: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic nanoseconds. Unaffected by wall clock adjustments.
#[cfg(any(target_os = "linux", target_os = "android", target_vendor = "apple"))]
pub fn monotonic_ns() -> u64 {
    unsafe {
        let mut ts: libc::timespec = std::mem::zeroed();
        if libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut ts) == 0 {
            (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
        } else {
            // fallback
            anchored_ns()
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_vendor = "apple")))]
pub fn monotonic_ns() -> u64 {
    anchored_ns()
}

fn anchored_ns() -> u64 {
    ANCHOR.elapsed().as_nanos().min(u64::MAX as u128) as u64
}

/// Elapsed milliseconds between two `monotonic_ns` readings, never negative.
pub fn rtt_ms(start_ns: u64, end_ns: u64) -> f64 {
    end_ns.saturating_sub(start_ns) as f64 / 1e6
}
