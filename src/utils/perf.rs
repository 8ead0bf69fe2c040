//! Process memory statistics for diagnostic reporting.

/// Reads the peak resident set size (VmHWM) from `/proc/self/status`.
///
/// Gives a reliable measure of the maximum physical memory the
/// reconstruction touched, which is the quantity that matters when sizing
/// runs against large volumes. Linux only.
///
/// # Returns
/// The peak resident set size in kilobytes, or 0 if the value cannot be
/// read or the platform is not Linux.
#[cfg(target_os = "linux")]
pub fn peak_rss_kb() -> u64 {
    let status = match std::fs::read_to_string("/proc/self/status") {
        Ok(content) => content,
        Err(_) => return 0,
    };

    status
        .lines()
        .find(|line| line.starts_with("VmHWM:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

/// Fallback for non-Linux platforms so the crate still compiles.
#[cfg(not(target_os = "linux"))]
pub fn peak_rss_kb() -> u64 {
    use std::sync::Once;
    static WARN_ONCE: Once = Once::new();
    WARN_ONCE.call_once(|| {
        log::warn!("Peak RSS measurement is only supported on Linux; returning 0.");
    });
    0
}
