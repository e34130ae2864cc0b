//! Hardware concurrency probe.
//!
//! Mirrors `std::thread::available_parallelism` but additionally respects a
//! container's CPU quota (cgroup v1 `cpu.cfs_quota_us`/`cpu.cfs_period_us`, or
//! cgroup v2 `cpu.max`) when running under Linux, the way a process confined to
//! e.g. 1.5 cores inside Docker should not spawn a worker per host core.

use std::num::NonZeroU16;

/// Upper bound on worker count so pool storage never needs to grow.
pub(crate) const MAX_HARDWARE_CONCURRENCY: u16 = 1024;

/// Reports the maximum useful hardware concurrency for this process, clamped
/// to a container's CPU quota when one is configured.
pub fn concurrency_max() -> NonZeroU16 {
    let reported = std::thread::available_parallelism()
        .map(|n| n.get() as u16)
        .unwrap_or(1);

    let bounded = match cgroup_quota() {
        Some(quota) if quota > 0 => reported.min(quota),
        _ => reported,
    };

    NonZeroU16::new(bounded.clamp(1, MAX_HARDWARE_CONCURRENCY)).unwrap_or(NonZeroU16::MIN)
}

#[cfg(target_os = "linux")]
fn cgroup_quota() -> Option<u16> {
    if let Some(quota) = cgroup_v2_quota() {
        return Some(quota);
    }
    cgroup_v1_quota()
}

#[cfg(not(target_os = "linux"))]
fn cgroup_quota() -> Option<u16> {
    None
}

#[cfg(target_os = "linux")]
fn cgroup_v1_quota() -> Option<u16> {
    let quota: i64 = read_trimmed("/sys/fs/cgroup/cpu/cpu.cfs_quota_us")?.parse().ok()?;
    let period: i64 = read_trimmed("/sys/fs/cgroup/cpu/cpu.cfs_period_us")?.parse().ok()?;
    if quota <= 0 || period <= 0 {
        return None;
    }
    // Round to the nearest whole core rather than truncating, matching the
    // original probe's heuristic for non-whole-core quotas.
    Some((((quota + period / 2) / period).max(1)) as u16)
}

#[cfg(target_os = "linux")]
fn cgroup_v2_quota() -> Option<u16> {
    let contents = read_trimmed("/sys/fs/cgroup/cpu.max")?;
    let mut parts = contents.split_whitespace();
    let quota = parts.next()?;
    if quota == "max" {
        return None;
    }
    let quota: i64 = quota.parse().ok()?;
    let period: i64 = parts.next()?.parse().ok()?;
    if quota <= 0 || period <= 0 {
        return None;
    }
    Some((((quota + period / 2) / period).max(1)) as u16)
}

#[cfg(target_os = "linux")]
fn read_trimmed(path: &str) -> Option<String> {
    std::fs::read_to_string(path).ok().map(|s| s.trim().to_owned())
}
