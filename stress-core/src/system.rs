// stress-core/src/system.rs
// Environment facts: page size, memory, load, CPU placement and resource usage

use std::fs;
use std::io;
use tempfile::{NamedTempFile, TempDir};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const DEFAULT_PAGE_SIZE: usize = 4096;

/// Raw ingredients mixed into an MWC reseed
#[derive(Debug, Clone, Default)]
pub struct Entropy {
    pub time_sec: u64,
    pub time_usec: u64,
    pub pid: u64,
    pub ppid: u64,
    pub load_avg: Option<(f64, f64, f64)>,
    pub utime: Option<(u64, u64)>,
    pub cpu: u32,
    pub phys_mem: u64,
}

impl Entropy {
    pub fn gather() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let usage = rusage(UsageWho::Process);

        Self {
            time_sec: now.as_secs(),
            time_usec: now.subsec_micros() as u64,
            pid: std::process::id() as u64,
            ppid: nix::unistd::getppid().as_raw() as u64,
            load_avg: load_avg(),
            utime: usage.map(|u| (u.user.as_secs(), u.user.subsec_micros() as u64)),
            cpu: current_cpu(),
            phys_mem: phys_mem_bytes(),
        }
    }
}

/// System page size, falling back to 4 KiB
pub fn page_size() -> usize {
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size > 0 {
        page_size as usize
    } else {
        DEFAULT_PAGE_SIZE
    }
}

/// Total physical memory in bytes, 0 when unknown
pub fn phys_mem_bytes() -> u64 {
    let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
    if pages > 0 {
        pages as u64 * page_size() as u64
    } else {
        0
    }
}

/// Available memory in bytes from /proc/meminfo (MemAvailable, then MemFree)
pub fn available_mem_bytes() -> Option<u64> {
    let contents = fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo_kb(&contents, "MemAvailable:")
        .or_else(|| parse_meminfo_kb(&contents, "MemFree:"))
        .map(|kb| kb * 1024)
}

fn parse_meminfo_kb(contents: &str, key: &str) -> Option<u64> {
    contents
        .lines()
        .find(|line| line.starts_with(key))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
}

/// 1, 5 and 15 minute load averages
pub fn load_avg() -> Option<(f64, f64, f64)> {
    let mut loads = [0f64; 3];
    let n = unsafe { libc::getloadavg(loads.as_mut_ptr(), 3) };
    if n == 3 {
        Some((loads[0], loads[1], loads[2]))
    } else {
        None
    }
}

/// CPU the caller is currently running on, 0 when unknown
pub fn current_cpu() -> u32 {
    let cpu = unsafe { libc::sched_getcpu() };
    if cpu < 0 {
        0
    } else {
        cpu as u32
    }
}

pub fn online_cpus() -> usize {
    num_cpus::get()
}

/// Kernel release string, e.g. "6.8.0-45-generic"
pub fn kernel_release() -> String {
    fs::read_to_string("/proc/sys/kernel/osrelease")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageWho {
    Process,
    Thread,
}

/// User and system CPU time consumed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuUsage {
    pub user: Duration,
    pub system: Duration,
}

pub fn rusage(who: UsageWho) -> Option<CpuUsage> {
    let who = match who {
        UsageWho::Process => libc::RUSAGE_SELF,
        UsageWho::Thread => libc::RUSAGE_THREAD,
    };
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    if unsafe { libc::getrusage(who, &mut usage) } != 0 {
        return None;
    }
    Some(CpuUsage {
        user: timeval_to_duration(usage.ru_utime),
        system: timeval_to_duration(usage.ru_stime),
    })
}

fn timeval_to_duration(tv: libc::timeval) -> Duration {
    Duration::from_secs(tv.tv_sec.max(0) as u64) + Duration::from_micros(tv.tv_usec.max(0) as u64)
}

fn scratch_prefix(stressor: &str, instance: u32) -> String {
    format!("sysstress-{}-{}-{}-", stressor, std::process::id(), instance)
}

/// Fresh scratch directory for one stressor instance, removed when dropped.
/// The random suffix keeps instances that share a pid and an index apart.
pub fn scratch_dir(stressor: &str, instance: u32) -> io::Result<TempDir> {
    tempfile::Builder::new()
        .prefix(&scratch_prefix(stressor, instance))
        .tempdir()
}

/// Fresh scratch file for one stressor instance, removed when dropped
pub fn scratch_file(stressor: &str, instance: u32) -> io::Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(&scratch_prefix(stressor, instance))
        .tempfile()
}
