// stress-core/src/shared.rs
// Anonymous MAP_SHARED region holding state that must survive fork()

use crate::error::*;
use crate::metrics::{Metric, MetricsSink, Reduction};
use crate::status::ExitStatus;
use crossbeam_utils::CachePadded;
use serde::{Deserialize, Serialize};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Metric slots per instance
pub const METRIC_SLOTS: usize = 8;
/// Bytes per metric name, including the NUL terminator
pub const METRIC_NAME_LEN: usize = 40;

/// Lifecycle of one stressor instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressState {
    Start,
    Init,
    SyncWait,
    Run,
    Deinit,
    Exit,
    Wait,
}

impl StressState {
    fn as_u8(self) -> u8 {
        match self {
            StressState::Start => 0,
            StressState::Init => 1,
            StressState::SyncWait => 2,
            StressState::Run => 3,
            StressState::Deinit => 4,
            StressState::Exit => 5,
            StressState::Wait => 6,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => StressState::Init,
            2 => StressState::SyncWait,
            3 => StressState::Run,
            4 => StressState::Deinit,
            5 => StressState::Exit,
            6 => StressState::Wait,
            _ => StressState::Start,
        }
    }
}

#[repr(C)]
pub struct MetricSlot {
    used: AtomicBool,
    reduction: AtomicU8,
    name: [AtomicU8; METRIC_NAME_LEN],
    value: AtomicU64,
}

impl MetricSlot {
    fn name_matches(&self, name: &[u8]) -> bool {
        let len = name.len().min(METRIC_NAME_LEN - 1);
        self.name[..len]
            .iter()
            .zip(&name[..len])
            .all(|(a, b)| a.load(Ordering::Relaxed) == *b)
            && self.name[len].load(Ordering::Relaxed) == 0
    }

    fn store(&self, name: &[u8], value: f64, reduction: Reduction) {
        let len = name.len().min(METRIC_NAME_LEN - 1);
        for (i, byte) in self.name.iter().enumerate() {
            let b = if i < len { name[i] } else { 0 };
            byte.store(b, Ordering::Relaxed);
        }
        self.value.store(value.to_bits(), Ordering::Relaxed);
        self.reduction.store(reduction.as_u8(), Ordering::Relaxed);
        self.used.store(true, Ordering::Release);
    }

    fn load(&self) -> Option<Metric> {
        if !self.used.load(Ordering::Acquire) {
            return None;
        }
        let name: Vec<u8> = self
            .name
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .take_while(|b| *b != 0)
            .collect();
        Some(Metric {
            name: String::from_utf8_lossy(&name).into_owned(),
            value: f64::from_bits(self.value.load(Ordering::Relaxed)),
            reduction: Reduction::from_u8(self.reduction.load(Ordering::Relaxed))?,
        })
    }
}

/// Per-instance counters, readable by the controller at any time
#[repr(C)]
pub struct InstanceSlot {
    bogo_ops: CachePadded<AtomicU64>,
    state: AtomicU8,
    finished: AtomicBool,
    /// Set once the instance has been counted at the start barrier
    arrived: AtomicBool,
    status: AtomicI32,
    pid: AtomicI32,
    failures: AtomicU64,
    user_us: AtomicU64,
    system_us: AtomicU64,
    metrics: [MetricSlot; METRIC_SLOTS],
}

impl InstanceSlot {
    pub fn bogo_ops(&self) -> u64 {
        self.bogo_ops.load(Ordering::Relaxed)
    }

    pub(crate) fn set_bogo_ops(&self, ops: u64) {
        self.bogo_ops.store(ops, Ordering::Relaxed);
    }

    pub fn state(&self) -> StressState {
        StressState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub(crate) fn set_state(&self, state: StressState) {
        self.state.store(state.as_u8(), Ordering::Relaxed);
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub(crate) fn add_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pid(&self) -> Option<i32> {
        match self.pid.load(Ordering::Relaxed) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub(crate) fn set_pid(&self, pid: i32) {
        self.pid.store(pid, Ordering::Relaxed);
    }

    /// Final status, once the instance has finished
    pub fn status(&self) -> Option<ExitStatus> {
        self.finished
            .load(Ordering::Acquire)
            .then(|| ExitStatus::from_code(self.status.load(Ordering::Relaxed)))
    }

    pub(crate) fn finish(&self, status: ExitStatus) {
        self.status.store(status.code(), Ordering::Relaxed);
        self.finished.store(true, Ordering::Release);
    }

    /// True the first time only
    fn mark_arrived(&self) -> bool {
        !self.arrived.swap(true, Ordering::AcqRel)
    }

    /// Clear the finished marker before an instance is restarted.
    /// The barrier arrival is kept so a restart is not counted twice.
    pub(crate) fn reset_for_restart(&self) {
        self.finished.store(false, Ordering::Release);
        self.pid.store(0, Ordering::Relaxed);
    }

    pub fn cpu_time(&self) -> (Duration, Duration) {
        (
            Duration::from_micros(self.user_us.load(Ordering::Relaxed)),
            Duration::from_micros(self.system_us.load(Ordering::Relaxed)),
        )
    }

    pub(crate) fn set_cpu_time(&self, user: Duration, system: Duration) {
        self.user_us.store(user.as_micros() as u64, Ordering::Relaxed);
        self.system_us.store(system.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn metrics(&self) -> Vec<Metric> {
        self.metrics.iter().filter_map(MetricSlot::load).collect()
    }

    pub fn sink(&self) -> SlotSink<'_> {
        SlotSink { slot: self }
    }
}

/// `name` cut to fit a metric slot on a character boundary
fn slot_name(name: &str) -> &[u8] {
    let mut end = name.len().min(METRIC_NAME_LEN - 1);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name.as_bytes()[..end]
}

/// Writes reduced metrics into an instance's shared slots
pub struct SlotSink<'a> {
    slot: &'a InstanceSlot,
}

impl MetricsSink for SlotSink<'_> {
    fn set_metric(&mut self, name: &str, value: f64, reduction: Reduction) {
        let bytes = slot_name(name);
        let target = self
            .slot
            .metrics
            .iter()
            .find(|m| m.used.load(Ordering::Acquire) && m.name_matches(bytes))
            .or_else(|| {
                self.slot
                    .metrics
                    .iter()
                    .find(|m| !m.used.load(Ordering::Acquire))
            });
        match target {
            Some(metric) => metric.store(bytes, value, reduction),
            None => warn!("no free metric slot for '{}', dropped", name),
        }
    }
}

#[repr(C)]
struct Header {
    stopped: CachePadded<AtomicBool>,
    failures: CachePadded<AtomicU64>,
    sync_ready: AtomicU32,
    instances: AtomicU32,
}

/// Shared-memory block: stop flag, global failure counter, start barrier
/// and one slot per instance. Zeroed memory is the valid initial state.
pub struct SharedRegion {
    base: NonNull<u8>,
    len: usize,
    slots_offset: usize,
    instances: usize,
}

// The region only contains atomics.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    pub fn new(instances: usize) -> Result<Self> {
        let slots_offset = round_up(
            std::mem::size_of::<Header>(),
            std::mem::align_of::<InstanceSlot>(),
        );
        let len = round_up(
            slots_offset + instances.max(1) * std::mem::size_of::<InstanceSlot>(),
            crate::system::page_size(),
        );

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(StressError::last_errno("mmap shared region"));
        }
        let base = NonNull::new(ptr as *mut u8)
            .ok_or_else(|| StressError::unavailable("shared region", "mmap returned null"))?;

        let region = Self {
            base,
            len,
            slots_offset,
            instances,
        };
        region
            .header()
            .instances
            .store(instances as u32, Ordering::Relaxed);
        debug!("mapped {} bytes of shared state for {} instances", len, instances);
        Ok(region)
    }

    fn header(&self) -> &Header {
        unsafe { &*(self.base.as_ptr() as *const Header) }
    }

    pub fn instances(&self) -> usize {
        self.instances
    }

    pub fn slots(&self) -> &[InstanceSlot] {
        unsafe {
            let first = self.base.as_ptr().add(self.slots_offset) as *const InstanceSlot;
            std::slice::from_raw_parts(first, self.instances)
        }
    }

    pub fn slot(&self, index: usize) -> &InstanceSlot {
        &self.slots()[index]
    }

    pub fn is_stopped(&self) -> bool {
        self.header().stopped.load(Ordering::Acquire)
    }

    /// Flip the continue flag false. Never reset during a run.
    pub fn stop(&self) {
        self.header().stopped.store(true, Ordering::Release);
    }

    pub fn failures(&self) -> u64 {
        self.header().failures.load(Ordering::Relaxed)
    }

    /// Bump the global failure counter, returning the new total
    pub fn add_failure(&self) -> u64 {
        self.header().failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count instance `index` at the start barrier, at most once
    pub(crate) fn sync_arrive(&self, index: usize) {
        if self.slot(index).mark_arrived() {
            self.header().sync_ready.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub(crate) fn sync_all_arrived(&self) -> bool {
        let header = self.header();
        header.sync_ready.load(Ordering::Acquire) >= header.instances.load(Ordering::Relaxed)
    }

    pub fn total_bogo_ops(&self) -> u64 {
        self.slots().iter().map(InstanceSlot::bogo_ops).sum()
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}
