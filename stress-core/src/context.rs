// stress-core/src/context.rs
// Per-instance execution context: bounds, counters, stop flag, PRNG and metrics

use crate::config::StressorOptions;
use crate::metrics::Metrics;
use crate::mwc::Mwc;
use crate::shared::{InstanceSlot, SharedRegion, StressState};
use crate::supervisor;
use crate::system;
use std::time::Duration;
use tracing::{debug, error, warn};

const SYNC_POLL: Duration = Duration::from_millis(1);

/// Static description of one instance
#[derive(Debug, Clone)]
pub struct InstanceParams {
    pub stressor: &'static str,
    /// Index among instances of the same stressor
    pub instance: u32,
    pub instances: u32,
    /// 0 means unbounded
    pub max_ops: u64,
    pub verify: bool,
    /// Global failure count that stops the whole run, 0 disables
    pub failure_threshold: u64,
    /// Also poll the SIGALRM flag (forked instances only)
    pub check_interrupt: bool,
}

/// Everything a stressor may touch while it runs. One per instance; the
/// only state shared with siblings lives in the [`SharedRegion`].
pub struct StressContext<'a> {
    params: InstanceParams,
    region: &'a SharedRegion,
    slot: &'a InstanceSlot,
    slot_index: usize,
    options: &'a StressorOptions,
    bogo: u64,
    failures: u64,
    page_size: usize,
    pub mwc: Mwc,
    pub metrics: Metrics,
}

impl<'a> StressContext<'a> {
    pub fn new(
        params: InstanceParams,
        region: &'a SharedRegion,
        slot_index: usize,
        options: &'a StressorOptions,
    ) -> Self {
        let slot = region.slot(slot_index);
        slot.set_bogo_ops(0);
        Self {
            params,
            region,
            slot,
            slot_index,
            options,
            bogo: 0,
            failures: 0,
            page_size: system::page_size(),
            mwc: Mwc::new(),
            metrics: Metrics::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.params.stressor
    }

    pub fn instance(&self) -> u32 {
        self.params.instance
    }

    pub fn instances(&self) -> u32 {
        self.params.instances
    }

    pub fn max_ops(&self) -> u64 {
        self.params.max_ops
    }

    pub fn verify(&self) -> bool {
        self.params.verify
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn options(&self) -> &StressorOptions {
        self.options
    }

    pub fn slot(&self) -> &InstanceSlot {
        self.slot
    }

    /// True while the run is still on: continue flag set, no pending
    /// SIGALRM, and the operation bound not yet reached
    #[inline]
    pub fn keep_stressing(&self) -> bool {
        if self.region.is_stopped() {
            return false;
        }
        if self.params.check_interrupt && supervisor::interrupted() {
            return false;
        }
        self.params.max_ops == 0 || self.bogo < self.params.max_ops
    }

    /// Continue flag only, ignoring the operation bound
    pub fn keep_running(&self) -> bool {
        !self.region.is_stopped()
            && !(self.params.check_interrupt && supervisor::interrupted())
    }

    #[inline]
    pub fn bogo_inc(&mut self) {
        self.bogo_add(1);
    }

    pub fn bogo_add(&mut self, n: u64) {
        self.bogo = self.bogo.saturating_add(n);
        self.slot.set_bogo_ops(self.bogo);
    }

    pub fn bogo_get(&self) -> u64 {
        self.bogo
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn set_state(&self, state: StressState) {
        debug!("{}[{}] -> {:?}", self.params.stressor, self.params.instance, state);
        self.slot.set_state(state);
    }

    pub fn state(&self) -> StressState {
        self.slot.state()
    }

    /// Report a correctness failure. The loop keeps going; crossing the
    /// global failure threshold stops every instance.
    pub fn fail(&mut self, message: impl AsRef<str>) {
        self.failures += 1;
        self.slot.add_failure();
        let total = self.region.add_failure();
        error!(
            "{}: instance {}: {}",
            self.params.stressor,
            self.params.instance,
            message.as_ref()
        );

        let limit = self.params.failure_threshold;
        if limit > 0 && total >= limit && !self.region.is_stopped() {
            warn!("{} failures reached the limit of {}, stopping all stressors", total, limit);
            self.region.stop();
        }
    }

    /// Mark this instance as ready, at most once
    pub fn sync_arrive(&mut self) {
        self.region.sync_arrive(self.slot_index);
    }

    /// Block until every sibling instance is ready or the run is stopped
    pub fn sync_start_wait(&mut self) {
        self.set_state(StressState::SyncWait);
        self.sync_arrive();
        while !self.region.sync_all_arrived() && self.keep_running() {
            std::thread::sleep(SYNC_POLL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(max_ops: u64) -> InstanceParams {
        InstanceParams {
            stressor: "test",
            instance: 0,
            instances: 1,
            max_ops,
            verify: true,
            failure_threshold: 3,
            check_interrupt: false,
        }
    }

    #[test]
    fn test_max_ops_bound() {
        let region = SharedRegion::new(1).unwrap();
        let options = StressorOptions::default();
        let mut ctx = StressContext::new(params(5), &region, 0, &options);

        let mut iterations = 0;
        while ctx.keep_stressing() {
            ctx.bogo_inc();
            iterations += 1;
        }
        assert_eq!(iterations, 5);
        assert_eq!(region.slot(0).bogo_ops(), 5);
    }

    #[test]
    fn test_stop_observed() {
        let region = SharedRegion::new(1).unwrap();
        let options = StressorOptions::default();
        let ctx = StressContext::new(params(0), &region, 0, &options);

        assert!(ctx.keep_stressing());
        region.stop();
        assert!(!ctx.keep_stressing());
        assert!(!ctx.keep_running());
    }

    #[test]
    fn test_failure_threshold_stops_run() {
        let region = SharedRegion::new(1).unwrap();
        let options = StressorOptions::default();
        let mut ctx = StressContext::new(params(0), &region, 0, &options);

        ctx.fail("first");
        ctx.fail("second");
        assert!(!region.is_stopped());
        ctx.fail("third");
        assert!(region.is_stopped());
        assert_eq!(ctx.failures(), 3);
        assert_eq!(region.slot(0).failures(), 3);
    }

    #[test]
    fn test_sync_single_instance_does_not_block() {
        let region = SharedRegion::new(1).unwrap();
        let options = StressorOptions::default();
        let mut ctx = StressContext::new(params(0), &region, 0, &options);

        ctx.sync_start_wait();
        ctx.sync_start_wait();
        assert!(region.sync_all_arrived());
        assert_eq!(ctx.state(), StressState::SyncWait);
    }
}
