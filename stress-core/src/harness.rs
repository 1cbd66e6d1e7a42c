// stress-core/src/harness.rs
// Stressor contract and the INIT -> SYNC_WAIT -> RUN -> DEINIT execution loop

use crate::context::StressContext;
use crate::error::*;
use crate::shared::StressState;
use crate::status::ExitStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Setup attempts when setup is merely interrupted
const INTERRUPTED_SETUP_ATTEMPTS: u32 = 3;
/// Consecutive exhausted iterations tolerated before exiting with NoResource
const MAX_EXHAUSTED_STEPS: u32 = 256;
const EXHAUSTED_BACKOFF: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressorClass {
    Cpu,
    Filesystem,
    Memory,
    Os,
    Device,
    Signal,
}

impl fmt::Display for StressorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StressorClass::Cpu => "cpu",
            StressorClass::Filesystem => "filesystem",
            StressorClass::Memory => "memory",
            StressorClass::Os => "os",
            StressorClass::Device => "device",
            StressorClass::Signal => "signal",
        };
        f.pad(s)
    }
}

/// Result of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// One bogo operation completed
    Op,
    /// Nothing to count this time around
    Skip,
    /// The workload has nothing more to do
    Finished,
}

/// A stressor: one kernel facility to hammer
pub trait Stressor: Send + Sync {
    fn name(&self) -> &'static str;

    fn help(&self) -> &'static str;

    fn class(&self) -> StressorClass;

    /// Capability or platform check before any resource is created
    fn supported(&self) -> Result<()> {
        Ok(())
    }

    /// INIT: acquire resources and return the loop body
    fn setup(&self, ctx: &mut StressContext<'_>) -> Result<Box<dyn Workload>>;
}

/// Loop body of a running stressor. Resources are released in
/// `teardown` and, on every other path, by `Drop`.
pub trait Workload {
    fn step(&mut self, ctx: &mut StressContext<'_>) -> Result<Step>;

    fn teardown(&mut self, _ctx: &mut StressContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Drive one stressor instance through its whole lifecycle
#[instrument(skip_all, fields(stressor = stressor.name(), instance = ctx.instance()))]
pub fn execute(stressor: &dyn Stressor, ctx: &mut StressContext<'_>) -> ExitStatus {
    ctx.set_state(StressState::Init);

    if let Err(e) = stressor.supported() {
        info!("{}: skipped: {}", stressor.name(), e);
        ctx.sync_arrive();
        ctx.set_state(StressState::Deinit);
        return setup_status(&e);
    }

    let mut workload = match setup_with_retry(stressor, ctx) {
        Ok(workload) => workload,
        Err(status) => {
            ctx.sync_arrive();
            ctx.set_state(StressState::Deinit);
            return status;
        }
    };

    ctx.sync_start_wait();
    ctx.set_state(StressState::Run);
    let status = run_loop(workload.as_mut(), ctx);

    ctx.set_state(StressState::Deinit);
    if let Err(e) = workload.teardown(ctx) {
        warn!("{}: teardown failed: {}", stressor.name(), e);
    }
    drop(workload);

    let mut sink = ctx.slot().sink();
    ctx.metrics.publish(&mut sink);

    debug!(
        "{}[{}] finished: {} bogo ops, {} failures",
        stressor.name(),
        ctx.instance(),
        ctx.bogo_get(),
        ctx.failures()
    );

    if ctx.failures() > 0 {
        status.worst(ExitStatus::Failure)
    } else {
        status
    }
}

fn setup_with_retry(
    stressor: &dyn Stressor,
    ctx: &mut StressContext<'_>,
) -> std::result::Result<Box<dyn Workload>, ExitStatus> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let e = match stressor.setup(ctx) {
            Ok(workload) => return Ok(workload),
            Err(e) => e,
        };

        let retry_after = match e.recovery_strategy() {
            RecoveryStrategy::Retry { max_attempts, delay_ms } if attempt < max_attempts => {
                Some(Duration::from_millis(delay_ms))
            }
            RecoveryStrategy::Skip if attempt < INTERRUPTED_SETUP_ATTEMPTS => Some(Duration::ZERO),
            _ => None,
        };

        match retry_after {
            Some(delay) if ctx.keep_running() => {
                debug!("{}: setup attempt {} failed: {}, retrying", stressor.name(), attempt, e);
                std::thread::sleep(delay);
            }
            _ => {
                let status = setup_status(&e);
                match status {
                    ExitStatus::Failure => error!("{}: setup failed: {}", stressor.name(), e),
                    _ => info!("{}: {}, skipping", stressor.name(), e),
                }
                return Err(status);
            }
        }
    }
}

/// Status for an instance whose setup could not complete
fn setup_status(e: &StressError) -> ExitStatus {
    match e.recovery_strategy() {
        RecoveryStrategy::Abort(status) => status,
        RecoveryStrategy::Retry { .. } | RecoveryStrategy::Skip => ExitStatus::NoResource,
        RecoveryStrategy::Continue => ExitStatus::Failure,
    }
}

fn run_loop(workload: &mut dyn Workload, ctx: &mut StressContext<'_>) -> ExitStatus {
    let mut exhausted = 0u32;

    while ctx.keep_stressing() {
        match workload.step(ctx) {
            Ok(Step::Op) => {
                exhausted = 0;
                ctx.bogo_inc();
            }
            Ok(Step::Skip) => {}
            Ok(Step::Finished) => break,
            Err(e) => match e.recovery_strategy() {
                RecoveryStrategy::Skip => debug!("{}: {}", ctx.name(), e),
                RecoveryStrategy::Abort(status) => {
                    info!("{}: {}, giving up", ctx.name(), e);
                    return status;
                }
                // the retry budget covers setup; in the loop a step is simply tried again
                RecoveryStrategy::Retry { .. } => {
                    exhausted += 1;
                    if exhausted >= MAX_EXHAUSTED_STEPS {
                        warn!("{}: {} after {} attempts, giving up", ctx.name(), e, exhausted);
                        return ExitStatus::NoResource;
                    }
                    std::thread::sleep(EXHAUSTED_BACKOFF);
                }
                RecoveryStrategy::Continue => ctx.fail(e.to_string()),
            },
        }
    }
    ExitStatus::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StressorOptions;
    use crate::context::InstanceParams;
    use crate::metrics::Reduction;
    use crate::shared::SharedRegion;
    use nix::errno::Errno;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    fn params(max_ops: u64) -> InstanceParams {
        InstanceParams {
            stressor: "test",
            instance: 0,
            instances: 1,
            max_ops,
            verify: true,
            failure_threshold: 0,
            check_interrupt: false,
        }
    }

    /// Scripted workload: the closure decides each step
    struct Scripted<F: FnMut(u64) -> Result<Step>> {
        calls: u64,
        script: F,
        torn_down: Arc<AtomicBool>,
    }

    impl<F: FnMut(u64) -> Result<Step>> Workload for Scripted<F> {
        fn step(&mut self, ctx: &mut StressContext<'_>) -> Result<Step> {
            self.calls += 1;
            ctx.metrics.add("calls per sec", Reduction::HarmonicMean, Duration::from_millis(1), 1.0);
            (self.script)(self.calls)
        }

        fn teardown(&mut self, _ctx: &mut StressContext<'_>) -> Result<()> {
            self.torn_down.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    struct TestStressor<F: Fn() -> Result<()> + Send + Sync> {
        setup_result: F,
        script: fn(u64) -> Result<Step>,
        torn_down: Mutex<Option<Arc<AtomicBool>>>,
    }

    impl<F: Fn() -> Result<()> + Send + Sync> Stressor for TestStressor<F> {
        fn name(&self) -> &'static str {
            "test"
        }

        fn help(&self) -> &'static str {
            "scripted test stressor"
        }

        fn class(&self) -> StressorClass {
            StressorClass::Os
        }

        fn setup(&self, _ctx: &mut StressContext<'_>) -> Result<Box<dyn Workload>> {
            (self.setup_result)()?;
            let flag = Arc::new(AtomicBool::new(false));
            *self.torn_down.lock().unwrap() = Some(Arc::clone(&flag));
            Ok(Box::new(Scripted {
                calls: 0,
                script: self.script,
                torn_down: flag,
            }))
        }
    }

    fn stressor(script: fn(u64) -> Result<Step>) -> TestStressor<impl Fn() -> Result<()> + Send + Sync> {
        TestStressor {
            setup_result: || Ok(()),
            script,
            torn_down: Mutex::new(None),
        }
    }

    fn torn_down<F: Fn() -> Result<()> + Send + Sync>(s: &TestStressor<F>) -> bool {
        s.torn_down
            .lock()
            .unwrap()
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    #[test]
    fn test_exactly_max_ops() {
        let region = SharedRegion::new(1).unwrap();
        let options = StressorOptions::default();
        let mut ctx = StressContext::new(params(1000), &region, 0, &options);
        let s = stressor(|_| Ok(Step::Op));

        let status = execute(&s, &mut ctx);
        assert_eq!(status, ExitStatus::Success);
        assert_eq!(ctx.bogo_get(), 1000);
        assert_eq!(region.slot(0).bogo_ops(), 1000);
        assert_eq!(region.slot(0).state(), StressState::Deinit);
        assert!(torn_down(&s));
        assert_eq!(region.slot(0).metrics().len(), 1);
    }

    #[test]
    fn test_skips_do_not_count() {
        let region = SharedRegion::new(1).unwrap();
        let options = StressorOptions::default();
        let mut ctx = StressContext::new(params(10), &region, 0, &options);
        let s = stressor(|n| Ok(if n % 2 == 0 { Step::Skip } else { Step::Op }));

        assert_eq!(execute(&s, &mut ctx), ExitStatus::Success);
        assert_eq!(ctx.bogo_get(), 10);
    }

    #[test]
    fn test_finished_ends_loop() {
        let region = SharedRegion::new(1).unwrap();
        let options = StressorOptions::default();
        let mut ctx = StressContext::new(params(0), &region, 0, &options);
        let s = stressor(|n| Ok(if n > 3 { Step::Finished } else { Step::Op }));

        assert_eq!(execute(&s, &mut ctx), ExitStatus::Success);
        assert_eq!(ctx.bogo_get(), 3);
    }

    #[test]
    fn test_stop_observed_within_one_iteration() {
        let region = SharedRegion::new(1).unwrap();
        let options = StressorOptions::default();
        let mut ctx = StressContext::new(params(0), &region, 0, &options);

        struct StopAt<'r>(&'r SharedRegion);
        impl Workload for StopAt<'_> {
            fn step(&mut self, ctx: &mut StressContext<'_>) -> Result<Step> {
                if ctx.bogo_get() == 41 {
                    self.0.stop();
                }
                Ok(Step::Op)
            }
        }

        let mut workload = StopAt(&region);
        let status = run_loop(&mut workload, &mut ctx);
        assert_eq!(status, ExitStatus::Success);
        assert_eq!(ctx.bogo_get(), 42);
    }

    #[test]
    fn test_verification_failures_continue() {
        let region = SharedRegion::new(1).unwrap();
        let options = StressorOptions::default();
        let mut ctx = StressContext::new(params(20), &region, 0, &options);
        let s = stressor(|n| {
            if n == 5 {
                Err(StressError::verification("postcondition violated"))
            } else {
                Ok(Step::Op)
            }
        });

        assert_eq!(execute(&s, &mut ctx), ExitStatus::Failure);
        assert_eq!(ctx.bogo_get(), 20);
        assert_eq!(ctx.failures(), 1);
    }

    #[test]
    fn test_enosys_during_run_is_not_implemented() {
        let region = SharedRegion::new(1).unwrap();
        let options = StressorOptions::default();
        let mut ctx = StressContext::new(params(0), &region, 0, &options);
        let s = stressor(|_| Err(StressError::errno("frob", Errno::ENOSYS)));

        assert_eq!(execute(&s, &mut ctx), ExitStatus::NotImplemented);
        assert!(torn_down(&s));
    }

    #[test]
    fn test_persistent_exhaustion_is_no_resource() {
        let region = SharedRegion::new(1).unwrap();
        let options = StressorOptions::default();
        let mut ctx = StressContext::new(params(0), &region, 0, &options);
        let s = stressor(|_| Err(StressError::errno("mmap", Errno::ENOMEM)));

        assert_eq!(execute(&s, &mut ctx), ExitStatus::NoResource);
        assert_eq!(ctx.bogo_get(), 0);
    }

    #[test]
    fn test_setup_absent_and_exhausted() {
        let region = SharedRegion::new(2).unwrap();
        let options = StressorOptions::default();

        let absent = TestStressor {
            setup_result: || Err(StressError::unavailable("/dev/nothing", "missing")),
            script: |_| Ok(Step::Op),
            torn_down: Mutex::new(None),
        };
        let mut ctx = StressContext::new(params(1), &region, 0, &options);
        assert_eq!(execute(&absent, &mut ctx), ExitStatus::NotImplemented);

        let exhausted = TestStressor {
            setup_result: || Err(StressError::errno("open", Errno::EMFILE)),
            script: |_| Ok(Step::Op),
            torn_down: Mutex::new(None),
        };
        let mut ctx = StressContext::new(params(1), &region, 1, &options);
        assert_eq!(execute(&exhausted, &mut ctx), ExitStatus::NoResource);
        assert!(region.sync_all_arrived());
    }

    #[test]
    fn test_setup_retries_follow_recovery_strategy() {
        static ATTEMPTS: AtomicU32 = AtomicU32::new(0);
        let region = SharedRegion::new(1).unwrap();
        let options = StressorOptions::default();

        let error = StressError::errno("mmap", Errno::ENOMEM);
        let max_attempts = match error.recovery_strategy() {
            RecoveryStrategy::Retry { max_attempts, .. } => max_attempts,
            other => panic!("Expected retry strategy, got {:?}", other),
        };

        let exhausted = TestStressor {
            setup_result: || {
                ATTEMPTS.fetch_add(1, Ordering::Relaxed);
                Err(StressError::errno("mmap", Errno::ENOMEM))
            },
            script: |_| Ok(Step::Op),
            torn_down: Mutex::new(None),
        };
        let mut ctx = StressContext::new(params(1), &region, 0, &options);
        assert_eq!(execute(&exhausted, &mut ctx), ExitStatus::NoResource);
        assert_eq!(ATTEMPTS.load(Ordering::Relaxed), max_attempts);
    }

    #[test]
    fn test_setup_recovers_after_transient_exhaustion() {
        static ATTEMPTS: AtomicU32 = AtomicU32::new(0);
        let region = SharedRegion::new(1).unwrap();
        let options = StressorOptions::default();

        let flaky = TestStressor {
            setup_result: || match ATTEMPTS.fetch_add(1, Ordering::Relaxed) {
                0 => Err(StressError::errno("fork", Errno::EAGAIN)),
                _ => Ok(()),
            },
            script: |_| Ok(Step::Op),
            torn_down: Mutex::new(None),
        };
        let mut ctx = StressContext::new(params(4), &region, 0, &options);
        assert_eq!(execute(&flaky, &mut ctx), ExitStatus::Success);
        assert_eq!(ctx.bogo_get(), 4);
        assert_eq!(ATTEMPTS.load(Ordering::Relaxed), 2);
    }
}
