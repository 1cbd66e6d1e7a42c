// stress-core/src/controller.rs
// Spawns stressor instances, enforces the timeout and collates the report

use crate::config::{InstanceMode, RunConfig};
use crate::config_validation::ConfigValidator;
use crate::context::{InstanceParams, StressContext};
use crate::error::*;
use crate::harness::{self, Stressor};
use crate::report::{RunReport, StressorSummary};
use crate::shared::{InstanceSlot, SharedRegion, StressState};
use crate::status::ExitStatus;
use crate::stressors;
use crate::supervisor::{self, Outcome};
use crate::system::{self, UsageWho};
use chrono::Utc;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, getpid, ForkResult, Pid};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Time between SIGALRM and SIGKILL for instances that do not stop
const KILL_GRACE: Duration = Duration::from_secs(5);
/// Restarts allowed per instance after an OOM kill
const MAX_OOM_RESTARTS: u32 = 2;

/// Requests a running [`Controller`] to stop from another thread
#[derive(Clone, Default)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
    children: Arc<Mutex<Vec<Pid>>>,
}

impl StopHandle {
    pub fn stop(&self) {
        if !self.requested.swap(true, Ordering::AcqRel) {
            info!("stop requested");
        }
        for pid in self.children.lock().iter() {
            let _ = kill(*pid, Signal::SIGALRM);
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    fn register(&self, pid: Pid) {
        self.children.lock().push(pid);
    }

    fn unregister(&self, pid: Pid) {
        self.children.lock().retain(|p| *p != pid);
    }
}

/// One instance and where it reports
#[derive(Debug, Clone, Copy)]
struct Placement {
    slot: usize,
    stressor: usize,
    instance: u32,
}

#[derive(Debug)]
struct LiveChild {
    pid: Pid,
    placement: Placement,
    restarts: u32,
}

pub struct Controller {
    config: RunConfig,
    stressors: Vec<Box<dyn Stressor>>,
    stop: StopHandle,
}

impl Controller {
    /// Validate `config` and resolve its stressor names
    pub fn new(config: RunConfig) -> Result<Self> {
        let validator = ConfigValidator::new(stressors::names());
        validator.validate(&config).into_result()?;

        let stressors = config
            .stressors
            .iter()
            .map(|spec| stressors::find(&spec.name))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            config,
            stressors,
            stop: StopHandle::default(),
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    fn placements(&self) -> Vec<Placement> {
        let mut placements = Vec::new();
        for (stressor, spec) in self.config.stressors.iter().enumerate() {
            for instance in 0..spec.instances {
                placements.push(Placement {
                    slot: placements.len(),
                    stressor,
                    instance,
                });
            }
        }
        placements
    }

    /// Run every instance to completion and collate the report.
    ///
    /// In process mode instances are forked from the calling thread and
    /// then run stressor code, which allocates and logs. Only the forking
    /// thread survives in the child, so any lock another thread holds at
    /// that moment stays held there. Callers in a multi-threaded process
    /// must keep other threads away from the allocator and the log writer
    /// while a run is dispatching; the CLI parks its only other thread
    /// in the Ctrl-C wait.
    #[instrument(skip(self), fields(mode = %self.config.mode))]
    pub fn run(&self) -> Result<RunReport> {
        let started_at = Utc::now();
        let placements = self.placements();
        let region = SharedRegion::new(placements.len())?;

        info!(
            "dispatching {} instances of {} stressors",
            placements.len(),
            self.stressors.len()
        );
        let start = Instant::now();
        match self.config.mode {
            InstanceMode::Process => self.run_processes(&region, &placements, start),
            InstanceMode::Thread => self.run_threads(&region, &placements, start),
        }
        let elapsed = start.elapsed();
        info!(
            "{} instances finished in {:.2}s, {} bogo ops",
            placements.len(),
            elapsed.as_secs_f64(),
            region.total_bogo_ops()
        );

        let failures = region.failures();
        let limit = self.config.failure_threshold;
        if limit > 0 && failures >= limit {
            let storm = StressError::FailureStorm { failures, limit };
            error!("{}", storm);
        }

        let summaries = self
            .config
            .stressors
            .iter()
            .enumerate()
            .map(|(idx, spec)| {
                let slots: Vec<&InstanceSlot> = placements
                    .iter()
                    .filter(|p| p.stressor == idx)
                    .map(|p| region.slot(p.slot))
                    .collect();
                StressorSummary::from_slots(&spec.name, &slots, elapsed)
            })
            .collect();

        Ok(RunReport::new(started_at, self.config.mode, summaries))
    }

    /// Body of one instance, in a forked child or a thread
    fn run_instance(&self, region: &SharedRegion, placement: Placement, check_interrupt: bool) -> ExitStatus {
        let spec = &self.config.stressors[placement.stressor];
        let stressor = self.stressors[placement.stressor].as_ref();
        let params = InstanceParams {
            stressor: stressor.name(),
            instance: placement.instance,
            instances: spec.instances,
            max_ops: spec.ops,
            verify: self.config.verify,
            failure_threshold: self.config.failure_threshold,
            check_interrupt,
        };

        let mut ctx = StressContext::new(params, region, placement.slot, &self.config.options);
        match self.config.seed {
            Some([w, z]) => ctx.mwc.seed(w ^ placement.instance, z),
            None => ctx.mwc.reseed(self.config.no_rand_seed),
        }
        harness::execute(stressor, &mut ctx)
    }

    fn deadline_passed(&self, start: Instant) -> bool {
        self.config
            .timeout()
            .map(|t| start.elapsed() >= t)
            .unwrap_or(false)
    }

    fn run_threads(&self, region: &SharedRegion, placements: &[Placement], start: Instant) {
        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(placements.len());
            for &placement in placements {
                let name = format!("{}-{}", self.stressors[placement.stressor].name(), placement.instance);
                let spawned = std::thread::Builder::new().name(name).spawn_scoped(scope, move || {
                    let slot = region.slot(placement.slot);
                    slot.set_pid(std::process::id() as i32);
                    let status = self.run_instance(region, placement, false);
                    if let Some(usage) = system::rusage(UsageWho::Thread) {
                        slot.set_cpu_time(usage.user, usage.system);
                    }
                    slot.finish(status);
                    slot.set_state(StressState::Exit);
                });
                match spawned {
                    Ok(handle) => handles.push((placement, handle)),
                    Err(e) => {
                        warn!("cannot spawn instance thread: {}", e);
                        self.abandon(region, placement, ExitStatus::NoResource);
                    }
                }
            }

            let mut stopping = false;
            loop {
                let mut all_finished = true;
                for (placement, handle) in &handles {
                    if handle.is_finished() {
                        // a panic before the barrier must not hold back siblings
                        region.sync_arrive(placement.slot);
                    } else {
                        all_finished = false;
                    }
                }
                if all_finished {
                    break;
                }
                if !stopping && (self.deadline_passed(start) || self.stop.is_stop_requested()) {
                    debug!("stopping {} instance threads", handles.len());
                    region.stop();
                    stopping = true;
                }
                std::thread::sleep(POLL_INTERVAL);
            }

            for (placement, handle) in handles {
                if handle.join().is_err() {
                    error!("instance thread for slot {} panicked", placement.slot);
                    region.slot(placement.slot).finish(ExitStatus::Failure);
                }
            }
        });
    }

    /// An instance that never got to run still has to pass the start barrier
    fn abandon(&self, region: &SharedRegion, placement: Placement, status: ExitStatus) {
        region.sync_arrive(placement.slot);
        let slot = region.slot(placement.slot);
        slot.finish(status);
        slot.set_state(StressState::Exit);
    }

    fn spawn_child(&self, region: &SharedRegion, placement: Placement) -> Result<Pid> {
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                supervisor::clear_interrupted();
                let status = match supervisor::install_stop_signals() {
                    Ok(()) => {
                        region.slot(placement.slot).set_pid(getpid().as_raw());
                        self.run_instance(region, placement, true)
                    }
                    Err(e) => {
                        error!("{}", e);
                        region.sync_arrive(placement.slot);
                        ExitStatus::Failure
                    }
                };
                let slot = region.slot(placement.slot);
                if let Some(usage) = system::rusage(UsageWho::Process) {
                    slot.set_cpu_time(usage.user, usage.system);
                }
                slot.finish(status);
                slot.set_state(StressState::Exit);
                unsafe { libc::_exit(status.code()) }
            }
            Ok(ForkResult::Parent { child }) => {
                region.slot(placement.slot).set_pid(child.as_raw());
                self.stop.register(child);
                Ok(child)
            }
            Err(e) => Err(StressError::errno("fork", e)),
        }
    }

    fn run_processes(&self, region: &SharedRegion, placements: &[Placement], start: Instant) {
        let mut live = Vec::with_capacity(placements.len());
        for &placement in placements {
            match self.spawn_child(region, placement) {
                Ok(pid) => live.push(LiveChild {
                    pid,
                    placement,
                    restarts: 0,
                }),
                Err(e) => {
                    warn!("cannot fork instance for slot {}: {}", placement.slot, e);
                    self.abandon(region, placement, ExitStatus::NoResource);
                }
            }
        }

        let mut stop_sent: Option<Instant> = None;
        let mut killed = false;

        while !live.is_empty() {
            let mut restarts = Vec::new();
            live.retain(|child| match waitpid(child.pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(Errno::EINTR) => true,
                Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                    self.stop.unregister(child.pid);
                    if self.reap(region, child, status, stop_sent.is_some(), killed) {
                        restarts.push((child.placement, child.restarts + 1));
                    }
                    false
                }
                Ok(_) => true,
                Err(e) => {
                    warn!("waitpid {} failed: {}", child.pid, e);
                    self.stop.unregister(child.pid);
                    self.abandon(region, child.placement, ExitStatus::Failure);
                    false
                }
            });

            for (placement, restarts) in restarts {
                region.slot(placement.slot).reset_for_restart();
                match self.spawn_child(region, placement) {
                    Ok(pid) => live.push(LiveChild {
                        pid,
                        placement,
                        restarts,
                    }),
                    Err(e) => {
                        warn!("cannot restart slot {}: {}", placement.slot, e);
                        self.abandon(region, placement, ExitStatus::NoResource);
                    }
                }
            }

            if stop_sent.is_none()
                && (self.deadline_passed(start) || self.stop.is_stop_requested() || region.is_stopped())
            {
                debug!("stopping {} instances", live.len());
                region.stop();
                for child in &live {
                    let _ = kill(child.pid, Signal::SIGALRM);
                }
                stop_sent = Some(Instant::now());
            }

            if let Some(sent) = stop_sent {
                if !killed && sent.elapsed() >= KILL_GRACE {
                    for child in &live {
                        warn!("instance pid {} ignored the stop request, killing it", child.pid);
                        let _ = kill(child.pid, Signal::SIGKILL);
                    }
                    killed = true;
                }
            }

            if !live.is_empty() {
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }

    /// Record how a child ended. Returns true when it should be restarted.
    /// A child that died before the start barrier is counted there so its
    /// siblings do not wait for it.
    fn reap(&self, region: &SharedRegion, child: &LiveChild, status: WaitStatus, stopping: bool, killed: bool) -> bool {
        let slot = region.slot(child.placement.slot);
        // SIGALRM before the child installed its handler
        let expected: &[Signal] = if stopping { &[Signal::SIGALRM] } else { &[] };

        match supervisor::classify(status, expected, killed) {
            Some(Outcome::Exited(code)) => {
                if slot.status().is_none() {
                    slot.finish(ExitStatus::from_code(code));
                }
            }
            Some(Outcome::ExpectedSignal(_)) => {
                if slot.status().is_none() {
                    slot.finish(ExitStatus::Success);
                }
            }
            Some(Outcome::OomKilled) if !stopping && child.restarts < MAX_OOM_RESTARTS => {
                warn!("instance pid {} was OOM killed, restarting", child.pid);
                return true;
            }
            Some(Outcome::OomKilled) => {
                warn!("instance pid {} was OOM killed", child.pid);
                slot.finish(ExitStatus::NoResource);
            }
            Some(Outcome::UnexpectedSignal(sig)) => {
                warn!("instance pid {} terminated by {}", child.pid, sig);
                slot.finish(ExitStatus::Signaled);
            }
            None => slot.finish(ExitStatus::Failure),
        }
        if matches!(slot.state(), StressState::Start | StressState::Init) {
            debug!("slot {} ended before the start barrier", child.placement.slot);
        }
        region.sync_arrive(child.placement.slot);
        slot.set_state(StressState::Exit);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StressorSpec;

    fn config(mode: InstanceMode, stressors: Vec<StressorSpec>) -> RunConfig {
        RunConfig {
            stressors,
            mode,
            timeout_secs: Some(10),
            seed: Some([1, 2]),
            verify: true,
            ..RunConfig::default()
        }
    }

    fn bounded(name: &str, instances: u32, ops: u64) -> StressorSpec {
        StressorSpec {
            name: name.to_string(),
            instances,
            ops,
        }
    }

    #[test]
    fn test_unknown_stressor_rejected() {
        let result = Controller::new(config(InstanceMode::Thread, vec![bounded("nope", 1, 1)]));
        assert!(matches!(result, Err(StressError::Config { .. })));
    }

    #[test]
    fn test_placements() {
        let controller = Controller::new(config(
            InstanceMode::Thread,
            vec![bounded("cpu", 2, 1), bounded("fork", 1, 1)],
        ))
        .unwrap();
        let placements = controller.placements();
        assert_eq!(placements.len(), 3);
        assert_eq!(placements[2].slot, 2);
        assert_eq!(placements[2].stressor, 1);
        assert_eq!(placements[1].instance, 1);
    }

    #[test]
    fn test_reap_releases_start_barrier() {
        let controller = Controller::new(config(InstanceMode::Process, vec![bounded("cpu", 3, 1)])).unwrap();
        let region = SharedRegion::new(3).unwrap();
        region.sync_arrive(2);

        // OOM killed during setup with no restarts left
        let oom = LiveChild {
            pid: Pid::from_raw(4242),
            placement: controller.placements()[0],
            restarts: MAX_OOM_RESTARTS,
        };
        let status = WaitStatus::Signaled(oom.pid, Signal::SIGKILL, false);
        assert!(!controller.reap(&region, &oom, status, false, false));
        assert_eq!(region.slot(0).status(), Some(ExitStatus::NoResource));
        assert!(!region.sync_all_arrived());

        // crashed during setup
        let crashed = LiveChild {
            pid: Pid::from_raw(4243),
            placement: controller.placements()[1],
            restarts: 0,
        };
        let status = WaitStatus::Signaled(crashed.pid, Signal::SIGSEGV, false);
        assert!(!controller.reap(&region, &crashed, status, false, false));
        assert_eq!(region.slot(1).status(), Some(ExitStatus::Signaled));
        assert!(region.sync_all_arrived());
    }

    #[test]
    fn test_oom_restart_not_counted_at_barrier() {
        let controller = Controller::new(config(InstanceMode::Process, vec![bounded("cpu", 2, 1)])).unwrap();
        let region = SharedRegion::new(2).unwrap();
        let child = LiveChild {
            pid: Pid::from_raw(4244),
            placement: controller.placements()[0],
            restarts: 0,
        };
        let status = WaitStatus::Signaled(child.pid, Signal::SIGKILL, false);
        assert!(controller.reap(&region, &child, status, false, false));
        region.sync_arrive(1);
        assert!(!region.sync_all_arrived());
    }

    #[test]
    fn test_thread_mode_bounded_run() {
        let controller = Controller::new(config(InstanceMode::Thread, vec![bounded("cpu", 2, 50)])).unwrap();
        let report = controller.run().unwrap();

        assert_eq!(report.status, ExitStatus::Success);
        assert_eq!(report.stressors[0].bogo_ops, 100);
        assert_eq!(report.stressors[0].instance_statuses, vec![ExitStatus::Success; 2]);
    }

    #[test]
    fn test_process_mode_bounded_run() {
        let controller = Controller::new(config(InstanceMode::Process, vec![bounded("cpu", 2, 20)])).unwrap();
        let report = controller.run().unwrap();

        assert_eq!(report.status, ExitStatus::Success);
        assert_eq!(report.stressors[0].bogo_ops, 40);
        assert!(report.stressors[0].user_time_secs >= 0.0);
    }

    #[test]
    fn test_stop_handle_ends_unbounded_run() {
        let controller = Controller::new(config(InstanceMode::Thread, vec![bounded("cpu", 1, 0)])).unwrap();
        let handle = controller.stop_handle();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            handle.stop();
        });

        let begin = Instant::now();
        let report = controller.run().unwrap();
        stopper.join().unwrap();

        assert!(begin.elapsed() < Duration::from_secs(5));
        assert_eq!(report.status, ExitStatus::Success);
        assert!(report.stressors[0].bogo_ops > 0);
    }
}
