// stress-core/src/stressors/fork.rs
// Fork short-lived children and reap them

use crate::context::StressContext;
use crate::error::*;
use crate::harness::{Step, Stressor, StressorClass, Workload};
use crate::metrics::Reduction;
use crate::supervisor::{self, Outcome};
use nix::unistd::{fork, ForkResult, Pid};
use std::time::Instant;

pub struct Fork;

impl Stressor for Fork {
    fn name(&self) -> &'static str {
        "fork"
    }

    fn help(&self) -> &'static str {
        "fork children that exit immediately and reap them"
    }

    fn class(&self) -> StressorClass {
        StressorClass::Os
    }

    fn setup(&self, ctx: &mut StressContext<'_>) -> Result<Box<dyn Workload>> {
        let children = ctx.options().fork_children.max(1) as usize;
        Ok(Box::new(ForkWorkload {
            pids: Vec::with_capacity(children),
            children,
        }))
    }
}

struct ForkWorkload {
    pids: Vec<Pid>,
    children: usize,
}

impl ForkWorkload {
    /// Reap everything spawned so far; the first abnormal exit wins
    fn reap(&mut self) -> Result<()> {
        let mut result = Ok(());
        for pid in self.pids.drain(..) {
            let status = supervisor::wait_child(pid)?;
            match supervisor::classify(status, &[], false) {
                Some(Outcome::Exited(0)) => {}
                other if result.is_ok() => {
                    result = Err(StressError::verification(format!(
                        "forked child {} ended with {:?}",
                        pid, other
                    )));
                }
                _ => {}
            }
        }
        result
    }
}

impl Workload for ForkWorkload {
    fn step(&mut self, ctx: &mut StressContext<'_>) -> Result<Step> {
        let start = Instant::now();
        let mut spawn_error = None;

        for _ in 0..self.children {
            if !ctx.keep_running() {
                break;
            }
            match unsafe { fork() } {
                Ok(ForkResult::Child) => unsafe { libc::_exit(0) },
                Ok(ForkResult::Parent { child }) => self.pids.push(child),
                Err(e) => {
                    spawn_error = Some(StressError::errno("fork", e));
                    break;
                }
            }
        }

        let spawned = self.pids.len();
        self.reap()?;

        if spawned == 0 {
            return match spawn_error {
                Some(e) => Err(e),
                None => Ok(Step::Skip),
            };
        }
        ctx.metrics.add("forks per sec", Reduction::HarmonicMean, start.elapsed(), spawned as f64);
        Ok(Step::Op)
    }

    fn teardown(&mut self, _ctx: &mut StressContext<'_>) -> Result<()> {
        self.reap()
    }
}

impl Drop for ForkWorkload {
    fn drop(&mut self) {
        let _ = self.reap();
    }
}
