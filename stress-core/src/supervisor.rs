// stress-core/src/supervisor.rs
// Fault recovery: supervised child processes and the SIGALRM interrupt flag

use crate::error::*;
use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_alarm(_signum: libc::c_int) {
    INTERRUPTED.store(true, Ordering::Relaxed);
}

/// Route SIGALRM and SIGINT to a flag polled by the execution loop. Blocking
/// syscalls return EINTR and the loop observes the flag on its next check.
pub fn install_stop_signals() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_alarm),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for sig in [Signal::SIGALRM, Signal::SIGINT] {
        unsafe { signal::sigaction(sig, &action) }
            .map_err(|e| StressError::errno(&format!("sigaction({})", sig), e))?;
    }
    Ok(())
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

pub fn clear_interrupted() {
    INTERRUPTED.store(false, Ordering::Relaxed);
}

/// How a supervised child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Exited(i32),
    /// A signal the caller provoked on purpose
    ExpectedSignal(Signal),
    /// SIGKILL that the supervisor did not send, assumed to be the OOM killer
    OomKilled,
    UnexpectedSignal(Signal),
}

/// Classify a wait status. `None` for states that are not terminations.
pub fn classify(status: WaitStatus, expected: &[Signal], killed_by_us: bool) -> Option<Outcome> {
    match status {
        WaitStatus::Exited(_, code) => Some(Outcome::Exited(code)),
        WaitStatus::Signaled(_, sig, _) if expected.contains(&sig) => {
            Some(Outcome::ExpectedSignal(sig))
        }
        WaitStatus::Signaled(_, Signal::SIGKILL, _) if !killed_by_us => Some(Outcome::OomKilled),
        WaitStatus::Signaled(_, sig, _) => Some(Outcome::UnexpectedSignal(sig)),
        _ => None,
    }
}

/// Block until `pid` terminates, retrying on EINTR
pub fn wait_child(pid: Pid) -> Result<WaitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => return Ok(status),
            Ok(other) => debug!("pid {} changed state: {:?}", pid, other),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(StressError::errno("waitpid", e)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SuperviseOptions {
    /// Signals that count as a successful, deliberate fault
    pub expected_signals: Vec<Signal>,
    /// Restarts allowed after an OOM kill
    pub max_restarts: u32,
}

impl Default for SuperviseOptions {
    fn default() -> Self {
        Self {
            expected_signals: Vec::new(),
            max_restarts: 2,
        }
    }
}

/// Run `f` in a forked child and report how it ended. The child exits with
/// the code `f` returns. Expected signals have their default disposition
/// restored in the child and core dumps are disabled.
pub fn supervise<F>(opts: &SuperviseOptions, mut f: F) -> Result<Outcome>
where
    F: FnMut() -> i32,
{
    let mut restarts = 0;
    loop {
        let child = match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                prepare_child(&opts.expected_signals);
                let code = f();
                unsafe { libc::_exit(code) };
            }
            Ok(ForkResult::Parent { child }) => child,
            Err(e) => return Err(StressError::errno("fork", e)),
        };

        let status = wait_child(child)?;
        match classify(status, &opts.expected_signals, false) {
            Some(Outcome::OomKilled) if restarts < opts.max_restarts => {
                restarts += 1;
                warn!("supervised child {} was OOM killed, restart {}", child, restarts);
            }
            Some(outcome) => return Ok(outcome),
            None => return Err(StressError::verification(format!(
                "unexpected wait status {:?}",
                status
            ))),
        }
    }
}

fn prepare_child(expected: &[Signal]) {
    let no_core = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    unsafe {
        libc::setrlimit(libc::RLIMIT_CORE, &no_core);
    }
    for sig in expected {
        let _ = unsafe { signal::signal(*sig, SigHandler::SigDfl) };
    }
}
