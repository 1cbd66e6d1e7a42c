// stress-core/src/stressors/sigsegv.rs
// Deliberate segmentation faults inside supervised children

use crate::context::StressContext;
use crate::error::*;
use crate::harness::{Step, Stressor, StressorClass, Workload};
use crate::metrics::Reduction;
use crate::supervisor::{self, Outcome, SuperviseOptions};
use nix::sys::signal::Signal;
use std::ptr;
use std::time::Instant;

/// Child exit codes when the fault did not happen
const EXIT_NO_FAULT: i32 = 1;
const EXIT_NO_MAPPING: i32 = 2;

pub struct Sigsegv;

impl Stressor for Sigsegv {
    fn name(&self) -> &'static str {
        "sigsegv"
    }

    fn help(&self) -> &'static str {
        "write to read-only pages in a child and expect SIGSEGV"
    }

    fn class(&self) -> StressorClass {
        StressorClass::Signal
    }

    fn setup(&self, ctx: &mut StressContext<'_>) -> Result<Box<dyn Workload>> {
        Ok(Box::new(Faulter {
            page_size: ctx.page_size(),
            opts: SuperviseOptions {
                // some kernels report protection faults on file-less pages as SIGBUS
                expected_signals: vec![Signal::SIGSEGV, Signal::SIGBUS],
                max_restarts: 2,
            },
        }))
    }
}

struct Faulter {
    page_size: usize,
    opts: SuperviseOptions,
}

/// Runs in the forked child: map a read-only page and write to it
fn write_read_only_page(page_size: usize) -> i32 {
    let addr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            page_size,
            libc::PROT_READ,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return EXIT_NO_MAPPING;
    }
    unsafe { ptr::write_volatile(addr as *mut u8, 0x5a) };
    EXIT_NO_FAULT
}

impl Workload for Faulter {
    fn step(&mut self, ctx: &mut StressContext<'_>) -> Result<Step> {
        let start = Instant::now();
        let page_size = self.page_size;
        let outcome = supervisor::supervise(&self.opts, || write_read_only_page(page_size))?;

        match outcome {
            Outcome::ExpectedSignal(_) => {
                ctx.metrics.add("faults per sec", Reduction::HarmonicMean, start.elapsed(), 1.0);
                Ok(Step::Op)
            }
            Outcome::Exited(EXIT_NO_MAPPING) => Err(StressError::ResourceExhausted {
                resource: "memory".to_string(),
                details: "child could not map a page".to_string(),
            }),
            Outcome::Exited(EXIT_NO_FAULT) => Err(StressError::verification(
                "write to a read-only page did not fault",
            )),
            Outcome::Exited(code) => Err(StressError::verification(format!(
                "faulting child exited with unexpected code {}",
                code
            ))),
            Outcome::OomKilled => Err(StressError::ResourceExhausted {
                resource: "memory".to_string(),
                details: "faulting child OOM killed repeatedly".to_string(),
            }),
            Outcome::UnexpectedSignal(sig) => Err(StressError::verification(format!(
                "faulting child killed by {}",
                sig
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StressorOptions;
    use crate::status::ExitStatus;
    use crate::stressors::testing::run_bounded;

    #[test]
    fn test_sigsegv_stressor() {
        let (status, bogo, region) = run_bounded(&Sigsegv, 5, StressorOptions::default());
        assert_eq!(status, ExitStatus::Success);
        assert_eq!(bogo, 5);
        assert_eq!(region.slot(0).failures(), 0);
    }
}
