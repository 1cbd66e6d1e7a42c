// stress-core/src/stressors/cpu.rs
// Monte-Carlo estimation of pi from generator draws

use crate::context::StressContext;
use crate::error::*;
use crate::harness::{Step, Stressor, StressorClass, Workload};
use crate::metrics::Reduction;
use std::f64::consts::PI;

/// Allowed distance between the running estimate and pi
const PI_TOLERANCE: f64 = 0.1;
/// Draws needed before the running estimate is checked
const MIN_VERIFY_SAMPLES: u64 = 16 * 1024;

pub struct Cpu;

impl Stressor for Cpu {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn help(&self) -> &'static str {
        "estimate pi by sampling random points in the unit square"
    }

    fn class(&self) -> StressorClass {
        StressorClass::Cpu
    }

    fn setup(&self, ctx: &mut StressContext<'_>) -> Result<Box<dyn Workload>> {
        Ok(Box::new(MonteCarlo {
            samples: ctx.options().cpu_samples.max(1),
            inside: 0,
            total: 0,
        }))
    }
}

struct MonteCarlo {
    samples: u32,
    inside: u64,
    total: u64,
}

impl MonteCarlo {
    fn estimate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        4.0 * self.inside as f64 / self.total as f64
    }
}

impl Workload for MonteCarlo {
    fn step(&mut self, ctx: &mut StressContext<'_>) -> Result<Step> {
        let samples = self.samples;
        let mwc = &mut ctx.mwc;
        let inside = ctx.metrics.time("samples per sec", Reduction::HarmonicMean, samples as f64, || {
            let mut inside = 0u64;
            for _ in 0..samples {
                let x = mwc.next32() as f64 / u32::MAX as f64;
                let y = mwc.next32() as f64 / u32::MAX as f64;
                if x * x + y * y <= 1.0 {
                    inside += 1;
                }
            }
            inside
        });

        self.inside += inside;
        self.total += self.samples as u64;

        if ctx.verify() && self.total >= MIN_VERIFY_SAMPLES {
            let estimate = self.estimate();
            if (estimate - PI).abs() > PI_TOLERANCE {
                // start over so one bad stretch is reported once
                self.inside = 0;
                self.total = 0;
                return Err(StressError::verification(format!(
                    "pi estimate {:.5} is off by more than {}",
                    estimate, PI_TOLERANCE
                )));
            }
        }
        Ok(Step::Op)
    }

    fn teardown(&mut self, ctx: &mut StressContext<'_>) -> Result<()> {
        if self.total > 0 {
            ctx.metrics.record("pi estimate", Reduction::GeometricMean, self.estimate());
        }
        Ok(())
    }
}
