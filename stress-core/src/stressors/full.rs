// stress-core/src/stressors/full.rs
// /dev/full: writes fail with ENOSPC, reads return zeroes

use crate::context::StressContext;
use crate::error::*;
use crate::harness::{Step, Stressor, StressorClass, Workload};
use crate::metrics::Reduction;
use nix::errno::Errno;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Instant;

const DEV_FULL: &str = "/dev/full";
const BUF_SIZE: usize = 4096;

pub struct Full;

impl Stressor for Full {
    fn name(&self) -> &'static str {
        "full"
    }

    fn help(&self) -> &'static str {
        "write, read and seek /dev/full"
    }

    fn class(&self) -> StressorClass {
        StressorClass::Device
    }

    fn supported(&self) -> Result<()> {
        if Path::new(DEV_FULL).exists() {
            Ok(())
        } else {
            Err(StressError::unavailable(DEV_FULL, "device node not present"))
        }
    }

    fn setup(&self, _ctx: &mut StressContext<'_>) -> Result<Box<dyn Workload>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(DEV_FULL)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => StressError::unavailable(DEV_FULL, e.to_string()),
                _ => StressError::io("open /dev/full", e),
            })?;
        Ok(Box::new(DevFull {
            file,
            buf: vec![0u8; BUF_SIZE],
        }))
    }
}

struct DevFull {
    file: File,
    buf: Vec<u8>,
}

impl DevFull {
    fn write_must_fail(&mut self, ctx: &mut StressContext<'_>) -> Result<()> {
        let len = 1 + ctx.mwc.pick(BUF_SIZE);
        ctx.mwc.fill_bytes(&mut self.buf[..len]);
        match self.file.write(&self.buf[..len]) {
            Ok(n) => Err(StressError::verification(format!(
                "write of {} bytes to {} succeeded with {}, expected ENOSPC",
                len, DEV_FULL, n
            ))),
            Err(e) => match e.raw_os_error().map(Errno::from_i32) {
                Some(Errno::ENOSPC) => Ok(()),
                Some(Errno::EINTR) => Err(StressError::errno("write", Errno::EINTR)),
                _ if ctx.verify() => Err(StressError::verification(format!(
                    "write to {} failed with {}, expected ENOSPC",
                    DEV_FULL, e
                ))),
                _ => Ok(()),
            },
        }
    }

    fn read_zeroes(&mut self, ctx: &mut StressContext<'_>) -> Result<()> {
        let len = 1 + ctx.mwc.pick(BUF_SIZE);
        self.buf[..len].fill(0xff);
        let n = self.file.read(&mut self.buf[..len]).map_err(|e| StressError::io("read", e))?;
        if ctx.verify() {
            if n != len {
                return Err(StressError::verification(format!("short read from {}: {} of {}", DEV_FULL, n, len)));
            }
            if let Some(pos) = self.buf[..n].iter().position(|b| *b != 0) {
                return Err(StressError::verification(format!(
                    "{} returned non-zero byte {:#x} at offset {}",
                    DEV_FULL, self.buf[pos], pos
                )));
            }
        }
        Ok(())
    }

    fn seek(&mut self, ctx: &mut StressContext<'_>) -> Result<()> {
        let offset = ctx.mwc.next32() as u64;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| StressError::io("lseek", e))?;
        Ok(())
    }
}

impl Workload for DevFull {
    fn step(&mut self, ctx: &mut StressContext<'_>) -> Result<Step> {
        let start = Instant::now();
        match ctx.mwc.next8_modn(3) {
            0 => self.write_must_fail(ctx)?,
            1 => self.read_zeroes(ctx)?,
            _ => self.seek(ctx)?,
        }
        ctx.metrics.add("calls per sec", Reduction::HarmonicMean, start.elapsed(), 1.0);
        Ok(Step::Op)
    }
}
