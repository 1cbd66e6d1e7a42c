// stress-core/src/stressors/dirent.rs
// Directory listing through getdents64 and std::fs::read_dir

use crate::context::StressContext;
use crate::error::*;
use crate::harness::{Step, Stressor, StressorClass, Workload};
use crate::metrics::Reduction;
use crate::provider::{Provider, ProviderSet};
use crate::system;
use std::fs::{self, File};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::Instant;
use tempfile::TempDir;
use tracing::debug;

const DIRENT_BUF_SIZE: usize = 32 * 1024;

pub struct Dirent;

impl Stressor for Dirent {
    fn name(&self) -> &'static str {
        "dirent"
    }

    fn help(&self) -> &'static str {
        "list a directory of files with getdents64 and readdir"
    }

    fn class(&self) -> StressorClass {
        StressorClass::Filesystem
    }

    fn setup(&self, ctx: &mut StressContext<'_>) -> Result<Box<dyn Workload>> {
        let dir = ScratchDir::create(self.name(), ctx.instance(), ctx.options().dirent_files)?;
        let providers: ProviderSet<Path, usize> =
            ProviderSet::new(vec![Box::new(Getdents64), Box::new(ReadDir)]);
        debug!("dirent providers: {:?}", providers.names());

        Ok(Box::new(DirentWorkload { dir, providers }))
    }
}

/// Directory of empty files, removed on drop
struct ScratchDir {
    dir: TempDir,
    files: usize,
}

impl ScratchDir {
    fn create(stressor: &str, instance: u32, files: usize) -> Result<Self> {
        let dir = system::scratch_dir(stressor, instance).map_err(|e| StressError::io("mkdir", e))?;
        let mut scratch = Self { dir, files: 0 };
        for i in 0..files {
            File::create(scratch.path().join(format!("f{:06}", i))).map_err(|e| StressError::io("create", e))?;
            scratch.files += 1;
        }
        debug!("dirent scratch directory {}", scratch.path().display());
        Ok(scratch)
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }
}

struct DirentWorkload {
    dir: ScratchDir,
    providers: ProviderSet<Path, usize>,
}

impl Workload for DirentWorkload {
    fn step(&mut self, ctx: &mut StressContext<'_>) -> Result<Step> {
        let start = Instant::now();
        let (provider, entries) = self.providers.call(&mut ctx.mwc, self.dir.path())?;
        ctx.metrics.add(
            "entries per sec",
            Reduction::HarmonicMean,
            start.elapsed(),
            entries as f64,
        );

        if ctx.verify() && entries != self.dir.files {
            return Err(StressError::verification(format!(
                "{} listed {} entries, expected {}",
                provider, entries, self.dir.files
            )));
        }
        Ok(Step::Op)
    }
}

/// Raw `getdents64(2)` over the directory fd
struct Getdents64;

impl Provider<Path, usize> for Getdents64 {
    fn name(&self) -> &'static str {
        "getdents64"
    }

    fn call(&self, dir: &Path) -> Result<usize> {
        let file = File::open(dir).map_err(|e| StressError::io("open", e))?;
        let mut buf = vec![0u8; DIRENT_BUF_SIZE];
        let mut entries = 0;

        loop {
            let n = unsafe {
                libc::syscall(
                    libc::SYS_getdents64,
                    file.as_raw_fd(),
                    buf.as_mut_ptr(),
                    buf.len(),
                )
            };
            if n < 0 {
                return Err(StressError::last_errno("getdents64"));
            }
            if n == 0 {
                return Ok(entries);
            }
            entries += count_records(&buf[..n as usize])?;
        }
    }
}

/// Walk `linux_dirent64` records, skipping `.` and `..`
fn count_records(buf: &[u8]) -> Result<usize> {
    // d_ino (8) + d_off (8) + d_reclen (2) + d_type (1)
    const NAME_OFFSET: usize = 19;
    let mut offset = 0;
    let mut count = 0;

    while offset < buf.len() {
        let record = &buf[offset..];
        if record.len() < NAME_OFFSET {
            return Err(StressError::verification("truncated dirent record"));
        }
        let reclen = u16::from_ne_bytes([record[16], record[17]]) as usize;
        if reclen < NAME_OFFSET || reclen > record.len() {
            return Err(StressError::verification(format!("bad dirent reclen {}", reclen)));
        }
        let name = &record[NAME_OFFSET..reclen];
        let name = name.split(|b| *b == 0).next().unwrap_or_default();
        if name != b"." && name != b".." {
            count += 1;
        }
        offset += reclen;
    }
    Ok(count)
}

struct ReadDir;

impl Provider<Path, usize> for ReadDir {
    fn name(&self) -> &'static str {
        "readdir"
    }

    fn call(&self, dir: &Path) -> Result<usize> {
        let mut count = 0;
        for entry in fs::read_dir(dir).map_err(|e| StressError::io("opendir", e))? {
            entry.map_err(|e| StressError::io("readdir", e))?;
            count += 1;
        }
        Ok(count)
    }
}
