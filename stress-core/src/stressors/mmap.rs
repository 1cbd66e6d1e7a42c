// stress-core/src/stressors/mmap.rs
// Anonymous and file-backed mappings: map, touch, mprotect, verify, unmap

use crate::context::StressContext;
use crate::error::*;
use crate::harness::{Step, Stressor, StressorClass, Workload};
use crate::metrics::Reduction;
use crate::system;
use memmap2::MmapMut;
use std::fs::File;
use std::io::Read;
use std::ptr::{self, NonNull};
use std::time::Instant;
use tempfile::NamedTempFile;

/// Ops between two file-backed mapping rounds
const FILE_MAP_INTERVAL: u64 = 16;
const FILE_MAP_PAGES: usize = 4;

pub struct Mmap;

impl Stressor for Mmap {
    fn name(&self) -> &'static str {
        "mmap"
    }

    fn help(&self) -> &'static str {
        "map, touch, protect, verify and unmap anonymous memory"
    }

    fn class(&self) -> StressorClass {
        StressorClass::Memory
    }

    fn setup(&self, ctx: &mut StressContext<'_>) -> Result<Box<dyn Workload>> {
        let page_size = ctx.page_size();
        let max_pages = (ctx.options().mmap_bytes / page_size).max(1);
        let backing = system::scratch_file(self.name(), ctx.instance())
            .map_err(|e| StressError::io("open mmap backing file", e))?;
        backing
            .as_file()
            .set_len((page_size * FILE_MAP_PAGES) as u64)
            .map_err(|e| StressError::io("ftruncate", e))?;

        Ok(Box::new(MmapWorkload {
            page_size,
            max_pages,
            backing,
        }))
    }
}

/// Private anonymous mapping, unmapped on drop
struct AnonMapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl AnonMapping {
    fn new(len: usize) -> Result<Self> {
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(StressError::last_errno("mmap"));
        }
        let ptr = NonNull::new(addr as *mut u8).ok_or_else(|| StressError::verification("mmap returned NULL"))?;
        Ok(Self { ptr, len })
    }

    fn protect(&self, prot: libc::c_int) -> Result<()> {
        let rc = unsafe { libc::mprotect(self.ptr.as_ptr() as *mut libc::c_void, self.len, prot) };
        if rc < 0 {
            return Err(StressError::last_errno("mprotect"));
        }
        Ok(())
    }

    fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AnonMapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

struct MmapWorkload {
    page_size: usize,
    max_pages: usize,
    /// File behind the shared mapping, removed on drop
    backing: NamedTempFile,
}

/// Per-page stamp: page index mixed with a per-op tag
fn stamp(page: usize, tag: u64) -> u64 {
    (page as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15) ^ tag
}

impl MmapWorkload {
    fn anonymous_round(&self, ctx: &mut StressContext<'_>) -> Result<()> {
        let pages = 1 + ctx.mwc.pick(self.max_pages);
        let mut mapping = AnonMapping::new(pages * self.page_size)?;
        let tag = ctx.mwc.next64();

        for (page, chunk) in mapping.as_mut_slice().chunks_exact_mut(self.page_size).enumerate() {
            chunk[..8].copy_from_slice(&stamp(page, tag).to_ne_bytes());
        }

        if ctx.mwc.next1() {
            mapping.protect(libc::PROT_READ)?;
        }

        if ctx.verify() {
            for (page, chunk) in mapping.as_slice().chunks_exact(self.page_size).enumerate() {
                let mut word = [0u8; 8];
                word.copy_from_slice(&chunk[..8]);
                let expected = stamp(page, tag);
                let found = u64::from_ne_bytes(word);
                if found != expected {
                    return Err(StressError::verification(format!(
                        "page {} of {}: found {:#x}, expected {:#x}",
                        page, pages, found, expected
                    )));
                }
            }
        }
        Ok(())
    }

    fn file_round(&mut self, ctx: &mut StressContext<'_>) -> Result<()> {
        let len = self.page_size * FILE_MAP_PAGES;
        let mut map = unsafe { MmapMut::map_mut(self.backing.as_file()) }.map_err(|e| StressError::io("mmap file", e))?;
        let mut pattern = vec![0u8; len];
        ctx.mwc.fill_bytes(&mut pattern);
        map.copy_from_slice(&pattern);
        map.flush().map_err(|e| StressError::io("msync", e))?;
        drop(map);

        if ctx.verify() {
            let mut contents = Vec::with_capacity(len);
            File::open(self.backing.path())
                .and_then(|mut f| f.read_to_end(&mut contents))
                .map_err(|e| StressError::io("read mmap backing file", e))?;
            if contents != pattern {
                return Err(StressError::verification("flushed file mapping does not match file contents"));
            }
        }
        Ok(())
    }
}

impl Workload for MmapWorkload {
    fn step(&mut self, ctx: &mut StressContext<'_>) -> Result<Step> {
        let start = Instant::now();
        self.anonymous_round(ctx)?;
        if ctx.bogo_get() % FILE_MAP_INTERVAL == FILE_MAP_INTERVAL - 1 {
            self.file_round(ctx)?;
        }
        ctx.metrics.add("mappings per sec", Reduction::HarmonicMean, start.elapsed(), 1.0);
        Ok(Step::Op)
    }
}
