// stress-core/src/mwc.rs
// Multiply-with-carry pseudo-random generator used to randomize stressor parameters

use crate::system;
use tracing::trace;

/// Default `w` word, also used when random seeding is disabled
pub const MWC_SEED_W: u32 = 521_288_629;
/// Default `z` word, also used when random seeding is disabled
pub const MWC_SEED_Z: u32 = 362_436_069;

/// Upper bound (exclusive) of draws discarded after an entropy reseed
const RESEED_DISCARD_MAX: u32 = 1733;

/// Fast, non-cryptographic 32-bit multiply-with-carry generator.
///
/// Every stressor instance owns its own generator through its context;
/// there is no process-wide singleton and no locking. Never use this
/// where unpredictability matters.
#[derive(Debug, Clone)]
pub struct Mwc {
    w: u32,
    z: u32,
    saved1: u32,
    n1: u8,
    saved8: u32,
    n8: u8,
    saved16: u32,
    n16: u8,
}

impl Default for Mwc {
    fn default() -> Self {
        Self::with_seed(MWC_SEED_W, MWC_SEED_Z)
    }
}

impl Mwc {
    /// Create a generator in the default seed state
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a generator with an explicit `(w, z)` state
    pub fn with_seed(w: u32, z: u32) -> Self {
        let mut mwc = Self {
            w,
            z,
            saved1: 0,
            n1: 0,
            saved8: 0,
            n8: 0,
            saved16: 0,
            n16: 0,
        };
        mwc.flush();
        mwc
    }

    /// Set the generator state directly. Deterministic thereafter.
    pub fn seed(&mut self, w: u32, z: u32) {
        self.w = w;
        self.z = z;
        self.flush();
    }

    /// Current `(w, z)` state words
    pub fn seed_values(&self) -> (u32, u32) {
        (self.w, self.z)
    }

    /// Reseed from environmental entropy, or reset to the default
    /// constants when `no_rand_seed` is set.
    pub fn reseed(&mut self, no_rand_seed: bool) {
        if no_rand_seed {
            self.w = MWC_SEED_W;
            self.z = MWC_SEED_Z;
            self.flush();
            return;
        }

        let entropy = system::Entropy::gather();
        let mut z: u32 = (entropy.time_sec ^ entropy.time_usec) as u32;
        let mut w: u32 = (entropy.pid ^ (entropy.ppid << 12)) as u32;

        if let Some((m1, m5, m15)) = entropy.load_avg {
            z = z.wrapping_add((128.0 * (m1 + m15)) as u32);
            w = w.wrapping_add((256.0 * m5) as u32);
        }
        if let Some((sec, usec)) = entropy.utime {
            z = z.wrapping_add(usec as u32);
            w = w.wrapping_add(sec as u32);
        }
        z ^= entropy.cpu;
        w ^= entropy.phys_mem as u32;

        self.w = w;
        self.z = z;

        let discard = self.z % RESEED_DISCARD_MAX;
        for _ in 0..discard {
            self.next32();
        }
        trace!("mwc reseeded, discarded {} draws", discard);
        self.flush();
    }

    fn flush(&mut self) {
        self.saved1 = 0;
        self.n1 = 0;
        self.saved8 = 0;
        self.n8 = 0;
        self.saved16 = 0;
        self.n16 = 0;
    }

    /// Core generator step
    #[inline]
    pub fn next32(&mut self) -> u32 {
        self.z = 36969u32
            .wrapping_mul(self.z & 0xffff)
            .wrapping_add(self.z >> 16);
        self.w = 18000u32
            .wrapping_mul(self.w & 0xffff)
            .wrapping_add(self.w >> 16);
        (self.z << 16).wrapping_add(self.w)
    }

    /// Two 32-bit draws, the first forming the high word
    #[inline]
    pub fn next64(&mut self) -> u64 {
        let hi = self.next32() as u64;
        let lo = self.next32() as u64;
        (hi << 32) | lo
    }

    #[inline]
    pub fn next16(&mut self) -> u16 {
        if self.n16 > 0 {
            self.n16 -= 1;
            self.saved16 >>= 16;
        } else {
            self.saved16 = self.next32();
            self.n16 = 1;
        }
        (self.saved16 & 0xffff) as u16
    }

    /// Eight bits at a time out of a cached 32-bit draw, low byte first
    #[inline]
    pub fn next8(&mut self) -> u8 {
        if self.n8 > 0 {
            self.n8 -= 1;
            self.saved8 >>= 8;
        } else {
            self.saved8 = self.next32();
            self.n8 = 3;
        }
        (self.saved8 & 0xff) as u8
    }

    #[inline]
    pub fn next1(&mut self) -> bool {
        if self.n1 > 0 {
            self.n1 -= 1;
            self.saved1 >>= 1;
        } else {
            self.saved1 = self.next32();
            self.n1 = 31;
        }
        self.saved1 & 1 == 1
    }

    /// Value in `[0, max)`; a bound of 0 or 1 yields 0
    #[inline]
    pub fn next8_modn(&mut self, max: u8) -> u8 {
        if max < 2 {
            return 0;
        }
        self.next8() % max
    }

    /// Value in `[0, max)`; a bound of 0 or 1 yields 0
    #[inline]
    pub fn next16_modn(&mut self, max: u16) -> u16 {
        if max < 2 {
            return 0;
        }
        self.next16() % max
    }

    /// Value in `[0, max)`; a bound of 0 or 1 yields 0
    #[inline]
    pub fn next32_modn(&mut self, max: u32) -> u32 {
        if max < 2 {
            return 0;
        }
        self.next32() % max
    }

    /// Value in `[0, max)`; a bound of 0 or 1 yields 0
    #[inline]
    pub fn next64_modn(&mut self, max: u64) -> u64 {
        if max < 2 {
            return 0;
        }
        self.next64() % max
    }

    /// Value in `[min, max]` inclusive. Bounds given in either order.
    pub fn next32_range(&mut self, min: u32, max: u32) -> u32 {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        match (hi - lo).checked_add(1) {
            Some(span) => lo + self.next32_modn(span),
            None => self.next32(),
        }
    }

    /// Value in `[min, max]` inclusive. Bounds given in either order.
    pub fn next64_range(&mut self, min: u64, max: u64) -> u64 {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        match (hi - lo).checked_add(1) {
            Some(span) => lo + self.next64_modn(span),
            None => self.next64(),
        }
    }

    /// Index into a collection of `len` elements; 0 when `len` is 0
    pub fn pick(&mut self, len: usize) -> usize {
        self.next64_modn(len as u64) as usize
    }

    pub fn fill_bytes(&mut self, buf: &mut [u8]) {
        for byte in buf.iter_mut() {
            *byte = self.next8();
        }
    }

    /// Fill with printable ASCII and NUL-terminate in the last byte
    pub fn fill_printable(&mut self, buf: &mut [u8]) {
        let Some((last, body)) = buf.split_last_mut() else {
            return;
        };
        for byte in body.iter_mut() {
            *byte = self.printable_byte();
        }
        *last = 0;
    }

    /// Owned printable string of exactly `len` characters, no terminator
    pub fn printable_string(&mut self, len: usize) -> String {
        (0..len).map(|_| self.printable_byte() as char).collect()
    }

    #[inline]
    fn printable_byte(&mut self) -> u8 {
        b' ' + self.next8_modn(95)
    }
}
