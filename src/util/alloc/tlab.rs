//! Thread-local allocation buffers.
//!
//! A [`Tlab`] is a range of a space owned by one mutator, who bump-allocates from it without
//! synchronization. When it is exhausted the mutator retires it and asks the heap for a new one;
//! [`TlabErgonomics`] decides how big the new one is.

use crate::util::constants::MIN_OBJECT_ALIGNMENT;
use crate::util::conversions::raw_align_up;
use crate::util::options::Options;
use crate::util::Address;
use std::time::{Duration, Instant};

/// How much bigger a TLAB gets each time a thread exhausts one.
pub const TLAB_ELASTICITY: usize = 2;

#[repr(C)]
pub struct Tlab {
    pub cursor: Address,
    pub limit: Address,
    start: Address,
}

impl Default for Tlab {
    fn default() -> Self {
        Self::new()
    }
}

impl Tlab {
    pub const fn new() -> Self {
        Tlab {
            cursor: unsafe { Address::zero() },
            limit: unsafe { Address::zero() },
            start: unsafe { Address::zero() },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_zero()
    }

    pub fn reset(&mut self, start: Address, size: usize) {
        self.start = start;
        self.cursor = start;
        self.limit = start + size;
    }

    #[inline(always)]
    pub fn alloc(&mut self, size: usize) -> Option<Address> {
        debug_assert!(size % MIN_OBJECT_ALIGNMENT == 0);
        let result = self.cursor;
        let new_cursor = result + size;
        if new_cursor > self.limit || self.is_empty() {
            None
        } else {
            self.cursor = new_cursor;
            trace!(
                "TLAB allocation size: {}, result: {}, new_cursor: {}, limit: {}",
                size,
                result,
                self.cursor,
                self.limit
            );
            Some(result)
        }
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn size(&self) -> usize {
        self.limit - self.start
    }

    pub fn used_bytes(&self) -> usize {
        self.cursor - self.start
    }

    pub fn free_bytes(&self) -> usize {
        self.limit - self.cursor
    }

    /// Give up the buffer. Returns `(start, cursor, limit)` of the retired buffer, if there was one.
    pub fn retire(&mut self) -> Option<(Address, Address, Address)> {
        if self.is_empty() {
            return None;
        }
        let retired = (self.start, self.cursor, self.limit);
        *self = Tlab::new();
        Some(retired)
    }
}

/// Per-thread TLAB sizing state.
///
/// Each refill asks for `TLAB_ELASTICITY` times the previous TLAB size, bounded by
/// `[MinTLABSize, MaxTLABSize]`. With `ElasticTLABDecay`, a thread that has not refilled for
/// `TLABDecayTime` starts over from the minimum.
#[derive(Debug, Default)]
pub struct TlabErgonomics {
    ergo_size: usize,
    last_refill: Option<Instant>,
    refills: usize,
}

impl TlabErgonomics {
    pub fn new() -> Self {
        Self::default()
    }

    /// The size of the last TLAB handed out, or 0 before the first refill and after a decay.
    pub fn ergo_size(&self) -> usize {
        self.ergo_size
    }

    pub fn refills(&self) -> usize {
        self.refills
    }

    /// The size of the next TLAB for a thread that needs at least `min_size` bytes, capped at
    /// `max_size` (the heap's limit, which may be below `MaxTLABSize`).
    ///
    /// Returns `None` if `min_size` does not fit under the cap. The caller then allocates outside
    /// of TLABs.
    pub fn next_size(&mut self, min_size: usize, max_size: usize, options: &Options) -> Option<usize> {
        let max_size = max_size.min(*options.max_tlab_size);
        if min_size > max_size {
            return None;
        }
        let lower = min_size.max(*options.min_tlab_size).min(max_size);
        if !options.elastic_tlab {
            return Some(raw_align_up(lower, MIN_OBJECT_ALIGNMENT));
        }
        if options.elastic_tlab_decay {
            let decay = Duration::from_millis(options.tlab_decay_time);
            if self.last_refill.map_or(false, |last| last.elapsed() > decay) {
                trace!("TLAB size decays from {}", self.ergo_size);
                self.ergo_size = 0;
            }
        }
        let size = (self.ergo_size * TLAB_ELASTICITY).clamp(lower, max_size);
        Some(raw_align_up(size, MIN_OBJECT_ALIGNMENT))
    }

    /// Record that the heap handed out a TLAB of `size` bytes.
    pub fn record_refill(&mut self, size: usize) {
        self.ergo_size = size;
        self.last_refill = Some(Instant::now());
        self.refills += 1;
    }

    #[cfg(test)]
    pub(crate) fn age_by(&mut self, by: Duration) {
        self.last_refill = self.last_refill.and_then(|t| t.checked_sub(by));
    }
}
