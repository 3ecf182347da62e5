use atomic::Atomic;
use std::sync::atomic::Ordering;

use crate::util::constants::MIN_OBJECT_ALIGNMENT;
use crate::util::Address;

/// A lock-free bump-pointer space over `[bottom, end)`.
///
/// `top` only moves forward, by CAS, so concurrent allocators never receive overlapping ranges.
/// `end` only moves forward too, when the owning heap commits more memory behind it.
pub struct ContiguousSpace {
    name: &'static str,
    bottom: Address,
    top: Atomic<Address>,
    end: Atomic<Address>,
}

impl ContiguousSpace {
    pub fn new(name: &'static str, bottom: Address, end: Address) -> Self {
        debug_assert!(bottom <= end);
        ContiguousSpace {
            name,
            bottom,
            top: Atomic::new(bottom),
            end: Atomic::new(end),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn bottom(&self) -> Address {
        self.bottom
    }

    pub fn top(&self) -> Address {
        self.top.load(Ordering::Acquire)
    }

    pub fn end(&self) -> Address {
        self.end.load(Ordering::Acquire)
    }

    /// Grow the space to `end`. The memory up to `end` must already be committed.
    pub fn set_end(&self, end: Address) {
        let result = self
            .end
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |old| {
                (old <= end).then_some(end)
            });
        debug_assert!(result.is_ok(), "{} cannot shrink to {}", self.name, end);
    }

    /// Empty the space. The owner must ensure no allocation races with this.
    pub fn reset(&self) {
        self.top.store(self.bottom, Ordering::Release);
    }

    pub fn used(&self) -> usize {
        self.top() - self.bottom
    }

    pub fn capacity(&self) -> usize {
        self.end() - self.bottom
    }

    pub fn free(&self) -> usize {
        self.end() - self.top()
    }

    /// Whether `addr` is in the allocated part of the space.
    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.bottom && addr < self.top()
    }

    /// Bump-allocate `size` bytes. Returns `None` if the space is full up to its current end.
    pub fn par_allocate(&self, size: usize) -> Option<Address> {
        debug_assert!(size % MIN_OBJECT_ALIGNMENT == 0);
        let mut top = self.top.load(Ordering::Relaxed);
        loop {
            let end = self.end.load(Ordering::Acquire);
            if size > end - top {
                trace!("{}: {} bytes do not fit in [{}, {})", self.name, size, top, end);
                return None;
            }
            match self
                .top
                .compare_exchange_weak(top, top + size, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Some(top),
                Err(current) => top = current,
            }
        }
    }
}
