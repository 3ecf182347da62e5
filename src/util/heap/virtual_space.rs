use crate::util::constants::BYTES_IN_PAGE;
use crate::util::conversions::raw_is_aligned;
use crate::util::error::HeapError;
use crate::util::memory;
use crate::util::Address;
use atomic::Atomic;
use std::sync::atomic::Ordering;

/// A reserved address range with a committed prefix.
///
/// ```text
/// low                 high                                  high_boundary
///  |---- committed ----|----------- reserved only -------------|
/// ```
///
/// The committed prefix only grows, by [`VirtualSpace::expand_by`], which the owner calls under
/// its heap lock. `high` is published with release ordering after the memory is committed, so a
/// lock-free reader that sees the new `high` can use the memory below it.
pub struct VirtualSpace {
    mapping: Address,
    alignment: usize,
    low: Address,
    high: Atomic<Address>,
    high_boundary: Address,
}

impl VirtualSpace {
    /// Reserve `reserved` bytes aligned to `alignment` and commit the first `committed` bytes.
    pub fn new(reserved: usize, committed: usize, alignment: usize) -> Result<Self, HeapError> {
        debug_assert!(alignment.is_power_of_two() && alignment >= BYTES_IN_PAGE);
        debug_assert!(raw_is_aligned(reserved, BYTES_IN_PAGE));
        debug_assert!(committed <= reserved);
        let (mapping, low) = memory::reserve(reserved, alignment).map_err(|source| {
            HeapError::ReservationFailure {
                bytes: reserved,
                source,
            }
        })?;
        let space = VirtualSpace {
            mapping,
            alignment,
            low,
            high: Atomic::new(low),
            high_boundary: low + reserved,
        };
        if committed > 0 {
            space.expand_by(committed)?;
        }
        debug!(
            "Reserved [{}, {}), committed {} bytes",
            space.low, space.high_boundary, committed
        );
        Ok(space)
    }

    pub fn low(&self) -> Address {
        self.low
    }

    /// End of the committed range.
    pub fn high(&self) -> Address {
        self.high.load(Ordering::Acquire)
    }

    pub fn high_boundary(&self) -> Address {
        self.high_boundary
    }

    pub fn committed_size(&self) -> usize {
        self.high() - self.low
    }

    pub fn reserved_size(&self) -> usize {
        self.high_boundary - self.low
    }

    pub fn uncommitted_size(&self) -> usize {
        self.high_boundary - self.high()
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.low && addr < self.high_boundary
    }

    /// Commit the next `bytes` bytes. Callers serialize expansion.
    pub fn expand_by(&self, bytes: usize) -> Result<(), HeapError> {
        let high = self.high();
        debug_assert!(raw_is_aligned(bytes, BYTES_IN_PAGE));
        if bytes > self.high_boundary - high {
            return Err(HeapError::ExpansionFailure {
                start: high,
                bytes,
                source: std::io::Error::from_raw_os_error(libc::ENOMEM),
            });
        }
        memory::commit(high, bytes).map_err(|source| HeapError::ExpansionFailure {
            start: high,
            bytes,
            source,
        })?;
        self.high.store(high + bytes, Ordering::Release);
        Ok(())
    }

    /// Drop the contents of a committed range and make it read as zero again.
    pub fn clear_range(&self, start: Address, bytes: usize) -> std::io::Result<()> {
        debug_assert!(start >= self.low && start + bytes <= self.high());
        memory::uncommit(start, bytes)?;
        memory::commit(start, bytes)
    }
}

impl Drop for VirtualSpace {
    fn drop(&mut self) {
        if let Err(e) = memory::release(self.mapping, self.reserved_size(), self.alignment) {
            warn!("Failed to release the heap reservation at {}: {}", self.low, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::*;

    #[test]
    fn reserve_and_expand() {
        let vs = VirtualSpace::new(4 * BYTES_IN_MBYTE, BYTES_IN_MBYTE, BYTES_IN_PAGE).unwrap();
        assert_eq!(vs.reserved_size(), 4 * BYTES_IN_MBYTE);
        assert_eq!(vs.committed_size(), BYTES_IN_MBYTE);
        assert_eq!(vs.uncommitted_size(), 3 * BYTES_IN_MBYTE);
        vs.expand_by(3 * BYTES_IN_MBYTE).unwrap();
        assert_eq!(vs.high(), vs.high_boundary());
        unsafe {
            (vs.high() - BYTES_IN_WORD).store(1usize);
        }
        assert!(matches!(
            vs.expand_by(BYTES_IN_PAGE),
            Err(HeapError::ExpansionFailure { .. })
        ));
    }

    #[test]
    fn aligned_reservation() {
        let vs = VirtualSpace::new(2 * BYTES_IN_MBYTE, 0, BYTES_IN_MBYTE).unwrap();
        assert!(vs.low().is_aligned_to(BYTES_IN_MBYTE));
        assert!(vs.contains(vs.low()));
        assert!(!vs.contains(vs.high_boundary()));
    }

    #[test]
    fn clear_range() {
        let vs = VirtualSpace::new(BYTES_IN_MBYTE, BYTES_IN_MBYTE, BYTES_IN_PAGE).unwrap();
        unsafe { vs.low().store(5usize) };
        vs.clear_range(vs.low(), BYTES_IN_PAGE).unwrap();
        assert_eq!(unsafe { vs.low().load::<usize>() }, 0);
    }
}
