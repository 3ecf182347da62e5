use std::sync::atomic::{AtomicUsize, Ordering};

use crate::codegen::StubTable;
use crate::plan::global::{CollectedHeap, GCCause, PlanConstraints};
use crate::policy::contiguous_space::ContiguousSpace;
use crate::util::alloc::TlabErgonomics;
use crate::util::constants::*;
use crate::util::conversions::{self, raw_align_down, raw_align_up};
use crate::util::error::HeapError;
use crate::util::heap::VirtualSpace;
use crate::util::monitoring::MonitoringSupport;
use crate::util::options::Options;
use crate::util::roots::RootSet;
use crate::util::Address;

pub const EPSILON_CONSTRAINTS: PlanConstraints = PlanConstraints::default();

pub struct Epsilon {
    options: Options,
    vs: VirtualSpace,
    space: ContiguousSpace,
    /// Serializes expansion. The allocation fast path never takes it.
    heap_lock: spin::Mutex<()>,
    max_tlab_size: usize,
    step_counter_update: usize,
    step_heap_print: usize,
    last_counter_update: AtomicUsize,
    last_heap_print: AtomicUsize,
    monitoring: MonitoringSupport,
    roots: RootSet,
    stubs: StubTable,
}

impl Epsilon {
    pub fn new(options: Options) -> Result<Self, HeapError> {
        options.validate()?;
        let reserved = raw_align_up(*options.max_heap_size, BYTES_IN_PAGE);
        let committed = raw_align_up(*options.initial_heap_size, BYTES_IN_PAGE);
        let vs = VirtualSpace::new(reserved, committed, BYTES_IN_PAGE)?;
        let space = ContiguousSpace::new("epsilon", vs.low(), vs.high());
        let step_heap_print = match options.print_heap_steps {
            0 => usize::MAX,
            steps => reserved / steps,
        };
        let heap = Epsilon {
            max_tlab_size: raw_align_down(*options.max_tlab_size, MIN_OBJECT_ALIGNMENT),
            step_counter_update: *options.update_counters_step,
            step_heap_print,
            last_counter_update: AtomicUsize::new(0),
            last_heap_print: AtomicUsize::new(0),
            monitoring: MonitoringSupport::new("Epsilon Heap", "Epsilon Heap"),
            roots: RootSet::new(),
            stubs: StubTable::for_constraints(&EPSILON_CONSTRAINTS),
            heap_lock: spin::Mutex::new(()),
            options,
            vs,
            space,
        };
        heap.monitoring
            .update_counters(0, heap.capacity(), heap.max_capacity());
        if committed == reserved {
            info!("Non-resizeable heap; start/max: {}", conversions::bytes_to_proper_unit(reserved));
        } else {
            info!(
                "Resizeable heap; starting at {}, max: {}, step: {}",
                conversions::bytes_to_proper_unit(committed),
                conversions::bytes_to_proper_unit(reserved),
                conversions::bytes_to_proper_unit(*heap.options.min_heap_expand)
            );
        }
        info!(
            "Using TLAB allocation; max: {}, elastic: {}",
            conversions::bytes_to_proper_unit(heap.max_tlab_size),
            heap.options.elastic_tlab
        );
        Ok(heap)
    }

    /// Bump-allocate `size` bytes, expanding the heap if needed.
    fn allocate_work(&self, size: usize) -> Option<Address> {
        if size > self.max_capacity() {
            debug!("Cannot allocate {} bytes: larger than the heap", size);
            return None;
        }
        let result = loop {
            if let Some(addr) = self.space.par_allocate(size) {
                break addr;
            }
            let _lock = self.heap_lock.lock();
            // Another thread may have expanded the heap while we waited for the lock.
            if let Some(addr) = self.space.par_allocate(size) {
                break addr;
            }
            let space_left = self.vs.uncommitted_size();
            let want_space = raw_align_up(size.max(*self.options.min_heap_expand), BYTES_IN_PAGE);
            let needed = raw_align_up(size.saturating_sub(self.space.free()), BYTES_IN_PAGE);
            let expand = if want_space <= space_left {
                want_space
            } else if needed <= space_left && space_left > 0 {
                space_left
            } else {
                debug!(
                    "Cannot allocate {} bytes: {} committed of {}",
                    size,
                    conversions::bytes_to_proper_unit(self.capacity()),
                    conversions::bytes_to_proper_unit(self.max_capacity())
                );
                return None;
            };
            if let Err(e) = self.vs.expand_by(expand) {
                warn!("{}", e);
                return None;
            }
            self.space.set_end(self.vs.high());
            debug!(
                "Heap expanded by {} to {}",
                conversions::bytes_to_proper_unit(expand),
                conversions::bytes_to_proper_unit(self.capacity())
            );
        };

        let used = self.space.used();
        self.maybe_update_counters(used);
        self.maybe_print_heap(used);
        Some(result)
    }

    fn maybe_update_counters(&self, used: usize) {
        let last = self.last_counter_update.load(Ordering::Relaxed);
        // Only the thread that moves the mark forward refreshes the counters.
        if used.saturating_sub(last) >= self.step_counter_update
            && self
                .last_counter_update
                .compare_exchange(last, used, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            self.update_counters();
        }
    }

    fn maybe_print_heap(&self, used: usize) {
        let last = self.last_heap_print.load(Ordering::Relaxed);
        if used.saturating_sub(last) >= self.step_heap_print
            && self
                .last_heap_print
                .compare_exchange(last, used, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            self.print_heap_info(used);
        }
    }

    fn update_counters(&self) {
        self.monitoring
            .update_counters(self.used(), self.capacity(), self.max_capacity());
    }

    fn print_heap_info(&self, used: usize) {
        let reserved = self.max_capacity();
        let committed = self.capacity();
        info!(
            "Heap: {} reserved, {} ({:.2}%) committed, {} ({:.2}%) used",
            conversions::bytes_to_proper_unit(reserved),
            conversions::bytes_to_proper_unit(committed),
            conversions::percent_of(committed, reserved),
            conversions::bytes_to_proper_unit(used),
            conversions::percent_of(used, reserved)
        );
    }
}

impl CollectedHeap for Epsilon {
    fn name(&self) -> &'static str {
        "Epsilon"
    }

    fn constraints(&self) -> &'static PlanConstraints {
        &EPSILON_CONSTRAINTS
    }

    fn options(&self) -> &Options {
        &self.options
    }

    fn allocate(&self, size: usize) -> Option<Address> {
        debug_assert!(size % MIN_OBJECT_ALIGNMENT == 0);
        self.allocate_work(size)
    }

    fn allocate_new_tlab(
        &self,
        ergonomics: &mut TlabErgonomics,
        min_size: usize,
    ) -> Option<(Address, usize)> {
        let size = ergonomics.next_size(min_size, self.max_tlab_size, &self.options)?;
        let start = self.allocate_work(size)?;
        ergonomics.record_refill(size);
        Some((start, size))
    }

    fn collect(&self, cause: GCCause) {
        info!("GC request for \"{}\" is ignored", cause);
        self.update_counters();
    }

    fn capacity(&self) -> usize {
        self.vs.committed_size()
    }

    fn used(&self) -> usize {
        self.space.used()
    }

    fn max_capacity(&self) -> usize {
        self.vs.reserved_size()
    }

    fn unsafe_max_tlab_alloc(&self) -> usize {
        self.max_tlab_size
    }

    fn is_in(&self, addr: Address) -> bool {
        self.space.contains(addr)
    }

    fn monitoring(&self) -> &MonitoringSupport {
        &self.monitoring
    }

    fn verify(&self) -> Result<(), HeapError> {
        let (used, capacity, max) = (self.used(), self.capacity(), self.max_capacity());
        if used > capacity || capacity > max {
            return Err(HeapError::Verification(format!(
                "used {} capacity {} max {}",
                used, capacity, max
            )));
        }
        if self.space.end() != self.vs.high() {
            return Err(HeapError::Verification(format!(
                "space ends at {} but memory is committed up to {}",
                self.space.end(),
                self.vs.high()
            )));
        }
        Ok(())
    }

    fn heap_info(&self) -> String {
        format!(
            "Epsilon heap [{}, {}): reserved {}, committed {}, used {}",
            self.vs.low(),
            self.vs.high_boundary(),
            conversions::bytes_to_proper_unit(self.max_capacity()),
            conversions::bytes_to_proper_unit(self.capacity()),
            conversions::bytes_to_proper_unit(self.used())
        )
    }

    fn roots(&self) -> &RootSet {
        &self.roots
    }

    fn stub_table(&self) -> &StubTable {
        &self.stubs
    }
}

impl Drop for Epsilon {
    fn drop(&mut self) {
        info!("{}", self.heap_info());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::options_with;

    fn epsilon(settings: &[(&str, &str)]) -> Epsilon {
        Epsilon::new(options_with(settings)).unwrap()
    }

    #[test]
    fn allocation_expands_then_fails_at_max() {
        let heap = epsilon(&[
            ("InitialHeapSize", "64K"),
            ("MaxHeapSize", "256K"),
            ("MinHeapExpand", "64K"),
        ]);
        assert_eq!(heap.capacity(), 64 * BYTES_IN_KBYTE);
        let mut last = Address::ZERO;
        for _ in 0..4 * 16 {
            let addr = heap.allocate(4 * BYTES_IN_KBYTE).unwrap();
            assert!(addr > last);
            last = addr;
            assert!(heap.used() <= heap.capacity());
            assert!(heap.capacity() <= heap.max_capacity());
        }
        assert_eq!(heap.capacity(), heap.max_capacity());
        assert!(heap.allocate(8).is_none());
        heap.verify().unwrap();
    }

    #[test]
    fn last_expansion_takes_what_is_left() {
        let heap = epsilon(&[
            ("InitialHeapSize", "64K"),
            ("MaxHeapSize", "96K"),
            ("MinHeapExpand", "64K"),
        ]);
        heap.allocate(64 * BYTES_IN_KBYTE).unwrap();
        // MinHeapExpand does not fit any more, the remaining 32K do.
        heap.allocate(16 * BYTES_IN_KBYTE).unwrap();
        assert_eq!(heap.capacity(), 96 * BYTES_IN_KBYTE);
        assert!(heap.allocate(32 * BYTES_IN_KBYTE).is_none());
    }

    #[test]
    fn requests_larger_than_the_heap_fail_at_once() {
        let heap = epsilon(&[("InitialHeapSize", "64K"), ("MaxHeapSize", "256K")]);
        // Rounding these up to the page size would wrap around.
        assert!(heap.allocate(usize::MAX & !(MIN_OBJECT_ALIGNMENT - 1)).is_none());
        assert!(heap.allocate(usize::MAX - BYTES_IN_PAGE + 1).is_none());
        assert!(heap.allocate(heap.max_capacity() + MIN_OBJECT_ALIGNMENT).is_none());
        assert_eq!(heap.capacity(), 64 * BYTES_IN_KBYTE);
        assert_eq!(heap.used(), 0);
        heap.allocate(8).unwrap();
    }

    #[test]
    fn tlab_sizes_stay_in_bounds() {
        let heap = epsilon(&[("MinTLABSize", "4K"), ("MaxTLABSize", "16K")]);
        let mut ergo = TlabErgonomics::new();
        let sizes: Vec<usize> = (0..5)
            .map(|_| heap.allocate_new_tlab(&mut ergo, 64).unwrap().1)
            .collect();
        assert_eq!(sizes, vec![4096, 8192, 16384, 16384, 16384]);
        assert_eq!(heap.unsafe_max_tlab_alloc(), 16 * BYTES_IN_KBYTE);
        // Larger than any TLAB.
        assert!(heap.allocate_new_tlab(&mut ergo, 32 * BYTES_IN_KBYTE).is_none());
    }

    #[test]
    fn collect_only_refreshes_counters() {
        let heap = epsilon(&[("UpdateCountersStep", "1G")]);
        heap.allocate(1024).unwrap();
        assert_eq!(heap.monitoring().memory_pool().usage().used, 0);
        heap.collect(GCCause::UserRequested);
        assert_eq!(heap.used(), 1024);
        let usage = heap.monitoring().memory_pool().usage();
        assert_eq!(usage.used, 1024);
        assert_eq!(usage.committed, heap.capacity());
        assert_eq!(heap.monitoring().memory_manager().collection_count(), 0);
    }

    #[test]
    fn no_barrier_stubs() {
        let heap = epsilon(&[]);
        assert!(heap.stub_table().is_empty());
        assert!(heap.handshake().is_none());
    }
}
