use std::sync::atomic::{AtomicUsize, Ordering};

use super::region::*;
use crate::util::constants::*;
use crate::util::conversions::{self, raw_align_up};
use crate::util::error::HeapError;
use crate::util::heap::VirtualSpace;
use crate::util::options::Options;
use crate::util::{memory, Address};

const NO_REGION: usize = usize::MAX;

/// Who an allocation is for. Mutator allocations may not dip into the evacuation reserve.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocKind {
    /// A new TLAB. The region counts it as active until it is retired.
    Tlab,
    /// A single object outside of TLABs.
    Shared,
    /// A to-space copy made by a collector worker or a load-reference barrier.
    Evacuation,
}

/// The heap of the concurrent collector: a reserved range cut into equally sized regions.
///
/// Regions are committed in address order as the heap grows and never uncommitted. Mutators and
/// evacuation each bump-allocate in their own current region without locking. Replacing a full
/// current region takes the heap lock.
pub struct RegionSpace {
    vs: VirtualSpace,
    region_size: usize,
    log_region_size: usize,
    regions: Vec<Region>,
    committed_regions: AtomicUsize,
    /// Regions only evacuation may take.
    reserve_regions: usize,
    mutator_region: AtomicUsize,
    evac_region: AtomicUsize,
    lock: spin::Mutex<()>,
    used: AtomicUsize,
}

impl RegionSpace {
    pub fn new(options: &Options) -> Result<Self, HeapError> {
        let region_size = *options.region_size;
        let reserved = raw_align_up(*options.max_heap_size, region_size);
        let committed = raw_align_up(*options.initial_heap_size, region_size);
        let vs = VirtualSpace::new(reserved, committed, region_size)?;
        let max_regions = reserved / region_size;
        let regions = (0..max_regions)
            .map(|i| Region::new(i, vs.low() + i * region_size, region_size))
            .collect();
        let reserve_regions = (max_regions * options.evac_reserve).div_ceil(100);
        info!(
            "Region space: {} regions of {}, {} committed, {} reserved for evacuation",
            max_regions,
            conversions::bytes_to_formatted_string(region_size),
            committed / region_size,
            reserve_regions
        );
        Ok(RegionSpace {
            vs,
            region_size,
            log_region_size: region_size.trailing_zeros() as usize,
            regions,
            committed_regions: AtomicUsize::new(committed / region_size),
            reserve_regions,
            mutator_region: AtomicUsize::new(NO_REGION),
            evac_region: AtomicUsize::new(NO_REGION),
            lock: spin::Mutex::new(()),
            used: AtomicUsize::new(0),
        })
    }

    pub fn region_size(&self) -> usize {
        self.region_size
    }

    pub fn max_regions(&self) -> usize {
        self.regions.len()
    }

    /// The committed regions.
    pub fn regions(&self) -> &[Region] {
        &self.regions[..self.committed_regions.load(Ordering::Acquire)]
    }

    pub fn region(&self, index: usize) -> &Region {
        &self.regions[index]
    }

    pub fn region_of(&self, addr: Address) -> Option<&Region> {
        if addr < self.vs.low() || addr >= self.vs.high() {
            return None;
        }
        Some(&self.regions[(addr - self.vs.low()) >> self.log_region_size])
    }

    /// Whether `addr` is in the allocated part of some region.
    pub fn is_in(&self, addr: Address) -> bool {
        self.region_of(addr)
            .map_or(false, |r| !r.is_empty() && addr < r.top())
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.vs.committed_size()
    }

    pub fn max_capacity(&self) -> usize {
        self.vs.reserved_size()
    }

    /// Regions that mutators may still take: empty committed ones plus uncommitted ones, minus the
    /// evacuation reserve.
    pub fn mutator_free_regions(&self) -> usize {
        self.free_regions().saturating_sub(self.reserve_regions)
    }

    /// Regions evacuation may still take: empty committed ones plus uncommitted ones.
    pub fn free_regions(&self) -> usize {
        let empty = self.regions().iter().filter(|r| r.is_empty()).count();
        empty + self.max_regions() - self.committed_regions.load(Ordering::Acquire)
    }

    fn current_region(&self, kind: AllocKind) -> &AtomicUsize {
        match kind {
            AllocKind::Evacuation => &self.evac_region,
            AllocKind::Tlab | AllocKind::Shared => &self.mutator_region,
        }
    }

    /// Whether the region is one of the current allocation regions.
    pub fn is_alloc_region(&self, region: &Region) -> bool {
        let index = region.index();
        self.mutator_region.load(Ordering::Acquire) == index
            || self.evac_region.load(Ordering::Acquire) == index
    }

    /// Allocate `size` bytes. Returns `None` if no region can hold it.
    pub fn allocate(&self, size: usize, kind: AllocKind) -> Option<Address> {
        if size > self.region_size {
            debug!("{} bytes do not fit in a region", size);
            return None;
        }
        let current = self.current_region(kind);
        loop {
            let index = current.load(Ordering::Acquire);
            if index != NO_REGION {
                let region = &self.regions[index];
                if let Some(addr) = region.par_allocate(size) {
                    if kind == AllocKind::Tlab {
                        region.tlab_allocated();
                    }
                    self.used.fetch_add(size, Ordering::Relaxed);
                    return Some(addr);
                }
            }
            let _lock = self.lock.lock();
            if current.load(Ordering::Relaxed) != index {
                // Someone else replaced the region.
                continue;
            }
            let region = self.take_empty_region(kind)?;
            current.store(region.index(), Ordering::Release);
        }
    }

    /// Take an empty region, committing a new one if there is none. The heap lock must be held.
    fn take_empty_region(&self, kind: AllocKind) -> Option<&Region> {
        if kind != AllocKind::Evacuation && self.free_regions() <= self.reserve_regions {
            debug!("No free region outside the evacuation reserve");
            return None;
        }
        let region = match self.regions().iter().find(|r| r.is_empty()) {
            Some(region) => region,
            None => {
                let committed = self.committed_regions.load(Ordering::Relaxed);
                if committed == self.max_regions() {
                    return None;
                }
                if let Err(e) = self.vs.expand_by(self.region_size) {
                    warn!("{}", e);
                    return None;
                }
                self.committed_regions.store(committed + 1, Ordering::Release);
                debug!(
                    "Heap grows to {}",
                    conversions::bytes_to_proper_unit(self.capacity())
                );
                &self.regions[committed]
            }
        };
        region.make_allocating();
        trace!("{:?} takes {:?}", kind, region);
        Some(region)
    }

    /// A TLAB that started at `start` was retired.
    pub fn retire_tlab(&self, start: Address) {
        match self.region_of(start) {
            Some(region) => region.tlab_retired(),
            None => warn!("Retiring a TLAB at {} outside of the heap", start),
        }
    }

    /// Zero a relocated region and return it to `Empty`.
    pub fn recycle(&self, region: &Region) {
        let used = region.used();
        if let Err(e) = self.vs.clear_range(region.start(), self.region_size) {
            debug!("Cannot remap region {}: {}. Zeroing instead.", region.index(), e);
            memory::zero(region.start(), used);
        }
        region.recycle();
        self.used.fetch_sub(used, Ordering::Relaxed);
    }

    /// Indices of the regions whose card mark was set since the last call. Clears the marks.
    pub fn take_dirty_regions(&self) -> Vec<usize> {
        self.regions()
            .iter()
            .filter(|r| r.take_dirty())
            .map(|r| r.index())
            .collect()
    }

    pub fn verify(&self) -> Result<(), HeapError> {
        let fail = |msg: String| Err(HeapError::Verification(msg));
        let mut used = 0;
        for region in self.regions() {
            if region.top() > region.end() || region.top() < region.start() {
                return fail(format!("top out of bounds: {:?}", region));
            }
            if region.is_empty() && (region.used() != 0 || region.object_count() != 0) {
                return fail(format!("empty region holds objects: {:?}", region));
            }
            used += region.used();
        }
        if used > self.capacity() || self.capacity() > self.max_capacity() {
            return fail(format!(
                "used {} capacity {} max {}",
                used,
                self.capacity(),
                self.max_capacity()
            ));
        }
        Ok(())
    }
}
