use atomic::Atomic;
use bytemuck::NoUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::RegionBitmap;
use crate::policy::contiguous_space::ContiguousSpace;
use crate::util::error::protocol_violation;
use crate::util::{object_model, Address, ObjectReference};

/// Lifecycle of a region.
///
/// ```text
///   Empty --> Allocating --> Marked --> Relocating --> Empty
///                 ^            |            |
///                 +------------+------------+
/// ```
///
/// `Marked -> Allocating` is taken by regions not chosen for relocation.
/// `Relocating -> Allocating` is taken by regions where some object could not be evacuated.
#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Copy, Clone, NoUninit)]
pub enum RegionState {
    Empty,
    Allocating,
    Marked,
    Relocating,
}

impl RegionState {
    pub fn can_transition_to(self, to: RegionState) -> bool {
        use RegionState::*;
        matches!(
            (self, to),
            (Empty, Allocating)
                | (Allocating, Marked)
                | (Marked, Relocating)
                | (Marked, Allocating)
                | (Relocating, Empty)
                | (Relocating, Allocating)
        )
    }
}

pub struct Region {
    index: usize,
    space: ContiguousSpace,
    state: Atomic<RegionState>,
    /// Top at mark start. Objects at or above it were allocated during marking and are live.
    tams: Atomic<Address>,
    live_bytes: AtomicUsize,
    /// TLABs carved from this region and not yet retired.
    active_tlabs: AtomicUsize,
    /// Card mark: a reference was stored into this region.
    dirty: AtomicBool,
    /// Some object in this region forwards to itself.
    evac_failed: AtomicBool,
    mark_bitmap: RegionBitmap,
    object_starts: RegionBitmap,
}

impl Region {
    pub fn new(index: usize, start: Address, size: usize) -> Self {
        Region {
            index,
            space: ContiguousSpace::new("region", start, start + size),
            state: Atomic::new(RegionState::Empty),
            tams: Atomic::new(start),
            live_bytes: AtomicUsize::new(0),
            active_tlabs: AtomicUsize::new(0),
            dirty: AtomicBool::new(false),
            evac_failed: AtomicBool::new(false),
            mark_bitmap: RegionBitmap::new(start, size),
            object_starts: RegionBitmap::new(start, size),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn start(&self) -> Address {
        self.space.bottom()
    }

    pub fn end(&self) -> Address {
        self.space.end()
    }

    pub fn top(&self) -> Address {
        self.space.top()
    }

    pub fn used(&self) -> usize {
        self.space.used()
    }

    pub fn free(&self) -> usize {
        self.space.free()
    }

    pub fn state(&self) -> RegionState {
        self.state.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.state() == RegionState::Empty
    }

    /// Move from `from` to `to`. Aborts the process if the transition is illegal or the region is
    /// not in `from`.
    pub fn transition(&self, from: RegionState, to: RegionState) {
        if !from.can_transition_to(to) {
            protocol_violation!("region {}: illegal transition {:?} -> {:?}", self.index, from, to);
        }
        if let Err(actual) =
            self.state
                .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
        {
            protocol_violation!(
                "region {}: {:?} -> {:?} found the region in {:?}",
                self.index,
                from,
                to,
                actual
            );
        }
        trace!("region {}: {:?} -> {:?}", self.index, from, to);
    }

    /// Bump-allocate in this region.
    pub fn par_allocate(&self, size: usize) -> Option<Address> {
        self.space.par_allocate(size)
    }

    pub fn tams(&self) -> Address {
        self.tams.load(Ordering::Acquire)
    }

    /// Snapshot the top for a new marking cycle and forget the previous cycle's marks.
    pub fn prepare_for_mark(&self) {
        self.tams.store(self.top(), Ordering::Release);
        self.mark_bitmap.clear_all();
        self.live_bytes.store(0, Ordering::Relaxed);
    }

    /// Mark an object. Returns true if this call marked it and the object needs tracing.
    /// Objects above TAMS are live without marks and are never traced.
    pub fn mark(&self, object: ObjectReference) -> bool {
        let addr = object.to_raw_address();
        if addr >= self.tams() {
            return false;
        }
        if self.mark_bitmap.set(addr) {
            self.live_bytes
                .fetch_add(object_model::get_size(object), Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn is_marked(&self, object: ObjectReference) -> bool {
        self.mark_bitmap.is_set(object.to_raw_address())
    }

    /// Live according to the last marking: marked, or allocated after it started.
    pub fn is_live(&self, object: ObjectReference) -> bool {
        object.to_raw_address() >= self.tams() || self.is_marked(object)
    }

    /// Marked bytes plus everything allocated since mark start.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed) + (self.top() - self.tams())
    }

    pub fn garbage_bytes(&self) -> usize {
        self.used().saturating_sub(self.live_bytes())
    }

    pub fn set_object_start(&self, object: ObjectReference) {
        self.object_starts.set(object.to_raw_address());
    }

    pub fn clear_object_start(&self, object: ObjectReference) {
        self.object_starts.clear(object.to_raw_address());
    }

    pub fn is_object_start(&self, addr: Address) -> bool {
        addr >= self.start() && addr < self.top() && self.object_starts.is_set(addr)
    }

    /// Call `f` on every object of this region that is live according to the last marking.
    pub fn for_each_live_object<F: FnMut(ObjectReference)>(&self, mut f: F) {
        self.object_starts
            .iterate(self.start(), self.top(), |addr| {
                let object = ObjectReference::from_raw_address(addr);
                if self.is_live(object) {
                    f(object)
                }
            });
    }

    pub fn object_count(&self) -> usize {
        self.object_starts.count()
    }

    pub fn tlab_allocated(&self) {
        self.active_tlabs.fetch_add(1, Ordering::AcqRel);
    }

    pub fn tlab_retired(&self) {
        let old = self.active_tlabs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0, "region {}: TLAB count underflow", self.index);
    }

    pub fn active_tlabs(&self) -> usize {
        self.active_tlabs.load(Ordering::Acquire)
    }

    pub fn mark_dirty(&self) {
        // Most stores hit an already dirty region. Skip the write to keep the line shared.
        if !self.dirty.load(Ordering::Relaxed) {
            self.dirty.store(true, Ordering::Relaxed);
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    /// Clear the card mark. Returns whether it was set.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    pub fn set_evac_failed(&self) {
        self.evac_failed.store(true, Ordering::Release);
    }

    pub fn evac_failed(&self) -> bool {
        self.evac_failed.load(Ordering::Acquire)
    }

    /// Undo self-forwarding after a failed evacuation and let the region keep its objects.
    /// Objects that did get evacuated are stale copies and stop being objects of this region.
    pub fn recover_from_evac_failure(&self) {
        self.object_starts.iterate(self.start(), self.top(), |addr| {
            let object = ObjectReference::from_raw_address(addr);
            match object_model::forwarding::get_forwardee(object) {
                Some(to) if to == object => object_model::forwarding::clear(object),
                Some(_) => self.object_starts.clear(addr),
                None => {}
            }
        });
        self.evac_failed.store(false, Ordering::Release);
        self.transition(RegionState::Relocating, RegionState::Allocating);
    }

    /// Return a relocated region to `Empty`. The caller zeroes the memory.
    pub fn recycle(&self) {
        debug_assert_eq!(self.active_tlabs(), 0);
        self.space.reset();
        self.tams.store(self.start(), Ordering::Release);
        self.mark_bitmap.clear_all();
        self.object_starts.clear_all();
        self.live_bytes.store(0, Ordering::Relaxed);
        self.dirty.store(false, Ordering::Relaxed);
        self.transition(RegionState::Relocating, RegionState::Empty);
    }

    /// Take an empty region for allocation.
    pub fn make_allocating(&self) {
        self.tams.store(self.top(), Ordering::Release);
        self.transition(RegionState::Empty, RegionState::Allocating);
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Region#{}[{}, {}) {:?} top={} tams={} live={} tlabs={}",
            self.index,
            self.start(),
            self.end(),
            self.state(),
            self.top(),
            self.tams(),
            self.live_bytes(),
            self.active_tlabs()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::*;
    use crate::util::memory;

    fn with_region<F: FnOnce(&Region)>(f: F) {
        let size = 16 * BYTES_IN_PAGE;
        let (mapping, start) = memory::reserve(size, BYTES_IN_PAGE).unwrap();
        memory::commit(start, size).unwrap();
        let region = Region::new(0, start, size);
        f(&region);
        memory::release(mapping, size, BYTES_IN_PAGE).unwrap();
    }

    fn alloc(region: &Region, ref_fields: usize) -> ObjectReference {
        let size = object_model::object_size(ref_fields, 8).unwrap();
        let start = region.par_allocate(size).unwrap();
        let object = object_model::initialize_header(start, size, ref_fields);
        region.set_object_start(object);
        object
    }

    #[test]
    fn legal_transitions() {
        use RegionState::*;
        assert!(Empty.can_transition_to(Allocating));
        assert!(Marked.can_transition_to(Allocating));
        assert!(Relocating.can_transition_to(Empty));
        assert!(!Empty.can_transition_to(Relocating));
        assert!(!Allocating.can_transition_to(Empty));
        assert!(!Relocating.can_transition_to(Marked));
    }

    #[test]
    fn marking_and_liveness() {
        with_region(|region| {
            region.make_allocating();
            let a = alloc(region, 1);
            let b = alloc(region, 0);
            region.prepare_for_mark();
            let c = alloc(region, 0);

            assert!(region.mark(a));
            assert!(!region.mark(a));
            // Allocated after mark start.
            assert!(!region.mark(c));
            assert!(region.is_live(a));
            assert!(!region.is_live(b));
            assert!(region.is_live(c));
            assert_eq!(
                region.live_bytes(),
                object_model::get_size(a) + object_model::get_size(c)
            );
            assert_eq!(region.garbage_bytes(), object_model::get_size(b));

            let mut live = vec![];
            region.for_each_live_object(|o| live.push(o));
            assert_eq!(live, vec![a, c]);
        })
    }

    #[test]
    fn full_cycle() {
        with_region(|region| {
            region.make_allocating();
            let a = alloc(region, 0);
            region.transition(RegionState::Allocating, RegionState::Marked);
            region.transition(RegionState::Marked, RegionState::Relocating);
            assert_eq!(object_model::forwarding::try_install(a, a), Ok(a));
            region.set_evac_failed();
            region.recover_from_evac_failure();
            assert_eq!(region.state(), RegionState::Allocating);
            assert!(!object_model::forwarding::is_forwarded(a));

            region.transition(RegionState::Allocating, RegionState::Marked);
            region.transition(RegionState::Marked, RegionState::Relocating);
            region.recycle();
            assert!(region.is_empty());
            assert_eq!(region.used(), 0);
            assert_eq!(region.object_count(), 0);
        })
    }

    #[test]
    fn card_mark() {
        with_region(|region| {
            assert!(!region.is_dirty());
            region.mark_dirty();
            assert!(region.take_dirty());
            assert!(!region.take_dirty());
        })
    }
}
