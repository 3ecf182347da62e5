use atomic::Atomic;
use bytemuck::NoUninit;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use strum_macros::Display;

use super::barrier::BarrierStats;
use super::controller::Controller;
use super::heuristics::{create_heuristics, HeapStatus, Heuristics, RegionSummary};
use super::marking::MarkQueue;
use super::satb::SatbQueueSet;
use crate::codegen::StubTable;
use crate::plan::barriers::BarrierSelector;
use crate::plan::global::{CollectedHeap, GCCause, PlanConstraints};
use crate::policy::region::{AllocKind, Region, RegionSpace, RegionState};
use crate::util::alloc::TlabErgonomics;
use crate::util::constants::*;
use crate::util::conversions::{self, raw_align_down};
use crate::util::error::{protocol_violation, HeapError};
use crate::util::handshake::Handshake;
use crate::util::monitoring::MonitoringSupport;
use crate::util::object_model::{self, forwarding};
use crate::util::options::{CollectorSelector, Options};
use crate::util::roots::RootSet;
use crate::util::{Address, ObjectReference, Slot};

pub const SHENANDOAH_CONSTRAINTS: PlanConstraints = PlanConstraints {
    moves_objects: true,
    barrier: BarrierSelector::Shenandoah,
    needs_satb: true,
    needs_load_reference_barrier: true,
    needs_card_barrier: true,
    can_elide_tlab_store_barriers: true,
    needs_post_alloc: true,
};

/// Bits of the global GC state word that barriers test on their fast paths.
pub mod gc_state {
    /// Concurrent marking is running. Reference stores enqueue the old value.
    pub const MARKING: u8 = 1;
    /// Some objects may be forwarded. Reference loads must resolve.
    pub const HAS_FORWARDED: u8 = 1 << 1;
    /// Evacuation is running. The load-reference barrier may copy objects.
    pub const EVACUATION: u8 = 1 << 2;
    /// References are being updated. Every live object has been copied.
    pub const UPDATE_REFS: u8 = 1 << 3;
}

/// Phase of the collection cycle, as seen by cancellation.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, NoUninit, Display)]
pub enum CyclePhase {
    Idle,
    ConcurrentMark,
    ConcurrentRelocate,
}

/// Counters of completed and abandoned cycles.
#[derive(Default)]
pub struct CycleStats {
    pub completed: AtomicUsize,
    pub cancelled: AtomicUsize,
    pub recycled_regions: AtomicUsize,
    pub evacuated_bytes: AtomicUsize,
    pub evacuation_failures: AtomicUsize,
}

/// A concurrent mark and relocate collector over a [`RegionSpace`].
///
/// A cycle runs `init_mark`, `concurrent_mark`, `final_mark`, `evacuate`, `update_refs` and
/// `recycle`. Steps named `init_` and `final_` and the flips of the GC state run inside a
/// handshake with the mutators, everything else runs concurrently with them. The steps are public
/// so tests can interleave mutator work between them; `run_cycle` runs them all.
pub struct Shenandoah {
    options: Options,
    space: RegionSpace,
    max_tlab_size: usize,
    gc_state: AtomicU8,
    phase: Atomic<CyclePhase>,
    /// Orders cancellation against the end of marking.
    phase_lock: spin::Mutex<()>,
    cancel_requested: AtomicBool,
    cycle_lock: Mutex<()>,
    cycle_start: spin::Mutex<Option<Instant>>,
    used_at_last_cycle: AtomicUsize,
    handshake: Handshake,
    roots: RootSet,
    satb: SatbQueueSet,
    mark_queue: MarkQueue,
    heuristics: Box<dyn Heuristics>,
    monitoring: MonitoringSupport,
    barrier_stats: BarrierStats,
    cycle_stats: CycleStats,
    controller: spin::Mutex<Option<Arc<Controller>>>,
    stubs: StubTable,
}

impl Shenandoah {
    pub fn new(options: Options) -> Result<Self, HeapError> {
        if options.collector != CollectorSelector::Shenandoah {
            return Err(HeapError::InvalidOptions(format!(
                "Collector is {}, not Shenandoah",
                options.collector
            )));
        }
        options.validate()?;
        let space = RegionSpace::new(&options)?;
        let max_tlab_size = raw_align_down(
            (*options.max_tlab_size).min(space.region_size()),
            MIN_OBJECT_ALIGNMENT,
        );
        let heap = Shenandoah {
            max_tlab_size,
            gc_state: AtomicU8::new(0),
            phase: Atomic::new(CyclePhase::Idle),
            phase_lock: spin::Mutex::new(()),
            cancel_requested: AtomicBool::new(false),
            cycle_lock: Mutex::new(()),
            cycle_start: spin::Mutex::new(None),
            used_at_last_cycle: AtomicUsize::new(0),
            handshake: Handshake::new(),
            roots: RootSet::new(),
            satb: SatbQueueSet::new(options.satb_buffer_size),
            mark_queue: MarkQueue::new(),
            heuristics: create_heuristics(&options),
            monitoring: MonitoringSupport::new("Shenandoah", "Shenandoah Cycles"),
            barrier_stats: BarrierStats::default(),
            cycle_stats: CycleStats::default(),
            controller: spin::Mutex::new(None),
            stubs: StubTable::for_constraints(&SHENANDOAH_CONSTRAINTS),
            space,
            options,
        };
        heap.update_counters();
        info!(
            "Shenandoah heap: {} max, {} heuristics, {} marking threads, self healing: {}, card barrier: {}",
            conversions::bytes_to_proper_unit(heap.max_capacity()),
            heap.heuristics.mode(),
            heap.options.conc_gc_threads,
            heap.options.self_healing,
            heap.options.card_barrier
        );
        Ok(heap)
    }

    /// Start the background thread that runs cycles on request and when the heuristics ask for
    /// one. Without it, `collect` runs the cycle on the calling thread.
    pub fn start_controller(self: &Arc<Self>) -> Result<(), HeapError> {
        let mut controller = self.controller.lock();
        if controller.is_none() {
            let interval = Duration::from_millis(self.options.control_interval);
            *controller = Some(Arc::new(Controller::spawn(Arc::downgrade(self), interval)?));
        }
        Ok(())
    }

    fn controller(&self) -> Option<Arc<Controller>> {
        self.controller.lock().clone()
    }

    pub fn space(&self) -> &RegionSpace {
        &self.space
    }

    pub fn satb(&self) -> &SatbQueueSet {
        &self.satb
    }

    pub fn heuristics(&self) -> &dyn Heuristics {
        self.heuristics.as_ref()
    }

    pub fn barrier_stats(&self) -> &BarrierStats {
        &self.barrier_stats
    }

    pub fn cycle_stats(&self) -> &CycleStats {
        &self.cycle_stats
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn gc_state(&self) -> u8 {
        self.gc_state.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn is_marking(&self) -> bool {
        self.gc_state() & gc_state::MARKING != 0
    }

    #[inline(always)]
    pub fn has_forwarded(&self) -> bool {
        self.gc_state() & gc_state::HAS_FORWARDED != 0
    }

    pub fn is_evacuating(&self) -> bool {
        self.gc_state() & gc_state::EVACUATION != 0
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Whether the object was found live by the last marking.
    pub fn is_marked(&self, object: ObjectReference) -> bool {
        self.space
            .region_of(object.to_raw_address())
            .map_or(false, |r| r.is_live(object))
    }

    pub fn heap_status(&self) -> HeapStatus {
        let region_size = self.space.region_size();
        let used = self.space.used();
        HeapStatus {
            max_capacity: self.space.max_capacity(),
            used,
            mutator_free: self.space.mutator_free_regions() * region_size,
            evacuation_free: self.space.free_regions() * region_size,
            allocated_since_last_cycle: used
                .saturating_sub(self.used_at_last_cycle.load(Ordering::Relaxed)),
            region_size,
        }
    }

    /// The region holding `object`. A reference outside of the committed regions, or into an
    /// empty one, means the heap is corrupt.
    pub(crate) fn region_of_object(&self, object: ObjectReference) -> &Region {
        match self.space.region_of(object.to_raw_address()) {
            Some(region) if !region.is_empty() => region,
            Some(region) => protocol_violation!("{} is in empty region {}", object, region.index()),
            None => protocol_violation!("{} is outside of the heap", object),
        }
    }

    /// Mark `object` for the current cycle. Returns true if it was newly marked and needs tracing.
    pub(crate) fn mark_object(&self, object: ObjectReference) -> bool {
        self.region_of_object(object).mark(object)
    }

    /// Copy `object` to an evacuation region and install the forwarding pointer, or return the
    /// copy some other thread installed first. If there is no room for the copy, the object is
    /// forwarded to itself and stays where it is.
    pub(crate) fn evacuate_object(&self, object: ObjectReference) -> ObjectReference {
        if let Some(forwardee) = forwarding::get_forwardee(object) {
            return forwardee;
        }
        let size = object_model::get_size(object);
        let to = match self.space.allocate(size, AllocKind::Evacuation) {
            Some(to) => to,
            None => return self.self_forward(object),
        };
        let copy = unsafe { object_model::copy_to(object, to) };
        // The copy is an object of its region before anyone can reach it through the forwardee.
        let to_region = self.region_of_object(copy);
        to_region.set_object_start(copy);
        match forwarding::try_install(object, copy) {
            Ok(copy) => {
                self.cycle_stats
                    .evacuated_bytes
                    .fetch_add(size, Ordering::Relaxed);
                trace!("Evacuated {} to {}", object, copy);
                copy
            }
            Err(winner) => {
                to_region.clear_object_start(copy);
                winner
            }
        }
    }

    fn self_forward(&self, object: ObjectReference) -> ObjectReference {
        self.region_of_object(object).set_evac_failed();
        match forwarding::try_install(object, object) {
            Ok(object) => {
                self.cycle_stats
                    .evacuation_failures
                    .fetch_add(1, Ordering::Relaxed);
                debug!("No room to evacuate {}, it stays in place", object);
                object
            }
            Err(winner) => winner,
        }
    }

    /// Run `f` on every committed region, spread over the concurrent GC threads.
    fn for_each_region_parallel<F: Fn(&Region) + Sync>(&self, f: F) {
        let regions = self.space.regions();
        let cursor = AtomicUsize::new(0);
        let workers = self.options.conc_gc_threads.min(regions.len()).max(1);
        std::thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| loop {
                    let i = cursor.fetch_add(1, Ordering::Relaxed);
                    if i >= regions.len() {
                        break;
                    }
                    f(&regions[i]);
                });
            }
        });
    }

    /// Start marking: snapshot every region's top, trace the roots. Returns false if a cycle is
    /// already running.
    pub fn init_mark(&self) -> bool {
        self.handshake.synchronize(|| {
            if self.phase() != CyclePhase::Idle {
                debug!("Init mark skipped: cycle is in {}", self.phase());
                return false;
            }
            *self.cycle_start.lock() = Some(Instant::now());
            self.cancel_requested.store(false, Ordering::Release);
            self.mark_queue.clear();
            for region in self.space.regions() {
                if !region.is_empty() {
                    region.prepare_for_mark();
                }
            }
            self.roots
                .for_each_slot(|slot| self.mark_queue.mark_and_push(self, slot.load()));
            self.gc_state.store(gc_state::MARKING, Ordering::Release);
            self.phase.store(CyclePhase::ConcurrentMark, Ordering::Release);
            info!(
                "Init mark: {} roots, {} used",
                self.roots.len(),
                conversions::bytes_to_proper_unit(self.used())
            );
            true
        })
    }

    /// Trace the heap concurrently with the mutators. Returns false if the cycle was cancelled,
    /// in which case it has been abandoned.
    pub fn concurrent_mark(&self) -> bool {
        if self.phase() != CyclePhase::ConcurrentMark {
            debug!("Concurrent mark skipped: cycle is in {}", self.phase());
            return false;
        }
        let completed = self
            .mark_queue
            .drain(self, self.options.conc_gc_threads, true);
        if !completed {
            self.handshake.synchronize(|| self.abandon_marking());
        }
        completed
    }

    /// Finish marking and choose the collection set. Returns true if there is something to
    /// relocate. Returns false if the cycle was cancelled or found nothing worth relocating.
    pub fn final_mark(&self) -> bool {
        if self.phase() != CyclePhase::ConcurrentMark {
            debug!("Final mark skipped: cycle is in {}", self.phase());
            return false;
        }
        self.handshake.synchronize(|| {
            self.satb.flush_all();
            self.mark_queue
                .drain(self, self.options.conc_gc_threads, false);

            let _phase = self.phase_lock.lock();
            if self.cancel_requested() {
                self.abandon_marking();
                return false;
            }
            self.gc_state.store(0, Ordering::Release);

            let mut candidates = vec![];
            for region in self.space.regions() {
                if region.state() != RegionState::Allocating {
                    continue;
                }
                region.transition(RegionState::Allocating, RegionState::Marked);
                if !self.space.is_alloc_region(region) && region.active_tlabs() == 0 {
                    candidates.push(RegionSummary {
                        index: region.index(),
                        live: region.live_bytes(),
                        garbage: region.garbage_bytes(),
                    });
                }
            }
            let collection_set = self
                .heuristics
                .choose_collection_set(&self.heap_status(), &candidates);
            for &index in collection_set.iter() {
                self.space
                    .region(index)
                    .transition(RegionState::Marked, RegionState::Relocating);
            }
            for region in self.space.regions() {
                if region.state() == RegionState::Marked {
                    region.transition(RegionState::Marked, RegionState::Allocating);
                }
            }

            let garbage: usize = collection_set
                .iter()
                .map(|&i| self.space.region(i).garbage_bytes())
                .sum();
            info!(
                "Final mark: {} marked objects, {} of {} candidate regions chosen, {} garbage",
                self.mark_queue.marked_objects(),
                collection_set.len(),
                candidates.len(),
                conversions::bytes_to_proper_unit(garbage)
            );
            if collection_set.is_empty() {
                self.phase.store(CyclePhase::Idle, Ordering::Release);
                self.finish_cycle();
                return false;
            }
            self.gc_state.store(
                gc_state::HAS_FORWARDED | gc_state::EVACUATION,
                Ordering::Release,
            );
            self.phase
                .store(CyclePhase::ConcurrentRelocate, Ordering::Release);
            true
        })
    }

    /// Drop the marking state of a cancelled cycle. Mutators must be stopped.
    fn abandon_marking(&self) {
        self.gc_state.store(0, Ordering::Release);
        self.satb.abandon();
        self.mark_queue.clear();
        self.phase.store(CyclePhase::Idle, Ordering::Release);
        self.cycle_stats.cancelled.fetch_add(1, Ordering::Relaxed);
        *self.cycle_start.lock() = None;
        info!("Cycle cancelled during marking");
    }

    /// Copy every live object out of the collection set, then let mutators know that evacuation
    /// is over.
    pub fn evacuate(&self) {
        if self.phase() != CyclePhase::ConcurrentRelocate {
            debug!("Evacuation skipped: cycle is in {}", self.phase());
            return;
        }
        self.for_each_region_parallel(|region| {
            if region.state() == RegionState::Relocating {
                region.for_each_live_object(|object| {
                    self.evacuate_object(object);
                });
            }
        });
        self.handshake.synchronize(|| {
            self.gc_state.store(
                gc_state::HAS_FORWARDED | gc_state::UPDATE_REFS,
                Ordering::Release,
            )
        });
        debug!(
            "Evacuation done: {} copied so far",
            conversions::bytes_to_proper_unit(self.cycle_stats.evacuated_bytes.load(Ordering::Relaxed))
        );
    }

    /// Point every root and every live reference field outside of the collection set at the new
    /// copies.
    pub fn update_refs(&self) {
        if self.phase() != CyclePhase::ConcurrentRelocate {
            debug!("Update refs skipped: cycle is in {}", self.phase());
            return;
        }
        self.roots.for_each_slot(update_slot);
        self.for_each_region_parallel(|region| {
            let evac_failed = match region.state() {
                RegionState::Empty => return,
                RegionState::Relocating if !region.evac_failed() => return,
                RegionState::Relocating => true,
                _ => false,
            };
            region.for_each_live_object(|object| {
                // Evacuated objects of a region that failed evacuation are stale copies.
                if evac_failed && !forwarding::is_self_forwarded(object) && forwarding::is_forwarded(object) {
                    return;
                }
                object_model::scan_object(object, update_slot);
            });
        });
    }

    /// End the cycle: stop the barriers, free the relocated regions.
    pub fn recycle(&self) {
        if self.phase() != CyclePhase::ConcurrentRelocate {
            debug!("Recycle skipped: cycle is in {}", self.phase());
            return;
        }
        // No mutator may hold a reference into the collection set once the barriers are off.
        self.handshake
            .synchronize(|| self.gc_state.store(0, Ordering::Release));
        let mut recycled = 0;
        let mut failed = 0;
        for region in self.space.regions() {
            if region.state() != RegionState::Relocating {
                continue;
            }
            if region.evac_failed() {
                region.recover_from_evac_failure();
                failed += 1;
            } else {
                self.space.recycle(region);
                recycled += 1;
            }
        }
        self.cycle_stats
            .recycled_regions
            .fetch_add(recycled, Ordering::Relaxed);
        self.phase.store(CyclePhase::Idle, Ordering::Release);
        info!(
            "Recycled {} regions, {} kept after evacuation failure, {} used",
            recycled,
            failed,
            conversions::bytes_to_proper_unit(self.used())
        );
        self.finish_cycle();
    }

    fn finish_cycle(&self) {
        let elapsed = self
            .cycle_start
            .lock()
            .take()
            .map_or(Duration::ZERO, |start| start.elapsed());
        self.cycle_stats.completed.fetch_add(1, Ordering::Relaxed);
        self.used_at_last_cycle
            .store(self.used(), Ordering::Relaxed);
        self.monitoring.record_collection(elapsed);
        self.update_counters();
    }

    /// Ask a running cycle to stop. Only honored during marking; once relocation started the
    /// cycle runs to completion. Returns whether the request was accepted.
    pub fn cancel_cycle(&self) -> bool {
        let _phase = self.phase_lock.lock();
        if self.phase() == CyclePhase::ConcurrentMark {
            self.cancel_requested.store(true, Ordering::Release);
            info!("Cancelling the cycle");
            true
        } else {
            debug!("Cancel ignored: cycle is in {}", self.phase());
            false
        }
    }

    /// Run a whole cycle on the calling thread. Returns false if it was cancelled.
    pub fn run_cycle(&self, cause: GCCause) -> bool {
        let _cycle = self
            .cycle_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        debug!("Cycle requested: {}", cause);
        if !self.init_mark() {
            return false;
        }
        if !self.concurrent_mark() {
            return false;
        }
        if !self.final_mark() {
            return !self.cancel_requested();
        }
        self.evacuate();
        self.update_refs();
        self.recycle();
        true
    }

    /// Ask the controller for a cycle without waiting for it.
    fn request_cycle(&self, cause: GCCause) {
        match self.controller() {
            Some(controller) => controller.request(cause),
            None => trace!("No controller to run a {} cycle", cause),
        }
    }

    fn update_counters(&self) {
        self.monitoring
            .update_counters(self.used(), self.capacity(), self.max_capacity());
    }

    fn verify_idle(&self) -> Result<(), HeapError> {
        if self.gc_state() != 0 {
            return Err(HeapError::Verification(format!(
                "GC state {:#x} outside of a cycle",
                self.gc_state()
            )));
        }
        // The first slot found holding something other than an unforwarded object.
        let mut bad: Option<(Slot, ObjectReference)> = None;
        let mut check = |slot: Slot| {
            let value = slot.load();
            if bad.is_some() || value.is_null() {
                return;
            }
            let is_object = self
                .space
                .region_of(value.to_raw_address())
                .map_or(false, |r| !r.is_empty() && r.is_object_start(value.to_raw_address()));
            if !is_object || forwarding::is_forwarded(value) {
                bad = Some((slot, value));
            }
        };
        self.roots.for_each_slot(&mut check);
        for region in self.space.regions() {
            if matches!(region.state(), RegionState::Marked | RegionState::Relocating) {
                return Err(HeapError::Verification(format!(
                    "{:?} outside of a cycle",
                    region
                )));
            }
            region.for_each_live_object(|object| object_model::scan_object(object, &mut check));
        }
        match bad {
            Some((slot, value)) => Err(HeapError::Verification(format!(
                "slot {} holds {}, which is not a live unforwarded object",
                slot.as_address(),
                value
            ))),
            None => Ok(()),
        }
    }
}

/// Point `slot` at the new copy of its referent.
fn update_slot(slot: Slot) {
    let value = slot.load();
    if value.is_null() {
        return;
    }
    if let Some(forwardee) = forwarding::get_forwardee(value) {
        if forwardee != value {
            // A mutator may have stored something else meanwhile; it already stored a to-space
            // reference.
            let _ = slot.compare_exchange(value, forwardee);
        }
    }
}

impl CollectedHeap for Shenandoah {
    fn name(&self) -> &'static str {
        "Shenandoah"
    }

    fn constraints(&self) -> &'static PlanConstraints {
        &SHENANDOAH_CONSTRAINTS
    }

    fn options(&self) -> &Options {
        &self.options
    }

    fn allocate(&self, size: usize) -> Option<Address> {
        debug_assert!(size % MIN_OBJECT_ALIGNMENT == 0);
        let result = self.space.allocate(size, AllocKind::Shared);
        if result.is_none() {
            self.request_cycle(GCCause::AllocationFailure);
        }
        result
    }

    fn allocate_new_tlab(
        &self,
        ergonomics: &mut TlabErgonomics,
        min_size: usize,
    ) -> Option<(Address, usize)> {
        let size = ergonomics.next_size(min_size, self.max_tlab_size, &self.options)?;
        let (start, size) = match self.space.allocate(size, AllocKind::Tlab) {
            Some(start) => (start, size),
            None => {
                // The current region may still hold a smaller TLAB.
                let smallest = min_size.max(*self.options.min_tlab_size);
                match (smallest < size)
                    .then(|| self.space.allocate(smallest, AllocKind::Tlab))
                    .flatten()
                {
                    Some(start) => (start, smallest),
                    None => {
                        self.request_cycle(GCCause::AllocationFailure);
                        return None;
                    }
                }
            }
        };
        ergonomics.record_refill(size);
        Some((start, size))
    }

    fn retire_tlab(&self, start: Address, _top: Address, _end: Address) {
        self.space.retire_tlab(start);
    }

    fn post_alloc(&self, object: ObjectReference) {
        let region = self.region_of_object(object);
        region.set_object_start(object);
        if self.is_marking() {
            region.mark(object);
        }
    }

    fn collect(&self, cause: GCCause) {
        match self.controller() {
            Some(controller) => controller.collect(cause),
            None => {
                self.run_cycle(cause);
            }
        }
    }

    fn capacity(&self) -> usize {
        self.space.capacity()
    }

    fn used(&self) -> usize {
        self.space.used()
    }

    fn max_capacity(&self) -> usize {
        self.space.max_capacity()
    }

    fn unsafe_max_tlab_alloc(&self) -> usize {
        self.max_tlab_size
    }

    fn is_in(&self, addr: Address) -> bool {
        self.space.is_in(addr)
    }

    fn monitoring(&self) -> &MonitoringSupport {
        &self.monitoring
    }

    fn verify(&self) -> Result<(), HeapError> {
        self.space.verify()?;
        let (used, capacity, max) = (self.used(), self.capacity(), self.max_capacity());
        if used > capacity || capacity > max {
            return Err(HeapError::Verification(format!(
                "used {} capacity {} max {}",
                used, capacity, max
            )));
        }
        if self.phase() == CyclePhase::Idle {
            self.verify_idle()?;
        }
        Ok(())
    }

    fn heap_info(&self) -> String {
        let mut states = [0usize; 4];
        for region in self.space.regions() {
            states[region.state() as usize] += 1;
        }
        format!(
            "Shenandoah heap: {} regions of {}, committed {}, used {}, max {}, phase {}, \
             regions: {} empty, {} allocating, {} marked, {} relocating",
            self.space.regions().len(),
            conversions::bytes_to_proper_unit(self.space.region_size()),
            conversions::bytes_to_proper_unit(self.capacity()),
            conversions::bytes_to_proper_unit(self.used()),
            conversions::bytes_to_proper_unit(self.max_capacity()),
            self.phase(),
            states[RegionState::Empty as usize],
            states[RegionState::Allocating as usize],
            states[RegionState::Marked as usize],
            states[RegionState::Relocating as usize]
        )
    }

    fn roots(&self) -> &RootSet {
        &self.roots
    }

    fn handshake(&self) -> Option<&Handshake> {
        Some(&self.handshake)
    }

    fn stub_table(&self) -> &StubTable {
        &self.stubs
    }
}

impl Drop for Shenandoah {
    fn drop(&mut self) {
        if let Some(controller) = self.controller.get_mut().take() {
            controller.shutdown();
        }
        info!("{}", self.heap_info());
    }
}
