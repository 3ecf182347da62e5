//! The Shenandoah barrier set: SATB pre-write barrier, load-reference barrier, CAS barrier with a
//! forwarding-aware retry, and a card-marking post-write barrier.
//!
//! The slow paths live on [`Shenandoah`] so the mutator barrier and the compiled-code stubs share
//! them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::global::gc_state;
use super::satb::SatbBuffer;
use super::Shenandoah;
use crate::plan::barriers::{Barrier, CasOutcome};
use crate::plan::global::CollectedHeap;
use crate::policy::region::RegionState;
use crate::util::error::protocol_violation;
use crate::util::object_model::{self, forwarding};
use crate::util::{MemorySlice, ObjectReference, Slot};

/// How often each barrier left its fast path.
#[derive(Default)]
pub struct BarrierStats {
    pub satb_enqueues: AtomicUsize,
    pub lrb_slow_paths: AtomicUsize,
    pub self_heals: AtomicUsize,
    pub cas_retries: AtomicUsize,
    pub card_marks: AtomicUsize,
}

impl BarrierStats {
    fn inc(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl Shenandoah {
    /// Resolve a loaded reference to the copy mutators may use. While evacuation is running this
    /// may copy the object. If the reference came from `slot`, the slot is healed to the
    /// resolved reference.
    #[inline(always)]
    pub fn load_reference_barrier(&self, slot: Option<Slot>, value: ObjectReference) -> ObjectReference {
        if value.is_null() || !self.has_forwarded() {
            return value;
        }
        self.load_reference_barrier_slow(slot, value)
    }

    #[cold]
    fn load_reference_barrier_slow(&self, slot: Option<Slot>, value: ObjectReference) -> ObjectReference {
        BarrierStats::inc(&self.barrier_stats().lrb_slow_paths);
        let resolved = match forwarding::get_forwardee(value) {
            Some(forwardee) => forwardee,
            None => {
                let region = self.region_of_object(value);
                match region.state() {
                    RegionState::Relocating if self.gc_state() & gc_state::EVACUATION != 0 => {
                        self.evacuate_object(value)
                    }
                    RegionState::Relocating => protocol_violation!(
                        "{} in relocated region {} was not evacuated",
                        value,
                        region.index()
                    ),
                    _ => value,
                }
            }
        };
        if resolved != value && self.options().self_healing {
            if let Some(slot) = slot {
                // Losing the race is fine: whoever won stored a resolved reference too.
                if slot.compare_exchange(value, resolved).is_ok() {
                    BarrierStats::inc(&self.barrier_stats().self_heals);
                }
            }
        }
        resolved
    }

    /// Enqueue the value `slot` is about to lose, while marking.
    #[inline(always)]
    pub fn satb_pre_write(&self, buffer: &SatbBuffer, slot: Slot) {
        if self.is_marking() {
            let old = slot.load();
            if !old.is_null() {
                BarrierStats::inc(&self.barrier_stats().satb_enqueues);
                self.satb().enqueue(buffer, old);
            }
        }
    }

    /// Record that a reference was stored into the region holding `slot`.
    #[inline(always)]
    pub fn card_mark(&self, slot: Slot) {
        if self.options().card_barrier {
            if let Some(region) = self.space().region_of(slot.as_address()) {
                BarrierStats::inc(&self.barrier_stats().card_marks);
                region.mark_dirty();
            }
        }
    }

    /// Compare-and-swap a reference slot.
    ///
    /// If the raw CAS fails while forwarded objects exist, the slot may hold a different copy of
    /// `expected`. The CAS is then retried once with the value found. The retry's result is final.
    pub fn cas_reference(
        &self,
        buffer: &SatbBuffer,
        slot: Slot,
        expected: ObjectReference,
        new: ObjectReference,
    ) -> CasOutcome {
        self.satb_pre_write(buffer, slot);
        let outcome = match slot.compare_exchange(expected, new) {
            Ok(_) => CasOutcome::Success,
            Err(witness) => {
                if self.has_forwarded()
                    && !witness.is_null()
                    && !expected.is_null()
                    && forwarding::resolve(witness) == forwarding::resolve(expected)
                {
                    BarrierStats::inc(&self.barrier_stats().cas_retries);
                    match slot.compare_exchange(witness, new) {
                        Ok(_) => CasOutcome::SuccessAfterRetry,
                        Err(witness) => CasOutcome::Failure(witness),
                    }
                } else {
                    CasOutcome::Failure(witness)
                }
            }
        };
        if outcome.is_success() {
            self.card_mark(slot);
        }
        outcome
    }

    /// Before copying into `dst`, enqueue the references it is about to lose.
    pub fn array_copy_pre(&self, buffer: &SatbBuffer, dst: MemorySlice) {
        if self.is_marking() {
            for slot in dst.iter_slots() {
                self.satb_pre_write(buffer, slot);
            }
        }
    }

    pub fn array_copy_post(&self, dst: MemorySlice) {
        if !dst.is_empty() {
            self.card_mark(dst.get(0));
            self.card_mark(dst.get(dst.len() - 1));
        }
    }

    /// Before `src` is copied bit by bit into a clone, resolve every reference field of `src` in
    /// place, so the clone never holds a stale reference.
    pub fn clone_pre(&self, src: ObjectReference) {
        if !self.has_forwarded() {
            return;
        }
        object_model::scan_object(src, |slot| {
            let value = slot.load();
            let resolved = self.load_reference_barrier(None, value);
            if resolved != value {
                let _ = slot.compare_exchange(value, resolved);
            }
        });
    }
}

/// The barrier of one mutator of a [`Shenandoah`] heap.
pub struct ShenandoahBarrier {
    heap: Arc<Shenandoah>,
    satb: Arc<SatbBuffer>,
}

impl ShenandoahBarrier {
    pub fn new(heap: Arc<Shenandoah>) -> Self {
        let satb = heap.satb().register();
        ShenandoahBarrier { heap, satb }
    }

    pub fn satb_buffer(&self) -> &SatbBuffer {
        &self.satb
    }
}

impl Barrier for ShenandoahBarrier {
    fn flush(&mut self) {
        self.heap.satb().flush(&self.satb);
    }

    #[inline(always)]
    fn object_reference_write_pre(
        &mut self,
        _src: ObjectReference,
        slot: Slot,
        _target: ObjectReference,
    ) {
        self.heap.satb_pre_write(&self.satb, slot);
    }

    #[inline(always)]
    fn object_reference_write_post(
        &mut self,
        _src: ObjectReference,
        slot: Slot,
        _target: ObjectReference,
    ) {
        self.heap.card_mark(slot);
    }

    #[inline(always)]
    fn object_reference_load(&mut self, slot: Option<Slot>, value: ObjectReference) -> ObjectReference {
        self.heap.load_reference_barrier(slot, value)
    }

    #[inline(always)]
    fn resolve(&mut self, object: ObjectReference) -> ObjectReference {
        self.heap.load_reference_barrier(None, object)
    }

    fn object_reference_cas(
        &mut self,
        slot: Slot,
        expected: ObjectReference,
        new: ObjectReference,
    ) -> CasOutcome {
        self.heap.cas_reference(&self.satb, slot, expected, new)
    }

    fn memory_region_copy_pre(&mut self, dst: MemorySlice) {
        self.heap.array_copy_pre(&self.satb, dst);
    }

    fn memory_region_copy_post(&mut self, dst: MemorySlice) {
        self.heap.array_copy_post(dst);
    }

    fn object_clone_pre(&mut self, src: ObjectReference) {
        self.heap.clone_pre(src);
    }
}
