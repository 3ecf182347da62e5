//! Read/Write barrier implementations.

use enum_map::Enum;
use strum_macros::Display;

use crate::plan::shenandoah::ShenandoahBarrier;
use crate::util::{MemorySlice, ObjectReference, Slot};

/// The barrier set a heap installs. Chosen once, when the heap is built.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum, Display)]
pub enum BarrierSelector {
    NoBarrier,
    Shenandoah,
}

/// Result of a reference compare-and-swap through the barrier.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CasOutcome {
    /// The first attempt swapped.
    Success,
    /// The slot held a stale copy of the expected object. The retry with the stale value swapped.
    SuccessAfterRetry,
    /// The slot held a different object, which is returned.
    Failure(ObjectReference),
}

impl CasOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, CasOutcome::Failure(_))
    }
}

/// The handlers a barrier set provides for reference accesses.
///
/// A mutator calls `*_pre` before and `*_post` after the raw memory operation. All barriers must
/// be flushed before the mutator goes away or before the collector needs their thread-local
/// state.
pub trait Barrier: 'static + Send {
    fn flush(&mut self);

    /// Subsuming reference store: pre barrier, store, post barrier.
    fn object_reference_write(&mut self, src: ObjectReference, slot: Slot, target: ObjectReference) {
        self.object_reference_write_pre(src, slot, target);
        slot.store(target);
        self.object_reference_write_post(src, slot, target);
    }

    /// Called before `slot` of `src` is overwritten with `target`.
    fn object_reference_write_pre(
        &mut self,
        _src: ObjectReference,
        _slot: Slot,
        _target: ObjectReference,
    ) {
    }

    /// Called after `slot` of `src` was overwritten with `target`.
    fn object_reference_write_post(
        &mut self,
        _src: ObjectReference,
        _slot: Slot,
        _target: ObjectReference,
    ) {
    }

    /// Called after `value` was loaded from `slot`. Returns the reference the mutator may use.
    /// A `None` slot resolves a reference the mutator already holds.
    fn object_reference_load(&mut self, _slot: Option<Slot>, value: ObjectReference) -> ObjectReference {
        value
    }

    /// The reference the mutator may use in place of `object`.
    fn resolve(&mut self, object: ObjectReference) -> ObjectReference {
        self.object_reference_load(None, object)
    }

    /// Compare-and-swap a reference slot.
    fn object_reference_cas(
        &mut self,
        slot: Slot,
        expected: ObjectReference,
        new: ObjectReference,
    ) -> CasOutcome {
        match slot.compare_exchange(expected, new) {
            Ok(_) => CasOutcome::Success,
            Err(witness) => CasOutcome::Failure(witness),
        }
    }

    /// Called before the slots of `dst` are overwritten by a bulk copy.
    fn memory_region_copy_pre(&mut self, _dst: MemorySlice) {}

    /// Called after the slots of `dst` were overwritten by a bulk copy.
    fn memory_region_copy_post(&mut self, _dst: MemorySlice) {}

    /// Called before `src` is copied into a new object.
    fn object_clone_pre(&mut self, _src: ObjectReference) {}
}

/// Empty handlers for a collector that never needs to observe the mutator.
#[derive(Default)]
pub struct NoBarrier;

impl Barrier for NoBarrier {
    fn flush(&mut self) {}
}

/// The barrier of a mutator. A closed set of variants, dispatched with a `match` so the empty
/// handlers of [`NoBarrier`] disappear from the fast path.
pub enum MutatorBarrier {
    NoBarrier(NoBarrier),
    Shenandoah(ShenandoahBarrier),
}

macro_rules! dispatch {
    ($self: expr, $b: ident => $e: expr) => {
        match $self {
            MutatorBarrier::NoBarrier($b) => $e,
            MutatorBarrier::Shenandoah($b) => $e,
        }
    };
}

impl MutatorBarrier {
    pub fn selector(&self) -> BarrierSelector {
        match self {
            MutatorBarrier::NoBarrier(_) => BarrierSelector::NoBarrier,
            MutatorBarrier::Shenandoah(_) => BarrierSelector::Shenandoah,
        }
    }
}

impl Barrier for MutatorBarrier {
    fn flush(&mut self) {
        dispatch!(self, b => b.flush())
    }

    #[inline(always)]
    fn object_reference_write_pre(&mut self, src: ObjectReference, slot: Slot, target: ObjectReference) {
        dispatch!(self, b => b.object_reference_write_pre(src, slot, target))
    }

    #[inline(always)]
    fn object_reference_write_post(&mut self, src: ObjectReference, slot: Slot, target: ObjectReference) {
        dispatch!(self, b => b.object_reference_write_post(src, slot, target))
    }

    #[inline(always)]
    fn object_reference_load(&mut self, slot: Option<Slot>, value: ObjectReference) -> ObjectReference {
        dispatch!(self, b => b.object_reference_load(slot, value))
    }

    #[inline(always)]
    fn resolve(&mut self, object: ObjectReference) -> ObjectReference {
        dispatch!(self, b => b.resolve(object))
    }

    fn object_reference_cas(
        &mut self,
        slot: Slot,
        expected: ObjectReference,
        new: ObjectReference,
    ) -> CasOutcome {
        dispatch!(self, b => b.object_reference_cas(slot, expected, new))
    }

    fn memory_region_copy_pre(&mut self, dst: MemorySlice) {
        dispatch!(self, b => b.memory_region_copy_pre(dst))
    }

    fn memory_region_copy_post(&mut self, dst: MemorySlice) {
        dispatch!(self, b => b.memory_region_copy_post(dst))
    }

    fn object_clone_pre(&mut self, src: ObjectReference) {
        dispatch!(self, b => b.object_clone_pre(src))
    }
}
