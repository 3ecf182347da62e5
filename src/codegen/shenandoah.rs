//! Barrier stubs of the Shenandoah barrier set.
//!
//! Stubs run on behalf of compiled code, which has no [`Mutator`](crate::plan::Mutator) at hand.
//! They reach the heap through [`memory_manager::heap`] and record SATB entries in the heap's
//! shared buffer. A stub called without an installed Shenandoah heap aborts the process.

use super::{AccessKind, AccessSite, BarrierStub, BarrierStubGenerator, StubFrame};
use crate::memory_manager;
use crate::plan::shenandoah::Shenandoah;
use crate::util::error::protocol_violation;
use crate::util::{Address, MemorySlice, ObjectReference, Slot};

pub struct ShenandoahStubGenerator;

impl BarrierStubGenerator for ShenandoahStubGenerator {
    fn generate(&self, site: &AccessSite) -> Option<BarrierStub> {
        let stub: BarrierStub = match site.kind {
            AccessKind::Load => load_reference_barrier,
            AccessKind::StorePre => store_pre,
            AccessKind::StorePost => store_post,
            AccessKind::CompareAndSwap => compare_and_swap,
            AccessKind::ArrayCopyPre => array_copy_pre,
            AccessKind::ArrayCopyPost => array_copy_post,
            AccessKind::ClonePre => clone_pre,
        };
        Some(stub)
    }
}

fn heap() -> &'static Shenandoah {
    match memory_manager::heap().and_then(|heap| heap.downcast_ref::<Shenandoah>()) {
        Some(heap) => heap,
        None => protocol_violation!("Shenandoah barrier stub called without a Shenandoah heap"),
    }
}

fn object(value: usize) -> ObjectReference {
    ObjectReference::from_raw_address(unsafe { Address::from_usize(value) })
}

fn slot(value: usize) -> Slot {
    Slot::from_address(unsafe { Address::from_usize(value) })
}

extern "C" fn load_reference_barrier(frame: &mut StubFrame) {
    let heap = heap();
    let from = (frame.slot != 0).then(|| slot(frame.slot));
    frame.scratch[0] = heap
        .load_reference_barrier(from, object(frame.scratch[0]))
        .value();
}

extern "C" fn store_pre(frame: &mut StubFrame) {
    let heap = heap();
    heap.satb_pre_write(heap.satb().shared_buffer(), slot(frame.slot));
    frame.scratch[0] = heap
        .load_reference_barrier(None, object(frame.scratch[0]))
        .value();
}

extern "C" fn store_post(frame: &mut StubFrame) {
    heap().card_mark(slot(frame.slot));
}

extern "C" fn compare_and_swap(frame: &mut StubFrame) {
    let heap = heap();
    let expected = heap.load_reference_barrier(None, object(frame.scratch[0]));
    let new = heap.load_reference_barrier(None, object(frame.scratch[1]));
    let outcome = heap.cas_reference(heap.satb().shared_buffer(), slot(frame.slot), expected, new);
    frame.scratch[0] = outcome.is_success() as usize;
}

fn range(frame: &StubFrame) -> MemorySlice {
    MemorySlice::new(unsafe { Address::from_usize(frame.slot) }, frame.scratch[0])
}

extern "C" fn array_copy_pre(frame: &mut StubFrame) {
    let heap = heap();
    heap.array_copy_pre(heap.satb().shared_buffer(), range(frame));
}

extern "C" fn array_copy_post(frame: &mut StubFrame) {
    heap().array_copy_post(range(frame));
}

extern "C" fn clone_pre(frame: &mut StubFrame) {
    heap().clone_pre(object(frame.base));
}
