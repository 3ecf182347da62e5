// Barrier stubs reach the heap installed for the process, so this binary holds a single test.
mod common;

use std::sync::Arc;
use vmheap::codegen::{AccessKind, AccessSite, StubFrame};
use vmheap::memory_manager;
use vmheap::plan::shenandoah::Shenandoah;
use vmheap::plan::CollectedHeap;
use vmheap::util::constants::*;
use vmheap::util::error::HeapError;
use vmheap::util::object_model::{self, forwarding};
use vmheap::util::ObjectReference;

use common::{fill_garbage, mutator, relocate, tagged, SMALL_SHENANDOAH};

fn call(heap: &dyn CollectedHeap, site: AccessSite, frame: &mut StubFrame) {
    let stub = memory_manager::barrier_stub(heap, &site)
        .unwrap_or_else(|| panic!("no stub for {:?}", site));
    stub(frame);
}

fn value(object: ObjectReference) -> usize {
    object.to_raw_address().as_usize()
}

#[test]
fn compiled_code_goes_through_the_stubs() {
    let heap = common::shenandoah(SMALL_SHENANDOAH);
    let dyn_heap: Arc<dyn CollectedHeap> = heap.clone();
    memory_manager::install_heap(dyn_heap.clone()).unwrap();
    assert!(matches!(
        memory_manager::install_heap(dyn_heap.clone()),
        Err(HeapError::AlreadyInstalled)
    ));
    assert!(memory_manager::heap()
        .and_then(|h| h.downcast_ref::<Shenandoah>())
        .is_some());
    let heap_ref: &dyn CollectedHeap = &*dyn_heap;

    // Stores into a fresh TLAB object need no barrier.
    let store = AccessSite::new(AccessKind::StorePre);
    assert!(memory_manager::barrier_stub(heap_ref, &store).is_some());
    assert!(memory_manager::barrier_stub(heap_ref, &store.in_new_tlab_object()).is_none());

    let mut m = mutator(&heap);
    let t = tagged(&mut m, 0, 3);
    let o = tagged(&mut m, 0, 5);
    let a = m.alloc_object(1, 0).unwrap();
    let t_root = m.new_root(t);
    let a_root = m.new_root(a);
    m.store_ref(a, 0, o);
    assert!(fill_garbage(&mut m, 2 * 64 * BYTES_IN_KBYTE));
    m.retire_tlab();

    // Outside of a cycle the load stub returns what was loaded.
    let slot = object_model::ref_field_slot(a, 0);
    let mut frame = StubFrame::new(value(a), slot.as_address().as_usize(), [value(o), 0, 0]);
    call(heap_ref, AccessSite::new(AccessKind::Load), &mut frame);
    assert_eq!(frame.result(), value(o));

    // SATB through the pre-write stub: the stub records O, compiled code stores null.
    assert!(m.blocking(|| heap.init_mark()));
    let mut frame = StubFrame::new(value(a), slot.as_address().as_usize(), [0, 0, 0]);
    call(heap_ref, AccessSite::new(AccessKind::StorePre), &mut frame);
    assert_eq!(frame.result(), 0);
    slot.store(ObjectReference::NULL);
    call(heap_ref, AccessSite::new(AccessKind::StorePost), &mut frame);
    assert!(heap.space().region_of(a.to_raw_address()).unwrap().is_dirty());
    assert_eq!(heap.satb().shared_buffer().len(), 1);
    assert!(m.blocking(|| {
        assert!(heap.concurrent_mark());
        heap.final_mark()
    }));
    assert!(heap.is_marked(o));

    // While evacuating, the load stub copies and heals the slot it was given.
    let root_slot = t_root.slot();
    let mut frame = StubFrame::new(0, root_slot.as_address().as_usize(), [value(t), 0, 0]);
    call(heap_ref, AccessSite::new(AccessKind::Load), &mut frame);
    let t1 = forwarding::get_forwardee(t).unwrap();
    assert_ne!(t1, t);
    assert_eq!(frame.result(), value(t1));
    assert_eq!(root_slot.load(), t1);

    // The CAS stub swaps a stale copy for the expected object, then fails.
    let a = m.load_root(&a_root);
    let slot = object_model::ref_field_slot(a, 0);
    slot.store(t);
    let n = tagged(&mut m, 0, 4);
    let mut frame = StubFrame::new(value(a), slot.as_address().as_usize(), [value(t1), value(n), 0]);
    call(heap_ref, AccessSite::new(AccessKind::CompareAndSwap), &mut frame);
    assert_eq!(frame.result(), 1);
    assert_eq!(slot.load(), n);
    let mut frame = StubFrame::new(value(a), slot.as_address().as_usize(), [value(t1), value(n), 0]);
    call(heap_ref, AccessSite::new(AccessKind::CompareAndSwap), &mut frame);
    assert_eq!(frame.result(), 0);

    // Clone and array copy stubs only touch the source and the card.
    slot.store(t);
    let mut frame = StubFrame::new(value(a), 0, [0, 0, 0]);
    call(heap_ref, AccessSite::new(AccessKind::ClonePre), &mut frame);
    assert_eq!(slot.load(), t1);
    let mut frame = StubFrame::new(value(a), slot.as_address().as_usize(), [1, 0, 0]);
    call(heap_ref, AccessSite::new(AccessKind::ArrayCopyPre), &mut frame);
    call(heap_ref, AccessSite::new(AccessKind::ArrayCopyPost), &mut frame);

    // Compiled code stores into a fresh object with no barrier, so the value may be a stale copy.
    // Update refs still fixes it: objects allocated during the cycle are above TAMS.
    let store_site = AccessSite::new(AccessKind::StorePre).in_new_tlab_object();
    assert!(memory_manager::barrier_stub(heap_ref, &store_site).is_none());
    let fresh = m.alloc_object(1, 0).unwrap();
    object_model::ref_field_slot(fresh, 0).store(t);
    let fresh_root = m.new_root(fresh);

    relocate(&mut m, &heap);
    heap.verify().unwrap();
    let t = m.load_root(&t_root);
    assert_eq!(t, t1);
    assert_eq!(m.load_word(t, 0), 3);
    let fresh = m.load_root(&fresh_root);
    assert_eq!(object_model::ref_field_slot(fresh, 0).load(), t1);
}
