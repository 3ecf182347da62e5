mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Barrier};
use vmheap::plan::shenandoah::{gc_state, CyclePhase};
use vmheap::plan::{CasOutcome, CollectedHeap, GCCause};
use vmheap::policy::region::RegionState;
use vmheap::util::constants::*;
use vmheap::util::object_model::{self, forwarding};
use vmheap::util::ObjectReference;

use common::{fill_garbage, mark, mutator, relocate, shenandoah, tagged, SMALL_SHENANDOAH};

const REGION: usize = 64 * BYTES_IN_KBYTE;

#[test]
fn overwritten_reference_is_marked() {
    let heap = shenandoah(SMALL_SHENANDOAH);
    let mut m = mutator(&heap);
    let a = m.alloc_object(1, 0).unwrap();
    let o = tagged(&mut m, 0, 99);
    let unreachable = tagged(&mut m, 0, 100);
    m.store_ref(a, 0, o);
    let root = m.new_root(a);
    assert_eq!(heap.barrier_stats().satb_enqueues.load(Ordering::Relaxed), 0);

    assert!(m.blocking(|| heap.init_mark()));
    assert!(heap.is_marking());
    assert_eq!(heap.phase(), CyclePhase::ConcurrentMark);

    // Cut the only path to O before the marker traced A.
    let a = m.load_root(&root);
    m.store_ref(a, 0, ObjectReference::NULL);
    assert_eq!(heap.barrier_stats().satb_enqueues.load(Ordering::Relaxed), 1);
    // Allocated during marking: live without tracing.
    let fresh = tagged(&mut m, 0, 101);

    let relocating = m.blocking(|| {
        assert!(heap.concurrent_mark());
        heap.final_mark()
    });
    // Everything is in the current allocation region, which is never relocated.
    assert!(!relocating);
    assert_eq!(heap.phase(), CyclePhase::Idle);
    assert_eq!(heap.gc_state(), 0);
    assert!(heap.is_marked(a));
    assert!(heap.is_marked(o));
    assert!(heap.is_marked(fresh));
    assert!(!heap.is_marked(unreachable));
    assert_eq!(heap.cycle_stats().completed.load(Ordering::Relaxed), 1);
    heap.verify().unwrap();
}

#[test]
fn array_copy_enqueues_overwritten_elements() {
    let heap = shenandoah(SMALL_SHENANDOAH);
    let mut m = mutator(&heap);
    let src = m.alloc_object(2, 0).unwrap();
    let dst = m.alloc_object(2, 0).unwrap();
    let x = tagged(&mut m, 0, 1);
    let y = tagged(&mut m, 0, 2);
    m.store_ref(dst, 0, x);
    m.store_ref(dst, 1, y);
    let _src_root = m.new_root(src);
    let dst_root = m.new_root(dst);

    assert!(m.blocking(|| heap.init_mark()));
    let dst = m.load_root(&dst_root);
    m.copy_refs(src, 0, dst, 0, 2);
    assert!(m.load_ref(dst, 0).is_null());
    assert!(m.load_ref(dst, 1).is_null());
    assert_eq!(heap.barrier_stats().satb_enqueues.load(Ordering::Relaxed), 2);

    m.blocking(|| {
        assert!(heap.concurrent_mark());
        heap.final_mark()
    });
    assert!(heap.is_marked(x));
    assert!(heap.is_marked(y));
}

#[test]
fn stores_mark_the_card_of_the_region() {
    let heap = shenandoah(SMALL_SHENANDOAH);
    let mut m = mutator(&heap);
    let a = m.alloc_object(1, 0).unwrap();
    let b = m.alloc_object(0, 0).unwrap();
    let region = heap.space().region_of(a.to_raw_address()).unwrap().index();
    assert!(heap.space().take_dirty_regions().is_empty());
    m.store_ref(a, 0, b);
    assert!(heap.space().region(region).is_dirty());
    assert_eq!(heap.space().take_dirty_regions(), vec![region]);

    let mut settings = SMALL_SHENANDOAH.to_vec();
    settings.push(("CardBarrier", "false"));
    let heap = shenandoah(&settings);
    let mut m = mutator(&heap);
    let a = m.alloc_object(1, 0).unwrap();
    let b = m.alloc_object(0, 0).unwrap();
    m.store_ref(a, 0, b);
    assert!(heap.space().take_dirty_regions().is_empty());
}

#[test]
fn relocation_leaves_one_canonical_copy() {
    let heap = shenandoah(SMALL_SHENANDOAH);
    let mut m = mutator(&heap);
    let a = tagged(&mut m, 2, 42);
    let b = tagged(&mut m, 0, 43);
    m.store_ref(a, 0, b);
    let root = m.new_root(a);
    let from_region = heap.space().region_of(a.to_raw_address()).unwrap().index();
    // Push the allocation region past A's region.
    assert!(fill_garbage(&mut m, 2 * REGION));
    m.retire_tlab();
    let used_before = heap.used();

    assert!(mark(&mut m, &heap));
    assert_eq!(heap.phase(), CyclePhase::ConcurrentRelocate);
    assert_eq!(heap.gc_state(), gc_state::HAS_FORWARDED | gc_state::EVACUATION);
    assert_eq!(
        heap.space().region(from_region).state(),
        RegionState::Relocating
    );

    // The mutator gets to A before the collector does and copies it.
    let a = forwarding::resolve(root.slot().load());
    assert!(!forwarding::is_forwarded(a));
    let a1 = m.load_root(&root);
    assert_ne!(a1, a);
    assert_eq!(forwarding::get_forwardee(a), Some(a1));
    // The root was healed.
    assert_eq!(root.slot().load(), a1);
    assert_eq!(m.resolve(a), a1);
    assert_eq!(m.resolve(a1), a1);
    let twice = m.resolve(a);
    assert_eq!(m.resolve(twice), a1);
    assert_eq!(m.load_word(a, 0), 42);
    assert_eq!(m.load_word(a1, 0), 42);
    assert!(heap.barrier_stats().self_heals.load(Ordering::Relaxed) >= 1);

    // Reading the field of the new copy copies B as well.
    let b1 = m.load_ref(a1, 0);
    assert_ne!(b1, b);
    assert_eq!(m.load_word(b1, 0), 43);
    assert_eq!(object_model::ref_field_slot(a1, 0).load(), b1);

    relocate(&mut m, &heap);
    assert_eq!(heap.phase(), CyclePhase::Idle);
    assert_eq!(heap.gc_state(), 0);
    assert_eq!(heap.space().region(from_region).state(), RegionState::Empty);
    assert!(heap.used() < used_before);
    assert!(heap.cycle_stats().recycled_regions.load(Ordering::Relaxed) >= 2);

    let a = m.load_root(&root);
    assert_eq!(a, a1);
    assert_eq!(m.load_ref(a, 0), b1);
    let b = m.load_ref(a, 0);
    assert_eq!(m.load_word(b, 0), 43);
    heap.verify().unwrap();
}

#[test]
fn racing_evacuations_agree_on_the_copy() {
    const THREADS: usize = 8;
    let heap = shenandoah(SMALL_SHENANDOAH);
    let mut m = mutator(&heap);
    let t = tagged(&mut m, 0, 7);
    let root = m.new_root(t);
    assert!(fill_garbage(&mut m, 2 * REGION));
    m.retire_tlab();
    assert!(mark(&mut m, &heap));

    let t = root.slot().load();
    let start = Arc::new(Barrier::new(THREADS));
    let copies: Vec<ObjectReference> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let heap = &heap;
                let start = start.clone();
                s.spawn(move || {
                    start.wait();
                    heap.load_reference_barrier(None, t)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    let canonical = forwarding::get_forwardee(t).unwrap();
    assert_ne!(canonical, t);
    assert!(copies.iter().all(|&c| c == canonical));
    // Only the winner's copy is an object of its region.
    let to_region = heap.space().region_of(canonical.to_raw_address()).unwrap();
    assert_eq!(to_region.object_count(), 1);

    relocate(&mut m, &heap);
    assert_eq!(m.load_root(&root), canonical);
    assert_eq!(m.load_word(canonical, 0), 7);
    heap.verify().unwrap();
}

#[test]
fn cas_retries_once_on_a_stale_copy() {
    let heap = shenandoah(SMALL_SHENANDOAH);
    let mut m = mutator(&heap);
    let t = tagged(&mut m, 0, 1);
    let t_root = m.new_root(t);
    assert!(fill_garbage(&mut m, 2 * REGION));
    // H lives in the allocation region, which stays where it is.
    let h = m.alloc_object(1, 0).unwrap();
    m.store_ref(h, 0, t);
    let h_root = m.new_root(h);
    m.retire_tlab();
    assert!(mark(&mut m, &heap));

    let h = m.load_root(&h_root);
    assert_eq!(
        heap.space().region_of(h.to_raw_address()).unwrap().state(),
        RegionState::Allocating
    );
    let stale = object_model::ref_field_slot(h, 0).load();
    let fresh = m.load_root(&t_root);
    assert_ne!(stale, fresh);
    // Resolving through the root does not touch H.
    assert_eq!(object_model::ref_field_slot(h, 0).load(), stale);

    let n = tagged(&mut m, 0, 2);
    let other = tagged(&mut m, 0, 3);
    assert_eq!(m.cas_ref(h, 0, fresh, n), CasOutcome::SuccessAfterRetry);
    assert_eq!(heap.barrier_stats().cas_retries.load(Ordering::Relaxed), 1);
    assert_eq!(m.load_ref(h, 0), n);

    // A different object in the slot fails once, without a retry.
    assert_eq!(m.cas_ref(h, 0, fresh, other), CasOutcome::Failure(n));
    assert_eq!(heap.barrier_stats().cas_retries.load(Ordering::Relaxed), 1);
    assert_eq!(m.cas_ref(h, 0, n, other), CasOutcome::Success);
    assert_eq!(m.load_ref(h, 0), other);

    relocate(&mut m, &heap);
    heap.verify().unwrap();
    let t = m.load_root(&t_root);
    assert_eq!(m.load_word(t, 0), 1);
}

#[test]
fn clone_sees_only_resolved_references() {
    let heap = shenandoah(SMALL_SHENANDOAH);
    let mut m = mutator(&heap);
    let t = tagged(&mut m, 0, 5);
    let _t_root = m.new_root(t);
    assert!(fill_garbage(&mut m, 2 * REGION));
    let h = m.alloc_object(1, 0).unwrap();
    m.store_ref(h, 0, t);
    let h_root = m.new_root(h);
    m.retire_tlab();
    assert!(mark(&mut m, &heap));

    let h = m.load_root(&h_root);
    let stale = object_model::ref_field_slot(h, 0).load();
    let c = m.clone_object(h).unwrap();
    let copied = object_model::ref_field_slot(c, 0).load();
    assert_ne!(copied, stale);
    assert_eq!(forwarding::get_forwardee(stale), Some(copied));
    assert_eq!(object_model::ref_field_slot(h, 0).load(), copied);

    relocate(&mut m, &heap);
    heap.verify().unwrap();
}

#[test]
fn cancellation_is_accepted_while_marking() {
    let heap = shenandoah(SMALL_SHENANDOAH);
    let mut m = mutator(&heap);
    let a = tagged(&mut m, 1, 1);
    let root = m.new_root(a);
    assert!(!heap.cancel_cycle());

    assert!(m.blocking(|| heap.init_mark()));
    assert!(heap.cancel_cycle());
    assert!(!m.blocking(|| heap.concurrent_mark()));
    assert_eq!(heap.phase(), CyclePhase::Idle);
    assert_eq!(heap.gc_state(), 0);
    assert_eq!(heap.cycle_stats().cancelled.load(Ordering::Relaxed), 1);
    assert_eq!(heap.cycle_stats().completed.load(Ordering::Relaxed), 0);

    // Cancelled after the concurrent phase, before final mark.
    assert!(m.blocking(|| heap.init_mark()));
    assert!(m.blocking(|| heap.concurrent_mark()));
    assert!(heap.cancel_cycle());
    assert!(!m.blocking(|| heap.final_mark()));
    assert_eq!(heap.phase(), CyclePhase::Idle);
    assert_eq!(heap.cycle_stats().cancelled.load(Ordering::Relaxed), 2);

    // The next cycle starts from scratch.
    assert!(fill_garbage(&mut m, 2 * REGION));
    m.retire_tlab();
    assert!(mark(&mut m, &heap));
    assert!(!heap.cancel_requested());
    relocate(&mut m, &heap);
    assert_eq!(heap.cycle_stats().completed.load(Ordering::Relaxed), 1);
    let a = m.load_root(&root);
    assert_eq!(m.load_word(a, 0), 1);
    heap.verify().unwrap();
}

#[test]
fn cancellation_is_refused_while_relocating() {
    let heap = shenandoah(SMALL_SHENANDOAH);
    let mut m = mutator(&heap);
    let root = {
        let a = tagged(&mut m, 0, 9);
        m.new_root(a)
    };
    assert!(fill_garbage(&mut m, 2 * REGION));
    m.retire_tlab();
    assert!(mark(&mut m, &heap));
    assert!(!heap.cancel_cycle());
    assert!(!heap.cancel_requested());
    assert_eq!(heap.phase(), CyclePhase::ConcurrentRelocate);

    m.blocking(|| heap.evacuate());
    assert_eq!(heap.gc_state(), gc_state::HAS_FORWARDED | gc_state::UPDATE_REFS);
    assert!(!heap.cancel_cycle());
    m.blocking(|| {
        heap.update_refs();
        heap.recycle();
    });
    assert_eq!(heap.cycle_stats().completed.load(Ordering::Relaxed), 1);
    assert_eq!(heap.cycle_stats().cancelled.load(Ordering::Relaxed), 0);
    let a = m.load_root(&root);
    assert_eq!(m.load_word(a, 0), 9);
}

#[test]
fn failed_evacuation_keeps_objects_in_place() {
    let heap = shenandoah(&[
        ("Collector", "Shenandoah"),
        ("RegionSize", "64K"),
        ("InitialHeapSize", "256K"),
        ("MaxHeapSize", "256K"),
        ("MinTLABSize", "2K"),
        ("MaxTLABSize", "16K"),
        ("EvacReserve", "0"),
        ("Heuristics", "Aggressive"),
        ("ConcGCThreads", "1"),
    ]);
    let mut m = mutator(&heap);
    let a = tagged(&mut m, 0, 11);
    let root = m.new_root(a);
    // Fill every region: there is nowhere left to evacuate to.
    assert!(!fill_garbage(&mut m, usize::MAX));
    m.retire_tlab();
    assert!(mark(&mut m, &heap));

    let resolved = m.load_root(&root);
    assert_eq!(resolved, a);
    assert!(forwarding::is_self_forwarded(a));
    let region = heap.space().region_of(a.to_raw_address()).unwrap();
    assert!(region.evac_failed());
    assert_eq!(
        heap.cycle_stats().evacuation_failures.load(Ordering::Relaxed),
        1
    );

    relocate(&mut m, &heap);
    assert_eq!(region.state(), RegionState::Allocating);
    assert!(!region.evac_failed());
    assert!(!forwarding::is_forwarded(a));
    assert_eq!(m.load_root(&root), a);
    assert_eq!(m.load_word(a, 0), 11);
    assert!(heap.cycle_stats().recycled_regions.load(Ordering::Relaxed) >= 1);
    heap.verify().unwrap();
    // The recycled regions take allocations again.
    assert!(m.alloc_object(0, BYTES_IN_KBYTE).is_some());
}

#[test]
fn collect_runs_a_whole_cycle() {
    let heap = shenandoah(SMALL_SHENANDOAH);
    let mut m = mutator(&heap);
    let mut roots = vec![];
    for i in 0..16 {
        let object = tagged(&mut m, 1, i);
        if let Some(prev) = roots.last() {
            let prev = m.load_root(prev);
            m.store_ref(object, 0, prev);
        }
        roots.push(m.new_root(object));
        assert!(fill_garbage(&mut m, 8 * BYTES_IN_KBYTE));
    }
    assert!(fill_garbage(&mut m, 2 * REGION));
    let used = heap.used();

    m.collect(GCCause::UserRequested);
    assert_eq!(heap.phase(), CyclePhase::Idle);
    assert_eq!(heap.cycle_stats().completed.load(Ordering::Relaxed), 1);
    assert_eq!(heap.monitoring().memory_manager().collection_count(), 1);
    assert!(heap.used() < used);
    heap.verify().unwrap();

    // Walk the chain from the last root.
    let mut object = m.load_root(roots.last().unwrap());
    for i in (0..16).rev() {
        assert_eq!(m.load_word(object, 0), i);
        object = m.load_ref(object, 0);
    }
    assert!(object.is_null());
    assert!(heap.heap_info().contains("phase Idle"));
}

#[test]
fn collector_must_match_the_options() {
    let options = common::options(&[("Collector", "Epsilon")]);
    assert!(vmheap::plan::shenandoah::Shenandoah::new(options).is_err());
    let options = common::options(&[
        ("Collector", "Shenandoah"),
        ("RegionSize", "1M"),
        ("MaxHeapSize", "1M"),
        ("InitialHeapSize", "1M"),
    ]);
    assert!(vmheap::plan::shenandoah::Shenandoah::new(options).is_err());
}
