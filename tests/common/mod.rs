// Helpers shared by the integration tests. Not every test binary uses all of them.
#![allow(dead_code)]

use std::sync::Arc;
use vmheap::plan::shenandoah::Shenandoah;
use vmheap::plan::{create_mutator, CollectedHeap, Mutator};
use vmheap::util::constants::BYTES_IN_KBYTE;
use vmheap::util::options::Options;
use vmheap::util::ObjectReference;

/// A small Shenandoah heap: 64 regions of 64K, relocating every region with garbage.
pub const SMALL_SHENANDOAH: &[(&str, &str)] = &[
    ("Collector", "Shenandoah"),
    ("RegionSize", "64K"),
    ("InitialHeapSize", "1M"),
    ("MaxHeapSize", "4M"),
    ("MinTLABSize", "2K"),
    ("MaxTLABSize", "16K"),
    ("Heuristics", "Aggressive"),
    ("ConcGCThreads", "2"),
];

/// Built-in defaults with `settings` applied, ignoring the environment.
pub fn options(settings: &[(&str, &str)]) -> Options {
    let mut options = Options::builtin_defaults();
    for (name, value) in settings {
        assert!(
            options.set_from_camelcase_str(name, value),
            "cannot set {}={}",
            name,
            value
        );
    }
    options
}

/// A Shenandoah heap without a controller thread. Tests drive the cycle step by step.
pub fn shenandoah(settings: &[(&str, &str)]) -> Arc<Shenandoah> {
    Arc::new(Shenandoah::new(options(settings)).unwrap())
}

pub fn mutator(heap: &Arc<Shenandoah>) -> Mutator {
    let heap: Arc<dyn CollectedHeap> = heap.clone();
    create_mutator(heap)
}

/// Allocate unreachable objects of about 1K until `bytes` were allocated. Returns false if the heap
/// ran out first.
pub fn fill_garbage(mutator: &mut Mutator, bytes: usize) -> bool {
    let mut allocated = 0;
    while allocated < bytes {
        match mutator.alloc_object(1, BYTES_IN_KBYTE) {
            Some(_) => allocated += BYTES_IN_KBYTE,
            None => return false,
        }
    }
    true
}

/// Allocate an object with `ref_fields` reference fields and one payload word holding `tag`.
pub fn tagged(mutator: &mut Mutator, ref_fields: usize, tag: usize) -> ObjectReference {
    let object = mutator.alloc_object(ref_fields, 8).unwrap();
    mutator.store_word(object, 0, tag);
    object
}

/// Allocate, and collect once and retry if the heap is full.
pub fn alloc_or_collect(mutator: &mut Mutator, ref_fields: usize, payload: usize) -> ObjectReference {
    for _ in 0..8 {
        if let Some(object) = mutator.alloc_object(ref_fields, payload) {
            return object;
        }
        mutator.collect(vmheap::plan::GCCause::AllocationFailure);
    }
    panic!("out of memory");
}

/// Run init mark, concurrent mark and final mark. Returns the result of final mark.
pub fn mark(mutator: &mut Mutator, heap: &Shenandoah) -> bool {
    mutator.blocking(|| {
        assert!(heap.init_mark());
        assert!(heap.concurrent_mark());
        heap.final_mark()
    })
}

/// Run the relocation steps of a cycle that passed final mark.
pub fn relocate(mutator: &mut Mutator, heap: &Shenandoah) {
    mutator.blocking(|| {
        heap.evacuate();
        heap.update_refs();
        heap.recycle();
    })
}
