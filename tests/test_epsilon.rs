mod common;

use rand::Rng;
use std::sync::Arc;
use vmheap::memory_manager;
use vmheap::plan::{CollectedHeap, GCCause};
use vmheap::util::constants::*;
use vmheap::util::error::HeapError;
use vmheap::util::object_model;
use vmheap::HeapBuilder;

fn epsilon(settings: &[(&str, &str)]) -> Arc<dyn CollectedHeap> {
    let builder = HeapBuilder {
        options: common::options(settings),
    };
    builder.build().unwrap()
}

#[test]
fn heap_expands_in_steps_up_to_max() {
    let heap = epsilon(&[
        ("InitialHeapSize", "16M"),
        ("MaxHeapSize", "64M"),
        ("MinHeapExpand", "16M"),
    ]);
    assert_eq!(heap.name(), "Epsilon");
    assert_eq!(memory_manager::total_bytes(&*heap), 16 * BYTES_IN_MBYTE);
    let mut mutator = memory_manager::bind_mutator(&heap);
    let mut capacities = vec![heap.capacity()];
    while memory_manager::alloc(&mut mutator, BYTES_IN_MBYTE).is_some() {
        let capacity = heap.capacity();
        if capacity != *capacities.last().unwrap() {
            capacities.push(capacity);
        }
        assert!(heap.used() <= heap.capacity());
        assert!(heap.capacity() <= heap.max_capacity());
    }
    assert_eq!(
        capacities,
        vec![16, 32, 48, 64]
            .into_iter()
            .map(|m| m * BYTES_IN_MBYTE)
            .collect::<Vec<_>>()
    );
    // Nothing is ever freed, asking for a collection does not help.
    memory_manager::handle_user_collection_request(&mut mutator);
    assert!(memory_manager::alloc(&mut mutator, BYTES_IN_MBYTE).is_none());
    heap.verify().unwrap();
}

#[test]
fn tlabs_grow_from_the_minimum() {
    let heap = epsilon(&[("MinTLABSize", "4K"), ("MaxTLABSize", "64K")]);
    let mut mutator = memory_manager::bind_mutator(&heap);
    let first = mutator.alloc(64).unwrap();
    assert_eq!(mutator.tlab().size(), 4 * BYTES_IN_KBYTE);
    assert_eq!(mutator.tlab().start(), first);
    for _ in 1..64 {
        mutator.alloc(64).unwrap();
    }
    assert_eq!(mutator.tlab().free_bytes(), 0);
    assert_eq!(mutator.tlab_ergonomics().refills(), 1);
    // The next allocation refills with twice the size.
    mutator.alloc(64).unwrap();
    assert_eq!(mutator.tlab().size(), 8 * BYTES_IN_KBYTE);
    assert_eq!(mutator.tlab_ergonomics().refills(), 2);
}

#[test]
fn tlab_ergonomics_are_per_thread() {
    let heap = epsilon(&[("MinTLABSize", "4K"), ("MaxTLABSize", "64K")]);
    // Both threads take their first TLAB before either refills.
    let both_started = Arc::new(std::sync::Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let heap = heap.clone();
            let both_started = both_started.clone();
            std::thread::spawn(move || {
                let mut mutator = memory_manager::bind_mutator(&heap);
                mutator.alloc(64).unwrap();
                let first = mutator.tlab().size();
                both_started.wait();
                for _ in 1..64 {
                    mutator.alloc(64).unwrap();
                }
                assert_eq!(mutator.tlab().free_bytes(), 0);
                mutator.alloc(64).unwrap();
                (first, mutator.tlab().size(), mutator.tlab_ergonomics().refills())
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(
            handle.join().unwrap(),
            (4 * BYTES_IN_KBYTE, 8 * BYTES_IN_KBYTE, 2)
        );
    }
}

#[test]
fn oversized_requests_fail() {
    let heap = epsilon(&[("InitialHeapSize", "1M"), ("MaxHeapSize", "4M")]);
    let mut mutator = memory_manager::bind_mutator(&heap);
    // Sizes that would wrap around when rounded up.
    assert!(mutator.alloc(usize::MAX - 3).is_none());
    assert!(mutator.alloc(usize::MAX & !7).is_none());
    assert!(mutator.alloc(object_model::MAX_OBJECT_SIZE + 1).is_none());
    assert!(mutator.alloc_object(0, object_model::MAX_OBJECT_SIZE).is_none());
    assert!(mutator.alloc_object(usize::MAX / BYTES_IN_WORD, 0).is_none());
    assert!(memory_manager::alloc(&mut mutator, usize::MAX - 3).is_none());
    // Larger than the heap, but a valid object size.
    assert!(mutator.alloc(8 * BYTES_IN_MBYTE).is_none());
    assert!(mutator.tlab().is_empty());
    assert_eq!(heap.used(), 0);
    assert!(heap.capacity() <= heap.max_capacity());
    assert!(mutator.alloc_object(1, 8).is_some());
}

#[test]
fn large_objects_bypass_tlabs() {
    let heap = epsilon(&[("MaxTLABSize", "16K")]);
    let mut mutator = memory_manager::bind_mutator(&heap);
    let addr = mutator.alloc(32 * BYTES_IN_KBYTE).unwrap();
    assert!(mutator.tlab().is_empty());
    assert!(memory_manager::is_in_heap(&*heap, addr));
    assert_eq!(mutator.tlab_ergonomics().refills(), 0);
}

#[test]
fn concurrent_allocations_never_overlap() {
    const THREADS: usize = 4;
    const OBJECTS: usize = 2000;
    let heap = epsilon(&[("InitialHeapSize", "1M"), ("MinHeapExpand", "1M")]);
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let heap = heap.clone();
            std::thread::spawn(move || {
                let mut mutator = memory_manager::bind_mutator(&heap);
                let mut rng = rand::rng();
                (0..OBJECTS)
                    .map(|i| {
                        let payload = rng.random_range(1..=32usize) * BYTES_IN_WORD;
                        let object = mutator.alloc_object(0, payload).unwrap();
                        mutator.store_word(object, 0, t * OBJECTS + i);
                        object
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let mut objects: Vec<_> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    let mut mutator = memory_manager::bind_mutator(&heap);
    let mut tags: Vec<usize> = objects.iter().map(|o| mutator.load_word(*o, 0)).collect();
    tags.sort_unstable();
    assert_eq!(tags, (0..THREADS * OBJECTS).collect::<Vec<_>>());

    objects.sort_by_key(|o| o.to_raw_address());
    for pair in objects.windows(2) {
        assert!(object_model::object_end(pair[0]) <= pair[1].to_raw_address());
    }
    assert!(heap.used() <= heap.capacity());
    assert!(heap.capacity() <= heap.max_capacity());
}

#[test]
fn out_of_memory_returns_none() {
    let heap = epsilon(&[("InitialHeapSize", "64K"), ("MaxHeapSize", "64K")]);
    let mut mutator = memory_manager::bind_mutator(&heap);
    assert!(memory_manager::alloc(&mut mutator, 128 * BYTES_IN_KBYTE).is_none());
    assert!(memory_manager::alloc(&mut mutator, 8 * BYTES_IN_KBYTE).is_some());
    assert_eq!(heap.monitoring().memory_manager().collection_count(), 0);
}

#[test]
fn collect_is_a_no_op() {
    let heap = epsilon(&[]);
    let mut mutator = memory_manager::bind_mutator(&heap);
    let object = mutator.alloc_object(1, 8).unwrap();
    mutator.store_word(object, 0, 7);
    let used = heap.used();
    mutator.collect(GCCause::UserRequested);
    assert_eq!(heap.used(), used);
    assert_eq!(mutator.load_word(object, 0), 7);
    assert!(memory_manager::barrier_stub(
        &*heap,
        &vmheap::codegen::AccessSite::new(vmheap::codegen::AccessKind::Load)
    )
    .is_none());
}

#[test]
fn builder_rejects_inconsistent_options() {
    let mut builder = HeapBuilder {
        options: common::options(&[]),
    };
    assert!(!builder.set_option("NoSuchOption", "1"));
    assert!(!builder.set_option("MaxHeapSize", "lots"));
    assert!(builder.set_options_bulk("InitialHeapSize=64M MaxHeapSize=32M"));
    assert!(matches!(builder.build(), Err(HeapError::InvalidOptions(_))));
}
