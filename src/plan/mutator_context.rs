//! Mutator context for each application thread.

use std::sync::Arc;

use crate::plan::barriers::{Barrier, BarrierSelector, CasOutcome, MutatorBarrier, NoBarrier};
use crate::plan::global::{CollectedHeap, GCCause};
use crate::plan::shenandoah::{Shenandoah, ShenandoahBarrier};
use crate::util::alloc::{Tlab, TlabErgonomics};
use crate::util::constants::*;
use crate::util::conversions::raw_align_up;
use crate::util::object_model::{self, MAX_OBJECT_SIZE, MIN_OBJECT_SIZE};
use crate::util::roots::RootHandle;
use crate::util::{Address, MemorySlice, ObjectReference};
use std::sync::atomic::{AtomicUsize, Ordering};

/// The per-thread state of an application thread: its TLAB, its barrier, and its membership in
/// the heap's handshake.
///
/// A mutator is joined to the handshake from creation to drop, except inside
/// [`Mutator::blocking`]. It must reach [`Mutator::safepoint_poll`] regularly. References held in
/// local variables are only valid until the next poll; anything kept longer belongs in a
/// [`RootHandle`].
pub struct Mutator {
    heap: Arc<dyn CollectedHeap>,
    tlab: Tlab,
    ergonomics: TlabErgonomics,
    barrier: MutatorBarrier,
}

/// Create a mutator with the barrier of the heap's collector.
pub fn create_mutator(heap: Arc<dyn CollectedHeap>) -> Mutator {
    let barrier = match heap.barrier_selector() {
        BarrierSelector::NoBarrier => MutatorBarrier::NoBarrier(NoBarrier),
        BarrierSelector::Shenandoah => {
            let shenandoah = heap
                .clone()
                .downcast_arc::<Shenandoah>()
                .unwrap_or_else(|_| panic!("{} selects the Shenandoah barrier", heap.name()));
            MutatorBarrier::Shenandoah(ShenandoahBarrier::new(shenandoah))
        }
    };
    if let Some(handshake) = heap.handshake() {
        handshake.join();
    }
    Mutator {
        heap,
        tlab: Tlab::new(),
        ergonomics: TlabErgonomics::new(),
        barrier,
    }
}

impl Mutator {
    pub fn heap(&self) -> &Arc<dyn CollectedHeap> {
        &self.heap
    }

    pub fn barrier(&mut self) -> &mut MutatorBarrier {
        &mut self.barrier
    }

    pub fn tlab(&self) -> &Tlab {
        &self.tlab
    }

    pub fn tlab_ergonomics(&self) -> &TlabErgonomics {
        &self.ergonomics
    }

    /// Allocate `size` bytes, rounded up to the minimum object size and alignment. The memory is
    /// zeroed. The caller initializes the header and calls [`Mutator::post_alloc`]. Requests above
    /// [`MAX_OBJECT_SIZE`] fail.
    #[inline(always)]
    pub fn alloc(&mut self, size: usize) -> Option<Address> {
        if size > MAX_OBJECT_SIZE {
            return None;
        }
        let size = raw_align_up(size.max(MIN_OBJECT_SIZE), MIN_OBJECT_ALIGNMENT);
        if let Some(addr) = self.tlab.alloc(size) {
            return Some(addr);
        }
        self.alloc_slow(size)
    }

    #[inline(never)]
    fn alloc_slow(&mut self, size: usize) -> Option<Address> {
        // Requests that can never fit a TLAB go straight to the shared path.
        if size > self.heap.unsafe_max_tlab_alloc() {
            trace!("{} bytes bypass the TLAB", size);
            return self.heap.allocate(size);
        }
        self.retire_tlab();
        match self.heap.allocate_new_tlab(&mut self.ergonomics, size) {
            Some((start, tlab_size)) => {
                trace!("New TLAB [{}, {})", start, start + tlab_size);
                self.tlab.reset(start, tlab_size);
                self.tlab.alloc(size)
            }
            None => self.heap.allocate(size),
        }
    }

    pub fn post_alloc(&mut self, object: ObjectReference) {
        self.heap.post_alloc(object);
    }

    /// Allocate and initialize an object with `ref_fields` null reference fields and
    /// `payload_bytes` zeroed bytes of payload.
    pub fn alloc_object(&mut self, ref_fields: usize, payload_bytes: usize) -> Option<ObjectReference> {
        let size = object_model::object_size(ref_fields, payload_bytes)?;
        let start = self.alloc(size)?;
        let object = object_model::initialize_header(start, size, ref_fields);
        self.post_alloc(object);
        Some(object)
    }

    /// Load reference field `index` of `src`.
    pub fn load_ref(&mut self, src: ObjectReference, index: usize) -> ObjectReference {
        let src = self.barrier.resolve(src);
        let slot = object_model::ref_field_slot(src, index);
        self.barrier.object_reference_load(Some(slot), slot.load())
    }

    /// Store `value` into reference field `index` of `src`.
    pub fn store_ref(&mut self, src: ObjectReference, index: usize, value: ObjectReference) {
        let src = self.barrier.resolve(src);
        let value = self.barrier.resolve(value);
        let slot = object_model::ref_field_slot(src, index);
        self.barrier.object_reference_write(src, slot, value);
    }

    /// Replace reference field `index` of `src` with `new` if it holds `expected`.
    pub fn cas_ref(
        &mut self,
        src: ObjectReference,
        index: usize,
        expected: ObjectReference,
        new: ObjectReference,
    ) -> CasOutcome {
        let src = self.barrier.resolve(src);
        let expected = self.barrier.resolve(expected);
        let new = self.barrier.resolve(new);
        let slot = object_model::ref_field_slot(src, index);
        self.barrier.object_reference_cas(slot, expected, new)
    }

    /// Copy `len` reference fields of `src` starting at `src_index` into `dst` starting at
    /// `dst_index`. The ranges may overlap.
    pub fn copy_refs(
        &mut self,
        src: ObjectReference,
        src_index: usize,
        dst: ObjectReference,
        dst_index: usize,
        len: usize,
    ) {
        if len == 0 {
            return;
        }
        let src = self.barrier.resolve(src);
        let dst = self.barrier.resolve(dst);
        assert!(src_index + len <= object_model::ref_field_count(src));
        assert!(dst_index + len <= object_model::ref_field_count(dst));
        let from = MemorySlice::new(object_model::ref_field_slot(src, src_index).as_address(), len);
        let to = MemorySlice::new(object_model::ref_field_slot(dst, dst_index).as_address(), len);
        self.barrier.memory_region_copy_pre(to);
        let mut copy_one = |i: usize| {
            let slot = from.get(i);
            let value = self.barrier.object_reference_load(Some(slot), slot.load());
            to.get(i).store(value);
        };
        if from.start() < to.start() {
            (0..len).rev().for_each(&mut copy_one);
        } else {
            (0..len).for_each(&mut copy_one);
        }
        self.barrier.memory_region_copy_post(to);
    }

    /// Allocate a copy of `src`.
    pub fn clone_object(&mut self, src: ObjectReference) -> Option<ObjectReference> {
        let src = self.barrier.resolve(src);
        self.barrier.object_clone_pre(src);
        let start = self.alloc(object_model::get_size(src))?;
        let object = unsafe { object_model::copy_to(src, start) };
        self.post_alloc(object);
        Some(object)
    }

    /// Load the payload word at byte `offset` of the payload of `object`.
    pub fn load_word(&mut self, object: ObjectReference, offset: usize) -> usize {
        let object = self.barrier.resolve(object);
        let addr = payload_word(object, offset);
        unsafe { addr.atomic_load::<AtomicUsize>(Ordering::Relaxed) }
    }

    /// Store `value` into the payload word at byte `offset` of the payload of `object`.
    pub fn store_word(&mut self, object: ObjectReference, offset: usize, value: usize) {
        let object = self.barrier.resolve(object);
        let addr = payload_word(object, offset);
        unsafe { addr.atomic_store::<AtomicUsize>(value, Ordering::Relaxed) }
    }

    /// Register a root slot holding `value`.
    pub fn new_root(&mut self, value: ObjectReference) -> RootHandle {
        let value = self.barrier.resolve(value);
        self.heap.roots().new_handle(value)
    }

    pub fn load_root(&mut self, root: &RootHandle) -> ObjectReference {
        let slot = root.slot();
        self.barrier.object_reference_load(Some(slot), slot.load())
    }

    pub fn store_root(&mut self, root: &RootHandle, value: ObjectReference) {
        let value = self.barrier.resolve(value);
        root.slot().store(value);
    }

    /// The copy of `object` the mutator may access.
    pub fn resolve(&mut self, object: ObjectReference) -> ObjectReference {
        self.barrier.resolve(object)
    }

    /// Hand the thread-local barrier state over to the collector.
    pub fn flush(&mut self) {
        self.barrier.flush();
    }

    /// Stop allocating into the current TLAB.
    pub fn retire_tlab(&mut self) {
        if let Some((start, top, end)) = self.tlab.retire() {
            self.heap.retire_tlab(start, top, end);
        }
    }

    /// Let a pending handshake run. Returns whether the mutator yielded.
    #[inline(always)]
    pub fn safepoint_poll(&mut self) -> bool {
        match self.heap.handshake() {
            Some(handshake) if handshake.should_yield() => handshake.poll(),
            _ => false,
        }
    }

    /// Run `f` outside of the handshake, so the collector may proceed while it blocks. `f` must
    /// not access the heap through this mutator.
    pub fn blocking<R, F: FnOnce() -> R>(&mut self, f: F) -> R {
        let handshake = self.heap.handshake();
        if let Some(handshake) = handshake {
            handshake.leave();
        }
        let result = f();
        if let Some(handshake) = handshake {
            handshake.join();
        }
        result
    }

    /// Request a collection and wait for the heap to handle it.
    pub fn collect(&mut self, cause: GCCause) {
        let heap = self.heap.clone();
        self.blocking(|| heap.collect(cause));
    }
}

impl Drop for Mutator {
    fn drop(&mut self) {
        self.flush();
        self.retire_tlab();
        if let Some(handshake) = self.heap.handshake() {
            handshake.leave();
        }
    }
}

fn payload_word(object: ObjectReference, offset: usize) -> Address {
    debug_assert!(offset % BYTES_IN_WORD == 0);
    debug_assert!(object_model::payload_start(object) + offset + BYTES_IN_WORD <= object_model::object_end(object));
    object_model::payload_start(object) + offset
}
