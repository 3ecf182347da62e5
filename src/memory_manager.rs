//! VM-to-heap interface: safe Rust APIs.
//!
//! This module provides the API a host VM uses to set up a heap, bind its threads as mutators,
//! allocate, and go through the barriers. We expect the VM to wrap it for its own calling
//! conventions (FFI, a thread-local mutator pointer, etc.) and to manage the unsafety of doing so.
//!
//! The heap is an ordinary object built by [`HeapBuilder::build`] and passed around as an
//! `Arc<dyn CollectedHeap>`. The only process-wide state is the heap registered with
//! [`install_heap`], which barrier stubs called from compiled code and the management interface
//! reach through [`heap`].

use std::sync::{Arc, OnceLock};

use crate::codegen::{AccessSite, BarrierStub};
use crate::plan::barriers::{Barrier, CasOutcome};
use crate::plan::epsilon::Epsilon;
use crate::plan::global::{CollectedHeap, GCCause};
use crate::plan::mutator_context::{create_mutator, Mutator};
use crate::plan::shenandoah::Shenandoah;
use crate::util::constants::OUT_OF_MEMORY_EXIT_CODE;
use crate::util::error::HeapError;
use crate::util::options::{CollectorSelector, Options};
use crate::util::{Address, MemorySlice, ObjectReference, Slot};

/// Collects the options of a heap before it is built.
pub struct HeapBuilder {
    pub options: Options,
}

impl HeapBuilder {
    /// A builder with the default options: the built-in defaults, overridden by `VMHEAP_*`
    /// environment variables.
    pub fn new() -> Self {
        HeapBuilder {
            options: Options::default(),
        }
    }

    /// Set an option by the name the host VM uses for it, e.g. `("MaxTLABSize", "4M")`. Returns
    /// false if the option does not exist or the value does not parse or validate.
    pub fn set_option(&mut self, name: &str, value: &str) -> bool {
        self.options.set_from_camelcase_str(name, value)
    }

    /// Set options from a space-separated list of `Name=value` pairs.
    pub fn set_options_bulk(&mut self, options: &str) -> bool {
        self.options.set_bulk_from_command_line(options)
    }

    /// Build the heap selected by the `Collector` option. This reserves and commits the initial
    /// heap, fixes the barrier set, and starts the collector's background threads.
    pub fn build(&self) -> Result<Arc<dyn CollectedHeap>, HeapError> {
        let options = self.options.clone();
        let heap: Arc<dyn CollectedHeap> = match options.collector {
            CollectorSelector::Epsilon => Arc::new(Epsilon::new(options)?),
            CollectorSelector::Shenandoah => {
                let heap = Arc::new(Shenandoah::new(options)?);
                heap.start_controller()?;
                heap
            }
        };
        Ok(heap)
    }
}

impl Default for HeapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize the logger and build a heap. A VM should call this once, before any other function
/// of this module.
///
/// This attempts to initialize the built-in logger. A VM that wants its own logger should
/// initialize it before calling this.
pub fn init(builder: &HeapBuilder) -> Result<Arc<dyn CollectedHeap>, HeapError> {
    match crate::util::logger::try_init() {
        Ok(_) => debug!("Initialized the logger."),
        Err(_) => debug!("Failed to initialize the logger. Possibly a logger has been initialized by user."),
    }
    let heap = builder.build()?;
    info!("Initialized the {} heap", heap.name());
    #[cfg(feature = "extreme_assertions")]
    warn!("The feature 'extreme_assertions' is enabled. The heap will run expensive run-time checks. Slow performance should be expected.");
    Ok(heap)
}

static INSTALLED_HEAP: OnceLock<Arc<dyn CollectedHeap>> = OnceLock::new();

/// Make `heap` the heap of this process, as seen by barrier stubs and [`heap`]. Can only be done
/// once.
pub fn install_heap(heap: Arc<dyn CollectedHeap>) -> Result<(), HeapError> {
    INSTALLED_HEAP
        .set(heap)
        .map_err(|_| HeapError::AlreadyInstalled)
}

/// The heap of this process, if one has been installed.
pub fn heap() -> Option<&'static Arc<dyn CollectedHeap>> {
    INSTALLED_HEAP.get()
}

/// Create a mutator for the current thread. The thread should keep it in thread-local storage and
/// must drop it before it exits.
pub fn bind_mutator(heap: &Arc<dyn CollectedHeap>) -> Box<Mutator> {
    Box::new(create_mutator(heap.clone()))
}

/// Reclaim a mutator that is no longer needed.
pub fn destroy_mutator(mutator: Box<Mutator>) {
    drop(mutator);
}

/// Flush the mutator's thread-local barrier state.
pub fn flush_mutator(mutator: &mut Mutator) {
    mutator.flush()
}

/// Allocate `size` bytes. If the heap is full, a collection is requested and the allocation
/// retried once. Returns `None` if the heap is still full, unless `ExitOnOutOfMemoryError` is
/// set, in which case the process exits.
///
/// The caller initializes the object and then calls [`post_alloc`].
pub fn alloc(mutator: &mut Mutator, size: usize) -> Option<Address> {
    if let Some(addr) = mutator.alloc(size) {
        return Some(addr);
    }
    mutator.collect(GCCause::AllocationFailure);
    let result = mutator.alloc(size);
    if result.is_none() {
        let heap = mutator.heap();
        if heap.options().exit_on_out_of_memory_error {
            error!(
                "Out of memory allocating {} bytes. {}. Terminating due to ExitOnOutOfMemoryError",
                size,
                heap.heap_info()
            );
            std::process::exit(OUT_OF_MEMORY_EXIT_CODE);
        }
        warn!("Out of memory allocating {} bytes", size);
    }
    result
}

/// Publish an object initialized at memory returned by [`alloc`].
pub fn post_alloc(mutator: &mut Mutator, object: ObjectReference) {
    mutator.post_alloc(object);
}

/// Store `target` into `slot` of `src` through the barrier.
pub fn object_reference_write(
    mutator: &mut Mutator,
    src: ObjectReference,
    slot: Slot,
    target: ObjectReference,
) {
    mutator.barrier().object_reference_write(src, slot, target);
}

/// The pre barrier of a store the VM performs itself.
pub fn object_reference_write_pre(
    mutator: &mut Mutator,
    src: ObjectReference,
    slot: Slot,
    target: ObjectReference,
) {
    mutator.barrier().object_reference_write_pre(src, slot, target);
}

/// The post barrier of a store the VM performs itself.
pub fn object_reference_write_post(
    mutator: &mut Mutator,
    src: ObjectReference,
    slot: Slot,
    target: ObjectReference,
) {
    mutator.barrier().object_reference_write_post(src, slot, target);
}

/// Load the reference in `slot` through the barrier.
pub fn object_reference_read(mutator: &mut Mutator, slot: Slot) -> ObjectReference {
    mutator.barrier().object_reference_load(Some(slot), slot.load())
}

/// Compare-and-swap the reference in `slot` through the barrier.
pub fn object_reference_cas(
    mutator: &mut Mutator,
    slot: Slot,
    expected: ObjectReference,
    new: ObjectReference,
) -> CasOutcome {
    mutator.barrier().object_reference_cas(slot, expected, new)
}

/// The pre barrier of a bulk copy of reference slots into `dst`.
pub fn memory_region_copy_pre(mutator: &mut Mutator, dst: MemorySlice) {
    mutator.barrier().memory_region_copy_pre(dst);
}

/// The post barrier of a bulk copy of reference slots into `dst`.
pub fn memory_region_copy_post(mutator: &mut Mutator, dst: MemorySlice) {
    mutator.barrier().memory_region_copy_post(dst);
}

/// The barrier stub compiled code should call for accesses like `site`, if any.
pub fn barrier_stub(heap: &dyn CollectedHeap, site: &AccessSite) -> Option<BarrierStub> {
    heap.stub_table().stub_for(site)
}

/// Allocated bytes.
pub fn used_bytes(heap: &dyn CollectedHeap) -> usize {
    heap.used()
}

/// Committed bytes not yet allocated.
pub fn free_bytes(heap: &dyn CollectedHeap) -> usize {
    heap.capacity().saturating_sub(heap.used())
}

/// Committed bytes.
pub fn total_bytes(heap: &dyn CollectedHeap) -> usize {
    heap.capacity()
}

/// The VM's `System.gc()`. Blocks until the heap handled the request.
pub fn handle_user_collection_request(mutator: &mut Mutator) {
    mutator.collect(GCCause::UserRequested);
}

/// Whether `addr` is in the allocated part of the heap.
pub fn is_in_heap(heap: &dyn CollectedHeap, addr: Address) -> bool {
    heap.is_in(addr)
}
