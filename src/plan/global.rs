//! The heap contract shared by all collectors.

use downcast_rs::{impl_downcast, DowncastSync};
use strum_macros::Display;

use crate::codegen::StubTable;
use crate::plan::barriers::BarrierSelector;
use crate::util::alloc::TlabErgonomics;
use crate::util::error::HeapError;
use crate::util::handshake::Handshake;
use crate::util::monitoring::MonitoringSupport;
use crate::util::options::Options;
use crate::util::roots::RootSet;
use crate::util::{Address, ObjectReference};

/// Why a collection was requested.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum GCCause {
    /// The embedder asked for it, e.g. `System.gc()`.
    UserRequested,
    /// An allocation could not be satisfied.
    AllocationFailure,
    /// The collector's heuristics decided a cycle is due.
    Heuristics,
}

/// Static capabilities of a collector. They never change at run time, so compiled code may query
/// them once and bake the answers in.
#[derive(Debug)]
pub struct PlanConstraints {
    /// Objects may move, so references must be resolved before use.
    pub moves_objects: bool,
    /// The barrier set the collector installs.
    pub barrier: BarrierSelector,
    /// Reference stores need the snapshot-at-the-beginning pre-write barrier while marking.
    pub needs_satb: bool,
    /// Reference loads need the load-reference barrier while forwarded objects exist.
    pub needs_load_reference_barrier: bool,
    /// Reference stores need the card-marking post-write barrier.
    pub needs_card_barrier: bool,
    /// Stores into an object that was just allocated in the current TLAB may skip all barriers.
    pub can_elide_tlab_store_barriers: bool,
    /// Allocation must be followed by `post_alloc` to publish the object to the collector.
    pub needs_post_alloc: bool,
}

impl PlanConstraints {
    /// The constraints of a collector that never moves or traces objects.
    pub const fn default() -> Self {
        PlanConstraints {
            moves_objects: false,
            barrier: BarrierSelector::NoBarrier,
            needs_satb: false,
            needs_load_reference_barrier: false,
            needs_card_barrier: false,
            can_elide_tlab_store_barriers: true,
            needs_post_alloc: false,
        }
    }
}

/// A heap: the spaces, the allocation paths into them, and the collector that manages them.
///
/// Every method may be called concurrently from any number of mutator threads. Sizes are in
/// bytes. `capacity`, `used` and `max_capacity` are lock-free snapshots suitable for reporting,
/// not for correctness decisions.
///
/// A heap is constructed by its collector's `new` (which reserves and commits the initial heap and
/// fixes the barrier set), usually through [`crate::memory_manager::HeapBuilder`].
pub trait CollectedHeap: 'static + DowncastSync {
    /// Name of the collector, as reported by monitoring.
    fn name(&self) -> &'static str;

    fn constraints(&self) -> &'static PlanConstraints;

    fn barrier_selector(&self) -> BarrierSelector {
        self.constraints().barrier
    }

    fn options(&self) -> &Options;

    /// Allocate `size` bytes outside of any TLAB. Never blocks indefinitely. `None` means the
    /// request cannot be satisfied right now; the caller decides whether to collect and retry or
    /// to report out-of-memory.
    fn allocate(&self, size: usize) -> Option<Address>;

    /// Allocate a new TLAB of at least `min_size` bytes. The size is chosen from the thread's
    /// `ergonomics` and recorded in it. Returns the start and the size of the TLAB.
    fn allocate_new_tlab(
        &self,
        ergonomics: &mut TlabErgonomics,
        min_size: usize,
    ) -> Option<(Address, usize)>;

    /// A TLAB handed out by `allocate_new_tlab` will not be allocated into any more.
    fn retire_tlab(&self, _start: Address, _top: Address, _end: Address) {}

    /// Publish a freshly initialized object to the collector.
    fn post_alloc(&self, _object: ObjectReference) {}

    /// Request a collection. Collectors may run it, ignore it, or hand it to a background thread.
    /// Must not be called by a thread that is joined to the heap's handshake.
    fn collect(&self, cause: GCCause);

    /// Committed bytes.
    fn capacity(&self) -> usize;

    /// Allocated bytes, including TLABs handed out.
    fn used(&self) -> usize;

    /// Reserved bytes. The heap never grows beyond this.
    fn max_capacity(&self) -> usize;

    /// An upper bound of a TLAB for the allocation fast path. Lock-free, and always within
    /// `[MinTLABSize, MaxTLABSize]`.
    fn unsafe_max_tlab_alloc(&self) -> usize;

    /// Whether `addr` is in the allocated part of the heap.
    fn is_in(&self, addr: Address) -> bool;

    fn monitoring(&self) -> &MonitoringSupport;

    /// Check the heap invariants.
    fn verify(&self) -> Result<(), HeapError>;

    /// A human readable summary of the heap.
    fn heap_info(&self) -> String;

    /// Root slots registered by the embedder.
    fn roots(&self) -> &RootSet;

    /// The handshake mutators take part in, if the collector ever needs to stop them.
    fn handshake(&self) -> Option<&Handshake> {
        None
    }

    /// The barrier stubs for compiled code, built when the heap was constructed.
    fn stub_table(&self) -> &StubTable;
}

impl_downcast!(sync CollectedHeap);
