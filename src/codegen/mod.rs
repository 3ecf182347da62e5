//! The interface between the collectors and the JIT compiler of the host VM.
//!
//! Compiled code does not call the mutator barrier. For each reference access it emits, the JIT
//! describes the access as an [`AccessSite`] and asks for a [`BarrierStub`]: a function with a
//! fixed ABI that it calls around the raw memory operation. The stubs of a heap are generated
//! once, when the heap is built, and collected in its [`StubTable`]. No stub is ever patched
//! afterwards; a heap that needs no barrier for an access kind has no stub for it.
//!
//! Stub ABI: the caller loads the base register, the slot register and up to three scratch
//! registers into a [`StubFrame`] and calls the stub with it. The stub returns its result in
//! `scratch[0]` and leaves the rest of the frame alone.
//!
//! When a store into an object allocated in the current TLAB is elided, neither the SATB
//! enqueue nor the resolution of the stored value happens, so the field may hold a stale copy.
//! This is safe because such objects are allocated above TAMS, and update refs scans every
//! object above TAMS of the regions outside the collection set.

use enum_map::{Enum, EnumMap};
use strum_macros::Display;

use crate::plan::barriers::BarrierSelector;
use crate::plan::global::PlanConstraints;

pub mod shenandoah;

/// The registers a stub sees.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StubFrame {
    /// The object or array holding the slot.
    pub base: usize,
    /// The address of the slot, or of the first slot of a range.
    pub slot: usize,
    /// Inputs, and the result in `scratch[0]`. See [`AccessKind`] for each kind's use.
    pub scratch: [usize; 3],
}

impl StubFrame {
    pub fn new(base: usize, slot: usize, scratch: [usize; 3]) -> Self {
        StubFrame {
            base,
            slot,
            scratch,
        }
    }

    /// The stub's result.
    pub fn result(&self) -> usize {
        self.scratch[0]
    }
}

pub type BarrierStub = extern "C" fn(&mut StubFrame);

/// The kinds of reference accesses compiled code performs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum, Display)]
pub enum AccessKind {
    /// After a reference load. In: `slot`, `scratch[0]` the loaded value. Out: `scratch[0]` the
    /// reference to use.
    Load,
    /// Before a reference store. In: `base`, `slot`, `scratch[0]` the value to store. Out:
    /// `scratch[0]` the value to store instead.
    StorePre,
    /// After a reference store. In: `base`, `slot`.
    StorePost,
    /// Replaces a reference compare-and-swap. In: `slot`, `scratch[0]` the expected value,
    /// `scratch[1]` the new value. Out: `scratch[0]` 1 if the slot was swapped, otherwise 0.
    CompareAndSwap,
    /// Before a reference array copy. In: `slot` the first destination slot, `scratch[0]` the
    /// number of slots.
    ArrayCopyPre,
    /// After a reference array copy. Same inputs as `ArrayCopyPre`.
    ArrayCopyPost,
    /// Before an object is cloned. In: `base` the source object.
    ClonePre,
}

/// What the JIT knows about an access when it asks for a stub.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AccessSite {
    pub kind: AccessKind,
    /// The base object was allocated by the same compiled code, in the current TLAB, with no
    /// safepoint since.
    pub in_new_tlab_object: bool,
}

impl AccessSite {
    pub fn new(kind: AccessKind) -> Self {
        AccessSite {
            kind,
            in_new_tlab_object: false,
        }
    }

    pub fn in_new_tlab_object(mut self) -> Self {
        self.in_new_tlab_object = true;
        self
    }
}

/// Produces barrier stubs for one barrier set.
pub trait BarrierStubGenerator {
    /// The stub for accesses like `site`, or `None` if those accesses need no barrier.
    fn generate(&self, site: &AccessSite) -> Option<BarrierStub>;
}

/// A generator for collectors without barriers.
pub struct NoBarrierStubGenerator;

impl BarrierStubGenerator for NoBarrierStubGenerator {
    fn generate(&self, _site: &AccessSite) -> Option<BarrierStub> {
        None
    }
}

/// The barrier stubs of a heap, one per access kind.
pub struct StubTable {
    stubs: EnumMap<AccessKind, Option<BarrierStub>>,
    can_elide_tlab_store_barriers: bool,
}

impl StubTable {
    /// Ask `generator` for a stub for each access kind.
    pub fn build(constraints: &PlanConstraints, generator: &dyn BarrierStubGenerator) -> Self {
        let stubs = EnumMap::from_fn(|kind| generator.generate(&AccessSite::new(kind)));
        let table = StubTable {
            stubs,
            can_elide_tlab_store_barriers: constraints.can_elide_tlab_store_barriers,
        };
        debug!(
            "{} barrier: stubs for {:?}",
            constraints.barrier,
            table.kinds().collect::<Vec<_>>()
        );
        table
    }

    /// The table for a collector with the given constraints, built with the generator of its
    /// barrier set.
    pub fn for_constraints(constraints: &PlanConstraints) -> Self {
        match constraints.barrier {
            BarrierSelector::NoBarrier => StubTable::build(constraints, &NoBarrierStubGenerator),
            BarrierSelector::Shenandoah => {
                StubTable::build(constraints, &shenandoah::ShenandoahStubGenerator)
            }
        }
    }

    pub fn get(&self, kind: AccessKind) -> Option<BarrierStub> {
        self.stubs[kind]
    }

    /// The stub to call for `site`. Stores into an object freshly allocated in the current TLAB
    /// need no barrier when the collector allows it. The stored value then stays unresolved
    /// until update refs.
    pub fn stub_for(&self, site: &AccessSite) -> Option<BarrierStub> {
        let is_store = matches!(site.kind, AccessKind::StorePre | AccessKind::StorePost);
        if is_store && site.in_new_tlab_object && self.can_elide_tlab_store_barriers {
            return None;
        }
        self.get(site.kind)
    }

    /// The access kinds that have a stub.
    pub fn kinds(&self) -> impl Iterator<Item = AccessKind> + '_ {
        self.stubs
            .iter()
            .filter(|(_, stub)| stub.is_some())
            .map(|(kind, _)| kind)
    }

    pub fn is_empty(&self) -> bool {
        self.kinds().next().is_none()
    }
}
