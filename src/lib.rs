//! vmheap is the memory manager of a managed runtime: the heap contract, the collectors behind it,
//! and the barriers the runtime's interpreter and compiled code call on every reference access.
//!
//! Two collectors are provided:
//! * [Epsilon](plan/epsilon/index.html) allocates by bumping a pointer through a heap that grows
//!   on demand and never reclaims anything.
//! * [Shenandoah](plan/shenandoah/index.html) marks and relocates concurrently with the
//!   application, using a snapshot-at-the-beginning pre-write barrier and a load-reference
//!   barrier.
//!
//! Logical structure
//!
//! * [Memory manager API](memory_manager/index.html): the API a host VM calls to build a heap,
//!   bind mutators, allocate and go through the barriers.
//! * [Collectors](plan/index.html): the [`CollectedHeap`](plan/global/trait.CollectedHeap.html)
//!   contract, the barriers and the mutator context.
//! * [Policies](policy/index.html): the spaces the collectors allocate in.
//! * [Code generation](codegen/index.html): barrier stubs for the host VM's JIT compiler.
//! * [Utilities](util/index.html): addresses, options, the object layout, the handshake and
//!   everything else.

extern crate libc;
#[macro_use]
extern crate log;

pub mod codegen;
pub mod memory_manager;
pub mod plan;
pub mod policy;
pub mod util;

pub use crate::memory_manager::HeapBuilder;
pub use crate::plan::{CollectedHeap, Mutator};
