//! Collectors.
//!
//! This module provides the collectors, each of which implements the
//! [`CollectedHeap`](crate::plan::global::CollectedHeap) contract. A collector consists of a few
//! parts:
//! * A heap type that implements `CollectedHeap`: its spaces, its allocation paths, and what a
//!   collection request does.
//! * A constant for [`PlanConstraints`](crate::plan::global::PlanConstraints), which tells the
//!   runtime and the code generator which barriers the collector needs.
//! * A barrier, if it needs one, which becomes a variant of
//!   [`MutatorBarrier`](crate::plan::barriers::MutatorBarrier).

pub mod barriers;
pub mod global;
pub mod mutator_context;

pub use self::barriers::{Barrier, BarrierSelector, CasOutcome, MutatorBarrier};
pub use self::global::{CollectedHeap, GCCause, PlanConstraints};
pub use self::mutator_context::{create_mutator, Mutator};

pub mod epsilon;
pub mod shenandoah;
