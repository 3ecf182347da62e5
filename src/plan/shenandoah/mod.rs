//! Shenandoah: concurrent marking and concurrent relocation over a region-based heap.
//!
//! Mutators keep running while the collector marks (with the SATB pre-write barrier keeping the
//! snapshot intact) and while it copies objects out of the collection set (with the
//! load-reference barrier making sure mutators only ever see the canonical copy). Mutators only
//! stop for short handshakes at phase changes.

mod barrier;
mod controller;
mod global;
pub mod heuristics;
mod marking;
pub mod satb;

pub use self::barrier::{BarrierStats, ShenandoahBarrier};
pub use self::global::{gc_state, CycleStats, CyclePhase, Shenandoah, SHENANDOAH_CONSTRAINTS};
pub use self::heuristics::{HeapStatus, Heuristics, RegionSummary};
