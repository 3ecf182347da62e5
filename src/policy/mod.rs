//! Memory policies that can be used for spaces.
//!
//! A space is a range of virtual memory managed under one regime. [`contiguous_space`] is the
//! bump-pointer arena of the allocate-only collector, and of each region. [`region`] cuts the heap
//! of the concurrent collector into equally sized regions that move through the states of a
//! collection cycle.

pub mod contiguous_space;
pub mod region;
