//! When to start a cycle and which regions to relocate.
//!
//! Heuristics never touch the barrier protocol. They see a [`HeapStatus`] snapshot when the
//! controller polls them, and a summary of every marked region at final mark.

use crate::util::options::{HeuristicsMode, Options};

/// Percentage used by the compact heuristics for both the trigger and the garbage threshold.
const COMPACT_THRESHOLD: usize = 10;

/// A snapshot of the heap, taken when the heuristics are consulted.
#[derive(Copy, Clone, Debug, Default)]
pub struct HeapStatus {
    pub max_capacity: usize,
    pub used: usize,
    /// Bytes mutators may still allocate, the evacuation reserve excluded.
    pub mutator_free: usize,
    /// Bytes evacuation may still allocate, the evacuation reserve included.
    pub evacuation_free: usize,
    pub allocated_since_last_cycle: usize,
    pub region_size: usize,
}

/// A region that may be relocated.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegionSummary {
    pub index: usize,
    pub live: usize,
    pub garbage: usize,
}

pub trait Heuristics: Send + Sync {
    fn mode(&self) -> HeuristicsMode;

    /// Should the controller start a cycle now?
    fn should_start_cycle(&self, status: &HeapStatus) -> bool;

    /// Pick the regions to relocate from `candidates`. Returns region indices.
    fn choose_collection_set(&self, status: &HeapStatus, candidates: &[RegionSummary]) -> Vec<usize>;
}

pub fn create_heuristics(options: &Options) -> Box<dyn Heuristics> {
    let mode = options.heuristics;
    match mode {
        HeuristicsMode::Adaptive | HeuristicsMode::Static => Box::new(ThresholdHeuristics {
            mode,
            min_free_threshold: options.min_free_threshold,
            garbage_threshold: options.garbage_threshold,
        }),
        HeuristicsMode::Compact => Box::new(CompactHeuristics),
        HeuristicsMode::Aggressive => Box::new(AggressiveHeuristics),
    }
}

fn percent(value: usize, percentage: usize) -> usize {
    value / 100 * percentage + value % 100 * percentage / 100
}

/// `Adaptive` and `Static`: start when free memory drops below `MinFreeThreshold`, relocate
/// regions with at least `GarbageThreshold` garbage.
///
/// `Adaptive` relocates the most garbage first and stops when the live data would not fit in the
/// free memory left for evacuation. `Static` takes every region over the threshold, in address
/// order.
struct ThresholdHeuristics {
    mode: HeuristicsMode,
    min_free_threshold: usize,
    garbage_threshold: usize,
}

impl Heuristics for ThresholdHeuristics {
    fn mode(&self) -> HeuristicsMode {
        self.mode
    }

    fn should_start_cycle(&self, status: &HeapStatus) -> bool {
        let min_free = percent(status.max_capacity, self.min_free_threshold);
        if status.mutator_free < min_free {
            debug!(
                "Free {} is below the minimum threshold {}",
                status.mutator_free, min_free
            );
            return true;
        }
        false
    }

    fn choose_collection_set(&self, status: &HeapStatus, candidates: &[RegionSummary]) -> Vec<usize> {
        let threshold = percent(status.region_size, self.garbage_threshold);
        let mut chosen: Vec<RegionSummary> = candidates
            .iter()
            .filter(|r| r.garbage > 0 && r.garbage >= threshold)
            .copied()
            .collect();
        if self.mode == HeuristicsMode::Adaptive {
            chosen.sort_by(|a, b| b.garbage.cmp(&a.garbage));
            let mut budget = status.evacuation_free;
            chosen.retain(|r| {
                if r.live <= budget {
                    budget -= r.live;
                    true
                } else {
                    false
                }
            });
        }
        chosen.into_iter().map(|r| r.index).collect()
    }
}

/// Start a cycle after every tenth of the heap allocated, and relocate any region with a tenth of
/// garbage.
struct CompactHeuristics;

impl Heuristics for CompactHeuristics {
    fn mode(&self) -> HeuristicsMode {
        HeuristicsMode::Compact
    }

    fn should_start_cycle(&self, status: &HeapStatus) -> bool {
        status.allocated_since_last_cycle > percent(status.max_capacity, COMPACT_THRESHOLD)
    }

    fn choose_collection_set(&self, status: &HeapStatus, candidates: &[RegionSummary]) -> Vec<usize> {
        let threshold = percent(status.region_size, COMPACT_THRESHOLD);
        candidates
            .iter()
            .filter(|r| r.garbage > 0 && r.garbage >= threshold)
            .map(|r| r.index)
            .collect()
    }
}

/// Run cycles back to back and relocate everything with any garbage. For testing the barriers.
struct AggressiveHeuristics;

impl Heuristics for AggressiveHeuristics {
    fn mode(&self) -> HeuristicsMode {
        HeuristicsMode::Aggressive
    }

    fn should_start_cycle(&self, _status: &HeapStatus) -> bool {
        true
    }

    fn choose_collection_set(&self, _status: &HeapStatus, candidates: &[RegionSummary]) -> Vec<usize> {
        candidates
            .iter()
            .filter(|r| r.garbage > 0)
            .map(|r| r.index)
            .collect()
    }
}
