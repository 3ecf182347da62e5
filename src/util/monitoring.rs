//! Counters exported to the host VM's management interface.
//!
//! The counters are snapshots: the heap refreshes them at its own pace (every
//! `UpdateCountersStep` bytes of allocation for Epsilon, at the end of each cycle for the
//! concurrent collector), so they lag behind [`crate::plan::CollectedHeap::used`].

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Occupancy of one memory pool.
#[derive(Default)]
pub struct MemoryPool {
    name: &'static str,
    used: AtomicUsize,
    committed: AtomicUsize,
    max: AtomicUsize,
}

/// A point-in-time copy of a [`MemoryPool`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryUsage {
    pub used: usize,
    pub committed: usize,
    pub max: usize,
}

impl MemoryPool {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn usage(&self) -> MemoryUsage {
        MemoryUsage {
            used: self.used.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            max: self.max.load(Ordering::Relaxed),
        }
    }
}

/// Collection statistics of one collector.
#[derive(Default)]
pub struct MemoryManager {
    name: &'static str,
    collections: AtomicUsize,
    total_time_nanos: AtomicU64,
}

impl MemoryManager {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn collection_count(&self) -> usize {
        self.collections.load(Ordering::Relaxed)
    }

    pub fn collection_time(&self) -> Duration {
        Duration::from_nanos(self.total_time_nanos.load(Ordering::Relaxed))
    }
}

pub struct MonitoringSupport {
    pool: MemoryPool,
    manager: MemoryManager,
}

impl MonitoringSupport {
    pub fn new(pool_name: &'static str, manager_name: &'static str) -> Self {
        MonitoringSupport {
            pool: MemoryPool {
                name: pool_name,
                ..Default::default()
            },
            manager: MemoryManager {
                name: manager_name,
                ..Default::default()
            },
        }
    }

    pub fn memory_pool(&self) -> &MemoryPool {
        &self.pool
    }

    pub fn memory_manager(&self) -> &MemoryManager {
        &self.manager
    }

    pub fn update_counters(&self, used: usize, committed: usize, max: usize) {
        self.pool.used.store(used, Ordering::Relaxed);
        self.pool.committed.store(committed, Ordering::Relaxed);
        self.pool.max.store(max, Ordering::Relaxed);
    }

    pub fn record_collection(&self, time: Duration) {
        self.manager.collections.fetch_add(1, Ordering::Relaxed);
        self.manager
            .total_time_nanos
            .fetch_add(time.as_nanos() as u64, Ordering::Relaxed);
    }
}
