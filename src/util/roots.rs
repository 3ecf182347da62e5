//! Root slots registered by the embedder, in the manner of JNI global handles.
//!
//! Precise root scanning of thread stacks belongs to the host VM. References the embedder keeps
//! outside the heap across safepoint polls must live in a [`RootHandle`] so the collector can see
//! and update them.

use crate::util::{Address, ObjectReference, Slot};
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Weak};

#[repr(transparent)]
struct RootCell(AtomicUsize);

/// A registered root slot. The slot is unregistered when the handle is dropped.
///
/// Read and write it through [`crate::plan::Mutator::load_root`] and
/// [`crate::plan::Mutator::store_root`] so the heap's barriers apply.
pub struct RootHandle {
    cell: Arc<RootCell>,
}

impl RootHandle {
    pub fn slot(&self) -> Slot {
        Slot::from_address(Address::from_ref(&self.cell.0))
    }
}

impl std::fmt::Debug for RootHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RootHandle({:?} -> {})", self.slot().as_address(), self.slot().load())
    }
}

#[derive(Default)]
pub struct RootSet {
    cells: spin::Mutex<Vec<Weak<RootCell>>>,
}

impl RootSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new root slot holding `value`.
    pub fn new_handle(&self, value: ObjectReference) -> RootHandle {
        let cell = Arc::new(RootCell(AtomicUsize::new(0)));
        let handle = RootHandle { cell };
        handle.slot().store(value);
        self.cells.lock().push(Arc::downgrade(&handle.cell));
        handle
    }

    /// Call `f` on every live root slot. Dropped handles are pruned.
    pub fn for_each_slot<F: FnMut(Slot)>(&self, mut f: F) {
        let live: Vec<Arc<RootCell>> = {
            let mut cells = self.cells.lock();
            cells.retain(|c| c.strong_count() > 0);
            cells.iter().filter_map(|c| c.upgrade()).collect()
        };
        // The lock is released here: `f` may take a while and mutators keep registering roots.
        for cell in live.iter() {
            f(Slot::from_address(Address::from_ref(&cell.0)));
        }
    }

    /// Number of registered slots, including handles dropped since the last scan.
    pub fn len(&self) -> usize {
        self.cells.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
