//! The marking work queue and the loop the marking workers run.

use crossbeam::deque::{Injector, Steal};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::Shenandoah;
use crate::util::object_model;
use crate::util::ObjectReference;

/// Grey objects: marked, with fields not yet traced.
pub struct MarkQueue {
    queue: Injector<ObjectReference>,
    /// Workers that found no work. When all of them are idle, marking is done.
    idle: AtomicUsize,
    marked_objects: AtomicUsize,
}

impl MarkQueue {
    pub fn new() -> Self {
        MarkQueue {
            queue: Injector::new(),
            idle: AtomicUsize::new(0),
            marked_objects: AtomicUsize::new(0),
        }
    }

    /// Mark `object` and queue it for tracing if this call marked it.
    pub fn mark_and_push(&self, heap: &Shenandoah, object: ObjectReference) {
        if !object.is_null() && heap.mark_object(object) {
            self.marked_objects.fetch_add(1, Ordering::Relaxed);
            self.queue.push(object);
        }
    }

    /// Objects marked since the queue was last cleared.
    pub fn marked_objects(&self) -> usize {
        self.marked_objects.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&self) {
        while !self.queue.steal().is_empty() {}
        self.marked_objects.store(0, Ordering::Relaxed);
    }

    /// Trace with `workers` threads until neither the queue nor the completed SATB buffers hold
    /// work. If `cancellable`, stops early once the cycle is cancelled. Returns whether marking
    /// finished.
    pub fn drain(&self, heap: &Shenandoah, workers: usize, cancellable: bool) -> bool {
        let workers = workers.max(1);
        self.idle.store(0, Ordering::SeqCst);
        std::thread::scope(|s| {
            for id in 0..workers {
                s.spawn(move || self.work(heap, id, workers, cancellable));
            }
        });
        !(cancellable && heap.cancel_requested())
    }

    fn has_work(&self, heap: &Shenandoah) -> bool {
        !self.queue.is_empty() || heap.satb().has_completed()
    }

    fn work(&self, heap: &Shenandoah, id: usize, workers: usize, cancellable: bool) {
        let mut traced = 0usize;
        'work: loop {
            loop {
                if cancellable && heap.cancel_requested() {
                    return;
                }
                match self.queue.steal() {
                    Steal::Success(object) => {
                        traced += 1;
                        object_model::scan_object(object, |slot| {
                            self.mark_and_push(heap, slot.load())
                        });
                    }
                    Steal::Retry => {}
                    Steal::Empty => match heap.satb().pop_completed() {
                        Some(buffer) => {
                            for object in buffer {
                                self.mark_and_push(heap, object);
                            }
                        }
                        None => break,
                    },
                }
            }

            self.idle.fetch_add(1, Ordering::SeqCst);
            loop {
                if cancellable && heap.cancel_requested() {
                    return;
                }
                if self.has_work(heap) {
                    self.idle.fetch_sub(1, Ordering::SeqCst);
                    continue 'work;
                }
                if self.idle.load(Ordering::SeqCst) == workers {
                    trace!("Marking worker {} done, traced {} objects", id, traced);
                    return;
                }
                std::thread::yield_now();
            }
        }
    }
}

impl Default for MarkQueue {
    fn default() -> Self {
        Self::new()
    }
}
