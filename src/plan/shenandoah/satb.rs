//! Snapshot-at-the-beginning buffers.
//!
//! Each mutator owns a [`SatbBuffer`] that the pre-write barrier fills with overwritten
//! references while marking. A full buffer is handed to the [`SatbQueueSet`] as a completed
//! buffer, which marking workers drain. Partially filled buffers are handed over when their
//! mutator flushes, and all of them at final mark.

use crossbeam::queue::SegQueue;
use std::sync::{Arc, Weak};

use crate::util::ObjectReference;

#[derive(Default)]
pub struct SatbBuffer {
    entries: spin::Mutex<Vec<ObjectReference>>,
}

impl SatbBuffer {
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct SatbQueueSet {
    capacity: usize,
    completed: SegQueue<Vec<ObjectReference>>,
    buffers: spin::Mutex<Vec<Weak<SatbBuffer>>>,
    /// Used by barrier stubs, which run without a mutator.
    shared: Arc<SatbBuffer>,
}

impl SatbQueueSet {
    pub fn new(capacity: usize) -> Self {
        let shared = Arc::new(SatbBuffer::default());
        SatbQueueSet {
            capacity,
            completed: SegQueue::new(),
            buffers: spin::Mutex::new(vec![Arc::downgrade(&shared)]),
            shared,
        }
    }

    /// Create a buffer for a new mutator. The buffer is forgotten when the mutator drops it.
    pub fn register(&self) -> Arc<SatbBuffer> {
        let buffer = Arc::new(SatbBuffer::default());
        let mut buffers = self.buffers.lock();
        buffers.retain(|b| b.strong_count() > 0);
        buffers.push(Arc::downgrade(&buffer));
        buffer
    }

    pub fn shared_buffer(&self) -> &Arc<SatbBuffer> {
        &self.shared
    }

    pub fn enqueue(&self, buffer: &SatbBuffer, object: ObjectReference) {
        let mut entries = buffer.entries.lock();
        entries.push(object);
        if entries.len() >= self.capacity {
            let full = std::mem::replace(&mut *entries, Vec::with_capacity(self.capacity));
            drop(entries);
            trace!("SATB buffer of {} entries completed", full.len());
            self.completed.push(full);
        }
    }

    /// Hand over the entries of `buffer`, full or not.
    pub fn flush(&self, buffer: &SatbBuffer) {
        let entries = std::mem::take(&mut *buffer.entries.lock());
        if !entries.is_empty() {
            self.completed.push(entries);
        }
    }

    /// Hand over the entries of every registered buffer. Mutators must be stopped, or entries
    /// enqueued concurrently may be left behind.
    pub fn flush_all(&self) {
        let buffers: Vec<Arc<SatbBuffer>> =
            self.buffers.lock().iter().filter_map(|b| b.upgrade()).collect();
        for buffer in buffers.iter() {
            self.flush(buffer);
        }
    }

    pub fn pop_completed(&self) -> Option<Vec<ObjectReference>> {
        self.completed.pop()
    }

    pub fn has_completed(&self) -> bool {
        !self.completed.is_empty()
    }

    /// Drop all entries. Used when a marking cycle is abandoned.
    pub fn abandon(&self) {
        let buffers: Vec<Arc<SatbBuffer>> =
            self.buffers.lock().iter().filter_map(|b| b.upgrade()).collect();
        for buffer in buffers.iter() {
            buffer.entries.lock().clear();
        }
        while self.completed.pop().is_some() {}
    }
}
