//! The controller thread.
//!
//! The controller runs collection cycles in the background. Mutators send it requests; when no
//! request comes within `ControlInterval` milliseconds, it asks the heuristics whether a cycle is
//! due.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use super::Shenandoah;
use crate::plan::global::GCCause;
use crate::util::error::HeapError;

enum ControlRequest {
    /// Run a cycle, and signal `done` when it is over.
    Collect {
        cause: GCCause,
        done: Option<Sender<()>>,
    },
    Shutdown,
}

pub struct Controller {
    sender: Sender<ControlRequest>,
    /// An asynchronous request is pending. Lets mutators that fail allocations one after another
    /// send a single request.
    request_flag: Arc<AtomicBool>,
    request_lock: Mutex<()>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Controller {
    pub fn spawn(heap: Weak<Shenandoah>, interval: Duration) -> Result<Self, HeapError> {
        let (sender, receiver) = channel::unbounded();
        let request_flag = Arc::new(AtomicBool::new(false));
        let flag = request_flag.clone();
        let thread = std::thread::Builder::new()
            .name("vmheap-controller".to_string())
            .spawn(move || run(heap, receiver, flag, interval))
            .map_err(HeapError::ThreadSpawn)?;
        Ok(Controller {
            sender,
            request_flag,
            request_lock: Mutex::new(()),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Ask for a cycle without waiting for it.
    pub fn request(&self, cause: GCCause) {
        if self.request_flag.load(Ordering::Relaxed) {
            return;
        }
        let _guard = self
            .request_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Double-checked: only the first of concurrent requesters sends.
        if !self.request_flag.load(Ordering::Relaxed) {
            self.request_flag.store(true, Ordering::Relaxed);
            if self
                .sender
                .send(ControlRequest::Collect { cause, done: None })
                .is_err()
            {
                debug!("Controller is gone, {} request dropped", cause);
            }
        }
    }

    /// Ask for a cycle and wait until the controller ran one for it.
    pub fn collect(&self, cause: GCCause) {
        let (done, wait) = channel::bounded(1);
        if self
            .sender
            .send(ControlRequest::Collect {
                cause,
                done: Some(done),
            })
            .is_err()
        {
            debug!("Controller is gone, {} request dropped", cause);
            return;
        }
        // An error means the controller exited without running the cycle.
        let _ = wait.recv();
    }

    /// Stop the controller thread. Joins it unless called from the controller thread itself.
    pub fn shutdown(&self) {
        let _ = self.sender.send(ControlRequest::Shutdown);
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(thread) = thread {
            if thread.thread().id() != std::thread::current().id() && thread.join().is_err() {
                warn!("Controller thread panicked");
            }
        }
    }
}

fn run(
    heap: Weak<Shenandoah>,
    receiver: Receiver<ControlRequest>,
    request_flag: Arc<AtomicBool>,
    interval: Duration,
) {
    debug!("Controller started, polling every {:?}", interval);
    loop {
        let request = receiver.recv_timeout(interval);
        let heap = match heap.upgrade() {
            Some(heap) => heap,
            None => break,
        };
        match request {
            Ok(ControlRequest::Collect { cause, done }) => {
                request_flag.store(false, Ordering::Relaxed);
                heap.run_cycle(cause);
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
            Ok(ControlRequest::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if heap.heuristics().should_start_cycle(&heap.heap_status()) {
                    heap.run_cycle(GCCause::Heuristics);
                }
            }
        }
    }
    debug!("Controller stopped");
}
