//! Error types of the heap.
//!
//! Allocation-path failures are not errors in this sense: they are returned as `None` to the
//! caller, who decides whether to retry, trigger a collection, or give up (see
//! [`crate::memory_manager::alloc`]). Broken barrier invariants are never returned at all; they
//! abort the process through [`barrier_protocol_violation`].

use crate::util::Address;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HeapError {
    /// The initial address-space reservation cannot be satisfied. Fatal at start-up.
    #[error("unable to reserve {bytes} bytes of address space for the heap: {source}")]
    ReservationFailure {
        bytes: usize,
        #[source]
        source: std::io::Error,
    },
    /// Committing memory for a heap expansion failed.
    #[error("unable to commit {bytes} bytes at {start}: {source}")]
    ExpansionFailure {
        start: Address,
        bytes: usize,
        #[source]
        source: std::io::Error,
    },
    /// The options do not describe a usable heap, e.g. `MaxTLABSize < MinTLABSize`.
    #[error("invalid heap options: {0}")]
    InvalidOptions(String),
    /// Heap verification found a broken invariant.
    #[error("heap verification failed: {0}")]
    Verification(String),
    /// The background thread of a concurrent collector could not be started.
    #[error("unable to start the collector thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
    /// A process-wide heap is already installed.
    #[error("a heap has already been installed for this process")]
    AlreadyInstalled,
}

/// Report an internal barrier invariant break, e.g. a load-reference barrier observing a region in
/// an invalid state. This indicates heap corruption, so the process is aborted immediately rather
/// than allowed to continue with a partially corrupted heap.
#[cold]
pub fn barrier_protocol_violation(args: std::fmt::Arguments) -> ! {
    error!("Barrier protocol violation: {}", args);
    std::process::abort()
}

/// Abort with a barrier protocol violation message built with `format!` syntax.
macro_rules! protocol_violation {
    ($($arg:tt)*) => {
        $crate::util::error::barrier_protocol_violation(format_args!($($arg)*))
    };
}
pub(crate) use protocol_violation;
