//! Utilities used by the rest of the crate.

/// Address and object reference types.
pub mod address;
/// Thread-local allocation buffers.
pub mod alloc;
/// Constants used throughout the crate.
pub mod constants;
/// Calculation, conversion and rounding for memory related numbers.
pub mod conversions;
pub mod error;
/// The handshake between mutators and collector threads.
pub mod handshake;
/// Reserving and committing the heap's address range.
pub mod heap;
/// Logger initialization.
pub mod logger;
/// Wrapping the OS calls that reserve, commit and zero memory.
pub mod memory;
/// Memory pool and collection counters for the management interface.
pub mod monitoring;
/// The layout of heap objects: header, reference fields, payload.
pub mod object_model;
/// Heap options.
pub mod options;
/// Root slots registered by the VM.
pub mod roots;

#[cfg(any(test, feature = "test_private"))]
pub mod test_util;

pub use self::address::Address;
pub use self::address::MemorySlice;
pub use self::address::ObjectReference;
pub use self::address::Slot;
