//! Sizes and alignments. The heap only supports 64-bit targets.

pub const LOG_BYTES_IN_KBYTE: u8 = 10;
pub const BYTES_IN_KBYTE: usize = 1 << LOG_BYTES_IN_KBYTE;

pub const LOG_BYTES_IN_MBYTE: u8 = 20;
pub const BYTES_IN_MBYTE: usize = 1 << LOG_BYTES_IN_MBYTE;

pub const LOG_BYTES_IN_GBYTE: u8 = 30;
pub const BYTES_IN_GBYTE: usize = 1 << LOG_BYTES_IN_GBYTE;

/// log2 of the number of bytes in a word. Also the size of a reference slot.
pub const LOG_BYTES_IN_WORD: u8 = 3;
pub const BYTES_IN_WORD: usize = 1 << LOG_BYTES_IN_WORD;
pub const BITS_IN_WORD: usize = BYTES_IN_WORD * 8;

pub const LOG_BYTES_IN_PAGE: u8 = 12;
pub const BYTES_IN_PAGE: usize = 1 << LOG_BYTES_IN_PAGE;

/// Every object starts at a word boundary.
pub const LOG_MIN_OBJECT_ALIGNMENT: u8 = LOG_BYTES_IN_WORD;
pub const MIN_OBJECT_ALIGNMENT: usize = 1 << LOG_MIN_OBJECT_ALIGNMENT;

/// The exit code used when `ExitOnOutOfMemoryError` terminates the process.
pub const OUT_OF_MEMORY_EXIT_CODE: i32 = 3;
