//! Thin wrappers over the OS virtual memory calls used by [`crate::util::heap::VirtualSpace`].

use crate::util::Address;
use libc::{PROT_NONE, PROT_READ, PROT_WRITE};
use std::io::{Error, Result};

/// Zero `len` bytes at `start`. The range must be committed.
pub fn zero(start: Address, len: usize) {
    unsafe { std::ptr::write_bytes(start.to_mut_ptr::<u8>(), 0, len) }
}

/// Copy `len` bytes from `src` to `dst`. The ranges must not overlap.
///
/// # Safety
/// Both ranges must be mapped and writable (for `dst`).
pub unsafe fn copy_nonoverlapping(src: Address, dst: Address, len: usize) {
    std::ptr::copy_nonoverlapping(src.to_ptr::<u8>(), dst.to_mut_ptr::<u8>(), len)
}

/// Reserve an address range of `size` bytes anywhere in the address space, aligned to `align`.
/// The range is inaccessible and backed by nothing until [`commit`] is called on a part of it.
///
/// Returns `(mapping, start)`: the raw mapping (`size + align` bytes, to be passed to [`release`])
/// and the aligned start of the usable range.
pub fn reserve(size: usize, align: usize) -> Result<(Address, Address)> {
    let prot = PROT_NONE;
    let flags = libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_NORESERVE;
    let ptr = unsafe { libc::mmap(std::ptr::null_mut(), size + align, prot, flags, -1, 0) };
    if ptr == libc::MAP_FAILED {
        Err(Error::last_os_error())
    } else {
        let mapping = Address::from_mut_ptr(ptr);
        Ok((mapping, mapping.align_up(align)))
    }
}

/// Make `[start, start + size)` readable and writable. Fresh anonymous pages read as zero.
pub fn commit(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(
        &|| unsafe { libc::mprotect(start.to_mut_ptr(), size, PROT_READ | PROT_WRITE) },
        0,
    )
}

/// Return `[start, start + size)` to the reserved-but-inaccessible state and drop its contents.
pub fn uncommit(start: Address, size: usize) -> Result<()> {
    let prot = PROT_NONE;
    let flags = libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_FIXED | libc::MAP_NORESERVE;
    let ptr = start.to_mut_ptr();
    wrap_libc_call(
        &|| unsafe { libc::mmap(start.to_mut_ptr(), size, prot, flags, -1, 0) },
        ptr,
    )
}

/// Unmap a whole mapping created by [`reserve`].
pub fn release(mapping: Address, size: usize, align: usize) -> Result<()> {
    wrap_libc_call(
        &|| unsafe { libc::munmap(mapping.to_mut_ptr(), size + align) },
        0,
    )
}

fn wrap_libc_call<T: PartialEq>(f: &dyn Fn() -> T, expect: T) -> Result<()> {
    let ret = f();
    if ret == expect {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}
