//! The object layout shared by the collectors.
//!
//! ```text
//! +----------------+----------------+---------------------+------------------+
//! | status word    | layout word    | reference fields    | payload          |
//! +----------------+----------------+---------------------+------------------+
//!   forwarding       ref count | size   ref_fields words     rest of `size`
//! ```
//!
//! The status word is zero for an object that has not been relocated. Relocation installs the
//! address of the new copy with the low two bits set. An object that could not be
//! copied forwards to itself.
//!
//! The layout word holds the total object size in bytes in its low 32 bits and the number of
//! reference fields in its high 32 bits. It is written once at allocation and never changes.

use crate::util::constants::*;
use crate::util::{Address, ObjectReference, Slot};
use std::sync::atomic::{AtomicUsize, Ordering};

static_assertions::const_assert!(BYTES_IN_WORD == 8);

pub const STATUS_WORD_OFFSET: usize = 0;
pub const LAYOUT_WORD_OFFSET: usize = BYTES_IN_WORD;
pub const HEADER_BYTES: usize = 2 * BYTES_IN_WORD;

/// The smallest object: a bare header.
pub const MIN_OBJECT_SIZE: usize = HEADER_BYTES;

/// Objects are limited to 32-bit sizes by the layout word.
pub const MAX_OBJECT_SIZE: usize = u32::MAX as usize & !(MIN_OBJECT_ALIGNMENT - 1);

const FORWARDED: usize = 0b11;
const FORWARDING_MASK: usize = 0b11;
const SIZE_MASK: usize = u32::MAX as usize;
const REF_FIELDS_SHIFT: usize = 32;

/// The size in bytes of an object with `ref_fields` reference fields and `payload_bytes` bytes of
/// other data. `None` if it exceeds [`MAX_OBJECT_SIZE`].
pub fn object_size(ref_fields: usize, payload_bytes: usize) -> Option<usize> {
    let payload = payload_bytes.checked_add(MIN_OBJECT_ALIGNMENT - 1)? & !(MIN_OBJECT_ALIGNMENT - 1);
    let size = ref_fields
        .checked_mul(BYTES_IN_WORD)?
        .checked_add(HEADER_BYTES)?
        .checked_add(payload)?;
    (size <= MAX_OBJECT_SIZE).then_some(size)
}

/// Write the header of a freshly allocated object. `size` must include the header.
///
/// The memory behind `start` must be zeroed, so reference fields start out null.
pub fn initialize_header(start: Address, size: usize, ref_fields: usize) -> ObjectReference {
    debug_assert!(size >= HEADER_BYTES + ref_fields * BYTES_IN_WORD);
    debug_assert!(size <= MAX_OBJECT_SIZE);
    debug_assert!(start.is_aligned_to(MIN_OBJECT_ALIGNMENT));
    unsafe {
        (start + STATUS_WORD_OFFSET).atomic_store::<AtomicUsize>(0, Ordering::Relaxed);
        (start + LAYOUT_WORD_OFFSET).atomic_store::<AtomicUsize>(
            (ref_fields << REF_FIELDS_SHIFT) | size,
            Ordering::Release,
        );
    }
    ObjectReference::from_raw_address(start)
}

fn layout_word(object: ObjectReference) -> usize {
    unsafe {
        (object.to_raw_address() + LAYOUT_WORD_OFFSET).atomic_load::<AtomicUsize>(Ordering::Acquire)
    }
}

/// Total size of the object in bytes, header included.
pub fn get_size(object: ObjectReference) -> usize {
    layout_word(object) & SIZE_MASK
}

pub fn ref_field_count(object: ObjectReference) -> usize {
    layout_word(object) >> REF_FIELDS_SHIFT
}

/// The slot of the `index`-th reference field.
pub fn ref_field_slot(object: ObjectReference, index: usize) -> Slot {
    debug_assert!(
        index < ref_field_count(object),
        "field {} out of bounds for {}",
        index,
        object
    );
    Slot::from_address(object.to_raw_address() + HEADER_BYTES + index * BYTES_IN_WORD)
}

/// Start of the non-reference payload.
pub fn payload_start(object: ObjectReference) -> Address {
    object.to_raw_address() + HEADER_BYTES + ref_field_count(object) * BYTES_IN_WORD
}

/// Address just past the end of the object.
pub fn object_end(object: ObjectReference) -> Address {
    object.to_raw_address() + get_size(object)
}

/// Call `f` on every reference slot of the object.
pub fn scan_object<F: FnMut(Slot)>(object: ObjectReference, mut f: F) {
    for i in 0..ref_field_count(object) {
        f(ref_field_slot(object, i));
    }
}

/// Copy the object to `to`, which must have room for `get_size` bytes. The copy gets a fresh
/// header with a zero status word.
///
/// # Safety
/// `to` must be a fresh allocation that does not overlap the object.
pub unsafe fn copy_to(object: ObjectReference, to: Address) -> ObjectReference {
    let size = get_size(object);
    let from = object.to_raw_address();
    // Reference fields are copied word by word with atomic loads. Mutators may be writing them.
    let refs = ref_field_count(object);
    for i in 0..refs {
        let value = ref_field_slot(object, i).load();
        (to + HEADER_BYTES + i * BYTES_IN_WORD).store(value);
    }
    let payload_offset = HEADER_BYTES + refs * BYTES_IN_WORD;
    crate::util::memory::copy_nonoverlapping(
        from + payload_offset,
        to + payload_offset,
        size - payload_offset,
    );
    initialize_header(to, size, refs)
}

/// Forwarding pointers in the status word.
pub mod forwarding {
    use super::*;

    fn status_word(object: ObjectReference) -> Address {
        object.to_raw_address() + STATUS_WORD_OFFSET
    }

    fn load_status(object: ObjectReference) -> usize {
        unsafe { status_word(object).atomic_load::<AtomicUsize>(Ordering::Acquire) }
    }

    pub fn is_forwarded(object: ObjectReference) -> bool {
        load_status(object) & FORWARDING_MASK == FORWARDED
    }

    /// The new copy of the object, if one has been installed. A self-forwarded object returns
    /// itself.
    pub fn get_forwardee(object: ObjectReference) -> Option<ObjectReference> {
        let status = load_status(object);
        if status & FORWARDING_MASK == FORWARDED {
            Some(ObjectReference::from_raw_address(unsafe {
                Address::from_usize(status & !FORWARDING_MASK)
            }))
        } else {
            None
        }
    }

    /// Install `to` as the forwardee of `object`. Only the first installation succeeds; the others
    /// get back the winning forwardee.
    pub fn try_install(
        object: ObjectReference,
        to: ObjectReference,
    ) -> Result<ObjectReference, ObjectReference> {
        let new = to.to_raw_address().as_usize() | FORWARDED;
        match unsafe {
            status_word(object).compare_exchange::<AtomicUsize>(
                0,
                new,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
        } {
            Ok(_) => Ok(to),
            Err(status) => {
                debug_assert_eq!(status & FORWARDING_MASK, FORWARDED);
                Err(ObjectReference::from_raw_address(unsafe {
                    Address::from_usize(status & !FORWARDING_MASK)
                }))
            }
        }
    }

    /// Follow the forwarding pointer if there is one.
    pub fn resolve(object: ObjectReference) -> ObjectReference {
        if object.is_null() {
            return object;
        }
        get_forwardee(object).unwrap_or(object)
    }

    pub fn is_self_forwarded(object: ObjectReference) -> bool {
        get_forwardee(object) == Some(object)
    }

    /// Drop any forwarding state. Used when the object's region is recycled or an evacuation
    /// failure is resolved in place.
    pub fn clear(object: ObjectReference) {
        unsafe { status_word(object).atomic_store::<AtomicUsize>(0, Ordering::Release) }
    }
}
