//! Raw addresses and the typed views of them the heap hands out: object references, reference
//! slots and runs of slots.

use atomic_traits::Atomic;
use bytemuck::NoUninit;

use std::fmt;
use std::mem;
use std::ops::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// size in bytes
pub type ByteSize = usize;

/// An address in the heap or in memory the heap manages. Arithmetic is by bytes. Anything that
/// reads or writes through an address is unsafe.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, PartialOrd, Ord, PartialEq, NoUninit)]
pub struct Address(usize);

impl Add<ByteSize> for Address {
    type Output = Address;
    fn add(self, offset: ByteSize) -> Address {
        Address(self.0 + offset)
    }
}

impl AddAssign<ByteSize> for Address {
    fn add_assign(&mut self, offset: ByteSize) {
        self.0 += offset;
    }
}

impl Sub<ByteSize> for Address {
    type Output = Address;
    fn sub(self, offset: ByteSize) -> Address {
        Address(self.0 - offset)
    }
}

/// The distance between two addresses. The first one must not be lower.
impl Sub<Address> for Address {
    type Output = ByteSize;
    fn sub(self, other: Address) -> ByteSize {
        debug_assert!(
            self.0 >= other.0,
            "for (addr_a - addr_b), a({}) needs to be larger than b({})",
            self,
            other
        );
        self.0 - other.0
    }
}

impl Address {
    /// The lowest possible address.
    pub const ZERO: Self = Address(0);

    pub fn from_ref<T>(r: &T) -> Address {
        Address(r as *const T as usize)
    }

    pub fn from_mut_ptr<T>(ptr: *mut T) -> Address {
        Address(ptr as usize)
    }

    /// The zero address, as a sentinel for an empty range.
    /// # Safety
    /// The result must never be dereferenced.
    pub const unsafe fn zero() -> Address {
        Address(0)
    }

    /// # Safety
    /// The caller makes up an address. Only for hard-coded addresses, e.g. in tests.
    pub const unsafe fn from_usize(raw: usize) -> Address {
        Address(raw)
    }

    /// # Safety
    /// The address must be mapped and hold a valid `T`.
    pub unsafe fn load<T: Copy>(self) -> T {
        *(self.0 as *mut T)
    }

    /// Write `value` without dropping what was there.
    /// # Safety
    /// The address must be mapped and writable.
    pub unsafe fn store<T>(self, value: T) {
        (self.0 as *mut T).write(value);
    }

    /// # Safety
    /// The address must be mapped and aligned for `T`.
    pub unsafe fn atomic_load<T: Atomic>(self, order: Ordering) -> T::Type {
        let loc = &*(self.0 as *const T);
        loc.load(order)
    }

    /// # Safety
    /// The address must be mapped, writable and aligned for `T`.
    pub unsafe fn atomic_store<T: Atomic>(self, val: T::Type, order: Ordering) {
        let loc = &*(self.0 as *const T);
        loc.store(val, order)
    }

    /// # Safety
    /// The address must be mapped, writable and aligned for `T`.
    pub unsafe fn compare_exchange<T: Atomic>(
        self,
        old: T::Type,
        new: T::Type,
        success: Ordering,
        failure: Ordering,
    ) -> Result<T::Type, T::Type> {
        let loc = &*(self.0 as *const T);
        loc.compare_exchange(old, new, success, failure)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn align_up(self, align: ByteSize) -> Address {
        use crate::util::conversions;
        Address(conversions::raw_align_up(self.0, align))
    }

    pub const fn align_down(self, align: ByteSize) -> Address {
        use crate::util::conversions;
        Address(conversions::raw_align_down(self.0, align))
    }

    pub const fn is_aligned_to(self, align: usize) -> bool {
        use crate::util::conversions;
        conversions::raw_is_aligned(self.0, align)
    }

    pub fn to_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    pub fn to_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Hex with a `0x` prefix.
impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A reference to an object: the address of its first header word, or null. No arithmetic is
/// allowed on it. See [`crate::util::object_model`] for the layout behind it.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, PartialOrd, Ord, PartialEq, NoUninit)]
pub struct ObjectReference(usize);

impl ObjectReference {
    pub const NULL: ObjectReference = ObjectReference(0);

    pub fn to_raw_address(self) -> Address {
        Address(self.0)
    }

    /// The address must be the start of an object allocated by one of our heaps, or zero.
    pub fn from_raw_address(addr: Address) -> ObjectReference {
        ObjectReference(addr.0)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn value(self) -> usize {
        self.0
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A reference slot: a word in memory that holds an [`ObjectReference`].
///
/// Slots are object fields, array elements, or root handles. All accesses are atomic because
/// mutators and collector threads race on them.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, PartialEq, Debug)]
pub struct Slot(Address);

impl Slot {
    pub fn from_address(addr: Address) -> Self {
        debug_assert!(!addr.is_zero());
        debug_assert!(addr.is_aligned_to(mem::size_of::<usize>()));
        Slot(addr)
    }

    pub fn as_address(self) -> Address {
        self.0
    }

    /// Load the reference held in the slot.
    pub fn load(self) -> ObjectReference {
        ObjectReference(unsafe { self.0.atomic_load::<AtomicUsize>(Ordering::Acquire) })
    }

    /// Store a reference into the slot.
    pub fn store(self, value: ObjectReference) {
        unsafe { self.0.atomic_store::<AtomicUsize>(value.0, Ordering::Release) }
    }

    /// Atomically replace `old` with `new`. On failure, returns the value found in the slot.
    pub fn compare_exchange(
        self,
        old: ObjectReference,
        new: ObjectReference,
    ) -> Result<ObjectReference, ObjectReference> {
        unsafe {
            self.0
                .compare_exchange::<AtomicUsize>(old.0, new.0, Ordering::AcqRel, Ordering::Acquire)
        }
        .map(ObjectReference)
        .map_err(ObjectReference)
    }
}

/// A contiguous run of reference slots, e.g. the destination of an array copy.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct MemorySlice {
    start: Address,
    len: usize,
}

impl MemorySlice {
    /// `len` slots starting at `start`.
    pub fn new(start: Address, len: usize) -> Self {
        debug_assert!(start.is_aligned_to(mem::size_of::<usize>()));
        MemorySlice { start, len }
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The `index`-th slot.
    pub fn get(&self, index: usize) -> Slot {
        debug_assert!(index < self.len);
        Slot::from_address(self.start + index * mem::size_of::<usize>())
    }

    pub fn iter_slots(&self) -> impl Iterator<Item = Slot> + '_ {
        (0..self.len).map(move |i| self.get(i))
    }
}
