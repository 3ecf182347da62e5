use crate::util::constants::*;
use crate::util::Address;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One bit per minimal-alignment granule of a region. Used both for mark bits and for
/// object-start (valid object) bits.
pub struct RegionBitmap {
    base: Address,
    words: Box<[AtomicUsize]>,
}

impl RegionBitmap {
    pub fn new(base: Address, bytes: usize) -> Self {
        let bits = bytes >> LOG_MIN_OBJECT_ALIGNMENT;
        let words = (bits + BITS_IN_WORD - 1) / BITS_IN_WORD;
        RegionBitmap {
            base,
            words: (0..words).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    #[inline(always)]
    fn index(&self, addr: Address) -> (usize, usize) {
        debug_assert!(addr >= self.base);
        debug_assert!(addr.is_aligned_to(MIN_OBJECT_ALIGNMENT));
        let bit = (addr - self.base) >> LOG_MIN_OBJECT_ALIGNMENT;
        (bit / BITS_IN_WORD, bit % BITS_IN_WORD)
    }

    fn addr_of(&self, word: usize, bit: usize) -> Address {
        self.base + ((word * BITS_IN_WORD + bit) << LOG_MIN_OBJECT_ALIGNMENT)
    }

    /// Set the bit for `addr`. Returns true if this call set it.
    pub fn set(&self, addr: Address) -> bool {
        let (word, bit) = self.index(addr);
        let mask = 1usize << bit;
        self.words[word].fetch_or(mask, Ordering::AcqRel) & mask == 0
    }

    pub fn clear(&self, addr: Address) {
        let (word, bit) = self.index(addr);
        self.words[word].fetch_and(!(1usize << bit), Ordering::AcqRel);
    }

    pub fn is_set(&self, addr: Address) -> bool {
        let (word, bit) = self.index(addr);
        self.words[word].load(Ordering::Acquire) & (1usize << bit) != 0
    }

    pub fn clear_all(&self) {
        for w in self.words.iter() {
            w.store(0, Ordering::Relaxed);
        }
    }

    /// Call `f` on the address of every set bit in `[from, to)`, in address order.
    pub fn iterate<F: FnMut(Address)>(&self, from: Address, to: Address, mut f: F) {
        if from >= to {
            return;
        }
        let (first_word, first_bit) = self.index(from);
        for word in first_word..self.words.len() {
            let mut bits = self.words[word].load(Ordering::Acquire);
            if word == first_word {
                bits &= !0usize << first_bit;
            }
            while bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                let addr = self.addr_of(word, bit);
                if addr >= to {
                    return;
                }
                f(addr);
                bits &= bits - 1;
            }
        }
    }

    pub fn count(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }
}
