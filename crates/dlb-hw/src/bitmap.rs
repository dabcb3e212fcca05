//! Interval allocator over a fixed number of units.
//!
//! A set bit means the unit is free. Domains carve contiguous runs of
//! credits, history-list entries and atomic-inflight entries out of these
//! bitmaps and hand them back on reset.

use crate::error::{HwError, HwResult};

/// Contract for "allocate N contiguous units from a free set".
pub trait IntervalAllocator {
    /// Total number of units managed.
    fn capacity(&self) -> u32;

    /// Marks every unit free.
    fn fill(&mut self);

    /// Marks every unit used.
    fn zero(&mut self);

    /// Returns true if the unit at `index` is free.
    fn is_free(&self, index: u32) -> bool;

    /// Number of free units.
    fn count_free(&self) -> u32;

    /// Length of the longest run of free units.
    fn longest_free_run(&self) -> u32;

    /// Returns the base of the first free run of at least `len` units.
    ///
    /// A zero-length request never matches.
    fn find_free_run(&self, len: u32) -> Option<u32>;

    /// Marks `len` units starting at `base` as used.
    fn clear_range(&mut self, base: u32, len: u32) -> HwResult<()>;

    /// Returns `len` units starting at `base` to the free set.
    ///
    /// Fails if the range is out of bounds or any unit in it is already free.
    fn set_range(&mut self, base: u32, len: u32) -> HwResult<()>;
}

const WORD_BITS: u32 = u64::BITS;

/// Word-packed bitmap implementation of [`IntervalAllocator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlbBitmap {
    words: Vec<u64>,
    nbits: u32,
}

impl DlbBitmap {
    /// Allocates a bitmap of `nbits` units, all used.
    ///
    /// # Errors
    ///
    /// A zero-capacity bitmap is rejected.
    pub fn alloc(nbits: u32) -> HwResult<Self> {
        if nbits == 0 {
            return Err(HwError::allocation("bitmap capacity must be nonzero"));
        }
        let nwords = nbits.div_ceil(WORD_BITS) as usize;
        Ok(Self {
            words: vec![0; nwords],
            nbits,
        })
    }

    fn check_range(&self, base: u32, len: u32) -> HwResult<()> {
        match base.checked_add(len) {
            Some(end) if end <= self.nbits => Ok(()),
            _ => Err(HwError::RangeOutOfBounds {
                base,
                len,
                capacity: self.nbits,
            }),
        }
    }

    fn set_bit(&mut self, index: u32, free: bool) {
        let word = (index / WORD_BITS) as usize;
        let mask = 1u64 << (index % WORD_BITS);
        if free {
            self.words[word] |= mask;
        } else {
            self.words[word] &= !mask;
        }
    }
}

impl IntervalAllocator for DlbBitmap {
    fn capacity(&self) -> u32 {
        self.nbits
    }

    fn fill(&mut self) {
        for word in self.words.iter_mut() {
            *word = u64::MAX;
        }
        // Keep bits past the end clear so count_free stays exact.
        let tail = self.nbits % WORD_BITS;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last = (1u64 << tail) - 1;
            }
        }
    }

    fn zero(&mut self) {
        for word in self.words.iter_mut() {
            *word = 0;
        }
    }

    fn is_free(&self, index: u32) -> bool {
        if index >= self.nbits {
            return false;
        }
        let word = (index / WORD_BITS) as usize;
        self.words[word] & (1u64 << (index % WORD_BITS)) != 0
    }

    fn count_free(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    fn longest_free_run(&self) -> u32 {
        let mut longest = 0;
        let mut current = 0;
        for i in 0..self.nbits {
            if self.is_free(i) {
                current += 1;
                longest = longest.max(current);
            } else {
                current = 0;
            }
        }
        longest
    }

    fn find_free_run(&self, len: u32) -> Option<u32> {
        if len == 0 || len > self.nbits {
            return None;
        }
        let mut run_start = 0;
        let mut run_len = 0;
        for i in 0..self.nbits {
            if self.is_free(i) {
                if run_len == 0 {
                    run_start = i;
                }
                run_len += 1;
                if run_len == len {
                    return Some(run_start);
                }
            } else {
                run_len = 0;
            }
        }
        None
    }

    fn clear_range(&mut self, base: u32, len: u32) -> HwResult<()> {
        self.check_range(base, len)?;
        for i in base..base + len {
            self.set_bit(i, false);
        }
        Ok(())
    }

    fn set_range(&mut self, base: u32, len: u32) -> HwResult<()> {
        self.check_range(base, len)?;
        if (base..base + len).any(|i| self.is_free(i)) {
            return Err(HwError::RangeAlreadyFree { base, len });
        }
        for i in base..base + len {
            self.set_bit(i, true);
        }
        Ok(())
    }
}
