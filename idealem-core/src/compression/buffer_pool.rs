//! Fixed-capacity pool of reference blocks
//!
//! Eviction is always slot 0 once the pool is full. The decoder replays the
//! same rule, so it must not be swapped for LRU or any other policy.

use super::similarity::ks_exchangeable;

/// Outcome of storing a block that found no match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// Block stored in a new slot at this index
    Appended(usize),
    /// Pool was full; this slot was replaced
    Overwrote(usize),
}

/// Reference blocks ("buffers") a new block may be matched against
#[derive(Debug, Clone)]
pub struct BufferPool {
    capacity: usize,
    slots: Vec<Vec<f64>>,
}

impl BufferPool {
    /// Create an empty pool holding at most `capacity` blocks
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Vec::with_capacity(capacity),
        }
    }

    /// First slot whose block is KS-exchangeable with `block`
    pub fn try_match(&self, block: &[f64], threshold: f64) -> Option<usize> {
        self.find(|buffer| ks_exchangeable(block, buffer, threshold))
    }

    /// First slot that is KS-exchangeable with `block` and holds exactly the
    /// same values, bit for bit.
    pub fn try_match_lossless(&self, block: &[f64], threshold: f64) -> Option<usize> {
        self.find(|buffer| same_bits(block, buffer) && ks_exchangeable(block, buffer, threshold))
    }

    /// First slot satisfying `predicate`, scanning in index order
    pub fn find<F>(&self, mut predicate: F) -> Option<usize>
    where
        F: FnMut(&[f64]) -> bool,
    {
        self.slots.iter().position(|buffer| predicate(buffer))
    }

    /// Append `block` while there is room, otherwise overwrite slot 0
    pub fn insert_or_overwrite(&mut self, block: &[f64]) -> InsertResult {
        if self.slots.len() < self.capacity {
            self.slots.push(block.to_vec());
            InsertResult::Appended(self.slots.len() - 1)
        } else {
            self.slots[0] = block.to_vec();
            InsertResult::Overwrote(0)
        }
    }

    /// Put `block` into `slot`, padding missing slots with zero blocks of
    /// `placeholder_len`. Returns false if `slot` is outside the capacity.
    pub fn place(&mut self, slot: usize, block: Vec<f64>, placeholder_len: usize) -> bool {
        if slot >= self.capacity {
            return false;
        }
        while self.slots.len() <= slot {
            self.slots.push(vec![0.0; placeholder_len]);
        }
        self.slots[slot] = block;
        true
    }

    /// Block stored in `slot`
    pub fn get(&self, slot: usize) -> Option<&[f64]> {
        self.slots.get(slot).map(Vec::as_slice)
    }

    /// Iterate over live slots in index order
    pub fn iter(&self) -> impl Iterator<Item = &[f64]> {
        self.slots.iter().map(Vec::as_slice)
    }

    /// Drop every slot (block size changed)
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Number of live slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Check if every slot is taken
    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    /// Maximum number of slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn same_bits(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}
