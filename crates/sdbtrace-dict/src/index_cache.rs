//! A small recency cache over dictionary indices.

use std::collections::HashMap;
use std::hash::Hash;

use crate::error::DictError;

/// Number of slots in an [`IndexCache`]. Positions fit in a `u8`.
pub const INDEX_CACHE_CAPACITY: usize = 256;

/// Fixed-size circular cache of recently used items.
///
/// Position 0 is the most recently placed item. A hit swaps the found slot
/// with the top slot instead of shifting everything in between, so the
/// ordering is only an approximation of least-recently-used. The recorder
/// and the replayer perform exactly the same sequence of [`place`] calls,
/// which is all the trace format relies on.
///
/// [`place`]: IndexCache::place
#[derive(Clone, Debug)]
pub struct IndexCache<T> {
    slots: Vec<T>,
    slot_of: HashMap<T, usize>,
    top: usize,
}

impl<T: Copy + Eq + Hash> IndexCache<T> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            slots: Vec::with_capacity(INDEX_CACHE_CAPACITY),
            slot_of: HashMap::with_capacity(INDEX_CACHE_CAPACITY),
            top: 0,
        }
    }

    /// Make `item` the most recent entry.
    ///
    /// Returns the item's position before the call on a hit, or `None` on a
    /// miss. A miss on a full cache evicts the oldest slot.
    pub fn place(&mut self, item: T) -> Option<u8> {
        if let Some(&slot) = self.slot_of.get(&item) {
            let pos = self.position_of(slot);
            if slot != self.top {
                let displaced = self.slots[self.top];
                self.slots.swap(slot, self.top);
                self.slot_of.insert(displaced, slot);
                self.slot_of.insert(item, self.top);
            }
            return Some(pos);
        }

        if self.slots.len() < INDEX_CACHE_CAPACITY {
            self.slots.push(item);
            self.top = self.slots.len() - 1;
        } else {
            self.top = (self.top + 1) % INDEX_CACHE_CAPACITY;
            let evicted = self.slots[self.top];
            self.slot_of.remove(&evicted);
            self.slots[self.top] = item;
        }
        self.slot_of.insert(item, self.top);
        None
    }

    /// Item at `pos` without changing the cache.
    pub fn get(&self, pos: u8) -> Result<T, DictError> {
        let pos = pos as usize;
        if pos >= self.slots.len() {
            return Err(DictError::CachePositionOutOfRange {
                pos: pos as u8,
                len: self.slots.len(),
            });
        }
        let slot = (self.top + INDEX_CACHE_CAPACITY - pos) % INDEX_CACHE_CAPACITY;
        Ok(self.slots[slot])
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.slot_of.clear();
        self.top = 0;
    }

    /// Number of populated slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn position_of(&self, slot: usize) -> u8 {
        ((self.top + INDEX_CACHE_CAPACITY - slot) % INDEX_CACHE_CAPACITY) as u8
    }
}

impl<T: Copy + Eq + Hash> Default for IndexCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_item_misses_then_hits_at_top() {
        let mut cache = IndexCache::new();
        assert_eq!(cache.place(42u32), None);
        assert_eq!(cache.place(42u32), Some(0));
        assert_eq!(cache.get(0).unwrap(), 42);
    }

    #[test]
    fn hit_reports_distance_and_swaps_with_top() {
        let mut cache = IndexCache::new();
        for v in 0..4u32 {
            cache.place(v);
        }
        // Order from the top: 3, 2, 1, 0.
        assert_eq!(cache.get(3).unwrap(), 0);
        assert_eq!(cache.place(1), Some(2));
        // 1 and 3 swapped: 1, 2, 3, 0.
        assert_eq!(cache.get(0).unwrap(), 1);
        assert_eq!(cache.get(1).unwrap(), 2);
        assert_eq!(cache.get(2).unwrap(), 3);
        assert_eq!(cache.get(3).unwrap(), 0);
    }

    #[test]
    fn oldest_entry_is_evicted_when_full() {
        let mut cache = IndexCache::new();
        for v in 0..=INDEX_CACHE_CAPACITY as u32 {
            assert_eq!(cache.place(v), None);
        }
        assert_eq!(cache.len(), INDEX_CACHE_CAPACITY);
        assert_eq!(cache.place(0), None);
        assert_eq!(cache.place(INDEX_CACHE_CAPACITY as u32), Some(1));
    }

    #[test]
    fn get_tracks_place_across_wraparound() {
        let mut cache = IndexCache::new();
        for v in 0..600u32 {
            cache.place(v % 300);
            let pos = cache.place(v % 300).unwrap();
            assert_eq!(pos, 0);
            assert_eq!(cache.get(0).unwrap(), v % 300);
        }
    }

    #[test]
    fn position_beyond_len_fails() {
        let mut cache = IndexCache::new();
        cache.place(1u32);
        assert!(matches!(
            cache.get(1),
            Err(DictError::CachePositionOutOfRange { pos: 1, len: 1 })
        ));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get(0).is_err());
    }
}
