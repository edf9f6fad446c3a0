//! Code hashing and an optional memo cache for derived code hashes.

use std::collections::HashMap;

use parking_lot::Mutex;
use sha3::{Digest, Keccak256};

use crate::types::Hash;

/// Keccak-256 digest of `data`.
pub fn keccak256(data: &[u8]) -> Hash {
    Hash::from_slice(&Keccak256::digest(data))
}

/// Default number of digests a [`CodeHashCache`] holds.
pub const DEFAULT_CODE_HASH_CAPACITY: usize = 4096;

/// Memoizes keccak-256 hashes of contract code.
///
/// Backends that answer `get_code_hash` by hashing stored code can share
/// one cache (behind an `Arc`) across instances. All access goes through
/// a single mutex.
///
/// The cache holds at most `capacity` digests. Inserting into a full cache
/// clears it first, so memory stays bounded however much distinct code a
/// long replay hashes.
#[derive(Debug)]
pub struct CodeHashCache {
    entries: Mutex<HashMap<Vec<u8>, Hash>>,
    capacity: usize,
}

impl Default for CodeHashCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CODE_HASH_CAPACITY)
    }
}

impl CodeHashCache {
    /// Create an empty cache holding up to [`DEFAULT_CODE_HASH_CAPACITY`]
    /// digests.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cache holding up to `capacity` digests (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Largest number of digests kept at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Hash `code`, reusing a previously computed digest when available.
    pub fn hash(&self, code: &[u8]) -> Hash {
        let mut entries = self.entries.lock();
        if let Some(hash) = entries.get(code) {
            return *hash;
        }
        let hash = keccak256(code);
        if entries.len() >= self.capacity {
            entries.clear();
        }
        entries.insert(code.to_vec(), hash);
        hash
    }

    /// Number of memoized digests.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing has been hashed yet.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_code_hash_matches_known_constant() {
        // keccak256("") = c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470
        let h = keccak256(&[]);
        assert_eq!(h.as_bytes()[0], 0xc5);
        assert_eq!(h.as_bytes()[31], 0x70);
    }

    #[test]
    fn cache_memoizes() {
        let cache = CodeHashCache::new();
        let a = cache.hash(b"\x60\x00");
        let b = cache.hash(b"\x60\x00");
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
        cache.hash(b"\x60\x01");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn full_cache_starts_over() {
        let cache = CodeHashCache::with_capacity(2);
        cache.hash(b"\x60\x00");
        cache.hash(b"\x60\x01");
        assert_eq!(cache.len(), 2);
        // Hits never evict.
        cache.hash(b"\x60\x00");
        assert_eq!(cache.len(), 2);

        let h = cache.hash(b"\x60\x02");
        assert_eq!(cache.len(), 1);
        assert_eq!(h, keccak256(b"\x60\x02"));
        assert_eq!(cache.hash(b"\x60\x00"), keccak256(b"\x60\x00"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn zero_capacity_still_caches_one() {
        let cache = CodeHashCache::with_capacity(0);
        assert_eq!(cache.capacity(), 1);
        cache.hash(b"\x00");
        cache.hash(b"\x01");
        assert_eq!(cache.len(), 1);
    }
}
