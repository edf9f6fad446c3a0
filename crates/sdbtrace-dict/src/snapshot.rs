//! Snapshot-id reconciliation between recording and replay.

use std::collections::HashMap;

use crate::error::DictError;

/// Maps snapshot ids seen at record time to the ids the replay backend
/// returned for the same `Snapshot` operation.
///
/// Backends are free to number snapshots however they like, so a recorded
/// `RevertToSnapshot(id)` has to be translated before it is replayed. The
/// table only lives for one transaction.
#[derive(Clone, Debug, Default)]
pub struct SnapshotIndex {
    recorded_to_replayed: HashMap<i32, i32>,
}

impl SnapshotIndex {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every mapping. Called at each replayed transaction start.
    pub fn clear(&mut self) {
        self.recorded_to_replayed.clear();
    }

    /// Register `recorded → replayed`, replacing any earlier mapping.
    pub fn add(&mut self, recorded: i32, replayed: i32) {
        self.recorded_to_replayed.insert(recorded, replayed);
    }

    /// Replay-side id for `recorded`.
    pub fn get(&self, recorded: i32) -> Result<i32, DictError> {
        self.recorded_to_replayed
            .get(&recorded)
            .copied()
            .ok_or(DictError::MissingSnapshot { recorded })
    }

    /// Number of registered snapshots.
    pub fn len(&self) -> usize {
        self.recorded_to_replayed.len()
    }

    /// Returns `true` if no snapshot has been registered.
    pub fn is_empty(&self) -> bool {
        self.recorded_to_replayed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_get() {
        let mut index = SnapshotIndex::new();
        index.add(3, 17);
        assert_eq!(index.get(3).unwrap(), 17);
    }

    #[test]
    fn later_add_overwrites() {
        let mut index = SnapshotIndex::new();
        index.add(3, 17);
        index.add(3, 21);
        assert_eq!(index.get(3).unwrap(), 21);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn unknown_id_fails() {
        let index = SnapshotIndex::new();
        assert!(matches!(
            index.get(5),
            Err(DictError::MissingSnapshot { recorded: 5 })
        ));
    }

    #[test]
    fn clear_forgets_everything() {
        let mut index = SnapshotIndex::new();
        index.add(0, 0);
        index.clear();
        assert!(index.is_empty());
        assert!(index.get(0).is_err());
    }
}
