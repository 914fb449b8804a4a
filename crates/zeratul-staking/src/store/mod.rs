//! Ordered byte-keyed store
//!
//! All module state lives in one sorted map. Values are bincode-encoded;
//! keys come from [`keys`] and sort in the iteration order the keeper relies
//! on (power index descending when walked in reverse, queues ascending by
//! time).
//!
//! Writes made inside a checkpoint are journaled with the value they
//! replaced, so a failed transaction is undone in time proportional to what
//! it wrote. Checkpoints nest: committing an inner one folds its journal
//! into the enclosing one.

pub mod keys;

use crate::error::{Result, StakingError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Previous value of a key, `None` if it was absent
type UndoEntry = (Vec<u8>, Option<Vec<u8>>);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KvStore {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    journal: Vec<Vec<UndoEntry>>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get_raw(&self, key: &[u8]) -> Option<&[u8]> {
        self.data.get(key).map(Vec::as_slice)
    }

    pub fn set_raw(&mut self, key: Vec<u8>, value: Vec<u8>) {
        let old = self.data.insert(key.clone(), value);
        self.record(key, old);
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.data.contains_key(key)
    }

    pub fn delete(&mut self, key: &[u8]) {
        if let Some(old) = self.data.remove(key) {
            self.record(key.to_vec(), Some(old));
        }
    }

    fn record(&mut self, key: Vec<u8>, old: Option<Vec<u8>>) {
        if let Some(frame) = self.journal.last_mut() {
            frame.push((key, old));
        }
    }

    /// Opens a checkpoint; every write until the matching `commit` or
    /// `rollback` is journaled
    pub fn checkpoint(&mut self) {
        self.journal.push(Vec::new());
    }

    /// Keeps the writes of the innermost checkpoint
    pub fn commit(&mut self) {
        if let Some(frame) = self.journal.pop() {
            if let Some(parent) = self.journal.last_mut() {
                parent.extend(frame);
            }
        }
    }

    /// Undoes the writes of the innermost checkpoint, newest first
    pub fn rollback(&mut self) {
        let Some(frame) = self.journal.pop() else {
            return;
        };
        for (key, old) in frame.into_iter().rev() {
            match old {
                Some(value) => self.data.insert(key, value),
                None => self.data.remove(&key),
            };
        }
    }

    /// Depth of open checkpoints
    pub fn checkpoints(&self) -> usize {
        self.journal.len()
    }

    /// Typed read. A value that fails to decode means the store is corrupt.
    pub fn get<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        self.get_raw(key).map(decode).transpose()
    }

    pub fn set<T: Serialize>(&mut self, key: Vec<u8>, value: &T) -> Result<()> {
        let bytes = bincode::serialize(value)
            .map_err(|e| StakingError::invariant(format!("store encode: {}", e)))?;
        self.set_raw(key, bytes);
        Ok(())
    }

    /// Entries whose key starts with `prefix`, ascending
    pub fn prefix_iter<'a>(&'a self, prefix: &'a [u8]) -> impl Iterator<Item = (&'a [u8], &'a [u8])> + 'a {
        self.data
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Entries whose key starts with `prefix`, descending
    pub fn prefix_iter_rev<'a>(&'a self, prefix: &'a [u8]) -> Box<dyn Iterator<Item = (&'a [u8], &'a [u8])> + 'a> {
        let entries = match prefix_end(prefix) {
            Some(end) => self
                .data
                .range::<[u8], _>((Bound::Included(prefix), Bound::Excluded(end.as_slice())))
                .rev()
                .map(|(k, v)| (k.as_slice(), v.as_slice()))
                .collect::<Vec<_>>(),
            None => self
                .data
                .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
                .rev()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| (k.as_slice(), v.as_slice()))
                .collect::<Vec<_>>(),
        };
        Box::new(entries.into_iter())
    }

    /// Entries under `prefix` with key `<= end`, ascending. Used to drain
    /// time-keyed queues up to the current block.
    pub fn range_until<'a>(&'a self, prefix: &'a [u8], end: &'a [u8]) -> impl Iterator<Item = (&'a [u8], &'a [u8])> + 'a {
        let upper = end.max(prefix);
        self.data
            .range::<[u8], _>((Bound::Included(prefix), Bound::Included(upper)))
            .take_while(move |(k, _)| k.starts_with(prefix) && k.as_slice() <= end)
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Decoded values under `prefix`, ascending by key
    pub fn prefix_values<T: DeserializeOwned>(&self, prefix: &[u8]) -> Result<Vec<T>> {
        self.prefix_iter(prefix).map(|(_, v)| decode(v)).collect()
    }

    /// Keys under `prefix`, ascending, copied so the caller can mutate
    pub fn prefix_keys(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        self.prefix_iter(prefix).map(|(k, _)| k.to_vec()).collect()
    }
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes)
        .map_err(|e| StakingError::invariant(format!("store decode: {}", e)))
}

/// Smallest key greater than every key starting with `prefix`, if any
fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_get_set() {
        let mut store = KvStore::new();
        store.set(vec![1, 2], &42u64).unwrap();
        assert_eq!(store.get::<u64>(&[1, 2]).unwrap(), Some(42));
        assert_eq!(store.get::<u64>(&[1, 3]).unwrap(), None);

        store.delete(&[1, 2]);
        assert!(!store.has(&[1, 2]));
    }

    #[test]
    fn test_prefix_iteration_both_directions() {
        let mut store = KvStore::new();
        for key in [vec![1, 0], vec![1, 5], vec![1, 255], vec![2, 0], vec![0, 9]] {
            store.set_raw(key.clone(), key);
        }

        let forward: Vec<_> = store.prefix_iter(&[1]).map(|(k, _)| k.to_vec()).collect();
        assert_eq!(forward, vec![vec![1, 0], vec![1, 5], vec![1, 255]]);

        let backward: Vec<_> = store.prefix_iter_rev(&[1]).map(|(k, _)| k.to_vec()).collect();
        assert_eq!(backward, vec![vec![1, 255], vec![1, 5], vec![1, 0]]);
    }

    #[test]
    fn test_reverse_iteration_with_max_prefix() {
        let mut store = KvStore::new();
        store.set_raw(vec![255, 1], vec![]);
        store.set_raw(vec![255, 2], vec![]);
        store.set_raw(vec![254, 9], vec![]);

        let keys: Vec<_> = store.prefix_iter_rev(&[255]).map(|(k, _)| k.to_vec()).collect();
        assert_eq!(keys, vec![vec![255, 2], vec![255, 1]]);
    }

    #[test]
    fn test_range_until_is_inclusive() {
        let mut store = KvStore::new();
        for t in [1u8, 3, 5, 7] {
            store.set_raw(vec![9, t], vec![t]);
        }
        store.set_raw(vec![10, 0], vec![]);

        let due: Vec<_> = store.range_until(&[9], &[9, 5]).map(|(_, v)| v[0]).collect();
        assert_eq!(due, vec![1, 3, 5]);
    }

    #[test]
    fn test_corrupt_value_is_invariant_error() {
        let mut store = KvStore::new();
        store.set_raw(vec![1], vec![0xff]);
        let err = store.get::<String>(&[1]).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_rollback_restores_overwritten_and_deleted_keys() {
        let mut store = KvStore::new();
        store.set_raw(vec![1], vec![1]);
        store.set_raw(vec![2], vec![2]);
        let before = store.clone();

        store.checkpoint();
        store.set_raw(vec![1], vec![10]);
        store.set_raw(vec![1], vec![11]);
        store.delete(&[2]);
        store.set_raw(vec![3], vec![3]);
        store.rollback();

        assert_eq!(store, before);
        assert_eq!(store.checkpoints(), 0);
    }

    #[test]
    fn test_nested_commit_is_undone_by_outer_rollback() {
        let mut store = KvStore::new();
        store.checkpoint();
        store.set_raw(vec![1], vec![1]);

        store.checkpoint();
        store.set_raw(vec![2], vec![2]);
        store.commit();

        store.checkpoint();
        store.set_raw(vec![3], vec![3]);
        store.rollback();
        assert!(store.has(&[2]));
        assert!(!store.has(&[3]));

        store.rollback();
        assert!(store.is_empty());
    }
}
