//! Map for tracking which key corresponds to which index in an underlying
//! [`Vec`].

use anyhow::{Result, anyhow};
use hashbrown::{HashMap, hash_map::Entry};
use rustc_hash::FxBuildHasher;
use std::fmt::Debug;
use std::hash::Hash;

/// Map for tracking which key corresponds to which index in an underlying
/// [`Vec`].
///
/// Keeping keys and dense indices in sync lets callers address compactly
/// stored items by a stable key while still being free to reorder the items
/// (such as doing a swap remove) without invalidating any keys.
#[derive(Clone, Debug)]
pub struct KeyIndexMapper<K> {
    indices_for_keys: HashMap<K, usize, FxBuildHasher>,
    keys_at_indices: Vec<K>,
}

impl<K> KeyIndexMapper<K>
where
    K: Copy + Hash + Eq + Debug,
{
    /// Creates a new mapper with no keys.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a new mapper with at least the specified capacity and no keys.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            indices_for_keys: HashMap::with_capacity_and_hasher(capacity, FxBuildHasher),
            keys_at_indices: Vec::with_capacity(capacity),
        }
    }

    /// Creates a new mapper with the given set of keys. The index of each key
    /// will correspond to the position of the key in the provided iterator.
    ///
    /// # Panics
    /// If the iterator has multiple occurrences of the same key.
    pub fn new_with_keys(key_iter: impl IntoIterator<Item = K>) -> Self {
        let key_iter = key_iter.into_iter();
        let mut mapper = Self::with_capacity(key_iter.size_hint().0);
        for key in key_iter {
            mapper.push_key(key);
        }
        mapper
    }

    /// Whether the mapper has no keys.
    pub fn is_empty(&self) -> bool {
        self.keys_at_indices.is_empty()
    }

    /// The number of keys/indices in the mapper.
    pub fn len(&self) -> usize {
        self.keys_at_indices.len()
    }

    /// Whether an index exists for the given key.
    pub fn contains_key(&self, key: K) -> bool {
        self.indices_for_keys.contains_key(&key)
    }

    /// Returns the index corresponding to the given key.
    ///
    /// # Panics
    /// If the key does not exist.
    pub fn idx(&self, key: K) -> usize {
        self.indices_for_keys[&key]
    }

    /// Returns the index corresponding to the given key if the key exists,
    /// otherwise returns [`None`].
    pub fn get(&self, key: K) -> Option<usize> {
        self.indices_for_keys.get(&key).copied()
    }

    /// Returns the key corresponding to the given index.
    ///
    /// # Panics
    /// If the index is outside the bounds of the [`Vec`].
    pub fn key_at_idx(&self, idx: usize) -> K {
        self.keys_at_indices[idx]
    }

    /// Returns an iterator over all keys in the order in which their entries
    /// in the underlying [`Vec`] are stored.
    pub fn key_at_each_idx(&self) -> impl Iterator<Item = K> + '_ {
        self.keys_at_indices.iter().copied()
    }

    /// Adds the given key and maps it to the next index.
    ///
    /// # Errors
    /// Returns an error with the index of the key if the key already exists.
    pub fn try_push_key(&mut self, key: K) -> Result<(), usize> {
        match self.indices_for_keys.entry(key) {
            Entry::Vacant(entry) => {
                let idx_of_new_key = self.keys_at_indices.len();
                entry.insert(idx_of_new_key);
                self.keys_at_indices.push(key);
                Ok(())
            }
            Entry::Occupied(entry) => Err(*entry.get()),
        }
    }

    /// Adds the given key and maps it to the next index.
    ///
    /// # Panics
    /// If the key already exists.
    pub fn push_key(&mut self, key: K) {
        self.try_push_key(key)
            .expect("Tried to add an existing key");
    }

    /// Removes the given key and assigns the key at the last index to the
    /// index of the removed key (unless the key to remove was at the last
    /// index) before popping the end of the [`Vec`].
    ///
    /// # Returns
    /// The index of the removed key.
    ///
    /// # Errors
    /// Returns an error if the key to remove does not exist.
    pub fn try_swap_remove_key(&mut self, key: K) -> Result<usize> {
        let idx_of_removed_key = self
            .indices_for_keys
            .remove(&key)
            .ok_or_else(|| anyhow!("Tried to remove key that does not exist"))?;

        let last_key = self.keys_at_indices.pop().unwrap();
        if key != last_key {
            self.keys_at_indices[idx_of_removed_key] = last_key;
            *self.indices_for_keys.get_mut(&last_key).unwrap() = idx_of_removed_key;
        }
        Ok(idx_of_removed_key)
    }

    /// Removes the key corresponding to the given index and assigns the key
    /// at the last index to the index of the removed key (unless the key to
    /// remove was at the last index) before popping the end of the [`Vec`].
    ///
    /// # Panics
    /// If the index is outside the bounds of the [`Vec`].
    pub fn swap_remove_key_at_idx(&mut self, idx: usize) {
        let last_key = *self.keys_at_indices.last().unwrap();
        let removed_key = self.keys_at_indices.swap_remove(idx);
        self.indices_for_keys.remove(&removed_key).unwrap();
        if removed_key != last_key {
            *self.indices_for_keys.get_mut(&last_key).unwrap() = idx;
        }
    }

    /// Clears all stored indices and keys.
    pub fn clear(&mut self) {
        self.indices_for_keys.clear();
        self.keys_at_indices.clear();
    }
}

impl<K> Default for KeyIndexMapper<K>
where
    K: Copy + Hash + Eq + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_mapper_has_no_keys() {
        let mapper = KeyIndexMapper::<i32>::new();
        assert!(mapper.is_empty());
        assert_eq!(mapper.len(), 0);
        assert!(!mapper.contains_key(0));
        assert_eq!(mapper.get(0), None);
    }

    #[test]
    fn pushed_keys_map_to_consecutive_indices() {
        let mapper = KeyIndexMapper::new_with_keys([4, 2, 7]);
        assert_eq!(mapper.len(), 3);
        assert_eq!(mapper.idx(4), 0);
        assert_eq!(mapper.idx(2), 1);
        assert_eq!(mapper.idx(7), 2);
        assert_eq!(mapper.key_at_idx(0), 4);
        assert_eq!(mapper.key_at_idx(2), 7);
    }

    #[test]
    #[should_panic]
    fn pushing_duplicate_key_fails() {
        KeyIndexMapper::new_with_keys([2, 4, 2]);
    }

    #[test]
    fn try_push_of_existing_key_yields_its_index() {
        let mut mapper = KeyIndexMapper::new_with_keys([2, 4]);
        assert_eq!(mapper.try_push_key(4), Err(1));
    }

    #[test]
    fn swap_removing_key_moves_last_key_into_hole() {
        let mut mapper = KeyIndexMapper::new_with_keys([4, 2, 7]);
        assert_eq!(mapper.try_swap_remove_key(4).unwrap(), 0);
        assert_eq!(mapper.len(), 2);
        assert_eq!(mapper.idx(7), 0);
        assert_eq!(mapper.idx(2), 1);
        assert!(!mapper.contains_key(4));
    }

    #[test]
    fn swap_removing_key_at_idx_keeps_remaining_keys_consistent() {
        let mut mapper = KeyIndexMapper::new_with_keys([4, 2, 7]);
        mapper.swap_remove_key_at_idx(1);
        assert_eq!(mapper.len(), 2);
        assert_eq!(mapper.idx(4), 0);
        assert_eq!(mapper.idx(7), 1);
        assert!(!mapper.contains_key(2));
    }

    #[test]
    fn swap_removing_last_key_just_pops() {
        let mut mapper = KeyIndexMapper::new_with_keys([4, 2]);
        mapper.swap_remove_key_at_idx(1);
        assert_eq!(mapper.len(), 1);
        assert_eq!(mapper.idx(4), 0);
    }

    #[test]
    fn clearing_removes_all_keys() {
        let mut mapper = KeyIndexMapper::new_with_keys([4, 2]);
        mapper.clear();
        assert!(mapper.is_empty());
        assert!(!mapper.contains_key(4));
    }
}
