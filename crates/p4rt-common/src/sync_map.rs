//! Ordered map wrapper that never creates entries implicitly.
//!
//! Lookups return `Option`, and the only way to add an entry is
//! `try_insert`, which refuses occupied keys. Iteration follows key order, so a
//! table keyed by port number lists ports in ascending order.

use std::collections::BTreeMap;
use thiserror::Error;

/// Error type for SyncMap operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncMapError {
    #[error("Key already present")]
    KeyExists,
}

/// An ordered map that never auto-vivifies entries.
///
/// # Example
///
/// ```
/// use p4rt_common::SyncMap;
///
/// let mut map: SyncMap<u16, &str> = SyncMap::new();
/// assert!(map.get(&7).is_none());
/// assert!(map.is_empty());
///
/// map.try_insert(7, "eth7").unwrap();
/// assert!(map.try_insert(7, "other").is_err());
/// assert_eq!(map.get(&7), Some(&"eth7"));
/// ```
#[derive(Debug, Clone)]
pub struct SyncMap<K, V> {
    inner: BTreeMap<K, V>,
}

impl<K, V> SyncMap<K, V>
where
    K: Ord,
{
    /// Creates a new empty map.
    pub fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
    }

    /// Returns the number of entries in the map.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns true if the map contains the given key.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    /// Returns a reference to the value for the given key.
    ///
    /// **This never creates entries.**
    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    /// Inserts a key-value pair only if the key is vacant.
    pub fn try_insert(&mut self, key: K, value: V) -> Result<&mut V, SyncMapError> {
        use std::collections::btree_map::Entry;
        match self.inner.entry(key) {
            Entry::Vacant(slot) => Ok(slot.insert(value)),
            Entry::Occupied(_) => Err(SyncMapError::KeyExists),
        }
    }

    /// Removes a key from the map.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.remove(key)
    }

    /// Removes and returns every entry in key order.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        std::mem::take(&mut self.inner).into_iter().collect()
    }

    /// Returns the first entry whose value matches `pred`.
    pub fn find<P>(&self, mut pred: P) -> Option<(&K, &V)>
    where
        P: FnMut(&V) -> bool,
    {
        self.inner.iter().find(|(_, v)| pred(v))
    }

    /// Returns an iterator over key-value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }

    /// Returns an iterator over values in key order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.inner.values()
    }
}

impl<K, V> Default for SyncMap<K, V>
where
    K: Ord,
{
    fn default() -> Self {
        Self::new()
    }
}
