//! Keyed collections used to route step outputs to their consumers.

use std::collections::BTreeMap;

use crate::error::AlsError;

/// Mapping from block index (the destination or source node) to a payload.
///
/// Iteration order is ascending by key, so every consumer sees the same
/// order regardless of the order in which entries arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValueCollection<T> {
    entries: BTreeMap<usize, T>,
}

impl<T> Default for KeyValueCollection<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T> KeyValueCollection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, returning the previous payload if any.
    pub fn insert(&mut self, key: usize, value: T) -> Option<T> {
        self.entries.insert(key, value)
    }

    pub fn get(&self, key: usize) -> Option<&T> {
        self.entries.get(&key)
    }

    pub fn remove(&mut self, key: usize) -> Option<T> {
        self.entries.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.keys().copied()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.entries.iter().map(|(&k, v)| (k, v))
    }

    /// Fetch `key`, failing with `NullInput(name)` when it is absent.
    pub fn require(&self, key: usize, name: &'static str) -> Result<&T, AlsError> {
        self.get(key).ok_or(AlsError::NullInput(name))
    }

    pub(crate) fn require_mut(&mut self, key: usize) -> Result<&mut T, AlsError> {
        self.entries
            .get_mut(&key)
            .ok_or(AlsError::NullPartialResult("collection entry"))
    }

    /// Fail with `EmptyCollection(name)` when there are no entries.
    pub(crate) fn check_not_empty(&self, name: &'static str) -> Result<(), AlsError> {
        if self.is_empty() {
            Err(AlsError::EmptyCollection(name))
        } else {
            Ok(())
        }
    }
}

impl<T> FromIterator<(usize, T)> for KeyValueCollection<T> {
    fn from_iter<I: IntoIterator<Item = (usize, T)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<T> IntoIterator for KeyValueCollection<T> {
    type Item = (usize, T);
    type IntoIter = std::collections::btree_map::IntoIter<usize, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
