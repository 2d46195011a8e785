//! Ordered, identifier-indexed collections.

use std::fmt;

use indexmap::IndexMap;

use crate::ids::Identifiable;

/// An ordered collection of items keyed by their identifier.
///
/// Insertion order is preserved. Identifiers are unique: inserting an item
/// whose identifier is already present replaces the existing item in place.
pub struct Snapshot<T: Identifiable> {
    items: IndexMap<T::Id, T>,
}

impl<T: Identifiable> Snapshot<T> {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self {
            items: IndexMap::new(),
        }
    }

    /// Insert or replace an item. Returns the replaced item, if any.
    pub fn insert(&mut self, item: T) -> Option<T> {
        self.items.insert(item.id(), item)
    }

    /// Remove an item by identifier, keeping the order of the rest.
    pub fn remove(&mut self, id: &T::Id) -> Option<T> {
        self.items.shift_remove(id)
    }

    pub fn get(&self, id: &T::Id) -> Option<&T> {
        self.items.get(id)
    }

    pub fn contains(&self, id: &T::Id) -> bool {
        self.items.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Identifiers in order.
    pub fn ids(&self) -> impl Iterator<Item = &T::Id> {
        self.items.keys()
    }

    /// Items in order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }

    /// Consume into a plain vector, in order.
    pub fn into_vec(self) -> Vec<T> {
        self.items.into_values().collect()
    }
}

impl<T: Identifiable> Default for Snapshot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Identifiable + Clone> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

impl<T: Identifiable + PartialEq> PartialEq for Snapshot<T> {
    /// Order-sensitive equality.
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

impl<T: Identifiable + fmt::Debug> fmt::Debug for Snapshot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.values()).finish()
    }
}

impl<T: Identifiable> FromIterator<T> for Snapshot<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for item in iter {
            snapshot.insert(item);
        }
        snapshot
    }
}

impl<T: Identifiable> IntoIterator for Snapshot<T> {
    type Item = T;
    type IntoIter = indexmap::map::IntoValues<T::Id, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_values()
    }
}
