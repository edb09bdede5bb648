//! Persistent set, a [`PersistentMap`] with unit values.

use std::fmt;
use std::iter::FusedIterator;

use crate::hash::{hash_unordered, ValueEq, ValueHash};
use crate::map::{Keys, PersistentMap};

/// An immutable hash set sharing structure between versions.
pub struct PersistentSet<T> {
    map: PersistentMap<T, ()>,
}

impl<T> PersistentSet<T> {
    pub fn new() -> Self {
        PersistentSet {
            map: PersistentMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.map.ptr_eq(&other.map)
    }

    pub fn iter(&self) -> SetIter<'_, T> {
        SetIter(self.map.keys())
    }
}

impl<T: ValueHash + ValueEq> PersistentSet<T> {
    pub fn contains(&self, element: &T) -> bool {
        self.map.contains_key(element)
    }

    pub fn equals(&self, other: &Self) -> bool {
        self.ptr_eq(other)
            || (self.len() == other.len() && self.iter().all(|element| other.contains(element)))
    }
}

impl<T: ValueHash + ValueEq + Clone> PersistentSet<T> {
    /// Returns a set with `element` added. Adding a present element returns
    /// a set that shares its root with `self`.
    pub fn insert(&self, element: T) -> Self {
        PersistentSet {
            map: self.map.insert(element, ()),
        }
    }

    pub fn remove(&self, element: &T) -> Self {
        PersistentSet {
            map: self.map.remove(element),
        }
    }
}

impl<T> Clone for PersistentSet<T> {
    fn clone(&self) -> Self {
        PersistentSet {
            map: self.map.clone(),
        }
    }
}

impl<T> Default for PersistentSet<T> {
    fn default() -> Self {
        PersistentSet::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for PersistentSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T: ValueHash + ValueEq> PartialEq for PersistentSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl<T: ValueHash + ValueEq> ValueEq for PersistentSet<T> {
    fn value_eq(&self, other: &Self) -> bool {
        self.equals(other)
    }

    fn identical(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T: ValueHash> ValueHash for PersistentSet<T> {
    fn value_hash(&self) -> i32 {
        hash_unordered(self.iter().map(ValueHash::value_hash))
    }
}

impl<T: ValueHash + ValueEq + Clone> FromIterator<T> for PersistentSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = PersistentSet::new();
        set.extend(iter);
        set
    }
}

impl<T: ValueHash + ValueEq + Clone> Extend<T> for PersistentSet<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for element in iter {
            *self = self.insert(element);
        }
    }
}

impl<'a, T> IntoIterator for &'a PersistentSet<T> {
    type Item = &'a T;
    type IntoIter = SetIter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the elements of a [`PersistentSet`].
#[derive(Clone)]
pub struct SetIter<'a, T>(Keys<'a, T, ()>);

impl<'a, T> Iterator for SetIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        self.0.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

impl<T> ExactSizeIterator for SetIter<'_, T> {}

impl<T> FusedIterator for SetIter<'_, T> {}
