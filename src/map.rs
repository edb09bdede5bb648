//! Persistent map facade over the trie.

use std::fmt;
use std::iter::FusedIterator;
use std::sync::Arc;

use log::trace;

use crate::hash::{hash_pairs, ValueEq, ValueHash};
use crate::node::{self, Iter, Node};

/// An immutable hash map.
///
/// Every update returns a new map that shares all untouched structure with
/// the map it was derived from. Existing maps are never modified, so a map
/// can be read from any number of threads while others derive new versions.
///
/// Keys are hashed with [`ValueHash`] and compared with [`ValueEq`]; values
/// only need [`ValueEq`] so that rebinding a key to an
/// [`identical`](ValueEq::identical) value can be recognised as a no-op.
pub struct PersistentMap<K, V> {
    pub(crate) root: Option<Arc<Node<K, V>>>,
    pub(crate) size: usize,
}

impl<K, V> PersistentMap<K, V> {
    /// The empty map.
    pub fn new() -> Self {
        PersistentMap {
            root: None,
            size: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// `true` when both maps share the same root, which implies equality.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.root, &other.root) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Iterates over the pairs in trie order. The order is deterministic for
    /// a given map but unrelated to insertion order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter::new(self.root.as_deref(), self.size)
    }

    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys(self.iter())
    }

    pub fn values(&self) -> Values<'_, K, V> {
        Values(self.iter())
    }

    /// Calls `f` once per pair, in [`iter`](Self::iter) order.
    pub fn for_each<F: FnMut(&K, &V)>(&self, mut f: F) {
        if let Some(root) = &self.root {
            node::for_each(root, &mut f);
        }
    }
}

impl<K: ValueHash + ValueEq, V> PersistentMap<K, V> {
    pub fn get(&self, key: &K) -> Option<&V> {
        self.get_key_value(key).map(|(_, value)| value)
    }

    /// Returns the stored key along with its value.
    pub fn get_key_value(&self, key: &K) -> Option<(&K, &V)> {
        let root = self.root.as_deref()?;
        node::find(root, 0, key.value_hash(), key)
    }

    /// Returns the value bound to `key`, or `not_found`.
    pub fn get_or<'a>(&'a self, key: &K, not_found: &'a V) -> &'a V {
        self.get(key).unwrap_or(not_found)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get_key_value(key).is_some()
    }
}

impl<K, V> PersistentMap<K, V>
where
    K: ValueHash + ValueEq + Clone,
    V: ValueEq + Clone,
{
    /// Returns a map with `key` bound to `value`.
    ///
    /// If `key` is already bound to an identical value the result shares its
    /// root with `self`.
    pub fn insert(&self, key: K, value: V) -> Self {
        let hash = key.value_hash();
        let mut added_leaf = false;

        let seed;
        let root = match &self.root {
            Some(root) => root,
            None => {
                seed = Arc::new(Node::empty());
                &seed
            }
        };

        let new_root = node::assoc(root, 0, hash, key, value, &mut added_leaf);
        if self
            .root
            .as_ref()
            .is_some_and(|old| Arc::ptr_eq(old, &new_root))
        {
            trace!("insert of identical binding, hash {hash:#010x}");
            return self.clone();
        }

        PersistentMap {
            root: Some(new_root),
            size: if added_leaf { self.size + 1 } else { self.size },
        }
    }

    /// Returns a map without `key`. Removing an absent key returns a map
    /// that shares its root with `self`.
    pub fn remove(&self, key: &K) -> Self {
        let Some(root) = &self.root else {
            return self.clone();
        };

        match node::without(root, 0, key.value_hash(), key) {
            Some(new_root) if Arc::ptr_eq(&new_root, root) => self.clone(),
            Some(new_root) => PersistentMap {
                root: Some(new_root),
                size: self.size - 1,
            },
            None => PersistentMap::new(),
        }
    }

    /// Builds a map from pairs; later duplicates win.
    pub fn from_pairs<I: IntoIterator<Item = (K, V)>>(pairs: I) -> Self {
        pairs
            .into_iter()
            .fold(PersistentMap::new(), |map, (key, value)| {
                map.insert(key, value)
            })
    }

    /// Snapshot of all pairs in [`iter`](Self::iter) order.
    pub fn entries(&self) -> Vec<(K, V)> {
        self.iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

impl<K: ValueHash + ValueEq, V: ValueEq> PersistentMap<K, V> {
    /// Same size, and every key of `self` is bound in `other` to an equal
    /// value.
    pub fn equals(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        self.size == other.size
            && self
                .iter()
                .all(|(key, value)| other.get(key).is_some_and(|found| value.value_eq(found)))
    }
}

impl<K: ValueHash, V: ValueHash> PersistentMap<K, V> {
    /// Order-independent content hash. Maps that are
    /// [`equals`](Self::equals) hash alike.
    pub fn hash_code(&self) -> i32 {
        hash_pairs(
            self.iter()
                .map(|(key, value)| (key.value_hash(), value.value_hash())),
        )
    }
}

// =============================================================================
// Trait implementations
// =============================================================================

impl<K, V> Clone for PersistentMap<K, V> {
    fn clone(&self) -> Self {
        PersistentMap {
            root: self.root.clone(),
            size: self.size,
        }
    }
}

impl<K, V> Default for PersistentMap<K, V> {
    fn default() -> Self {
        PersistentMap::new()
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for PersistentMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: ValueHash + ValueEq, V: ValueEq> PartialEq for PersistentMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl<K: ValueHash + ValueEq, V: ValueEq> ValueEq for PersistentMap<K, V> {
    fn value_eq(&self, other: &Self) -> bool {
        self.equals(other)
    }

    fn identical(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<K: ValueHash, V: ValueHash> ValueHash for PersistentMap<K, V> {
    fn value_hash(&self) -> i32 {
        self.hash_code()
    }
}

impl<K, V> FromIterator<(K, V)> for PersistentMap<K, V>
where
    K: ValueHash + ValueEq + Clone,
    V: ValueEq + Clone,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        PersistentMap::from_pairs(iter)
    }
}

impl<K, V> Extend<(K, V)> for PersistentMap<K, V>
where
    K: ValueHash + ValueEq + Clone,
    V: ValueEq + Clone,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            *self = self.insert(key, value);
        }
    }
}

impl<'a, K, V> IntoIterator for &'a PersistentMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the keys of a [`PersistentMap`].
#[derive(Clone)]
pub struct Keys<'a, K, V>(Iter<'a, K, V>);

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<&'a K> {
        self.0.next().map(|(key, _)| key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Keys<'_, K, V> {}

impl<K, V> FusedIterator for Keys<'_, K, V> {}

/// Iterator over the values of a [`PersistentMap`].
#[derive(Clone)]
pub struct Values<'a, K, V>(Iter<'a, K, V>);

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<&'a V> {
        self.0.next().map(|(_, value)| value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Values<'_, K, V> {}

impl<K, V> FusedIterator for Values<'_, K, V> {}
