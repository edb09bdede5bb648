//! Trie nodes and the pure functions that edit them.
//!
//! Nodes are immutable once built. Every edit copies the path from the root to
//! the touched slot and shares all other subtrees by reference, so older roots
//! stay valid. An edit that changes nothing hands back the very same `Arc`,
//! which is how callers detect no-ops.
//!
//! The hash is consumed five bits per level, least significant first:
//!
//! - `Index`: up to 16 children packed behind a 32-bit occupancy bitmap
//! - `Array`: 32 direct slots, used once a level holds more than 16 children
//! - `Collision`: keys whose full 32-bit hashes are identical
//! - `Entry`: a single key/value pair

use std::iter::FusedIterator;
use std::sync::Arc;

use log::trace;

use crate::hash::ValueEq;

// =============================================================================
// Configuration
// =============================================================================

/// Bits of hash consumed per level.
pub(crate) const SHIFT: u32 = 5;
/// Fan-out of a level.
pub(crate) const BUCKET_SIZE: usize = 1 << SHIFT;
const MASK: u32 = (BUCKET_SIZE - 1) as u32;
/// An index node with this many children is promoted on the next new slot.
pub(crate) const MAX_INDEX_NODE: usize = BUCKET_SIZE / 2;
/// An array node left with this many children (or fewer) is demoted.
pub(crate) const MIN_ARRAY_NODE: usize = BUCKET_SIZE / 4;

// =============================================================================
// Bit utilities
// =============================================================================

/// Slot of `hash` at the level addressed by `shift`.
#[inline]
pub(crate) fn mask(hash: i32, shift: u32) -> usize {
    ((hash as u32 >> shift) & MASK) as usize
}

#[inline]
fn bitpos(hash: i32, shift: u32) -> u32 {
    1 << mask(hash, shift)
}

/// Position of `bit` inside the packed child array of `bitmap`.
#[inline]
fn index(bitmap: u32, bit: u32) -> usize {
    (bitmap & (bit - 1)).count_ones() as usize
}

fn clone_and_set<T: Clone>(items: &[T], at: usize, item: T) -> Vec<T> {
    let mut out = items.to_vec();
    out[at] = item;
    out
}

fn splice_in<T: Clone>(items: &[T], at: usize, item: T) -> Vec<T> {
    let mut out = Vec::with_capacity(items.len() + 1);
    out.extend_from_slice(&items[..at]);
    out.push(item);
    out.extend_from_slice(&items[at..]);
    out
}

fn splice_out<T: Clone>(items: &[T], at: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(items.len() - 1);
    out.extend_from_slice(&items[..at]);
    out.extend_from_slice(&items[at + 1..]);
    out
}

// =============================================================================
// Node
// =============================================================================

pub(crate) type Slots<K, V> = Box<[Option<Arc<Node<K, V>>>; BUCKET_SIZE]>;

pub(crate) enum Node<K, V> {
    /// A single pair. The full hash is cached so splits never rehash the key.
    Entry { hash: i32, key: K, value: V },
    /// Bitmap-indexed level. `children.len() == bitmap.count_ones()`.
    Index {
        bitmap: u32,
        children: Vec<Arc<Node<K, V>>>,
    },
    /// Direct-indexed level with `count` occupied slots.
    Array { count: usize, children: Slots<K, V> },
    /// Two or more pairwise unequal keys sharing one full hash.
    Collision { hash: i32, entries: Vec<(K, V)> },
}

impl<K, V> Node<K, V> {
    /// The empty index node every root grows from.
    pub(crate) fn empty() -> Self {
        Node::Index {
            bitmap: 0,
            children: Vec::new(),
        }
    }
}

fn empty_slots<K, V>() -> Slots<K, V> {
    Box::new(std::array::from_fn(|_| None))
}

// =============================================================================
// Insert
// =============================================================================

/// Returns `node` with `key` bound to `value`.
///
/// Sets `added_leaf` when a new key was added (as opposed to an existing
/// key being rebound). Returns a clone of `node` itself when the key is
/// already bound to an identical value.
pub(crate) fn assoc<K, V>(
    node: &Arc<Node<K, V>>,
    shift: u32,
    hash: i32,
    key: K,
    value: V,
    added_leaf: &mut bool,
) -> Arc<Node<K, V>>
where
    K: ValueEq + Clone,
    V: ValueEq + Clone,
{
    match &**node {
        Node::Entry {
            hash: entry_hash,
            key: entry_key,
            value: entry_value,
        } => {
            if *entry_hash == hash && key.value_eq(entry_key) {
                if value.identical(entry_value) {
                    return Arc::clone(node);
                }
                return Arc::new(Node::Entry { hash, key, value });
            }
            *added_leaf = true;
            create_node(
                shift,
                *entry_hash,
                entry_key.clone(),
                entry_value.clone(),
                hash,
                key,
                value,
            )
        }
        Node::Index { bitmap, children } => {
            assoc_index(node, *bitmap, children, shift, hash, key, value, added_leaf)
        }
        Node::Array { count, children } => {
            assoc_array(node, *count, children, shift, hash, key, value, added_leaf)
        }
        Node::Collision {
            hash: bucket_hash,
            entries,
        } => assoc_collision(
            node,
            *bucket_hash,
            entries,
            shift,
            hash,
            key,
            value,
            added_leaf,
        ),
    }
}

/// Builds the smallest subtree at `shift` holding both pairs.
fn create_node<K, V>(
    shift: u32,
    hash1: i32,
    key1: K,
    value1: V,
    hash2: i32,
    key2: K,
    value2: V,
) -> Arc<Node<K, V>> {
    if hash1 == hash2 {
        return Arc::new(Node::Collision {
            hash: hash1,
            entries: vec![(key1, value1), (key2, value2)],
        });
    }

    let slot1 = mask(hash1, shift);
    let slot2 = mask(hash2, shift);
    let bitmap = (1u32 << slot1) | (1u32 << slot2);

    let children = if slot1 == slot2 {
        // The hashes differ, so some later slice tells them apart.
        vec![create_node(
            shift + SHIFT,
            hash1,
            key1,
            value1,
            hash2,
            key2,
            value2,
        )]
    } else {
        let first = Arc::new(Node::Entry {
            hash: hash1,
            key: key1,
            value: value1,
        });
        let second = Arc::new(Node::Entry {
            hash: hash2,
            key: key2,
            value: value2,
        });
        if slot1 < slot2 {
            vec![first, second]
        } else {
            vec![second, first]
        }
    };

    Arc::new(Node::Index { bitmap, children })
}

#[allow(clippy::too_many_arguments)]
fn assoc_index<K, V>(
    node: &Arc<Node<K, V>>,
    bitmap: u32,
    children: &[Arc<Node<K, V>>],
    shift: u32,
    hash: i32,
    key: K,
    value: V,
    added_leaf: &mut bool,
) -> Arc<Node<K, V>>
where
    K: ValueEq + Clone,
    V: ValueEq + Clone,
{
    let bit = bitpos(hash, shift);
    let idx = index(bitmap, bit);

    if bitmap & bit != 0 {
        let child = &children[idx];
        let updated = assoc(child, shift + SHIFT, hash, key, value, added_leaf);
        if Arc::ptr_eq(&updated, child) {
            return Arc::clone(node);
        }
        return Arc::new(Node::Index {
            bitmap,
            children: clone_and_set(children, idx, updated),
        });
    }

    *added_leaf = true;
    let leaf = Arc::new(Node::Entry { hash, key, value });

    if children.len() >= MAX_INDEX_NODE {
        let mut slots = empty_slots();
        let mut packed = children.iter();
        for (i, slot) in slots.iter_mut().enumerate() {
            if bitmap & (1u32 << i) != 0 {
                *slot = packed.next().cloned();
            }
        }
        slots[mask(hash, shift)] = Some(leaf);
        trace!(
            "promoted index node to array node ({} children, shift {})",
            children.len() + 1,
            shift
        );
        return Arc::new(Node::Array {
            count: children.len() + 1,
            children: slots,
        });
    }

    Arc::new(Node::Index {
        bitmap: bitmap | bit,
        children: splice_in(children, idx, leaf),
    })
}

#[allow(clippy::too_many_arguments)]
fn assoc_array<K, V>(
    node: &Arc<Node<K, V>>,
    count: usize,
    children: &Slots<K, V>,
    shift: u32,
    hash: i32,
    key: K,
    value: V,
    added_leaf: &mut bool,
) -> Arc<Node<K, V>>
where
    K: ValueEq + Clone,
    V: ValueEq + Clone,
{
    let idx = mask(hash, shift);

    match &children[idx] {
        None => {
            *added_leaf = true;
            let mut slots = children.clone();
            slots[idx] = Some(Arc::new(Node::Entry { hash, key, value }));
            Arc::new(Node::Array {
                count: count + 1,
                children: slots,
            })
        }
        Some(child) => {
            let updated = assoc(child, shift + SHIFT, hash, key, value, added_leaf);
            if Arc::ptr_eq(&updated, child) {
                return Arc::clone(node);
            }
            let mut slots = children.clone();
            slots[idx] = Some(updated);
            Arc::new(Node::Array {
                count,
                children: slots,
            })
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn assoc_collision<K, V>(
    node: &Arc<Node<K, V>>,
    bucket_hash: i32,
    entries: &[(K, V)],
    shift: u32,
    hash: i32,
    key: K,
    value: V,
    added_leaf: &mut bool,
) -> Arc<Node<K, V>>
where
    K: ValueEq + Clone,
    V: ValueEq + Clone,
{
    if hash != bucket_hash {
        // Push the bucket one level down behind an index node and retry there.
        let wrapped = Arc::new(Node::Index {
            bitmap: bitpos(bucket_hash, shift),
            children: vec![Arc::clone(node)],
        });
        return assoc(&wrapped, shift, hash, key, value, added_leaf);
    }

    match entries.iter().position(|(k, _)| key.value_eq(k)) {
        Some(idx) => {
            if value.identical(&entries[idx].1) {
                return Arc::clone(node);
            }
            Arc::new(Node::Collision {
                hash,
                entries: clone_and_set(entries, idx, (key, value)),
            })
        }
        None => {
            *added_leaf = true;
            let mut grown = Vec::with_capacity(entries.len() + 1);
            grown.extend_from_slice(entries);
            grown.push((key, value));
            Arc::new(Node::Collision {
                hash,
                entries: grown,
            })
        }
    }
}

// =============================================================================
// Lookup
// =============================================================================

pub(crate) fn find<'a, K, V>(
    node: &'a Node<K, V>,
    shift: u32,
    hash: i32,
    key: &K,
) -> Option<(&'a K, &'a V)>
where
    K: ValueEq,
{
    match node {
        Node::Entry {
            hash: entry_hash,
            key: entry_key,
            value,
        } => (*entry_hash == hash && key.value_eq(entry_key)).then_some((entry_key, value)),
        Node::Index { bitmap, children } => {
            let bit = bitpos(hash, shift);
            if bitmap & bit == 0 {
                return None;
            }
            find(&children[index(*bitmap, bit)], shift + SHIFT, hash, key)
        }
        Node::Array { children, .. } => children[mask(hash, shift)]
            .as_deref()
            .and_then(|child| find(child, shift + SHIFT, hash, key)),
        Node::Collision {
            hash: bucket_hash,
            entries,
        } => {
            if *bucket_hash != hash {
                return None;
            }
            entries
                .iter()
                .find(|(k, _)| key.value_eq(k))
                .map(|(k, v)| (k, v))
        }
    }
}

// =============================================================================
// Remove
// =============================================================================

/// Returns `node` without `key`.
///
/// `Some` holding a clone of `node` itself means the key was absent; `None`
/// means the node became empty and should be dropped by its parent.
pub(crate) fn without<K, V>(
    node: &Arc<Node<K, V>>,
    shift: u32,
    hash: i32,
    key: &K,
) -> Option<Arc<Node<K, V>>>
where
    K: ValueEq + Clone,
    V: Clone,
{
    match &**node {
        Node::Entry {
            hash: entry_hash,
            key: entry_key,
            ..
        } => {
            if *entry_hash == hash && key.value_eq(entry_key) {
                None
            } else {
                Some(Arc::clone(node))
            }
        }
        Node::Index { bitmap, children } => {
            without_index(node, *bitmap, children, shift, hash, key)
        }
        Node::Array { count, children } => without_array(node, *count, children, shift, hash, key),
        Node::Collision {
            hash: bucket_hash,
            entries,
        } => without_collision(node, *bucket_hash, entries, hash, key),
    }
}

fn without_index<K, V>(
    node: &Arc<Node<K, V>>,
    bitmap: u32,
    children: &[Arc<Node<K, V>>],
    shift: u32,
    hash: i32,
    key: &K,
) -> Option<Arc<Node<K, V>>>
where
    K: ValueEq + Clone,
    V: Clone,
{
    let bit = bitpos(hash, shift);
    if bitmap & bit == 0 {
        return Some(Arc::clone(node));
    }

    let idx = index(bitmap, bit);
    let child = &children[idx];
    match without(child, shift + SHIFT, hash, key) {
        Some(updated) if Arc::ptr_eq(&updated, child) => Some(Arc::clone(node)),
        Some(updated) => Some(Arc::new(Node::Index {
            bitmap,
            children: clone_and_set(children, idx, updated),
        })),
        None if bitmap == bit => None,
        None => Some(Arc::new(Node::Index {
            bitmap: bitmap ^ bit,
            children: splice_out(children, idx),
        })),
    }
}

fn without_array<K, V>(
    node: &Arc<Node<K, V>>,
    count: usize,
    children: &Slots<K, V>,
    shift: u32,
    hash: i32,
    key: &K,
) -> Option<Arc<Node<K, V>>>
where
    K: ValueEq + Clone,
    V: Clone,
{
    let idx = mask(hash, shift);
    let Some(child) = &children[idx] else {
        return Some(Arc::clone(node));
    };

    match without(child, shift + SHIFT, hash, key) {
        Some(updated) if Arc::ptr_eq(&updated, child) => Some(Arc::clone(node)),
        Some(updated) => {
            let mut slots = children.clone();
            slots[idx] = Some(updated);
            Some(Arc::new(Node::Array {
                count,
                children: slots,
            }))
        }
        None if count - 1 <= MIN_ARRAY_NODE => Some(demote(children, idx, shift)),
        None => {
            let mut slots = children.clone();
            slots[idx] = None;
            Some(Arc::new(Node::Array {
                count: count - 1,
                children: slots,
            }))
        }
    }
}

/// Packs the occupied slots of an array node, minus `removed`, into an
/// index node.
fn demote<K, V>(children: &Slots<K, V>, removed: usize, shift: u32) -> Arc<Node<K, V>> {
    let mut bitmap = 0u32;
    let mut packed = Vec::with_capacity(MIN_ARRAY_NODE);
    for (i, slot) in children.iter().enumerate() {
        if i == removed {
            continue;
        }
        if let Some(child) = slot {
            bitmap |= 1u32 << i;
            packed.push(Arc::clone(child));
        }
    }
    trace!(
        "demoted array node to index node ({} children, shift {})",
        packed.len(),
        shift
    );
    Arc::new(Node::Index {
        bitmap,
        children: packed,
    })
}

fn without_collision<K, V>(
    node: &Arc<Node<K, V>>,
    bucket_hash: i32,
    entries: &[(K, V)],
    hash: i32,
    key: &K,
) -> Option<Arc<Node<K, V>>>
where
    K: ValueEq + Clone,
    V: Clone,
{
    if bucket_hash != hash {
        return Some(Arc::clone(node));
    }
    let Some(idx) = entries.iter().position(|(k, _)| key.value_eq(k)) else {
        return Some(Arc::clone(node));
    };

    match entries.len() {
        1 => None,
        2 => {
            // A bucket never holds a single pair.
            let (key, value) = entries[1 - idx].clone();
            trace!("collapsed collision bucket into a single entry");
            Some(Arc::new(Node::Entry {
                hash: bucket_hash,
                key,
                value,
            }))
        }
        _ => Some(Arc::new(Node::Collision {
            hash: bucket_hash,
            entries: splice_out(entries, idx),
        })),
    }
}

// =============================================================================
// Traversal
// =============================================================================

/// Visits every pair below `node`, depth first in slot order.
pub(crate) fn for_each<K, V, F>(node: &Node<K, V>, f: &mut F)
where
    F: FnMut(&K, &V),
{
    match node {
        Node::Entry { key, value, .. } => f(key, value),
        Node::Index { children, .. } => {
            for child in children {
                for_each(child, f);
            }
        }
        Node::Array { children, .. } => {
            for child in children.iter().flatten() {
                for_each(child, f);
            }
        }
        Node::Collision { entries, .. } => {
            for (key, value) in entries {
                f(key, value);
            }
        }
    }
}

/// Iterator over the pairs of a trie, in the same order as [`for_each`].
pub struct Iter<'a, K, V> {
    stack: Vec<&'a Node<K, V>>,
    bucket: std::slice::Iter<'a, (K, V)>,
    remaining: usize,
}

impl<'a, K, V> Iter<'a, K, V> {
    pub(crate) fn new(root: Option<&'a Node<K, V>>, len: usize) -> Self {
        Iter {
            stack: root.into_iter().collect(),
            bucket: Default::default(),
            remaining: len,
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((key, value)) = self.bucket.next() {
                self.remaining -= 1;
                return Some((key, value));
            }

            match self.stack.pop()? {
                Node::Entry { key, value, .. } => {
                    self.remaining -= 1;
                    return Some((key, value));
                }
                Node::Index { children, .. } => {
                    self.stack
                        .extend(children.iter().rev().map(|child| &**child));
                }
                Node::Array { children, .. } => {
                    self.stack
                        .extend(children.iter().rev().flatten().map(|child| &**child));
                }
                Node::Collision { entries, .. } => {
                    self.bucket = entries.iter();
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<K, V> FusedIterator for Iter<'_, K, V> {}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Iter {
            stack: self.stack.clone(),
            bucket: self.bucket.clone(),
            remaining: self.remaining,
        }
    }
}
