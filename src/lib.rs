//! # hamt-dict
//!
//! A persistent hash map built on a Hash Array Mapped Trie (HAMT), keyed by
//! dynamic runtime values.
//!
//! Every update returns a new map; existing maps never change and share all
//! untouched structure with their successors. Keys are hashed by content, so
//! two lists, records or nested maps with equal contents find the same entry.
//!
//! ## Example
//!
//! ```rust
//! use hamt_dict::{PersistentMap, Value};
//!
//! let empty: PersistentMap<Value, Value> = PersistentMap::new();
//! let m1 = empty.insert(Value::from("a"), Value::Int(1));
//! let m2 = m1.insert(Value::from("b"), Value::Int(2));
//!
//! assert_eq!(m2.get_or(&Value::from("a"), &Value::Int(-1)), &Value::Int(1));
//! assert_eq!(m2.get_or(&Value::from("c"), &Value::Int(-1)), &Value::Int(-1));
//! assert_eq!(m2.len(), 2);
//!
//! // Older versions are untouched.
//! assert_eq!(m1.len(), 1);
//!
//! // Structurally equal keys find the same entry.
//! let point = |x, y| Value::list([Value::Int(x), Value::Int(y)]);
//! let grid = PersistentMap::new().insert(point(1, 2), Value::from("here"));
//! assert_eq!(grid.get(&point(1, 2)), Some(&Value::from("here")));
//! ```

#![forbid(unsafe_code)]

mod error;
mod hash;
mod map;
mod node;
mod set;
mod value;

pub use error::HookError;
pub use hash::{
    hash_by_reference, hash_merge, hash_number, hash_ordered, hash_pairs, hash_string,
    hash_unordered, ValueEq, ValueHash, FALSE_HASH, NIL_HASH, TRUE_HASH, UNDEFINED_HASH,
};
pub use map::{Keys, PersistentMap, Values};
pub use node::Iter;
pub use set::{PersistentSet, SetIter};
pub use value::{CustomValue, Opaque, Record, Value};

#[cfg(test)]
mod proptests;
