//! Content hashing for runtime values.
//!
//! Every value reduces to a 32-bit signed hash. Values with structural identity
//! hash by content; identity-only handles hash through a process-wide token
//! table (see [`hash_by_reference`]).

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use log::debug;
use parking_lot::Mutex;

// =============================================================================
// Configuration
// =============================================================================

/// Hash of the `null` absence marker.
pub const NIL_HASH: i32 = 1108378658;
/// Hash of the `undefined` absence marker (and of `()`).
pub const UNDEFINED_HASH: i32 = 1108378659;
pub const TRUE_HASH: i32 = 1108378657;
pub const FALSE_HASH: i32 = 1108378656;

/// Multiplier used to spread the high word of a number's bit pattern.
const NUMBER_MIX: i32 = 0x45D9F3B;
/// Golden-ratio constant used by [`hash_merge`].
const MERGE_CONSTANT: u32 = 0x9E37_79B9;

/// Smallest table size at which dead references get pruned.
const MIN_PRUNE_AT: usize = 64;

// =============================================================================
// Capabilities
// =============================================================================

/// Content hash of a value.
///
/// Values that compare equal under [`ValueEq::value_eq`] must hash alike.
pub trait ValueHash {
    fn value_hash(&self) -> i32;
}

/// Structural equality used for key lookup and map comparison.
pub trait ValueEq {
    fn value_eq(&self, other: &Self) -> bool;

    /// Reference identity: `true` when both sides are the same value instance,
    /// or equal primitives (scalars, text). Must imply
    /// [`value_eq`](Self::value_eq).
    ///
    /// Used to detect no-op writes.
    fn identical(&self, other: &Self) -> bool {
        let _ = other;
        false
    }
}

// =============================================================================
// Primitive hash functions
// =============================================================================

/// Mixes two hashes asymmetrically, so `(a, b)` and `(b, a)` rarely agree.
#[inline]
pub fn hash_merge(a: i32, b: i32) -> i32 {
    a ^ b
        .wrapping_add(MERGE_CONSTANT as i32)
        .wrapping_add(a << 6)
        .wrapping_add(a >> 2)
}

/// Hashes the binary64 representation of `n`.
#[inline]
pub fn hash_number(n: f64) -> i32 {
    // 0.0 == -0.0, so both must land on the same bits.
    let n = if n == 0.0 { 0.0 } else { n };
    let bits = n.to_bits();
    let hi = (bits >> 32) as u32 as i32;
    let lo = bits as u32 as i32;
    NUMBER_MIX.wrapping_mul((hi >> 16) ^ hi) ^ lo
}

/// Polynomial hash over UTF-16 code units.
#[inline]
pub fn hash_string(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32))
}

/// Order-sensitive fold used for sequences and byte buffers.
pub fn hash_ordered<I: IntoIterator<Item = i32>>(hashes: I) -> i32 {
    hashes
        .into_iter()
        .fold(0i32, |h, x| h.wrapping_mul(31).wrapping_add(x))
}

/// Order-insensitive fold used for sets.
pub fn hash_unordered<I: IntoIterator<Item = i32>>(hashes: I) -> i32 {
    hashes.into_iter().fold(0i32, |h, x| h.wrapping_add(x))
}

/// Order-insensitive fold over `(key hash, value hash)` pairs, used for maps
/// and record fields.
pub fn hash_pairs<I: IntoIterator<Item = (i32, i32)>>(pairs: I) -> i32 {
    pairs.into_iter().fold(0i32, |h, (key, value)| {
        h.wrapping_add(hash_merge(value, key))
    })
}

// =============================================================================
// Identity tokens
// =============================================================================

struct ReferenceTable {
    next: i32,
    prune_at: usize,
    /// Allocation address -> (weak handle, token).
    entries: HashMap<usize, (Weak<dyn Any + Send + Sync>, i32)>,
}

impl ReferenceTable {
    fn new() -> Self {
        Self {
            next: 0,
            prune_at: MIN_PRUNE_AT,
            entries: HashMap::new(),
        }
    }

    fn token(&mut self, handle: &Arc<dyn Any + Send + Sync>) -> i32 {
        let addr = Arc::as_ptr(handle) as *const () as usize;
        if let Some((weak, token)) = self.entries.get(&addr) {
            // A live handle at this address can only be this allocation.
            if weak.strong_count() > 0 {
                return *token;
            }
        }

        if self.entries.len() >= self.prune_at {
            self.prune();
        }

        let token = self.allocate();
        self.entries.insert(addr, (Arc::downgrade(handle), token));
        token
    }

    fn allocate(&mut self) -> i32 {
        let token = self.next;
        self.next += 1;
        if self.next == i32::MAX {
            debug!("reference token counter wrapped around");
            self.next = 0;
        }
        token
    }

    fn prune(&mut self) {
        let before = self.entries.len();
        self.entries.retain(|_, (weak, _)| weak.strong_count() > 0);
        let live = self.entries.len();
        self.prune_at = (live * 2).max(MIN_PRUNE_AT);
        debug!(
            "pruned {} dead references from token table ({} live)",
            before - live,
            live
        );
    }
}

fn references() -> &'static Mutex<ReferenceTable> {
    static REFERENCES: OnceLock<Mutex<ReferenceTable>> = OnceLock::new();
    REFERENCES.get_or_init(|| Mutex::new(ReferenceTable::new()))
}

/// Returns the identity token of `handle`, assigning one on first use.
///
/// The token is stable for as long as the allocation lives. The table holds
/// only weak references and never keeps a handle alive. Tokens are not
/// reproducible across processes.
pub fn hash_by_reference(handle: &Arc<dyn Any + Send + Sync>) -> i32 {
    references().lock().token(handle)
}

// =============================================================================
// Implementations for std types
// =============================================================================

impl ValueHash for bool {
    fn value_hash(&self) -> i32 {
        if *self {
            TRUE_HASH
        } else {
            FALSE_HASH
        }
    }
}

impl ValueEq for bool {
    fn value_eq(&self, other: &Self) -> bool {
        self == other
    }

    fn identical(&self, other: &Self) -> bool {
        self == other
    }
}

impl ValueHash for () {
    fn value_hash(&self) -> i32 {
        UNDEFINED_HASH
    }
}

impl ValueEq for () {
    fn value_eq(&self, _: &Self) -> bool {
        true
    }

    fn identical(&self, _: &Self) -> bool {
        true
    }
}

macro_rules! impl_numeric {
    ($($t:ty),*) => {
        $(
            impl ValueHash for $t {
                #[inline]
                fn value_hash(&self) -> i32 {
                    hash_number(*self as f64)
                }
            }

            impl ValueEq for $t {
                #[inline]
                fn value_eq(&self, other: &Self) -> bool {
                    self == other
                }

                #[inline]
                fn identical(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

impl_numeric!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl ValueHash for char {
    fn value_hash(&self) -> i32 {
        let mut buf = [0u8; 4];
        hash_string(self.encode_utf8(&mut buf))
    }
}

impl ValueEq for char {
    fn value_eq(&self, other: &Self) -> bool {
        self == other
    }

    fn identical(&self, other: &Self) -> bool {
        self == other
    }
}

impl ValueHash for str {
    fn value_hash(&self) -> i32 {
        hash_string(self)
    }
}

impl ValueEq for str {
    fn value_eq(&self, other: &Self) -> bool {
        self == other
    }

    fn identical(&self, other: &Self) -> bool {
        self == other
    }
}

impl ValueHash for String {
    fn value_hash(&self) -> i32 {
        hash_string(self)
    }
}

impl ValueEq for String {
    fn value_eq(&self, other: &Self) -> bool {
        self == other
    }

    fn identical(&self, other: &Self) -> bool {
        self == other
    }
}

impl<T: ValueHash> ValueHash for [T] {
    fn value_hash(&self) -> i32 {
        hash_ordered(self.iter().map(ValueHash::value_hash))
    }
}

impl<T: ValueEq> ValueEq for [T] {
    fn value_eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.value_eq(b))
    }
}

impl<T: ValueHash> ValueHash for Vec<T> {
    fn value_hash(&self) -> i32 {
        self.as_slice().value_hash()
    }
}

impl<T: ValueEq> ValueEq for Vec<T> {
    fn value_eq(&self, other: &Self) -> bool {
        self.as_slice().value_eq(other.as_slice())
    }
}

impl<T: ValueHash> ValueHash for Option<T> {
    fn value_hash(&self) -> i32 {
        match self {
            Some(value) => value.value_hash(),
            None => NIL_HASH,
        }
    }
}

impl<T: ValueEq> ValueEq for Option<T> {
    fn value_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.value_eq(b),
            (None, None) => true,
            _ => false,
        }
    }

    fn identical(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.identical(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: ValueHash + ?Sized> ValueHash for Arc<T> {
    fn value_hash(&self) -> i32 {
        T::value_hash(self)
    }
}

impl<T: ValueEq + ?Sized> ValueEq for Arc<T> {
    fn value_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other) || T::value_eq(self, other)
    }

    fn identical(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl<T: ValueHash + ?Sized> ValueHash for &T {
    fn value_hash(&self) -> i32 {
        T::value_hash(self)
    }
}

impl<T: ValueEq + ?Sized> ValueEq for &T {
    fn value_eq(&self, other: &Self) -> bool {
        T::value_eq(self, other)
    }

    fn identical(&self, other: &Self) -> bool {
        T::identical(self, other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_distinct() {
        let sentinels = [NIL_HASH, UNDEFINED_HASH, TRUE_HASH, FALSE_HASH];
        for (i, a) in sentinels.iter().enumerate() {
            for b in &sentinels[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(true.value_hash(), TRUE_HASH);
        assert_eq!(false.value_hash(), FALSE_HASH);
        assert_eq!(().value_hash(), UNDEFINED_HASH);
        assert_eq!(None::<i64>.value_hash(), NIL_HASH);
    }

    #[test]
    fn test_string_hash_matches_polynomial() {
        assert_eq!(hash_string(""), 0);
        assert_eq!(hash_string("a"), 97);
        assert_eq!(hash_string("ab"), 97 * 31 + 98);
        // Classic colliding pair for the *31 polynomial.
        assert_eq!(hash_string("Aa"), hash_string("BB"));
    }

    #[test]
    fn test_string_hash_uses_utf16_units() {
        // U+1F600 is a surrogate pair in UTF-16.
        let expected = 0xD83Di32.wrapping_mul(31).wrapping_add(0xDE00);
        assert_eq!(hash_string("\u{1F600}"), expected);
    }

    #[test]
    fn test_string_hash_wraps() {
        let long = "z".repeat(1000);
        // Must not panic on overflow in debug builds.
        let _ = hash_string(&long);
    }

    #[test]
    fn test_number_hash() {
        assert_eq!(hash_number(0.0), 0);
        assert_eq!(hash_number(-0.0), hash_number(0.0));
        assert_eq!(1i64.value_hash(), hash_number(1.0));
        assert_eq!(1u8.value_hash(), 1.0f64.value_hash());
        assert_ne!(hash_number(1.0), hash_number(2.0));
        assert_ne!(hash_number(1.0), hash_number(-1.0));

        // 1.0 is 0x3FF00000_00000000.
        let hi = 0x3FF0_0000i32;
        assert_eq!(hash_number(1.0), NUMBER_MIX.wrapping_mul((hi >> 16) ^ hi));
    }

    #[test]
    fn test_small_integers_spread() {
        let mut seen = std::collections::HashSet::new();
        for i in 0..1000i64 {
            seen.insert(i.value_hash() & 31);
        }
        // Low five bits of small integers should cover most slots.
        assert!(seen.len() > 16, "only {} distinct slots", seen.len());
    }

    #[test]
    fn test_merge_is_asymmetric() {
        assert_ne!(hash_merge(1, 2), hash_merge(2, 1));
        assert_ne!(hash_merge(5, 7), 5i32.wrapping_add(7));
    }

    #[test]
    fn test_folds() {
        let forward = hash_ordered([1, 2, 3]);
        let backward = hash_ordered([3, 2, 1]);
        assert_ne!(forward, backward);
        assert_eq!(forward, (31 + 2) * 31 + 3);

        assert_eq!(hash_unordered([1, 2, 3]), hash_unordered([3, 1, 2]));
        assert_eq!(
            hash_pairs([(1, 10), (2, 20)]),
            hash_pairs([(2, 20), (1, 10)])
        );
        assert_ne!(hash_pairs([(1, 10)]), hash_pairs([(10, 1)]));
    }

    #[test]
    fn test_sequence_hash() {
        assert_eq!(
            vec![1i64, 2].value_hash(),
            hash_ordered([hash_number(1.0), hash_number(2.0)])
        );
        assert_ne!(vec![1i64, 2].value_hash(), vec![2i64, 1].value_hash());
        assert_eq!(Vec::<i64>::new().value_hash(), 0);
    }

    #[test]
    fn test_reference_tokens_stable_and_distinct() {
        let a: Arc<dyn Any + Send + Sync> = Arc::new(1u32);
        let b: Arc<dyn Any + Send + Sync> = Arc::new(1u32);

        let ta = hash_by_reference(&a);
        assert_eq!(hash_by_reference(&a), ta);
        assert_eq!(hash_by_reference(&Arc::clone(&a)), ta);
        assert_ne!(hash_by_reference(&b), ta);
    }

    #[test]
    fn test_reference_tokens_distinct_across_threads() {
        let handles: Vec<Arc<dyn Any + Send + Sync>> = (0..400u32)
            .map(|i| Arc::new(i) as Arc<dyn Any + Send + Sync>)
            .collect();

        let tokens: Vec<i32> = std::thread::scope(|scope| {
            let workers: Vec<_> = handles
                .chunks(50)
                .map(|chunk| {
                    scope.spawn(move || chunk.iter().map(hash_by_reference).collect::<Vec<_>>())
                })
                .collect();
            workers
                .into_iter()
                .flat_map(|worker| worker.join().unwrap())
                .collect()
        });

        let distinct: std::collections::HashSet<i32> = tokens.iter().copied().collect();
        assert_eq!(distinct.len(), handles.len());
        for (handle, token) in handles.iter().zip(&tokens) {
            assert_eq!(hash_by_reference(handle), *token);
        }
    }

    #[test]
    fn test_reference_table_does_not_retain() {
        let a: Arc<dyn Any + Send + Sync> = Arc::new(String::from("handle"));
        let weak = Arc::downgrade(&a);
        hash_by_reference(&a);
        drop(a);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_reference_counter_skips_max() {
        let mut table = ReferenceTable::new();
        table.next = i32::MAX - 2;
        assert_eq!(table.allocate(), i32::MAX - 2);
        assert_eq!(table.allocate(), i32::MAX - 1);
        assert_eq!(table.allocate(), 0);
        assert_eq!(table.allocate(), 1);
    }

    #[test]
    fn test_reference_table_prunes_dead_entries() {
        let mut table = ReferenceTable::new();
        let handles: Vec<Arc<dyn Any + Send + Sync>> = (0..MIN_PRUNE_AT)
            .map(|i| Arc::new(i) as Arc<dyn Any + Send + Sync>)
            .collect();
        for handle in &handles {
            table.token(handle);
        }
        assert_eq!(table.entries.len(), MIN_PRUNE_AT);
        drop(handles);

        let keep: Arc<dyn Any + Send + Sync> = Arc::new(0u64);
        let token = table.token(&keep);
        assert_eq!(table.entries.len(), 1);
        assert_eq!(table.token(&keep), token);
    }
}
