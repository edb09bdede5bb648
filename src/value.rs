//! Dynamic runtime values.
//!
//! [`Value`] is the value model the map is keyed and filled with: scalars,
//! text, instants, buffers, sequences, nested maps and sets, records, values
//! with user-supplied hash/equality hooks and identity-only handles.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use log::warn;
use num_bigint::BigInt;

use crate::error::HookError;
use crate::hash::{
    hash_by_reference, hash_number, hash_ordered, hash_pairs, hash_string, ValueEq, ValueHash,
    NIL_HASH, UNDEFINED_HASH,
};
use crate::map::PersistentMap;
use crate::set::PersistentSet;

/// A runtime value.
///
/// Composite variants are reference counted, so cloning is cheap and two
/// clones are [`identical`](ValueEq::identical).
#[derive(Clone, Debug)]
pub enum Value {
    /// The `null` absence marker.
    Nil,
    /// The `undefined` absence marker. Never equal to [`Value::Nil`].
    Undefined,
    Bool(bool),
    Int(i64),
    Float(f64),
    BigInt(Arc<BigInt>),
    Text(Arc<str>),
    Instant(DateTime<FixedOffset>),
    Bytes(Arc<[u8]>),
    List(Arc<[Value]>),
    Map(PersistentMap<Value, Value>),
    Set(PersistentSet<Value>),
    Record(Record),
    Custom(Arc<dyn CustomValue>),
    Opaque(Opaque),
}

// =============================================================================
// Records
// =============================================================================

/// A constructor name with named fields.
///
/// Two records are equal when they share a constructor and every field is
/// equal; field order does not matter.
#[derive(Clone, Debug)]
pub struct Record(Arc<RecordData>);

#[derive(Debug)]
struct RecordData {
    constructor: Arc<str>,
    fields: Vec<(Arc<str>, Value)>,
}

impl Record {
    pub fn new<C, I, N>(constructor: C, fields: I) -> Self
    where
        C: Into<Arc<str>>,
        I: IntoIterator<Item = (N, Value)>,
        N: Into<Arc<str>>,
    {
        Record(Arc::new(RecordData {
            constructor: constructor.into(),
            fields: fields
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        }))
    }

    pub fn constructor(&self) -> &str {
        &self.0.constructor
    }

    pub fn fields(&self) -> &[(Arc<str>, Value)] {
        &self.0.fields
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.0
            .fields
            .iter()
            .find(|(field, _)| &**field == name)
            .map(|(_, value)| value)
    }

    pub fn ptr_eq(&self, other: &Record) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

// =============================================================================
// Custom values
// =============================================================================

/// A value type that may override hashing and equality.
///
/// Without overrides a custom value hashes and compares like a record built
/// from [`type_name`](CustomValue::type_name) and
/// [`fields`](CustomValue::fields). Overrides that return `Err` are logged and
/// ignored; the structural algorithm decides instead.
pub trait CustomValue: fmt::Debug + Send + Sync + 'static {
    /// Values with different type names never compare equal.
    fn type_name(&self) -> &str;

    fn fields(&self) -> Vec<(Arc<str>, Value)>;

    /// Hash override. `None` means "use the structural hash".
    fn hash_code(&self) -> Option<Result<i32, HookError>> {
        None
    }

    /// Equality override, consulted only for values of the same type name.
    /// `None` means "compare fields".
    fn equals(&self, other: &dyn CustomValue) -> Option<Result<bool, HookError>> {
        let _ = other;
        None
    }

    fn as_any(&self) -> &dyn Any;
}

fn same_custom(a: &dyn CustomValue, b: &dyn CustomValue) -> bool {
    std::ptr::eq(
        a as *const dyn CustomValue as *const (),
        b as *const dyn CustomValue as *const (),
    )
}

fn custom_eq(a: &dyn CustomValue, b: &dyn CustomValue) -> bool {
    if same_custom(a, b) {
        return true;
    }
    if a.type_name() != b.type_name() {
        return false;
    }
    match a.equals(b) {
        Some(Ok(result)) => return result,
        Some(Err(err)) => warn!(
            "equality override of `{}` failed, comparing fields instead: {}",
            a.type_name(),
            err
        ),
        None => {}
    }
    fields_eq(&a.fields(), &b.fields())
}

fn custom_hash(value: &dyn CustomValue) -> i32 {
    match value.hash_code() {
        Some(Ok(hash)) => return hash,
        Some(Err(err)) => warn!(
            "hash override of `{}` failed, hashing fields instead: {}",
            value.type_name(),
            err
        ),
        None => {}
    }
    fields_hash(&value.fields())
}

fn fields_eq(a: &[(Arc<str>, Value)], b: &[(Arc<str>, Value)]) -> bool {
    a.len() == b.len()
        && a.iter().all(|(name, value)| {
            b.iter()
                .find(|(other, _)| other == name)
                .is_some_and(|(_, other)| equal(value, other))
        })
}

fn fields_hash(fields: &[(Arc<str>, Value)]) -> i32 {
    hash_pairs(
        fields
            .iter()
            .map(|(name, value)| (hash_string(name), value.value_hash())),
    )
}

// =============================================================================
// Identity-only handles
// =============================================================================

/// A handle with no structural identity (a closure, an external resource).
///
/// Equal only to clones of itself; hashed by an identity token.
#[derive(Clone)]
pub struct Opaque(Arc<dyn Any + Send + Sync>);

impl Opaque {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Opaque(Arc::new(value))
    }

    pub fn from_arc(handle: Arc<dyn Any + Send + Sync>) -> Self {
        Opaque(handle)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.0).downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &Opaque) -> bool {
        Arc::as_ptr(&self.0) as *const () == Arc::as_ptr(&other.0) as *const ()
    }

    pub fn identity_hash(&self) -> i32 {
        hash_by_reference(&self.0)
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

// =============================================================================
// Equality and hashing
// =============================================================================

fn equal(a: &Value, b: &Value) -> bool {
    use Value::*;

    match (a, b) {
        (Nil, Nil) | (Undefined, Undefined) => true,
        (Bool(x), Bool(y)) => x == y,
        (Int(x), Int(y)) => x == y,
        (Float(x), Float(y)) => x == y,
        (BigInt(x), BigInt(y)) => x == y,
        (Text(x), Text(y)) => x == y,
        // Equal when neither precedes the other, whatever the offsets.
        (Instant(x), Instant(y)) => !(x < y || x > y),
        (Bytes(x), Bytes(y)) => x == y,
        (List(x), List(y)) => {
            Arc::ptr_eq(x, y)
                || (x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| equal(p, q)))
        }
        (Map(x), Map(y)) => x.equals(y),
        (Set(x), Set(y)) => x.equals(y),
        (Record(x), Record(y)) => {
            x.ptr_eq(y) || (x.constructor() == y.constructor() && fields_eq(x.fields(), y.fields()))
        }
        (Custom(x), Custom(y)) => custom_eq(&**x, &**y),
        (Opaque(x), Opaque(y)) => x.ptr_eq(y),
        _ => false,
    }
}

impl ValueEq for Value {
    fn value_eq(&self, other: &Self) -> bool {
        equal(self, other)
    }

    fn identical(&self, other: &Self) -> bool {
        use Value::*;

        match (self, other) {
            (Nil, Nil) | (Undefined, Undefined) => true,
            (Bool(x), Bool(y)) => x == y,
            (Int(x), Int(y)) => x == y,
            (Float(x), Float(y)) => x == y,
            // Text and big integers are primitives: identity is content.
            (BigInt(x), BigInt(y)) => Arc::ptr_eq(x, y) || x == y,
            (Text(x), Text(y)) => Arc::ptr_eq(x, y) || x == y,
            (Instant(x), Instant(y)) => x == y && x.offset() == y.offset(),
            (Bytes(x), Bytes(y)) => Arc::ptr_eq(x, y),
            (List(x), List(y)) => Arc::ptr_eq(x, y),
            (Map(x), Map(y)) => x.ptr_eq(y),
            (Set(x), Set(y)) => x.ptr_eq(y),
            (Record(x), Record(y)) => x.ptr_eq(y),
            (Custom(x), Custom(y)) => same_custom(&**x, &**y),
            (Opaque(x), Opaque(y)) => x.ptr_eq(y),
            _ => false,
        }
    }
}

impl ValueHash for Value {
    fn value_hash(&self) -> i32 {
        match self {
            Value::Nil => NIL_HASH,
            Value::Undefined => UNDEFINED_HASH,
            Value::Bool(b) => b.value_hash(),
            Value::Int(i) => hash_number(*i as f64),
            Value::Float(f) => hash_number(*f),
            Value::BigInt(n) => hash_string(&n.to_string()),
            Value::Text(s) => hash_string(s),
            Value::Instant(t) => hash_number(t.timestamp_millis() as f64),
            Value::Bytes(bytes) => hash_ordered(bytes.iter().map(|&b| hash_number(b as f64))),
            Value::List(items) => hash_ordered(items.iter().map(ValueHash::value_hash)),
            Value::Map(map) => map.hash_code(),
            Value::Set(set) => set.value_hash(),
            Value::Record(record) => fields_hash(record.fields()),
            Value::Custom(custom) => custom_hash(&**custom),
            Value::Opaque(handle) => handle.identity_hash(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        equal(self, other)
    }
}

// =============================================================================
// Construction and access
// =============================================================================

impl Value {
    pub fn text(s: impl Into<Arc<str>>) -> Self {
        Value::Text(s.into())
    }

    pub fn bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Value::Bytes(bytes.into())
    }

    pub fn list<I: IntoIterator<Item = Value>>(items: I) -> Self {
        Value::List(items.into_iter().collect())
    }

    pub fn custom<T: CustomValue>(value: T) -> Self {
        Value::Custom(Arc::new(value))
    }

    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Value::Opaque(Opaque::new(value))
    }

    /// Builds a map value from pairs; later duplicates win.
    pub fn map<I: IntoIterator<Item = (Value, Value)>>(pairs: I) -> Self {
        Value::Map(PersistentMap::from_pairs(pairs))
    }

    pub fn set<I: IntoIterator<Item = Value>>(elements: I) -> Self {
        Value::Set(elements.into_iter().collect())
    }

    /// `true` for both absence markers.
    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Nil | Value::Undefined)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Undefined => "undefined",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::BigInt(_) => "bigint",
            Value::Text(_) => "text",
            Value::Instant(_) => "instant",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Record(_) => "record",
            Value::Custom(_) => "custom",
            Value::Opaque(_) => "opaque",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&PersistentMap<Value, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<BigInt> for Value {
    fn from(n: BigInt) -> Self {
        Value::BigInt(Arc::new(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s.into())
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(t: DateTime<FixedOffset>) -> Self {
        Value::Instant(t)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items.into())
    }
}

impl From<PersistentMap<Value, Value>> for Value {
    fn from(map: PersistentMap<Value, Value>) -> Self {
        Value::Map(map)
    }
}

impl From<PersistentSet<Value>> for Value {
    fn from(set: PersistentSet<Value>) -> Self {
        Value::Set(set)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Record(record)
    }
}

impl From<Opaque> for Value {
    fn from(handle: Opaque) -> Self {
        Value::Opaque(handle)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Nil, Into::into)
    }
}
