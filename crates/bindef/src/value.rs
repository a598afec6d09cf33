//! The tagged values produced by evaluation.

use num_bigint::BigInt;
use num_traits::{FromPrimitive, Zero};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::diagnostics::LangError;

/// The reserved names a definition can use as format types.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeName {
    Magic,
    Bool,
    Byte,
    Struct,
    Array,
    Var,
    Enum,
    Uint8,
    Uint16,
    Uint24,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int24,
    Int32,
    Int64,
    Float32,
    Float64,
}

lazy_static::lazy_static! {
    static ref TYPE_NAMES: HashMap<&'static str, TypeName> = maplit::hashmap! {
        "magic" => TypeName::Magic,
        "bool" => TypeName::Bool,
        "byte" => TypeName::Byte,
        "struct" => TypeName::Struct,
        "array" => TypeName::Array,
        "var" => TypeName::Var,
        "enum" => TypeName::Enum,
        "uint8" => TypeName::Uint8,
        "uint16" => TypeName::Uint16,
        "uint24" => TypeName::Uint24,
        "uint32" => TypeName::Uint32,
        "uint64" => TypeName::Uint64,
        "int8" => TypeName::Int8,
        "int16" => TypeName::Int16,
        "int24" => TypeName::Int24,
        "int32" => TypeName::Int32,
        "int64" => TypeName::Int64,
        "float32" => TypeName::Float32,
        "float64" => TypeName::Float64,
    };
}

impl TypeName {
    /// Resolve an identifier to a reserved type name, if it is one.
    pub fn from_ident(name: &str) -> Option<TypeName> {
        TYPE_NAMES.get(name).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TypeName::Magic => "magic",
            TypeName::Bool => "bool",
            TypeName::Byte => "byte",
            TypeName::Struct => "struct",
            TypeName::Array => "array",
            TypeName::Var => "var",
            TypeName::Enum => "enum",
            TypeName::Uint8 => "uint8",
            TypeName::Uint16 => "uint16",
            TypeName::Uint24 => "uint24",
            TypeName::Uint32 => "uint32",
            TypeName::Uint64 => "uint64",
            TypeName::Int8 => "int8",
            TypeName::Int16 => "int16",
            TypeName::Int24 => "int24",
            TypeName::Int32 => "int32",
            TypeName::Int64 => "int64",
            TypeName::Float32 => "float32",
            TypeName::Float64 => "float64",
        }
    }

    /// Whether the type reads a numeric value.
    pub fn is_numeric(self) -> bool {
        self.is_float()
            || matches!(
                self,
                TypeName::Uint8
                    | TypeName::Uint16
                    | TypeName::Uint24
                    | TypeName::Uint32
                    | TypeName::Uint64
                    | TypeName::Int8
                    | TypeName::Int16
                    | TypeName::Int24
                    | TypeName::Int32
                    | TypeName::Int64
            )
    }

    pub fn is_float(self) -> bool {
        matches!(self, TypeName::Float32 | TypeName::Float64)
    }

    /// The inclusive value bounds of an integer type.
    pub fn bounds(self) -> Option<(BigInt, BigInt)> {
        let unsigned = |max: u64| (BigInt::from(0u8), BigInt::from(max));
        let signed = |min: i64, max: i64| (BigInt::from(min), BigInt::from(max));

        match self {
            TypeName::Uint8 => Some(unsigned(0xff)),
            TypeName::Uint16 => Some(unsigned(0xffff)),
            TypeName::Uint24 => Some(unsigned(0xff_ffff)),
            TypeName::Uint32 => Some(unsigned(u64::from(u32::MAX))),
            TypeName::Uint64 => Some(unsigned(u64::MAX)),
            TypeName::Int8 => Some(signed(i64::from(i8::MIN), i64::from(i8::MAX))),
            TypeName::Int16 => Some(signed(i64::from(i16::MIN), i64::from(i16::MAX))),
            TypeName::Int24 => Some(signed(-8_388_608, 8_388_607)),
            TypeName::Int32 => Some(signed(i64::from(i32::MIN), i64::from(i32::MAX))),
            TypeName::Int64 => Some(signed(i64::MIN, i64::MAX)),
            _ => None,
        }
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A (possibly parameterized) reference to a format type.
#[derive(Clone, Debug)]
pub struct TypeValue {
    pub name: TypeName,
    pub params: Vec<Value>,
}

impl fmt::Display for TypeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.params.is_empty() {
            write!(f, "[")?;
            for (idx, param) in self.params.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", param)?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// The namespace visible during evaluation and application: an ordered
/// mapping of bound identifiers to values.
pub type Namespace = ValueMap;

type LazyFn = dyn Fn(Option<&Namespace>) -> Result<Value, LangError>;

/// A deferred computation that evaluates against the namespace it is given.
///
/// Applying a lazy with `None` leaves identifiers unresolved; applying it
/// with a namespace resolves them there. A lazy may yield a different value
/// each time it is applied, since it reads the supplied namespace.
#[derive(Clone)]
pub struct LazyValue(Rc<LazyFn>);

impl LazyValue {
    pub fn new(
        body: impl Fn(Option<&Namespace>) -> Result<Value, LangError> + 'static,
    ) -> LazyValue {
        LazyValue(Rc::new(body))
    }

    /// A lazy that always yields the same value.
    pub fn constant(value: Value) -> LazyValue {
        LazyValue::new(move |_| Ok(value.clone()))
    }

    /// Evaluate the deferred computation against `ns`.
    pub fn apply(&self, ns: Option<&Namespace>) -> Result<Value, LangError> {
        (self.0)(ns)
    }

    fn ptr_eq(&self, other: &LazyValue) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for LazyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lazy(..)")
    }
}

/// The kind tag of a [`Value`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Float,
    Bool,
    String,
    Ident,
    List,
    Map,
    Lazy,
    Type,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Int => "Int",
            ValueKind::Float => "Float",
            ValueKind::Bool => "Bool",
            ValueKind::String => "String",
            ValueKind::Ident => "Ident",
            ValueKind::List => "List",
            ValueKind::Map => "Map",
            ValueKind::Lazy => "Lazy",
            ValueKind::Type => "Type",
        };
        write!(f, "{}", name)
    }
}

/// An evaluated BinDef value.
#[derive(Clone, Debug)]
pub enum Value {
    /// An arbitrary-precision signed integer.
    Int(BigInt),
    /// A 64-bit binary float.
    Float(f64),
    Bool(bool),
    /// An arbitrary byte sequence, not required to be valid text.
    String(Vec<u8>),
    /// A symbolic, unresolved name.
    Ident(String),
    List(Vec<Value>),
    Map(ValueMap),
    Lazy(LazyValue),
    Type(TypeValue),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Bool(_) => ValueKind::Bool,
            Value::String(_) => ValueKind::String,
            Value::Ident(_) => ValueKind::Ident,
            Value::List(_) => ValueKind::List,
            Value::Map(_) => ValueKind::Map,
            Value::Lazy(_) => ValueKind::Lazy,
            Value::Type(_) => ValueKind::Type,
        }
    }

    pub fn ident(name: impl Into<String>) -> Value {
        Value::Ident(name.into())
    }

    pub fn string(bytes: impl Into<Vec<u8>>) -> Value {
        Value::String(bytes.into())
    }

    pub fn int(value: impl Into<BigInt>) -> Value {
        Value::Int(value.into())
    }

    /// Coerce to a boolean. `None` when the kind cannot be coerced.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Int(value) => Some(!value.is_zero()),
            Value::Float(value) => Some(*value != 0.0),
            Value::Bool(value) => Some(*value),
            Value::String(bytes) => Some(!bytes.is_empty()),
            Value::List(items) => Some(!items.is_empty()),
            Value::Map(map) => Some(!map.is_empty()),
            Value::Ident(_) | Value::Lazy(_) | Value::Type(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{}", value),
            Value::Float(value) => write!(f, "{}", value),
            Value::Bool(value) => write!(f, "{}", value),
            Value::String(bytes) => write!(f, "{:?}", String::from_utf8_lossy(bytes)),
            Value::Ident(name) => write!(f, "{}", name),
            Value::List(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (idx, (key, value)) in map.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
            Value::Lazy(_) => write!(f, "<lazy>"),
            Value::Type(ty) => write!(f, "{}", ty),
        }
    }
}

/// Language equality: kind-aware, with exact `Int`/`Float` cross-comparison.
///
/// A non-integral float never equals an integer; the integral case converts
/// the float side exactly. Lists and maps compare deeply, strings byte-wise,
/// and mismatched kinds are unequal rather than an error.
pub fn value_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Int(int), Value::Float(float)) | (Value::Float(float), Value::Int(int)) => {
            float.trunc() == *float
                && BigInt::from_f64(*float).map_or(false, |float| int == &float)
        }
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Ident(a), Value::Ident(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(a, b)| value_eq(a, b))
        }
        (Value::Map(a), Value::Map(b)) => a == b,
        (Value::Lazy(a), Value::Lazy(b)) => a.ptr_eq(b),
        (Value::Type(a), Value::Type(b)) => {
            a.name == b.name
                && a.params.len() == b.params.len()
                && a.params.iter().zip(&b.params).all(|(a, b)| value_eq(a, b))
        }
        _ => false,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        value_eq(self, other)
    }
}

/// Hash a value the way [`value_eq`] compares it: integral floats hash like
/// the equal integer so cross-kind map lookups agree with equality.
fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Int(int) => {
            0u8.hash(state);
            int.hash(state);
        }
        Value::Float(float) => match BigInt::from_f64(*float) {
            Some(int) if float.trunc() == *float => {
                0u8.hash(state);
                int.hash(state);
            }
            _ => {
                1u8.hash(state);
                float.to_bits().hash(state);
            }
        },
        Value::Bool(value) => {
            2u8.hash(state);
            value.hash(state);
        }
        Value::String(bytes) => {
            3u8.hash(state);
            bytes.hash(state);
        }
        Value::Ident(name) => {
            4u8.hash(state);
            name.hash(state);
        }
        Value::List(items) => {
            5u8.hash(state);
            items.len().hash(state);
            for item in items {
                hash_value(item, state);
            }
        }
        // map equality ignores entry order, so only the length is stable
        Value::Map(map) => {
            6u8.hash(state);
            map.len().hash(state);
        }
        Value::Lazy(_) => 7u8.hash(state),
        Value::Type(ty) => {
            8u8.hash(state);
            ty.name.hash(state);
            for param in &ty.params {
                hash_value(param, state);
            }
        }
    }
}

fn value_hash(value: &Value) -> u64 {
    let mut state = DefaultHasher::new();
    hash_value(value, &mut state);
    state.finish()
}

/// An insertion-ordered mapping with language-equality keys.
///
/// Entries live in a vector so iteration follows first-occurrence order; a
/// bucket index over a stable value hash keeps lookups from scanning. A
/// later write to an existing key replaces its value in place.
#[derive(Clone, Default)]
pub struct ValueMap {
    entries: Vec<(Value, Value)>,
    index: HashMap<u64, Vec<usize>>,
}

impl ValueMap {
    pub fn new() -> ValueMap {
        ValueMap::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, key: Value, value: Value) {
        let hash = value_hash(&key);
        if let Some(bucket) = self.index.get(&hash) {
            for &slot in bucket {
                if value_eq(&self.entries[slot].0, &key) {
                    self.entries[slot].1 = value;
                    return;
                }
            }
        }

        let slot = self.entries.len();
        self.entries.push((key, value));
        self.index.entry(hash).or_default().push(slot);
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        let bucket = self.index.get(&value_hash(key))?;
        bucket
            .iter()
            .find(|&&slot| value_eq(&self.entries[slot].0, key))
            .map(|&slot| &self.entries[slot].1)
    }

    /// Look up an entry keyed by the given identifier.
    pub fn get_ident(&self, name: &str) -> Option<&Value> {
        self.get(&Value::ident(name))
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.get(key).is_some()
    }

    /// Entries in first-occurrence order.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(key, value)| (key, value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(key, _)| key)
    }
}

impl fmt::Debug for ValueMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl PartialEq for ValueMap {
    /// Deep structural equality, independent of entry order.
    fn eq(&self, other: &ValueMap) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(key, value)| other.get(key).map_or(false, |found| value_eq(value, found)))
    }
}

impl FromIterator<(Value, Value)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(entries: I) -> ValueMap {
        let mut map = ValueMap::new();
        for (key, value) in entries {
            map.insert(key, value);
        }
        map
    }
}
