//! Applying an evaluated definition document to a binary stream.
//!
//! The applier walks the document's `binary` field list in order, pre-parses
//! each field map into a [`FormatType`], reads bytes according to it, and
//! maintains the live namespace (including `file.pos`) that later fields and
//! deferred expressions observe.

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};
use std::fmt;
use std::fs::File;
use std::path::Path;

use bindef_rt::{ReadError, SeekRead, Whence};

use crate::diagnostics::{ErrorKind, LangError};
use crate::eval::force;
use crate::value::{LazyValue, Namespace, TypeName, Value, ValueMap};

pub mod read;

pub use self::read::Endian;

/// The BinDef specification version implemented by this runtime.
pub const SPEC_VERSION: Version = Version { major: 0, minor: 1 };

/// Inherited format resolution gives up past this depth rather than chase a
/// definition that references itself.
const MAX_TYPE_DEPTH: usize = 64;

/// A specification version with major and minor components.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl std::str::FromStr for Version {
    type Err = LangError;

    fn from_str(text: &str) -> Result<Version, LangError> {
        let invalid = || {
            LangError::unpositioned(
                ErrorKind::Value,
                format!("version must be of the form MAJOR.MINOR, received {:?}", text),
            )
        };

        let (major, minor) = text.split_once('.').ok_or_else(invalid)?;
        Ok(Version {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

/// Metadata described by the `meta` key of a document.
#[derive(Clone, Debug, PartialEq)]
pub struct Meta {
    /// The BDF version this document targets.
    pub version: Version,
    /// The name of the format being described.
    pub name: String,
    /// The media or MIME type(s) for this format.
    pub mime: Vec<String>,
    /// The file extensions used by this format.
    pub exts: Vec<String>,
    /// Additional documentation for the format.
    pub doc: String,
}

/// An error produced while applying a definition to a stream.
#[derive(Debug)]
pub enum ApplyError {
    /// A language-level failure, including magic mismatches.
    Lang(LangError),
    /// The underlying stream failed.
    Read(ReadError),
}

impl ApplyError {
    /// The offset of a failed magic check, when this error means "the
    /// definition does not describe this file".
    pub fn magic_offset(&self) -> Option<u64> {
        match self {
            ApplyError::Lang(error) => match error.kind {
                ErrorKind::Magic { offset } => Some(offset),
                _ => None,
            },
            ApplyError::Read(_) => None,
        }
    }
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyError::Lang(error) => error.fmt(f),
            ApplyError::Read(error) => error.fmt(f),
        }
    }
}

impl std::error::Error for ApplyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApplyError::Lang(error) => Some(error),
            ApplyError::Read(error) => Some(error),
        }
    }
}

impl From<LangError> for ApplyError {
    fn from(error: LangError) -> ApplyError {
        ApplyError::Lang(error)
    }
}

impl From<ReadError> for ApplyError {
    fn from(error: ReadError) -> ApplyError {
        ApplyError::Read(error)
    }
}

/// A resolved seek anchor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SeekPos {
    pub offset: i64,
    pub whence: Whence,
}

/// One byte pattern a magic field may match, at an offset relative to the
/// field's base position.
#[derive(Clone, Debug, PartialEq)]
pub struct MagicTag {
    pub contents: Vec<u8>,
    pub offset: i64,
}

/// A `switch` selector recorded on a field.
#[derive(Clone, Debug)]
pub struct Switch {
    pub subject: LazyValue,
    pub cases: ValueMap,
}

/// The element count of an array field.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArraySize {
    Fixed(u64),
    /// Read until the end of the stream (or until `while` falsifies).
    Eos,
}

/// The value pattern of an enum member.
#[derive(Clone, Debug)]
pub enum EnumValue {
    Single(BigInt),
    /// Inclusive lower bound, exclusive upper bound. The raw map is what the
    /// member's identifier binds to in the namespace.
    Range {
        from: BigInt,
        to: BigInt,
        raw: ValueMap,
    },
}

/// One declared member of an `enum` format type.
#[derive(Clone, Debug)]
pub struct EnumMember {
    pub id: String,
    pub name: String,
    pub doc: String,
    pub value: EnumValue,
}

/// The applier's working record for one field.
#[derive(Clone, Debug)]
pub struct FormatType {
    /// The field's format type. May carry parameters such as `byte[n]`.
    pub ty: TypeName,
    /// Field identifier; empty when the field is anonymous.
    pub id: String,
    /// Human-readable field name.
    pub name: String,
    /// Documentation.
    pub doc: String,
    /// Seek position, resolved before reading.
    pub at: Option<SeekPos>,
    /// Only process the field when this condition holds.
    pub if_cond: Option<LazyValue>,
    /// Validation predicate, checked after reading.
    pub valid: Option<LazyValue>,
    /// The switch selector the field's body was chosen by, if any.
    pub switch: Option<Switch>,
    /// Byte order for multi-byte numeric types.
    pub endian: Option<Endian>,
    /// For magic types, the pattern(s) that must match.
    pub matches: Vec<MagicTag>,
    /// For byte types, the size of the byte string.
    pub size: u64,
    /// For byte types, whether to trim whitespace and null bytes.
    pub strip: bool,
    /// For structs, the unprocessed field maps.
    pub raw_fields: Vec<ValueMap>,
    /// For structs, the fields as processed on the last read.
    pub proc_fields: Vec<FormatType>,
    /// For var fields, the value expression.
    pub var_value: Option<LazyValue>,
    /// For arrays, the element count.
    pub arr_size: ArraySize,
    /// For arrays in end-of-stream mode, the loop guard.
    pub arr_while: Option<LazyValue>,
    /// For arrays, the unprocessed item template.
    pub raw_item: Option<ValueMap>,
    /// For arrays, the items as processed on the last read.
    pub proc_items: Vec<FormatType>,
    /// For enums, the underlying numeric type.
    pub enum_type: Option<TypeName>,
    /// For enums, the declared members.
    pub members: Vec<EnumMember>,
}

impl FormatType {
    fn new(ty: TypeName) -> FormatType {
        FormatType {
            ty,
            id: String::new(),
            name: String::new(),
            doc: String::new(),
            at: None,
            if_cond: None,
            valid: None,
            switch: None,
            endian: None,
            matches: Vec::new(),
            size: 0,
            strip: false,
            raw_fields: Vec::new(),
            proc_fields: Vec::new(),
            var_value: None,
            arr_size: ArraySize::Fixed(0),
            arr_while: None,
            raw_item: None,
            proc_items: Vec::new(),
            enum_type: None,
            members: Vec::new(),
        }
    }
}

/// A named top-level field together with its extracted value.
#[derive(Clone, Debug)]
pub struct MetaPair {
    pub field: FormatType,
    pub value: Value,
}

fn require_key<'map>(map: &'map ValueMap, key: &str) -> Result<&'map Value, LangError> {
    map.get_ident(key).ok_or_else(|| {
        LangError::unpositioned(
            ErrorKind::Value,
            format!("missing key `{}` is required", key),
        )
    })
}

/// Fetch `key` and force it against `ns`.
fn get_forced(
    map: &ValueMap,
    key: &str,
    ns: Option<&Namespace>,
) -> Result<Option<Value>, LangError> {
    match map.get_ident(key) {
        None => Ok(None),
        Some(value) => force(value.clone(), ns).map(Some),
    }
}

/// Fetch `key` as a deferred computation, wrapping an already-evaluated
/// value in a constant closure.
fn get_lazy(map: &ValueMap, key: &str) -> Option<LazyValue> {
    match map.get_ident(key) {
        Some(Value::Lazy(lazy)) => Some(lazy.clone()),
        Some(other) => Some(LazyValue::constant(other.clone())),
        None => None,
    }
}

fn as_text(value: &Value, what: &str) -> Result<String, LangError> {
    match value {
        Value::String(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        other => Err(LangError::unpositioned(
            ErrorKind::Type,
            format!("{} must be a string, received {}", what, other.kind()),
        )),
    }
}

fn as_map(value: &Value, what: &str) -> Result<ValueMap, LangError> {
    match value {
        Value::Map(map) => Ok(map.clone()),
        other => Err(LangError::unpositioned(
            ErrorKind::Type,
            format!("{} must be a mapping, received {}", what, other.kind()),
        )),
    }
}

fn as_int(value: &Value, what: &str) -> Result<BigInt, LangError> {
    match value {
        Value::Int(int) => Ok(int.clone()),
        other => Err(LangError::unpositioned(
            ErrorKind::Type,
            format!("{} must be an integer, received {}", what, other.kind()),
        )),
    }
}

/// Truncate a numeric value to a machine integer, the way seek offsets and
/// sizes are consumed.
fn number_as_i64(value: &Value, what: &str) -> Result<i64, LangError> {
    match value {
        Value::Int(int) => int.to_i64().ok_or_else(|| {
            LangError::unpositioned(
                ErrorKind::Value,
                format!("{} is out of range", what),
            )
        }),
        Value::Float(float) => Ok(float.trunc() as i64),
        other => Err(LangError::unpositioned(
            ErrorKind::Type,
            format!("{} is not a numeric type", other.kind()),
        )),
    }
}

/// Resolve the byte order for a field: its own `endian` key, else the one
/// inherited from the enclosing struct.
fn resolve_endian(
    bin: &ValueMap,
    base: Option<&ValueMap>,
    ns: &Namespace,
) -> Result<Endian, LangError> {
    let local = get_forced(bin, "endian", Some(ns))?;
    let value = match local {
        Some(value) => Some(value),
        None => match base {
            Some(base) => get_forced(base, "endian", Some(ns))?,
            None => None,
        },
    };

    match value {
        Some(Value::String(bytes)) => {
            let name = String::from_utf8_lossy(&bytes).to_lowercase();
            Endian::from_name(&name).ok_or_else(|| {
                LangError::unpositioned(ErrorKind::Value, "endian is not 'little' or 'big'")
            })
        }
        Some(other) => Err(LangError::unpositioned(
            ErrorKind::Type,
            format!("endian must be a string, received {}", other.kind()),
        )),
        None => Err(LangError::unpositioned(
            ErrorKind::Value,
            "field requires an endianness of 'little' or 'big'",
        )),
    }
}

/// Resolve a field's `at` seek anchor.
fn resolve_seek_pos(value: &Value, ns: &Namespace) -> Result<SeekPos, LangError> {
    match value {
        Value::Int(_) | Value::Float(_) => Ok(SeekPos {
            offset: number_as_i64(value, "at")?,
            whence: Whence::Start,
        }),
        Value::List(items) => {
            if items.len() < 2 {
                return Err(LangError::unpositioned(
                    ErrorKind::Value,
                    "value `at` must contain 2 items",
                ));
            }

            let offset_value = force(items[0].clone(), Some(ns))?;
            let offset = number_as_i64(&offset_value, "at[0]")?;

            let whence = match force(items[1].clone(), Some(ns))? {
                Value::String(bytes) => match bytes.as_slice() {
                    b"start" => Whence::Start,
                    b"end" => Whence::End,
                    b"current" => Whence::Current,
                    _ => {
                        return Err(LangError::unpositioned(
                            ErrorKind::Value,
                            "at[1]: whence is not a valid seek identifier",
                        ));
                    }
                },
                other => {
                    return Err(LangError::unpositioned(
                        ErrorKind::Type,
                        format!("at[1]: whence must be a string, received {}", other.kind()),
                    ));
                }
            };

            Ok(SeekPos { offset, whence })
        }
        other => Err(LangError::unpositioned(
            ErrorKind::Type,
            format!("value `at` is not a list or number, received {}", other.kind()),
        )),
    }
}

/// The keys a field keeps for itself when its body is substituted by a
/// `switch` case or an inherited format. The field's own `switch` also
/// belongs to it rather than to the body, but it is consumed while choosing
/// the body and stays with its `cases`, so it is never copied forward.
const SURFACE_KEYS: &[&str] = &["id", "name", "doc", "at", "if", "valid"];

/// Write the surface attributes of `outer` over `body`.
fn overlay_surface(body: &mut ValueMap, outer: &ValueMap) {
    for &key in SURFACE_KEYS {
        if let Some(value) = outer.get_ident(key) {
            body.insert(Value::ident(key), value.clone());
        }
    }
}

/// Scan the `cases` map in insertion order for a key equal to the subject.
/// The `default` identifier key is skipped during scanning and consulted
/// only when nothing matched.
fn select_switch_case(
    subject: &LazyValue,
    cases: &ValueMap,
    ns: &Namespace,
) -> Result<ValueMap, LangError> {
    let subject_value = force(subject.apply(Some(ns))?, Some(ns))?;

    let mut default = None;
    for (key, value) in cases.iter() {
        if matches!(key, Value::Ident(name) if name == "default") {
            default = Some(value);
            continue;
        }

        let key_value = force(key.clone(), Some(ns))?;
        if crate::value::value_eq(&key_value, &subject_value) {
            return as_map(value, "switch case");
        }
    }

    match default {
        Some(value) => as_map(value, "switch default"),
        None => Err(LangError::unpositioned(
            ErrorKind::Value,
            format!("no switch case matched value {}", subject_value),
        )),
    }
}

/// Pre-parse one field map into a [`FormatType`].
///
/// Returns `Ok(None)` when the field's `if` condition evaluates false: the
/// field is skipped, which is not an error.
pub fn parse_format_type(
    format: &Value,
    ns: &Namespace,
    base: Option<&ValueMap>,
) -> Result<Option<FormatType>, LangError> {
    parse_format_type_at(format, ns, base, 0)
}

fn parse_format_type_at(
    format: &Value,
    ns: &Namespace,
    base: Option<&ValueMap>,
    depth: usize,
) -> Result<Option<FormatType>, LangError> {
    if depth > MAX_TYPE_DEPTH {
        return Err(LangError::unpositioned(
            ErrorKind::Runtime,
            "format type resolution is too deep (is the definition cyclic?)",
        ));
    }

    let bin = match format {
        Value::Map(map) => map,
        other => {
            return Err(LangError::unpositioned(
                ErrorKind::Type,
                format!("field must be a mapping, received {}", other.kind()),
            ));
        }
    };

    let if_cond = get_lazy(bin, "if");
    if let Some(cond) = &if_cond {
        match force(cond.apply(Some(ns))?, Some(ns))? {
            Value::Bool(true) => {}
            Value::Bool(false) => return Ok(None),
            other => {
                return Err(LangError::unpositioned(
                    ErrorKind::Type,
                    format!("`if` must evaluate to a boolean, received {}", other.kind()),
                ));
            }
        }
    }

    // a switch substitutes the field body with the matched case
    let substituted;
    let (bin, switch) = match get_lazy(bin, "switch") {
        None => (bin, None),
        Some(subject) => {
            let cases = as_map(require_key(bin, "cases")?, "`cases`")?;
            let mut body = select_switch_case(&subject, &cases, ns)?;
            overlay_surface(&mut body, bin);
            substituted = body;
            (&substituted, Some(Switch { subject, cases }))
        }
    };

    let type_value = require_key(bin, "type")?.clone();
    let resolved = match type_value {
        Value::Lazy(lazy) => {
            // `eos` has to resolve while an array length expression evaluates
            let mut type_ns = ns.clone();
            type_ns.insert(Value::ident("eos"), Value::ident("eos"));
            force(lazy.apply(Some(&type_ns))?, Some(&type_ns))?
        }
        other => other,
    };

    let type_res = match resolved {
        Value::Type(ty) => ty,
        Value::Map(inherited) => {
            // the field inherits a named format and overrides its surface
            let mut body = inherited;
            overlay_surface(&mut body, bin);
            return parse_format_type_at(&Value::Map(body), ns, base, depth + 1);
        }
        other => {
            return Err(LangError::unpositioned(
                ErrorKind::Type,
                format!(
                    "field `type` must be a type or a format mapping, received {}",
                    other.kind()
                ),
            ));
        }
    };

    let mut out = FormatType::new(type_res.name);
    out.if_cond = if_cond;
    out.switch = switch;
    out.valid = get_lazy(bin, "valid");

    if let Some(id) = bin.get_ident("id") {
        match force(id.clone(), None)? {
            Value::Ident(name) => out.id = name,
            other => {
                return Err(LangError::unpositioned(
                    ErrorKind::Type,
                    format!("`id` must be an identifier, received {}", other.kind()),
                ));
            }
        }
    }

    if let Some(name) = get_forced(bin, "name", Some(ns))? {
        out.name = as_text(&name, "`name`")?;
    }
    if let Some(doc) = get_forced(bin, "doc", Some(ns))? {
        out.doc = as_text(&doc, "`doc`")?;
    }
    if let Some(at) = get_forced(bin, "at", Some(ns))? {
        out.at = Some(resolve_seek_pos(&at, ns)?);
    }

    match type_res.name {
        TypeName::Magic => {
            match require_key(bin, "match")? {
                Value::String(bytes) => out.matches.push(MagicTag {
                    contents: bytes.clone(),
                    offset: 0,
                }),
                Value::List(items) => {
                    for (idx, item) in items.iter().enumerate() {
                        match force(item.clone(), Some(ns))? {
                            Value::String(bytes) => out.matches.push(MagicTag {
                                contents: bytes,
                                offset: 0,
                            }),
                            other => {
                                return Err(LangError::unpositioned(
                                    ErrorKind::Type,
                                    format!(
                                        "match[{}] must be a string, received {}",
                                        idx,
                                        other.kind()
                                    ),
                                ));
                            }
                        }
                    }
                }
                other => {
                    return Err(LangError::unpositioned(
                        ErrorKind::Type,
                        format!(
                            "`match` must be a string or list of strings, received {}",
                            other.kind()
                        ),
                    ));
                }
            }
        }

        TypeName::Uint8 | TypeName::Int8 | TypeName::Bool => {}

        TypeName::Uint16
        | TypeName::Uint24
        | TypeName::Uint32
        | TypeName::Uint64
        | TypeName::Int16
        | TypeName::Int24
        | TypeName::Int32
        | TypeName::Int64
        | TypeName::Float32
        | TypeName::Float64 => {
            out.endian = Some(resolve_endian(bin, base, ns)?);
        }

        TypeName::Var => {
            out.var_value = Some(get_lazy(bin, "value").ok_or_else(|| {
                LangError::unpositioned(ErrorKind::Value, "missing key `value` is required")
            })?);
        }

        TypeName::Byte => {
            if let Some(strip) = get_forced(bin, "strip", Some(ns))? {
                out.strip = match strip {
                    Value::Bool(strip) => strip,
                    other => {
                        return Err(LangError::unpositioned(
                            ErrorKind::Type,
                            format!("`strip` must be a boolean, received {}", other.kind()),
                        ));
                    }
                };
            }

            out.size = match type_res.params.first() {
                // a bare `byte` is a single byte
                None => 1,
                Some(param) => {
                    let size = number_as_i64(&force(param.clone(), Some(ns))?, "byte size")
                        .map_err(|_| {
                            LangError::unpositioned(ErrorKind::Value, "byte size must be numeric")
                        })?;
                    if size < 0 {
                        return Err(LangError::unpositioned(
                            ErrorKind::Value,
                            "byte size must be non-negative",
                        ));
                    }
                    size as u64
                }
            };
        }

        TypeName::Array => {
            let param = type_res.params.first().ok_or_else(|| {
                LangError::unpositioned(ErrorKind::Value, "array must specify a length")
            })?;

            out.arr_size = match force(param.clone(), Some(ns))? {
                Value::Ident(name) if name == "eos" => ArraySize::Eos,
                Value::Ident(_) => {
                    return Err(LangError::unpositioned(
                        ErrorKind::Value,
                        "array size must be numeric",
                    ));
                }
                Value::Int(size) => {
                    if size.is_negative() {
                        return Err(LangError::unpositioned(
                            ErrorKind::Value,
                            "array length must be non-negative",
                        ));
                    }
                    ArraySize::Fixed(size.to_u64().ok_or_else(|| {
                        LangError::unpositioned(ErrorKind::Value, "array length is out of range")
                    })?)
                }
                other => {
                    return Err(LangError::unpositioned(
                        ErrorKind::Type,
                        format!("array size must be numeric, received {}", other.kind()),
                    ));
                }
            };

            out.raw_item = Some(as_map(require_key(bin, "item")?, "`item`")?);
            out.arr_while = get_lazy(bin, "while");
        }

        TypeName::Struct => {
            let fields = match require_key(bin, "fields")? {
                Value::List(items) => items.clone(),
                other => {
                    return Err(LangError::unpositioned(
                        ErrorKind::Type,
                        format!("`fields` must be a list, received {}", other.kind()),
                    ));
                }
            };

            for field in &fields {
                out.raw_fields
                    .push(as_map(&force(field.clone(), Some(ns))?, "struct field")?);
            }

            out.endian = Some(resolve_endian(bin, base, ns)?);
        }

        TypeName::Enum => {
            let underlying = match type_res.params.first() {
                None => {
                    return Err(LangError::unpositioned(
                        ErrorKind::Value,
                        "enum must specify an underlying type",
                    ));
                }
                Some(param) => match force(param.clone(), Some(ns))? {
                    Value::Type(ty) => ty.name,
                    other => {
                        return Err(LangError::unpositioned(
                            ErrorKind::Type,
                            format!(
                                "enum underlying type must be a type, received {}",
                                other.kind()
                            ),
                        ));
                    }
                },
            };

            if !underlying.is_numeric() || underlying.is_float() {
                return Err(LangError::unpositioned(
                    ErrorKind::Type,
                    format!("enum underlying type must be an integer type, not {}", underlying),
                ));
            }

            if read::width_of(underlying).unwrap_or(1) > 1 {
                out.endian = Some(resolve_endian(bin, base, ns)?);
            }
            out.enum_type = Some(underlying);

            let members = match require_key(bin, "members")? {
                Value::List(items) => items.clone(),
                other => {
                    return Err(LangError::unpositioned(
                        ErrorKind::Type,
                        format!("`members` must be a list, received {}", other.kind()),
                    ));
                }
            };

            for member in &members {
                out.members
                    .push(parse_enum_member(&force(member.clone(), Some(ns))?, underlying, ns)?);
            }
        }
    }

    Ok(Some(out))
}

fn parse_enum_member(
    member: &Value,
    underlying: TypeName,
    ns: &Namespace,
) -> Result<EnumMember, LangError> {
    let map = as_map(member, "enum member")?;

    let id = match force(require_key(&map, "id")?.clone(), None)? {
        Value::Ident(name) => name,
        other => {
            return Err(LangError::unpositioned(
                ErrorKind::Type,
                format!("enum member `id` must be an identifier, received {}", other.kind()),
            ));
        }
    };

    let name = match get_forced(&map, "name", Some(ns))? {
        Some(value) => as_text(&value, "enum member `name`")?,
        None => String::new(),
    };
    let doc = match get_forced(&map, "doc", Some(ns))? {
        Some(value) => as_text(&value, "enum member `doc`")?,
        None => String::new(),
    };

    let (min, max) = underlying.bounds().ok_or_else(|| {
        LangError::unpositioned(
            ErrorKind::Type,
            format!("enum underlying type must be an integer type, not {}", underlying),
        )
    })?;

    let in_bounds = |value: &BigInt| *value >= min && *value <= max;
    let bound_error = |value: &BigInt| {
        LangError::unpositioned(
            ErrorKind::Value,
            format!(
                "enum member `{}` value {} does not fit in {}",
                id, value, underlying
            ),
        )
    };

    let value = match force(require_key(&map, "value")?.clone(), Some(ns))? {
        Value::Int(value) => {
            if !in_bounds(&value) {
                return Err(bound_error(&value));
            }
            EnumValue::Single(value)
        }
        Value::Map(range) => {
            let from = as_int(&force(require_key(&range, "from")?.clone(), Some(ns))?, "from")?;
            let to = as_int(&force(require_key(&range, "to")?.clone(), Some(ns))?, "to")?;

            // `to` is exclusive, so it may sit one past the type's maximum
            if !in_bounds(&from) {
                return Err(bound_error(&from));
            }
            let max_exclusive = max.clone() + BigInt::from(1u8);
            if to < min || to > max_exclusive {
                return Err(bound_error(&to));
            }

            EnumValue::Range { from, to, raw: range }
        }
        other => {
            return Err(LangError::unpositioned(
                ErrorKind::Type,
                format!(
                    "enum member `value` must be an integer or range mapping, received {}",
                    other.kind()
                ),
            ));
        }
    };

    Ok(EnumMember { id, name, doc, value })
}

/// Mirror the stream's current offset into `file.pos`.
fn refresh_file_pos<R: SeekRead>(handle: &mut R, ns: &mut Namespace) -> Result<(), ApplyError> {
    let pos = handle.seek(0, Whence::Current)?;
    let mut file = ValueMap::new();
    file.insert(Value::ident("pos"), Value::int(pos));
    ns.insert(Value::ident("file"), Value::Map(file));
    Ok(())
}

/// Check each magic tag in order against the stream, seeking to
/// `base + tag.offset` for every attempt. The first byte-exact match wins.
fn check_magic<R: SeekRead>(handle: &mut R, format: &FormatType) -> Result<Value, ApplyError> {
    let base = handle.seek(0, Whence::Current)?;

    for tag in &format.matches {
        handle.seek(base as i64 + tag.offset, Whence::Start)?;

        let bytes = match handle.read(tag.contents.len()) {
            Ok(bytes) => bytes,
            // a source shorter than the tag simply cannot match it
            Err(ReadError::Eof) => continue,
            Err(error) => return Err(error.into()),
        };

        if bytes == tag.contents {
            return Ok(Value::String(bytes));
        }
    }

    Err(LangError::unpositioned(
        ErrorKind::Magic { offset: base },
        format!("did not find magic at offset {}", base),
    )
    .into())
}

/// Trim `\0` and Unicode whitespace codepoints from both ends of the bytes.
fn strip_bytes(bytes: &[u8]) -> Vec<u8> {
    // how many bytes of trimmable content sit at the front of `bytes`
    fn leading_trim(bytes: &[u8]) -> Option<usize> {
        let first = *bytes.first()?;
        if first == 0 {
            return Some(1);
        }
        if first.is_ascii() {
            return if (first as char).is_whitespace() {
                Some(1)
            } else {
                None
            };
        }
        for len in 2..=bytes.len().min(4) {
            if let Ok(text) = std::str::from_utf8(&bytes[..len]) {
                let ch = text.chars().next()?;
                return if ch.is_whitespace() { Some(len) } else { None };
            }
        }
        None
    }

    // how many bytes of trimmable content sit at the back of `bytes`
    fn trailing_trim(bytes: &[u8]) -> Option<usize> {
        for back in 1..=bytes.len().min(4) {
            let tail = &bytes[bytes.len() - back..];
            if back == 1 && tail[0] == 0 {
                return Some(1);
            }
            if let Ok(text) = std::str::from_utf8(tail) {
                let mut chars = text.chars();
                let ch = chars.next()?;
                return if chars.next().is_none() && ch.is_whitespace() {
                    Some(back)
                } else {
                    None
                };
            }
        }
        None
    }

    let mut bytes = bytes;
    while let Some(len) = leading_trim(bytes) {
        bytes = &bytes[len..];
    }
    while let Some(len) = trailing_trim(bytes) {
        bytes = &bytes[..bytes.len() - len];
    }
    bytes.to_vec()
}

/// Read one field from the stream according to its format record, binding
/// its `id` and checking its `valid` predicate.
pub fn process_type<R: SeekRead>(
    handle: &mut R,
    format: &mut FormatType,
    ns: &mut Namespace,
) -> Result<Value, ApplyError> {
    if let Some(at) = format.at {
        handle.seek(at.offset, at.whence)?;
    }
    refresh_file_pos(handle, ns)?;

    let value = match format.ty {
        TypeName::Magic => check_magic(handle, format)?,

        TypeName::Uint8
        | TypeName::Uint16
        | TypeName::Uint24
        | TypeName::Uint32
        | TypeName::Uint64
        | TypeName::Int8
        | TypeName::Int16
        | TypeName::Int24
        | TypeName::Int32
        | TypeName::Int64 => {
            let width = read::width_of(format.ty).unwrap_or(1);
            let endian = format.endian.unwrap_or(Endian::Little);
            let bytes = handle.read(width)?;
            Value::Int(read::int_from_bytes(format.ty, endian, &bytes))
        }

        TypeName::Float32 | TypeName::Float64 => {
            let width = read::width_of(format.ty).unwrap_or(4);
            let endian = format.endian.unwrap_or(Endian::Little);
            let bytes = handle.read(width)?;
            Value::Float(
                read::float_from_bytes(format.ty, endian, &bytes).unwrap_or(0.0),
            )
        }

        TypeName::Bool => {
            let bytes = handle.read(1)?;
            Value::Bool(bytes[0] != 0)
        }

        TypeName::Var => {
            // the value is captured here, at the field's own site; later
            // namespace reads see the captured value
            let lazy = format.var_value.clone().ok_or_else(|| {
                LangError::unpositioned(ErrorKind::Runtime, "var field without a value")
            })?;
            force(lazy.apply(Some(ns))?, Some(ns))?
        }

        TypeName::Byte => {
            let bytes = handle.read(format.size as usize)?;
            if format.strip {
                Value::String(strip_bytes(&bytes))
            } else {
                Value::String(bytes)
            }
        }

        TypeName::Struct => {
            // an inner namespace so struct fields can refer to each other
            // without polluting the enclosing scope
            let mut inner_ns = ns.clone();
            let mut inherited = ValueMap::new();
            if let Some(endian) = format.endian {
                inherited.insert(Value::ident("endian"), Value::string(endian.as_str()));
            }

            let mut mapping = ValueMap::new();
            format.proc_fields = Vec::new();
            let raw_fields = format.raw_fields.clone();

            for field in &raw_fields {
                refresh_file_pos(handle, &mut inner_ns)?;
                let parsed =
                    parse_format_type(&Value::Map(field.clone()), &inner_ns, Some(&inherited))?;
                let mut field_format = match parsed {
                    None => continue,
                    Some(field_format) => field_format,
                };

                let value = process_type(handle, &mut field_format, &mut inner_ns)?;
                if !field_format.id.is_empty() {
                    mapping.insert(Value::ident(field_format.id.clone()), value);
                }
                format.proc_fields.push(field_format);
            }

            Value::Map(mapping)
        }

        TypeName::Array => {
            let raw_item = format.raw_item.clone().ok_or_else(|| {
                LangError::unpositioned(ErrorKind::Runtime, "array field without an item")
            })?;
            let eos = format.arr_size == ArraySize::Eos;
            let count = match format.arr_size {
                ArraySize::Fixed(count) => count,
                ArraySize::Eos => 0,
            };

            let mut elements = Vec::new();
            format.proc_items = Vec::new();
            let mut idx: u64 = 0;

            loop {
                refresh_file_pos(handle, ns)?;

                if eos {
                    if let Some(guard) = &format.arr_while {
                        match force(guard.apply(Some(ns))?, Some(ns))? {
                            Value::Bool(true) => {}
                            Value::Bool(false) => break,
                            other => {
                                return Err(LangError::unpositioned(
                                    ErrorKind::Type,
                                    format!(
                                        "`while` must evaluate to a boolean, received {}",
                                        other.kind()
                                    ),
                                )
                                .into());
                            }
                        }
                    }
                } else if idx >= count {
                    break;
                }

                let parsed = parse_format_type(&Value::Map(raw_item.clone()), ns, None)?;
                let mut item_format = match parsed {
                    None => {
                        idx += 1;
                        continue;
                    }
                    Some(item_format) => item_format,
                };

                match process_type(handle, &mut item_format, ns) {
                    Ok(value) => {
                        elements.push(value);
                        format.proc_items.push(item_format);
                    }
                    // in end-of-stream mode running out of input ends the
                    // loop cleanly
                    Err(ApplyError::Read(ReadError::Eof)) if eos => break,
                    Err(error) => return Err(error),
                }
                idx += 1;
            }

            Value::List(elements)
        }

        TypeName::Enum => {
            let underlying = format.enum_type.ok_or_else(|| {
                LangError::unpositioned(ErrorKind::Runtime, "enum field without an underlying type")
            })?;
            let width = read::width_of(underlying).unwrap_or(1);
            let endian = format.endian.unwrap_or(Endian::Little);
            let bytes = handle.read(width)?;
            let value = read::int_from_bytes(underlying, endian, &bytes);

            // member identifiers become visible to later expressions
            let mut matched = false;
            for member in &format.members {
                match &member.value {
                    EnumValue::Single(single) => {
                        ns.insert(
                            Value::ident(member.id.clone()),
                            Value::Int(single.clone()),
                        );
                        matched = matched || *single == value;
                    }
                    EnumValue::Range { from, to, raw } => {
                        ns.insert(Value::ident(member.id.clone()), Value::Map(raw.clone()));
                        matched = matched || (*from <= value && value < *to);
                    }
                }
            }

            if !matched {
                let label = if format.id.is_empty() {
                    format.name.clone()
                } else {
                    format.id.clone()
                };
                return Err(LangError::unpositioned(
                    ErrorKind::Value,
                    format!(
                        "value {} does not match any member of enum `{}`",
                        value, label
                    ),
                )
                .into());
            }

            Value::Int(value)
        }
    };

    if !format.id.is_empty() {
        ns.insert(Value::ident(format.id.clone()), value.clone());
    }

    if let Some(valid) = &format.valid {
        match force(valid.apply(Some(ns))?, Some(ns))? {
            Value::Bool(true) => {}
            Value::Bool(false) => {
                return Err(LangError::unpositioned(
                    ErrorKind::Value,
                    format!(
                        "value for `{}` is invalid (has value {})",
                        format.id, value
                    ),
                )
                .into());
            }
            other => {
                return Err(LangError::unpositioned(
                    ErrorKind::Type,
                    format!(
                        "`valid` must evaluate to a boolean, received {}",
                        other.kind()
                    ),
                )
                .into());
            }
        }
    }

    refresh_file_pos(handle, ns)?;
    Ok(value)
}

/// Keep the "definition did not match" signal unwrapped; everything else
/// gains the failing field index for context.
fn with_field_context(idx: usize, error: ApplyError) -> ApplyError {
    match error {
        ApplyError::Lang(inner) if matches!(inner.kind, ErrorKind::Magic { .. }) => {
            ApplyError::Lang(inner)
        }
        ApplyError::Lang(mut inner) => {
            inner.message = format!("binary[{}]: {}", idx, inner.message);
            ApplyError::Lang(inner)
        }
        read => read,
    }
}

/// Apply an evaluated document to the file at `path`.
///
/// The file handle is owned by this call and released when it returns, on
/// success and on error alike.
pub fn apply(document: &Value, path: impl AsRef<Path>) -> Result<Vec<MetaPair>, ApplyError> {
    let mut handle =
        File::open(path).map_err(|error| ApplyError::Read(ReadError::Io(error)))?;
    apply_reader(document, &mut handle)
}

/// Apply an evaluated document against any seekable reader.
pub fn apply_reader<R: SeekRead>(
    document: &Value,
    handle: &mut R,
) -> Result<Vec<MetaPair>, ApplyError> {
    let root = match document {
        Value::Map(map) => map,
        other => {
            return Err(LangError::unpositioned(
                ErrorKind::Type,
                format!("document root must be a mapping, received {}", other.kind()),
            )
            .into());
        }
    };

    let mut ns = Namespace::new();

    // user-declared reusable formats become visible under their ids
    if let Some(types) = root.get_ident("types") {
        let types = match types {
            Value::List(items) => items,
            other => {
                return Err(LangError::unpositioned(
                    ErrorKind::Type,
                    format!("`types` must be a list, received {}", other.kind()),
                )
                .into());
            }
        };

        for (idx, entry) in types.iter().enumerate() {
            let map = as_map(entry, "type entry")?;
            let id = match map.get_ident("id") {
                None => {
                    return Err(LangError::unpositioned(
                        ErrorKind::Value,
                        format!("types[{}] is missing an `id`", idx),
                    )
                    .into());
                }
                Some(value) => match force(value.clone(), None)? {
                    Value::Ident(name) => name,
                    other => {
                        return Err(LangError::unpositioned(
                            ErrorKind::Type,
                            format!(
                                "types[{}]: `id` must be an identifier, received {}",
                                idx,
                                other.kind()
                            ),
                        )
                        .into());
                    }
                },
            };
            ns.insert(Value::Ident(id), Value::Map(map));
        }
    }

    let binary = match root.get_ident("binary") {
        Some(Value::List(items)) => items,
        Some(other) => {
            return Err(LangError::unpositioned(
                ErrorKind::Type,
                format!("`binary` must be a list, received {}", other.kind()),
            )
            .into());
        }
        None => {
            return Err(LangError::unpositioned(
                ErrorKind::Value,
                "missing key `binary` is required",
            )
            .into());
        }
    };

    let mut contents = Vec::new();
    for (idx, field) in binary.iter().enumerate() {
        refresh_file_pos(handle, &mut ns)?;

        let parsed = parse_format_type(field, &ns, None)
            .map_err(|error| with_field_context(idx, error.into()))?;
        let mut format = match parsed {
            None => continue,
            Some(format) => format,
        };

        let value = process_type(handle, &mut format, &mut ns)
            .map_err(|error| with_field_context(idx, error))?;

        if !format.id.is_empty() || !format.name.is_empty() {
            contents.push(MetaPair { field: format, value });
        }
    }

    Ok(contents)
}

fn meta_text(meta: &ValueMap, key: &str, required: bool) -> Result<Option<String>, LangError> {
    match meta.get_ident(key) {
        Some(value) => as_text(value, &format!("meta.{}", key)).map(Some),
        None if required => Err(LangError::unpositioned(
            ErrorKind::Value,
            format!("'meta' map is missing required key `{}`", key),
        )),
        None => Ok(None),
    }
}

fn meta_text_list(meta: &ValueMap, key: &str) -> Result<Vec<String>, LangError> {
    match meta.get_ident(key) {
        None => Ok(Vec::new()),
        Some(Value::List(items)) => items
            .iter()
            .enumerate()
            .map(|(idx, item)| as_text(item, &format!("meta.{}[{}]", key, idx)))
            .collect(),
        Some(other) => Err(LangError::unpositioned(
            ErrorKind::Type,
            format!("meta.{} must be a list, received {}", key, other.kind()),
        )),
    }
}

/// Pull and validate the metadata described by the `meta` key of a document.
pub fn get_metadata(document: &Value) -> Result<Meta, LangError> {
    let root = match document {
        Value::Map(map) => map,
        other => {
            return Err(LangError::unpositioned(
                ErrorKind::Type,
                format!("document root must be a mapping, received {}", other.kind()),
            ));
        }
    };

    let meta = match root.get_ident("meta") {
        Some(Value::Map(map)) => map,
        Some(other) => {
            return Err(LangError::unpositioned(
                ErrorKind::Type,
                format!("meta must be a mapping, received {}", other.kind()),
            ));
        }
        None => {
            return Err(LangError::unpositioned(
                ErrorKind::Value,
                "missing key `meta` is required",
            ));
        }
    };

    let bdf = meta_text(meta, "bdf", true)?.unwrap_or_default();
    let name = meta_text(meta, "name", true)?.unwrap_or_default();
    let doc = meta_text(meta, "doc", false)?.unwrap_or_default();

    Ok(Meta {
        version: bdf.parse()?,
        name,
        mime: meta_text_list(meta, "mime")?,
        exts: meta_text_list(meta, "exts")?,
        doc,
    })
}
