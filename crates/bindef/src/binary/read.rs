//! Assembling numeric values from raw bytes.

use num_bigint::BigInt;

use crate::value::TypeName;

/// Byte order for multi-byte reads.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// Parse the `endian` attribute of a field.
    pub fn from_name(name: &str) -> Option<Endian> {
        match name {
            "little" => Some(Endian::Little),
            "big" => Some(Endian::Big),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Endian::Little => "little",
            Endian::Big => "big",
        }
    }
}

/// The number of bytes a numeric format type occupies on disk.
pub fn width_of(ty: TypeName) -> Option<usize> {
    match ty {
        TypeName::Uint8 | TypeName::Int8 => Some(1),
        TypeName::Uint16 | TypeName::Int16 => Some(2),
        TypeName::Uint24 | TypeName::Int24 => Some(3),
        TypeName::Uint32 | TypeName::Int32 | TypeName::Float32 => Some(4),
        TypeName::Uint64 | TypeName::Int64 | TypeName::Float64 => Some(8),
        _ => None,
    }
}

/// Assemble the raw bytes into an unsigned machine word.
fn raw_from_bytes(endian: Endian, bytes: &[u8]) -> u64 {
    let mut raw: u64 = 0;
    match endian {
        Endian::Big => {
            for &byte in bytes {
                raw = (raw << 8) | u64::from(byte);
            }
        }
        Endian::Little => {
            for &byte in bytes.iter().rev() {
                raw = (raw << 8) | u64::from(byte);
            }
        }
    }
    raw
}

/// Assemble an integer of the given format type from its raw bytes.
///
/// Signed types sign-extend from the most significant bit of their width,
/// which covers `int24` the same way as the power-of-two widths.
pub fn int_from_bytes(ty: TypeName, endian: Endian, bytes: &[u8]) -> BigInt {
    let raw = raw_from_bytes(endian, bytes);
    let bits = (bytes.len() * 8) as u32;

    match ty {
        TypeName::Int8 | TypeName::Int16 | TypeName::Int24 | TypeName::Int32
        | TypeName::Int64 => {
            if bits >= 64 {
                BigInt::from(raw as i64)
            } else if raw & (1 << (bits - 1)) != 0 {
                BigInt::from(raw as i64 - (1i64 << bits))
            } else {
                BigInt::from(raw)
            }
        }
        _ => BigInt::from(raw),
    }
}

/// Assemble an IEEE-754 float of the given format type from its raw bytes.
/// `None` when `ty` is not a float type.
pub fn float_from_bytes(ty: TypeName, endian: Endian, bytes: &[u8]) -> Option<f64> {
    match ty {
        TypeName::Float32 => Some(f64::from(f32::from_bits(
            raw_from_bytes(endian, bytes) as u32
        ))),
        TypeName::Float64 => Some(f64::from_bits(raw_from_bytes(endian, bytes))),
        _ => None,
    }
}
