//! Codec for the Apache Thrift Compact binary protocol, as spoken by the
//! Messenger mobile clients.
//!
//! The encoding follows the upstream specification
//! (<https://github.com/apache/thrift/blob/master/doc/specs/thrift-compact-protocol.md>)
//! with one vendor extension: type tag 13 is a 32-bit little-endian float.
//!
//! Decoding is schema driven: every struct type declares an ordered table of
//! `field id -> (name, recursive kind)` which the reader uses to produce typed
//! values, skip unknown fields and report type mismatches with the dotted path
//! of the offending field.

mod error;
mod printer;
mod read;
mod spec;
mod value;
mod write;

pub use error::ThriftError;
pub use printer::pretty_print;
pub use read::ThriftReader;
pub use spec::FieldSpec;
pub use spec::Kind;
pub use spec::StructSpec;
pub use value::require;
pub use value::Fields;
pub use value::Value;
pub use write::ThriftWriter;

/// Wire type tags of the compact protocol.
///
/// Booleans are collapsed into the field header inside structs (`BoolTrue` /
/// `BoolFalse`) and must never occur outside of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TType {
    Stop,
    BoolTrue,
    BoolFalse,
    Byte,
    I16,
    I32,
    I64,
    Double,
    Binary,
    List,
    Set,
    Map,
    Struct,
    Float,
}

impl TType {
    pub(crate) fn from_nibble(nibble: u8) -> Result<TType, ThriftError> {
        Ok(match nibble {
            0 => TType::Stop,
            1 => TType::BoolTrue,
            2 => TType::BoolFalse,
            3 => TType::Byte,
            4 => TType::I16,
            5 => TType::I32,
            6 => TType::I64,
            7 => TType::Double,
            8 => TType::Binary,
            9 => TType::List,
            10 => TType::Set,
            11 => TType::Map,
            12 => TType::Struct,
            13 => TType::Float,
            other => return Err(ThriftError::UnknownType(other)),
        })
    }

    pub(crate) fn nibble(self) -> u8 {
        match self {
            TType::Stop => 0,
            TType::BoolTrue => 1,
            TType::BoolFalse => 2,
            TType::Byte => 3,
            TType::I16 => 4,
            TType::I32 => 5,
            TType::I64 => 6,
            TType::Double => 7,
            TType::Binary => 8,
            TType::List => 9,
            TType::Set => 10,
            TType::Map => 11,
            TType::Struct => 12,
            TType::Float => 13,
        }
    }

    /// Collapse the in-struct boolean variants into `BoolTrue`, which the
    /// schema tables use as the declared type for booleans.
    pub(crate) fn normalized(self) -> TType {
        match self {
            TType::BoolFalse => TType::BoolTrue,
            other => other,
        }
    }
}

/// A value that can be read from and written to a Thrift Compact stream.
pub trait ThriftStruct: Sized {
    /// The field table driving schema-based decoding.
    fn spec() -> &'static StructSpec;

    /// Build the struct from its decoded field map.
    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError>;

    /// Write the struct fields (without the trailing STOP).
    fn write_fields(&self, writer: &mut ThriftWriter);

    fn from_thrift(data: &[u8]) -> Result<Self, ThriftError> {
        let mut reader = ThriftReader::new(data);
        let mut fields = reader.read_struct(Self::spec(), "root")?;
        Self::from_fields(&mut fields)
    }

    fn to_thrift(&self) -> Vec<u8> {
        let mut writer = ThriftWriter::new();
        writer.write_struct(self);
        writer.into_bytes()
    }
}

/// Zig-zag encode a signed integer of the given bit width.
pub(crate) fn to_zigzag(val: i64, bits: u32) -> u64 {
    ((val << 1) ^ (val >> (bits - 1))) as u64 & (u64::MAX >> (64 - bits))
}

/// Undo [`to_zigzag`].
pub(crate) fn from_zigzag(val: u64) -> i64 {
    ((val >> 1) as i64) ^ -((val & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zigzag_known_values() {
        assert_eq!(to_zigzag(0, 64), 0);
        assert_eq!(to_zigzag(-1, 64), 1);
        assert_eq!(to_zigzag(1, 64), 2);
        assert_eq!(to_zigzag(-2, 64), 3);
        assert_eq!(from_zigzag(0), 0);
        assert_eq!(from_zigzag(1), -1);
        assert_eq!(from_zigzag(2), 1);
        assert_eq!(from_zigzag(3), -2);
    }

    proptest! {
        #[test]
        fn zigzag_roundtrip_i64(val in any::<i64>()) {
            prop_assert_eq!(from_zigzag(to_zigzag(val, 64)), val);
        }

        #[test]
        fn zigzag_roundtrip_i32(val in any::<i32>()) {
            prop_assert_eq!(from_zigzag(to_zigzag(val as i64, 32)) as i32, val);
        }

        #[test]
        fn zigzag_roundtrip_i16(val in any::<i16>()) {
            prop_assert_eq!(from_zigzag(to_zigzag(val as i64, 16)) as i16, val);
        }
    }
}
