use crate::TType;

/// An error raised while encoding or decoding Thrift Compact data.
#[derive(Debug, thiserror::Error)]
pub enum ThriftError {
    #[error("unexpected end of thrift data")]
    UnexpectedEof,

    #[error("unknown thrift type tag {0:#x}")]
    UnknownType(u8),

    #[error("varint longer than 10 bytes")]
    VarintOverflow,

    #[error("mismatching type for field {path}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        path: String,
        expected: TType,
        actual: TType,
    },

    #[error("unexpected {part} type at {path}: expected {expected:?}, got {actual:?}")]
    ContainerMismatch {
        part: &'static str,
        path: String,
        expected: TType,
        actual: TType,
    },

    #[error("failed to decode string at {path}")]
    InvalidUtf8 {
        path: String,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("missing required field {strct}.{field}")]
    MissingField {
        strct: &'static str,
        field: &'static str,
    },

    #[error("booleans can only occur inside structs")]
    BareBoolean,

    #[error("invalid value for field {strct}.{field}: {reason}")]
    InvalidValue {
        strct: &'static str,
        field: &'static str,
        reason: String,
    },
}
