use std::io;

use crate::format::schema::DescriptorKind;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("unknown type descriptor tag {tag} at offset 0x{offset:X}")]
    UnknownDescriptor { tag: u8, offset: u64 },

    #[error("invalid {context} tag {tag} at offset 0x{offset:X}")]
    InvalidTag {
        context: &'static str,
        tag: u8,
        offset: u64,
    },

    #[error("{context}: expected stream position 0x{expected:X}, found 0x{actual:X}")]
    StructuralMismatch {
        context: String,
        expected: u64,
        actual: u64,
    },

    #[error("could not find {kind:?} named {name:?}")]
    UnresolvedType { kind: DescriptorKind, name: String },

    #[error("collection {collection} contained a {child} which is not a {base}")]
    TypeConstraintViolation {
        collection: String,
        child: String,
        base: String,
    },

    #[error("not supported: {0}")]
    NotSupported(String),

    /// `timestamp` is absent when the generation was supplied by the caller.
    #[error("unsupported format generation (timestamp {timestamp:?})")]
    UnsupportedGeneration { timestamp: Option<u32> },

    #[error("malformed data at offset 0x{offset:X}: {reason}")]
    Malformed { offset: u64, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
