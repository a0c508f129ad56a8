//! This crate implements the core functionality of the Alcachofa toolkit
//!
//! This mostly includes the self-describing EMC resource format and the COD
//! bytecode format together with a decompiler for the latter.

#![allow(clippy::uninlined_format_args)]

pub mod decompiler;
pub mod error;
pub mod format;

pub use decompiler::{decompile, DecompileOptions};
pub use error::{Error, Result};
pub use format::cod::CodFile;
pub use format::emc::EmcFile;
pub use format::schema::{Generation, SchemaBlock, SchemaIndex};

pub use alcachofa_nls::{Decoder, Encoding};

/// Options shared by the EMC and COD readers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    /// Decoder for the single-byte strings stored in both formats.
    pub nls: Decoder,
}
