//! Script containers (`.COD`): symbol tables, a string pool and a flat list
//! of stack machine operations.

mod opcode;

use std::io::{Cursor, Read};

use alcachofa_nls::Decoder;
use byteorder::{LittleEndian, ReadBytesExt};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::format::primitive::ReadExt;
use crate::format::schema::Generation;
use crate::DecodeOptions;

pub use opcode::CodOpCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CodOp {
    pub raw: i32,
    pub code: CodOpCode,
    pub arg: i32,
}

/// A string of the name pool, addressed by its byte offset within the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodString {
    pub offset: i32,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodVariable {
    pub name: String,
    /// Memory offset of the variable.
    pub offset: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodProcedure {
    pub name: String,
    /// Entry point, as an op index plus one.
    pub offset: i32,
    pub aux: i32,
}

/// A scripted entity with its own symbols, layered over the globals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodBehavior {
    pub name: String,
    pub variables: Vec<CodVariable>,
    pub procedures: Vec<CodProcedure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CodFile {
    pub generation: Generation,
    pub memory_size: i32,
    pub strings: Vec<CodString>,
    pub global_variables: Vec<CodVariable>,
    pub global_procedures: Vec<CodProcedure>,
    pub behaviors: Vec<CodBehavior>,
    pub ops: Vec<CodOp>,
}

impl CodFile {
    pub fn read<R: Read>(rdr: &mut R, generation: Generation, opts: &DecodeOptions) -> Result<Self> {
        if !generation.is_known() {
            return Err(Error::UnsupportedGeneration { timestamp: None });
        }
        let nls = &opts.nls;
        let mut pos = CountingReader { inner: rdr, pos: 0 };

        let name_blob_size = read_count(&mut pos, "name blob size")?;
        let declared_memory_size = match generation {
            Generation::V1 => None,
            _ => Some(pos.read_i32::<LittleEndian>()?),
        };
        let blob = pos.read_byte_vec(name_blob_size)?;
        let strings = split_string_pool(&blob, nls);

        let global_variables = read_variables(&mut pos, nls)?;
        let global_procedures = read_procedures(&mut pos, nls)?;

        let behavior_count = read_count(&mut pos, "behavior count")?;
        let mut behaviors = Vec::with_capacity(behavior_count.min(0x1000));
        for _ in 0..behavior_count {
            let name = pos.read_var_string(nls)?;
            let variables = read_variables(&mut pos, nls)?;
            let procedures = read_procedures(&mut pos, nls)?;
            behaviors.push(CodBehavior {
                name,
                variables,
                procedures,
            });
        }

        let op_count = read_count(&mut pos, "op count")?;
        let mut ops = Vec::with_capacity(op_count.min(0x10000));
        for _ in 0..op_count {
            let raw = pos.read_i32::<LittleEndian>()?;
            let arg = pos.read_i32::<LittleEndian>()?;
            ops.push(CodOp {
                raw,
                code: CodOpCode::from_raw(raw, generation),
                arg,
            });
        }

        let memory_size = match declared_memory_size {
            Some(size) => size,
            None => derived_memory_size(&global_variables, &behaviors, pos.pos)?,
        };

        log::debug!(
            "script: {:?}, {} strings, {} globals, {} procedures, {} behaviors, {} ops",
            generation,
            strings.len(),
            global_variables.len(),
            global_procedures.len(),
            behaviors.len(),
            ops.len()
        );

        Ok(Self {
            generation,
            memory_size,
            strings,
            global_variables,
            global_procedures,
            behaviors,
            ops,
        })
    }

    pub fn from_bytes(bytes: &[u8], generation: Generation, opts: &DecodeOptions) -> Result<Self> {
        Self::read(&mut Cursor::new(bytes), generation, opts)
    }

    /// String starting exactly at `offset` of the name pool.
    pub fn string_at(&self, offset: i32) -> Option<&str> {
        self.strings
            .binary_search_by_key(&offset, |s| s.offset)
            .ok()
            .map(|i| self.strings[i].value.as_str())
    }
}

/// V1 files carry no memory size; it ends at the highest variable slot plus a word.
fn derived_memory_size(globals: &[CodVariable], behaviors: &[CodBehavior], offset: u64) -> Result<i32> {
    let highest = globals
        .iter()
        .chain(behaviors.iter().flat_map(|b| b.variables.iter()))
        .max_by_key(|v| v.offset);
    match highest {
        None => Ok(4),
        Some(v) => v.offset.checked_add(4).ok_or_else(|| Error::Malformed {
            offset,
            reason: format!("variable {} at {} overflows the memory size", v.name, v.offset),
        }),
    }
}

/// Split a pool of NUL-terminated strings. A trailing unterminated run is kept.
fn split_string_pool(blob: &[u8], nls: &Decoder) -> Vec<CodString> {
    use alcachofa_nls::TextDecoder;

    let mut strings = Vec::new();
    let mut offset = 0usize;
    let mut rest = blob;
    while let Some(nul) = rest.iter().position(|&b| b == 0) {
        strings.push(CodString {
            offset: offset as i32,
            value: nls.decode(&rest[..nul]).into_owned(),
        });
        offset += nul + 1;
        rest = &rest[nul + 1..];
    }
    if !rest.is_empty() {
        strings.push(CodString {
            offset: offset as i32,
            value: nls.decode(rest).into_owned(),
        });
    }
    strings
}

fn read_count<R: Read>(rdr: &mut CountingReader<R>, what: &str) -> Result<usize> {
    let offset = rdr.pos;
    let count = rdr.read_i32::<LittleEndian>()?;
    usize::try_from(count).map_err(|_| Error::Malformed {
        offset,
        reason: format!("negative {}: {}", what, count),
    })
}

fn read_variables<R: Read>(rdr: &mut CountingReader<R>, nls: &Decoder) -> Result<Vec<CodVariable>> {
    let count = read_count(rdr, "variable count")?;
    let mut variables = Vec::with_capacity(count.min(0x1000));
    for _ in 0..count {
        let name = rdr.read_var_string(nls)?;
        let offset = rdr.read_i32::<LittleEndian>()?;
        variables.push(CodVariable { name, offset });
    }
    Ok(variables)
}

fn read_procedures<R: Read>(rdr: &mut CountingReader<R>, nls: &Decoder) -> Result<Vec<CodProcedure>> {
    let count = read_count(rdr, "procedure count")?;
    let mut procedures = Vec::with_capacity(count.min(0x1000));
    for _ in 0..count {
        let name = rdr.read_var_string(nls)?;
        let offset = rdr.read_i32::<LittleEndian>()?;
        let aux = rdr.read_i32::<LittleEndian>()?;
        procedures.push(CodProcedure { name, offset, aux });
    }
    Ok(procedures)
}

/// Tracks the offset consumed so far, for error reporting on plain readers.
struct CountingReader<'a, R> {
    inner: &'a mut R,
    pos: u64,
}

impl<R: Read> Read for CountingReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}
