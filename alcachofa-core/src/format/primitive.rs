//! Low-level reading conventions shared by the EMC and COD formats.
//!
//! All integers are little-endian. Structure names are prefixed with a
//! variable-width length: one byte, or `0xFF` followed by a `u16`, or
//! `0xFF 0xFFFF` followed by a `u32`.

use std::io::{self, BufRead, Read, Seek, SeekFrom};

use alcachofa_nls::{Decoder, TextDecoder};
use byteorder::{LittleEndian, ReadBytesExt};

pub trait ReadExt: Read {
    fn read_var_uint(&mut self) -> io::Result<u32> {
        let b = self.read_u8()?;
        if b != 0xFF {
            return Ok(b as u32);
        }
        let s = self.read_u16::<LittleEndian>()?;
        if s != 0xFFFF {
            return Ok(s as u32);
        }
        self.read_u32::<LittleEndian>()
    }

    /// Read exactly `len` bytes without trusting `len` for the allocation up front.
    fn read_byte_vec(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        Read::take(&mut *self, len as u64).read_to_end(&mut buf)?;
        if buf.len() != len {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        Ok(buf)
    }

    fn read_var_string(&mut self, nls: &Decoder) -> io::Result<String> {
        let len = self.read_var_uint()? as usize;
        let raw = self.read_byte_vec(len)?;
        Ok(nls.decode(&raw).into_owned())
    }

    /// String as written by the legacy toolchain's .NET serializer:
    /// 7-bit-encoded length followed by UTF-8 bytes.
    fn read_7bit_string(&mut self) -> io::Result<String> {
        let mut len: u32 = 0;
        let mut shift = 0;
        loop {
            let b = self.read_u8()?;
            len |= ((b & 0x7F) as u32) << shift;
            if b & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift > 28 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "7-bit encoded string length is too long",
                ));
            }
        }
        let raw = self.read_byte_vec(len as usize)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}

impl<R: Read + ?Sized> ReadExt for R {}

/// Look at the next byte without consuming it.
pub fn peek_u8<R: BufRead + ?Sized>(rdr: &mut R) -> io::Result<Option<u8>> {
    Ok(rdr.fill_buf()?.first().copied())
}

/// Skip `len` bytes forward.
pub fn skip<R: Seek + ?Sized>(rdr: &mut R, len: u64) -> io::Result<u64> {
    rdr.seek(SeekFrom::Current(len as i64))
}

/// Read a list whose elements are each preceded by a non-zero tag byte; a zero tag ends it.
pub fn read_tagged_list<R, T, E, F>(rdr: &mut R, mut read_element: F) -> Result<Vec<T>, E>
where
    R: Read + ?Sized,
    E: From<io::Error>,
    F: FnMut(u8, &mut R) -> Result<T, E>,
{
    let mut list = Vec::new();
    loop {
        let tag = rdr.read_u8()?;
        if tag == 0 {
            return Ok(list);
        }
        list.push(read_element(tag, rdr)?);
    }
}

#[cfg(test)]
pub(crate) fn encode_var_uint(value: u32) -> Vec<u8> {
    if value < 0xFF {
        vec![value as u8]
    } else if value < 0xFFFF {
        let mut out = vec![0xFF];
        out.extend_from_slice(&(value as u16).to_le_bytes());
        out
    } else {
        let mut out = vec![0xFF, 0xFF, 0xFF];
        out.extend_from_slice(&value.to_le_bytes());
        out
    }
}
