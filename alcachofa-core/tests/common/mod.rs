#![allow(dead_code)]

/// Little-endian byte builder for synthetic EMC and COD images.
#[derive(Default)]
pub struct Image(pub Vec<u8>);

impl Image {
    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.0.push(v);
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// String with a one-byte length prefix.
    pub fn str(&mut self, s: &str) -> &mut Self {
        assert!(s.len() < 0xFF);
        self.0.push(s.len() as u8);
        self.0.extend_from_slice(s.as_bytes());
        self
    }

    pub fn raw(&mut self, b: &[u8]) -> &mut Self {
        self.0.extend_from_slice(b);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

pub const V1_TIMESTAMP: u32 = 80896606;
pub const V3_TIMESTAMP: u32 = 1069178032;

pub fn schema_block(timestamp: u32, descriptors: &[u8]) -> Vec<u8> {
    let mut out = Image::default();
    out.u32((descriptors.len() + 9) as u32).u32(timestamp).raw(descriptors).u8(0);
    out.0
}

/// A COD image. `ops` are raw `(opcode, arg)` pairs.
pub struct Script<'a> {
    pub strings: &'a [&'a str],
    pub globals: &'a [(&'a str, i32)],
    pub procedures: &'a [(&'a str, i32)],
    pub ops: &'a [(i32, i32)],
}

impl Script<'_> {
    pub fn build(&self, v1: bool) -> Vec<u8> {
        let blob: Vec<u8> = self
            .strings
            .iter()
            .flat_map(|s| s.bytes().chain(std::iter::once(0)))
            .collect();
        let mut b = Image::default();
        b.i32(blob.len() as i32);
        if !v1 {
            b.i32(0x100);
        }
        b.raw(&blob);
        b.i32(self.globals.len() as i32);
        for (name, offset) in self.globals {
            b.str(name).i32(*offset);
        }
        b.i32(self.procedures.len() as i32);
        for (name, offset) in self.procedures {
            b.str(name).i32(*offset).i32(0);
        }
        b.i32(0);
        b.i32(self.ops.len() as i32);
        for (code, arg) in self.ops {
            b.i32(*code).i32(*arg);
        }
        b.0
    }
}
