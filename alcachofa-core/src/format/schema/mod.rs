//! The schema block: a self-describing metadata segment at the start of every
//! EMC file that declares all object kinds the rest of the file uses.

mod descriptor;
mod index;

use std::io::{BufRead, Seek};

use alcachofa_nls::Decoder;
use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::format::primitive::{peek_u8, read_tagged_list, ReadExt};

pub use descriptor::*;
pub use index::SchemaIndex;

/// Format dialect, identified by the magic timestamp of the schema block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Generation {
    V1,
    V2,
    V3,
    Unknown,
}

impl Generation {
    pub fn from_timestamp(timestamp: u32) -> Self {
        match timestamp {
            80896606 => Generation::V1,
            6943904 | 1001862970 => Generation::V2,
            1069178032 | 1086694421 => Generation::V3,
            _ => Generation::Unknown,
        }
    }

    #[inline]
    pub fn is_known(self) -> bool {
        !matches!(self, Generation::Unknown)
    }
}

impl std::str::FromStr for Generation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v1" | "1" => Ok(Generation::V1),
            "v2" | "2" => Ok(Generation::V2),
            "v3" | "3" => Ok(Generation::V3),
            _ => Err(format!("unknown generation: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaBlock {
    pub timestamp: u32,
    pub generation: Generation,
    pub descriptors: Vec<TypeDescriptor>,
}

impl SchemaBlock {
    /// Read a schema block starting at the current stream position.
    ///
    /// The block carries its total size up front; after the descriptor list the
    /// stream must sit exactly at `start + total_size`.
    pub fn read<R: BufRead + Seek>(rdr: &mut R, nls: &Decoder) -> Result<Self> {
        let start = rdr.stream_position()?;
        let total_size = rdr.read_u32::<LittleEndian>()?;
        let timestamp = rdr.read_u32::<LittleEndian>()?;
        let descriptors = read_tagged_list(rdr, |tag, r| read_descriptor(tag, r, nls))?;

        let expected = start + total_size as u64;
        let actual = rdr.stream_position()?;
        if actual != expected {
            return Err(Error::StructuralMismatch {
                context: "end of schema block".to_string(),
                expected,
                actual,
            });
        }

        let generation = Generation::from_timestamp(timestamp);
        log::debug!(
            "schema block: {} descriptors, timestamp {} ({:?})",
            descriptors.len(),
            timestamp,
            generation
        );

        Ok(Self {
            timestamp,
            generation,
            descriptors,
        })
    }

    pub fn timestamp_as_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp as i64, 0)
    }

    /// Fail unless the timestamp identified one of the known generations.
    pub fn require_known_generation(&self) -> Result<Generation> {
        if self.generation.is_known() {
            Ok(self.generation)
        } else {
            Err(Error::UnsupportedGeneration {
                timestamp: Some(self.timestamp),
            })
        }
    }

    pub fn index(&self) -> SchemaIndex<'_> {
        SchemaIndex::new(self)
    }

    /// Kernel call signatures in declaration order. Bytecode refers to them by 1-based index.
    pub fn kernel_calls(&self) -> impl Iterator<Item = &NamedFunctionSignature> {
        self.descriptors.iter().filter_map(|d| match d {
            TypeDescriptor::Function(f) if f.kind == FunctionKind::KernelCall => Some(f),
            _ => None,
        })
    }
}

fn read_descriptor<R: BufRead + Seek>(tag: u8, rdr: &mut R, nls: &Decoder) -> Result<TypeDescriptor> {
    let Some(kind) = DescriptorKind::from_tag(tag) else {
        let offset = rdr.stream_position()?.saturating_sub(1);
        return Err(Error::UnknownDescriptor { tag, offset });
    };

    let descriptor = match kind {
        DescriptorKind::ObjectRelations => {
            let name = rdr.read_var_string(nls)?;
            let base_types = read_tagged_list(rdr, |tag, r| {
                expect_element_tag("base type", tag, r)?;
                Ok::<_, Error>(r.read_var_string(nls)?)
            })?;
            let relations = read_tagged_list(rdr, |tag, r| read_descriptor(tag, r, nls))?;
            TypeDescriptor::ObjectRelations(ObjectRelations {
                name,
                base_types,
                relations,
            })
        }
        DescriptorKind::ExternalType => {
            let name = rdr.read_var_string(nls)?;
            let unk1 = rdr.read_u8()?;
            let unk2 = rdr.read_u8()?;
            let internal_name = rdr.read_var_string(nls)?;
            let unk3 = rdr.read_u8()?;
            let unk4 = rdr.read_u32::<LittleEndian>()?;
            TypeDescriptor::ExternalType(ExternalType {
                name,
                internal_name,
                unk1,
                unk2,
                unk3,
                unk4,
            })
        }
        DescriptorKind::Relation => {
            let name = rdr.read_var_string(nls)?;
            let unk1 = rdr.read_u8()?;
            let unk2 = rdr.read_u32::<LittleEndian>()?;
            let unk3 = rdr.read_u8()?;
            TypeDescriptor::from_relation(name, unk1, unk2, unk3)
        }
        DescriptorKind::ObjectType => {
            let name = rdr.read_var_string(nls)?;
            let unk1 = rdr.read_u8()?;
            let unk2 = rdr.read_u32::<LittleEndian>()?;
            // the size byte is optional: anything above 127 already belongs to the next entry
            let size = match peek_u8(rdr)? {
                Some(b) if b <= 127 => {
                    rdr.read_u8()?;
                    Some(b)
                }
                _ => None,
            };
            TypeDescriptor::ObjectType {
                name,
                unk1,
                unk2,
                size,
            }
        }
        DescriptorKind::EnumType => {
            let name = rdr.read_var_string(nls)?;
            let members = read_tagged_list(rdr, |tag, r| {
                expect_element_tag("enum member", tag, r)?;
                let label = r.read_var_string(nls)?;
                let value = r.read_i32::<LittleEndian>()?;
                Ok::<_, Error>((label, value))
            })?;
            TypeDescriptor::EnumType(EnumType { name, members })
        }
        DescriptorKind::KernelCall => read_function(rdr, FunctionKind::KernelCall, nls)?,
        DescriptorKind::Constructor => read_function(rdr, FunctionKind::Constructor, nls)?,
        DescriptorKind::Method => read_function(rdr, FunctionKind::Method, nls)?,
        DescriptorKind::Properties => {
            let name = rdr.read_var_string(nls)?;
            let members = read_typed_value_list(rdr, nls)?;
            TypeDescriptor::Properties(Properties { name, members })
        }
        DescriptorKind::PropertiesRelation | DescriptorKind::CollectionRelation => {
            let offset = rdr.stream_position()?.saturating_sub(1);
            return Err(Error::UnknownDescriptor { tag, offset });
        }
    };
    Ok(descriptor)
}

fn expect_element_tag<R: Seek>(context: &'static str, tag: u8, rdr: &mut R) -> Result<()> {
    if tag == 1 {
        return Ok(());
    }
    let offset = rdr.stream_position()?.saturating_sub(1);
    Err(Error::InvalidTag { context, tag, offset })
}

fn read_type_ref<R: BufRead + Seek>(rdr: &mut R, nls: &Decoder) -> Result<TypeRef> {
    let unk1 = rdr.read_u8()?;
    let unk2 = rdr.read_u32::<LittleEndian>()?;
    let kind = match rdr.read_u8()? {
        TypeRefKind::SINT8 => TypeRefKind::Sint8,
        TypeRefKind::UINT8 => TypeRefKind::Uint8,
        TypeRefKind::SINT16 => TypeRefKind::Sint16,
        TypeRefKind::UINT32 => TypeRefKind::Uint32,
        TypeRefKind::STRING_REF => TypeRefKind::StringRef,
        TypeRefKind::SINT32 => TypeRefKind::Sint32,
        TypeRefKind::BOOL => TypeRefKind::Bool,
        TypeRefKind::VOID => TypeRefKind::Void,
        TypeRefKind::NAMED => {
            let name = rdr.read_var_string(nls)?;
            let param = rdr.read_u8()?;
            TypeRefKind::Named { name, param }
        }
        raw => TypeRefKind::Unknown(raw),
    };
    Ok(TypeRef { unk1, unk2, kind })
}

fn read_typed_value_list<R: BufRead + Seek>(rdr: &mut R, nls: &Decoder) -> Result<Vec<TypedValue>> {
    read_tagged_list(rdr, |tag, r| {
        expect_element_tag("typed value", tag, r)?;
        let name = r.read_var_string(nls)?;
        let ty = read_type_ref(r, nls)?;
        Ok(TypedValue { name, ty })
    })
}

fn read_function<R: BufRead + Seek>(rdr: &mut R, kind: FunctionKind, nls: &Decoder) -> Result<TypeDescriptor> {
    let name = rdr.read_var_string(nls)?;
    let return_type = read_type_ref(rdr, nls)?;
    let parameters = read_typed_value_list(rdr, nls)?;
    Ok(TypeDescriptor::Function(NamedFunctionSignature {
        kind,
        name,
        signature: FunctionSignature {
            return_type,
            parameters,
        },
    }))
}


#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn read(bytes: Vec<u8>) -> Result<SchemaBlock> {
        SchemaBlock::read(&mut Cursor::new(bytes), &Decoder::default())
    }

    #[test]
    fn generation_from_timestamp() {
        assert_eq!(Generation::from_timestamp(80896606), Generation::V1);
        assert_eq!(Generation::from_timestamp(6943904), Generation::V2);
        assert_eq!(Generation::from_timestamp(1001862970), Generation::V2);
        assert_eq!(Generation::from_timestamp(1069178032), Generation::V3);
        assert_eq!(Generation::from_timestamp(1086694421), Generation::V3);
        assert_eq!(Generation::from_timestamp(12345), Generation::Unknown);
    }

    #[test]
    fn reads_descriptor_kinds() {
        let mut d = Bytes::default();
        let mut rel = Bytes::default();
        rel.relation("_T_Base").relation("_A_Base_Hijos").relation("Otra");
        d.object_relations("Base", &[], &rel.0);
        d.u8(2).str("Pos").u8(1).u8(2).str("CPunto").u8(3).u32(4);
        d.u8(4).str("Obj").u8(0).u32(0).u8(16);
        d.u8(5).str("Color").u8(1).str("Rojo").i32(1).u8(1).str("Azul").i32(2).u8(0);
        d.u8(6).str("playSound").type_ref(0xFD).u8(1).str("name").type_ref(9).u8(0);
        d.properties("Base", &[("x", 11), ("visible", 15)]);

        let block = read(schema_block(V3_TIMESTAMP, &d.0)).unwrap();
        assert_eq!(block.generation, Generation::V3);
        let kinds: Vec<_> = block.descriptors.iter().map(|d| d.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                DescriptorKind::ObjectRelations,
                DescriptorKind::ExternalType,
                DescriptorKind::ObjectType,
                DescriptorKind::EnumType,
                DescriptorKind::KernelCall,
                DescriptorKind::Properties,
            ]
        );

        let TypeDescriptor::ObjectRelations(rel) = &block.descriptors[0] else {
            panic!("expected relations");
        };
        assert_eq!(rel.properties_relations().collect::<Vec<_>>(), vec!["Base"]);
        assert_eq!(rel.collection_relations().collect::<Vec<_>>(), vec![("Base", "Hijos")]);
        assert_eq!(rel.relations[2].kind(), DescriptorKind::Relation);

        assert_eq!(
            block.descriptors[2],
            TypeDescriptor::ObjectType {
                name: "Obj".into(),
                unk1: 0,
                unk2: 0,
                size: Some(16)
            }
        );
        let kernel: Vec<_> = block.kernel_calls().map(|k| k.name.as_str()).collect();
        assert_eq!(kernel, vec!["playSound"]);
    }

    #[test]
    fn object_type_size_is_optional() {
        let mut d = Bytes::default();
        d.u8(4).str("Obj").u8(0).u32(0);
        d.properties("P", &[]);
        let block = read(schema_block(V3_TIMESTAMP, &d.0)).unwrap();
        assert_eq!(
            block.descriptors[0],
            TypeDescriptor::ObjectType {
                name: "Obj".into(),
                unk1: 0,
                unk2: 0,
                size: None
            }
        );
        assert_eq!(block.descriptors[1].kind(), DescriptorKind::Properties);
    }

    #[test]
    fn size_mismatch_is_structural() {
        let mut d = Bytes::default();
        d.properties("P", &[]);
        let mut bytes = schema_block(V3_TIMESTAMP, &d.0);
        bytes[0] += 1;
        bytes.push(0);
        match read(bytes) {
            Err(Error::StructuralMismatch { expected, actual, .. }) => {
                assert_eq!(expected, actual + 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_descriptor_tag() {
        let bytes = schema_block(V3_TIMESTAMP, &[7]);
        match read(bytes) {
            Err(Error::UnknownDescriptor { tag: 7, offset: 8 }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn invalid_base_type_tag() {
        let mut d = Bytes::default();
        d.u8(1).str("A").u8(2).str("B").u8(0).u8(0);
        assert!(matches!(
            read(schema_block(V3_TIMESTAMP, &d.0)),
            Err(Error::InvalidTag { context: "base type", tag: 2, .. })
        ));
    }

    #[test]
    fn unknown_generation_is_rejected_on_demand() {
        let block = read(schema_block(42, &[])).unwrap();
        assert_eq!(block.generation, Generation::Unknown);
        assert!(matches!(
            block.require_known_generation(),
            Err(Error::UnsupportedGeneration { timestamp: Some(42) })
        ));
    }
}
