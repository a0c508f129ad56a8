//! Object graph files (`.EMC`): a schema block followed by one root object
//! whose shape is entirely described by that schema.

mod value;

use std::io::{BufRead, Cursor, Read, Seek, SeekFrom};

use alcachofa_nls::Decoder;
use byteorder::{LittleEndian, ReadBytesExt};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::format::cod::CodFile;
use crate::format::primitive::{skip, ReadExt};
use crate::format::schema::{
    DescriptorKind, EnumType, ExternalType, Generation, ObjectRelations, Properties, SchemaBlock, SchemaIndex,
    TypeDescriptor, TypeRef, TypeRefKind,
};
use crate::DecodeOptions;

pub use value::*;

/// Points per polygon of the floor meshes.
pub const REGULAR_POINT_COUNT: usize = 4;

#[derive(Debug, Clone, Serialize)]
pub struct EmcFile {
    pub schema: SchemaBlock,
    pub root: EmcObject,
    pub embedded_files: Vec<EmcEmbeddedFile>,
}

impl EmcFile {
    pub fn read<R: BufRead + Seek>(rdr: &mut R, opts: &DecodeOptions) -> Result<Self> {
        let schema = SchemaBlock::read(rdr, &opts.nls)?;
        let generation = schema.require_known_generation()?;

        let index = schema.index();
        let mut reader = ObjectReader {
            rdr,
            index: &index,
            nls: &opts.nls,
            generation,
            embedded_files: Vec::new(),
        };
        let root = reader.read_object()?;
        let embedded_files = reader.embedded_files;

        log::debug!(
            "decoded {} root object {:?} with {} embedded files",
            root.type_name,
            root.name,
            embedded_files.len()
        );

        Ok(Self {
            schema,
            root,
            embedded_files,
        })
    }

    pub fn from_bytes(bytes: &[u8], opts: &DecodeOptions) -> Result<Self> {
        Self::read(&mut Cursor::new(bytes), opts)
    }

    #[inline]
    pub fn generation(&self) -> Generation {
        self.schema.generation
    }

    /// Payload of an embedded file, sliced out of the bytes this file was decoded from.
    pub fn embedded_bytes<'b>(&self, file: &EmcEmbeddedFile, bytes: &'b [u8]) -> Result<&'b [u8]> {
        let start = file.offset as usize;
        let end = start.checked_add(file.size as usize);
        match end {
            Some(end) if end <= bytes.len() => Ok(&bytes[start..end]),
            _ => Err(Error::Malformed {
                offset: file.offset,
                reason: format!("embedded file {} extends past the end of the data", file.name),
            }),
        }
    }

    /// Decode every embedded `.cod` file as a script of this file's generation.
    pub fn embedded_scripts(&self, bytes: &[u8], opts: &DecodeOptions) -> Result<Vec<(String, CodFile)>> {
        self.embedded_files
            .iter()
            .filter(|f| f.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("cod")))
            .map(|f| {
                let data = self.embedded_bytes(f, bytes)?;
                let cod = CodFile::from_bytes(data, self.generation(), opts)?;
                Ok((f.name.clone(), cod))
            })
            .collect()
    }
}

struct ObjectReader<'r, 'i, 's, R> {
    rdr: &'r mut R,
    index: &'i SchemaIndex<'s>,
    nls: &'i Decoder,
    generation: Generation,
    embedded_files: Vec<EmcEmbeddedFile>,
}

impl<'r, 'i, 's, R: BufRead + Seek> ObjectReader<'r, 'i, 's, R> {
    fn read_object(&mut self) -> Result<EmcObject> {
        let type_name = self.rdr.read_var_string(self.nls)?;
        let relations = self.index.object_relations(&type_name)?;
        let name = self.rdr.read_var_string(self.nls)?;

        let mut properties = Vec::new();
        self.read_object_properties(relations, &mut Vec::new(), &mut properties)?;
        let mut collections = Vec::new();
        self.read_object_collections(relations, &mut Vec::new(), &mut collections)?;

        Ok(EmcObject {
            type_name: relations.name.clone(),
            name,
            properties,
            collections,
        })
    }

    /// Push `relations` onto the current base path, failing if it is already on it.
    ///
    /// Only a repeat on the path is a cycle; a shared ancestor reached twice is fine.
    fn enter_base(&mut self, relations: &'s ObjectRelations, path: &mut Vec<&'s str>) -> Result<()> {
        if path.contains(&relations.name.as_str()) {
            let offset = self.rdr.stream_position()?;
            return Err(Error::Malformed {
                offset,
                reason: format!("base type cycle: {} -> {}", path.join(" -> "), relations.name),
            });
        }
        path.push(&relations.name);
        Ok(())
    }

    /// Properties of all bases come first, depth-first, each occurrence read again.
    fn read_object_properties(
        &mut self,
        relations: &'s ObjectRelations,
        path: &mut Vec<&'s str>,
        out: &mut Vec<EmcProperty>,
    ) -> Result<()> {
        self.enter_base(relations, path)?;
        for base in &relations.base_types {
            let base = self.index.object_relations(base)?;
            self.read_object_properties(base, path, out)?;
        }
        path.pop();
        for group in relations.properties_relations() {
            let properties = self.index.properties(group)?;
            self.read_properties(properties, out)?;
        }
        Ok(())
    }

    fn read_object_collections(
        &mut self,
        relations: &'s ObjectRelations,
        path: &mut Vec<&'s str>,
        out: &mut Vec<EmcCollection>,
    ) -> Result<()> {
        self.enter_base(relations, path)?;
        for base in &relations.base_types {
            let base = self.index.object_relations(base)?;
            self.read_object_collections(base, path, out)?;
        }
        path.pop();
        for (element_base, collection_name) in relations.collection_relations() {
            let collection = self.read_collection(element_base, collection_name)?;
            out.push(collection);
        }
        Ok(())
    }

    /// Children are prefixed with the absolute offset their encoding ends at; 0 ends the collection.
    fn read_collection(&mut self, element_base: &str, collection_name: &str) -> Result<EmcCollection> {
        let mut elements = Vec::new();
        loop {
            let end_of_object = self.rdr.read_u32::<LittleEndian>()?;
            if end_of_object == 0 {
                break;
            }
            let child = self.read_object()?;

            let actual = self.rdr.stream_position()?;
            if actual != end_of_object as u64 {
                return Err(Error::StructuralMismatch {
                    context: format!("end of {} in collection {}", child.type_name, collection_name),
                    expected: end_of_object as u64,
                    actual,
                });
            }
            if !self.index.is_base_type(&child.type_name, element_base) {
                return Err(Error::TypeConstraintViolation {
                    collection: collection_name.to_string(),
                    child: child.type_name,
                    base: element_base.to_string(),
                });
            }
            elements.push(child);
        }
        Ok(EmcCollection {
            name: collection_name.to_string(),
            base_type: element_base.to_string(),
            elements,
        })
    }

    fn read_properties(&mut self, properties: &'s Properties, out: &mut Vec<EmcProperty>) -> Result<()> {
        for member in &properties.members {
            let value = self.read_value(&member.ty)?;
            out.push(EmcProperty {
                name: member.name.clone(),
                ty: member.ty.clone(),
                value,
            });
        }
        Ok(())
    }

    fn read_value(&mut self, ty: &TypeRef) -> Result<EmcValue> {
        let value = match &ty.kind {
            TypeRefKind::Sint8 => EmcValue::Sint8(self.rdr.read_i8()?),
            TypeRefKind::Uint8 => EmcValue::Uint8(self.rdr.read_u8()?),
            TypeRefKind::Sint16 => EmcValue::Sint16(self.rdr.read_i16::<LittleEndian>()?),
            TypeRefKind::Sint32 => EmcValue::Sint32(self.rdr.read_i32::<LittleEndian>()?),
            TypeRefKind::Uint32 => EmcValue::Uint32(self.rdr.read_u32::<LittleEndian>()?),
            TypeRefKind::StringRef => EmcValue::StringRef(self.rdr.read_u32::<LittleEndian>()?),
            TypeRefKind::Bool => EmcValue::Bool(self.rdr.read_u8()? != 0),
            TypeRefKind::Named { name, param } => self.read_named_value(name, *param)?,
            TypeRefKind::Void | TypeRefKind::Unknown(_) => {
                return Err(Error::NotSupported(format!("value of type {}", ty)));
            }
        };
        Ok(value)
    }

    /// Named types resolve as external type, then enum, then properties group.
    fn read_named_value(&mut self, name: &str, param: u8) -> Result<EmcValue> {
        let index = self.index;
        if let Some(TypeDescriptor::ExternalType(external)) = index.by_name(DescriptorKind::ExternalType, name) {
            return self.read_external_value(external);
        }
        if let Some(TypeDescriptor::EnumType(enum_type)) = index.by_name(DescriptorKind::EnumType, name) {
            return self.read_enum_value(enum_type, param);
        }
        if let Some(TypeDescriptor::Properties(properties)) = index.by_name(DescriptorKind::Properties, name) {
            return self.read_struct_value(properties, param);
        }
        Err(Error::NotSupported(format!("named value type {} ({})", name, param)))
    }

    fn read_enum_value(&mut self, enum_type: &EnumType, width: u8) -> Result<EmcValue> {
        if width != 4 {
            return Err(Error::NotSupported(format!(
                "enumeration {} of width {}",
                enum_type.name, width
            )));
        }
        let value = self.rdr.read_i32::<LittleEndian>()?;
        let label = match enum_type.label_of(value) {
            Some(label) => label.to_string(),
            None => {
                log::warn!("undeclared value {} of enumeration {}", value, enum_type.name);
                format!("Unknown({})", value)
            }
        };
        Ok(EmcValue::Enum(EmcEnumeration {
            value,
            type_name: enum_type.name.clone(),
            label,
        }))
    }

    fn read_struct_value(&mut self, properties: &'s Properties, count: u8) -> Result<EmcValue> {
        match count {
            0 => Err(Error::NotSupported(format!("array of zero {} structs", properties.name))),
            1 => Ok(EmcValue::Struct(self.read_struct(properties)?)),
            n => {
                let elements = (0..n)
                    .map(|_| self.read_struct(properties))
                    .collect::<Result<Vec<_>>>()?;
                Ok(EmcValue::StructArray(elements))
            }
        }
    }

    fn read_struct(&mut self, properties: &'s Properties) -> Result<EmcStruct> {
        let mut members = Vec::new();
        self.read_properties(properties, &mut members)?;
        Ok(EmcStruct {
            type_name: properties.name.clone(),
            properties: members,
        })
    }

    fn read_external_value(&mut self, external: &ExternalType) -> Result<EmcValue> {
        let v1 = self.generation == Generation::V1;
        let value = match external.internal_name.as_str() {
            "CArchivo" if v1 => EmcValue::Archive(self.read_archive_v1()?),
            "CAnimacion" if v1 => EmcValue::String(self.read_animation_v1()?),
            "CArchivo" | "CAnimacion" | "CString" => EmcValue::String(self.rdr.read_var_string(self.nls)?),
            "CPunto" => {
                let offset = self.rdr.stream_position()?;
                let shape = self.read_shape()?;
                let point = shape
                    .polygons
                    .first()
                    .and_then(|p| p.points.first())
                    .copied()
                    .ok_or_else(|| Error::Malformed {
                        offset,
                        reason: "point stored as an empty shape".to_string(),
                    })?;
                EmcValue::Point(point)
            }
            "CRectangulo" => {
                let offset = self.rdr.stream_position()?;
                let shape = self.read_shape()?;
                let polygon = shape.polygons.into_iter().next().ok_or_else(|| Error::Malformed {
                    offset,
                    reason: "rectangle stored as an empty shape".to_string(),
                })?;
                EmcValue::Polygon(polygon)
            }
            "CRectangulos" => EmcValue::Shape(self.read_shape()?),
            "CSuelos" => EmcValue::PathFindingShape(self.read_path_finding_shape()?),
            "CSuelosConColor" => EmcValue::ColoredShape(self.read_colored_shape()?),
            "CGrafico" => EmcValue::Struct(self.read_graphic()?),
            other => return Err(Error::NotSupported(format!("external type {} ({})", external.name, other))),
        };
        Ok(value)
    }

    fn read_point(&mut self) -> Result<EmcPoint> {
        let x = self.rdr.read_i32::<LittleEndian>()?;
        let y = self.rdr.read_i32::<LittleEndian>()?;
        Ok(EmcPoint { x, y })
    }

    fn read_polygon(&mut self, point_count: usize) -> Result<EmcPolygon> {
        let points = (0..point_count)
            .map(|_| self.read_point())
            .collect::<Result<Vec<_>>>()?;
        Ok(EmcPolygon { points })
    }

    fn read_shape(&mut self) -> Result<EmcShape> {
        let offset = self.rdr.stream_position()?;
        // None: every polygon carries its own point count
        let points_per_polygon = match self.rdr.read_u8()? {
            0 => Some(1),
            1 => Some(2),
            2 => Some(4),
            3 => None,
            complexity => {
                return Err(Error::Malformed {
                    offset,
                    reason: format!("invalid shape complexity {}", complexity),
                })
            }
        };
        let polygon_count = self.rdr.read_u16::<LittleEndian>()?;
        let mut polygons = Vec::with_capacity(polygon_count as usize);
        for _ in 0..polygon_count {
            let point_count = match points_per_polygon {
                Some(n) => n,
                None => self.rdr.read_u8()? as usize,
            };
            polygons.push(self.read_polygon(point_count)?);
        }
        Ok(EmcShape { polygons })
    }

    fn read_path_finding_shape(&mut self) -> Result<EmcPathFindingShape> {
        let polygon_count = self.rdr.read_u16::<LittleEndian>()? as usize;
        let mut shape = EmcPathFindingShape {
            polygons: Vec::with_capacity(polygon_count),
            point_depths: Vec::with_capacity(polygon_count * REGULAR_POINT_COUNT),
            polygon_orders: Vec::with_capacity(polygon_count),
        };
        for _ in 0..polygon_count {
            shape.polygons.push(self.read_polygon(REGULAR_POINT_COUNT)?);
            shape.polygon_orders.push(self.rdr.read_i8()?);
            for _ in 0..REGULAR_POINT_COUNT {
                shape.point_depths.push(self.rdr.read_u8()?);
            }
        }
        Ok(shape)
    }

    fn read_colored_shape(&mut self) -> Result<EmcColoredShape> {
        let polygon_count = self.rdr.read_u16::<LittleEndian>()? as usize;
        let mut shape = EmcColoredShape {
            polygons: Vec::with_capacity(polygon_count),
            point_brightnesses: Vec::with_capacity(polygon_count * REGULAR_POINT_COUNT),
            point_colors: Vec::with_capacity(polygon_count * REGULAR_POINT_COUNT),
            polygon_unknowns: Vec::with_capacity(polygon_count),
        };
        for _ in 0..polygon_count {
            shape.polygons.push(self.read_polygon(REGULAR_POINT_COUNT)?);
            for _ in 0..REGULAR_POINT_COUNT {
                shape.point_brightnesses.push(self.rdr.read_u8()?);
            }
            for _ in 0..REGULAR_POINT_COUNT {
                let mut rgba = [0u8; 4];
                self.rdr.read_exact(&mut rgba)?;
                shape.point_colors.push(rgba);
            }
            shape.polygon_unknowns.push(self.rdr.read_u8()?);
        }
        Ok(shape)
    }

    /// Graphic placement: position, draw order and the animation to show.
    fn read_graphic(&mut self) -> Result<EmcStruct> {
        let x = self.rdr.read_i16::<LittleEndian>()?;
        let y = self.rdr.read_i16::<LittleEndian>()?;
        let z = self.rdr.read_i16::<LittleEndian>()?;
        let order = self.rdr.read_i8()?;
        let animation = self.rdr.read_var_string(self.nls)?;

        let prop = |name: &str, ty: TypeRef, value: EmcValue| EmcProperty {
            name: name.to_string(),
            ty,
            value,
        };
        Ok(EmcStruct {
            type_name: "CGrafico".to_string(),
            properties: vec![
                prop("x", TypeRef::primitive(TypeRefKind::Sint16), EmcValue::Sint16(x)),
                prop("y", TypeRef::primitive(TypeRefKind::Sint16), EmcValue::Sint16(y)),
                prop("z", TypeRef::primitive(TypeRefKind::Sint16), EmcValue::Sint16(z)),
                prop("order", TypeRef::primitive(TypeRefKind::Sint8), EmcValue::Sint8(order)),
                prop("animacion", TypeRef::named("CAnimacion", 1), EmcValue::String(animation)),
            ],
        })
    }

    fn read_archive_v1(&mut self) -> Result<EmcArchive> {
        let name = self.rdr.read_var_string(self.nls)?;
        let total_size = self.rdr.read_u32::<LittleEndian>()?;
        let end = self.rdr.stream_position()? + total_size as u64;
        let unk1 = self.rdr.read_u8()?;
        let unk2 = self.rdr.read_u8()?;
        let file_count = self.rdr.read_u32::<LittleEndian>()?;

        for _ in 0..file_count {
            let base = self.rdr.read_var_string(self.nls)?;
            let ext = self.rdr.read_var_string(self.nls)?;
            let size = self.rdr.read_u32::<LittleEndian>()?;
            let offset = self.rdr.stream_position()?;
            self.embedded_files.push(EmcEmbeddedFile {
                name: format!("{}.{}", base, ext),
                offset,
                size,
            });
            skip(self.rdr, size as u64)?;
        }

        let position = self.rdr.stream_position()?;
        if position > end {
            return Err(Error::Malformed {
                offset: position,
                reason: format!("archive {} holds more files than its declared size", name),
            });
        }
        self.rdr.seek(SeekFrom::Start(end))?;

        Ok(EmcArchive {
            name,
            total_size,
            unk1,
            unk2,
            file_count,
        })
    }

    fn read_animation_v1(&mut self) -> Result<String> {
        let name = self.rdr.read_7bit_string()?;
        let size = self.rdr.read_u32::<LittleEndian>()?;
        let offset = self.rdr.stream_position()?;
        self.embedded_files.push(EmcEmbeddedFile {
            name: name.clone(),
            offset,
            size,
        });
        skip(self.rdr, size as u64)?;
        Ok(name)
    }
}
