use serde::Serialize;

use crate::format::schema::TypeRef;

/// Position of a file stored inline in a V1 resource file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmcEmbeddedFile {
    pub name: String,
    /// Absolute offset of the payload within the resource file.
    pub offset: u64,
    pub size: u32,
}

impl EmcEmbeddedFile {
    pub fn extension(&self) -> Option<&str> {
        self.name.rsplit_once('.').map(|(_, ext)| ext)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmcObject {
    pub type_name: String,
    pub name: String,
    pub properties: Vec<EmcProperty>,
    pub collections: Vec<EmcCollection>,
}

impl EmcObject {
    pub fn property(&self, name: &str) -> Option<&EmcProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn collection(&self, name: &str) -> Option<&EmcCollection> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// Depth-first walk over this object and all its descendants.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a EmcObject)) {
        f(self);
        for child in self.collections.iter().flat_map(|c| c.elements.iter()) {
            child.walk(f);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmcCollection {
    pub name: String,
    pub base_type: String,
    pub elements: Vec<EmcObject>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmcProperty {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeRef,
    pub value: EmcValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value")]
pub enum EmcValue {
    Sint8(i8),
    Uint8(u8),
    Sint16(i16),
    Sint32(i32),
    Uint32(u32),
    /// Index into an external string table.
    StringRef(u32),
    Bool(bool),
    String(String),
    Enum(EmcEnumeration),
    Struct(EmcStruct),
    StructArray(Vec<EmcStruct>),
    Point(EmcPoint),
    Polygon(EmcPolygon),
    Shape(EmcShape),
    PathFindingShape(EmcPathFindingShape),
    ColoredShape(EmcColoredShape),
    Archive(EmcArchive),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmcEnumeration {
    pub value: i32,
    pub type_name: String,
    /// Declared label, or `Unknown(<value>)` for undeclared values.
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmcStruct {
    pub type_name: String,
    pub properties: Vec<EmcProperty>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EmcPoint {
    pub x: i32,
    pub y: i32,
}

impl std::fmt::Display for EmcPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmcPolygon {
    pub points: Vec<EmcPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmcShape {
    pub polygons: Vec<EmcPolygon>,
}

/// Walkable floor: quads with a draw order each and a depth per point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmcPathFindingShape {
    pub polygons: Vec<EmcPolygon>,
    pub point_depths: Vec<u8>,
    pub polygon_orders: Vec<i8>,
}

/// Lit floor: quads with brightness and RGBA color per point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmcColoredShape {
    pub polygons: Vec<EmcPolygon>,
    pub point_brightnesses: Vec<u8>,
    pub point_colors: Vec<[u8; 4]>,
    pub polygon_unknowns: Vec<u8>,
}

/// Header of an inline V1 archive; the contained files are listed in
/// [`super::EmcFile::embedded_files`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmcArchive {
    pub name: String,
    pub total_size: u32,
    pub unk1: u8,
    pub unk2: u8,
    pub file_count: u32,
}
