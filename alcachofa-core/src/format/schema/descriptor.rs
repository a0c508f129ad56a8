use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// Wire tags of the schema descriptor list, plus the two relation kinds the
/// reader derives from plain relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DescriptorKind {
    ObjectRelations,
    ExternalType,
    Relation,
    ObjectType,
    EnumType,
    KernelCall,
    Constructor,
    Method,
    Properties,
    PropertiesRelation,
    CollectionRelation,
}

impl DescriptorKind {
    pub const END_TAG: u8 = 0;

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(DescriptorKind::ObjectRelations),
            2 => Some(DescriptorKind::ExternalType),
            3 => Some(DescriptorKind::Relation),
            4 => Some(DescriptorKind::ObjectType),
            5 => Some(DescriptorKind::EnumType),
            6 => Some(DescriptorKind::KernelCall),
            17 => Some(DescriptorKind::Constructor),
            25 => Some(DescriptorKind::Method),
            0xFE => Some(DescriptorKind::Properties),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FunctionKind {
    KernelCall,
    Constructor,
    Method,
}

impl FunctionKind {
    pub fn descriptor_kind(self) -> DescriptorKind {
        match self {
            FunctionKind::KernelCall => DescriptorKind::KernelCall,
            FunctionKind::Constructor => DescriptorKind::Constructor,
            FunctionKind::Method => DescriptorKind::Method,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TypeRefKind {
    /// Wire value 0x2B is a guess and has not been seen in captured data yet.
    Sint8,
    Uint8,
    Sint16,
    Uint32,
    StringRef,
    Sint32,
    Bool,
    Void,
    /// `param` is the arity (struct arrays) or byte width (enums) of the reference.
    Named { name: String, param: u8 },
    Unknown(u8),
}

impl TypeRefKind {
    pub const SINT8: u8 = 0x2B;
    pub const UINT8: u8 = 1;
    pub const SINT16: u8 = 2;
    pub const UINT32: u8 = 4;
    pub const STRING_REF: u8 = 9;
    pub const SINT32: u8 = 11;
    pub const BOOL: u8 = 15;
    pub const VOID: u8 = 0xFD;
    pub const NAMED: u8 = 0xFF;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeRef {
    pub unk1: u8,
    pub unk2: u32,
    pub kind: TypeRefKind,
}

impl TypeRef {
    pub fn primitive(kind: TypeRefKind) -> Self {
        Self {
            unk1: 0,
            unk2: 0,
            kind,
        }
    }

    pub fn named(name: impl Into<String>, param: u8) -> Self {
        Self::primitive(TypeRefKind::Named {
            name: name.into(),
            param,
        })
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeRefKind::Named { name, param } if *param != 1 => write!(f, "{} ({:02X})", name, param)?,
            TypeRefKind::Named { name, .. } => write!(f, "{}", name)?,
            TypeRefKind::Unknown(raw) => write!(f, "UNKNOWN {}", raw)?,
            kind => write!(f, "{:?}", kind)?,
        }
        let plain = (self.unk1 == 0 && self.unk2 == 0)
            || (self.kind == TypeRefKind::StringRef && self.unk1 == 0 && self.unk2 == 0x0100_0000);
        if !plain {
            write!(f, " ({:02X}, {:08X})", self.unk1, self.unk2)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypedValue {
    pub name: String,
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionSignature {
    pub return_type: TypeRef,
    pub parameters: Vec<TypedValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedFunctionSignature {
    pub kind: FunctionKind,
    pub name: String,
    pub signature: FunctionSignature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectRelations {
    pub name: String,
    pub base_types: Vec<String>,
    pub relations: Vec<TypeDescriptor>,
}

impl ObjectRelations {
    pub fn properties_relations(&self) -> impl Iterator<Item = &str> {
        self.relations.iter().filter_map(|r| match r {
            TypeDescriptor::PropertiesRelation { group } => Some(group.as_str()),
            _ => None,
        })
    }

    pub fn collection_relations(&self) -> impl Iterator<Item = (&str, &str)> {
        self.relations.iter().filter_map(|r| match r {
            TypeDescriptor::CollectionRelation {
                element_base,
                collection_name,
            } => Some((element_base.as_str(), collection_name.as_str())),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalType {
    pub name: String,
    /// Name of the engine class that (de)serializes the value, e.g. `CRectangulos`.
    pub internal_name: String,
    pub unk1: u8,
    pub unk2: u8,
    pub unk3: u8,
    pub unk4: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumType {
    pub name: String,
    pub members: Vec<(String, i32)>,
}

impl EnumType {
    pub fn label_of(&self, value: i32) -> Option<&str> {
        self.members
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(label, _)| label.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Properties {
    pub name: String,
    pub members: Vec<TypedValue>,
}

/// One entry of a schema block. The set of kinds is fixed by the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TypeDescriptor {
    ObjectRelations(ObjectRelations),
    ExternalType(ExternalType),
    /// A relation that does not follow the properties/collection naming scheme.
    Relation {
        name: String,
        unk1: u8,
        unk2: u32,
        unk3: u8,
    },
    PropertiesRelation {
        group: String,
    },
    CollectionRelation {
        element_base: String,
        collection_name: String,
    },
    ObjectType {
        name: String,
        unk1: u8,
        unk2: u32,
        size: Option<u8>,
    },
    EnumType(EnumType),
    Function(NamedFunctionSignature),
    Properties(Properties),
}

impl TypeDescriptor {
    pub fn kind(&self) -> DescriptorKind {
        match self {
            TypeDescriptor::ObjectRelations(_) => DescriptorKind::ObjectRelations,
            TypeDescriptor::ExternalType(_) => DescriptorKind::ExternalType,
            TypeDescriptor::Relation { .. } => DescriptorKind::Relation,
            TypeDescriptor::PropertiesRelation { .. } => DescriptorKind::PropertiesRelation,
            TypeDescriptor::CollectionRelation { .. } => DescriptorKind::CollectionRelation,
            TypeDescriptor::ObjectType { .. } => DescriptorKind::ObjectType,
            TypeDescriptor::EnumType(_) => DescriptorKind::EnumType,
            TypeDescriptor::Function(f) => f.kind.descriptor_kind(),
            TypeDescriptor::Properties(_) => DescriptorKind::Properties,
        }
    }

    /// Name of the kinds that store one verbatim. Collection relations only have their parts.
    pub fn stored_name(&self) -> Option<&str> {
        match self {
            TypeDescriptor::ObjectRelations(o) => Some(&o.name),
            TypeDescriptor::ExternalType(e) => Some(&e.name),
            TypeDescriptor::Relation { name, .. } => Some(name),
            TypeDescriptor::PropertiesRelation { group } => Some(group),
            TypeDescriptor::CollectionRelation { .. } => None,
            TypeDescriptor::ObjectType { name, .. } => Some(name),
            TypeDescriptor::EnumType(e) => Some(&e.name),
            TypeDescriptor::Function(f) => Some(&f.name),
            TypeDescriptor::Properties(p) => Some(&p.name),
        }
    }

    /// Plain relations named `_T_<group>` or `_A_<base>_<name>` with the marker
    /// flags `(0, 0, 0xFD)` are properties and collection relations.
    pub fn from_relation(name: String, unk1: u8, unk2: u32, unk3: u8) -> Self {
        if unk1 == 0 && unk2 == 0 && unk3 == 0xFD {
            if let Some(group) = name.strip_prefix("_T_").filter(|g| !g.is_empty()) {
                return TypeDescriptor::PropertiesRelation {
                    group: group.to_string(),
                };
            }
            if let Some((element_base, collection_name)) = split_collection_name(&name) {
                return TypeDescriptor::CollectionRelation {
                    element_base: element_base.to_string(),
                    collection_name: collection_name.to_string(),
                };
            }
        }
        TypeDescriptor::Relation {
            name,
            unk1,
            unk2,
            unk3,
        }
    }
}

fn split_collection_name(name: &str) -> Option<(&str, &str)> {
    static COLLECTION_NAME: OnceLock<Regex> = OnceLock::new();
    let re = COLLECTION_NAME
        .get_or_init(|| Regex::new(r"^_A_([a-zA-Z]+)_([a-zA-Z]+)$").expect("collection name pattern"));
    let caps = re.captures(name)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}
