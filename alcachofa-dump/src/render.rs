//! Text rendering of decoded schemas, object graphs and scripts.

use std::io::{Result as IoResult, Write};

use alcachofa_core::decompiler::{Statement, StatementKind};
use alcachofa_core::format::cod::{CodFile, CodProcedure, CodVariable};
use alcachofa_core::format::emc::{EmcCollection, EmcObject, EmcProperty, EmcStruct, EmcValue};
use alcachofa_core::format::schema::{FunctionKind, SchemaBlock, TypeDescriptor, TypedValue};

const INDENT: &str = "    ";

pub fn write_schema<W: Write>(w: &mut W, schema: &SchemaBlock) -> IoResult<()> {
    write!(w, "Timestamp: {}", schema.timestamp)?;
    if let Some(time) = schema.timestamp_as_time() {
        write!(w, " ({})", time.format("%Y-%m-%d %H:%M:%S"))?;
    }
    writeln!(w)?;
    writeln!(w, "Generation: {:?}", schema.generation)?;
    writeln!(w)?;

    for descriptor in &schema.descriptors {
        write_descriptor(w, descriptor, "")?;
    }
    Ok(())
}

fn typed_values(values: &[TypedValue]) -> String {
    values
        .iter()
        .map(|v| format!("{} {}", v.ty, v.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn write_descriptor<W: Write>(w: &mut W, descriptor: &TypeDescriptor, indent: &str) -> IoResult<()> {
    match descriptor {
        TypeDescriptor::ObjectRelations(rel) => {
            write!(w, "{}relations {}", indent, rel.name)?;
            if !rel.base_types.is_empty() {
                write!(w, " : {}", rel.base_types.join(", "))?;
            }
            writeln!(w, " {{")?;
            let inner = format!("{}{}", indent, INDENT);
            for relation in &rel.relations {
                write_descriptor(w, relation, &inner)?;
            }
            writeln!(w, "{}}}", indent)?;
        }
        TypeDescriptor::ExternalType(ext) => writeln!(
            w,
            "{}external {} = {} ({:02X}, {:02X}, {:02X}, {:08X})",
            indent, ext.name, ext.internal_name, ext.unk1, ext.unk2, ext.unk3, ext.unk4
        )?,
        TypeDescriptor::Relation { name, unk1, unk2, unk3 } => writeln!(
            w,
            "{}relation {} ({:02X}, {:08X}, {:02X})",
            indent, name, unk1, unk2, unk3
        )?,
        TypeDescriptor::PropertiesRelation { group } => writeln!(w, "{}properties {}", indent, group)?,
        TypeDescriptor::CollectionRelation {
            element_base,
            collection_name,
        } => writeln!(w, "{}collection {} of {}", indent, collection_name, element_base)?,
        TypeDescriptor::ObjectType { name, unk1, unk2, size } => {
            write!(w, "{}object {} ({:02X}, {:08X})", indent, name, unk1, unk2)?;
            if let Some(size) = size {
                write!(w, " size {}", size)?;
            }
            writeln!(w)?;
        }
        TypeDescriptor::EnumType(e) => {
            writeln!(w, "{}enum {} {{", indent, e.name)?;
            for (label, value) in &e.members {
                writeln!(w, "{}{}{} = {}", indent, INDENT, label, value)?;
            }
            writeln!(w, "{}}}", indent)?;
        }
        TypeDescriptor::Function(f) => {
            let kind = match f.kind {
                FunctionKind::KernelCall => "kernel",
                FunctionKind::Constructor => "constructor",
                FunctionKind::Method => "method",
            };
            writeln!(
                w,
                "{}{} {} {}({})",
                indent,
                kind,
                f.signature.return_type,
                f.name,
                typed_values(&f.signature.parameters)
            )?;
        }
        TypeDescriptor::Properties(p) => {
            writeln!(w, "{}properties {} {{", indent, p.name)?;
            for member in &p.members {
                writeln!(w, "{}{}{} : {}", indent, INDENT, member.name, member.ty)?;
            }
            writeln!(w, "{}}}", indent)?;
        }
    }
    Ok(())
}

pub fn write_object<W: Write>(w: &mut W, object: &EmcObject, indent: &str) -> IoResult<()> {
    if object.properties.is_empty() && object.collections.is_empty() {
        return writeln!(w, "{} {} {{}}", object.type_name, object.name);
    }
    writeln!(w, "{} {} {{", object.type_name, object.name)?;
    let inner = format!("{}{}", indent, INDENT);
    for property in &object.properties {
        write_property(w, property, &inner)?;
    }
    if !object.properties.is_empty() && !object.collections.is_empty() {
        writeln!(w)?;
    }
    for collection in &object.collections {
        write_collection(w, collection, &inner)?;
    }
    writeln!(w, "{}}}", indent)
}

fn write_collection<W: Write>(w: &mut W, collection: &EmcCollection, indent: &str) -> IoResult<()> {
    if collection.elements.is_empty() {
        return writeln!(w, "{}{} ({}) []", indent, collection.name, collection.base_type);
    }
    writeln!(w, "{}{} ({}) [", indent, collection.name, collection.base_type)?;
    let inner = format!("{}{}", indent, INDENT);
    for (i, element) in collection.elements.iter().enumerate() {
        if i > 0 {
            writeln!(w)?;
        }
        write!(w, "{}- ", inner)?;
        write_object(w, element, &inner)?;
    }
    writeln!(w, "{}]", indent)
}

fn write_property<W: Write>(w: &mut W, property: &EmcProperty, indent: &str) -> IoResult<()> {
    writeln!(
        w,
        "{}{} : {} = {}",
        indent,
        property.name,
        property.ty,
        value_text(&property.value, indent)
    )
}

fn block<I: IntoIterator<Item = String>>(items: I, indent: &str) -> String {
    let inner = format!("{}{}", indent, INDENT);
    let lines: Vec<String> = items
        .into_iter()
        .enumerate()
        .map(|(i, item)| format!("{}{}: {}\n", inner, i, item))
        .collect();
    if lines.is_empty() {
        "[]".to_string()
    } else {
        format!("[\n{}{}]", lines.concat(), indent)
    }
}

fn struct_text(s: &EmcStruct, indent: &str) -> String {
    if s.properties.is_empty() {
        return "{}".to_string();
    }
    let inner = format!("{}{}", indent, INDENT);
    let mut out = String::from("{\n");
    for p in &s.properties {
        out.push_str(&format!("{}{} : {} = {}\n", inner, p.name, p.ty, value_text(&p.value, &inner)));
    }
    out.push_str(indent);
    out.push('}');
    out
}

/// Rendered value; continuation lines are indented relative to `indent`.
pub fn value_text(value: &EmcValue, indent: &str) -> String {
    let inner = format!("{}{}", indent, INDENT);
    match value {
        EmcValue::Sint8(v) => v.to_string(),
        EmcValue::Uint8(v) => v.to_string(),
        EmcValue::Sint16(v) => v.to_string(),
        EmcValue::Sint32(v) => v.to_string(),
        EmcValue::Uint32(v) => v.to_string(),
        EmcValue::StringRef(v) => v.to_string(),
        EmcValue::Bool(v) => v.to_string(),
        EmcValue::String(s) => format!("\"{}\"", s),
        EmcValue::Enum(e) => format!("\"{}\" ({})", e.label, e.value),
        EmcValue::Struct(s) => struct_text(s, indent),
        EmcValue::StructArray(items) => block(items.iter().map(|s| struct_text(s, &inner)), indent),
        EmcValue::Point(p) => p.to_string(),
        EmcValue::Polygon(p) => block(p.points.iter().map(|p| p.to_string()), indent),
        EmcValue::Shape(shape) => block(
            shape
                .polygons
                .iter()
                .map(|p| block(p.points.iter().map(|p| p.to_string()), &inner)),
            indent,
        ),
        EmcValue::PathFindingShape(mesh) => {
            let mut depths = mesh.point_depths.iter();
            block(
                mesh.polygons.iter().zip(&mesh.polygon_orders).map(|(polygon, order)| {
                    let points = polygon.points.iter().map(|p| match depths.next() {
                        Some(depth) => format!("{} depth={}", p, depth),
                        None => p.to_string(),
                    });
                    format!("order={} {}", order, block(points.collect::<Vec<_>>(), &inner))
                }),
                indent,
            )
        }
        EmcValue::ColoredShape(mesh) => {
            let mut brightness = mesh.point_brightnesses.iter();
            let mut colors = mesh.point_colors.iter();
            block(
                mesh.polygons.iter().zip(&mesh.polygon_unknowns).map(|(polygon, unk)| {
                    let points = polygon.points.iter().map(|p| {
                        let b = brightness.next().copied().unwrap_or_default();
                        let [r, g, bl, a] = colors.next().copied().unwrap_or_default();
                        format!("{} brightness={} color={},{},{},{}", p, b, r, g, bl, a)
                    });
                    format!("unk={} {}", unk, block(points.collect::<Vec<_>>(), &inner))
                }),
                indent,
            )
        }
        EmcValue::Archive(a) => format!(
            "\"{}\" {} files in {}MiB ({:02X}, {:02X})",
            a.name,
            a.file_count,
            a.total_size / 1024 / 1024,
            a.unk1,
            a.unk2
        ),
    }
}

fn write_variables<W: Write>(w: &mut W, variables: &[CodVariable], indent: &str) -> IoResult<()> {
    writeln!(w, "{}Variables:", indent)?;
    for (i, v) in variables.iter().enumerate() {
        writeln!(w, "{}{}{:04}: {} = {}", indent, INDENT, i, v.name, v.offset)?;
    }
    Ok(())
}

fn write_procedures<W: Write>(w: &mut W, procedures: &[CodProcedure], indent: &str) -> IoResult<()> {
    writeln!(w, "{}Procedures:", indent)?;
    for (i, p) in procedures.iter().enumerate() {
        writeln!(w, "{}{}{:04}: {} @ {} with {}", indent, INDENT, i, p.name, p.offset, p.aux)?;
    }
    Ok(())
}

/// Script tables, followed by either the raw ops or the decompiled statements.
pub fn write_script<W: Write>(w: &mut W, cod: &CodFile, statements: Option<&[Statement]>) -> IoResult<()> {
    writeln!(w, "MemorySize: {}", cod.memory_size)?;
    writeln!(w)?;

    writeln!(w, "Strings:")?;
    for s in &cod.strings {
        writeln!(w, "{}{:05}: {}", INDENT, s.offset, s.value)?;
    }
    writeln!(w)?;

    write_variables(w, &cod.global_variables, "")?;
    writeln!(w)?;
    write_procedures(w, &cod.global_procedures, "")?;
    writeln!(w)?;

    writeln!(w, "Behaviors:")?;
    for (i, behavior) in cod.behaviors.iter().enumerate() {
        writeln!(w, "{}{:04}: {}", INDENT, i, behavior.name)?;
        write_variables(w, &behavior.variables, INDENT)?;
        write_procedures(w, &behavior.procedures, INDENT)?;
        writeln!(w)?;
    }
    writeln!(w)?;

    writeln!(w, "Ops:")?;
    match statements {
        Some(statements) => write_statements(w, statements, INDENT),
        None => {
            for (i, op) in cod.ops.iter().enumerate() {
                writeln!(w, "{}{:05}: {:02} {} {}", INDENT, i, op.raw, op.code, op.arg)?;
            }
            Ok(())
        }
    }
}

/// Labels and diagnostics sit at `indent`, code one level deeper.
pub fn write_statements<W: Write>(w: &mut W, statements: &[Statement], indent: &str) -> IoResult<()> {
    let code = format!("{}{}", indent, INDENT);
    let echo = format!("{}{}", code, INDENT);
    for statement in statements {
        match &statement.kind {
            StatementKind::Label { strong, .. } => {
                if *strong && statement.offset != 0 {
                    writeln!(w)?;
                }
                writeln!(w, "{}{}", indent, statement)?;
            }
            StatementKind::Diagnostic { .. } => writeln!(w, "{}{}", indent, statement)?,
            StatementKind::Instruction { .. } => writeln!(w, "{}{}", echo, statement)?,
            StatementKind::IfGoto {
                negated,
                condition,
                target,
            } => {
                let not = if *negated { "not " } else { "" };
                writeln!(w, "{}if {}({})", code, not, condition)?;
                writeln!(w, "{}\tgoto {}", code, target)?;
            }
            _ => writeln!(w, "{}{}", code, statement)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alcachofa_core::decompiler::Severity;
    use alcachofa_core::format::emc::{EmcPoint, EmcPolygon, EmcShape};
    use alcachofa_core::format::schema::{TypeRef, TypeRefKind};
    use pretty_assertions::assert_eq;

    fn render(f: impl FnOnce(&mut Vec<u8>) -> IoResult<()>) -> String {
        let mut out = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn statements_layout() {
        let s = |offset, kind| Statement { offset, kind };
        let statements = vec![
            s(
                0,
                StatementKind::Label {
                    name: "main".into(),
                    strong: true,
                },
            ),
            s(
                0,
                StatementKind::IfGoto {
                    negated: true,
                    condition: "x".into(),
                    target: "loc_2".into(),
                },
            ),
            s(
                1,
                StatementKind::Diagnostic {
                    severity: Severity::Warning,
                    message: "Arrived with 1 stack entries".into(),
                },
            ),
            s(
                1,
                StatementKind::Label {
                    name: "other".into(),
                    strong: true,
                },
            ),
            s(1, StatementKind::Return { value: None }),
        ];
        let text = render(|w| write_statements(w, &statements, ""));
        assert_eq!(
            text,
            "main:\n    if not (x)\n    \tgoto loc_2\n// WARNING: Arrived with 1 stack entries\n\nother:\n    return\n"
        );
    }

    #[test]
    fn object_layout() {
        let object = EmcObject {
            type_name: "Room".into(),
            name: "r".into(),
            properties: vec![EmcProperty {
                name: "area".into(),
                ty: TypeRef::named("Area", 1),
                value: EmcValue::Shape(EmcShape {
                    polygons: vec![EmcPolygon {
                        points: vec![EmcPoint { x: 1, y: 2 }],
                    }],
                }),
            }],
            collections: vec![EmcCollection {
                name: "Items".into(),
                base_type: "Obj".into(),
                elements: vec![EmcObject {
                    type_name: "Obj".into(),
                    name: "o".into(),
                    properties: vec![EmcProperty {
                        name: "x".into(),
                        ty: TypeRef::primitive(TypeRefKind::Sint32),
                        value: EmcValue::Sint32(3),
                    }],
                    collections: Vec::new(),
                }],
            }],
        };
        let text = render(|w| write_object(w, &object, ""));
        assert_eq!(
            text,
            "Room r {\n    area : Area = [\n        0: [\n            0: (1, 2)\n        ]\n    ]\n\n    Items (Obj) [\n        - Obj o {\n            x : Sint32 = 3\n        }\n    ]\n}\n"
        );
    }
}
