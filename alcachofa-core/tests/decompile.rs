mod common;

use alcachofa_core::decompiler::StatementKind;
use alcachofa_core::{decompile, CodFile, DecodeOptions, DecompileOptions, Generation};
use common::Script;
use pretty_assertions::assert_eq;

fn render(cod: &CodFile) -> Vec<String> {
    decompile(cod, None, &DecompileOptions::default())
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[test]
fn store_then_return_from_bytes() {
    // PushValue 5, PushAddr 0, Store, ReturnValue
    let bytes = Script {
        strings: &[],
        globals: &[("x", 0)],
        procedures: &[("main", 1)],
        ops: &[(3, 5), (2, 0), (7, 0), (37, 0)],
    }
    .build(false);
    let cod = CodFile::from_bytes(&bytes, Generation::V3, &DecodeOptions::default()).unwrap();
    assert_eq!(render(&cod), vec!["main:", "x = 5", "return x"]);
}

#[test]
fn same_bytes_differ_by_generation() {
    // raw 10 loads a string in later generations, pushes a behavior address in V1
    let script = Script {
        strings: &["hi"],
        globals: &[],
        procedures: &[("main", 1)],
        ops: &[(3, 0), (10, 0)],
    };
    let v3 = CodFile::from_bytes(&script.build(false), Generation::V3, &DecodeOptions::default()).unwrap();
    let v1 = CodFile::from_bytes(&script.build(true), Generation::V1, &DecodeOptions::default()).unwrap();
    assert_eq!(v3.ops[1].code.to_string(), "LoadString");
    assert_eq!(v1.ops[1].code.to_string(), "PushDynAddr");
    assert_eq!(v3.strings[0].value, "hi");
    assert_eq!(v1.memory_size, 4);
}

#[test]
fn invalid_ops_do_not_abort() {
    let bytes = Script {
        strings: &[],
        globals: &[],
        procedures: &[("main", 1)],
        ops: &[(200, 1), (5, 0), (37, 0)],
    }
    .build(false);
    let cod = CodFile::from_bytes(&bytes, Generation::V3, &DecodeOptions::default()).unwrap();
    let out = decompile(&cod, None, &DecompileOptions::default());
    let asm: Vec<_> = out
        .iter()
        .filter(|s| matches!(s.kind, StatementKind::Asm { .. }))
        .map(|s| s.to_string())
        .collect();
    assert_eq!(asm, vec!["ASM InvalidOp 1", "ASM Crash 0"]);
    assert_eq!(out.last().unwrap().to_string(), "return ERROR");
}

#[test]
fn every_op_is_accounted_for() {
    let bytes = Script {
        strings: &[],
        globals: &[("x", 0)],
        procedures: &[("main", 1), ("other", 4)],
        ops: &[(3, 1), (3, 2), (17, 2), (3, 9), (37, 0)],
    }
    .build(false);
    let cod = CodFile::from_bytes(&bytes, Generation::V3, &DecodeOptions::default()).unwrap();
    let opts = DecompileOptions {
        dump_instructions: true,
    };
    let out = decompile(&cod, None, &opts);
    let echoed: Vec<_> = out
        .iter()
        .filter(|s| matches!(s.kind, StatementKind::Instruction { .. }))
        .map(|s| s.offset)
        .collect();
    assert_eq!(echoed, vec![0, 1, 2, 3, 4]);
    assert_eq!(out.iter().filter(|s| s.is_diagnostic()).count(), 1);
}
