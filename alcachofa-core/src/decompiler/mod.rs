//! Pseudo-code reconstruction for script containers.
//!
//! Decompilation is a symbolic execution of the op list: every op manipulates
//! a stack of rendered expressions, and statements are emitted when an op has
//! a visible effect. Anything the reconstruction cannot make sense of ends up
//! as a [`Severity::Error`] or [`Severity::Warning`] diagnostic in the output,
//! the walk itself never fails.

mod expr;
mod kernel;
mod label;
mod statement;

use itertools::Itertools;

use crate::format::cod::{CodFile, CodOp, CodOpCode};
use crate::format::schema::{Generation, SchemaBlock};

pub use expr::{Expr, ExprKind};
pub use kernel::KernelTable;
pub use label::{Label, LabelTable};
pub use statement::{Severity, Statement, StatementKind};

#[derive(Debug, Clone, Copy, Default)]
pub struct DecompileOptions {
    /// Echo every op as an [`StatementKind::Instruction`] before its statements.
    pub dump_instructions: bool,
}

/// Decompile a whole script.
///
/// `schema` supplies kernel call names and, for V1 scripts, their parameter counts.
pub fn decompile(cod: &CodFile, schema: Option<&SchemaBlock>, opts: &DecompileOptions) -> Vec<Statement> {
    let labels = LabelTable::discover(cod);
    let mut decompiler = Decompiler {
        cod,
        kernel: KernelTable::new(schema),
        labels: &labels,
        opts,
        stack: Vec::new(),
        scope: None,
        offset: 0,
        out: Vec::new(),
    };
    decompiler.run();
    decompiler.out
}

struct Decompiler<'a> {
    cod: &'a CodFile,
    kernel: KernelTable<'a>,
    labels: &'a LabelTable,
    opts: &'a DecompileOptions,
    stack: Vec<Expr>,
    /// Behavior of the procedure being walked.
    scope: Option<usize>,
    offset: usize,
    out: Vec<Statement>,
}

impl<'a> Decompiler<'a> {
    fn run(&mut self) {
        while self.offset < self.cod.ops.len() {
            let offset = self.offset;
            self.enter_label(offset);

            let op = self.cod.ops[offset];
            self.echo(offset, op);
            self.step(op);
            self.offset += 1;
        }
        if !self.stack.is_empty() {
            let message = format!("Script ends with {} stack entries", self.stack.len());
            self.diagnostic(Severity::Warning, message);
        }
    }

    fn enter_label(&mut self, offset: usize) {
        let Some(label) = self.labels.get(offset) else {
            return;
        };
        if label.strong {
            if !self.stack.is_empty() {
                let message = format!("Arrived with {} stack entries", self.stack.len());
                self.diagnostic(Severity::Warning, message);
                self.stack.clear();
            }
            self.scope = label.scope;
        }
        self.emit(StatementKind::Label {
            name: label.name(),
            strong: label.strong,
        });
    }

    fn emit(&mut self, kind: StatementKind) {
        self.out.push(Statement {
            offset: self.offset,
            kind,
        });
    }

    fn diagnostic(&mut self, severity: Severity, message: String) {
        log::trace!("op {}: {:?}: {}", self.offset, severity, message);
        self.emit(StatementKind::Diagnostic { severity, message });
    }

    fn echo(&mut self, offset: usize, op: CodOp) {
        if self.opts.dump_instructions {
            self.out.push(Statement {
                offset,
                kind: StatementKind::Instruction {
                    op: op.code,
                    arg: op.arg,
                },
            });
        }
    }

    fn step(&mut self, op: CodOp) {
        let arg = op.arg;
        match op.code {
            CodOpCode::Nop => {}
            CodOpCode::Dup => self.dup(),
            CodOpCode::PushAddr => {
                let expr = self.address(arg);
                self.stack.push(expr);
            }
            CodOpCode::PushDynAddr => {
                let expr = self.dynamic_address(arg);
                self.stack.push(expr);
            }
            CodOpCode::PushValue => self.stack.push(Expr::number(arg)),
            CodOpCode::Deref => self.deref(),
            CodOpCode::Pop1 => self.pop_n(1),
            CodOpCode::PopN => self.pop_n(arg),
            CodOpCode::Store => self.store(),
            CodOpCode::LoadString => {
                let value = self.pop_number("LoadString");
                let expr = match value.kind {
                    ExprKind::Number(offset) => match self.cod.string_at(offset) {
                        Some(s) => Expr::string(format!("\"{}\"", s)),
                        None => Expr::string(format!("invalid string({})", offset)),
                    },
                    _ => Expr::string(format!("string[ {} ]", value.text)),
                };
                self.stack.push(expr);
            }
            CodOpCode::Call | CodOpCode::KernelProc => self.call(op),
            CodOpCode::JumpIfFalse | CodOpCode::JumpIfTrue => {
                let negated = op.code == CodOpCode::JumpIfFalse;
                let condition = self.pop_number(if negated { "jumpIfFalse" } else { "jumpIfTrue" });
                let target = self.jump_target(arg);
                self.emit(StatementKind::IfGoto {
                    negated,
                    condition: condition.text,
                    target,
                });
            }
            CodOpCode::Jump => {
                let target = self.jump_target(arg);
                self.emit(StatementKind::Goto { target });
            }
            CodOpCode::Negate => {
                let value = self.pop_number("negate");
                self.stack.push(Expr::compound(format!("-{}", value.bracketed())));
            }
            CodOpCode::BooleanNot => {
                let value = self.pop_number("boolean not");
                self.stack.push(Expr::compound(format!("!{}", value.bracketed())));
            }
            CodOpCode::Mul
            | CodOpCode::Add
            | CodOpCode::Sub
            | CodOpCode::Less
            | CodOpCode::Greater
            | CodOpCode::LessEquals
            | CodOpCode::GreaterEquals
            | CodOpCode::Equals
            | CodOpCode::NotEquals
            | CodOpCode::BitAnd
            | CodOpCode::BitOr => {
                let operator = op.code.binary_operator().unwrap_or("?");
                let (left, right) = self.pop_operands(op.code);
                self.stack.push(Expr::compound(format!(
                    "{} {} {}",
                    left.bracketed(),
                    operator,
                    right.bracketed()
                )));
            }
            CodOpCode::ReturnValue => {
                let value = self.pop_number("return");
                self.emit(StatementKind::Return {
                    value: Some(value.text),
                });
            }
            CodOpCode::ReturnNone => self.emit(StatementKind::Return { value: None }),
            CodOpCode::Crash | CodOpCode::InvalidOp => {
                if !self.opts.dump_instructions {
                    self.emit(StatementKind::Asm { op: op.code, arg });
                }
            }
        }
    }

    /// Variable name by memory offset, behavior scope first.
    fn variable_name(&self, offset: i32) -> Option<&'a str> {
        let cod = self.cod;
        let behavior = self.scope.and_then(|i| cod.behaviors.get(i));
        behavior
            .into_iter()
            .flat_map(|b| b.variables.iter())
            .chain(cod.global_variables.iter())
            .find(|v| v.offset == offset)
            .map(|v| v.name.as_str())
    }

    fn address(&self, offset: i32) -> Expr {
        match self.variable_name(offset) {
            Some(name) => Expr::address(name.to_string(), true),
            None => Expr::address(format!("invalid address({})", offset), false),
        }
    }

    /// V1 address relative to the running behavior's variables.
    fn dynamic_address(&self, offset: i32) -> Expr {
        let cod = self.cod;
        let name = self
            .scope
            .and_then(|i| cod.behaviors.get(i))
            .and_then(|b| b.variables.iter().find(|v| v.offset == offset));
        match name {
            Some(v) => Expr::address(v.name.clone(), true),
            None => Expr::address(format!("dynamic({})", offset), true),
        }
    }

    fn dup(&mut self) {
        let Some(top) = self.stack.last() else {
            self.diagnostic(Severity::Error, "Arrived without stack entry for dup".to_string());
            self.stack.push(Expr::error());
            return;
        };
        if !top.needs_temporary() {
            let copy = top.clone();
            self.stack.push(copy);
            return;
        }

        let Some(value) = self.stack.pop() else { return };
        let tmp = format!("tmp_{}", self.offset);
        self.emit(StatementKind::Assign {
            target: tmp.clone(),
            value: value.text,
        });
        self.stack.push(Expr::atom(tmp.clone()));
        self.stack.push(Expr::atom(tmp));
    }

    fn deref(&mut self) {
        match self.stack.pop() {
            None => {
                self.diagnostic(Severity::Error, "Arrived without stack entry for deref".to_string());
                self.stack.push(Expr::error());
            }
            Some(Expr {
                kind: ExprKind::Address { name },
                ..
            }) => self.stack.push(Expr::atom(name)),
            Some(other) => {
                self.diagnostic(
                    Severity::Error,
                    "Arrived without address on stack for deref".to_string(),
                );
                self.stack.push(Expr::atom(format!("#deref( {} )", other.text)));
            }
        }
    }

    fn pop_n(&mut self, count: i32) {
        if count < 0 || self.stack.len() < count as usize {
            let message = format!(
                "Arrived with {} stack entries, attempting to pop {}",
                self.stack.len(),
                count
            );
            self.diagnostic(Severity::Error, message);
        }
        let keep = self.stack.len().saturating_sub(count.max(0) as usize);
        self.stack.truncate(keep);
    }

    /// Store consumes an address and a value in either order and leaves the stored variable.
    fn store(&mut self) {
        if self.stack.len() < 2 {
            let message = format!("Arrived with {} stack entries, attempting to store", self.stack.len());
            self.diagnostic(Severity::Error, message);
            self.stack.clear();
            self.stack.push(Expr::error());
            return;
        }
        let (Some(top), Some(second)) = (self.stack.pop(), self.stack.pop()) else {
            return;
        };

        let is_address = |e: &Expr| matches!(e.kind, ExprKind::Address { .. });
        let (address, value) = if is_address(&second) {
            (second, top)
        } else if is_address(&top) {
            (top, second)
        } else {
            self.diagnostic(Severity::Error, "Attempted to store value in non-address".to_string());
            self.emit(StatementKind::StoreIndirect {
                target: second.text,
                value: top.text.clone(),
            });
            self.stack.push(top);
            return;
        };

        let ExprKind::Address { name } = address.kind else {
            return;
        };
        self.emit(StatementKind::Assign {
            target: name.clone(),
            value: value.text,
        });
        self.stack.push(Expr::atom(name));
    }

    fn pop_number(&mut self, context: &str) -> Expr {
        let value = match self.stack.pop() {
            Some(value) => value,
            None => {
                self.diagnostic(Severity::Error, format!("Attempted to pop one number for {}", context));
                Expr::error()
            }
        };
        if value.is_non_numeric() {
            self.diagnostic(Severity::Warning, format!("Expected numeric expression for {}", context));
        }
        value
    }

    /// Pops `(left, right)`: the right operand is on top.
    fn pop_operands(&mut self, code: CodOpCode) -> (Expr, Expr) {
        let (left, right) = if self.stack.len() < 2 {
            self.diagnostic(Severity::Error, format!("Attempted to pop two numbers for {}", code));
            self.stack.clear();
            (Expr::atom("ERROR2"), Expr::atom("ERROR1"))
        } else {
            let right = self.stack.pop().unwrap_or_else(Expr::error);
            let left = self.stack.pop().unwrap_or_else(Expr::error);
            (left, right)
        };
        if left.is_non_numeric() || right.is_non_numeric() {
            self.diagnostic(Severity::Warning, format!("Expected numeric expression for {}", code));
        }
        (left, right)
    }

    fn jump_target(&mut self, arg: i32) -> String {
        let target = self.offset as i64 + arg as i64;
        match self.labels.name_at(target) {
            Some(name) => name,
            None => {
                self.diagnostic(Severity::Error, format!("Jump target {} is outside of the script", target));
                format!("loc_{}", target)
            }
        }
    }

    fn next_op(&self) -> Option<CodOp> {
        self.cod.ops.get(self.offset + 1).copied()
    }

    /// Consume the op after the current one as a call marker.
    fn consume_marker(&mut self) -> Option<CodOp> {
        let marker = self.next_op()?;
        self.offset += 1;
        if let Some(label) = self.labels.get(self.offset) {
            self.emit(StatementKind::Label {
                name: label.name(),
                strong: label.strong,
            });
            let message = format!("Label {} lands on a call marker", label.name());
            self.diagnostic(Severity::Warning, message);
        }
        self.echo(self.offset, marker);
        Some(marker)
    }

    /// Number of stack entries the call at the current op takes as arguments.
    ///
    /// `None` when the call follows no known calling convention.
    fn argument_count(&mut self, op: CodOp) -> Option<usize> {
        if let Some(marker) = self.next_op().filter(|m| m.code == CodOpCode::PopN) {
            self.consume_marker();
            return match usize::try_from(marker.arg) {
                Ok(count) => Some(count),
                Err(_) => {
                    let message = format!("Negative argument count {}", marker.arg);
                    self.diagnostic(Severity::Error, message);
                    Some(0)
                }
            };
        }
        if self.cod.generation == Generation::V1 {
            if op.code == CodOpCode::Call {
                return Some(0);
            }
            return match self.kernel.arity(op.arg) {
                Some(count) => Some(count),
                None => {
                    let message = format!("Unknown parameter count of kernel procedure {}", op.arg);
                    self.diagnostic(Severity::Error, message);
                    Some(0)
                }
            };
        }
        self.diagnostic(
            Severity::Error,
            "Calling somewhere without expected calling convention".to_string(),
        );
        None
    }

    fn call(&mut self, op: CodOp) {
        let convention = self.argument_count(op);
        let mut count = convention.unwrap_or(0);
        if self.stack.len() < count {
            let message = format!(
                "Calling with {} arguments but only {} stack entries",
                count,
                self.stack.len()
            );
            self.diagnostic(Severity::Error, message);
            count = self.stack.len();
        }
        let args = (0..count).filter_map(|_| self.stack.pop()).map(|e| e.text).join(", ");

        let callee = match op.code {
            CodOpCode::Call => {
                let target = op.arg as i64 - 1;
                match self.labels.name_at(target) {
                    Some(name) => format!("#{}", name),
                    None => {
                        self.diagnostic(Severity::Error, format!("Call target {} is outside of the script", target));
                        format!("#proc_{}", target)
                    }
                }
            }
            _ => self.kernel.name(op.arg),
        };
        let text = if args.is_empty() {
            format!("{}()", callee)
        } else {
            format!("{}( {} )", callee, args)
        };

        if convention.is_none() {
            self.emit(StatementKind::Call { text });
            return;
        }
        // a trailing pop discards the result
        if let Some(marker) = self.next_op().filter(|m| m.code.is_pop()) {
            self.consume_marker();
            if marker.code == CodOpCode::PopN && marker.arg != 1 {
                self.diagnostic(
                    Severity::Error,
                    "Expected at most one return value to pop".to_string(),
                );
            }
            self.emit(StatementKind::Call { text });
        } else {
            self.stack.push(Expr::atom(text));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::cod::{CodBehavior, CodProcedure, CodString, CodVariable};
    use pretty_assertions::assert_eq;

    fn op(code: CodOpCode, arg: i32) -> CodOp {
        CodOp { raw: -1, code, arg }
    }

    fn var(name: &str, offset: i32) -> CodVariable {
        CodVariable {
            name: name.to_string(),
            offset,
        }
    }

    fn proc(name: &str, offset: i32) -> CodProcedure {
        CodProcedure {
            name: name.to_string(),
            offset,
            aux: 0,
        }
    }

    fn script(generation: Generation, procs: Vec<CodProcedure>, ops: Vec<CodOp>) -> CodFile {
        CodFile {
            generation,
            memory_size: 64,
            strings: vec![CodString {
                offset: 0,
                value: "hola".to_string(),
            }],
            global_variables: vec![var("x", 0), var("y", 4)],
            global_procedures: procs,
            behaviors: Vec::new(),
            ops,
        }
    }

    fn lines(cod: &CodFile) -> Vec<String> {
        decompile(cod, None, &DecompileOptions::default())
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    use CodOpCode::*;

    #[test]
    fn store_and_return() {
        let cod = script(
            Generation::V3,
            vec![proc("main", 1)],
            vec![op(PushValue, 5), op(PushAddr, 0), op(Store, 0), op(ReturnValue, 0)],
        );
        assert_eq!(lines(&cod), vec!["main:", "x = 5", "return x"]);
    }

    #[test]
    fn address_below_value() {
        let cod = script(
            Generation::V3,
            vec![proc("main", 1)],
            vec![
                op(PushAddr, 4),
                op(PushAddr, 0),
                op(Deref, 0),
                op(PushValue, 1),
                op(Add, 0),
                op(Store, 0),
                op(PopN, 1),
            ],
        );
        assert_eq!(lines(&cod), vec!["main:", "y = x + 1"]);
    }

    #[test]
    fn live_stack_at_strong_label() {
        let cod = script(
            Generation::V3,
            vec![proc("a", 1), proc("b", 3)],
            vec![op(PushValue, 1), op(PushValue, 2), op(ReturnNone, 0), op(ReturnValue, 0)],
        );
        let out = decompile(&cod, None, &DecompileOptions::default());
        let diagnostics: Vec<_> = out.iter().filter(|s| s.is_diagnostic()).map(|s| s.to_string()).collect();
        assert_eq!(
            diagnostics,
            vec![
                "// WARNING: Arrived with 2 stack entries".to_string(),
                "// ERROR: Attempted to pop one number for return".to_string(),
            ]
        );
        assert_eq!(out.last().unwrap().to_string(), "return ERROR");
    }

    #[test]
    fn shared_entry_label() {
        let cod = script(
            Generation::V3,
            vec![proc("first", 2), proc("second", 2)],
            vec![op(Jump, 1), op(ReturnValue, 0), op(Jump, -2)],
        );
        let labels = LabelTable::discover(&cod);
        assert_eq!(labels.iter().count(), 2);
        assert_eq!(labels.get(1).unwrap().name(), "SHARED: first, second");
        assert_eq!(labels.get(0).unwrap().name(), "loc_0");
        assert!(!labels.is_strong(0));
    }

    #[test]
    fn jumps_and_conditions() {
        let cod = script(
            Generation::V3,
            vec![proc("main", 1)],
            vec![
                op(PushAddr, 0),
                op(Deref, 0),
                op(PushValue, 3),
                op(GreaterEquals, 0),
                op(JumpIfFalse, 2),
                op(Jump, 0),
                op(ReturnNone, 0),
            ],
        );
        assert_eq!(
            lines(&cod),
            vec![
                "main:",
                "if not (x >= 3) goto loc_6",
                "loc_5:",
                "goto loc_5",
                "loc_6:",
                "return"
            ]
        );
    }

    #[test]
    fn dup_materializes_compound() {
        let cod = script(
            Generation::V3,
            vec![proc("main", 1)],
            vec![
                op(PushValue, 1),
                op(PushValue, 2),
                op(Add, 0),
                op(Dup, 0),
                op(Mul, 0),
                op(ReturnValue, 0),
            ],
        );
        assert_eq!(lines(&cod), vec!["main:", "tmp_3 = 1 + 2", "return tmp_3 * tmp_3"]);
    }

    #[test]
    fn dup_copies_plain_values() {
        let cod = script(
            Generation::V3,
            vec![proc("main", 1)],
            vec![op(PushValue, 7), op(Dup, 0), op(Sub, 0), op(ReturnValue, 0)],
        );
        assert_eq!(lines(&cod), vec!["main:", "return 7 - 7"]);
    }

    #[test]
    fn calls_with_markers() {
        let cod = script(
            Generation::V3,
            vec![proc("main", 1), proc("helper", 10)],
            vec![
                op(PushValue, 0),
                op(LoadString, 0),
                op(PushValue, 2),
                op(KernelProc, 2),
                op(PopN, 2),
                op(PopN, 1),
                op(Call, 10),
                op(PopN, 0),
                op(ReturnValue, 0),
                op(ReturnNone, 0),
            ],
        );
        assert_eq!(
            lines(&cod),
            vec!["main:", "playSound( 2, \"hola\" )", "return #helper()", "helper:", "return"]
        );
    }

    #[test]
    fn call_without_convention() {
        let cod = script(Generation::V3, vec![proc("main", 1)], vec![op(Call, 1), op(ReturnNone, 0)]);
        assert_eq!(
            lines(&cod),
            vec![
                "main:",
                "// ERROR: Calling somewhere without expected calling convention",
                "#main()",
                "return",
            ]
        );
    }

    #[test]
    fn negative_argument_count() {
        let cod = script(
            Generation::V3,
            vec![proc("main", 1)],
            vec![op(KernelProc, 2), op(PopN, -1), op(Pop1, 0), op(ReturnNone, 0)],
        );
        assert_eq!(
            lines(&cod),
            vec!["main:", "// ERROR: Negative argument count -1", "playSound()", "return"]
        );
    }

    #[test]
    fn label_on_call_marker() {
        let cod = script(
            Generation::V3,
            vec![proc("main", 1)],
            vec![op(KernelProc, 4), op(PopN, 0), op(Pop1, 0), op(Jump, -2)],
        );
        assert_eq!(
            lines(&cod),
            vec![
                "main:",
                "loc_1:",
                "// WARNING: Label loc_1 lands on a call marker",
                "stopMusic()",
                "goto loc_1",
            ]
        );
    }

    #[test]
    fn leftover_stack_at_end() {
        let cod = script(Generation::V3, vec![proc("main", 1)], vec![op(PushValue, 1)]);
        assert_eq!(lines(&cod), vec!["main:", "// WARNING: Script ends with 1 stack entries"]);
    }

    #[test]
    fn v1_kernel_arity_from_schema() {
        use crate::format::schema::{
            FunctionKind, FunctionSignature, NamedFunctionSignature, TypeDescriptor, TypeRef, TypeRefKind, TypedValue,
        };
        let schema = SchemaBlock {
            timestamp: 80896606,
            generation: Generation::V1,
            descriptors: vec![TypeDescriptor::Function(NamedFunctionSignature {
                kind: FunctionKind::KernelCall,
                name: "delay".to_string(),
                signature: FunctionSignature {
                    return_type: TypeRef::primitive(TypeRefKind::Void),
                    parameters: vec![TypedValue {
                        name: "ms".to_string(),
                        ty: TypeRef::primitive(TypeRefKind::Sint32),
                    }],
                },
            })],
        };
        let cod = script(
            Generation::V1,
            vec![proc("main", 1)],
            vec![op(PushValue, 100), op(KernelProc, 1), op(Pop1, 0), op(ReturnNone, 0)],
        );
        let out: Vec<_> = decompile(&cod, Some(&schema), &DecompileOptions::default())
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(out, vec!["main:", "delay( 100 )", "return"]);
    }

    #[test]
    fn behavior_scope_addresses() {
        let mut cod = script(
            Generation::V1,
            Vec::new(),
            vec![op(PushValue, 1), op(PushDynAddr, 0), op(Store, 0), op(Pop1, 0), op(ReturnNone, 0)],
        );
        cod.behaviors.push(CodBehavior {
            name: "Puerta".to_string(),
            variables: vec![var("abierta", 0)],
            procedures: vec![proc("abrir", 1)],
        });
        assert_eq!(lines(&cod), vec!["Puerta::abrir:", "abierta = 1", "return"]);
    }

    #[test]
    fn underflow_recovers() {
        let cod = script(
            Generation::V3,
            vec![proc("main", 1)],
            vec![op(Add, 0), op(Deref, 0), op(Store, 0), op(PopN, 3), op(ReturnValue, 0)],
        );
        let out = lines(&cod);
        assert_eq!(
            out,
            vec![
                "main:",
                "// ERROR: Attempted to pop two numbers for Add",
                "// ERROR: Arrived without address on stack for deref",
                "// ERROR: Arrived with 1 stack entries, attempting to store",
                "// ERROR: Arrived with 1 stack entries, attempting to pop 3",
                "// ERROR: Attempted to pop one number for return",
                "return ERROR",
            ]
        );
    }

    #[test]
    fn instruction_echo() {
        let cod = script(
            Generation::V3,
            vec![proc("main", 1)],
            vec![op(KernelProc, 4), op(PopN, 0), op(PopN, 1), op(Crash, 0)],
        );
        let opts = DecompileOptions {
            dump_instructions: true,
        };
        let out: Vec<_> = decompile(&cod, None, &opts).iter().map(|s| s.to_string()).collect();
        assert_eq!(
            out,
            vec![
                "main:",
                "0: KernelProc 4",
                "1: PopN 0",
                "2: PopN 1",
                "stopMusic()",
                "3: Crash 0",
            ]
        );
    }
}
