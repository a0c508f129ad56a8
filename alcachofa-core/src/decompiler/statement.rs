use std::fmt;

use serde::Serialize;

use crate::format::cod::CodOpCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Error,
    Warning,
}

/// One record of decompiled output, tied to the op index that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statement {
    pub offset: usize,
    pub kind: StatementKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum StatementKind {
    Label { name: String, strong: bool },
    Assign { target: String, value: String },
    /// Store through something that is not a known address.
    StoreIndirect { target: String, value: String },
    Call { text: String },
    IfGoto { negated: bool, condition: String, target: String },
    Goto { target: String },
    Return { value: Option<String> },
    /// An op with no pseudo-code form.
    Asm { op: CodOpCode, arg: i32 },
    /// Raw op echo, only with `dump_instructions`.
    Instruction { op: CodOpCode, arg: i32 },
    Diagnostic { severity: Severity, message: String },
}

impl Statement {
    pub fn is_diagnostic(&self) -> bool {
        matches!(self.kind, StatementKind::Diagnostic { .. })
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StatementKind::Label { name, .. } => write!(f, "{}:", name),
            StatementKind::Assign { target, value } => write!(f, "{} = {}", target, value),
            StatementKind::StoreIndirect { target, value } => write!(f, "STORE( {} ) = {}", target, value),
            StatementKind::Call { text } => f.write_str(text),
            StatementKind::IfGoto {
                negated: true,
                condition,
                target,
            } => write!(f, "if not ({}) goto {}", condition, target),
            StatementKind::IfGoto {
                negated: false,
                condition,
                target,
            } => write!(f, "if ({}) goto {}", condition, target),
            StatementKind::Goto { target } => write!(f, "goto {}", target),
            StatementKind::Return { value: Some(value) } => write!(f, "return {}", value),
            StatementKind::Return { value: None } => f.write_str("return"),
            StatementKind::Asm { op, arg } => write!(f, "ASM {} {}", op, arg),
            StatementKind::Instruction { op, arg } => write!(f, "{}: {} {}", self.offset, op, arg),
            StatementKind::Diagnostic {
                severity: Severity::Error,
                message,
            } => write!(f, "// ERROR: {}", message),
            StatementKind::Diagnostic {
                severity: Severity::Warning,
                message,
            } => write!(f, "// WARNING: {}", message),
        }
    }
}
