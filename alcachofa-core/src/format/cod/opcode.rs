use serde::Serialize;

use crate::format::schema::Generation;

/// Generation-independent meaning of a raw opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CodOpCode {
    Nop,
    Dup,
    PushAddr,
    PushDynAddr,
    PushValue,
    Deref,
    /// Reserved slot; the engine aborts when executing it.
    Crash,
    Pop1,
    PopN,
    Store,
    LoadString,
    Call,
    KernelProc,
    JumpIfFalse,
    JumpIfTrue,
    Jump,
    Negate,
    BooleanNot,
    Mul,
    Add,
    Sub,
    Less,
    Greater,
    LessEquals,
    GreaterEquals,
    Equals,
    NotEquals,
    BitAnd,
    BitOr,
    ReturnNone,
    ReturnValue,
    /// Raw code outside of the generation's table.
    InvalidOp,
}

use CodOpCode::*;

const V3_OPS: [CodOpCode; 38] = [
    Nop, Dup, PushAddr, PushValue, Deref, Crash, PopN, Store, Crash, Crash, //
    LoadString, LoadString, Crash, Call, KernelProc, JumpIfFalse, JumpIfTrue, Jump, Negate, BooleanNot, //
    Mul, Crash, Crash, Add, Sub, Less, Greater, LessEquals, GreaterEquals, Equals, //
    NotEquals, BitAnd, BitOr, Crash, Crash, Crash, Crash, ReturnValue,
];

const V1_OPS: [CodOpCode; 37] = [
    Nop, Dup, PushAddr, PushValue, Deref, Crash, Pop1, Store, Crash, Crash, //
    PushDynAddr, Crash, Call, KernelProc, JumpIfFalse, JumpIfTrue, Jump, Crash, Crash, Crash, //
    Crash, Crash, Add, Crash, Crash, Crash, Crash, Crash, Equals, NotEquals, //
    BitAnd, BitOr, Crash, Crash, Crash, Crash, ReturnNone,
];

impl CodOpCode {
    /// Normalize a raw opcode with the table of `generation`.
    ///
    /// V1 scripts use their own table, every later generation shares one.
    pub fn from_raw(raw: i32, generation: Generation) -> Self {
        let table: &[CodOpCode] = match generation {
            Generation::V1 => &V1_OPS,
            _ => &V3_OPS,
        };
        usize::try_from(raw)
            .ok()
            .and_then(|i| table.get(i).copied())
            .unwrap_or(InvalidOp)
    }

    #[inline]
    pub fn is_jump(self) -> bool {
        matches!(self, JumpIfFalse | JumpIfTrue | Jump)
    }

    #[inline]
    pub fn is_call(self) -> bool {
        matches!(self, Call | KernelProc)
    }

    #[inline]
    pub fn is_pop(self) -> bool {
        matches!(self, Pop1 | PopN)
    }

    /// Operator text of the binary operations.
    pub fn binary_operator(self) -> Option<&'static str> {
        let op = match self {
            Mul => "*",
            Add => "+",
            Sub => "-",
            Less => "<",
            Greater => ">",
            LessEquals => "<=",
            GreaterEquals => ">=",
            Equals => "==",
            NotEquals => "!=",
            BitAnd => "&",
            BitOr => "|",
            _ => return None,
        };
        Some(op)
    }
}

impl std::fmt::Display for CodOpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_diverge_on_raw_10() {
        assert_eq!(CodOpCode::from_raw(10, Generation::V3), LoadString);
        assert_eq!(CodOpCode::from_raw(10, Generation::V2), LoadString);
        assert_eq!(CodOpCode::from_raw(10, Generation::V1), PushDynAddr);
    }

    #[test]
    fn return_slots() {
        assert_eq!(CodOpCode::from_raw(37, Generation::V3), ReturnValue);
        assert_eq!(CodOpCode::from_raw(36, Generation::V1), ReturnNone);
        assert_eq!(CodOpCode::from_raw(37, Generation::V1), InvalidOp);
    }

    #[test]
    fn out_of_table_codes() {
        assert_eq!(CodOpCode::from_raw(38, Generation::V3), InvalidOp);
        assert_eq!(CodOpCode::from_raw(-1, Generation::V3), InvalidOp);
        assert_eq!(CodOpCode::from_raw(5, Generation::V1), Crash);
        assert_eq!(CodOpCode::from_raw(21, Generation::V3), Crash);
    }

    #[test]
    fn binary_operators() {
        assert_eq!(GreaterEquals.binary_operator(), Some(">="));
        assert_eq!(BitOr.binary_operator(), Some("|"));
        assert_eq!(Negate.binary_operator(), None);
    }
}
