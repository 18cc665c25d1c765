//! Errors raised while building, analysing or decoding method bodies.

use relax_core::{LayoutError, SourcePos};

use crate::frames::VType;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BytecodeError {
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// An instruction pops more words than the stack holds.
    #[error("stack underflow at {pos}: depth {depth}, instruction pops {pops}")]
    StackUnderflow { pos: SourcePos, depth: u32, pops: u32 },

    /// Two control-flow paths reach one instruction with different depths.
    #[error("inconsistent stack depth at {pos}: {expected} vs {actual}")]
    StackMismatch {
        pos: SourcePos,
        expected: u32,
        actual: u32,
    },

    /// Two control-flow paths reach one instruction with incompatible
    /// stack entry types.
    #[error("inconsistent stack types at {pos}: {expected} vs {actual}")]
    FrameMismatch {
        pos: SourcePos,
        expected: VType,
        actual: VType,
    },

    /// The pool type oracle has no answer for a value the frames need.
    #[error("cannot type the value of {what} at {at}")]
    UntypedValue { what: &'static str, at: u32 },

    #[error("malformed stack map frame tag {tag} at offset {at}")]
    BadFrame { at: usize, tag: u8 },

    #[error("unknown opcode {op:#04x} at {at}")]
    UnknownOpcode { op: u8, at: u32 },

    /// Code exceeds the 65535 bytes addressable by the exception table.
    #[error("method code is {size} bytes, limit is 65535")]
    CodeTooLarge { size: u32 },

    #[error("truncated input: need {need} bytes at offset {at}")]
    Truncated { at: usize, need: usize },
}
