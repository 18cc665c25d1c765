//! Error types for layout and emission.

use crate::SourcePos;
use crate::label::Label;

/// Error raised while laying out or emitting one segment stream.
///
/// Every variant is deterministic: retrying the same stream fails the same way.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    /// A label was read outside the layout pass before it was bound, or it
    /// belongs to another stream.
    #[error("label {label} is referenced but never bound")]
    UnresolvedReference { label: Label },

    /// A label was bound a second time.
    #[error("label {label} bound twice (at {first} and {second})")]
    DuplicateBinding {
        label: Label,
        first: u32,
        second: u32,
    },

    /// Two dispatch entries share a case value.
    #[error("duplicate case value {value} at {pos}")]
    AmbiguousCase { value: i64, pos: SourcePos },

    /// An operand does not fit the widest encoding available to its instruction.
    #[error("{encoding} operand {value} at {pos} exceeds the widest encoding")]
    EncodingOverflow {
        encoding: &'static str,
        value: i64,
        pos: SourcePos,
    },

    /// Layout did not reach a fixed point within the configured pass limit.
    #[error("layout did not converge after {passes} passes")]
    LayoutDivergence { passes: u32 },

    /// A segment emitted a different number of bytes than it measured.
    #[error("segment at {pos} emitted {actual} bytes but measured {expected}")]
    LengthMismatch {
        pos: SourcePos,
        expected: u32,
        actual: u32,
    },
}

impl LayoutError {
    /// Overflow raised by a segment, before the engine knows its position.
    pub fn overflow(encoding: &'static str, value: i64) -> Self {
        Self::EncodingOverflow {
            encoding,
            value,
            pos: SourcePos::UNKNOWN,
        }
    }

    /// Attribute a position-less error to `pos`.
    pub fn at(self, at: SourcePos) -> Self {
        match self {
            Self::EncodingOverflow {
                encoding,
                value,
                pos,
            } if pos.is_unknown() => Self::EncodingOverflow {
                encoding,
                value,
                pos: at,
            },
            Self::AmbiguousCase { value, pos } if pos.is_unknown() => {
                Self::AmbiguousCase { value, pos: at }
            }
            other => other,
        }
    }

    /// Source position the error is attributed to, if any.
    pub fn pos(&self) -> Option<SourcePos> {
        match self {
            Self::AmbiguousCase { pos, .. }
            | Self::EncodingOverflow { pos, .. }
            | Self::LengthMismatch { pos, .. } => Some(*pos),
            _ => None,
        }
    }
}
