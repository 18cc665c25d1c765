//! Errors for native lowering and image building.

use relax_core::{LayoutError, SourcePos};

/// Error raised while lowering one native unit.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum NativeError {
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// The operand combination has no encoding (an immediate destination,
    /// a scratch register, aliased results).
    #[error("invalid operands for {op} at {pos}")]
    InvalidOperands { op: &'static str, pos: SourcePos },

    /// An immediate does not fit the operand width.
    #[error("immediate {value} too wide for {op} at {pos}")]
    ImmediateTooWide {
        op: &'static str,
        value: i64,
        pos: SourcePos,
    },
}

/// Error raised while building or parsing an image.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    #[error(
        "alignments must be powers of two with section >= file (file {file:#x}, section {section:#x})"
    )]
    BadAlignment { file: u32, section: u32 },

    #[error("truncated image: need {need} bytes at offset {at}")]
    Truncated { at: usize, need: usize },

    #[error("invalid name {name:?}")]
    BadName { name: String },

    #[error("{count} sections exceed the format limit")]
    TooManySections { count: usize },

    #[error("section {section} has {count} relocations, limit is 65535")]
    TooManyRelocations { section: String, count: usize },

    #[error("no section with index {index}")]
    UnknownSection { index: usize },

    /// A relocation names a symbol that does not exist.
    #[error("relocation in section {section} refers to missing symbol {symbol}")]
    BadRelocation { section: String, symbol: u32 },
}
