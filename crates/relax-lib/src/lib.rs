//! relax: code layout and instruction encoding for managed bytecode and
//! native x86-64 objects.
//!
//! # Example
//!
//! ```
//! use relax_lib::{Config, LabelId, Prim, Request, Storage, SymbolTable, Unit, Value};
//! use relax_lib::request::Compare;
//!
//! let mut symbols = SymbolTable::new();
//! symbols.define("n", Storage::Slot(0), Prim::Int);
//!
//! let mut unit = Unit::new("count_down").params(1);
//! unit.push(Request::Place(LabelId(0)))
//!     .push(Request::Binary {
//!         op: relax_lib::BinOp::Sub,
//!         dst: "n".into(),
//!         src: Value::Const(1),
//!     })
//!     .push(Request::Branch {
//!         cond: Compare::Gt,
//!         a: Value::var("n"),
//!         b: Value::Const(0),
//!         target: LabelId(0),
//!     })
//!     .push(Request::Return(None));
//!
//! let body = relax_lib::compile_managed(&unit, &symbols, &Config::default()).unwrap();
//! assert_eq!(body.max_locals, 1);
//! ```

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod request;
pub mod symbols;


use relax_bytecode::BytecodeError;
use relax_core::{LayoutError, SourcePos};
use relax_native::{ImageError, NativeError};

pub use config::Config;
pub use diagnostics::DiagnosticsPrinter;
pub use driver::{
    build_object, compile_all_managed, compile_all_native, compile_managed, compile_native,
};
pub use relax_native::{BinOp, UnOp};
pub use request::{LabelId, Request, Unit, Value};
pub use symbols::{Callee, Prim, Storage, SymbolTable, Variable};

/// Errors that fail one unit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Bytecode(#[from] BytecodeError),

    #[error(transparent)]
    Native(#[from] NativeError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error("undefined symbol `{name}` at {pos}")]
    UndefinedSymbol { name: String, pos: SourcePos },

    /// A variable's storage does not belong to the target being compiled.
    #[error("`{name}` at {pos} is not stored in a {expected}")]
    StorageMismatch {
        name: String,
        expected: &'static str,
        pos: SourcePos,
    },

    #[error("{what} is not supported on the {target} target at {pos}")]
    Unsupported {
        what: &'static str,
        target: &'static str,
        pos: SourcePos,
    },
}

impl Error {
    /// Source position the error is attributed to, if known.
    pub fn pos(&self) -> Option<SourcePos> {
        let pos = match self {
            Error::Layout(e) => e.pos(),
            Error::Bytecode(BytecodeError::Layout(e)) => e.pos(),
            Error::Bytecode(
                BytecodeError::StackUnderflow { pos, .. }
                | BytecodeError::StackMismatch { pos, .. }
                | BytecodeError::FrameMismatch { pos, .. },
            ) => Some(*pos),
            Error::Bytecode(_) => None,
            Error::Native(NativeError::Layout(e)) => e.pos(),
            Error::Native(
                NativeError::InvalidOperands { pos, .. } | NativeError::ImmediateTooWide { pos, .. },
            ) => Some(*pos),
            Error::Image(_) => None,
            Error::UndefinedSymbol { pos, .. }
            | Error::StorageMismatch { pos, .. }
            | Error::Unsupported { pos, .. } => Some(*pos),
        };
        pos.filter(|p| !p.is_unknown())
    }
}

/// An error tagged with the unit it aborted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{unit}: {error}")]
pub struct UnitError {
    pub unit: String,
    #[source]
    pub error: Error,
}

impl UnitError {
    pub fn new(unit: impl Into<String>, error: impl Into<Error>) -> Self {
        Self {
            unit: unit.into(),
            error: error.into(),
        }
    }
}

/// Result type for driver operations.
pub type Result<T> = std::result::Result<T, UnitError>;
