//! Core data structures for relax.
//!
//! This crate contains the target-independent half of code layout:
//! - `label` - symbolic positions and the per-stream label table
//! - `stream` - ordered segment streams with source positions
//! - `segment` - the contract every encodable instruction fulfils
//! - `layout` - the branch-relaxation layout engine and emission
//! - `switch` - dense/sparse dispatch selection

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod config;
pub mod error;
pub mod label;
pub mod layout;
pub mod segment;
pub mod stream;
pub mod switch;

#[cfg(test)]
mod label_tests;
#[cfg(test)]
mod layout_tests;
#[cfg(test)]
pub(crate) mod test_utils;

pub use config::LayoutConfig;
pub use error::LayoutError;
pub use label::{Label, LabelTable};
pub use layout::{Layout, LayoutEngine};
pub use segment::{Resolve, Segment};
pub use stream::{Item, Stream};
pub use switch::{DenseTable, Dispatch, SparseTable, SwitchBuilder};

/// Position of the source construct a segment was generated from.
///
/// `line` is 1-based (0 means unknown); `start..end` is a byte range into the
/// unit's source text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Deserialize)]
pub struct SourcePos {
    pub line: u32,
    pub start: u32,
    pub end: u32,
}

impl SourcePos {
    pub const UNKNOWN: SourcePos = SourcePos {
        line: 0,
        start: 0,
        end: 0,
    };

    pub fn new(line: u32, start: u32, end: u32) -> Self {
        Self { line, start, end }
    }

    /// Position known only by line.
    pub fn line(line: u32) -> Self {
        Self {
            line,
            start: 0,
            end: 0,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.line == 0 && self.start == self.end
    }
}

impl std::fmt::Display for SourcePos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.line == 0 {
            return write!(f, "<unknown>");
        }
        write!(f, "line {}", self.line)
    }
}

/// Round up to the next multiple of `align` (a power of two).
pub fn align_up(value: u32, align: u32) -> u32 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}
