//! Native target for relax.
//!
//! - `registers` / `encoding` - x86-64 operands and instruction encoding
//! - `segment` - relaxable native segments (`jmp`, `jcc`, RIP-relative refs, jump tables)
//! - `lower` - the register-machine `LoweringTarget` and its x86-64 implementation
//! - `image` / `object` - COFF-style relocatable images

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod encoding;
pub mod error;
pub mod image;
pub mod lower;
pub mod object;
pub mod registers;
pub mod segment;
mod switch;

#[cfg(test)]
mod lower_tests;
#[cfg(test)]
mod switch_tests;

pub use error::{ImageError, NativeError};
pub use image::{Image, ImageBuilder, ImageConfig, Section, SectionId, SymbolId};
pub use lower::{
    Addr, BinOp, CodeUnit, Fixup, Location, LoweringTarget, Operand, UnOp, X64Lowering,
};
pub use object::ObjectWriter;
pub use registers::{Cond, Reg, Width};
pub use segment::{CallTarget, NativeSegment};
