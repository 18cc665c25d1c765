//! Managed bytecode target.
//!
//! Encodes stack-machine method bodies: slot-indexed locals with short, byte
//! and `wide` forms, 16/32-bit branches, and aligned `tableswitch` /
//! `lookupswitch` dispatch, and stack map frames for the verifier. Layout
//! comes from `relax-core`.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod decode;
pub mod dump;
pub mod error;
pub mod frames;
pub mod insn;
pub mod method;
pub mod opcodes;
pub mod stack;

#[cfg(test)]
mod frames_tests;
#[cfg(test)]
mod stack_tests;

pub use decode::{Decoded, Operands, decode};
pub use dump::{dump, dump_method};
pub use error::BytecodeError;
pub use frames::{Frame, PoolTypes, StackMap, VType};
pub use insn::{Access, Insn};
pub use method::{ExceptionEntry, Handler, LineEntry, LineTable, MethodBody, MethodBuilder};
pub use opcodes::{Cond, Kind};
