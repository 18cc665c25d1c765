//! A small segment family for exercising the layout engine.

use crate::error::LayoutError;
use crate::label::Label;
use crate::segment::{Resolve, Segment};

/// Toy instruction set: fixed blobs, relaxable branches, near-only branches
/// and alignment padding.
#[derive(Clone, Debug)]
pub enum Toy {
    /// `n` filler bytes.
    Fixed(u32),
    /// `B0 rel8` or `B1 rel32`, relative to the end of the instruction.
    Branch(Label),
    /// `B2 rel8` only.
    Near(Label),
    /// Zero padding up to a multiple of the given alignment.
    Align(u32),
}

impl Toy {
    fn disp(labels: &Resolve<'_>, target: Label, end: u32) -> Result<i64, LayoutError> {
        Ok(labels.offset(target)? as i64 - end as i64)
    }
}

impl Segment for Toy {
    fn measure(&self, at: u32, floor: u32, labels: &Resolve<'_>) -> Result<u32, LayoutError> {
        match *self {
            Toy::Fixed(n) => Ok(n),
            Toy::Branch(target) => {
                let short = Self::disp(labels, target, at + 2)?;
                if floor <= 2 && i8::try_from(short).is_ok() {
                    Ok(2)
                } else {
                    Ok(5)
                }
            }
            Toy::Near(target) => {
                let disp = Self::disp(labels, target, at + 2)?;
                if i8::try_from(disp).is_err() {
                    return Err(LayoutError::overflow("rel8", disp));
                }
                Ok(2)
            }
            Toy::Align(align) => {
                let mut len = floor;
                while (at + len) % align != 0 {
                    len += 1;
                }
                Ok(len)
            }
        }
    }

    fn emit(
        &self,
        at: u32,
        len: u32,
        labels: &Resolve<'_>,
        out: &mut Vec<u8>,
    ) -> Result<(), LayoutError> {
        match *self {
            Toy::Fixed(n) => out.extend(std::iter::repeat_n(0xAA, n as usize)),
            Toy::Branch(target) | Toy::Near(target) if len == 2 => {
                let disp = Self::disp(labels, target, at + 2)?;
                let op = if matches!(self, Toy::Near(_)) { 0xB2 } else { 0xB0 };
                out.push(op);
                out.push(disp as i8 as u8);
            }
            Toy::Branch(target) | Toy::Near(target) => {
                let disp = Self::disp(labels, target, at + 5)?;
                out.push(0xB1);
                out.extend_from_slice(&(disp as i32).to_le_bytes());
            }
            Toy::Align(_) => out.extend(std::iter::repeat_n(0, len as usize)),
        }
        Ok(())
    }

    fn for_each_label(&self, f: &mut dyn FnMut(Label)) {
        if let Toy::Branch(l) | Toy::Near(l) = self {
            f(*l);
        }
    }

    fn is_position_dependent(&self) -> bool {
        matches!(self, Toy::Align(_))
    }
}
