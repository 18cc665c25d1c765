//! Native code segments.

use relax_core::{Label, LayoutError, Resolve, Segment};

use crate::registers::Cond;

/// Target of a `call`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CallTarget {
    /// A label in the same unit.
    Label(Label),
    /// A symbol resolved at link time through a relocation.
    External(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NativeSegment {
    /// Fixed machine code or inline data.
    Code(Vec<u8>),
    /// `jmp rel8` / `jmp rel32`
    Jump(Label),
    /// `jcc rel8` / `jcc rel32`
    JumpIf(Cond, Label),
    /// `call rel32`; external targets leave a zero displacement.
    Call(CallTarget),
    /// Instruction with a RIP-relative displacement at `disp_at`, resolved to
    /// `target + addend` relative to the end of the instruction.
    RipRef {
        bytes: Vec<u8>,
        disp_at: usize,
        target: Label,
        addend: i32,
    },
    /// 32-bit entries holding `target - base`.
    JumpTable { base: Label, targets: Vec<Label> },
    /// Padding with `fill` up to a multiple of `align`.
    Align { align: u32, fill: u8 },
}

fn disp(labels: &Resolve<'_>, target: Label, end: u32) -> Result<i64, LayoutError> {
    Ok(labels.offset(target)? as i64 - end as i64)
}

fn rel32(value: i64) -> Result<[u8; 4], LayoutError> {
    let value = i32::try_from(value).map_err(|_| LayoutError::overflow("rel32", value))?;
    Ok(value.to_le_bytes())
}

impl Segment for NativeSegment {
    fn measure(&self, at: u32, floor: u32, labels: &Resolve<'_>) -> Result<u32, LayoutError> {
        let len = match self {
            NativeSegment::Code(bytes) => bytes.len() as u32,
            NativeSegment::Jump(target) => {
                let short = disp(labels, *target, at + 2)?;
                if floor <= 2 && i8::try_from(short).is_ok() {
                    2
                } else {
                    5
                }
            }
            NativeSegment::JumpIf(_, target) => {
                let short = disp(labels, *target, at + 2)?;
                if floor <= 2 && i8::try_from(short).is_ok() {
                    2
                } else {
                    6
                }
            }
            NativeSegment::Call(_) => 5,
            NativeSegment::RipRef { bytes, .. } => bytes.len() as u32,
            NativeSegment::JumpTable { targets, .. } => 4 * targets.len() as u32,
            NativeSegment::Align { align, .. } => {
                let align = (*align).max(1);
                let mut len = floor;
                while (at + len) % align != 0 {
                    len += 1;
                }
                len
            }
        };
        Ok(len)
    }

    fn emit(
        &self,
        at: u32,
        len: u32,
        labels: &Resolve<'_>,
        out: &mut Vec<u8>,
    ) -> Result<(), LayoutError> {
        match self {
            NativeSegment::Code(bytes) => out.extend_from_slice(bytes),
            NativeSegment::Jump(target) => {
                if len == 2 {
                    out.extend_from_slice(&[0xEB, disp(labels, *target, at + 2)? as i8 as u8]);
                } else {
                    out.push(0xE9);
                    out.extend_from_slice(&rel32(disp(labels, *target, at + 5)?)?);
                }
            }
            NativeSegment::JumpIf(cond, target) => {
                if len == 2 {
                    let d = disp(labels, *target, at + 2)?;
                    out.extend_from_slice(&[0x70 + cond.code(), d as i8 as u8]);
                } else {
                    out.extend_from_slice(&[0x0F, 0x80 + cond.code()]);
                    out.extend_from_slice(&rel32(disp(labels, *target, at + 6)?)?);
                }
            }
            NativeSegment::Call(target) => {
                out.push(0xE8);
                match target {
                    CallTarget::Label(label) => {
                        out.extend_from_slice(&rel32(disp(labels, *label, at + 5)?)?)
                    }
                    CallTarget::External(_) => out.extend_from_slice(&[0; 4]),
                }
            }
            NativeSegment::RipRef {
                bytes,
                disp_at,
                target,
                addend,
            } => {
                let start = out.len();
                out.extend_from_slice(bytes);
                let end = at + bytes.len() as u32;
                let value = disp(labels, *target, end)? + *addend as i64;
                out[start + disp_at..start + disp_at + 4].copy_from_slice(&rel32(value)?);
            }
            NativeSegment::JumpTable { base, targets } => {
                let base = labels.offset(*base)? as i64;
                for &target in targets {
                    out.extend_from_slice(&rel32(labels.offset(target)? as i64 - base)?);
                }
            }
            NativeSegment::Align { fill, .. } => {
                out.extend(std::iter::repeat_n(*fill, len as usize));
            }
        }
        Ok(())
    }

    fn for_each_label(&self, f: &mut dyn FnMut(Label)) {
        match self {
            NativeSegment::Jump(target)
            | NativeSegment::JumpIf(_, target)
            | NativeSegment::Call(CallTarget::Label(target))
            | NativeSegment::RipRef { target, .. } => f(*target),
            NativeSegment::JumpTable { base, targets } => {
                f(*base);
                targets.iter().copied().for_each(f);
            }
            _ => {}
        }
    }

    fn is_position_dependent(&self) -> bool {
        matches!(self, NativeSegment::Align { .. })
    }
}
