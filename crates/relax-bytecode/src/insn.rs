//! Managed instruction segments.
//!
//! Every variant picks the shortest encoding that holds its operands:
//! `iload_1` over `iload 1` over `wide iload 1`, `goto` over `goto_w`.
//! A conditional branch that outgrows the 16-bit offset is rewritten as the
//! inverse condition skipping over a `goto_w`.

use relax_core::{Dispatch, Label, LayoutError, Resolve, Segment};

use crate::opcodes::{self, Cond, Kind};

/// Direction of a local-variable access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Load,
    Store,
}

/// One managed instruction, with its operands already resolved to values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Insn {
    /// Operand-less opcode (arithmetic, stack shuffles, returns).
    Op(u8),
    Local {
        access: Access,
        kind: Kind,
        slot: u16,
    },
    Iinc {
        slot: u16,
        delta: i16,
    },
    /// Integer constant: `iconst_*`, `bipush` or `sipush`.
    Int(i32),
    /// Constant pool load; `two_words` selects `ldc2_w` for long/double.
    Ldc {
        index: u16,
        two_words: bool,
    },
    /// Constant-pool-indexed instruction (`getfield`, `invokestatic`, `new`, ...)
    /// with its stack effect in words.
    Ref {
        op: u8,
        index: u16,
        pops: u16,
        pushes: u16,
    },
    InvokeInterface {
        index: u16,
        count: u8,
        pops: u16,
        pushes: u16,
    },
    /// Opcode with a single byte operand, such as `newarray`.
    Byte {
        op: u8,
        value: u8,
    },
    Jump {
        cond: Option<Cond>,
        target: Label,
    },
    Switch(Dispatch),
}

impl Insn {
    pub fn load(kind: Kind, slot: u16) -> Self {
        Insn::Local {
            access: Access::Load,
            kind,
            slot,
        }
    }

    pub fn store(kind: Kind, slot: u16) -> Self {
        Insn::Local {
            access: Access::Store,
            kind,
            slot,
        }
    }

    pub fn goto(target: Label) -> Self {
        Insn::Jump { cond: None, target }
    }

    pub fn branch(cond: Cond, target: Label) -> Self {
        Insn::Jump {
            cond: Some(cond),
            target,
        }
    }

    /// Stack effect `(pops, pushes)` in words, if known.
    pub fn effect(&self) -> Option<(u16, u16)> {
        match self {
            Insn::Op(op) => opcodes::simple_effect(*op),
            Insn::Local {
                access: Access::Load,
                kind,
                ..
            } => Some((0, kind.words())),
            Insn::Local {
                access: Access::Store,
                kind,
                ..
            } => Some((kind.words(), 0)),
            Insn::Iinc { .. } => Some((0, 0)),
            Insn::Int(_) => Some((0, 1)),
            Insn::Ldc { two_words, .. } => Some((0, if *two_words { 2 } else { 1 })),
            Insn::Ref { pops, pushes, .. } | Insn::InvokeInterface { pops, pushes, .. } => {
                Some((*pops, *pushes))
            }
            Insn::Byte { op, .. } => match *op {
                opcodes::NEWARRAY => Some((1, 1)),
                opcodes::BIPUSH => Some((0, 1)),
                _ => None,
            },
            Insn::Jump { cond, .. } => Some((cond.map_or(0, Cond::pops), 0)),
            Insn::Switch(_) => Some((1, 0)),
        }
    }

    /// Whether execution can continue with the next instruction.
    pub fn falls_through(&self) -> bool {
        match self {
            Insn::Op(op) => !opcodes::is_terminal(*op),
            Insn::Jump { cond, .. } => cond.is_some(),
            Insn::Switch(_) => false,
            _ => true,
        }
    }
}

fn local_len(slot: u16) -> u32 {
    match slot {
        0..=3 => 1,
        4..=0xff => 2,
        _ => 4,
    }
}

/// Zero bytes between a switch opcode at `op_at` and its 4-byte aligned body.
fn switch_pad(op_at: u32) -> u32 {
    (4 - (op_at + 1) % 4) % 4
}

fn switch_body(dispatch: &Dispatch) -> u32 {
    match dispatch {
        Dispatch::Dense(t) => 12 + 4 * t.targets.len() as u32,
        Dispatch::Sparse(t) => 8 + 8 * t.cases.len() as u32,
    }
}

fn rel(labels: &Resolve<'_>, target: Label, from: u32) -> Result<i64, LayoutError> {
    Ok(labels.offset(target)? as i64 - from as i64)
}

fn rel32(labels: &Resolve<'_>, target: Label, from: u32) -> Result<[u8; 4], LayoutError> {
    let disp = rel(labels, target, from)?;
    let disp = i32::try_from(disp).map_err(|_| LayoutError::overflow("branch32", disp))?;
    Ok(disp.to_be_bytes())
}

impl Segment for Insn {
    fn measure(&self, at: u32, floor: u32, labels: &Resolve<'_>) -> Result<u32, LayoutError> {
        let len = match self {
            Insn::Op(_) => 1,
            Insn::Local { slot, .. } => local_len(*slot),
            Insn::Iinc { slot, delta } => {
                if *slot <= 0xff && i8::try_from(*delta).is_ok() {
                    3
                } else {
                    6
                }
            }
            Insn::Int(value) => match *value {
                -1..=5 => 1,
                v if i8::try_from(v).is_ok() => 2,
                v if i16::try_from(v).is_ok() => 3,
                v => return Err(LayoutError::overflow("sipush", v as i64)),
            },
            Insn::Ldc { index, two_words } => {
                if !*two_words && *index <= 0xff {
                    2
                } else {
                    3
                }
            }
            Insn::Ref { .. } => 3,
            Insn::InvokeInterface { .. } => 5,
            Insn::Byte { .. } => 2,
            Insn::Jump { cond, target } => {
                let disp = rel(labels, *target, at)?;
                if floor <= 3 && i16::try_from(disp).is_ok() {
                    3
                } else if cond.is_some() {
                    8
                } else {
                    5
                }
            }
            Insn::Switch(dispatch) => {
                // Lengths reachable at `at` differ by multiples of 4 (nop prefix).
                let mut len = 1 + switch_pad(at) + switch_body(dispatch);
                while len < floor {
                    len += 4;
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
            Insn::Op(op) => out.push(*op),
            Insn::Local {
                access,
                kind,
                slot,
            } => {
                let (short, long) = match access {
                    Access::Load => (kind.load_short(), kind.load()),
                    Access::Store => (kind.store_short(), kind.store()),
                };
                match len {
                    1 => out.push(short + *slot as u8),
                    2 => out.extend_from_slice(&[long, *slot as u8]),
                    _ => {
                        out.extend_from_slice(&[opcodes::WIDE, long]);
                        out.extend_from_slice(&slot.to_be_bytes());
                    }
                }
            }
            Insn::Iinc { slot, delta } => {
                if len == 3 {
                    out.extend_from_slice(&[opcodes::IINC, *slot as u8, *delta as i8 as u8]);
                } else {
                    out.extend_from_slice(&[opcodes::WIDE, opcodes::IINC]);
                    out.extend_from_slice(&slot.to_be_bytes());
                    out.extend_from_slice(&delta.to_be_bytes());
                }
            }
            Insn::Int(value) => match len {
                1 => out.push((opcodes::ICONST_0 as i32 + *value) as u8),
                2 => out.extend_from_slice(&[opcodes::BIPUSH, *value as i8 as u8]),
                _ => {
                    out.push(opcodes::SIPUSH);
                    out.extend_from_slice(&(*value as i16).to_be_bytes());
                }
            },
            Insn::Ldc { index, two_words } => {
                if *two_words {
                    out.push(opcodes::LDC2_W);
                    out.extend_from_slice(&index.to_be_bytes());
                } else if len == 2 {
                    out.extend_from_slice(&[opcodes::LDC, *index as u8]);
                } else {
                    out.push(opcodes::LDC_W);
                    out.extend_from_slice(&index.to_be_bytes());
                }
            }
            Insn::Ref { op, index, .. } => {
                out.push(*op);
                out.extend_from_slice(&index.to_be_bytes());
            }
            Insn::InvokeInterface { index, count, .. } => {
                out.push(opcodes::INVOKEINTERFACE);
                out.extend_from_slice(&index.to_be_bytes());
                out.extend_from_slice(&[*count, 0]);
            }
            Insn::Byte { op, value } => out.extend_from_slice(&[*op, *value]),
            Insn::Jump { cond, target } => match len {
                3 => {
                    let disp = rel(labels, *target, at)?;
                    let disp =
                        i16::try_from(disp).map_err(|_| LayoutError::overflow("branch16", disp))?;
                    out.push(cond.map_or(opcodes::GOTO, Cond::opcode));
                    out.extend_from_slice(&disp.to_be_bytes());
                }
                5 => {
                    out.push(opcodes::GOTO_W);
                    out.extend_from_slice(&rel32(labels, *target, at)?);
                }
                _ => {
                    let cond = cond.map_or(Cond::Eq, Cond::negate);
                    out.extend_from_slice(&[cond.opcode(), 0x00, 0x08, opcodes::GOTO_W]);
                    out.extend_from_slice(&rel32(labels, *target, at + 3)?);
                }
            },
            Insn::Switch(dispatch) => {
                let nops = len - (1 + switch_pad(at) + switch_body(dispatch));
                out.extend(std::iter::repeat_n(opcodes::NOP, nops as usize));
                let op_at = at + nops;
                match dispatch {
                    Dispatch::Dense(t) => {
                        out.push(opcodes::TABLESWITCH);
                        out.extend(std::iter::repeat_n(0, switch_pad(op_at) as usize));
                        out.extend_from_slice(&rel32(labels, t.default, op_at)?);
                        out.extend_from_slice(&t.low.to_be_bytes());
                        out.extend_from_slice(&t.high().to_be_bytes());
                        for &target in &t.targets {
                            out.extend_from_slice(&rel32(labels, target, op_at)?);
                        }
                    }
                    Dispatch::Sparse(t) => {
                        out.push(opcodes::LOOKUPSWITCH);
                        out.extend(std::iter::repeat_n(0, switch_pad(op_at) as usize));
                        out.extend_from_slice(&rel32(labels, t.default, op_at)?);
                        out.extend_from_slice(&(t.cases.len() as i32).to_be_bytes());
                        for &(value, target) in &t.cases {
                            out.extend_from_slice(&value.to_be_bytes());
                            out.extend_from_slice(&rel32(labels, target, op_at)?);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn for_each_label(&self, f: &mut dyn FnMut(Label)) {
        match self {
            Insn::Jump { target, .. } => f(*target),
            Insn::Switch(dispatch) => dispatch.labels().for_each(f),
            _ => {}
        }
    }

    fn is_position_dependent(&self) -> bool {
        matches!(self, Insn::Switch(_))
    }
}
