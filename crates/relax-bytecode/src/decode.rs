//! Instruction decoder for emitted method code.

use crate::error::BytecodeError;
use crate::opcodes::{self, Cond};

/// Big-endian cursor over a byte slice.
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, at: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.at
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.at >= self.bytes.len()
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], BytecodeError> {
        let end = self.at.checked_add(n).filter(|&end| end <= self.bytes.len());
        let Some(end) = end else {
            return Err(BytecodeError::Truncated {
                at: self.at,
                need: n,
            });
        };
        let slice = &self.bytes[self.at..end];
        self.at = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], BytecodeError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, BytecodeError> {
        Ok(self.array::<1>()?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, BytecodeError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, BytecodeError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub(crate) fn i16(&mut self) -> Result<i16, BytecodeError> {
        Ok(i16::from_be_bytes(self.array()?))
    }

    pub(crate) fn i32(&mut self) -> Result<i32, BytecodeError> {
        Ok(i32::from_be_bytes(self.array()?))
    }
}

/// Decoded operands of one instruction. Branch targets are absolute offsets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operands {
    None,
    Local(u16),
    Iinc { slot: u16, delta: i16 },
    Int(i32),
    /// Constant pool index.
    Index(u16),
    Interface { index: u16, count: u8 },
    MultiArray { index: u16, dims: u8 },
    Byte(u8),
    Branch(u32),
    Table {
        default: u32,
        low: i32,
        targets: Vec<u32>,
    },
    Lookup {
        default: u32,
        pairs: Vec<(i32, u32)>,
    },
}

/// One decoded instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decoded {
    pub pc: u32,
    pub len: u32,
    pub op: u8,
    /// Prefixed by `wide`.
    pub wide: bool,
    pub operands: Operands,
}

impl Decoded {
    pub fn mnemonic(&self) -> &'static str {
        opcodes::mnemonic(self.op).unwrap_or("???")
    }

    pub fn cond(&self) -> Option<Cond> {
        Cond::from_opcode(self.op)
    }

    /// Target a switch instruction selects for `value`.
    pub fn route(&self, value: i32) -> Option<u32> {
        match &self.operands {
            Operands::Table {
                default,
                low,
                targets,
            } => {
                let idx = value as i64 - *low as i64;
                if idx < 0 || idx >= targets.len() as i64 {
                    return Some(*default);
                }
                Some(targets[idx as usize])
            }
            Operands::Lookup { default, pairs } => Some(
                pairs
                    .binary_search_by_key(&value, |&(v, _)| v)
                    .map_or(*default, |i| pairs[i].1),
            ),
            _ => None,
        }
    }
}

fn target(pc: u32, disp: i64) -> u32 {
    (pc as i64 + disp) as u32
}

/// Decode a whole code array.
pub fn decode(code: &[u8]) -> Result<Vec<Decoded>, BytecodeError> {
    let mut r = Reader::new(code);
    let mut out = Vec::new();
    while !r.is_empty() {
        let pc = r.position() as u32;
        let mut op = r.u8()?;
        let wide = op == opcodes::WIDE;
        if wide {
            op = r.u8()?;
        }
        let operands = if wide {
            match op {
                opcodes::ILOAD..=opcodes::ALOAD
                | opcodes::ISTORE..=opcodes::ASTORE
                | opcodes::RET => Operands::Local(r.u16()?),
                opcodes::IINC => Operands::Iinc {
                    slot: r.u16()?,
                    delta: r.i16()?,
                },
                _ => return Err(BytecodeError::UnknownOpcode { op, at: pc + 1 }),
            }
        } else {
            operands(&mut r, pc, op)?
        };
        let len = r.position() as u32 - pc;
        out.push(Decoded {
            pc,
            len,
            op,
            wide,
            operands,
        });
    }
    Ok(out)
}

fn operands(r: &mut Reader<'_>, pc: u32, op: u8) -> Result<Operands, BytecodeError> {
    use opcodes::*;

    let operands = match op {
        ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Operands::Local(r.u8()? as u16),
        ILOAD_0..=ALOAD_3 | ISTORE_0..=ASTORE_3 => Operands::None,
        IINC => Operands::Iinc {
            slot: r.u8()? as u16,
            delta: r.u8()? as i8 as i16,
        },
        BIPUSH => Operands::Int(r.u8()? as i8 as i32),
        SIPUSH => Operands::Int(r.i16()? as i32),
        LDC => Operands::Index(r.u8()? as u16),
        LDC_W | LDC2_W => Operands::Index(r.u16()?),
        IFEQ..=JSR | IFNULL | IFNONNULL => Operands::Branch(target(pc, r.i16()? as i64)),
        GOTO_W | JSR_W => Operands::Branch(target(pc, r.i32()? as i64)),
        GETSTATIC..=INVOKESTATIC | NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => {
            Operands::Index(r.u16()?)
        }
        INVOKEINTERFACE => {
            let index = r.u16()?;
            let count = r.u8()?;
            r.u8()?;
            Operands::Interface { index, count }
        }
        INVOKEDYNAMIC => {
            let index = r.u16()?;
            r.u16()?;
            Operands::Index(index)
        }
        MULTIANEWARRAY => Operands::MultiArray {
            index: r.u16()?,
            dims: r.u8()?,
        },
        NEWARRAY => Operands::Byte(r.u8()?),
        TABLESWITCH | LOOKUPSWITCH => {
            let pad = (4 - r.position() % 4) % 4;
            r.take(pad)?;
            let default = target(pc, r.i32()? as i64);
            if op == TABLESWITCH {
                let low = r.i32()?;
                let high = r.i32()?;
                let count = (high as i64 - low as i64 + 1).max(0) as usize;
                let mut targets = Vec::with_capacity(count.min(code_hint(r)));
                for _ in 0..count {
                    targets.push(target(pc, r.i32()? as i64));
                }
                Operands::Table {
                    default,
                    low,
                    targets,
                }
            } else {
                let count = r.u32()? as usize;
                let mut pairs = Vec::with_capacity(count.min(code_hint(r)));
                for _ in 0..count {
                    let value = r.i32()?;
                    pairs.push((value, target(pc, r.i32()? as i64)));
                }
                Operands::Lookup { default, pairs }
            }
        }
        _ if simple_effect(op).is_some() => Operands::None,
        _ => return Err(BytecodeError::UnknownOpcode { op, at: pc }),
    };
    Ok(operands)
}

/// Upper bound on entries a hostile count can preallocate.
fn code_hint(r: &Reader<'_>) -> usize {
    r.bytes.len().saturating_sub(r.position()) / 4
}
