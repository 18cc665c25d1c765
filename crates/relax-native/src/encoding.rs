//! x86-64 instruction encoding.
//!
//! ```text
//! [REX] [Opcode] [ModR/M] [SIB] [Disp] [Imm]
//! ```
//!
//! RIP-relative operands are encoded with a zero displacement whose position
//! is reported back, so the caller can patch it once the target is laid out.

use crate::registers::{Reg, Width};

/// REX prefix builder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rex {
    w: bool,
    r: bool,
    x: bool,
    b: bool,
}

impl Rex {
    pub fn new() -> Self {
        Self::default()
    }

    /// 64-bit operand size.
    pub fn w(mut self, on: bool) -> Self {
        self.w = on;
        self
    }

    /// ModR/M reg field extension.
    pub fn r(mut self, on: bool) -> Self {
        self.r = on;
        self
    }

    /// SIB index extension.
    pub fn x(mut self, on: bool) -> Self {
        self.x = on;
        self
    }

    /// ModR/M r/m or SIB base extension.
    pub fn b(mut self, on: bool) -> Self {
        self.b = on;
        self
    }

    pub fn is_needed(&self) -> bool {
        self.w || self.r || self.x || self.b
    }

    pub fn encode(&self) -> u8 {
        0x40 | ((self.w as u8) << 3) | ((self.r as u8) << 2) | ((self.x as u8) << 1) | (self.b as u8)
    }
}

#[inline]
pub fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
    (mode << 6) | ((reg & 0x07) << 3) | (rm & 0x07)
}

/// The r/m operand of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rm {
    Reg(Reg),
    /// `[base + disp]`
    Base(Reg, i32),
    /// `[rip + disp32]`, displacement patched later.
    Rip,
}

/// Encoded instruction bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    /// Offset of the RIP-relative displacement within `bytes`.
    pub rip_disp_at: Option<usize>,
}

/// Encode `opcode` with a ModR/M operand pair.
///
/// `reg` is either a register number or an opcode extension (`/n`); values
/// 8..=15 set REX.R. `force_rex` emits a REX prefix even when no bit is set,
/// which selects `spl`..`dil` for byte operands.
pub fn encode(
    width: Width,
    opcode: &[u8],
    reg: u8,
    rm: Rm,
    imm: &[u8],
    force_rex: bool,
) -> Encoded {
    let mut bytes = Vec::with_capacity(opcode.len() + 10 + imm.len());
    let base_ext = match rm {
        Rm::Reg(r) | Rm::Base(r, _) => r.is_extended(),
        Rm::Rip => false,
    };
    let rex = Rex::new()
        .w(width.is_64())
        .r(reg >= 8)
        .b(base_ext);
    if rex.is_needed() || force_rex {
        bytes.push(rex.encode());
    }
    bytes.extend_from_slice(opcode);

    let mut rip_disp_at = None;
    match rm {
        Rm::Reg(r) => bytes.push(modrm(0b11, reg, r.low3())),
        Rm::Base(base, disp) => {
            // rbp/r13 have no disp-less form; rsp/r12 need a SIB byte.
            let mode = if disp == 0 && base.low3() != 5 {
                0b00
            } else if i8::try_from(disp).is_ok() {
                0b01
            } else {
                0b10
            };
            bytes.push(modrm(mode, reg, base.low3()));
            if base.low3() == 4 {
                bytes.push(0x24);
            }
            match mode {
                0b01 => bytes.push(disp as i8 as u8),
                0b10 => bytes.extend_from_slice(&disp.to_le_bytes()),
                _ => {}
            }
        }
        Rm::Rip => {
            bytes.push(modrm(0b00, reg, 0b101));
            rip_disp_at = Some(bytes.len());
            bytes.extend_from_slice(&[0; 4]);
        }
    }
    bytes.extend_from_slice(imm);

    Encoded { bytes, rip_disp_at }
}

/// Encode an instruction whose register lives in the low opcode bits
/// (`push r`, `pop r`, `mov r, imm`).
pub fn encode_plus_reg(width: Width, opcode: u8, reg: Reg, imm: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(2 + imm.len());
    let rex = Rex::new().w(width.is_64()).b(reg.is_extended());
    if rex.is_needed() {
        bytes.push(rex.encode());
    }
    bytes.push(opcode + reg.low3());
    bytes.extend_from_slice(imm);
    bytes
}

/// Smallest immediate encoding: `Some(true)` for imm8, `Some(false)` for
/// imm32, `None` when the value needs 64 bits.
pub fn imm_fits(value: i64) -> Option<bool> {
    if i8::try_from(value).is_ok() {
        Some(true)
    } else if i32::try_from(value).is_ok() {
        Some(false)
    } else {
        None
    }
}

/// 32-bit immediate for an operation of `width`.
///
/// 32-bit operations accept any value representable in 32 bits; 64-bit
/// operations sign-extend, so the value must fit `i32`.
pub fn imm32(width: Width, value: i64) -> Option<i32> {
    match width {
        Width::W64 => i32::try_from(value).ok(),
        Width::W32 => i32::try_from(value)
            .ok()
            .or_else(|| u32::try_from(value).ok().map(|v| v as i32)),
    }
}
