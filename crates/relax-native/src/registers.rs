//! General-purpose registers, operand widths and condition codes.

use std::fmt;

/// 64-bit general-purpose register, numbered by its hardware encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    /// Low three bits, as placed in ModR/M, SIB or the opcode.
    #[inline]
    pub fn low3(self) -> u8 {
        (self as u8) & 0x07
    }

    /// Whether the register needs a REX extension bit.
    #[inline]
    pub fn is_extended(self) -> bool {
        (self as u8) >= 8
    }

    /// Reserved by the lowering as address and value scratch.
    pub fn is_scratch(self) -> bool {
        matches!(self, Reg::R10 | Reg::R11)
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reg::Rax => "rax",
            Reg::Rcx => "rcx",
            Reg::Rdx => "rdx",
            Reg::Rbx => "rbx",
            Reg::Rsp => "rsp",
            Reg::Rbp => "rbp",
            Reg::Rsi => "rsi",
            Reg::Rdi => "rdi",
            Reg::R8 => "r8",
            Reg::R9 => "r9",
            Reg::R10 => "r10",
            Reg::R11 => "r11",
            Reg::R12 => "r12",
            Reg::R13 => "r13",
            Reg::R14 => "r14",
            Reg::R15 => "r15",
        };
        f.write_str(name)
    }
}

/// Operand size of an integer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    W32,
    W64,
}

impl Width {
    #[inline]
    pub fn is_64(self) -> bool {
        self == Width::W64
    }
}

/// Condition code, numbered as in `Jcc`/`SETcc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cond {
    Overflow = 0x0,
    NoOverflow = 0x1,
    /// Unsigned `<`.
    Below = 0x2,
    AboveEq = 0x3,
    Eq = 0x4,
    Ne = 0x5,
    BelowEq = 0x6,
    /// Unsigned `>`.
    Above = 0x7,
    Sign = 0x8,
    NoSign = 0x9,
    Parity = 0xa,
    NoParity = 0xb,
    /// Signed `<`.
    Lt = 0xc,
    Ge = 0xd,
    Le = 0xe,
    Gt = 0xf,
}

impl Cond {
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Condition true exactly when `self` is false.
    pub fn negate(self) -> Cond {
        match self {
            Cond::Overflow => Cond::NoOverflow,
            Cond::NoOverflow => Cond::Overflow,
            Cond::Below => Cond::AboveEq,
            Cond::AboveEq => Cond::Below,
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::BelowEq => Cond::Above,
            Cond::Above => Cond::BelowEq,
            Cond::Sign => Cond::NoSign,
            Cond::NoSign => Cond::Sign,
            Cond::Parity => Cond::NoParity,
            Cond::NoParity => Cond::Parity,
            Cond::Lt => Cond::Ge,
            Cond::Ge => Cond::Lt,
            Cond::Le => Cond::Gt,
            Cond::Gt => Cond::Le,
        }
    }
}
