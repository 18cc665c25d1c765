//! Register-machine lowering.
//!
//! `LoweringTarget` is the surface the driver speaks: moves, arithmetic,
//! comparisons and control flow over registers assigned upstream. Every call
//! appends segments in order; nothing is reordered or scheduled.
//!
//! `X64Lowering` reserves R10 (addresses) and R11 (values) as scratch, and
//! clobbers RAX/RDX in `mul_wide` and `div_rem`.

use relax_core::{Label, LabelTable, LayoutEngine, LayoutError, SourcePos, Stream, SwitchBuilder};

use crate::encoding::{self, Rm, encode, encode_plus_reg, imm32};
use crate::error::NativeError;
use crate::registers::{Cond, Reg, Width};
use crate::segment::{CallTarget, NativeSegment};

/// Memory address without indirection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Addr {
    /// `[reg + disp]`
    Base(Reg, i32),
    /// `[label + disp]`, RIP-relative.
    Label(Label, i32),
}

/// Memory operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
    Direct(Addr),
    /// `[[addr] + disp]`: the pointer stored at `addr`, offset by `disp`.
    Indirect(Addr, i32),
}

impl Location {
    fn base_reg(&self) -> Option<Reg> {
        match self {
            Location::Direct(Addr::Base(r, _)) | Location::Indirect(Addr::Base(r, _), _) => {
                Some(*r)
            }
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    Imm(i64),
    Reg(Reg),
    Mem(Location),
}

impl Operand {
    pub fn base(reg: Reg, disp: i32) -> Self {
        Operand::Mem(Location::Direct(Addr::Base(reg, disp)))
    }

    pub fn label(label: Label, disp: i32) -> Self {
        Operand::Mem(Location::Direct(Addr::Label(label, disp)))
    }

    pub fn indirect(addr: Addr, disp: i32) -> Self {
        Operand::Mem(Location::Indirect(addr, disp))
    }

    fn uses(&self, reg: Reg) -> bool {
        match self {
            Operand::Reg(r) => *r == reg,
            Operand::Mem(loc) => loc.base_reg() == Some(reg),
            Operand::Imm(_) => false,
        }
    }

    fn uses_scratch(&self) -> bool {
        match self {
            Operand::Reg(r) => r.is_scratch(),
            Operand::Mem(loc) => loc.base_reg().is_some_and(Reg::is_scratch),
            Operand::Imm(_) => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
}

impl BinOp {
    /// Group-1 opcode extension.
    fn ext(self) -> u8 {
        match self {
            BinOp::Add => 0,
            BinOp::Or => 1,
            BinOp::And => 4,
            BinOp::Sub => 5,
            BinOp::Xor => 6,
        }
    }

    fn name(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
        }
    }
}

const CMP: u8 = 7;

/// Code-generation surface for one unit.
pub trait LoweringTarget {
    type Output;

    fn new_label(&mut self) -> Label;
    fn place(&mut self, label: Label);
    /// Source position attached to subsequently appended code.
    fn set_pos(&mut self, pos: SourcePos);

    fn mov(&mut self, width: Width, dst: Operand, src: Operand) -> Result<(), NativeError>;
    fn unary(&mut self, op: UnOp, width: Width, dst: Operand) -> Result<(), NativeError>;
    fn binary(
        &mut self,
        op: BinOp,
        width: Width,
        dst: Operand,
        src: Operand,
    ) -> Result<(), NativeError>;
    /// Full product of `a * b` split into `hi:lo`.
    fn mul_wide(
        &mut self,
        width: Width,
        signed: bool,
        hi: Reg,
        lo: Reg,
        a: Operand,
        b: Operand,
    ) -> Result<(), NativeError>;
    fn div_rem(
        &mut self,
        width: Width,
        signed: bool,
        quot: Reg,
        rem: Reg,
        a: Operand,
        b: Operand,
    ) -> Result<(), NativeError>;
    /// Set flags from `a - b`.
    fn compare(&mut self, width: Width, a: Operand, b: Operand) -> Result<(), NativeError>;
    /// `dst = cond ? 1 : 0` from the current flags.
    fn set_if(&mut self, cond: Cond, dst: Reg) -> Result<(), NativeError>;
    fn jump(&mut self, target: Label);
    fn jump_if(&mut self, cond: Cond, target: Label);
    fn call(&mut self, target: CallTarget);
    fn ret(&mut self);
    fn push(&mut self, src: Operand) -> Result<(), NativeError>;
    fn pop(&mut self, dst: Operand) -> Result<(), NativeError>;
    /// Multi-way branch on the 32-bit `value`.
    fn switch(&mut self, value: Operand, cases: SwitchBuilder) -> Result<(), NativeError>;
    /// Inline literal bytes.
    fn data(&mut self, bytes: &[u8]);

    fn finish(self) -> Result<Self::Output, NativeError>;
}

/// Call site needing a relocation against an external symbol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fixup {
    /// Offset of the 32-bit displacement.
    pub offset: u32,
    pub symbol: String,
}

/// Laid-out machine code of one unit.
#[derive(Clone, Debug)]
pub struct CodeUnit {
    pub code: Vec<u8>,
    pub fixups: Vec<Fixup>,
    pub size: u32,
    pub passes: u32,
    labels: LabelTable,
}

impl CodeUnit {
    /// Offset of a label placed in this unit.
    pub fn label(&self, label: Label) -> Result<u32, LayoutError> {
        self.labels.value(label)
    }
}

/// Resolved form of a memory or register operand.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Place {
    Reg(Reg),
    Base(Reg, i32),
    Rip(Label, i32),
}

/// x86-64 implementation of `LoweringTarget`.
#[derive(Debug)]
pub struct X64Lowering {
    pub(crate) stream: Stream<NativeSegment>,
    engine: LayoutEngine,
}

impl X64Lowering {
    pub fn new(engine: LayoutEngine) -> Self {
        Self {
            stream: Stream::new(),
            engine,
        }
    }

    pub fn stream(&self) -> &Stream<NativeSegment> {
        &self.stream
    }

    /// Pad with `int3` to a multiple of `align`.
    pub fn align(&mut self, align: u32) {
        self.stream.push(NativeSegment::Align { align, fill: 0xCC });
    }

    pub(crate) fn code(&mut self, bytes: Vec<u8>) {
        self.stream.push(NativeSegment::Code(bytes));
    }

    pub(crate) fn inst(
        &mut self,
        width: Width,
        opcode: &[u8],
        reg: u8,
        place: Place,
        imm: &[u8],
        force_rex: bool,
    ) {
        let rm = match place {
            Place::Reg(r) => Rm::Reg(r),
            Place::Base(r, d) => Rm::Base(r, d),
            Place::Rip(..) => Rm::Rip,
        };
        let enc = encode(width, opcode, reg, rm, imm, force_rex);
        match (place, enc.rip_disp_at) {
            (Place::Rip(target, addend), Some(disp_at)) => {
                self.stream.push(NativeSegment::RipRef {
                    bytes: enc.bytes,
                    disp_at,
                    target,
                    addend,
                });
            }
            _ => self.code(enc.bytes),
        }
    }

    fn invalid(&self, op: &'static str) -> NativeError {
        NativeError::InvalidOperands {
            op,
            pos: self.stream.pos(),
        }
    }

    fn too_wide(&self, op: &'static str, value: i64) -> NativeError {
        NativeError::ImmediateTooWide {
            op,
            value,
            pos: self.stream.pos(),
        }
    }

    fn check(&self, op: &'static str, operands: &[Operand]) -> Result<(), NativeError> {
        let scratch = operands.iter().any(Operand::uses_scratch);
        if scratch {
            return Err(self.invalid(op));
        }
        Ok(())
    }

    /// Resolve a memory location, loading the pointer into R10 for indirection.
    fn locate(&mut self, loc: Location) -> Place {
        match loc {
            Location::Direct(Addr::Base(r, d)) => Place::Base(r, d),
            Location::Direct(Addr::Label(l, d)) => Place::Rip(l, d),
            Location::Indirect(addr, disp) => {
                let pointer = self.locate(Location::Direct(addr));
                self.inst(Width::W64, &[0x8B], Reg::R10 as u8, pointer, &[], false);
                Place::Base(Reg::R10, disp)
            }
        }
    }

    fn mov_reg_imm(&mut self, width: Width, dst: Reg, value: i64) -> Result<(), NativeError> {
        match width {
            Width::W32 => {
                let imm = imm32(Width::W32, value).ok_or_else(|| self.too_wide("mov", value))?;
                self.code(encode_plus_reg(Width::W32, 0xB8, dst, &imm.to_le_bytes()));
            }
            Width::W64 => {
                if let Ok(imm) = i32::try_from(value) {
                    self.inst(Width::W64, &[0xC7], 0, Place::Reg(dst), &imm.to_le_bytes(), false);
                } else if let Ok(imm) = u32::try_from(value) {
                    // 32-bit moves zero-extend
                    self.code(encode_plus_reg(Width::W32, 0xB8, dst, &imm.to_le_bytes()));
                } else {
                    self.code(encode_plus_reg(Width::W64, 0xB8, dst, &value.to_le_bytes()));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn mov_raw(
        &mut self,
        width: Width,
        dst: Operand,
        src: Operand,
    ) -> Result<(), NativeError> {
        match (dst, src) {
            (Operand::Imm(_), _) => return Err(self.invalid("mov")),
            (Operand::Reg(d), Operand::Imm(v)) => self.mov_reg_imm(width, d, v)?,
            (Operand::Reg(d), Operand::Reg(s)) => {
                if d != s || width == Width::W32 {
                    self.inst(width, &[0x89], s as u8, Place::Reg(d), &[], false);
                }
            }
            (Operand::Reg(d), Operand::Mem(loc)) => {
                let place = self.locate(loc);
                self.inst(width, &[0x8B], d as u8, place, &[], false);
            }
            (Operand::Mem(loc), Operand::Reg(s)) => {
                let place = self.locate(loc);
                self.inst(width, &[0x89], s as u8, place, &[], false);
            }
            (Operand::Mem(loc), Operand::Imm(v)) => match imm32(width, v) {
                Some(imm) => {
                    let place = self.locate(loc);
                    self.inst(width, &[0xC7], 0, place, &imm.to_le_bytes(), false);
                }
                None if width == Width::W64 => {
                    self.mov_reg_imm(Width::W64, Reg::R11, v)?;
                    let place = self.locate(loc);
                    self.inst(width, &[0x89], Reg::R11 as u8, place, &[], false);
                }
                None => return Err(self.too_wide("mov", v)),
            },
            (Operand::Mem(d), Operand::Mem(s)) => {
                let from = self.locate(s);
                self.inst(width, &[0x8B], Reg::R11 as u8, from, &[], false);
                let to = self.locate(d);
                self.inst(width, &[0x89], Reg::R11 as u8, to, &[], false);
            }
        }
        Ok(())
    }

    /// Group-1 ALU operation `dst op= src` (`ext` 7 is `cmp`).
    pub(crate) fn alu_raw(
        &mut self,
        name: &'static str,
        ext: u8,
        width: Width,
        dst: Operand,
        src: Operand,
    ) -> Result<(), NativeError> {
        let base = ext << 3;
        match (dst, src) {
            (Operand::Imm(_), _) => return Err(self.invalid(name)),
            (dst, Operand::Imm(v)) => match imm32(width, v) {
                Some(imm) => {
                    let place = match dst {
                        Operand::Reg(r) => Place::Reg(r),
                        Operand::Mem(loc) => self.locate(loc),
                        Operand::Imm(_) => return Err(self.invalid(name)),
                    };
                    if let Ok(imm8) = i8::try_from(imm) {
                        self.inst(width, &[0x83], ext, place, &[imm8 as u8], false);
                    } else {
                        self.inst(width, &[0x81], ext, place, &imm.to_le_bytes(), false);
                    }
                }
                None if width == Width::W64 => {
                    self.mov_reg_imm(Width::W64, Reg::R11, v)?;
                    self.alu_raw(name, ext, width, dst, Operand::Reg(Reg::R11))?;
                }
                None => return Err(self.too_wide(name, v)),
            },
            (Operand::Reg(d), Operand::Reg(s)) => {
                self.inst(width, &[base + 1], s as u8, Place::Reg(d), &[], false)
            }
            (Operand::Reg(d), Operand::Mem(loc)) => {
                let place = self.locate(loc);
                self.inst(width, &[base + 3], d as u8, place, &[], false);
            }
            (Operand::Mem(loc), Operand::Reg(s)) => {
                let place = self.locate(loc);
                self.inst(width, &[base + 1], s as u8, place, &[], false);
            }
            (Operand::Mem(d), Operand::Mem(s)) => {
                let from = self.locate(s);
                self.inst(width, &[0x8B], Reg::R11 as u8, from, &[], false);
                let to = self.locate(d);
                self.inst(width, &[base + 1], Reg::R11 as u8, to, &[], false);
            }
        }
        Ok(())
    }

    /// `F7 /ext` on a register or memory operand.
    fn group3(&mut self, width: Width, ext: u8, operand: Operand) -> Result<(), NativeError> {
        let place = match operand {
            Operand::Reg(r) => Place::Reg(r),
            Operand::Mem(loc) => self.locate(loc),
            Operand::Imm(_) => return Err(self.invalid("group3")),
        };
        self.inst(width, &[0xF7], ext, place, &[], false);
        Ok(())
    }

    /// Move `b` out of RAX/RDX (or out of an immediate) before they are clobbered.
    fn stage(&mut self, width: Width, b: Operand) -> Result<Operand, NativeError> {
        if matches!(b, Operand::Imm(_)) || b.uses(Reg::Rax) || b.uses(Reg::Rdx) {
            self.mov_raw(width, Operand::Reg(Reg::R11), b)?;
            return Ok(Operand::Reg(Reg::R11));
        }
        Ok(b)
    }

    /// Copy RAX:RDX into `first`/`second` without clobbering either source.
    fn take_rax_rdx(&mut self, width: Width, first: Reg, second: Reg) -> Result<(), NativeError> {
        self.mov_raw(Width::W64, Operand::Reg(Reg::R11), Operand::Reg(Reg::Rdx))?;
        self.mov_raw(width, Operand::Reg(first), Operand::Reg(Reg::Rax))?;
        self.mov_raw(width, Operand::Reg(second), Operand::Reg(Reg::R11))
    }
}

impl LoweringTarget for X64Lowering {
    type Output = CodeUnit;

    fn new_label(&mut self) -> Label {
        self.stream.label()
    }

    fn place(&mut self, label: Label) {
        self.stream.place(label);
    }

    fn set_pos(&mut self, pos: SourcePos) {
        self.stream.set_pos(pos);
    }

    fn mov(&mut self, width: Width, dst: Operand, src: Operand) -> Result<(), NativeError> {
        self.check("mov", &[dst, src])?;
        self.mov_raw(width, dst, src)
    }

    fn unary(&mut self, op: UnOp, width: Width, dst: Operand) -> Result<(), NativeError> {
        let name = match op {
            UnOp::Neg => "neg",
            UnOp::Not => "not",
        };
        self.check(name, &[dst])?;
        if matches!(dst, Operand::Imm(_)) {
            return Err(self.invalid(name));
        }
        let ext = match op {
            UnOp::Neg => 3,
            UnOp::Not => 2,
        };
        self.group3(width, ext, dst)
    }

    fn binary(
        &mut self,
        op: BinOp,
        width: Width,
        dst: Operand,
        src: Operand,
    ) -> Result<(), NativeError> {
        self.check(op.name(), &[dst, src])?;
        self.alu_raw(op.name(), op.ext(), width, dst, src)
    }

    fn mul_wide(
        &mut self,
        width: Width,
        signed: bool,
        hi: Reg,
        lo: Reg,
        a: Operand,
        b: Operand,
    ) -> Result<(), NativeError> {
        self.check("mul", &[Operand::Reg(hi), Operand::Reg(lo), a, b])?;
        if hi == lo {
            return Err(self.invalid("mul"));
        }
        let b = self.stage(width, b)?;
        self.mov_raw(width, Operand::Reg(Reg::Rax), a)?;
        self.group3(width, if signed { 5 } else { 4 }, b)?;
        self.take_rax_rdx(width, lo, hi)
    }

    fn div_rem(
        &mut self,
        width: Width,
        signed: bool,
        quot: Reg,
        rem: Reg,
        a: Operand,
        b: Operand,
    ) -> Result<(), NativeError> {
        self.check("div", &[Operand::Reg(quot), Operand::Reg(rem), a, b])?;
        if quot == rem {
            return Err(self.invalid("div"));
        }
        let b = self.stage(width, b)?;
        self.mov_raw(width, Operand::Reg(Reg::Rax), a)?;
        match (signed, width) {
            // cqo / cdq
            (true, Width::W64) => self.code(vec![0x48, 0x99]),
            (true, Width::W32) => self.code(vec![0x99]),
            // xor edx, edx
            (false, _) => self.code(vec![0x31, 0xD2]),
        }
        self.group3(width, if signed { 7 } else { 6 }, b)?;
        self.take_rax_rdx(width, quot, rem)
    }

    fn compare(&mut self, width: Width, a: Operand, b: Operand) -> Result<(), NativeError> {
        self.check("cmp", &[a, b])?;
        let Operand::Imm(v) = a else {
            return self.alu_raw("cmp", CMP, width, a, b);
        };
        self.mov_raw(width, Operand::Reg(Reg::R11), Operand::Imm(v))?;
        // `a` holds R11, so a wide `b` needs the other scratch register
        let b = match b {
            Operand::Imm(w) if width == Width::W64 && imm32(width, w).is_none() => {
                self.mov_reg_imm(Width::W64, Reg::R10, w)?;
                Operand::Reg(Reg::R10)
            }
            other => other,
        };
        self.alu_raw("cmp", CMP, width, Operand::Reg(Reg::R11), b)
    }

    fn set_if(&mut self, cond: Cond, dst: Reg) -> Result<(), NativeError> {
        self.check("set", &[Operand::Reg(dst)])?;
        // setcc r11b; movzx dst, r11b
        self.inst(
            Width::W32,
            &[0x0F, 0x90 + cond.code()],
            0,
            Place::Reg(Reg::R11),
            &[],
            true,
        );
        self.inst(
            Width::W32,
            &[0x0F, 0xB6],
            dst as u8,
            Place::Reg(Reg::R11),
            &[],
            false,
        );
        Ok(())
    }

    fn jump(&mut self, target: Label) {
        self.stream.push(NativeSegment::Jump(target));
    }

    fn jump_if(&mut self, cond: Cond, target: Label) {
        self.stream.push(NativeSegment::JumpIf(cond, target));
    }

    fn call(&mut self, target: CallTarget) {
        self.stream.push(NativeSegment::Call(target));
    }

    fn ret(&mut self) {
        self.code(vec![0xC3]);
    }

    fn push(&mut self, src: Operand) -> Result<(), NativeError> {
        self.check("push", &[src])?;
        match src {
            Operand::Reg(r) => self.code(encode_plus_reg(Width::W32, 0x50, r, &[])),
            Operand::Imm(v) => match encoding::imm_fits(v) {
                Some(true) => self.code(vec![0x6A, v as i8 as u8]),
                Some(false) => {
                    let mut bytes = vec![0x68];
                    bytes.extend_from_slice(&(v as i32).to_le_bytes());
                    self.code(bytes);
                }
                None => {
                    self.mov_reg_imm(Width::W64, Reg::R11, v)?;
                    self.code(encode_plus_reg(Width::W32, 0x50, Reg::R11, &[]));
                }
            },
            Operand::Mem(loc) => {
                let place = self.locate(loc);
                self.inst(Width::W32, &[0xFF], 6, place, &[], false);
            }
        }
        Ok(())
    }

    fn pop(&mut self, dst: Operand) -> Result<(), NativeError> {
        self.check("pop", &[dst])?;
        match dst {
            Operand::Reg(r) => self.code(encode_plus_reg(Width::W32, 0x58, r, &[])),
            Operand::Mem(loc) => {
                let place = self.locate(loc);
                self.inst(Width::W32, &[0x8F], 0, place, &[], false);
            }
            Operand::Imm(_) => return Err(self.invalid("pop")),
        }
        Ok(())
    }

    fn switch(&mut self, value: Operand, cases: SwitchBuilder) -> Result<(), NativeError> {
        self.check("switch", &[value])?;
        let dispatch = cases
            .at(self.stream.pos())
            .build(self.engine.config())?;
        self.lower_switch(value, &dispatch)
    }

    fn data(&mut self, bytes: &[u8]) {
        self.code(bytes.to_vec());
    }

    fn finish(self) -> Result<CodeUnit, NativeError> {
        let layout = self.engine.run(&self.stream)?;
        let code = self.engine.emit(&self.stream, &layout)?;

        let fixups: Vec<Fixup> = self
            .stream
            .segments()
            .filter_map(|(idx, segment)| match segment {
                NativeSegment::Call(CallTarget::External(symbol)) => Some(Fixup {
                    offset: layout.offset(idx) + 1,
                    symbol: symbol.clone(),
                }),
                _ => None,
            })
            .collect();

        log::debug!(
            "native unit: {} bytes, {} fixups, {} passes",
            layout.size(),
            fixups.len(),
            layout.passes()
        );

        Ok(CodeUnit {
            code,
            fixups,
            size: layout.size(),
            passes: layout.passes(),
            labels: layout.labels().clone(),
        })
    }
}
