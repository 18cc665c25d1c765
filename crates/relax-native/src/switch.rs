//! Native multi-way dispatch.
//!
//! Dense tables bounds-check the biased value and jump through a table of
//! 32-bit offsets relative to the table start:
//!
//! ```text
//! mov   r11d, value
//! sub   r11d, low
//! cmp   r11d, n-1
//! ja    default
//! lea   r10, [rip+table]
//! movsxd r11, [r10+r11*4]
//! add   r11, r10
//! jmp   r11
//! table: dd target_i - table ...
//! ```
//!
//! Sparse cases compile to a binary search that falls back to a linear scan
//! for short runs.

use relax_core::{Dispatch, Label};

use crate::encoding::{Rex, modrm};
use crate::error::NativeError;
use crate::lower::{Operand, Place, X64Lowering};
use crate::registers::{Cond, Reg, Width};
use crate::segment::NativeSegment;

/// Runs shorter than this are compared linearly.
const LINEAR_RUN: usize = 4;

const SUB: u8 = 5;
const CMP: u8 = 7;

impl X64Lowering {
    pub(crate) fn lower_switch(
        &mut self,
        value: Operand,
        dispatch: &Dispatch,
    ) -> Result<(), NativeError> {
        self.mov_raw(Width::W32, Operand::Reg(Reg::R11), value)?;
        match dispatch {
            Dispatch::Dense(table) => {
                let last = table.targets.len() as i64 - 1;
                if table.low != 0 {
                    self.alu_raw(
                        "sub",
                        SUB,
                        Width::W32,
                        Operand::Reg(Reg::R11),
                        Operand::Imm(table.low as i64),
                    )?;
                }
                self.alu_raw(
                    "cmp",
                    CMP,
                    Width::W32,
                    Operand::Reg(Reg::R11),
                    Operand::Imm(last),
                )?;
                self.stream
                    .push(NativeSegment::JumpIf(Cond::Above, table.default));

                let base = self.stream.label();
                self.inst(Width::W64, &[0x8D], Reg::R10 as u8, Place::Rip(base, 0), &[], false);
                // movsxd r11, [r10 + r11*4]
                let rex = Rex::new().w(true).r(true).x(true).b(true);
                self.code(vec![
                    rex.encode(),
                    0x63,
                    modrm(0b00, Reg::R11.low3(), 0b100),
                    (0b10 << 6) | (Reg::R11.low3() << 3) | Reg::R10.low3(),
                ]);
                self.alu_raw(
                    "add",
                    0,
                    Width::W64,
                    Operand::Reg(Reg::R11),
                    Operand::Reg(Reg::R10),
                )?;
                self.inst(Width::W32, &[0xFF], 4, Place::Reg(Reg::R11), &[], false);

                self.stream.push(NativeSegment::Align {
                    align: 4,
                    fill: 0xCC,
                });
                self.stream.place(base);
                self.stream.push(NativeSegment::JumpTable {
                    base,
                    targets: table.targets.clone(),
                });
            }
            Dispatch::Sparse(table) => self.search(&table.cases, table.default)?,
        }
        Ok(())
    }

    fn compare_r11(&mut self, value: i32) -> Result<(), NativeError> {
        self.alu_raw(
            "cmp",
            CMP,
            Width::W32,
            Operand::Reg(Reg::R11),
            Operand::Imm(value as i64),
        )
    }

    fn search(&mut self, cases: &[(i32, Label)], default: Label) -> Result<(), NativeError> {
        if cases.len() < LINEAR_RUN {
            for &(value, target) in cases {
                self.compare_r11(value)?;
                self.stream.push(NativeSegment::JumpIf(Cond::Eq, target));
            }
            self.stream.push(NativeSegment::Jump(default));
            return Ok(());
        }

        let mid = cases.len() / 2;
        let (value, target) = cases[mid];
        let left = self.stream.label();
        self.compare_r11(value)?;
        self.stream.push(NativeSegment::JumpIf(Cond::Eq, target));
        self.stream.push(NativeSegment::JumpIf(Cond::Lt, left));
        self.search(&cases[mid + 1..], default)?;
        self.stream.place(left);
        self.search(&cases[..mid], default)
    }
}
