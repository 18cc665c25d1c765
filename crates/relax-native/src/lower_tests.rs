use relax_core::{LayoutEngine, LayoutError, SourcePos};

use crate::error::NativeError;
use crate::lower::{Addr, BinOp, CodeUnit, LoweringTarget, Operand, UnOp, X64Lowering};
use crate::registers::{Cond, Reg, Width};
use crate::segment::CallTarget;

fn lower(f: impl FnOnce(&mut X64Lowering) -> Result<(), NativeError>) -> CodeUnit {
    let mut x = X64Lowering::new(LayoutEngine::default());
    f(&mut x).unwrap();
    x.finish().unwrap()
}

fn bytes(f: impl FnOnce(&mut X64Lowering) -> Result<(), NativeError>) -> Vec<u8> {
    lower(f).code
}

fn lower_err(f: impl FnOnce(&mut X64Lowering) -> Result<(), NativeError>) -> NativeError {
    let mut x = X64Lowering::new(LayoutEngine::default());
    f(&mut x).unwrap_err()
}

use Operand::{Imm, Reg as R};

#[test]
fn mov_register_forms() {
    assert_eq!(bytes(|x| x.mov(Width::W64, R(Reg::Rax), R(Reg::Rbx))), [0x48, 0x89, 0xD8]);
    assert_eq!(bytes(|x| x.mov(Width::W32, R(Reg::Rcx), R(Reg::Rdx))), [0x89, 0xD1]);
    assert!(bytes(|x| x.mov(Width::W64, R(Reg::Rax), R(Reg::Rax))).is_empty());
}

#[test]
fn mov_immediate_picks_smallest_form() {
    assert_eq!(
        bytes(|x| x.mov(Width::W32, R(Reg::Rax), Imm(5))),
        [0xB8, 0x05, 0x00, 0x00, 0x00]
    );
    assert_eq!(
        bytes(|x| x.mov(Width::W64, R(Reg::Rax), Imm(-1))),
        [0x48, 0xC7, 0xC0, 0xFF, 0xFF, 0xFF, 0xFF]
    );
    assert_eq!(
        bytes(|x| x.mov(Width::W64, R(Reg::Rcx), Imm(0xFFFF_FFFF))),
        [0xB9, 0xFF, 0xFF, 0xFF, 0xFF]
    );
    assert_eq!(
        bytes(|x| x.mov(Width::W64, R(Reg::Rax), Imm(0x1_0000_0000))),
        [0x48, 0xB8, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]
    );
}

#[test]
fn mov_memory_displacements() {
    assert_eq!(
        bytes(|x| x.mov(Width::W64, R(Reg::R8), Operand::base(Reg::Rbp, -8))),
        [0x4C, 0x8B, 0x45, 0xF8]
    );
    assert_eq!(
        bytes(|x| x.mov(Width::W32, Operand::base(Reg::Rsp, 16), R(Reg::Rax))),
        [0x89, 0x44, 0x24, 0x10]
    );
    assert_eq!(
        bytes(|x| x.mov(Width::W32, Operand::base(Reg::Rbx, 0), Imm(7))),
        [0xC7, 0x03, 0x07, 0x00, 0x00, 0x00]
    );
    assert_eq!(
        bytes(|x| x.mov(Width::W64, R(Reg::Rax), Operand::base(Reg::Rsi, 0x1000))),
        [0x48, 0x8B, 0x86, 0x00, 0x10, 0x00, 0x00]
    );
}

#[test]
fn mov_through_pointer() {
    let code = bytes(|x| {
        x.mov(
            Width::W64,
            R(Reg::Rax),
            Operand::indirect(Addr::Base(Reg::Rbp, -8), 4),
        )
    });

    // mov r10, [rbp-8]; mov rax, [r10+4]
    assert_eq!(code, [0x4C, 0x8B, 0x55, 0xF8, 0x49, 0x8B, 0x42, 0x04]);
}

#[test]
fn rip_relative_load() {
    let code = bytes(|x| {
        let data = x.new_label();
        x.mov(Width::W32, R(Reg::Rax), Operand::label(data, 0))?;
        x.ret();
        x.place(data);
        x.data(&[1, 2, 3, 4]);
        Ok(())
    });

    assert_eq!(code, [0x8B, 0x05, 0x01, 0x00, 0x00, 0x00, 0xC3, 1, 2, 3, 4]);
}

#[test]
fn alu_forms() {
    assert_eq!(
        bytes(|x| x.binary(BinOp::Add, Width::W64, R(Reg::Rax), Imm(1))),
        [0x48, 0x83, 0xC0, 0x01]
    );
    assert_eq!(
        bytes(|x| x.binary(BinOp::Add, Width::W64, R(Reg::Rax), Imm(1000))),
        [0x48, 0x81, 0xC0, 0xE8, 0x03, 0x00, 0x00]
    );
    assert_eq!(
        bytes(|x| x.binary(BinOp::Sub, Width::W32, R(Reg::Rcx), R(Reg::Rdx))),
        [0x29, 0xD1]
    );
    assert_eq!(
        bytes(|x| x.binary(BinOp::Xor, Width::W64, R(Reg::R9), Operand::base(Reg::Rax, 0))),
        [0x4C, 0x33, 0x08]
    );
    assert_eq!(bytes(|x| x.unary(UnOp::Neg, Width::W64, R(Reg::Rax))), [0x48, 0xF7, 0xD8]);
    assert_eq!(bytes(|x| x.unary(UnOp::Not, Width::W32, R(Reg::Rcx))), [0xF7, 0xD1]);
    assert_eq!(
        bytes(|x| x.compare(Width::W32, R(Reg::Rcx), Imm(10))),
        [0x83, 0xF9, 0x0A]
    );
}

#[test]
fn compare_two_constants_keeps_both() {
    assert_eq!(
        bytes(|x| x.compare(Width::W64, Imm(5), Imm(1 << 40))),
        [
            0x49, 0xC7, 0xC3, 0x05, 0x00, 0x00, 0x00, // mov r11, 5
            0x49, 0xBA, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, // mov r10, 1 << 40
            0x4D, 0x39, 0xD3, // cmp r11, r10
        ]
    );
    assert_eq!(
        bytes(|x| x.compare(Width::W64, Imm(5), Imm(7))),
        [0x49, 0xC7, 0xC3, 0x05, 0x00, 0x00, 0x00, 0x49, 0x83, 0xFB, 0x07]
    );
}

#[test]
fn wide_multiply_splits_rdx_rax() {
    let code = bytes(|x| x.mul_wide(Width::W64, false, Reg::Rdx, Reg::Rax, R(Reg::Rcx), R(Reg::Rbx)));

    // mov rax, rcx; mul rbx; mov r11, rdx; mov rdx, r11
    assert_eq!(
        code,
        [0x48, 0x89, 0xC8, 0x48, 0xF7, 0xE3, 0x49, 0x89, 0xD3, 0x4C, 0x89, 0xDA]
    );
}

#[test]
fn signed_division_by_immediate() {
    let code = bytes(|x| x.div_rem(Width::W32, true, Reg::Rax, Reg::Rdx, R(Reg::Rdi), Imm(7)));

    assert_eq!(
        code,
        [
            0x41, 0xBB, 0x07, 0x00, 0x00, 0x00, // mov r11d, 7
            0x89, 0xF8, // mov eax, edi
            0x99, // cdq
            0x41, 0xF7, 0xFB, // idiv r11d
            0x49, 0x89, 0xD3, // mov r11, rdx
            0x89, 0xC0, // mov eax, eax
            0x44, 0x89, 0xDA, // mov edx, r11d
        ]
    );
}

#[test]
fn unsigned_division_clears_rdx() {
    let code = bytes(|x| x.div_rem(Width::W64, false, Reg::Rcx, Reg::Rbx, R(Reg::Rax), R(Reg::Rsi)));

    assert_eq!(&code[..2], &[0x31, 0xD2]);
    assert_eq!(&code[2..5], &[0x48, 0xF7, 0xF6]);
}

#[test]
fn set_if_materializes_flag() {
    let code = bytes(|x| x.set_if(Cond::Eq, Reg::Rax));

    // sete r11b; movzx eax, r11b
    assert_eq!(code, [0x41, 0x0F, 0x94, 0xC3, 0x41, 0x0F, 0xB6, 0xC3]);
}

#[test]
fn stack_operations() {
    let code = bytes(|x| {
        x.push(R(Reg::Rbx))?;
        x.push(R(Reg::R12))?;
        x.push(Imm(5))?;
        x.push(Imm(1000))?;
        x.pop(R(Reg::Rbp))?;
        x.pop(R(Reg::R15))?;
        x.ret();
        Ok(())
    });

    assert_eq!(
        code,
        [
            0x53, 0x41, 0x54, 0x6A, 0x05, 0x68, 0xE8, 0x03, 0x00, 0x00, 0x5D, 0x41, 0x5F, 0xC3
        ]
    );
}

#[test]
fn backward_jump_is_short() {
    let code = bytes(|x| {
        let top = x.new_label();
        x.place(top);
        x.ret();
        x.jump(top);
        Ok(())
    });

    assert_eq!(code, [0xC3, 0xEB, 0xFD]);
}

#[test]
fn forward_conditional_jump_across_fifty_instructions() {
    let unit = lower(|x| {
        let done = x.new_label();
        x.jump_if(Cond::Eq, done);
        for _ in 0..50 {
            x.mov(Width::W64, R(Reg::Rax), Imm(0x1_0000_0000))?;
        }
        x.place(done);
        x.ret();
        Ok(())
    });

    assert_eq!(&unit.code[..6], &[0x0F, 0x84, 0xF4, 0x01, 0x00, 0x00]);
    assert_eq!(unit.size, 6 + 500 + 1);
}

#[test]
fn short_conditional_jump() {
    let code = bytes(|x| {
        let done = x.new_label();
        x.jump_if(Cond::Ne, done);
        for _ in 0..5 {
            x.mov(Width::W64, R(Reg::Rax), Imm(0x1_0000_0000))?;
        }
        x.place(done);
        x.ret();
        Ok(())
    });

    assert_eq!(&code[..2], &[0x75, 50]);
}

#[test]
fn external_call_records_fixup() {
    let unit = lower(|x| {
        x.mov(Width::W64, R(Reg::Rdi), R(Reg::Rax))?;
        x.call(CallTarget::External("puts".into()));
        x.ret();
        Ok(())
    });

    assert_eq!(&unit.code[3..8], &[0xE8, 0, 0, 0, 0]);
    assert_eq!(unit.fixups.len(), 1);
    assert_eq!(unit.fixups[0].offset, 4);
    assert_eq!(unit.fixups[0].symbol, "puts");
}

#[test]
fn local_call_is_resolved() {
    let unit = lower(|x| {
        let f = x.new_label();
        x.place(f);
        x.ret();
        x.call(CallTarget::Label(f));
        Ok(())
    });

    assert_eq!(unit.code, [0xC3, 0xE8, 0xFA, 0xFF, 0xFF, 0xFF]);
    assert!(unit.fixups.is_empty());
}

#[test]
fn labels_are_queryable_after_finish() {
    let mut x = X64Lowering::new(LayoutEngine::default());
    let end = x.new_label();
    x.push(R(Reg::Rbp)).unwrap();
    x.place(end);
    x.ret();
    let unit = x.finish().unwrap();

    assert_eq!(unit.label(end), Ok(1));
    assert_eq!(unit.passes, 2);
}

#[test]
fn immediate_destination_is_rejected() {
    let err = lower_err(|x| {
        x.set_pos(SourcePos::line(3));
        x.mov(Width::W64, Imm(1), R(Reg::Rax))
    });

    insta::assert_snapshot!(err, @"invalid operands for mov at line 3");
}

#[test]
fn scratch_registers_are_reserved() {
    let err = lower_err(|x| x.binary(BinOp::Add, Width::W64, R(Reg::R11), Imm(1)));
    assert!(matches!(err, NativeError::InvalidOperands { op: "add", .. }));

    let err = lower_err(|x| x.mov(Width::W64, R(Reg::Rax), Operand::base(Reg::R10, 0)));
    assert!(matches!(err, NativeError::InvalidOperands { op: "mov", .. }));
}

#[test]
fn aliased_results_are_rejected() {
    let err = lower_err(|x| x.mul_wide(Width::W64, true, Reg::Rax, Reg::Rax, R(Reg::Rcx), R(Reg::Rbx)));
    assert!(matches!(err, NativeError::InvalidOperands { op: "mul", .. }));

    let err = lower_err(|x| x.div_rem(Width::W64, true, Reg::Rcx, Reg::Rcx, R(Reg::Rax), R(Reg::Rbx)));
    assert!(matches!(err, NativeError::InvalidOperands { op: "div", .. }));
}

#[test]
fn immediate_too_wide_for_32_bits() {
    let err = lower_err(|x| x.mov(Width::W32, R(Reg::Rax), Imm(1 << 40)));

    insta::assert_snapshot!(err, @"immediate 1099511627776 too wide for mov at <unknown>");
}

#[test]
fn unplaced_label_fails_finish() {
    let mut x = X64Lowering::new(LayoutEngine::default());
    let nowhere = x.new_label();
    x.jump(nowhere);

    let err = x.finish().unwrap_err();

    assert!(matches!(
        err,
        NativeError::Layout(LayoutError::UnresolvedReference { .. })
    ));
}
