use relax_core::{LayoutEngine, SourcePos};

use crate::error::BytecodeError;
use crate::insn::Insn;
use crate::method::MethodBuilder;
use crate::opcodes::{self, Cond, Kind};

fn finish(m: MethodBuilder) -> Result<crate::MethodBody, BytecodeError> {
    m.finish(&LayoutEngine::default())
}

#[test]
fn underflow() {
    let mut m = MethodBuilder::new(0);
    m.set_pos(SourcePos::line(3));
    m.push(Insn::Op(opcodes::IADD));

    let err = finish(m).unwrap_err();

    insta::assert_snapshot!(err, @"stack underflow at line 3: depth 0, instruction pops 2");
}

#[test]
fn inconsistent_merge() {
    let mut m = MethodBuilder::new(1);
    let join = m.label();
    m.push(Insn::load(Kind::Int, 0));
    m.push(Insn::branch(Cond::Eq, join));
    m.push(Insn::Int(1));
    m.set_pos(SourcePos::line(9));
    m.place(join);
    m.push(Insn::Op(opcodes::RETURN));

    let err = finish(m).unwrap_err();

    assert_eq!(
        err,
        BytecodeError::StackMismatch {
            pos: SourcePos::line(9),
            expected: 0,
            actual: 1,
        }
    );
}

#[test]
fn handler_enters_with_exception() {
    let mut m = MethodBuilder::new(1);
    let (start, end, handler) = (m.label(), m.label(), m.label());
    m.place(start);
    m.push(Insn::load(Kind::Ref, 0));
    m.push(Insn::Ref {
        op: opcodes::INVOKEVIRTUAL,
        index: 2,
        pops: 1,
        pushes: 0,
    });
    m.place(end);
    m.push(Insn::Op(opcodes::RETURN));
    m.place(handler);
    m.push(Insn::store(Kind::Ref, 1));
    m.push(Insn::Op(opcodes::RETURN));
    m.try_catch(start, end, handler, 0);

    let body = finish(m).unwrap();

    assert_eq!(body.max_stack, 1);
    assert_eq!(body.max_locals, 2);
    assert_eq!(body.exceptions.len(), 1);
    assert_eq!(body.exceptions[0].start_pc, 0);
    assert_eq!(body.exceptions[0].end_pc, 4);
    assert_eq!(body.exceptions[0].handler_pc, 5);
}

#[test]
fn two_word_values() {
    let mut m = MethodBuilder::new(4);
    m.push(Insn::load(Kind::Long, 0));
    m.push(Insn::load(Kind::Long, 2));
    m.push(Insn::Op(opcodes::LADD));
    m.push(Insn::Op(opcodes::LRETURN));

    let body = finish(m).unwrap();

    assert_eq!(body.max_stack, 4);
    assert_eq!(body.max_locals, 4);
}

#[test]
fn locals_grow_with_wide_slots() {
    let mut m = MethodBuilder::new(1);
    m.push(Insn::Ldc {
        index: 4,
        two_words: true,
    });
    m.push(Insn::store(Kind::Double, 300));
    m.push(Insn::Op(opcodes::RETURN));

    assert_eq!(m.max_locals(), 302);
    let body = finish(m).unwrap();
    assert_eq!(body.max_locals, 302);
}

#[test]
fn unreachable_code_is_skipped() {
    let mut m = MethodBuilder::new(0);
    let end = m.label();
    m.push(Insn::goto(end));
    m.push(Insn::Op(opcodes::IADD));
    m.place(end);
    m.push(Insn::Op(opcodes::RETURN));

    let body = finish(m).unwrap();

    assert_eq!(body.max_stack, 0);
}

#[test]
fn unknown_opcode() {
    let mut m = MethodBuilder::new(0);
    m.push(Insn::Op(opcodes::NOP));
    m.push(Insn::Op(0xfe));

    let err = finish(m).unwrap_err();

    assert_eq!(err, BytecodeError::UnknownOpcode { op: 0xfe, at: 1 });
}
