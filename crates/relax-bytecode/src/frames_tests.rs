use relax_core::{LayoutEngine, SourcePos};

use crate::dump::dump_method;
use crate::error::BytecodeError;
use crate::frames::{Frame, PoolTypes, StackMap, VType};
use crate::insn::Insn;
use crate::method::{MethodBody, MethodBuilder};
use crate::opcodes::{self, Cond, Kind};

/// Knows nothing beyond what the instructions say.
struct NoPool;

impl PoolTypes for NoPool {
    fn constant(&self, _index: u16) -> Option<VType> {
        None
    }

    fn result(&self, _op: u8, _index: u16) -> Option<Vec<VType>> {
        None
    }
}

/// Every class extends #1; #9 is the throwable root.
struct Hierarchy;

impl PoolTypes for Hierarchy {
    fn constant(&self, _index: u16) -> Option<VType> {
        None
    }

    fn result(&self, _op: u8, _index: u16) -> Option<Vec<VType>> {
        None
    }

    fn throwable(&self) -> Option<VType> {
        Some(VType::Object(9))
    }

    fn common_super(&self, _a: VType, _b: VType) -> Option<VType> {
        Some(VType::Object(1))
    }
}

fn finish(m: MethodBuilder, types: &dyn PoolTypes) -> Result<MethodBody, BytecodeError> {
    m.finish_with_frames(&LayoutEngine::default(), types)
}

fn frames(m: MethodBuilder, types: &dyn PoolTypes) -> StackMap {
    finish(m, types).unwrap().frames.unwrap()
}

fn frame(pc: u16, locals: &[VType], stack: &[VType]) -> Frame {
    Frame {
        pc,
        locals: locals.to_vec(),
        stack: stack.to_vec(),
    }
}

#[test]
fn counting_loop() {
    let mut m = MethodBuilder::new(1);
    m.set_entry(vec![VType::Integer]);
    let top = m.label();
    let done = m.label();
    m.push(Insn::Int(0));
    m.push(Insn::store(Kind::Int, 1));
    m.place(top);
    m.push(Insn::load(Kind::Int, 1));
    m.push(Insn::load(Kind::Int, 0));
    m.push(Insn::branch(Cond::ICmpGe, done));
    m.push(Insn::Iinc { slot: 1, delta: 1 });
    m.push(Insn::goto(top));
    m.place(done);
    m.push(Insn::load(Kind::Int, 1));
    m.push(Insn::Op(opcodes::IRETURN));

    let body = finish(m, &NoPool).unwrap();
    let map = body.frames.as_ref().unwrap();

    assert_eq!(
        map.frames,
        vec![
            frame(2, &[VType::Integer, VType::Integer], &[]),
            frame(13, &[VType::Integer, VType::Integer], &[]),
        ]
    );
    assert_eq!(map.encode(), vec![0, 2, 252, 0, 2, 1, 10]);
    insta::assert_snapshot!(dump_method(&body).unwrap(), @r"
    max_stack=2 max_locals=2
     0: iconst_0
     1: istore_1
     2: iload_1
     3: iload_0
     4: if_icmpge 13
     7: iinc 1 1
    10: goto 2
    13: iload_1
    14: ireturn
    frames:
      2 locals [int, int] stack []
      13 locals [int, int] stack []
    ");
}

#[test]
fn plain_finish_has_no_frames() {
    let mut m = MethodBuilder::new(0);
    m.push(Insn::Op(opcodes::RETURN));

    let body = m.finish(&LayoutEngine::default()).unwrap();

    assert_eq!(body.frames, None);
}

#[test]
fn conflicting_locals_become_top() {
    let mut m = MethodBuilder::new(0);
    let join = m.label();
    m.push(Insn::Op(opcodes::LCONST_0));
    m.push(Insn::store(Kind::Long, 0));
    m.push(Insn::Int(0));
    m.push(Insn::branch(Cond::Eq, join));
    m.push(Insn::Int(1));
    m.push(Insn::store(Kind::Int, 0));
    m.place(join);
    m.push(Insn::Op(opcodes::RETURN));

    let map = frames(m, &NoPool);

    assert_eq!(map.frames, vec![frame(8, &[], &[])]);
    assert_eq!(map.encode(), vec![0, 1, 8]);
}

#[test]
fn storing_into_second_word_kills_long() {
    let mut m = MethodBuilder::new(0);
    let next = m.label();
    m.push(Insn::Op(opcodes::LCONST_0));
    m.push(Insn::store(Kind::Long, 0));
    m.push(Insn::Int(1));
    m.push(Insn::store(Kind::Int, 1));
    m.push(Insn::goto(next));
    m.place(next);
    m.push(Insn::Op(opcodes::RETURN));

    let map = frames(m, &NoPool);

    assert_eq!(map.frames, vec![frame(7, &[VType::Top, VType::Integer], &[])]);
    assert_eq!(map.encode(), vec![0, 1, 253, 0, 7, 0, 1]);
}

#[test]
fn null_joins_object() {
    let mut m = MethodBuilder::new(2);
    m.set_entry(vec![VType::Integer, VType::Object(3)]);
    let join = m.label();
    m.push(Insn::Op(opcodes::ACONST_NULL));
    m.push(Insn::store(Kind::Ref, 2));
    m.push(Insn::load(Kind::Int, 0));
    m.push(Insn::branch(Cond::Eq, join));
    m.push(Insn::load(Kind::Ref, 1));
    m.push(Insn::store(Kind::Ref, 2));
    m.place(join);
    m.push(Insn::load(Kind::Ref, 2));
    m.push(Insn::Op(opcodes::ARETURN));

    let map = frames(m, &NoPool);

    let object = VType::Object(3);
    assert_eq!(
        map.frames,
        vec![frame(8, &[VType::Integer, object, object], &[])]
    );
    assert_eq!(map.encode(), vec![0, 1, 252, 0, 8, 7, 0, 3]);
}

fn two_casts() -> MethodBuilder {
    let mut m = MethodBuilder::new(1);
    m.set_entry(vec![VType::Integer]);
    let (other, join) = (m.label(), m.label());
    let cast = |index| Insn::Ref {
        op: opcodes::CHECKCAST,
        index,
        pops: 1,
        pushes: 1,
    };
    m.push(Insn::load(Kind::Int, 0));
    m.push(Insn::branch(Cond::Eq, other));
    m.push(Insn::Op(opcodes::ACONST_NULL));
    m.push(cast(6));
    m.push(Insn::goto(join));
    m.place(other);
    m.push(Insn::Op(opcodes::ACONST_NULL));
    m.push(cast(7));
    m.set_pos(SourcePos::line(5));
    m.place(join);
    m.push(Insn::Op(opcodes::ARETURN));
    m
}

#[test]
fn objects_join_at_common_super() {
    let map = frames(two_casts(), &Hierarchy);

    assert_eq!(
        map.frames,
        vec![
            frame(11, &[VType::Integer], &[]),
            frame(15, &[VType::Integer], &[VType::Object(1)]),
        ]
    );
}

#[test]
fn unrelated_objects_on_stack_fail() {
    let err = finish(two_casts(), &NoPool).unwrap_err();

    assert!(matches!(
        err,
        BytecodeError::FrameMismatch { pos, .. } if pos == SourcePos::line(5)
    ));
}

#[test]
fn int_and_float_on_stack_fail() {
    let mut m = MethodBuilder::new(1);
    m.set_entry(vec![VType::Integer]);
    let (other, join) = (m.label(), m.label());
    m.push(Insn::load(Kind::Int, 0));
    m.push(Insn::branch(Cond::Eq, other));
    m.push(Insn::Int(1));
    m.push(Insn::goto(join));
    m.place(other);
    m.push(Insn::Op(opcodes::FCONST_0));
    m.set_pos(SourcePos::line(7));
    m.place(join);
    m.push(Insn::Op(opcodes::POP));
    m.push(Insn::Op(opcodes::RETURN));

    let err = finish(m, &NoPool).unwrap_err();

    assert_eq!(
        err,
        BytecodeError::FrameMismatch {
            pos: SourcePos::line(7),
            expected: VType::Integer,
            actual: VType::Float,
        }
    );
    insta::assert_snapshot!(err, @"inconsistent stack types at line 7: int vs float");
}

fn guarded_call(catch_type: u16) -> MethodBuilder {
    let mut m = MethodBuilder::new(1);
    m.set_entry(vec![VType::Object(3)]);
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
    m.try_catch(start, end, handler, catch_type);
    m
}

#[test]
fn handler_frame_holds_caught_type() {
    let map = frames(guarded_call(5), &NoPool);

    assert_eq!(
        map.frames,
        vec![frame(5, &[VType::Object(3)], &[VType::Object(5)])]
    );
    assert_eq!(map.encode(), vec![0, 1, 69, 7, 0, 5]);
}

#[test]
fn catch_all_handler() {
    let map = frames(guarded_call(0), &Hierarchy);
    assert_eq!(map.frames[0].stack, vec![VType::Object(9)]);

    let err = finish(guarded_call(0), &NoPool).unwrap_err();
    assert_eq!(
        err,
        BytecodeError::UntypedValue {
            what: "catch-all handler",
            at: 5,
        }
    );
}

#[test]
fn constructor_call_initializes_every_copy() {
    let mut m = MethodBuilder::new(0);
    let next = m.label();
    m.push(Insn::Ref {
        op: opcodes::NEW,
        index: 4,
        pops: 0,
        pushes: 1,
    });
    m.push(Insn::Op(opcodes::DUP));
    m.push(Insn::Ref {
        op: opcodes::INVOKESPECIAL,
        index: 5,
        pops: 1,
        pushes: 0,
    });
    m.push(Insn::store(Kind::Ref, 0));
    m.push(Insn::goto(next));
    m.place(next);
    m.push(Insn::load(Kind::Ref, 0));
    m.push(Insn::Op(opcodes::ARETURN));

    let map = frames(m, &NoPool);

    assert_eq!(map.frames, vec![frame(11, &[VType::Object(4)], &[])]);
}

#[test]
fn call_result_needs_pool_type() {
    let mut m = MethodBuilder::new(0);
    m.push(Insn::Ref {
        op: opcodes::INVOKESTATIC,
        index: 8,
        pops: 0,
        pushes: 1,
    });
    m.push(Insn::Op(opcodes::IRETURN));

    let err = finish(m, &NoPool).unwrap_err();

    insta::assert_snapshot!(err, @"cannot type the value of invokestatic at 0");
}

#[test]
fn wide_deltas_use_extended_forms() {
    let map = StackMap {
        entry: Vec::new(),
        frames: vec![frame(100, &[], &[VType::Integer]), frame(300, &[], &[])],
    };

    assert_eq!(map.encode(), vec![0, 2, 247, 0, 100, 1, 251, 0, 199]);
}

#[test]
fn decode_chop_and_full_frames() {
    #[rustfmt::skip]
    let bytes = vec![
        0, 3,
        253, 0, 3, 4, 2,
        250, 0, 0,
        255, 0, 1, 0, 1, 1, 0, 2, 7, 0, 9, 5,
    ];

    let map = StackMap::decode(&bytes, vec![VType::Integer]).unwrap();

    assert_eq!(
        map.frames,
        vec![
            frame(3, &[VType::Integer, VType::Long, VType::Float], &[]),
            frame(4, &[VType::Integer, VType::Long], &[]),
            frame(6, &[VType::Integer], &[VType::Object(9), VType::Null]),
        ]
    );
    assert_eq!(map.encode(), bytes);
}

#[test]
fn decode_rejects_reserved_tag() {
    let err = StackMap::decode(&[0, 1, 200], Vec::new()).unwrap_err();

    assert_eq!(err, BytecodeError::BadFrame { at: 2, tag: 200 });
}
