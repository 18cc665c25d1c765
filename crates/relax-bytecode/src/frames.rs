//! Stack map frames for the type-checking verifier.
//!
//! `compute` runs the instruction stream over verification types, joining
//! states where control flow meets, and records a frame at every branch
//! target, exception handler and instruction that follows an unconditional
//! transfer. Internally a `long` or `double` takes two words, the second one
//! `Top`; frames list it once.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

use relax_core::{Item, Label, Layout, Segment, SourcePos, Stream};

use crate::decode::Reader;
use crate::error::BytecodeError;
use crate::insn::{Access, Insn};
use crate::method::Handler;
use crate::opcodes::{self, Cond, Kind};

/// Verification type of a local variable or operand stack entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VType {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    /// Class constant pool index.
    Object(u16),
    /// Result of the `new` at this code offset, before its constructor ran.
    Uninitialized(u16),
}

impl VType {
    pub fn is_wide(self) -> bool {
        matches!(self, VType::Long | VType::Double)
    }

    fn of(kind: Kind) -> Option<Self> {
        match kind {
            Kind::Int => Some(VType::Integer),
            Kind::Long => Some(VType::Long),
            Kind::Float => Some(VType::Float),
            Kind::Double => Some(VType::Double),
            Kind::Ref => None,
        }
    }

    fn is_reference(self) -> bool {
        matches!(
            self,
            VType::Null | VType::UninitializedThis | VType::Object(_) | VType::Uninitialized(_)
        )
    }

    fn encode(self, out: &mut Vec<u8>) {
        let (tag, operand) = match self {
            VType::Top => (0, None),
            VType::Integer => (1, None),
            VType::Float => (2, None),
            VType::Double => (3, None),
            VType::Long => (4, None),
            VType::Null => (5, None),
            VType::UninitializedThis => (6, None),
            VType::Object(index) => (7, Some(index)),
            VType::Uninitialized(pc) => (8, Some(pc)),
        };
        out.push(tag);
        if let Some(operand) = operand {
            out.extend_from_slice(&operand.to_be_bytes());
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, BytecodeError> {
        let at = r.position();
        Ok(match r.u8()? {
            0 => VType::Top,
            1 => VType::Integer,
            2 => VType::Float,
            3 => VType::Double,
            4 => VType::Long,
            5 => VType::Null,
            6 => VType::UninitializedThis,
            7 => VType::Object(r.u16()?),
            8 => VType::Uninitialized(r.u16()?),
            tag => return Err(BytecodeError::BadFrame { at, tag }),
        })
    }
}

impl fmt::Display for VType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VType::Top => f.write_str("top"),
            VType::Integer => f.write_str("int"),
            VType::Float => f.write_str("float"),
            VType::Long => f.write_str("long"),
            VType::Double => f.write_str("double"),
            VType::Null => f.write_str("null"),
            VType::UninitializedThis => f.write_str("uninitialized this"),
            VType::Object(index) => write!(f, "#{index}"),
            VType::Uninitialized(pc) => write!(f, "uninitialized@{pc}"),
        }
    }
}

/// Types the instruction stream alone cannot tell, answered from the
/// constant pool and class hierarchy of the enclosing class.
pub trait PoolTypes {
    /// Type pushed by `ldc` of this constant.
    fn constant(&self, index: u16) -> Option<VType>;

    /// Values pushed by a constant-pool-indexed instruction (field reads,
    /// invocations, `anewarray`), bottom first.
    fn result(&self, op: u8, index: u16) -> Option<Vec<VType>>;

    /// Array type created by `newarray` with this element code.
    fn primitive_array(&self, _atype: u8) -> Option<VType> {
        None
    }

    /// Element type loaded by `aaload` from `array`.
    fn element(&self, _array: VType) -> Option<VType> {
        None
    }

    /// Class a constructor's `this` becomes once initialized.
    fn this_class(&self) -> Option<VType> {
        None
    }

    /// Type caught by a handler with no catch type.
    fn throwable(&self) -> Option<VType> {
        None
    }

    /// Closest common superclass of two object types.
    fn common_super(&self, _a: VType, _b: VType) -> Option<VType> {
        None
    }
}

/// Verifier state at one code offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub pc: u16,
    pub locals: Vec<VType>,
    pub stack: Vec<VType>,
}

/// Frames of one method, relative to the implicit entry frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StackMap {
    /// Locals on entry, as given by the method descriptor.
    pub entry: Vec<VType>,
    pub frames: Vec<Frame>,
}

impl StackMap {
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// `StackMapTable` attribute body, each frame in its shortest form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.frames.len() as u16).to_be_bytes());
        let mut prev: &[VType] = &self.entry;
        let mut prev_pc = None;
        for frame in &self.frames {
            let delta = match prev_pc {
                None => frame.pc,
                Some(pc) => frame.pc - pc - 1,
            };
            encode_frame(&mut out, delta, prev, frame);
            prev = &frame.locals;
            prev_pc = Some(frame.pc);
        }
        out
    }

    /// Parse a `StackMapTable` attribute body; `entry` seeds the first frame.
    pub fn decode(bytes: &[u8], entry: Vec<VType>) -> Result<Self, BytecodeError> {
        let mut r = Reader::new(bytes);
        let count = r.u16()?;
        let mut frames: Vec<Frame> = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let at = r.position();
            let tag = r.u8()?;
            let mut locals = frames.last().map_or(&entry, |f| &f.locals).clone();
            let mut stack = Vec::new();
            let delta = match tag {
                0..=63 => tag as u16,
                64..=127 => {
                    stack.push(VType::decode(&mut r)?);
                    tag as u16 - 64
                }
                247 => {
                    let delta = r.u16()?;
                    stack.push(VType::decode(&mut r)?);
                    delta
                }
                248..=250 => {
                    let chop = (251 - tag) as usize;
                    if chop > locals.len() {
                        return Err(BytecodeError::BadFrame { at, tag });
                    }
                    locals.truncate(locals.len() - chop);
                    r.u16()?
                }
                251 => r.u16()?,
                252..=254 => {
                    let delta = r.u16()?;
                    for _ in 0..tag - 251 {
                        locals.push(VType::decode(&mut r)?);
                    }
                    delta
                }
                255 => {
                    let delta = r.u16()?;
                    locals = vtypes(&mut r)?;
                    stack = vtypes(&mut r)?;
                    delta
                }
                _ => return Err(BytecodeError::BadFrame { at, tag }),
            };
            let pc = match frames.last() {
                None => Some(delta),
                Some(f) => f.pc.checked_add(delta).and_then(|pc| pc.checked_add(1)),
            };
            let pc = pc.ok_or(BytecodeError::BadFrame { at, tag })?;
            frames.push(Frame { pc, locals, stack });
        }
        Ok(Self { entry, frames })
    }
}

fn vtypes(r: &mut Reader<'_>) -> Result<Vec<VType>, BytecodeError> {
    let count = r.u16()?;
    (0..count).map(|_| VType::decode(r)).collect()
}

fn encode_frame(out: &mut Vec<u8>, delta: u16, prev: &[VType], frame: &Frame) {
    let locals = frame.locals.as_slice();
    let same = locals == prev;
    match frame.stack.as_slice() {
        [] if same && delta < 64 => out.push(delta as u8),
        [] if same => {
            out.push(251);
            put_u16(out, delta);
        }
        [item] if same => {
            if delta < 64 {
                out.push(64 + delta as u8);
            } else {
                out.push(247);
                put_u16(out, delta);
            }
            item.encode(out);
        }
        [] if locals.len() < prev.len() && prev.len() - locals.len() <= 3 && prev.starts_with(locals) => {
            out.push(251 - (prev.len() - locals.len()) as u8);
            put_u16(out, delta);
        }
        [] if locals.len() > prev.len() && locals.len() - prev.len() <= 3 && locals.starts_with(prev) => {
            out.push(251 + (locals.len() - prev.len()) as u8);
            put_u16(out, delta);
            for v in &locals[prev.len()..] {
                v.encode(out);
            }
        }
        stack => {
            out.push(255);
            put_u16(out, delta);
            for list in [locals, stack] {
                put_u16(out, list.len() as u16);
                for v in list {
                    v.encode(out);
                }
            }
        }
    }
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// One entry per word.
#[derive(Clone, Debug, PartialEq, Eq)]
struct State {
    locals: Vec<VType>,
    stack: Vec<VType>,
}

fn expand(types: &[VType]) -> Vec<VType> {
    let mut words = Vec::with_capacity(types.len());
    for &v in types {
        words.push(v);
        if v.is_wide() {
            words.push(VType::Top);
        }
    }
    words
}

fn compact(words: &[VType], trim: bool) -> Vec<VType> {
    let mut out = Vec::with_capacity(words.len());
    let mut i = 0;
    while i < words.len() {
        out.push(words[i]);
        i += if words[i].is_wide() { 2 } else { 1 };
    }
    while trim && out.last() == Some(&VType::Top) {
        out.pop();
    }
    out
}

fn join(a: VType, b: VType, types: &dyn PoolTypes) -> Option<VType> {
    match (a, b) {
        _ if a == b => Some(a),
        (VType::Null, r @ VType::Object(_)) | (r @ VType::Object(_), VType::Null) => Some(r),
        (VType::Object(_), VType::Object(_)) => types.common_super(a, b),
        _ => None,
    }
}

/// Frames for every offset the verifier needs one at, in code order.
///
/// `entry` holds the locals on method entry, one type per value.
pub fn compute(
    stream: &Stream<Insn>,
    layout: &Layout,
    handlers: &[Handler],
    entry: &[VType],
    types: &dyn PoolTypes,
) -> Result<Vec<Frame>, BytecodeError> {
    let marks = stream.mark_indices();
    let mark_of = |label: Label| marks.get(label.index()).copied().flatten();
    let len = stream.len();

    let mut starts = vec![false; len + 1];
    for (idx, insn) in stream.segments() {
        insn.for_each_label(&mut |target| {
            if let Some(mark) = mark_of(target) {
                starts[mark] = true;
            }
        });
        if !insn.falls_through() {
            starts[idx + 1] = true;
        }
    }

    let mut caught: Vec<(Range<usize>, usize, VType)> = Vec::with_capacity(handlers.len());
    for h in handlers {
        let (Some(start), Some(end), Some(handler)) =
            (mark_of(h.start), mark_of(h.end), mark_of(h.handler))
        else {
            continue;
        };
        starts[handler] = true;
        let thrown = if h.catch_type == 0 {
            types.throwable().ok_or(BytecodeError::UntypedValue {
                what: "catch-all handler",
                at: layout.offset(handler),
            })?
        } else {
            VType::Object(h.catch_type)
        };
        caught.push((start..end, handler, thrown));
    }

    let mut solver = Solver {
        stream,
        types,
        states: vec![None; len],
        work: Vec::new(),
    };
    solver.flow(
        0,
        State {
            locals: expand(entry),
            stack: Vec::new(),
        },
    )?;
    let mut news: HashMap<u16, u16> = HashMap::new();

    while let Some(idx) = solver.work.pop() {
        let Some(state) = solver.states[idx].clone() else {
            continue;
        };
        let insn = match stream.item(idx) {
            Item::Mark(_) => {
                solver.flow(idx + 1, state)?;
                continue;
            }
            Item::Segment(insn) => insn,
        };

        for (range, handler, thrown) in &caught {
            if range.contains(&idx) {
                let thrown = State {
                    locals: state.locals.clone(),
                    stack: vec![*thrown],
                };
                solver.flow(*handler, thrown)?;
            }
        }

        let mut machine = Machine {
            state,
            pc: layout.offset(idx) as u16,
            pos: stream.position(idx),
            types,
            news: &mut news,
        };
        machine.step(insn)?;
        let out = machine.state;

        let mut targets = Vec::new();
        insn.for_each_label(&mut |target| {
            if let Some(mark) = mark_of(target) {
                targets.push(mark);
            }
        });
        for target in targets {
            solver.flow(target, out.clone())?;
        }
        if insn.falls_through() {
            solver.flow(idx + 1, out)?;
        }
    }

    let mut frames: Vec<Frame> = Vec::new();
    for idx in (0..len).filter(|&i| starts[i]) {
        // A frame describes the first instruction at or after the mark.
        let Some(at) = (idx..len).find(|&i| matches!(stream.item(i), Item::Segment(_))) else {
            continue;
        };
        let Some(state) = &solver.states[at] else {
            continue;
        };
        let pc = layout.offset(at) as u16;
        if frames.last().is_some_and(|f| f.pc == pc) {
            continue;
        }
        frames.push(Frame {
            pc,
            locals: compact(&state.locals, true),
            stack: compact(&state.stack, false),
        });
    }

    log::trace!("stack map: {} frames", frames.len());
    Ok(frames)
}

struct Solver<'a> {
    stream: &'a Stream<Insn>,
    types: &'a dyn PoolTypes,
    states: Vec<Option<State>>,
    work: Vec<usize>,
}

impl Solver<'_> {
    fn flow(&mut self, idx: usize, incoming: State) -> Result<(), BytecodeError> {
        if idx >= self.states.len() {
            return Ok(());
        }
        let pos = self.stream.position(idx);
        let changed = match &mut self.states[idx] {
            Some(current) => merge(current, &incoming, self.types, pos)?,
            slot => {
                *slot = Some(incoming);
                true
            }
        };
        if changed {
            self.work.push(idx);
        }
        Ok(())
    }
}

/// Join `incoming` into `current`; true when `current` changed.
fn merge(
    current: &mut State,
    incoming: &State,
    types: &dyn PoolTypes,
    pos: SourcePos,
) -> Result<bool, BytecodeError> {
    if current.stack.len() != incoming.stack.len() {
        return Err(BytecodeError::StackMismatch {
            pos,
            expected: current.stack.len() as u32,
            actual: incoming.stack.len() as u32,
        });
    }

    let mut changed = false;
    for (have, &new) in current.stack.iter_mut().zip(&incoming.stack) {
        let joined = join(*have, new, types).ok_or(BytecodeError::FrameMismatch {
            pos,
            expected: *have,
            actual: new,
        })?;
        if joined != *have {
            *have = joined;
            changed = true;
        }
    }

    // Locals missing on either side are Top.
    let keep = current.locals.len().min(incoming.locals.len());
    if current.locals[keep..].iter().any(|v| *v != VType::Top) {
        changed = true;
    }
    current.locals.truncate(keep);
    for (have, &new) in current.locals.iter_mut().zip(&incoming.locals) {
        let joined = join(*have, new, types).unwrap_or(VType::Top);
        if joined != *have {
            *have = joined;
            changed = true;
        }
    }
    Ok(changed)
}

/// Abstract interpreter for one instruction.
struct Machine<'a> {
    state: State,
    pc: u16,
    pos: SourcePos,
    types: &'a dyn PoolTypes,
    /// Class created by each `new`, by offset.
    news: &'a mut HashMap<u16, u16>,
}

impl Machine<'_> {
    fn untyped(&self, op: u8) -> BytecodeError {
        BytecodeError::UntypedValue {
            what: opcodes::mnemonic(op).unwrap_or("instruction"),
            at: self.pc as u32,
        }
    }

    fn pop(&mut self, words: u16) -> Result<Vec<VType>, BytecodeError> {
        let depth = self.state.stack.len();
        let words = words as usize;
        if depth < words {
            return Err(BytecodeError::StackUnderflow {
                pos: self.pos,
                depth: depth as u32,
                pops: words as u32,
            });
        }
        Ok(self.state.stack.split_off(depth - words))
    }

    fn push(&mut self, v: VType) {
        self.state.stack.push(v);
        if v.is_wide() {
            self.state.stack.push(VType::Top);
        }
    }

    fn local(&self, slot: u16) -> VType {
        self.state
            .locals
            .get(slot as usize)
            .copied()
            .unwrap_or(VType::Top)
    }

    fn set_local(&mut self, slot: u16, v: VType) {
        let locals = &mut self.state.locals;
        let slot = slot as usize;
        let need = slot + if v.is_wide() { 2 } else { 1 };
        if locals.len() < need {
            locals.resize(need, VType::Top);
        }
        // Overwriting the second word of a wide value kills it.
        if slot > 0 && locals[slot - 1].is_wide() {
            locals[slot - 1] = VType::Top;
        }
        locals[slot] = v;
        if v.is_wide() {
            locals[slot + 1] = VType::Top;
        }
    }

    fn step(&mut self, insn: &Insn) -> Result<(), BytecodeError> {
        match insn {
            Insn::Op(op) => self.simple(*op)?,
            Insn::Local {
                access: Access::Load,
                kind,
                slot,
            } => {
                let v = match VType::of(*kind) {
                    Some(v) => v,
                    None => match self.local(*slot) {
                        v if v.is_reference() => v,
                        _ => return Err(self.untyped(opcodes::ALOAD)),
                    },
                };
                self.push(v);
            }
            Insn::Local {
                access: Access::Store,
                kind,
                slot,
            } => {
                let popped = self.pop(kind.words())?;
                let v = VType::of(*kind).unwrap_or(popped[0]);
                self.set_local(*slot, v);
            }
            Insn::Iinc { .. } => {}
            Insn::Int(_) => self.push(VType::Integer),
            Insn::Ldc { index, two_words } => {
                let op = if *two_words { opcodes::LDC2_W } else { opcodes::LDC };
                match self.types.constant(*index) {
                    Some(v) if v.is_wide() == *two_words => self.push(v),
                    _ => return Err(self.untyped(op)),
                }
            }
            Insn::Ref {
                op,
                index,
                pops,
                pushes,
            } => self.pool(*op, *index, *pops, *pushes)?,
            Insn::InvokeInterface {
                index,
                pops,
                pushes,
                ..
            } => self.pool(opcodes::INVOKEINTERFACE, *index, *pops, *pushes)?,
            Insn::Byte { op, value } => match *op {
                opcodes::BIPUSH => self.push(VType::Integer),
                opcodes::NEWARRAY => {
                    self.pop(1)?;
                    let array = self
                        .types
                        .primitive_array(*value)
                        .ok_or_else(|| self.untyped(*op))?;
                    self.push(array);
                }
                op => {
                    return Err(BytecodeError::UnknownOpcode {
                        op,
                        at: self.pc as u32,
                    });
                }
            },
            Insn::Jump { cond, .. } => {
                self.pop(cond.map_or(0, Cond::pops))?;
            }
            Insn::Switch(_) => {
                self.pop(1)?;
            }
        }
        Ok(())
    }

    fn simple(&mut self, op: u8) -> Result<(), BytecodeError> {
        use crate::opcodes::*;

        let (pops, pushes) = simple_effect(op).ok_or(BytecodeError::UnknownOpcode {
            op,
            at: self.pc as u32,
        })?;
        let taken = self.pop(pops)?;

        // Stack shuffles rearrange words, top of the popped run last.
        let order: &[usize] = match op {
            DUP => &[0, 0],
            DUP_X1 => &[1, 0, 1],
            DUP_X2 => &[2, 0, 1, 2],
            DUP2 => &[0, 1, 0, 1],
            DUP2_X1 => &[1, 2, 0, 1, 2],
            DUP2_X2 => &[2, 3, 0, 1, 2, 3],
            SWAP => &[1, 0],
            _ => &[],
        };
        if !order.is_empty() {
            self.state.stack.extend(order.iter().map(|&i| taken[i]));
            return Ok(());
        }
        if pushes == 0 {
            return Ok(());
        }

        let v = match op {
            ACONST_NULL => VType::Null,
            AALOAD => match taken[0] {
                VType::Null => VType::Null,
                array => self.types.element(array).ok_or_else(|| self.untyped(op))?,
            },
            _ => value_of(op).ok_or(BytecodeError::UnknownOpcode {
                op,
                at: self.pc as u32,
            })?,
        };
        self.push(v);
        Ok(())
    }

    fn pool(&mut self, op: u8, index: u16, pops: u16, pushes: u16) -> Result<(), BytecodeError> {
        let taken = self.pop(pops)?;
        match op {
            opcodes::NEW => {
                self.news.insert(self.pc, index);
                self.push(VType::Uninitialized(self.pc));
                return Ok(());
            }
            opcodes::CHECKCAST => {
                self.push(VType::Object(index));
                return Ok(());
            }
            opcodes::INSTANCEOF => {
                self.push(VType::Integer);
                return Ok(());
            }
            opcodes::INVOKESPECIAL => {
                if let Some(&receiver) = taken.first() {
                    self.initialize(receiver)?;
                }
            }
            _ => {}
        }

        if pushes > 0 {
            let values = self.types.result(op, index).ok_or_else(|| self.untyped(op))?;
            let words: u16 = values.iter().map(|v| if v.is_wide() { 2 } else { 1 }).sum();
            if words != pushes {
                return Err(self.untyped(op));
            }
            for v in values {
                self.push(v);
            }
        }
        Ok(())
    }

    /// A constructor call turns every copy of its receiver into the class type.
    fn initialize(&mut self, receiver: VType) -> Result<(), BytecodeError> {
        let done = match receiver {
            VType::Uninitialized(pc) => match self.news.get(&pc) {
                Some(&class) => VType::Object(class),
                None => return Err(self.untyped(opcodes::NEW)),
            },
            VType::UninitializedThis => self
                .types
                .this_class()
                .ok_or_else(|| self.untyped(opcodes::INVOKESPECIAL))?,
            _ => return Ok(()),
        };
        for v in self.state.locals.iter_mut().chain(self.state.stack.iter_mut()) {
            if *v == receiver {
                *v = done;
            }
        }
        Ok(())
    }
}

/// Value pushed by an operand-less instruction other than the shuffles.
fn value_of(op: u8) -> Option<VType> {
    use crate::opcodes::*;

    const ARITH: [VType; 4] = [VType::Integer, VType::Long, VType::Float, VType::Double];
    Some(match op {
        ICONST_M1..=ICONST_5 => VType::Integer,
        LCONST_0 | LCONST_1 => VType::Long,
        FCONST_0..=FCONST_2 => VType::Float,
        DCONST_0 | DCONST_1 => VType::Double,
        IALOAD | BALOAD | CALOAD | SALOAD => VType::Integer,
        LALOAD => VType::Long,
        FALOAD => VType::Float,
        DALOAD => VType::Double,
        IADD..=DNEG => ARITH[((op - IADD) % 4) as usize],
        ISHL..=LXOR if (op - ISHL) % 2 == 0 => VType::Integer,
        ISHL..=LXOR => VType::Long,
        I2L | F2L | D2L => VType::Long,
        I2F | L2F | D2F => VType::Float,
        I2D | L2D | F2D => VType::Double,
        L2I | F2I | D2I | I2B | I2C | I2S => VType::Integer,
        LCMP..=DCMPG | ARRAYLENGTH => VType::Integer,
        _ => return None,
    })
}
