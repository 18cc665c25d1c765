//! Method body assembly.
//!
//! `MethodBuilder` collects instructions, labels and exception ranges; `finish`
//! lays out the code, resolves the exception table and computes the operand
//! stack and local variable limits. `finish_with_frames` adds the stack map.

use relax_core::{Label, LayoutEngine, SourcePos, Stream};

use crate::decode::Reader;
use crate::error::BytecodeError;
use crate::frames::{self, PoolTypes, StackMap, VType};
use crate::insn::Insn;
use crate::stack;

/// Largest code array a method may carry.
pub const MAX_CODE: u32 = 0xffff;

/// Exception range `[start, end)` guarded by `handler`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handler {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    /// Constant pool index of the caught class; 0 catches everything.
    pub catch_type: u16,
}

/// Resolved exception table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExceptionEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineEntry {
    pub pc: u16,
    pub line: u16,
}

/// Code offset to source line mapping, one entry per line change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LineTable {
    entries: Vec<LineEntry>,
}

impl LineTable {
    pub fn entries(&self) -> &[LineEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Source line of the instruction at `pc`.
    pub fn line_at(&self, pc: u16) -> Option<u16> {
        let idx = self.entries.partition_point(|e| e.pc <= pc);
        idx.checked_sub(1).map(|i| self.entries[i].line)
    }

    fn push(&mut self, pc: u16, line: u16) {
        if self.entries.last().is_some_and(|e| e.line == line) {
            return;
        }
        self.entries.push(LineEntry { pc, line });
    }

    /// `LineNumberTable` attribute body.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + 4 * self.entries.len());
        out.extend_from_slice(&(self.entries.len() as u16).to_be_bytes());
        for e in &self.entries {
            out.extend_from_slice(&e.pc.to_be_bytes());
            out.extend_from_slice(&e.line.to_be_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BytecodeError> {
        let mut r = Reader::new(bytes);
        let count = r.u16()?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            entries.push(LineEntry {
                pc: r.u16()?,
                line: r.u16()?,
            });
        }
        Ok(Self { entries })
    }
}

/// Finished method body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodBody {
    pub code: Vec<u8>,
    pub max_stack: u16,
    pub max_locals: u16,
    pub exceptions: Vec<ExceptionEntry>,
    pub lines: LineTable,
    pub frames: Option<StackMap>,
    /// Layout passes taken to converge.
    pub passes: u32,
}

impl MethodBody {
    /// `Code` attribute body, without nested attributes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.code.len() + 8 * self.exceptions.len());
        out.extend_from_slice(&self.max_stack.to_be_bytes());
        out.extend_from_slice(&self.max_locals.to_be_bytes());
        out.extend_from_slice(&(self.code.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.code);
        out.extend_from_slice(&(self.exceptions.len() as u16).to_be_bytes());
        for e in &self.exceptions {
            for field in [e.start_pc, e.end_pc, e.handler_pc, e.catch_type] {
                out.extend_from_slice(&field.to_be_bytes());
            }
        }
        out.extend_from_slice(&0u16.to_be_bytes());
        out
    }

    /// Parse a `Code` attribute body. Nested attributes are skipped.
    pub fn decode(bytes: &[u8]) -> Result<Self, BytecodeError> {
        let mut r = Reader::new(bytes);
        let max_stack = r.u16()?;
        let max_locals = r.u16()?;
        let code_len = r.u32()?;
        if code_len > MAX_CODE {
            return Err(BytecodeError::CodeTooLarge { size: code_len });
        }
        let code = r.take(code_len as usize)?.to_vec();

        let count = r.u16()?;
        let mut exceptions = Vec::with_capacity(count as usize);
        for _ in 0..count {
            exceptions.push(ExceptionEntry {
                start_pc: r.u16()?,
                end_pc: r.u16()?,
                handler_pc: r.u16()?,
                catch_type: r.u16()?,
            });
        }

        let attributes = r.u16()?;
        for _ in 0..attributes {
            r.u16()?;
            let len = r.u32()?;
            r.take(len as usize)?;
        }

        Ok(Self {
            code,
            max_stack,
            max_locals,
            exceptions,
            lines: LineTable::default(),
            frames: None,
            passes: 0,
        })
    }
}

/// Builder for one method body.
#[derive(Clone, Debug)]
pub struct MethodBuilder {
    stream: Stream<Insn>,
    handlers: Vec<Handler>,
    max_locals: u16,
    entry: Vec<VType>,
}

impl MethodBuilder {
    /// `param_words` counts the receiver and parameters in local slots.
    pub fn new(param_words: u16) -> Self {
        Self {
            stream: Stream::new(),
            handlers: Vec::new(),
            max_locals: param_words,
            entry: Vec::new(),
        }
    }

    pub fn label(&mut self) -> Label {
        self.stream.label()
    }

    pub fn place(&mut self, label: Label) {
        self.stream.place(label);
    }

    pub fn set_pos(&mut self, pos: SourcePos) {
        self.stream.set_pos(pos);
    }

    pub fn push(&mut self, insn: Insn) -> usize {
        let top = match &insn {
            Insn::Local { kind, slot, .. } => *slot as u32 + kind.words() as u32,
            Insn::Iinc { slot, .. } => *slot as u32 + 1,
            _ => 0,
        };
        self.max_locals = self.max_locals.max(top.min(u16::MAX as u32) as u16);
        self.stream.push(insn)
    }

    /// Guard `[start, end)` with `handler`.
    pub fn try_catch(&mut self, start: Label, end: Label, handler: Label, catch_type: u16) {
        self.handlers.push(Handler {
            start,
            end,
            handler,
            catch_type,
        });
    }

    /// Types of the receiver and parameters, one per value, as the method
    /// descriptor declares them.
    pub fn set_entry(&mut self, locals: Vec<VType>) {
        let words: usize = locals.iter().map(|v| if v.is_wide() { 2 } else { 1 }).sum();
        self.max_locals = self.max_locals.max(words.min(u16::MAX as usize) as u16);
        self.entry = locals;
    }

    pub fn stream(&self) -> &Stream<Insn> {
        &self.stream
    }

    pub fn max_locals(&self) -> u16 {
        self.max_locals
    }

    pub fn finish(self, engine: &LayoutEngine) -> Result<MethodBody, BytecodeError> {
        self.assemble(engine, None)
    }

    /// Like `finish`, and also computes the stack map, with `types` answering
    /// what the instructions alone leave open.
    pub fn finish_with_frames(
        self,
        engine: &LayoutEngine,
        types: &dyn PoolTypes,
    ) -> Result<MethodBody, BytecodeError> {
        self.assemble(engine, Some(types))
    }

    fn assemble(
        self,
        engine: &LayoutEngine,
        types: Option<&dyn PoolTypes>,
    ) -> Result<MethodBody, BytecodeError> {
        let layout = engine.run(&self.stream)?;
        if layout.size() > MAX_CODE {
            return Err(BytecodeError::CodeTooLarge {
                size: layout.size(),
            });
        }
        let code = engine.emit(&self.stream, &layout)?;

        let handler_labels: Vec<Label> = self.handlers.iter().map(|h| h.handler).collect();
        let max_stack = stack::max_stack(&self.stream, &layout, &handler_labels)?;

        let pc = |label: Label| -> Result<u16, BytecodeError> { Ok(layout.label(label)? as u16) };
        let mut exceptions = Vec::with_capacity(self.handlers.len());
        for h in &self.handlers {
            exceptions.push(ExceptionEntry {
                start_pc: pc(h.start)?,
                end_pc: pc(h.end)?,
                handler_pc: pc(h.handler)?,
                catch_type: h.catch_type,
            });
        }

        let mut lines = LineTable::default();
        for (idx, _) in self.stream.segments() {
            let line = self.stream.position(idx).line;
            if line != 0 && layout.length(idx) > 0 {
                lines.push(layout.offset(idx) as u16, line.min(u16::MAX as u32) as u16);
            }
        }

        let frames = match types {
            Some(types) => Some(StackMap {
                frames: frames::compute(&self.stream, &layout, &self.handlers, &self.entry, types)?,
                entry: self.entry,
            }),
            None => None,
        };

        log::debug!(
            "method body: {} bytes, max_stack={max_stack}, max_locals={}, {} passes",
            code.len(),
            self.max_locals,
            layout.passes()
        );

        Ok(MethodBody {
            code,
            max_stack,
            max_locals: self.max_locals,
            exceptions,
            lines,
            frames,
            passes: layout.passes(),
        })
    }
}
