//! Maximum operand stack depth.
//!
//! Worklist dataflow over the instruction stream: every reachable item gets
//! exactly one entry depth. Exception handlers are entered with the thrown
//! reference on the stack.

use relax_core::{Item, Label, Layout, Segment, Stream};

use crate::error::BytecodeError;
use crate::insn::Insn;

/// Deepest stack, in words, over all reachable instructions.
pub fn max_stack(
    stream: &Stream<Insn>,
    layout: &Layout,
    handlers: &[Label],
) -> Result<u16, BytecodeError> {
    let marks = stream.mark_indices();
    let mark_of = |label: Label| marks.get(label.index()).copied().flatten();

    let mut depth: Vec<Option<u32>> = vec![None; stream.len()];
    let mut work: Vec<(usize, u32)> = Vec::new();
    let mut max = 0u32;

    if !stream.is_empty() {
        work.push((0, 0));
    }
    for &handler in handlers {
        if let Some(idx) = mark_of(handler) {
            work.push((idx, 1));
            max = max.max(1);
        }
    }

    while let Some((idx, entry)) = work.pop() {
        if idx >= stream.len() {
            continue;
        }
        if let Some(known) = depth[idx] {
            if known != entry {
                return Err(BytecodeError::StackMismatch {
                    pos: stream.position(idx),
                    expected: known,
                    actual: entry,
                });
            }
            continue;
        }
        depth[idx] = Some(entry);

        let insn = match stream.item(idx) {
            Item::Mark(_) => {
                work.push((idx + 1, entry));
                continue;
            }
            Item::Segment(insn) => insn,
        };

        let Some((pops, pushes)) = insn.effect() else {
            let op = match insn {
                Insn::Op(op) | Insn::Byte { op, .. } => *op,
                _ => 0,
            };
            return Err(BytecodeError::UnknownOpcode {
                op,
                at: layout.offset(idx),
            });
        };
        let (pops, pushes) = (pops as u32, pushes as u32);
        if entry < pops {
            return Err(BytecodeError::StackUnderflow {
                pos: stream.position(idx),
                depth: entry,
                pops,
            });
        }
        let exit = entry - pops + pushes;
        max = max.max(exit);

        if insn.falls_through() {
            work.push((idx + 1, exit));
        }
        insn.for_each_label(&mut |target| {
            // Pre-bound labels lie outside this method.
            if let Some(mark) = mark_of(target) {
                work.push((mark, exit));
            }
        });
    }

    Ok(u16::try_from(max).unwrap_or(u16::MAX))
}
