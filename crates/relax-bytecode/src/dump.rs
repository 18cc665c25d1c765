//! Human-readable listing of method code.

use std::fmt::Write as _;

use crate::decode::{Decoded, Operands, decode};
use crate::error::BytecodeError;
use crate::frames::VType;
use crate::method::MethodBody;

/// One line per instruction, offsets right-aligned.
pub fn dump(code: &[u8]) -> Result<String, BytecodeError> {
    let insns = decode(code)?;
    let width = insns.last().map_or(1, |i| i.pc.to_string().len());
    let mut out = String::new();
    for insn in &insns {
        dump_insn(&mut out, insn, width);
    }
    Ok(out)
}

/// Limits, code, exception table, line table and frames of a method body.
pub fn dump_method(body: &MethodBody) -> Result<String, BytecodeError> {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "max_stack={} max_locals={}",
        body.max_stack, body.max_locals
    );
    out.push_str(&dump(&body.code)?);

    if !body.exceptions.is_empty() {
        out.push_str("exceptions:\n");
        for e in &body.exceptions {
            let _ = writeln!(
                out,
                "  [{}, {}) -> {} catch #{}",
                e.start_pc, e.end_pc, e.handler_pc, e.catch_type
            );
        }
    }
    if !body.lines.is_empty() {
        out.push_str("lines:\n");
        for e in body.lines.entries() {
            let _ = writeln!(out, "  {} line {}", e.pc, e.line);
        }
    }
    if let Some(map) = body.frames.as_ref().filter(|m| !m.is_empty()) {
        out.push_str("frames:\n");
        for f in &map.frames {
            let _ = writeln!(
                out,
                "  {} locals [{}] stack [{}]",
                f.pc,
                join_types(&f.locals),
                join_types(&f.stack)
            );
        }
    }
    Ok(out)
}

fn join_types(types: &[VType]) -> String {
    types
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn dump_insn(out: &mut String, insn: &Decoded, width: usize) {
    let wide = if insn.wide { "wide " } else { "" };
    let _ = write!(out, "{:>width$}: {wide}{}", insn.pc, insn.mnemonic());
    let _ = match &insn.operands {
        Operands::None => Ok(()),
        Operands::Local(slot) => write!(out, " {slot}"),
        Operands::Iinc { slot, delta } => write!(out, " {slot} {delta}"),
        Operands::Int(v) => write!(out, " {v}"),
        Operands::Index(idx) => write!(out, " #{idx}"),
        Operands::Interface { index, count } => write!(out, " #{index} {count}"),
        Operands::MultiArray { index, dims } => write!(out, " #{index} {dims}"),
        Operands::Byte(v) => write!(out, " {v}"),
        Operands::Branch(target) => write!(out, " {target}"),
        Operands::Table {
            default,
            low,
            targets,
        } => {
            let high = *low as i64 + targets.len() as i64 - 1;
            let _ = write!(out, " {low}..{high} default {default}");
            for (i, target) in targets.iter().enumerate() {
                let _ = write!(out, "\n{:width$}    {} -> {target}", "", *low as i64 + i as i64);
            }
            Ok(())
        }
        Operands::Lookup { default, pairs } => {
            let _ = write!(out, " default {default}");
            for (value, target) in pairs {
                let _ = write!(out, "\n{:width$}    {value} -> {target}", "");
            }
            Ok(())
        }
    };
    out.push('\n');
}
