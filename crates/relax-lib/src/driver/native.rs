//! Lowering requests to x86-64 through [`LoweringTarget`].

use indexmap::IndexMap;
use relax_core::{Label, LayoutEngine, SourcePos, SwitchBuilder};
use relax_native::{CallTarget, CodeUnit, Cond, LoweringTarget, Operand, Reg, Width, X64Lowering};

use crate::config::Config;
use crate::request::{Compare, LabelId, Request, Unit, Value};
use crate::symbols::{Prim, Storage, SymbolTable};
use crate::{Error, Result, UnitError};

const TARGET: &str = "native";

/// Integer argument registers of the System V calling convention.
const ARGS: [Reg; 6] = [Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];

/// Compile one unit to native code.
///
/// Calls pass up to six integer arguments in registers and return in `rax`.
/// Stack alignment at call sites is left to the front end.
pub fn compile_native(unit: &Unit, symbols: &SymbolTable, config: &Config) -> Result<CodeUnit> {
    let code =
        lower_unit(unit, symbols, config).map_err(|e| UnitError::new(unit.name.as_str(), e))?;
    log::debug!(
        "{}: {} bytes of native code, {} fixups, {} passes",
        unit.name,
        code.size,
        code.fixups.len(),
        code.passes
    );
    Ok(code)
}

fn lower_unit(
    unit: &Unit,
    symbols: &SymbolTable,
    config: &Config,
) -> std::result::Result<CodeUnit, Error> {
    let mut lowering = Native {
        symbols,
        target: X64Lowering::new(LayoutEngine::new(config.layout.clone())),
        labels: IndexMap::new(),
        pos: SourcePos::UNKNOWN,
    };
    for request in &unit.requests {
        lowering.lower(request)?;
    }
    Ok(lowering.target.finish()?)
}

struct Native<'a> {
    symbols: &'a SymbolTable,
    target: X64Lowering,
    labels: IndexMap<LabelId, Label>,
    pos: SourcePos,
}

impl Native<'_> {
    fn label(&mut self, id: LabelId) -> Label {
        let target = &mut self.target;
        *self.labels.entry(id).or_insert_with(|| target.new_label())
    }

    fn unsupported(&self, what: &'static str) -> Error {
        Error::Unsupported {
            what,
            target: TARGET,
            pos: self.pos,
        }
    }

    fn reg(&self, name: &str) -> std::result::Result<(Reg, Prim), Error> {
        let var = self.symbols.lookup(name, self.pos)?;
        match var.storage {
            Storage::Reg(reg) => Ok((reg, var.prim)),
            Storage::Slot(_) => Err(Error::StorageMismatch {
                name: name.to_owned(),
                expected: "register",
                pos: self.pos,
            }),
        }
    }

    fn width(&self, prim: Prim) -> std::result::Result<Width, Error> {
        prim.width()
            .ok_or_else(|| self.unsupported("floating-point value"))
    }

    /// Register and width of a destination variable.
    fn dst(&self, name: &str) -> std::result::Result<(Reg, Width), Error> {
        let (reg, prim) = self.reg(name)?;
        Ok((reg, self.width(prim)?))
    }

    fn operand(&self, value: &Value) -> std::result::Result<Operand, Error> {
        match value {
            Value::Const(v) => Ok(Operand::Imm(*v)),
            Value::Var(name) => Ok(Operand::Reg(self.reg(name)?.0)),
        }
    }

    /// Width of a comparison: the first variable operand's, else 64 bits.
    fn compare_width(&self, a: &Value, b: &Value) -> std::result::Result<Width, Error> {
        match (a, b) {
            (Value::Var(name), _) | (_, Value::Var(name)) => Ok(self.dst(name)?.1),
            _ => Ok(Width::W64),
        }
    }

    fn lower(&mut self, request: &Request) -> std::result::Result<(), Error> {
        match request {
            Request::Pos(pos) => {
                self.pos = *pos;
                self.target.set_pos(*pos);
            }
            Request::Place(id) => {
                let label = self.label(*id);
                self.target.place(label);
            }
            Request::Move { dst, src } => {
                let (reg, width) = self.dst(dst)?;
                let src = self.operand(src)?;
                self.target.mov(width, Operand::Reg(reg), src)?;
            }
            Request::Unary { op, dst } => {
                let (reg, width) = self.dst(dst)?;
                self.target.unary(*op, width, Operand::Reg(reg))?;
            }
            Request::Binary { op, dst, src } => {
                let (reg, width) = self.dst(dst)?;
                let src = self.operand(src)?;
                self.target.binary(*op, width, Operand::Reg(reg), src)?;
            }
            Request::MulWide {
                signed,
                hi,
                lo,
                a,
                b,
            } => {
                let (hi, width) = self.dst(hi)?;
                let (lo, _) = self.dst(lo)?;
                let (a, b) = (self.operand(a)?, self.operand(b)?);
                self.target.mul_wide(width, *signed, hi, lo, a, b)?;
            }
            Request::DivRem {
                signed,
                quot,
                rem,
                a,
                b,
            } => {
                let (quot, width) = self.dst(quot)?;
                let (rem, _) = self.dst(rem)?;
                let (a, b) = (self.operand(a)?, self.operand(b)?);
                self.target.div_rem(width, *signed, quot, rem, a, b)?;
            }
            Request::Branch { cond, a, b, target } => {
                let width = self.compare_width(a, b)?;
                let (a, b) = (self.operand(a)?, self.operand(b)?);
                self.target.compare(width, a, b)?;
                let label = self.label(*target);
                self.target.jump_if(cond_code(*cond), label);
            }
            Request::Jump(id) => {
                let label = self.label(*id);
                self.target.jump(label);
            }
            Request::Switch {
                value,
                cases,
                default,
            } => {
                let value = self.operand(value)?;
                let default = self.label(*default);
                let mut switch = SwitchBuilder::new(default);
                for &(v, id) in cases {
                    let target = self.label(id);
                    switch.add(v, target);
                }
                self.target.switch(value, switch)?;
            }
            Request::Call {
                callee,
                args,
                result,
            } => self.call(callee, args, result.as_deref())?,
            Request::Return(value) => {
                if let Some(value) = value {
                    let width = match value {
                        Value::Var(name) => self.dst(name)?.1,
                        Value::Const(_) => Width::W64,
                    };
                    let src = self.operand(value)?;
                    self.target.mov(width, Operand::Reg(Reg::Rax), src)?;
                }
                self.target.ret();
            }
            Request::Push(value) => {
                let src = self.operand(value)?;
                self.target.push(src)?;
            }
            Request::Pop(name) => {
                let (reg, _) = self.reg(name)?;
                self.target.pop(Operand::Reg(reg))?;
            }
        }
        Ok(())
    }

    /// Arguments go through the stack so that moving one into its register
    /// never clobbers a later argument still living there.
    fn call(
        &mut self,
        callee: &str,
        args: &[Value],
        result: Option<&str>,
    ) -> std::result::Result<(), Error> {
        if args.len() > ARGS.len() {
            return Err(self.unsupported("more than six call arguments"));
        }
        for arg in args {
            let src = self.operand(arg)?;
            self.target.push(src)?;
        }
        for &reg in ARGS[..args.len()].iter().rev() {
            self.target.pop(Operand::Reg(reg))?;
        }
        self.target.call(CallTarget::External(callee.to_owned()));
        if let Some(name) = result {
            let (reg, width) = self.dst(name)?;
            self.target
                .mov(width, Operand::Reg(reg), Operand::Reg(Reg::Rax))?;
        }
        Ok(())
    }
}

fn cond_code(cond: Compare) -> Cond {
    match cond {
        Compare::Eq => Cond::Eq,
        Compare::Ne => Cond::Ne,
        Compare::Lt => Cond::Lt,
        Compare::Ge => Cond::Ge,
        Compare::Gt => Cond::Gt,
        Compare::Le => Cond::Le,
    }
}
