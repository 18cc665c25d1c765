//! Lowering requests to managed bytecode.
//!
//! Every request becomes a load/operate/store sequence over local slots, so
//! the operand stack is empty between requests.

use indexmap::IndexMap;
use relax_bytecode::opcodes::{self, Cond};
use relax_bytecode::{Insn, MethodBody, MethodBuilder, PoolTypes, VType};
use relax_core::{Label, LayoutConfig, LayoutEngine, LayoutError, SourcePos, SwitchBuilder};
use relax_native::{BinOp, UnOp};

use crate::config::Config;
use crate::request::{Compare, LabelId, Request, Unit, Value};
use crate::symbols::{Prim, Storage, SymbolTable};
use crate::{Error, Result, UnitError};

const TARGET: &str = "managed";

/// Compile one unit to a managed method body.
pub fn compile_managed(unit: &Unit, symbols: &SymbolTable, config: &Config) -> Result<MethodBody> {
    let body =
        lower_unit(unit, symbols, config).map_err(|e| UnitError::new(unit.name.as_str(), e))?;
    log::debug!(
        "{}: {} bytes of bytecode in {} passes",
        unit.name,
        body.code.len(),
        body.passes
    );
    Ok(body)
}

fn lower_unit(
    unit: &Unit,
    symbols: &SymbolTable,
    config: &Config,
) -> std::result::Result<MethodBody, Error> {
    let mut lowering = Managed::new(unit, symbols, &config.layout);
    for request in &unit.requests {
        lowering.lower(request)?;
    }
    let engine = LayoutEngine::new(config.layout.clone());
    if !config.stack_maps {
        return Ok(lowering.builder.finish(&engine)?);
    }
    let entry = lowering.entry(unit.param_words)?;
    lowering.builder.set_entry(entry);
    Ok(lowering
        .builder
        .finish_with_frames(&engine, &SymbolTypes(symbols))?)
}

/// Stack map types of values the symbol table describes.
struct SymbolTypes<'a>(&'a SymbolTable);

impl SymbolTypes<'_> {
    fn vtype(&self, prim: Prim) -> Option<VType> {
        Some(match prim {
            Prim::Int => VType::Integer,
            Prim::Long => VType::Long,
            Prim::Float => VType::Float,
            Prim::Double => VType::Double,
            Prim::Ref => VType::Object(self.0.reference_class()?),
        })
    }
}

impl PoolTypes for SymbolTypes<'_> {
    fn constant(&self, _index: u16) -> Option<VType> {
        None
    }

    fn result(&self, op: u8, index: u16) -> Option<Vec<VType>> {
        if op != opcodes::INVOKESTATIC {
            return None;
        }
        let prim = self.0.callee_at(index)?.result?;
        Some(vec![self.vtype(prim)?])
    }
}

struct Managed<'a> {
    symbols: &'a SymbolTable,
    config: &'a LayoutConfig,
    builder: MethodBuilder,
    labels: IndexMap<LabelId, Label>,
    pos: SourcePos,
}

impl<'a> Managed<'a> {
    fn new(unit: &Unit, symbols: &'a SymbolTable, config: &'a LayoutConfig) -> Self {
        Self {
            symbols,
            config,
            builder: MethodBuilder::new(unit.param_words),
            labels: IndexMap::new(),
            pos: SourcePos::UNKNOWN,
        }
    }

    /// Parameter types in slot order; slots no variable claims are `Top`.
    fn entry(&self, param_words: u16) -> std::result::Result<Vec<VType>, Error> {
        let types = SymbolTypes(self.symbols);
        let mut entry = Vec::new();
        let mut slot = 0;
        while slot < param_words {
            let Some(var) = self.symbols.slot_variable(slot) else {
                entry.push(VType::Top);
                slot += 1;
                continue;
            };
            let vtype = types
                .vtype(var.prim)
                .ok_or_else(|| self.unsupported("reference parameter without a reference class"))?;
            entry.push(vtype);
            slot += var.prim.kind().words();
        }
        Ok(entry)
    }

    fn label(&mut self, id: LabelId) -> Label {
        let builder = &mut self.builder;
        *self.labels.entry(id).or_insert_with(|| builder.label())
    }

    fn unsupported(&self, what: &'static str) -> Error {
        Error::Unsupported {
            what,
            target: TARGET,
            pos: self.pos,
        }
    }

    fn slot(&self, name: &str) -> std::result::Result<(u16, Prim), Error> {
        let var = self.symbols.lookup(name, self.pos)?;
        match var.storage {
            Storage::Slot(slot) => Ok((slot, var.prim)),
            Storage::Reg(_) => Err(Error::StorageMismatch {
                name: name.to_owned(),
                expected: "local slot",
                pos: self.pos,
            }),
        }
    }

    /// Type of a value: a variable's own, or `hint` for constants.
    fn prim(&self, value: &Value, hint: Prim) -> std::result::Result<Prim, Error> {
        match value {
            Value::Const(_) => Ok(hint),
            Value::Var(name) => Ok(self.slot(name)?.1),
        }
    }

    fn emit(&mut self, insn: Insn) {
        self.builder.push(insn);
    }

    fn op(&mut self, op: u8) {
        self.emit(Insn::Op(op));
    }

    fn load(&mut self, value: &Value, hint: Prim) -> std::result::Result<(), Error> {
        let v = match value {
            Value::Var(name) => {
                let (slot, prim) = self.slot(name)?;
                self.emit(Insn::load(prim.kind(), slot));
                return Ok(());
            }
            Value::Const(v) => *v,
        };
        match hint {
            Prim::Int => {
                let v = i32::try_from(v)
                    .map_err(|_| LayoutError::overflow("int constant", v).at(self.pos))?;
                self.emit(Insn::Int(v));
            }
            Prim::Long => {
                let v = i32::try_from(v)
                    .map_err(|_| self.unsupported("long constant outside the int range"))?;
                self.emit(Insn::Int(v));
                self.op(opcodes::I2L);
            }
            Prim::Ref if v == 0 => self.op(opcodes::ACONST_NULL),
            Prim::Ref => return Err(self.unsupported("non-null reference constant")),
            Prim::Float | Prim::Double => {
                return Err(self.unsupported("floating-point constant"));
            }
        }
        Ok(())
    }

    fn store(&mut self, name: &str) -> std::result::Result<Prim, Error> {
        let (slot, prim) = self.slot(name)?;
        self.emit(Insn::store(prim.kind(), slot));
        Ok(prim)
    }

    /// Typed variant of an `i*` opcode whose `l`/`f`/`d` forms follow it.
    fn typed(&self, base: u8, prim: Prim) -> std::result::Result<u8, Error> {
        let offset = match prim {
            Prim::Int => 0,
            Prim::Long => 1,
            Prim::Float => 2,
            Prim::Double => 3,
            Prim::Ref => return Err(self.unsupported("arithmetic on references")),
        };
        Ok(base + offset)
    }

    fn integral(&self, prim: Prim, what: &'static str) -> std::result::Result<(), Error> {
        if prim.is_integral() {
            Ok(())
        } else {
            Err(self.unsupported(what))
        }
    }

    fn lower(&mut self, request: &Request) -> std::result::Result<(), Error> {
        match request {
            Request::Pos(pos) => {
                self.pos = *pos;
                self.builder.set_pos(*pos);
            }
            Request::Place(id) => {
                let label = self.label(*id);
                self.builder.place(label);
            }
            Request::Move { dst, src } => {
                let (_, prim) = self.slot(dst)?;
                self.load(src, prim)?;
                self.store(dst)?;
            }
            Request::Unary { op, dst } => self.unary(*op, dst)?,
            Request::Binary { op, dst, src } => {
                let (_, prim) = self.slot(dst)?;
                let code = match op {
                    BinOp::Add => self.typed(opcodes::IADD, prim)?,
                    BinOp::Sub => self.typed(opcodes::ISUB, prim)?,
                    BinOp::And | BinOp::Or | BinOp::Xor => {
                        self.integral(prim, "bitwise operation on floating point")?;
                        let base = match op {
                            BinOp::And => opcodes::IAND,
                            BinOp::Or => opcodes::IOR,
                            _ => opcodes::IXOR,
                        };
                        self.typed(base, prim)?
                    }
                };
                self.load(&Value::var(dst.as_str()), prim)?;
                self.load(src, prim)?;
                self.op(code);
                self.store(dst)?;
            }
            Request::MulWide {
                signed,
                hi,
                lo,
                a,
                b,
            } => self.mul_wide(*signed, hi, lo, a, b)?,
            Request::DivRem {
                signed,
                quot,
                rem,
                a,
                b,
            } => {
                if !signed {
                    return Err(self.unsupported("unsigned division"));
                }
                let (_, prim) = self.slot(quot)?;
                let div = self.typed(opcodes::IDIV, prim)?;
                let rem_op = self.typed(opcodes::IREM, prim)?;
                self.load(a, prim)?;
                self.load(b, prim)?;
                self.op(div);
                self.load(a, prim)?;
                self.load(b, prim)?;
                self.op(rem_op);
                self.store(rem)?;
                self.store(quot)?;
            }
            Request::Branch { cond, a, b, target } => self.branch(*cond, a, b, *target)?,
            Request::Jump(id) => {
                let label = self.label(*id);
                self.emit(Insn::goto(label));
            }
            Request::Switch {
                value,
                cases,
                default,
            } => {
                if self.prim(value, Prim::Int)? != Prim::Int {
                    return Err(self.unsupported("switch over a non-int value"));
                }
                let default = self.label(*default);
                let mut switch = SwitchBuilder::new(default).at(self.pos);
                for &(v, id) in cases {
                    let target = self.label(id);
                    switch.add(v, target);
                }
                let dispatch = switch.build(self.config)?;
                self.load(value, Prim::Int)?;
                self.emit(Insn::Switch(dispatch));
            }
            Request::Call {
                callee,
                args,
                result,
            } => {
                let target = *self
                    .symbols
                    .callee(callee)
                    .ok_or_else(|| Error::UndefinedSymbol {
                        name: callee.clone(),
                        pos: self.pos,
                    })?;
                for arg in args {
                    self.load(arg, Prim::Int)?;
                }
                self.emit(Insn::Ref {
                    op: opcodes::INVOKESTATIC,
                    index: target.index,
                    pops: target.args,
                    pushes: target.returns(),
                });
                match (result, target.returns()) {
                    (Some(name), _) => {
                        self.store(name)?;
                    }
                    (None, 0) => {}
                    (None, 1) => self.op(opcodes::POP),
                    (None, _) => self.op(opcodes::POP2),
                }
            }
            Request::Return(None) => self.op(opcodes::RETURN),
            Request::Return(Some(value)) => {
                let prim = self.prim(value, Prim::Int)?;
                self.load(value, prim)?;
                self.op(prim.kind().ret());
            }
            Request::Push(value) => {
                let prim = self.prim(value, Prim::Int)?;
                self.load(value, prim)?;
            }
            Request::Pop(name) => {
                self.store(name)?;
            }
        }
        Ok(())
    }

    fn unary(&mut self, op: UnOp, dst: &str) -> std::result::Result<(), Error> {
        let (_, prim) = self.slot(dst)?;
        self.load(&Value::var(dst), prim)?;
        match op {
            UnOp::Neg => {
                let code = self.typed(opcodes::INEG, prim)?;
                self.op(code);
            }
            UnOp::Not => {
                self.integral(prim, "bitwise not on floating point")?;
                self.emit(Insn::Int(-1));
                if prim == Prim::Long {
                    self.op(opcodes::I2L);
                }
                let code = self.typed(opcodes::IXOR, prim)?;
                self.op(code);
            }
        }
        self.store(dst)?;
        Ok(())
    }

    /// Signed int product widened through a long: `hi` gets bits 32..64.
    fn mul_wide(
        &mut self,
        signed: bool,
        hi: &str,
        lo: &str,
        a: &Value,
        b: &Value,
    ) -> std::result::Result<(), Error> {
        if !signed {
            return Err(self.unsupported("unsigned widening multiply"));
        }
        for prim in [
            self.slot(hi)?.1,
            self.slot(lo)?.1,
            self.prim(a, Prim::Int)?,
            self.prim(b, Prim::Int)?,
        ] {
            if prim != Prim::Int {
                return Err(self.unsupported("widening multiply of non-int values"));
            }
        }
        self.load(a, Prim::Int)?;
        self.op(opcodes::I2L);
        self.load(b, Prim::Int)?;
        self.op(opcodes::I2L);
        self.op(opcodes::LMUL);
        self.op(opcodes::DUP2);
        self.op(opcodes::L2I);
        self.store(lo)?;
        self.emit(Insn::Int(32));
        self.op(opcodes::LSHR);
        self.op(opcodes::L2I);
        self.store(hi)?;
        Ok(())
    }

    fn branch(
        &mut self,
        cond: Compare,
        a: &Value,
        b: &Value,
        target: LabelId,
    ) -> std::result::Result<(), Error> {
        let prim = match a {
            Value::Var(_) => self.prim(a, Prim::Int)?,
            Value::Const(_) => self.prim(b, Prim::Int)?,
        };
        let against_zero = *b == Value::Const(0);
        let jump = match prim {
            Prim::Int if against_zero => {
                self.load(a, prim)?;
                zero_cond(cond)
            }
            Prim::Int => {
                self.load(a, prim)?;
                self.load(b, prim)?;
                int_cond(cond)
            }
            Prim::Long => {
                self.load(a, prim)?;
                self.load(b, prim)?;
                self.op(opcodes::LCMP);
                zero_cond(cond)
            }
            Prim::Float | Prim::Double => {
                // NaN must leave the branch untaken, so `<` and `<=` compare
                // with the variant that yields 1 on NaN.
                let (greater, less) = match prim {
                    Prim::Float => (opcodes::FCMPG, opcodes::FCMPL),
                    _ => (opcodes::DCMPG, opcodes::DCMPL),
                };
                self.load(a, prim)?;
                self.load(b, prim)?;
                self.op(match cond {
                    Compare::Lt | Compare::Le => greater,
                    _ => less,
                });
                zero_cond(cond)
            }
            Prim::Ref => {
                let (null, same) = match cond {
                    Compare::Eq => (Cond::Null, Cond::ACmpEq),
                    Compare::Ne => (Cond::NonNull, Cond::ACmpNe),
                    _ => return Err(self.unsupported("ordered comparison of references")),
                };
                self.load(a, prim)?;
                if against_zero {
                    null
                } else {
                    self.load(b, prim)?;
                    same
                }
            }
        };
        let label = self.label(target);
        self.emit(Insn::branch(jump, label));
        Ok(())
    }
}

fn zero_cond(cond: Compare) -> Cond {
    match cond {
        Compare::Eq => Cond::Eq,
        Compare::Ne => Cond::Ne,
        Compare::Lt => Cond::Lt,
        Compare::Ge => Cond::Ge,
        Compare::Gt => Cond::Gt,
        Compare::Le => Cond::Le,
    }
}

fn int_cond(cond: Compare) -> Cond {
    match cond {
        Compare::Eq => Cond::ICmpEq,
        Compare::Ne => Cond::ICmpNe,
        Compare::Lt => Cond::ICmpLt,
        Compare::Ge => Cond::ICmpGe,
        Compare::Gt => Cond::ICmpGt,
        Compare::Le => Cond::ICmpLe,
    }
}
