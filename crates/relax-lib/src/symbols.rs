//! Symbol table shared by all units of a compilation.
//!
//! Front ends assign storage before code generation: managed variables live
//! in local slots, native variables in registers. The table is read-only
//! while units compile and is shared across threads.

use indexmap::IndexMap;
use relax_bytecode::Kind;
use relax_core::SourcePos;
use relax_native::{Reg, Width};

use crate::Error;

/// Primitive type of a variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Prim {
    Int,
    Long,
    Float,
    Double,
    Ref,
}

impl Prim {
    pub fn kind(self) -> Kind {
        match self {
            Prim::Int => Kind::Int,
            Prim::Long => Kind::Long,
            Prim::Float => Kind::Float,
            Prim::Double => Kind::Double,
            Prim::Ref => Kind::Ref,
        }
    }

    /// Register width on the native target; floating point has none.
    pub fn width(self) -> Option<Width> {
        match self {
            Prim::Int => Some(Width::W32),
            Prim::Long | Prim::Ref => Some(Width::W64),
            Prim::Float | Prim::Double => None,
        }
    }

    pub fn is_integral(self) -> bool {
        matches!(self, Prim::Int | Prim::Long)
    }
}

/// Where a variable lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Storage {
    /// Managed local variable slot.
    Slot(u16),
    /// Native register.
    Reg(Reg),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Variable {
    pub storage: Storage,
    pub prim: Prim,
}

/// Managed call target: a constant pool method reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Callee {
    pub index: u16,
    /// Argument words popped by the call.
    pub args: u16,
    /// Returned type; `None` for `void`.
    pub result: Option<Prim>,
}

impl Callee {
    /// Result words pushed by the call.
    pub fn returns(&self) -> u16 {
        self.result.map_or(0, |prim| prim.kind().words())
    }
}

#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    variables: IndexMap<String, Variable>,
    callees: IndexMap<String, Callee>,
    reference_class: Option<u16>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define or redefine a variable.
    pub fn define(&mut self, name: impl Into<String>, storage: Storage, prim: Prim) -> &mut Self {
        self.variables
            .insert(name.into(), Variable { storage, prim });
        self
    }

    pub fn define_callee(&mut self, name: impl Into<String>, callee: Callee) -> &mut Self {
        self.callees.insert(name.into(), callee);
        self
    }

    /// Class constant that `Prim::Ref` values are typed as in stack maps.
    pub fn set_reference_class(&mut self, index: u16) -> &mut Self {
        self.reference_class = Some(index);
        self
    }

    pub fn reference_class(&self) -> Option<u16> {
        self.reference_class
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn callee(&self, name: &str) -> Option<&Callee> {
        self.callees.get(name)
    }

    pub(crate) fn callee_at(&self, index: u16) -> Option<&Callee> {
        self.callees.values().find(|c| c.index == index)
    }

    /// Variable occupying managed slot `slot`, first definition wins.
    pub(crate) fn slot_variable(&self, slot: u16) -> Option<&Variable> {
        self.variables
            .values()
            .find(|v| v.storage == Storage::Slot(slot))
    }

    pub(crate) fn lookup(&self, name: &str, pos: SourcePos) -> Result<&Variable, Error> {
        self.variables
            .get(name)
            .ok_or_else(|| Error::UndefinedSymbol {
                name: name.to_owned(),
                pos,
            })
    }

    /// Variables in definition order.
    pub fn variables(&self) -> impl Iterator<Item = (&str, &Variable)> {
        self.variables.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty() && self.callees.is_empty()
    }
}
