//! Operation requests issued by a front end.
//!
//! A unit is a flat list of requests over named variables and front-end
//! label ids. Both targets consume the same list; an operation with no form
//! on a target fails the unit with `Error::Unsupported`.

use relax_core::SourcePos;
use relax_native::{BinOp, UnOp};

/// Front-end label identity, scoped to one unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(pub u32);

/// Request operand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Const(i64),
    Var(String),
}

impl Value {
    pub fn var(name: impl Into<String>) -> Self {
        Value::Var(name.into())
    }
}

/// Signed comparison of a `Branch`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Compare {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// Source position for the following requests.
    Pos(SourcePos),
    Place(LabelId),
    Move {
        dst: String,
        src: Value,
    },
    /// `dst = op dst`
    Unary {
        op: UnOp,
        dst: String,
    },
    /// `dst = dst op src`
    Binary {
        op: BinOp,
        dst: String,
        src: Value,
    },
    /// `hi:lo = a * b`
    MulWide {
        signed: bool,
        hi: String,
        lo: String,
        a: Value,
        b: Value,
    },
    DivRem {
        signed: bool,
        quot: String,
        rem: String,
        a: Value,
        b: Value,
    },
    /// Jump to `target` when `a cond b`.
    Branch {
        cond: Compare,
        a: Value,
        b: Value,
        target: LabelId,
    },
    Jump(LabelId),
    Switch {
        value: Value,
        cases: Vec<(i32, LabelId)>,
        default: LabelId,
    },
    Call {
        callee: String,
        args: Vec<Value>,
        result: Option<String>,
    },
    Return(Option<Value>),
    Push(Value),
    Pop(String),
}

/// One compilation unit: a method or function body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Unit {
    pub name: String,
    /// Local slots taken by parameters (managed only).
    pub param_words: u16,
    pub requests: Vec<Request>,
    /// Source text, used to render diagnostics.
    pub source: Option<String>,
}

impl Unit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn params(mut self, words: u16) -> Self {
        self.param_words = words;
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn push(&mut self, request: Request) -> &mut Self {
        self.requests.push(request);
        self
    }
}
