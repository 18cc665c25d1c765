//! Multi-way dispatch selection.
//!
//! Collects `(value, target)` cases and picks a dense table (one slot per
//! value in `[min, max]`) or a sparse sorted list, based on the density
//! constant K from `LayoutConfig`. Targets turn the chosen form into
//! segments.

use crate::SourcePos;
use crate::config::LayoutConfig;
use crate::error::LayoutError;
use crate::label::Label;

/// Table indexed by `value - low`; holes route to `default`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DenseTable {
    pub low: i32,
    pub targets: Vec<Label>,
    pub default: Label,
}

impl DenseTable {
    pub fn high(&self) -> i32 {
        (self.low as i64 + self.targets.len() as i64 - 1) as i32
    }
}

/// Cases sorted ascending by value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SparseTable {
    pub cases: Vec<(i32, Label)>,
    pub default: Label,
}

/// Compiled form of a multi-way branch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    Dense(DenseTable),
    Sparse(SparseTable),
}

impl Dispatch {
    pub fn default_target(&self) -> Label {
        match self {
            Self::Dense(t) => t.default,
            Self::Sparse(t) => t.default,
        }
    }

    /// Target selected for `value`.
    pub fn route(&self, value: i32) -> Label {
        match self {
            Self::Dense(t) => {
                let idx = value as i64 - t.low as i64;
                if idx < 0 || idx >= t.targets.len() as i64 {
                    return t.default;
                }
                t.targets[idx as usize]
            }
            Self::Sparse(t) => match t.cases.binary_search_by_key(&value, |&(v, _)| v) {
                Ok(i) => t.cases[i].1,
                Err(_) => t.default,
            },
        }
    }

    /// Every label the dispatch can jump to, default first.
    pub fn labels(&self) -> impl Iterator<Item = Label> + '_ {
        let (default, rest): (Label, Box<dyn Iterator<Item = Label> + '_>) = match self {
            Self::Dense(t) => (t.default, Box::new(t.targets.iter().copied())),
            Self::Sparse(t) => (t.default, Box::new(t.cases.iter().map(|&(_, l)| l))),
        };
        std::iter::once(default).chain(rest)
    }

    pub fn is_dense(&self) -> bool {
        matches!(self, Self::Dense(_))
    }
}

/// Builder collecting cases for one switch.
#[derive(Clone, Debug)]
pub struct SwitchBuilder {
    cases: Vec<(i32, Label)>,
    default: Label,
    pos: SourcePos,
}

impl SwitchBuilder {
    pub fn new(default: Label) -> Self {
        Self {
            cases: Vec::new(),
            default,
            pos: SourcePos::UNKNOWN,
        }
    }

    /// Source position reported for duplicate cases.
    pub fn at(mut self, pos: SourcePos) -> Self {
        self.pos = pos;
        self
    }

    pub fn case(mut self, value: i32, target: Label) -> Self {
        self.cases.push((value, target));
        self
    }

    pub fn add(&mut self, value: i32, target: Label) {
        self.cases.push((value, target));
    }

    /// Sort, reject duplicates and choose the table form.
    pub fn build(self, config: &LayoutConfig) -> Result<Dispatch, LayoutError> {
        let Self {
            mut cases,
            default,
            pos,
        } = self;

        cases.sort_by_key(|&(v, _)| v);
        if let Some(w) = cases.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(LayoutError::AmbiguousCase {
                value: w[0].0 as i64,
                pos,
            });
        }

        let (Some(&(low, _)), Some(&(high, _))) = (cases.first(), cases.last()) else {
            return Ok(Dispatch::Sparse(SparseTable { cases, default }));
        };

        let range = high as i64 - low as i64 + 1;
        let budget = cases.len() as i64 * config.switch_density as i64;
        if range > budget {
            return Ok(Dispatch::Sparse(SparseTable { cases, default }));
        }

        let mut targets = vec![default; range as usize];
        for (value, label) in cases {
            targets[(value as i64 - low as i64) as usize] = label;
        }
        Ok(Dispatch::Dense(DenseTable {
            low,
            targets,
            default,
        }))
    }
}
