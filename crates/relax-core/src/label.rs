//! Symbolic positions.
//!
//! A `Label` is a plain index into the `LabelTable` of the stream that created
//! it. Labels may be referenced before they are placed; the layout engine binds
//! each placed label exactly once.

use crate::error::LayoutError;

/// Symbolic reference to a position in a segment stream.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Label(u32);

impl Label {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

#[derive(Clone, Debug, Default)]
struct Slot {
    bound: Option<u32>,
    /// Indices of the stream items whose encoding depends on this label.
    refs: Vec<usize>,
}

/// Binding state for every label of one stream.
#[derive(Clone, Debug, Default)]
pub struct LabelTable {
    slots: Vec<Slot>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh, unbound label.
    pub fn create(&mut self) -> Label {
        let label = Label(self.slots.len() as u32);
        self.slots.push(Slot::default());
        label
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Bind `label` to `offset`. A label binds at most once.
    pub fn bind(&mut self, label: Label, offset: u32) -> Result<(), LayoutError> {
        let slot = self
            .slots
            .get_mut(label.index())
            .ok_or(LayoutError::UnresolvedReference { label })?;
        if let Some(first) = slot.bound {
            return Err(LayoutError::DuplicateBinding {
                label,
                first,
                second: offset,
            });
        }
        slot.bound = Some(offset);
        Ok(())
    }

    /// Final offset of a bound label.
    pub fn value(&self, label: Label) -> Result<u32, LayoutError> {
        self.bound(label)
            .ok_or(LayoutError::UnresolvedReference { label })
    }

    pub fn is_bound(&self, label: Label) -> bool {
        self.bound(label).is_some()
    }

    /// Whether `label` was created by this table.
    pub fn contains(&self, label: Label) -> bool {
        label.index() < self.slots.len()
    }

    /// Stream items that reference `label`.
    pub fn referrers(&self, label: Label) -> &[usize] {
        self.slots
            .get(label.index())
            .map(|s| s.refs.as_slice())
            .unwrap_or(&[])
    }

    /// Iterate `(label, offset)` over bound labels.
    pub fn iter_bound(&self) -> impl Iterator<Item = (Label, u32)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.bound.map(|off| (Label(i as u32), off)))
    }

    pub(crate) fn bound(&self, label: Label) -> Option<u32> {
        self.slots.get(label.index()).and_then(|s| s.bound)
    }

    pub(crate) fn label_at(&self, slot: usize) -> Label {
        debug_assert!(slot < self.slots.len());
        Label(slot as u32)
    }

    pub(crate) fn add_ref(&mut self, label: Label, item: usize) {
        if let Some(slot) = self.slots.get_mut(label.index())
            && slot.refs.last() != Some(&item)
        {
            slot.refs.push(item);
        }
    }
}
