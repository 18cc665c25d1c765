//! Ordered segment streams.

use crate::SourcePos;
use crate::label::{Label, LabelTable};
use crate::segment::Segment;

/// One entry of a stream.
#[derive(Clone, Debug)]
pub enum Item<S> {
    /// Binds a label to the offset where it appears.
    Mark(Label),
    Segment(S),
}

/// Ordered sequence of segments and label marks for one compilation unit.
///
/// The stream owns its label table; labels never cross streams.
#[derive(Clone, Debug)]
pub struct Stream<S> {
    items: Vec<Item<S>>,
    positions: Vec<SourcePos>,
    labels: LabelTable,
    pos: SourcePos,
}

impl<S> Default for Stream<S> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            positions: Vec::new(),
            labels: LabelTable::new(),
            pos: SourcePos::UNKNOWN,
        }
    }
}

impl<S: Segment> Stream<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a label that may be placed before or after its first use.
    pub fn label(&mut self) -> Label {
        self.labels.create()
    }

    /// Place `label` at the current end of the stream.
    pub fn place(&mut self, label: Label) {
        self.items.push(Item::Mark(label));
        self.positions.push(self.pos);
    }

    /// Append a segment and return its item index.
    pub fn push(&mut self, segment: S) -> usize {
        let idx = self.items.len();
        let labels = &mut self.labels;
        segment.for_each_label(&mut |label| labels.add_ref(label, idx));
        self.items.push(Item::Segment(segment));
        self.positions.push(self.pos);
        idx
    }

    /// Set the source position recorded for subsequently appended items.
    pub fn set_pos(&mut self, pos: SourcePos) {
        self.pos = pos;
    }

    pub fn pos(&self) -> SourcePos {
        self.pos
    }
}

impl<S> Stream<S> {
    pub fn items(&self) -> &[Item<S>] {
        &self.items
    }

    pub fn item(&self, idx: usize) -> &Item<S> {
        &self.items[idx]
    }

    /// Source position of item `idx`.
    pub fn position(&self, idx: usize) -> SourcePos {
        self.positions[idx]
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// Label table for pre-binding labels to absolute offsets.
    pub fn labels_mut(&mut self) -> &mut LabelTable {
        &mut self.labels
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate `(index, segment)` over segment items.
    pub fn segments(&self) -> impl Iterator<Item = (usize, &S)> + '_ {
        self.items.iter().enumerate().filter_map(|(i, item)| match item {
            Item::Segment(s) => Some((i, s)),
            Item::Mark(_) => None,
        })
    }

    /// Item index of the mark placing each label (`None` if never placed).
    pub fn mark_indices(&self) -> Vec<Option<usize>> {
        let mut marks = vec![None; self.labels.len()];
        for (i, item) in self.items.iter().enumerate() {
            if let Item::Mark(label) = item
                && let Some(slot) = marks.get_mut(label.index())
                && slot.is_none()
            {
                *slot = Some(i);
            }
        }
        marks
    }
}
