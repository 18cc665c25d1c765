//! Branch-relaxation layout.
//!
//! Every segment starts at its shortest encoding. Each pass walks the stream,
//! places labels, and re-measures the segments whose inputs moved, passing the
//! previous length as a floor so lengths only ever grow. The walk repeats until
//! a pass changes no length and moves no label. Since every segment has
//! finitely many encodings, growth stops after a few passes.

use crate::config::LayoutConfig;
use crate::error::LayoutError;
use crate::label::{Label, LabelTable};
use crate::segment::{Resolve, Segment};
use crate::stream::{Item, Stream};

/// Result of layout: offsets, lengths and label bindings for one stream.
#[derive(Clone, Debug)]
pub struct Layout {
    offsets: Vec<u32>,
    lengths: Vec<u32>,
    labels: LabelTable,
    size: u32,
    passes: u32,
    history: Vec<Vec<u32>>,
}

impl Layout {
    /// Offset of item `idx` (marks report the offset they bind).
    pub fn offset(&self, idx: usize) -> u32 {
        self.offsets[idx]
    }

    /// Length of item `idx` (0 for marks).
    pub fn length(&self, idx: usize) -> u32 {
        self.lengths[idx]
    }

    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    pub fn lengths(&self) -> &[u32] {
        &self.lengths
    }

    /// Final offset of `label`.
    pub fn label(&self, label: Label) -> Result<u32, LayoutError> {
        self.labels.value(label)
    }

    /// Label table with every placed label bound.
    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// Total byte size of the stream.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Number of passes taken to converge.
    pub fn passes(&self) -> u32 {
        self.passes
    }

    /// Item lengths after each pass (empty unless `record_history` is set).
    pub fn history(&self) -> &[Vec<u32>] {
        &self.history
    }
}

/// Iterative offset/length resolver.
#[derive(Clone, Debug, Default)]
pub struct LayoutEngine {
    config: LayoutConfig,
}

impl LayoutEngine {
    pub fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Lay out `stream` from the shortest encodings.
    pub fn run<S: Segment>(&self, stream: &Stream<S>) -> Result<Layout, LayoutError> {
        self.relax(stream, vec![0; stream.len()])
    }

    /// Lay out `stream` again, starting from the lengths of `previous`.
    ///
    /// On a stream that `previous` was computed for, nothing changes.
    pub fn rerun<S: Segment>(
        &self,
        stream: &Stream<S>,
        previous: &Layout,
    ) -> Result<Layout, LayoutError> {
        let mut floors = previous.lengths.clone();
        floors.resize(stream.len(), 0);
        self.relax(stream, floors)
    }

    /// Lay out and emit in one step.
    pub fn assemble<S: Segment>(
        &self,
        stream: &Stream<S>,
    ) -> Result<(Layout, Vec<u8>), LayoutError> {
        let layout = self.run(stream)?;
        let bytes = self.emit(stream, &layout)?;
        Ok((layout, bytes))
    }

    /// Emit every segment at its final offset.
    ///
    /// Each segment must produce exactly its layout length.
    pub fn emit<S: Segment>(
        &self,
        stream: &Stream<S>,
        layout: &Layout,
    ) -> Result<Vec<u8>, LayoutError> {
        let mut out = Vec::with_capacity(layout.size as usize);
        let resolve = Resolve::bound(&layout.labels);

        for (idx, segment) in stream.segments() {
            let at = layout.offsets[idx];
            let len = layout.lengths[idx];
            let start = out.len();
            segment
                .emit(at, len, &resolve, &mut out)
                .map_err(|e| e.at(stream.position(idx)))?;

            let actual = (out.len() - start) as u32;
            if actual != len {
                return Err(LayoutError::LengthMismatch {
                    pos: stream.position(idx),
                    expected: len,
                    actual,
                });
            }
        }

        Ok(out)
    }

    fn relax<S: Segment>(
        &self,
        stream: &Stream<S>,
        mut lengths: Vec<u32>,
    ) -> Result<Layout, LayoutError> {
        let table = stream.labels();
        let items = stream.items();
        let label_count = table.len();

        // Segments whose length can change once measured.
        let sensitive: Vec<bool> = items
            .iter()
            .map(|item| match item {
                Item::Mark(_) => false,
                Item::Segment(s) => {
                    let mut has_label = false;
                    s.for_each_label(&mut |_| has_label = true);
                    has_label || s.is_position_dependent()
                }
            })
            .collect();

        let mut offsets = vec![0u32; items.len()];
        let mut dirty = vec![true; items.len()];
        let mut placed: Vec<Option<u32>> = vec![None; label_count];
        let mut previous: Vec<Option<u32>> = vec![None; label_count];
        let mut history = Vec::new();

        for pass in 1..=self.config.max_passes {
            let mut cursor = 0u32;
            let mut grown = 0usize;
            let mut moved = 0usize;

            for (idx, item) in items.iter().enumerate() {
                if offsets[idx] != cursor {
                    offsets[idx] = cursor;
                    dirty[idx] |= sensitive[idx];
                }

                match item {
                    Item::Mark(label) => {
                        let slot = label.index();
                        if slot >= label_count {
                            return Err(LayoutError::UnresolvedReference { label: *label });
                        }
                        if let Some(first) = table.bound(*label).or(placed[slot]) {
                            return Err(LayoutError::DuplicateBinding {
                                label: *label,
                                first,
                                second: cursor,
                            });
                        }
                        placed[slot] = Some(cursor);
                        if previous[slot] != Some(cursor) {
                            moved += 1;
                            for &r in table.referrers(*label) {
                                dirty[r] = true;
                            }
                        }
                    }
                    Item::Segment(segment) => {
                        if dirty[idx] {
                            let floor = lengths[idx];
                            let resolve = Resolve::estimate(table, &placed, &previous, cursor);
                            let len = segment
                                .measure(cursor, floor, &resolve)
                                .map_err(|e| e.at(stream.position(idx)))?;
                            if len < floor {
                                return Err(LayoutError::LengthMismatch {
                                    pos: stream.position(idx),
                                    expected: floor,
                                    actual: len,
                                });
                            }
                            if len > floor {
                                grown += 1;
                                lengths[idx] = len;
                            }
                            dirty[idx] = false;
                        }
                        cursor = cursor.checked_add(lengths[idx]).ok_or_else(|| {
                            LayoutError::overflow("offset", cursor as i64 + lengths[idx] as i64)
                                .at(stream.position(idx))
                        })?;
                    }
                }
            }

            if pass == 1 {
                check_referenced_labels(table, &placed)?;
            }
            if self.config.record_history {
                history.push(lengths.clone());
            }
            log::trace!("layout pass {pass}: size={cursor} grown={grown} moved={moved}");

            std::mem::swap(&mut previous, &mut placed);
            placed.fill(None);

            if pass > 1 && grown == 0 && moved == 0 {
                let mut labels = table.clone();
                for (slot, offset) in previous.iter().enumerate() {
                    if let Some(offset) = offset {
                        labels.bind(table.label_at(slot), *offset)?;
                    }
                }
                log::debug!(
                    "layout converged after {pass} passes: {} items, {cursor} bytes",
                    items.len()
                );
                return Ok(Layout {
                    offsets,
                    lengths,
                    labels,
                    size: cursor,
                    passes: pass,
                    history,
                });
            }
        }

        Err(LayoutError::LayoutDivergence {
            passes: self.config.max_passes,
        })
    }
}

/// A label referenced by some segment must be placed or pre-bound.
fn check_referenced_labels(table: &LabelTable, placed: &[Option<u32>]) -> Result<(), LayoutError> {
    for (slot, offset) in placed.iter().enumerate() {
        let label = table.label_at(slot);
        if offset.is_none() && !table.is_bound(label) && !table.referrers(label).is_empty() {
            return Err(LayoutError::UnresolvedReference { label });
        }
    }
    Ok(())
}
