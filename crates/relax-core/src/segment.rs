//! The contract between encodable instructions and the layout engine.

use crate::error::LayoutError;
use crate::label::{Label, LabelTable};

/// An encodable unit of a stream: an instruction or pseudo-instruction.
///
/// Targets implement this for a closed enum of their instruction forms.
pub trait Segment {
    /// Length in bytes of the shortest encoding that is at least `floor` bytes
    /// long and can represent this segment when placed at `at`.
    ///
    /// Fails with `EncodingOverflow` when no encoding can hold the operands.
    fn measure(&self, at: u32, floor: u32, labels: &Resolve<'_>) -> Result<u32, LayoutError>;

    /// Append exactly `len` bytes (a length previously returned by `measure`)
    /// encoding this segment at `at`.
    fn emit(
        &self,
        at: u32,
        len: u32,
        labels: &Resolve<'_>,
        out: &mut Vec<u8>,
    ) -> Result<(), LayoutError>;

    /// Visit every label this segment's encoding depends on.
    fn for_each_label(&self, _f: &mut dyn FnMut(Label)) {}

    /// Whether the encoding depends on the segment's own offset beyond
    /// label-relative displacements (alignment padding).
    fn is_position_dependent(&self) -> bool {
        false
    }
}

/// Label offsets as seen by a segment.
///
/// While layout is in progress offsets are estimates; during emission they are
/// the final bindings.
pub struct Resolve<'a> {
    mode: Mode<'a>,
}

enum Mode<'a> {
    Estimate {
        table: &'a LabelTable,
        placed: &'a [Option<u32>],
        previous: &'a [Option<u32>],
        cursor: u32,
    },
    Final(&'a LabelTable),
}

impl<'a> Resolve<'a> {
    pub(crate) fn estimate(
        table: &'a LabelTable,
        placed: &'a [Option<u32>],
        previous: &'a [Option<u32>],
        cursor: u32,
    ) -> Self {
        Self {
            mode: Mode::Estimate {
                table,
                placed,
                previous,
                cursor,
            },
        }
    }

    /// Resolution against final bindings.
    pub fn bound(table: &'a LabelTable) -> Self {
        Self {
            mode: Mode::Final(table),
        }
    }

    /// Offset of `label`.
    ///
    /// During layout a label not yet reached in this pass is estimated no
    /// closer than where it was last pass and no earlier than the cursor, so
    /// displacements are never overestimated.
    pub fn offset(&self, label: Label) -> Result<u32, LayoutError> {
        match self.mode {
            Mode::Final(table) => table.value(label),
            Mode::Estimate {
                table,
                placed,
                previous,
                cursor,
            } => {
                if !table.contains(label) {
                    return Err(LayoutError::UnresolvedReference { label });
                }
                if let Some(offset) = table.bound(label) {
                    return Ok(offset);
                }
                let idx = label.index();
                if let Some(offset) = placed[idx] {
                    return Ok(offset);
                }
                Ok(previous[idx].map_or(cursor, |prev| prev.max(cursor)))
            }
        }
    }
}
