//! Coding-order planning for the encoder.
//!
//! Input pictures arrive in display order. The planner decides which of
//! the buffered pictures are coded next, in which order, and with which
//! slice type and temporal id. Hierarchical groups are coded layer by
//! layer, matching the POC derivation of the decoder.

use tracing::debug;

use crate::nal::SliceType;
use crate::poc::is_reference_layer;

/// One picture scheduled for coding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedPicture {
    /// Display index of the input picture.
    pub display: u64,
    /// Slice type.
    pub slice_type: SliceType,
    /// Temporal layer id.
    pub temporal_id: u8,
    /// Code as an IDR picture.
    pub is_idr: bool,
    /// Keep as a reference after coding.
    pub is_ref: bool,
}

/// Display offset of the picture coded `doc_offset`-th after the anchor
/// of a group of `gop_size` pictures, and its temporal id.
///
/// Offset 0 is the anchor itself, at the end of the group.
pub fn coding_position(doc_offset: usize, gop_size: usize) -> (usize, u8) {
    if doc_offset == 0 {
        return (gop_size, 0);
    }
    let tid = 1 + doc_offset.ilog2() as u8;
    let pos = ((gop_size * (2 * doc_offset + 1)) >> tid) - gop_size;
    (pos, tid)
}

/// Picks the coding order of buffered input pictures.
#[derive(Debug, Clone)]
pub struct GopPlanner {
    gop_size: usize,
    i_period: u64,
    closed_gop: bool,
    hierarchical: bool,
    next_display: u64,
}

impl GopPlanner {
    /// Create a planner. `gop_size` is one more than the number of
    /// consecutive B pictures; `i_period` 0 codes only the first picture
    /// as intra.
    pub fn new(gop_size: usize, i_period: u64, closed_gop: bool, hierarchical: bool) -> Self {
        Self {
            gop_size: gop_size.max(1),
            i_period,
            closed_gop,
            hierarchical: hierarchical && gop_size > 1,
            next_display: 0,
        }
    }

    /// Sub-GOP length signalled in the SPS.
    pub fn log2_sub_gop_length(&self) -> u32 {
        if self.hierarchical {
            self.gop_size.ilog2()
        } else {
            0
        }
    }

    /// Display index of the next picture not yet planned.
    pub fn next_display(&self) -> u64 {
        self.next_display
    }

    fn is_intra_position(&self, display: u64) -> bool {
        display == 0 || (self.i_period > 0 && display % self.i_period == 0)
    }

    fn picture(&self, display: u64, slice_type: SliceType, temporal_id: u8) -> PlannedPicture {
        let is_idr = display == 0 || (slice_type == SliceType::I && self.closed_gop);
        PlannedPicture {
            display,
            slice_type,
            temporal_id,
            is_idr,
            is_ref: is_reference_layer(temporal_id, self.log2_sub_gop_length()),
        }
    }

    /// Plan the next batch out of `available` buffered pictures starting at
    /// [`GopPlanner::next_display`]. Returns nothing when more input is
    /// needed; `flushing` allows a partial trailing group.
    pub fn plan(&mut self, available: usize, flushing: bool) -> Vec<PlannedPicture> {
        if available == 0 {
            return Vec::new();
        }

        let base = self.next_display;
        let inter_type = if self.gop_size == 1 {
            SliceType::P
        } else {
            SliceType::B
        };

        let batch = if base == 0 {
            vec![self.picture(0, SliceType::I, 0)]
        } else if !self.hierarchical {
            let slice_type = if self.is_intra_position(base) {
                SliceType::I
            } else {
                inter_type
            };
            vec![self.picture(base, slice_type, 0)]
        } else if available < self.gop_size {
            if !flushing {
                return Vec::new();
            }
            (base..base + available as u64)
                .map(|d| self.picture(d, SliceType::B, 0))
                .collect()
        } else {
            self.plan_group(base)
        };

        self.next_display += batch.len() as u64;
        debug!(
            base,
            pictures = batch.len(),
            first = ?batch.first().map(|p| p.slice_type),
            "planned pictures"
        );
        batch
    }

    fn plan_group(&self, base: u64) -> Vec<PlannedPicture> {
        let g = self.gop_size as u64;
        let anchor = base + g - 1;
        let anchor_type = if self.is_intra_position(anchor) {
            SliceType::I
        } else {
            SliceType::B
        };

        if anchor_type == SliceType::I && self.closed_gop {
            // an IDR cannot be referenced by the pictures before it, so
            // those are coded first at the base layer
            let mut batch: Vec<_> = (base..anchor)
                .map(|d| self.picture(d, SliceType::B, 0))
                .collect();
            batch.push(self.picture(anchor, SliceType::I, 0));
            return batch;
        }

        (0..self.gop_size)
            .map(|doc| {
                let (pos, tid) = coding_position(doc, self.gop_size);
                let slice_type = if doc == 0 { anchor_type } else { SliceType::B };
                self.picture(base - 1 + pos as u64, slice_type, tid)
            })
            .collect()
    }
}
