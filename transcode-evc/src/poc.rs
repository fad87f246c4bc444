//! Picture order count derivation from temporal ids.
//!
//! Without explicit POC signalling the display position of a picture
//! follows from its temporal id and its place in the hierarchical sub-GOP.
//! Encoder and decoder run the same derivation.

use crate::error::{EvcError, Result};

/// POC derivation state carried across pictures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PocState {
    log2_sub_gop_length: u32,
    prev_poc: i32,
    prev_doc_offset: i32,
    poc: i32,
}

impl PocState {
    /// Create a state for the given sub-GOP length.
    pub fn new(log2_sub_gop_length: u32) -> Self {
        Self {
            log2_sub_gop_length,
            prev_poc: 0,
            prev_doc_offset: -1,
            poc: 0,
        }
    }

    /// POC of the last derived picture.
    pub fn poc(&self) -> i32 {
        self.poc
    }

    /// Derive the POC of the next picture in decoding order.
    pub fn next(&mut self, is_idr: bool, temporal_id: u8) -> Result<i32> {
        if is_idr {
            self.prev_poc = 0;
            self.prev_doc_offset = -1;
            self.poc = 0;
            return Ok(0);
        }

        let sub_gop = 1i32 << self.log2_sub_gop_length;
        if temporal_id == 0 {
            self.poc = self.prev_poc + sub_gop;
            self.prev_poc = self.poc;
            self.prev_doc_offset = 0;
            return Ok(self.poc);
        }

        if temporal_id as u32 > self.log2_sub_gop_length {
            return Err(EvcError::malformed(format!(
                "temporal id {temporal_id} exceeds sub-GOP depth {}",
                self.log2_sub_gop_length
            )));
        }

        let mut doc_offset = (self.prev_doc_offset + 1) % sub_gop;
        if doc_offset == 0 {
            self.prev_poc += sub_gop;
        }
        // every layer up to log2_sub_gop_length occurs once per sub-GOP
        for _ in 0..sub_gop {
            if expected_temporal_id(doc_offset) == temporal_id {
                break;
            }
            doc_offset = (doc_offset + 1) % sub_gop;
        }
        if expected_temporal_id(doc_offset) != temporal_id {
            return Err(EvcError::malformed(format!(
                "no position for temporal id {temporal_id} in the sub-GOP"
            )));
        }

        let tid = temporal_id as i32;
        self.poc = self.prev_poc + ((sub_gop * (2 * doc_offset + 1)) >> tid) - 2 * sub_gop;
        self.prev_doc_offset = doc_offset;
        Ok(self.poc)
    }
}

/// Check whether pictures of a temporal layer are kept for reference.
/// Only the deepest layer of a hierarchical sub-GOP is not.
pub fn is_reference_layer(temporal_id: u8, log2_sub_gop_length: u32) -> bool {
    temporal_id == 0 || (temporal_id as u32) < log2_sub_gop_length
}

/// Temporal id of the picture at a decoding-order offset in a sub-GOP.
fn expected_temporal_id(doc_offset: i32) -> u8 {
    if doc_offset == 0 {
        0
    } else {
        1 + (31 - (doc_offset as u32).leading_zeros()) as u8
    }
}
