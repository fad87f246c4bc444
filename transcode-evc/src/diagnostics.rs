//! Per-instance coding statistics.

use serde::{Deserialize, Serialize};

use crate::cu::PredMode;

/// Counters kept by one encoder or decoder instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// NAL units written or consumed.
    pub nal_units: u64,
    /// Pictures coded.
    pub pictures: u64,
    /// Arithmetic-coded bins written (encoder only).
    pub bins: u64,
    /// Intra CUs.
    pub intra_cus: u64,
    /// Explicit inter CUs.
    pub inter_cus: u64,
    /// Skip CUs.
    pub skip_cus: u64,
    /// Direct CUs.
    pub direct_cus: u64,
    /// Quad splits.
    pub splits: u64,
    /// Picture signatures that did not match.
    pub signature_mismatches: u64,
}

impl Diagnostics {
    /// Count one leaf CU.
    pub fn record_cu(&mut self, mode: PredMode) {
        match mode {
            PredMode::Intra => self.intra_cus += 1,
            PredMode::Inter => self.inter_cus += 1,
            PredMode::Skip => self.skip_cus += 1,
            PredMode::Direct => self.direct_cus += 1,
        }
    }

    /// Total number of leaf CUs.
    pub fn total_cus(&self) -> u64 {
        self.intra_cus + self.inter_cus + self.skip_cus + self.direct_cus
    }

    /// Reset every counter.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cu_counters() {
        let mut diag = Diagnostics::default();
        diag.record_cu(PredMode::Skip);
        diag.record_cu(PredMode::Skip);
        diag.record_cu(PredMode::Intra);
        assert_eq!(diag.skip_cus, 2);
        assert_eq!(diag.total_cus(), 3);
        diag.reset();
        assert_eq!(diag, Diagnostics::default());
    }
}
