//! Picture-wide coding maps on the 4x4 block grid.
//!
//! The maps record, for every 4x4 block of the current picture, whether it
//! has been coded yet, its prediction type, its intra mode and its motion.
//! Neighbour availability for prediction and syntax derivation is read from
//! here.

use bitflags::bitflags;

use crate::picture::{MotionField, Mv};
use crate::LOG2_SCU;

bitflags! {
    /// Coding state of one 4x4 block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ScuFlags: u8 {
        /// Block belongs to an already coded CU.
        const CODED = 1 << 0;
        /// Block was intra predicted.
        const INTRA = 1 << 1;
        /// Block was coded in skip mode.
        const SKIP = 1 << 2;
    }
}

bitflags! {
    /// Neighbouring CU positions available to the current CU.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Avail: u8 {
        /// Left neighbour.
        const LEFT = 1 << 0;
        /// Upper neighbour.
        const UP = 1 << 1;
        /// Upper-left neighbour.
        const UP_LEFT = 1 << 2;
        /// Upper-right neighbour.
        const UP_RIGHT = 1 << 3;
    }
}

/// Per-4x4 coding state of the picture being coded.
#[derive(Debug, Clone)]
pub struct CodingMaps {
    /// Luma width.
    pub width: usize,
    /// Luma height.
    pub height: usize,
    /// Width in 4x4 units.
    pub w_scu: usize,
    /// Height in 4x4 units.
    pub h_scu: usize,
    flags: Vec<ScuFlags>,
    ipm: Vec<u8>,
    motion: MotionField,
}

impl CodingMaps {
    /// Create maps for a picture of the given luma size.
    pub fn new(width: usize, height: usize) -> Self {
        let motion = MotionField::new(width, height);
        let n = motion.w_scu * motion.h_scu;
        Self {
            width,
            height,
            w_scu: motion.w_scu,
            h_scu: motion.h_scu,
            flags: vec![ScuFlags::empty(); n],
            ipm: vec![0; n],
            motion,
        }
    }

    /// Forget everything coded so far.
    pub fn reset(&mut self) {
        self.flags.fill(ScuFlags::empty());
        self.ipm.fill(0);
        self.motion.clear();
    }

    /// Raster index of a 4x4 block.
    #[inline]
    pub fn scup(&self, x_scu: usize, y_scu: usize) -> usize {
        y_scu * self.w_scu + x_scu
    }

    /// Flags of a 4x4 block.
    #[inline]
    pub fn flags(&self, scup: usize) -> ScuFlags {
        self.flags[scup]
    }

    /// Intra mode of a 4x4 block.
    #[inline]
    pub fn ipm(&self, scup: usize) -> u8 {
        self.ipm[scup]
    }

    /// Motion of the picture so far.
    pub fn motion(&self) -> &MotionField {
        &self.motion
    }

    /// Check whether the luma sample at (x, y) lies in a coded block,
    /// optionally requiring that block to be intra.
    pub fn is_coded_at(&self, x: isize, y: isize, intra_only: bool) -> bool {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return false;
        }
        let scup = self.scup(x as usize >> LOG2_SCU, y as usize >> LOG2_SCU);
        let flags = self.flags[scup];
        flags.contains(ScuFlags::CODED) && (!intra_only || flags.contains(ScuFlags::INTRA))
    }

    /// Record a coded CU covering `w`x`h` luma samples at (x, y).
    #[allow(clippy::too_many_arguments)]
    pub fn store_cu(
        &mut self,
        x: usize,
        y: usize,
        w: usize,
        h: usize,
        flags: ScuFlags,
        ipm: u8,
        mv: [Mv; 2],
        refi: [i8; 2],
    ) {
        let flags = flags | ScuFlags::CODED;
        for y_scu in (y >> LOG2_SCU)..((y + h) >> LOG2_SCU).min(self.h_scu) {
            for x_scu in (x >> LOG2_SCU)..((x + w) >> LOG2_SCU).min(self.w_scu) {
                let scup = self.scup(x_scu, y_scu);
                self.flags[scup] = flags;
                self.ipm[scup] = ipm;
                self.motion.set(scup, mv, refi);
            }
        }
    }

    /// Clear the coded flag over a luma region, keeping the rest of the state.
    pub fn clear_coded(&mut self, x: usize, y: usize, w: usize, h: usize) {
        for y_scu in (y >> LOG2_SCU)..((y + h) >> LOG2_SCU).min(self.h_scu) {
            for x_scu in (x >> LOG2_SCU)..((x + w) >> LOG2_SCU).min(self.w_scu) {
                let scup = self.scup(x_scu, y_scu);
                self.flags[scup].remove(ScuFlags::CODED);
            }
        }
    }

    /// Neighbour availability for intra coding of a CU `scuw` blocks wide.
    pub fn avail_intra(&self, x_scu: usize, y_scu: usize, scuw: usize) -> Avail {
        let scup = self.scup(x_scu, y_scu);
        let coded = |p: usize| self.flags[p].contains(ScuFlags::CODED);
        let mut avail = Avail::empty();

        if x_scu > 0 && coded(scup - 1) {
            avail |= Avail::LEFT;
        }
        if y_scu > 0 {
            avail |= Avail::UP;
            if x_scu > 0 && coded(scup - self.w_scu - 1) {
                avail |= Avail::UP_LEFT;
            }
            if x_scu + scuw < self.w_scu && coded(scup - self.w_scu + scuw) {
                avail |= Avail::UP_RIGHT;
            }
        }
        avail
    }

    /// Neighbour availability for inter coding: intra neighbours carry no
    /// motion and do not count.
    pub fn avail_inter(&self, x_scu: usize, y_scu: usize, scuw: usize) -> Avail {
        let scup = self.scup(x_scu, y_scu);
        let inter_coded = |p: usize| {
            let f = self.flags[p];
            f.contains(ScuFlags::CODED) && !f.contains(ScuFlags::INTRA)
        };
        let mut avail = Avail::empty();

        if x_scu > 0 && inter_coded(scup - 1) {
            avail |= Avail::LEFT;
        }
        if y_scu > 0 {
            if !self.flags[scup - self.w_scu].contains(ScuFlags::INTRA) {
                avail |= Avail::UP;
            }
            if x_scu > 0 && inter_coded(scup - self.w_scu - 1) {
                avail |= Avail::UP_LEFT;
            }
            if x_scu + scuw < self.w_scu && inter_coded(scup - self.w_scu + scuw) {
                avail |= Avail::UP_RIGHT;
            }
        }
        avail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::REFI_INVALID;

    const NO_MOTION: [Mv; 2] = [Mv::ZERO; 2];
    const NO_REFI: [i8; 2] = [REFI_INVALID; 2];

    #[test]
    fn test_store_and_clear() {
        let mut maps = CodingMaps::new(16, 12);
        assert_eq!((maps.w_scu, maps.h_scu), (4, 3));
        maps.store_cu(8, 4, 8, 8, ScuFlags::INTRA, 2, NO_MOTION, NO_REFI);

        let scup = maps.scup(3, 2);
        assert!(maps.flags(scup).contains(ScuFlags::CODED | ScuFlags::INTRA));
        assert_eq!(maps.ipm(scup), 2);
        assert!(maps.is_coded_at(15, 11, true));
        assert!(!maps.is_coded_at(7, 11, false));
        assert!(!maps.is_coded_at(16, 4, false));

        maps.clear_coded(0, 0, 16, 12);
        assert!(!maps.is_coded_at(15, 11, false));
        assert_eq!(maps.ipm(scup), 2);
    }

    #[test]
    fn test_intra_availability() {
        let mut maps = CodingMaps::new(32, 32);
        assert_eq!(maps.avail_intra(0, 0, 2), Avail::empty());

        // everything above row 2 and left of column 2 coded
        maps.store_cu(0, 0, 32, 8, ScuFlags::empty(), 0, NO_MOTION, NO_REFI);
        maps.store_cu(0, 8, 8, 8, ScuFlags::empty(), 0, NO_MOTION, NO_REFI);
        let avail = maps.avail_intra(2, 2, 2);
        assert_eq!(avail, Avail::all());

        // up-right outside the picture
        let avail = maps.avail_intra(6, 2, 2);
        assert!(!avail.contains(Avail::UP_RIGHT));
        assert!(avail.contains(Avail::UP));
    }

    #[test]
    fn test_inter_availability_skips_intra() {
        let mut maps = CodingMaps::new(32, 32);
        maps.store_cu(0, 0, 32, 8, ScuFlags::INTRA, 0, NO_MOTION, NO_REFI);
        maps.store_cu(0, 8, 8, 8, ScuFlags::empty(), 0, NO_MOTION, [0, REFI_INVALID]);

        let avail = maps.avail_inter(2, 2, 2);
        assert_eq!(avail, Avail::LEFT);
        assert_eq!(maps.avail_intra(2, 2, 2), Avail::all());
    }
}
