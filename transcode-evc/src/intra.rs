//! Intra prediction.
//!
//! Five modes predict a block from the reconstructed row above and column
//! to the left. Each neighbour array holds `w + h` samples so the diagonal
//! modes can reach past the block corner.

use transcode_core::Plane;

use crate::map::{CodingMaps, ScuFlags};

/// Number of intra prediction modes.
pub const NUM_INTRA_MODES: usize = 5;

/// Intra prediction mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IntraMode {
    /// Mean of the neighbours.
    #[default]
    Dc = 0,
    /// Copy the left column across.
    Hor = 1,
    /// Copy the upper row down.
    Ver = 2,
    /// Diagonal from the upper-left corner.
    UpLeft = 3,
    /// Diagonal from the upper-right, averaged with the lower-left.
    UpRight = 4,
}

impl IntraMode {
    /// Every mode in index order.
    pub const ALL: [IntraMode; NUM_INTRA_MODES] = [
        IntraMode::Dc,
        IntraMode::Hor,
        IntraMode::Ver,
        IntraMode::UpLeft,
        IntraMode::UpRight,
    ];

    /// Convert from a mode index.
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Mode index.
    pub fn index(self) -> u8 {
        self as u8
    }
}

/// Position and size of a block within one component plane, plus the
/// subsampling shifts that map it back to luma.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRect {
    /// Left column in component samples.
    pub x: usize,
    /// Top row in component samples.
    pub y: usize,
    /// Width in component samples.
    pub w: usize,
    /// Height in component samples.
    pub h: usize,
    /// Horizontal subsampling shift.
    pub shift_x: u32,
    /// Vertical subsampling shift.
    pub shift_y: u32,
}

/// Reference samples around a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntraNeighbors {
    /// Left column, top to bottom, `w + h` samples.
    pub left: Vec<u16>,
    /// Upper row, left to right, `w + h` samples.
    pub up: Vec<u16>,
    /// Upper-left corner sample.
    pub corner: u16,
}

impl IntraNeighbors {
    /// Gather the neighbours of `rect` from reconstructed samples.
    ///
    /// A sample is used only if its 4x4 block is already coded, and with
    /// constrained intra prediction only if that block is intra. Other
    /// samples take the mid-level value.
    pub fn gather(
        plane: &Plane,
        maps: &CodingMaps,
        rect: BlockRect,
        bit_depth: u8,
        constrained_intra: bool,
    ) -> Self {
        let mid = 1u16 << (bit_depth - 1);
        let n = rect.w + rect.h;
        let usable = |x: isize, y: isize| {
            x >= 0
                && (x as usize) < plane.width
                && y >= 0
                && (y as usize) < plane.height
                && maps.is_coded_at(x << rect.shift_x, y << rect.shift_y, constrained_intra)
        };

        let x0 = rect.x as isize;
        let y0 = rect.y as isize;
        let corner = if usable(x0 - 1, y0 - 1) {
            plane.get(rect.x - 1, rect.y - 1)
        } else {
            mid
        };
        let up = (0..n as isize)
            .map(|i| {
                if usable(x0 + i, y0 - 1) {
                    plane.get((x0 + i) as usize, rect.y - 1)
                } else {
                    mid
                }
            })
            .collect();
        let left = (0..n as isize)
            .map(|i| {
                if usable(x0 - 1, y0 + i) {
                    plane.get(rect.x - 1, (y0 + i) as usize)
                } else {
                    mid
                }
            })
            .collect();

        Self { left, up, corner }
    }

    /// Neighbours with every sample at the mid level.
    pub fn flat(w: usize, h: usize, bit_depth: u8) -> Self {
        let mid = 1u16 << (bit_depth - 1);
        Self {
            left: vec![mid; w + h],
            up: vec![mid; w + h],
            corner: mid,
        }
    }

    /// Predict a `w`x`h` block into `dst` (raster order).
    pub fn predict(&self, mode: IntraMode, dst: &mut [u16], w: usize, h: usize) {
        match mode {
            IntraMode::Dc => {
                let sum: u32 = self.left[..h].iter().chain(&self.up[..w]).map(|&s| s as u32).sum();
                let n = (w + h) as u32;
                let dc = ((sum + n / 2) / n) as u16;
                dst[..w * h].fill(dc);
            }
            IntraMode::Hor => {
                for (row, &l) in dst.chunks_exact_mut(w).take(h).zip(&self.left) {
                    row.fill(l);
                }
            }
            IntraMode::Ver => {
                for row in dst.chunks_exact_mut(w).take(h) {
                    row.copy_from_slice(&self.up[..w]);
                }
            }
            IntraMode::UpLeft => {
                for i in 0..h {
                    for j in 0..w {
                        dst[i * w + j] = match i.cmp(&j) {
                            std::cmp::Ordering::Greater => self.left[i - j - 1],
                            std::cmp::Ordering::Equal => self.corner,
                            std::cmp::Ordering::Less => self.up[j - i - 1],
                        };
                    }
                }
            }
            IntraMode::UpRight => {
                for i in 0..h {
                    for j in 0..w {
                        let k = i + j + 1;
                        dst[i * w + j] = ((self.up[k] as u32 + self.left[k] as u32) >> 1) as u16;
                    }
                }
            }
        }
    }
}

/// Modes of the left and upper neighbours of a CU, DC where the neighbour
/// is missing or not intra.
pub fn neighbor_modes(maps: &CodingMaps, x_scu: usize, y_scu: usize) -> (IntraMode, IntraMode) {
    let scup = maps.scup(x_scu, y_scu);
    let mode_of = |p: usize| {
        if maps.flags(p).contains(ScuFlags::CODED | ScuFlags::INTRA) {
            IntraMode::from_index(maps.ipm(p)).unwrap_or_default()
        } else {
            IntraMode::Dc
        }
    };
    let left = if x_scu > 0 { mode_of(scup - 1) } else { IntraMode::Dc };
    let up = if y_scu > 0 {
        mode_of(scup - maps.w_scu)
    } else {
        IntraMode::Dc
    };
    (left, up)
}

/// Most-probable-mode ordering: the left mode, then the upper mode, then
/// the remaining modes in index order.
pub fn mpm_order(left: IntraMode, up: IntraMode) -> [IntraMode; NUM_INTRA_MODES] {
    let mut order = [IntraMode::Dc; NUM_INTRA_MODES];
    let mut n = 0;
    for mode in [left, up].into_iter().chain(IntraMode::ALL) {
        if !order[..n].contains(&mode) {
            order[n] = mode;
            n += 1;
        }
    }
    order
}

/// Rank of `mode` in an MPM ordering.
pub fn mpm_rank(order: &[IntraMode; NUM_INTRA_MODES], mode: IntraMode) -> u32 {
    order.iter().position(|&m| m == mode).unwrap_or(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::picture::Mv;
    use crate::REFI_INVALID;

    fn neighbors() -> IntraNeighbors {
        IntraNeighbors {
            left: vec![10, 20, 30, 40, 50, 60, 70, 80],
            up: vec![1, 2, 3, 4, 5, 6, 7, 8],
            corner: 99,
        }
    }

    #[test]
    fn test_dc_and_straight_modes() {
        let nb = neighbors();
        let mut dst = [0u16; 16];

        nb.predict(IntraMode::Dc, &mut dst, 4, 4);
        // (10+20+30+40 + 1+2+3+4 + 4) / 8
        assert!(dst.iter().all(|&s| s == 14));

        nb.predict(IntraMode::Hor, &mut dst, 4, 4);
        assert_eq!(&dst[4..8], &[20u16, 20, 20, 20]);

        nb.predict(IntraMode::Ver, &mut dst, 4, 4);
        assert_eq!(&dst[12..16], &[1u16, 2, 3, 4]);
    }

    #[test]
    fn test_diagonal_modes() {
        let nb = neighbors();
        let mut dst = [0u16; 16];

        nb.predict(IntraMode::UpLeft, &mut dst, 4, 4);
        assert_eq!(&dst[0..4], &[99u16, 1, 2, 3]);
        assert_eq!(&dst[4..8], &[10u16, 99, 1, 2]);
        assert_eq!(dst[12], 30);

        nb.predict(IntraMode::UpRight, &mut dst, 4, 4);
        assert_eq!(dst[0], (2 + 20) / 2);
        assert_eq!(dst[15], (8 + 80) / 2);
    }

    #[test]
    fn test_gather_unavailable_is_mid_level() {
        let plane = Plane::new(16, 16, 300);
        let maps = CodingMaps::new(16, 16);
        let rect = BlockRect { x: 4, y: 4, w: 4, h: 4, shift_x: 0, shift_y: 0 };
        let nb = IntraNeighbors::gather(&plane, &maps, rect, 10, false);
        assert_eq!(nb, IntraNeighbors::flat(4, 4, 10));
    }

    #[test]
    fn test_gather_respects_coded_and_intra() {
        let plane = Plane::new(16, 16, 300);
        let mut maps = CodingMaps::new(16, 16);
        // inter block above, intra block to the left
        maps.store_cu(0, 0, 16, 4, ScuFlags::empty(), 0, [Mv::ZERO; 2], [0, REFI_INVALID]);
        maps.store_cu(0, 4, 4, 4, ScuFlags::INTRA, 0, [Mv::ZERO; 2], [REFI_INVALID; 2]);
        let rect = BlockRect { x: 4, y: 4, w: 4, h: 4, shift_x: 0, shift_y: 0 };

        let nb = IntraNeighbors::gather(&plane, &maps, rect, 10, false);
        assert_eq!(nb.corner, 300);
        assert_eq!(&nb.up, &[300u16; 8]);
        assert_eq!(&nb.left[..4], &[300u16; 4]);
        assert_eq!(&nb.left[4..], &[512u16; 4]);

        let nb = IntraNeighbors::gather(&plane, &maps, rect, 10, true);
        assert_eq!(nb.corner, 512);
        assert_eq!(&nb.up, &[512u16; 8]);
        assert_eq!(&nb.left[..4], &[300u16; 4]);
    }

    #[test]
    fn test_mpm_order() {
        let order = mpm_order(IntraMode::Ver, IntraMode::Hor);
        assert_eq!(
            order,
            [IntraMode::Ver, IntraMode::Hor, IntraMode::Dc, IntraMode::UpLeft, IntraMode::UpRight]
        );
        let order = mpm_order(IntraMode::UpRight, IntraMode::UpRight);
        assert_eq!(order[0], IntraMode::UpRight);
        assert_eq!(order[1], IntraMode::Dc);
        assert_eq!(mpm_rank(&order, IntraMode::UpLeft), 4);
    }

    #[test]
    fn test_neighbor_modes() {
        let mut maps = CodingMaps::new(16, 16);
        assert_eq!(neighbor_modes(&maps, 1, 1), (IntraMode::Dc, IntraMode::Dc));
        maps.store_cu(0, 4, 4, 4, ScuFlags::INTRA, 2, [Mv::ZERO; 2], [REFI_INVALID; 2]);
        maps.store_cu(4, 0, 4, 4, ScuFlags::empty(), 0, [Mv::ZERO; 2], [0, REFI_INVALID]);
        assert_eq!(neighbor_modes(&maps, 1, 1), (IntraMode::Ver, IntraMode::Dc));
    }
}
