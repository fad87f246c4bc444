//! Coding-tree traversal and CTU decoding.
//!
//! A CTU is a quad-tree of CUs. Every node larger than the minimum CU
//! carries a split flag; children are visited in raster order and those
//! entirely outside the picture are skipped. A leaf must lie inside the
//! picture, so nodes crossing the right or bottom edge have to split.

use tracing::trace;

use crate::cabac::{CabacDecoder, CTX_SPLIT_CU_FLAG};
use crate::cu::{parse_cu, CuData, CuSyntaxParams};
use crate::diagnostics::Diagnostics;
use crate::error::{EvcError, Result};
use crate::intra::{mpm_order, neighbor_modes};
use crate::map::CodingMaps;
use crate::recon::{derive_motion, Reconstructor, SliceParams};
use crate::{CTU_LOG2, CTU_SIZE, LOG2_SCU, MIN_CU_LOG2};

use transcode_core::ImageBuffer;

/// Decisions taken at each node of a coding-tree walk.
pub trait TreeVisitor {
    /// Decide whether the node at (x, y) splits. Only asked for nodes
    /// larger than the minimum CU.
    fn split(&mut self, x: usize, y: usize, log2_size: usize) -> Result<bool>;

    /// Handle a leaf CU.
    fn leaf(&mut self, x: usize, y: usize, log2_size: usize) -> Result<()>;
}

/// Walk the coding tree rooted at (x, y) inside a `width`x`height` picture.
pub fn walk_tree<V: TreeVisitor + ?Sized>(
    visitor: &mut V,
    x: usize,
    y: usize,
    log2_size: usize,
    width: usize,
    height: usize,
) -> Result<()> {
    let size = 1usize << log2_size;
    let split = log2_size > MIN_CU_LOG2 && visitor.split(x, y, log2_size)?;

    if !split {
        if x + size > width || y + size > height {
            return Err(EvcError::malformed(format!(
                "{size}x{size} CU at ({x}, {y}) crosses the {width}x{height} picture edge"
            )));
        }
        return visitor.leaf(x, y, log2_size);
    }

    let half = size >> 1;
    for (dx, dy) in [(0, 0), (half, 0), (0, half), (half, half)] {
        let (cx, cy) = (x + dx, y + dy);
        if cx < width && cy < height {
            walk_tree(visitor, cx, cy, log2_size - 1, width, height)?;
        }
    }
    Ok(())
}

/// Check whether a node must split because it crosses the picture edge.
pub fn must_split(x: usize, y: usize, log2_size: usize, width: usize, height: usize) -> bool {
    let size = 1usize << log2_size;
    x + size > width || y + size > height
}

/// Origins of the CTUs of a picture in raster order.
pub fn ctu_origins(width: usize, height: usize) -> impl Iterator<Item = (usize, usize)> {
    let cols = width.div_ceil(CTU_SIZE);
    let rows = height.div_ceil(CTU_SIZE);
    (0..rows).flat_map(move |r| (0..cols).map(move |c| (c * CTU_SIZE, r * CTU_SIZE)))
}

/// Parse pass over one CTU: reads split flags and CU syntax, derives
/// motion and records each leaf in the coding maps.
struct CtuParser<'p, 'd, 'a> {
    dec: &'p mut CabacDecoder<'d>,
    maps: &'p mut CodingMaps,
    syntax: &'p CuSyntaxParams,
    slice: &'p SliceParams<'a>,
    qp_prev: &'p mut u8,
    diagnostics: &'p mut Diagnostics,
    leaves: Vec<CuData>,
}

impl TreeVisitor for CtuParser<'_, '_, '_> {
    fn split(&mut self, _x: usize, _y: usize, _log2_size: usize) -> Result<bool> {
        let split = self.dec.decode_bin(CTX_SPLIT_CU_FLAG)?;
        if split {
            self.diagnostics.splits += 1;
        }
        Ok(split)
    }

    fn leaf(&mut self, x: usize, y: usize, log2_size: usize) -> Result<()> {
        let (left, up) = neighbor_modes(self.maps, x >> LOG2_SCU, y >> LOG2_SCU);
        let mpm = mpm_order(left, up);
        let mut cu = parse_cu(self.dec, x, y, log2_size, self.syntax, &mpm, self.qp_prev)?;
        derive_motion(self.slice, self.maps, &mut cu)?;

        let size = cu.size();
        self.maps.store_cu(
            x,
            y,
            size,
            size,
            cu.scu_flags(),
            cu.ipm.index(),
            cu.mv,
            cu.refi,
        );
        self.diagnostics.record_cu(cu.pred_mode);
        self.leaves.push(cu);
        Ok(())
    }
}

/// Decode one CTU: parse every leaf, clear the CTU's coded flags, then
/// reconstruct the leaves in order.
#[allow(clippy::too_many_arguments)]
pub fn decode_ctu(
    dec: &mut CabacDecoder<'_>,
    recon: &mut Reconstructor,
    image: &mut ImageBuffer,
    maps: &mut CodingMaps,
    syntax: &CuSyntaxParams,
    slice: &SliceParams<'_>,
    qp_prev: &mut u8,
    diagnostics: &mut Diagnostics,
    x0: usize,
    y0: usize,
) -> Result<()> {
    let (width, height) = (maps.width, maps.height);
    let mut parser = CtuParser {
        dec: &mut *dec,
        maps: &mut *maps,
        syntax,
        slice,
        qp_prev: &mut *qp_prev,
        diagnostics: &mut *diagnostics,
        leaves: Vec::new(),
    };
    walk_tree(&mut parser, x0, y0, CTU_LOG2, width, height)?;
    let mut leaves = parser.leaves;
    trace!(x0, y0, leaves = leaves.len(), "parsed CTU");

    maps.clear_coded(x0, y0, CTU_SIZE, CTU_SIZE);
    for cu in &mut leaves {
        recon.reconstruct(slice, image, maps, cu)?;
    }
    Ok(())
}
