//! CU reconstruction shared by the decoder and the encoder's commit pass.
//!
//! Both sides call [`Reconstructor::reconstruct`] with the same CU record,
//! the same coding maps and the same reference lists, so their
//! reconstructed pictures agree sample for sample.

use transcode_core::{ChromaFormat, ImageBuffer, Plane};

use crate::cu::{plane_block_dims, CuData, PredMode};
use crate::error::{EvcError, Result};
use crate::inter::{direct_mvs, motion_compensate, mvp_candidates, NUM_MVP};
use crate::intra::{BlockRect, IntraMode, IntraNeighbors};
use crate::map::CodingMaps;
use crate::nal::SliceType;
use crate::picture::{Mv, RefLists, LIST_0, LIST_1};
use crate::transform::{EvcQuantizer, EvcTransform, QuantParams};
use crate::{LOG2_SCU, REFI_INVALID};

/// Per-plane sample blocks of one CU.
pub type PlaneBlocks = Vec<Vec<u16>>;

/// Slice state needed to predict and reconstruct CUs.
#[derive(Debug, Clone, Copy)]
pub struct SliceParams<'a> {
    /// Slice type.
    pub slice_type: SliceType,
    /// POC of the current picture.
    pub poc: i32,
    /// Chroma format.
    pub chroma_format: ChromaFormat,
    /// Sample bit depth.
    pub bit_depth: u8,
    /// Intra prediction may only use intra neighbours.
    pub constrained_intra_pred: bool,
    /// Cb QP offset.
    pub qp_cb_offset: i32,
    /// Cr QP offset.
    pub qp_cr_offset: i32,
    /// Reference lists of the slice.
    pub refs: &'a RefLists,
}

impl SliceParams<'_> {
    /// Component rectangle of a square luma block.
    pub fn plane_rect(&self, plane: usize, x: usize, y: usize, size: usize) -> BlockRect {
        let (shift_x, shift_y) = if plane == 0 {
            (0, 0)
        } else {
            self.chroma_format.shifts()
        };
        BlockRect {
            x: x >> shift_x,
            y: y >> shift_y,
            w: size >> shift_x,
            h: size >> shift_y,
            shift_x,
            shift_y,
        }
    }

    /// Quantization parameters of a CU QP.
    pub fn quant_params(&self, qp: u8) -> QuantParams {
        QuantParams::new(qp as i32, self.qp_cb_offset, self.qp_cr_offset, self.bit_depth)
    }
}

/// Motion vector predictor candidates of a CU for one list.
pub fn cu_mvp_candidates(
    params: &SliceParams<'_>,
    maps: &CodingMaps,
    cu: &CuData,
    lidx: usize,
) -> [Mv; NUM_MVP] {
    mvp_candidates(
        maps,
        params.refs,
        lidx,
        cu.x >> LOG2_SCU,
        cu.y >> LOG2_SCU,
        cu.size() >> LOG2_SCU,
    )
}

/// Fill in the final motion of a CU from its syntax: the selected
/// predictor for skip, scaled collocated motion for direct, predictor plus
/// difference for explicit inter.
pub fn derive_motion(params: &SliceParams<'_>, maps: &CodingMaps, cu: &mut CuData) -> Result<()> {
    match cu.pred_mode {
        PredMode::Intra => {
            cu.refi = [REFI_INVALID; 2];
            cu.mv = [Mv::ZERO; 2];
        }
        PredMode::Direct => {
            let scu = cu.size() >> LOG2_SCU;
            cu.refi = [0, 0];
            cu.mv = direct_mvs(
                maps,
                params.refs,
                params.poc,
                cu.x >> LOG2_SCU,
                cu.y >> LOG2_SCU,
                scu,
                scu,
            )?;
        }
        PredMode::Skip | PredMode::Inter => {
            for lidx in [LIST_0, LIST_1] {
                if cu.refi[lidx] < 0 {
                    cu.mv[lidx] = Mv::ZERO;
                    continue;
                }
                let mvp = cu_mvp_candidates(params, maps, cu, lidx)[cu.mvp_idx[lidx] as usize];
                cu.mv[lidx] = if cu.pred_mode == PredMode::Skip {
                    mvp
                } else {
                    mvp.add(cu.mvd[lidx])
                };
            }
        }
    }
    Ok(())
}

/// Intra prediction of every plane of a CU.
pub fn predict_intra(
    params: &SliceParams<'_>,
    image: &ImageBuffer,
    maps: &CodingMaps,
    x: usize,
    y: usize,
    size: usize,
    mode: IntraMode,
) -> PlaneBlocks {
    (0..image.num_planes())
        .map(|c| {
            let rect = params.plane_rect(c, x, y, size);
            let nb = IntraNeighbors::gather(
                image.plane(c),
                maps,
                rect,
                params.bit_depth,
                params.constrained_intra_pred,
            );
            let mut block = vec![0u16; rect.w * rect.h];
            nb.predict(mode, &mut block, rect.w, rect.h);
            block
        })
        .collect()
}

/// Inter prediction of every plane of a CU.
pub fn predict_inter(
    params: &SliceParams<'_>,
    x: usize,
    y: usize,
    size: usize,
    refi: [i8; 2],
    mv: [Mv; 2],
) -> Result<PlaneBlocks> {
    let mut pred: PlaneBlocks = plane_block_dims(params.chroma_format, size)
        .into_iter()
        .map(|(w, h)| vec![0u16; w * h])
        .collect();
    motion_compensate(params.refs, params.chroma_format, refi, mv, x, y, size, size, &mut pred)?;
    Ok(pred)
}

/// Copy a block into a plane.
pub fn write_block(plane: &mut Plane, rect: &BlockRect, src: &[u16]) {
    for (j, row) in src.chunks_exact(rect.w).take(rect.h).enumerate() {
        plane.row_mut(rect.y + j)[rect.x..rect.x + rect.w].copy_from_slice(row);
    }
}

/// Copy a block out of a plane.
pub fn read_block(plane: &Plane, rect: &BlockRect) -> Vec<u16> {
    let mut out = Vec::with_capacity(rect.w * rect.h);
    for j in 0..rect.h {
        out.extend_from_slice(&plane.row(rect.y + j)[rect.x..rect.x + rect.w]);
    }
    out
}

/// Transform pipeline for one bit depth.
#[derive(Debug, Clone)]
pub struct Reconstructor {
    transform: EvcTransform,
    quantizer: EvcQuantizer,
    bit_depth: u8,
    coefs: Vec<i32>,
    residual: Vec<i16>,
}

impl Reconstructor {
    /// Create a reconstructor.
    pub fn new(bit_depth: u8) -> Self {
        Self {
            transform: EvcTransform::new(bit_depth),
            quantizer: EvcQuantizer::new(bit_depth),
            bit_depth,
            coefs: Vec::new(),
            residual: Vec::new(),
        }
    }

    /// Forward transform.
    pub fn transform(&self) -> &EvcTransform {
        &self.transform
    }

    /// Quantizer.
    pub fn quantizer(&self) -> &EvcQuantizer {
        &self.quantizer
    }

    /// Add the decoded residual of `levels` to `pred` in place, clipping
    /// to the sample range.
    pub fn add_residual(
        &mut self,
        pred: &mut [u16],
        levels: &[i16],
        w: usize,
        h: usize,
        qp_scaled: i32,
    ) {
        let n = w * h;
        let (lw, lh) = (w.trailing_zeros() as usize, h.trailing_zeros() as usize);
        self.coefs.resize(n, 0);
        self.residual.resize(n, 0);
        self.quantizer
            .dequantize(levels, &mut self.coefs, lw, lh, qp_scaled);
        self.transform
            .inverse(&self.coefs, &mut self.residual, lw, lh);
        let max = (1i32 << self.bit_depth) - 1;
        for (p, &r) in pred.iter_mut().zip(&self.residual) {
            *p = (*p as i32 + r as i32).clamp(0, max) as u16;
        }
    }

    /// Reconstruct a parsed CU into `image` and record it in the maps.
    ///
    /// Motion is derived from the CU syntax first, so `cu.mv` holds the
    /// final vectors afterwards.
    pub fn reconstruct(
        &mut self,
        params: &SliceParams<'_>,
        image: &mut ImageBuffer,
        maps: &mut CodingMaps,
        cu: &mut CuData,
    ) -> Result<()> {
        let size = cu.size();
        if cu.x + size > maps.width || cu.y + size > maps.height {
            return Err(EvcError::malformed(format!(
                "CU at ({}, {}) of size {size} crosses the picture edge",
                cu.x, cu.y
            )));
        }

        derive_motion(params, maps, cu)?;
        let mut pred = if cu.pred_mode == PredMode::Intra {
            predict_intra(params, image, maps, cu.x, cu.y, size, cu.ipm)
        } else {
            predict_inter(params, cu.x, cu.y, size, cu.refi, cu.mv)?
        };

        if cu.has_residual() {
            let qp = params.quant_params(cu.qp);
            for (c, block) in pred.iter_mut().enumerate() {
                if cu.cbf(c) {
                    let rect = params.plane_rect(c, cu.x, cu.y, size);
                    self.add_residual(block, &cu.levels[c], rect.w, rect.h, qp.scaled[c]);
                }
            }
        }

        for (c, block) in pred.iter().enumerate() {
            let rect = params.plane_rect(c, cu.x, cu.y, size);
            write_block(image.plane_mut(c), &rect, block);
        }
        maps.store_cu(
            cu.x,
            cu.y,
            size,
            size,
            cu.scu_flags(),
            cu.ipm.index(),
            cu.mv,
            cu.refi,
        );
        Ok(())
    }
}
