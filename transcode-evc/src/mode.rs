//! Rate-distortion mode decision and the encoder side of CTU coding.
//!
//! Coding a CTU takes two passes. [`ModeDecision::decide_ctu`] searches
//! the coding tree and returns the winning leaf CUs, writing each decided
//! node into the working picture so later nodes predict from it.
//! [`encode_ctu`] then entropy-codes those leaves and reconstructs them
//! through [`Reconstructor::reconstruct`], exactly as the decoder does.

use std::iter::Peekable;
use std::vec::IntoIter;

use tracing::trace;
use transcode_core::ImageBuffer;

use crate::cabac::{CabacEncoder, CTX_SPLIT_CU_FLAG};
use crate::cu::{write_cu, CuData, CuSyntaxParams, InterDir, PredMode};
use crate::diagnostics::Diagnostics;
use crate::error::{EvcError, Result};
use crate::inter::{direct_mvs, NUM_MVP};
use crate::intra::{mpm_order, neighbor_modes, IntraMode, NUM_INTRA_MODES};
use crate::map::CodingMaps;
use crate::me::{ssd, MotionSearch, SearchResult};
use crate::picture::{Mv, LIST_0, LIST_1};
use crate::recon::{
    cu_mvp_candidates, predict_inter, predict_intra, read_block, write_block, PlaneBlocks,
    Reconstructor, SliceParams,
};
use crate::transform::{lambda, QuantParams};
use crate::tree::{must_split, walk_tree, TreeVisitor};
use crate::{CTU_LOG2, CTU_SIZE, LOG2_SCU, MAX_NUM_ACTIVE_REF_FRAME, MIN_CU_LOG2, REFI_INVALID};

/// Twice the tree depth from which a skip leaf stops the split search, for
/// odd and even POCs.
const SKIP_STOP_DEPTH: [usize; 2] = [8, 6];

/// Intra slices stop the split search when the leaf distortion is below
/// this many lambdas.
const INTRA_STOP_LAMBDAS: f64 = 6.0;

/// Per-slice inputs of the mode decision.
#[derive(Debug, Clone, Copy)]
pub struct RdParams<'a> {
    /// Prediction and reconstruction state of the slice.
    pub slice: SliceParams<'a>,
    /// CU syntax parameters of the slice.
    pub syntax: CuSyntaxParams,
    /// QP of every CU.
    pub qp: u8,
    /// Integer motion search range in luma samples.
    pub search_range: u32,
}

/// A fully evaluated CU candidate.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// CU record, levels included.
    pub cu: CuData,
    /// Reconstructed blocks per plane.
    pub recon: PlaneBlocks,
    /// Weighted squared error.
    pub dist: f64,
    /// Distortion plus lambda-weighted bits.
    pub cost: f64,
}

struct NodeDecision {
    cost: f64,
    leaves: Vec<CuData>,
}

fn keep_best(best: &mut Option<Candidate>, cand: Candidate) {
    if best.as_ref().map_or(true, |b| cand.cost < b.cost) {
        *best = Some(cand);
    }
}

/// Coding-tree search over one picture.
pub struct ModeDecision<'a, 'b> {
    params: RdParams<'a>,
    org: &'b ImageBuffer,
    image: &'b mut ImageBuffer,
    maps: &'b mut CodingMaps,
    recon: &'b mut Reconstructor,
    base: CabacEncoder,
    lambda: f64,
    quant: QuantParams,
    chroma_weight: [f64; 3],
    search: MotionSearch,
}

impl<'a, 'b> ModeDecision<'a, 'b> {
    /// Create a search that reads source samples from `org` and writes
    /// decided blocks into `image` and `maps`.
    pub fn new(
        params: RdParams<'a>,
        org: &'b ImageBuffer,
        image: &'b mut ImageBuffer,
        maps: &'b mut CodingMaps,
        recon: &'b mut Reconstructor,
    ) -> Self {
        let lambda = lambda(params.qp as i32);
        let quant = params.slice.quant_params(params.qp);
        let weight = |c: usize| 2f64.powf((quant.scaled[0] - quant.scaled[c]) as f64 / 3.0);
        Self {
            params,
            org,
            image,
            maps,
            recon,
            base: CabacEncoder::counter(),
            lambda,
            quant,
            chroma_weight: [1.0, weight(1), weight(2)],
            search: MotionSearch::new(params.search_range, lambda),
        }
    }

    /// Lambda of the slice.
    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Decide the coding tree of the CTU at (x0, y0). Bits are estimated
    /// from the current state of `enc`.
    pub fn decide_ctu(&mut self, enc: &CabacEncoder, x0: usize, y0: usize) -> Result<Vec<CuData>> {
        self.base = enc.fork_counter();
        let node = self.decide_node(x0, y0, CTU_LOG2, 0)?;
        trace!(x0, y0, leaves = node.leaves.len(), cost = node.cost, "decided CTU");
        Ok(node.leaves)
    }

    fn decide_node(
        &mut self,
        x: usize,
        y: usize,
        log2_size: usize,
        depth: usize,
    ) -> Result<NodeDecision> {
        let (width, height) = (self.maps.width, self.maps.height);
        let can_split = log2_size > MIN_CU_LOG2;

        let mut leaf = None;
        if !must_split(x, y, log2_size, width, height) {
            let mut cand = self.decide_cu(x, y, log2_size)?;
            if can_split {
                cand.cost += self.split_flag_cost(false);
            }
            leaf = Some(cand);
        }

        let try_split = can_split && leaf.as_ref().map_or(true, |c| !self.stop_splitting(c, depth));
        if !try_split {
            let cand = leaf.ok_or_else(|| {
                EvcError::unexpected(format!("no legal partition at ({x}, {y})"))
            })?;
            self.store(&cand);
            return Ok(NodeDecision {
                cost: cand.cost,
                leaves: vec![cand.cu],
            });
        }

        let mut split_cost = self.split_flag_cost(true);
        let mut leaves = Vec::new();
        let half = 1usize << (log2_size - 1);
        for (dx, dy) in [(0, 0), (half, 0), (0, half), (half, half)] {
            let (cx, cy) = (x + dx, y + dy);
            if cx < width && cy < height {
                let child = self.decide_node(cx, cy, log2_size - 1, depth + 1)?;
                split_cost += child.cost;
                leaves.extend(child.leaves);
            }
        }

        match leaf {
            Some(cand) if cand.cost <= split_cost => {
                // the children overwrote the region
                self.store(&cand);
                Ok(NodeDecision {
                    cost: cand.cost,
                    leaves: vec![cand.cu],
                })
            }
            _ => Ok(NodeDecision {
                cost: split_cost,
                leaves,
            }),
        }
    }

    fn stop_splitting(&self, cand: &Candidate, depth: usize) -> bool {
        if cand.cu.pred_mode == PredMode::Skip {
            let odd = (self.params.slice.poc & 1) as usize;
            if 2 * depth >= SKIP_STOP_DEPTH[odd] {
                return true;
            }
        }
        self.params.slice.slice_type.is_intra() && cand.dist < INTRA_STOP_LAMBDAS * self.lambda
    }

    fn split_flag_cost(&self, split: bool) -> f64 {
        let mut counter = self.base.clone();
        let before = counter.bits();
        counter.encode_bin(CTX_SPLIT_CU_FLAG, split);
        self.lambda * counter.bits().saturating_sub(before) as f64
    }

    /// Pick the best prediction mode for the CU at (x, y).
    pub fn decide_cu(&mut self, x: usize, y: usize, log2_size: usize) -> Result<Candidate> {
        let size = 1usize << log2_size;
        let (left, up) = neighbor_modes(self.maps, x >> LOG2_SCU, y >> LOG2_SCU);
        let mpm = mpm_order(left, up);
        let org: PlaneBlocks = (0..self.org.num_planes())
            .map(|c| read_block(self.org.plane(c), &self.params.slice.plane_rect(c, x, y, size)))
            .collect();

        let mut best = None;
        let slice_type = self.params.slice.slice_type;
        if !slice_type.is_intra() {
            self.try_skip(x, y, log2_size, &org, &mpm, &mut best)?;
            if slice_type.is_b() {
                self.try_direct(x, y, log2_size, &org, &mpm, &mut best)?;
            }
            self.try_explicit(x, y, log2_size, &org, &mpm, &mut best)?;
        }

        for mode in IntraMode::ALL {
            let pred = predict_intra(&self.params.slice, self.image, self.maps, x, y, size, mode);
            let mut cu = CuData::new(x, y, log2_size, self.params.qp);
            cu.ipm = mode;
            let cand = self.evaluate(cu, pred, &org, &mpm);
            keep_best(&mut best, cand);
        }

        let best = best.ok_or_else(|| EvcError::unexpected("no CU candidate"))?;
        trace!(x, y, size, mode = %best.cu.pred_mode, cost = best.cost, "CU decision");
        Ok(best)
    }

    #[allow(clippy::too_many_arguments)]
    fn try_skip(
        &mut self,
        x: usize,
        y: usize,
        log2_size: usize,
        org: &PlaneBlocks,
        mpm: &[IntraMode; NUM_INTRA_MODES],
        best: &mut Option<Candidate>,
    ) -> Result<()> {
        let slice = self.params.slice;
        let is_b = slice.slice_type.is_b();
        if slice.refs.len(LIST_0) == 0 || (is_b && slice.refs.len(LIST_1) == 0) {
            return Ok(());
        }

        let mut proto = CuData::new(x, y, log2_size, self.params.qp);
        proto.pred_mode = PredMode::Skip;
        proto.refi = [0, if is_b { 0 } else { REFI_INVALID }];
        let mvp0 = cu_mvp_candidates(&slice, self.maps, &proto, LIST_0);
        let mvp1 = if is_b {
            cu_mvp_candidates(&slice, self.maps, &proto, LIST_1)
        } else {
            [Mv::ZERO; NUM_MVP]
        };

        let mut tried: Vec<[Mv; 2]> = Vec::new();
        let num_l1 = if is_b { NUM_MVP } else { 1 };
        for i0 in 0..NUM_MVP {
            for i1 in 0..num_l1 {
                let mv = [mvp0[i0], mvp1[i1]];
                if tried.contains(&mv) {
                    continue;
                }
                tried.push(mv);

                let mut cu = proto.clone();
                cu.mvp_idx = [i0 as u8, i1 as u8];
                cu.mv = mv;
                let pred = predict_inter(&slice, x, y, cu.size(), cu.refi, cu.mv)?;
                let cand = self.evaluate(cu, pred, org, mpm);
                keep_best(best, cand);
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn try_direct(
        &mut self,
        x: usize,
        y: usize,
        log2_size: usize,
        org: &PlaneBlocks,
        mpm: &[IntraMode; NUM_INTRA_MODES],
        best: &mut Option<Candidate>,
    ) -> Result<()> {
        let slice = self.params.slice;
        let scu = (1usize << log2_size) >> LOG2_SCU;
        let mut cu = CuData::new(x, y, log2_size, self.params.qp);
        cu.pred_mode = PredMode::Direct;
        cu.refi = [0, 0];
        let (x_scu, y_scu) = (x >> LOG2_SCU, y >> LOG2_SCU);
        cu.mv = direct_mvs(self.maps, slice.refs, slice.poc, x_scu, y_scu, scu, scu)?;
        let pred = predict_inter(&slice, x, y, cu.size(), cu.refi, cu.mv)?;
        let cand = self.evaluate(cu, pred, org, mpm);
        keep_best(best, cand);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn try_explicit(
        &mut self,
        x: usize,
        y: usize,
        log2_size: usize,
        org: &PlaneBlocks,
        mpm: &[IntraMode; NUM_INTRA_MODES],
        best: &mut Option<Candidate>,
    ) -> Result<()> {
        let slice = self.params.slice;
        let refs = slice.refs;
        let size = 1usize << log2_size;
        let lists: &[usize] = if slice.slice_type.is_b() {
            &[LIST_0, LIST_1]
        } else {
            &[LIST_0]
        };

        let mut proto = CuData::new(x, y, log2_size, self.params.qp);
        proto.pred_mode = PredMode::Inter;
        let mut best_uni: [Option<(i8, SearchResult, [Mv; NUM_MVP])>; 2] = [None, None];

        for &lidx in lists {
            let cands = cu_mvp_candidates(&slice, self.maps, &proto, lidx);
            let num_refs = refs.len(lidx).min(MAX_NUM_ACTIVE_REF_FRAME);
            for refi in 0..num_refs as i8 {
                let Some(reference) = refs.get(lidx, refi) else {
                    continue;
                };
                let found = self.search.search(&org[0], reference.image.plane(0), x, y, size, &cands);

                let mut cu = proto.clone();
                cu.inter_dir = if lidx == LIST_0 { InterDir::L0 } else { InterDir::L1 };
                cu.refi[lidx] = refi;
                cu.mvp_idx[lidx] = found.mvp_idx;
                cu.mv[lidx] = found.mv;
                cu.mvd[lidx] = found.mv.sub(cands[found.mvp_idx as usize]);
                let pred = predict_inter(&slice, x, y, size, cu.refi, cu.mv)?;
                let cand = self.evaluate(cu, pred, org, mpm);
                keep_best(best, cand);

                if best_uni[lidx].as_ref().map_or(true, |(_, r, _)| found.cost < r.cost) {
                    best_uni[lidx] = Some((refi, found, cands));
                }
            }
        }

        if let [Some(l0), Some(l1)] = &best_uni {
            let mut cu = proto;
            cu.inter_dir = InterDir::Bi;
            for (lidx, (refi, found, cands)) in [(LIST_0, l0), (LIST_1, l1)] {
                cu.refi[lidx] = *refi;
                cu.mvp_idx[lidx] = found.mvp_idx;
                cu.mv[lidx] = found.mv;
                cu.mvd[lidx] = found.mv.sub(cands[found.mvp_idx as usize]);
            }
            let pred = predict_inter(&slice, x, y, size, cu.refi, cu.mv)?;
            let cand = self.evaluate(cu, pred, org, mpm);
            keep_best(best, cand);
        }
        Ok(())
    }

    /// Code the residual of a candidate, reconstruct it and measure its cost.
    fn evaluate(
        &mut self,
        mut cu: CuData,
        mut pred: PlaneBlocks,
        org: &PlaneBlocks,
        mpm: &[IntraMode; NUM_INTRA_MODES],
    ) -> Candidate {
        let size = cu.size();
        if cu.pred_mode != PredMode::Skip {
            let is_intra = cu.pred_mode == PredMode::Intra;
            cu.levels = Vec::with_capacity(pred.len());
            for (c, block) in pred.iter_mut().enumerate() {
                let rect = self.params.slice.plane_rect(c, cu.x, cu.y, size);
                let levels =
                    self.code_residual(block, &org[c], rect.w, rect.h, self.quant.scaled[c], is_intra);
                cu.levels.push(levels);
            }
        }

        let dist: f64 = pred
            .iter()
            .zip(org)
            .enumerate()
            .map(|(c, (p, o))| self.chroma_weight[c] * ssd(o, p) as f64)
            .sum();

        let mut counter = self.base.clone();
        let before = counter.bits();
        let mut qp_prev = self.params.qp;
        write_cu(&mut counter, &cu, &self.params.syntax, mpm, &mut qp_prev);
        let bits = counter.bits().saturating_sub(before) as f64;

        Candidate {
            cu,
            recon: pred,
            dist,
            cost: dist + self.lambda * bits,
        }
    }

    /// Transform and quantize `org - pred`, then add the decoded residual
    /// back onto `pred`. Returns the levels.
    fn code_residual(
        &mut self,
        pred: &mut [u16],
        org: &[u16],
        w: usize,
        h: usize,
        qp_scaled: i32,
        is_intra: bool,
    ) -> Vec<i16> {
        let n = w * h;
        let (log2_w, log2_h) = (w.trailing_zeros() as usize, h.trailing_zeros() as usize);
        let residual: Vec<i16> = org
            .iter()
            .zip(pred.iter())
            .map(|(&o, &p)| (o as i32 - p as i32) as i16)
            .collect();
        let mut coefs = vec![0i32; n];
        self.recon
            .transform()
            .forward(&residual, &mut coefs, log2_w, log2_h);

        let mut levels = vec![0i16; n];
        let nnz = self
            .recon
            .quantizer()
            .quantize(&coefs, &mut levels, log2_w, log2_h, qp_scaled, is_intra);
        if nnz > 0 {
            self.recon.add_residual(pred, &levels, w, h, qp_scaled);
        }
        levels
    }

    /// Write a decided candidate into the working picture and maps.
    fn store(&mut self, cand: &Candidate) {
        let cu = &cand.cu;
        let size = cu.size();
        for (c, block) in cand.recon.iter().enumerate() {
            let rect = self.params.slice.plane_rect(c, cu.x, cu.y, size);
            write_block(self.image.plane_mut(c), &rect, block);
        }
        self.maps.store_cu(
            cu.x,
            cu.y,
            size,
            size,
            cu.scu_flags(),
            cu.ipm.index(),
            cu.mv,
            cu.refi,
        );
    }
}

/// Commit pass over one CTU: writes split flags and CU syntax for the
/// decided leaves and reconstructs each of them.
struct CtuWriter<'p, 'a> {
    enc: &'p mut CabacEncoder,
    recon: &'p mut Reconstructor,
    image: &'p mut ImageBuffer,
    maps: &'p mut CodingMaps,
    params: &'p RdParams<'a>,
    qp_prev: &'p mut u8,
    diagnostics: &'p mut Diagnostics,
    leaves: Peekable<IntoIter<CuData>>,
}

impl TreeVisitor for CtuWriter<'_, '_> {
    fn split(&mut self, x: usize, y: usize, log2_size: usize) -> Result<bool> {
        let next = self
            .leaves
            .peek()
            .ok_or_else(|| EvcError::unexpected(format!("no leaf left at ({x}, {y})")))?;
        if next.x != x || next.y != y {
            return Err(EvcError::unexpected(format!(
                "leaf at ({}, {}) does not start node ({x}, {y})",
                next.x, next.y
            )));
        }
        let split = next.log2_size < log2_size;
        self.enc.encode_bin(CTX_SPLIT_CU_FLAG, split);
        if split {
            self.diagnostics.splits += 1;
        }
        Ok(split)
    }

    fn leaf(&mut self, x: usize, y: usize, log2_size: usize) -> Result<()> {
        let mut cu = self
            .leaves
            .next()
            .ok_or_else(|| EvcError::unexpected(format!("no leaf left at ({x}, {y})")))?;
        if (cu.x, cu.y, cu.log2_size) != (x, y, log2_size) {
            return Err(EvcError::unexpected(format!(
                "leaf ({}, {}, {}) does not match node ({x}, {y}, {log2_size})",
                cu.x, cu.y, cu.log2_size
            )));
        }

        let slice = &self.params.slice;
        if cu.pred_mode == PredMode::Inter {
            // predictors depend on the committed neighbours
            for lidx in [LIST_0, LIST_1] {
                if cu.inter_dir.uses(lidx) {
                    let cands = cu_mvp_candidates(slice, self.maps, &cu, lidx);
                    cu.mvd[lidx] = cu.mv[lidx].sub(cands[cu.mvp_idx[lidx] as usize]);
                }
            }
        }

        let (left, up) = neighbor_modes(self.maps, x >> LOG2_SCU, y >> LOG2_SCU);
        let mpm = mpm_order(left, up);
        write_cu(self.enc, &cu, &self.params.syntax, &mpm, self.qp_prev);
        self.recon.reconstruct(slice, self.image, self.maps, &mut cu)?;
        self.diagnostics.record_cu(cu.pred_mode);
        Ok(())
    }
}

/// Entropy-code and reconstruct the decided leaves of the CTU at (x0, y0).
#[allow(clippy::too_many_arguments)]
pub fn encode_ctu(
    enc: &mut CabacEncoder,
    recon: &mut Reconstructor,
    image: &mut ImageBuffer,
    maps: &mut CodingMaps,
    params: &RdParams<'_>,
    qp_prev: &mut u8,
    diagnostics: &mut Diagnostics,
    leaves: Vec<CuData>,
    x0: usize,
    y0: usize,
) -> Result<()> {
    let (width, height) = (maps.width, maps.height);
    maps.clear_coded(x0, y0, CTU_SIZE, CTU_SIZE);

    let mut writer = CtuWriter {
        enc: &mut *enc,
        recon: &mut *recon,
        image: &mut *image,
        maps: &mut *maps,
        params,
        qp_prev: &mut *qp_prev,
        diagnostics: &mut *diagnostics,
        leaves: leaves.into_iter().peekable(),
    };
    walk_tree(&mut writer, x0, y0, CTU_LOG2, width, height)?;
    if writer.leaves.next().is_some() {
        return Err(EvcError::unexpected(format!(
            "leaves left over after CTU ({x0}, {y0})"
        )));
    }
    Ok(())
}
