//! Coding unit records and their entropy-coded syntax.
//!
//! A [`CuData`] holds everything the bitstream carries for one leaf of the
//! coding tree plus the motion derived from it. Writing and parsing are
//! exact mirrors; motion derivation and reconstruction live in
//! [`crate::recon`].

use std::fmt;

use transcode_core::ChromaFormat;

use crate::cabac::{
    CabacDecoder, CabacEncoder, CTX_CBF_ALL, CTX_CBF_CB, CTX_CBF_CR, CTX_CBF_LUMA, CTX_DELTA_QP,
    CTX_DIRECT_MODE, CTX_INTER_DIR, CTX_INTRA_DIR, CTX_MVD, CTX_MVP_IDX, CTX_PRED_MODE, CTX_REFI,
    CTX_SKIP_FLAG,
};
use crate::error::{EvcError, Result};
use crate::inter::NUM_MVP;
use crate::intra::{mpm_rank, IntraMode, NUM_INTRA_MODES};
use crate::map::ScuFlags;
use crate::nal::SliceType;
use crate::picture::{Mv, LIST_0, LIST_1};
use crate::residual::{decode_coefficients, encode_coefficients};
use crate::{MAX_QP, REFI_INVALID};

/// Prediction mode of a CU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PredMode {
    /// Intra prediction.
    #[default]
    Intra,
    /// Inter prediction with explicit motion.
    Inter,
    /// Inter prediction from a motion predictor, without residual.
    Skip,
    /// Inter prediction with temporally scaled collocated motion.
    Direct,
}

impl PredMode {
    /// Check whether the mode predicts from reference pictures.
    pub fn is_inter(&self) -> bool {
        !matches!(self, PredMode::Intra)
    }
}

impl fmt::Display for PredMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredMode::Intra => write!(f, "intra"),
            PredMode::Inter => write!(f, "inter"),
            PredMode::Skip => write!(f, "skip"),
            PredMode::Direct => write!(f, "direct"),
        }
    }
}

/// Reference lists used by an explicit inter CU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum InterDir {
    /// List 0 only.
    #[default]
    L0,
    /// List 1 only.
    L1,
    /// Both lists.
    Bi,
}

impl InterDir {
    /// Check whether the direction uses a list.
    pub fn uses(&self, lidx: usize) -> bool {
        match self {
            InterDir::L0 => lidx == LIST_0,
            InterDir::L1 => lidx == LIST_1,
            InterDir::Bi => true,
        }
    }
}

/// Slice-level parameters the CU syntax depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CuSyntaxParams {
    /// Slice type.
    pub slice_type: SliceType,
    /// Number of active references per list.
    pub num_refs: [usize; 2],
    /// Whether CU-level QP deltas are coded.
    pub cu_qp_delta: bool,
    /// Chroma format of the sequence.
    pub chroma_format: ChromaFormat,
}

/// One leaf CU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CuData {
    /// Luma x position.
    pub x: usize,
    /// Luma y position.
    pub y: usize,
    /// log2 of the CU size.
    pub log2_size: usize,
    /// Prediction mode.
    pub pred_mode: PredMode,
    /// Intra mode (intra CUs).
    pub ipm: IntraMode,
    /// Lists used (explicit inter CUs).
    pub inter_dir: InterDir,
    /// Reference index per list, [`REFI_INVALID`] when unused.
    pub refi: [i8; 2],
    /// Motion vector predictor index per list.
    pub mvp_idx: [u8; 2],
    /// Motion vector difference per list.
    pub mvd: [Mv; 2],
    /// Final motion vector per list.
    pub mv: [Mv; 2],
    /// Luma QP.
    pub qp: u8,
    /// Quantized levels per plane, raster order over the plane's block.
    pub levels: Vec<Vec<i16>>,
}

impl CuData {
    /// Create an intra DC CU without residual.
    pub fn new(x: usize, y: usize, log2_size: usize, qp: u8) -> Self {
        Self {
            x,
            y,
            log2_size,
            pred_mode: PredMode::Intra,
            ipm: IntraMode::Dc,
            inter_dir: InterDir::L0,
            refi: [REFI_INVALID; 2],
            mvp_idx: [0; 2],
            mvd: [Mv::ZERO; 2],
            mv: [Mv::ZERO; 2],
            qp,
            levels: Vec::new(),
        }
    }

    /// CU width and height in luma samples.
    pub fn size(&self) -> usize {
        1 << self.log2_size
    }

    /// Check whether a plane carries coded levels.
    pub fn cbf(&self, plane: usize) -> bool {
        self.levels
            .get(plane)
            .is_some_and(|levels| levels.iter().any(|&l| l != 0))
    }

    /// Check whether any plane carries coded levels.
    pub fn has_residual(&self) -> bool {
        (0..self.levels.len()).any(|c| self.cbf(c))
    }

    /// Drop every coded level.
    pub fn clear_residual(&mut self) {
        for levels in &mut self.levels {
            levels.fill(0);
        }
    }

    /// Map flags recorded for the CU's 4x4 blocks.
    pub fn scu_flags(&self) -> ScuFlags {
        match self.pred_mode {
            PredMode::Intra => ScuFlags::INTRA,
            PredMode::Skip => ScuFlags::SKIP,
            PredMode::Inter | PredMode::Direct => ScuFlags::empty(),
        }
    }
}

/// Size of a CU's block in each plane.
pub fn plane_block_dims(chroma_format: ChromaFormat, size: usize) -> Vec<(usize, usize)> {
    (0..chroma_format.num_planes())
        .map(|c| chroma_format.plane_dims(c, size, size))
        .collect()
}

/// Write the syntax of one CU. `qp_prev` carries the QP predictor between
/// CUs of the slice.
pub fn write_cu(
    enc: &mut CabacEncoder,
    cu: &CuData,
    params: &CuSyntaxParams,
    mpm: &[IntraMode; NUM_INTRA_MODES],
    qp_prev: &mut u8,
) {
    let slice_type = params.slice_type;
    if !slice_type.is_intra() {
        enc.encode_bin(CTX_SKIP_FLAG, cu.pred_mode == PredMode::Skip);
    }

    if cu.pred_mode == PredMode::Skip {
        enc.encode_truncated_unary(CTX_MVP_IDX, NUM_MVP as u32, cu.mvp_idx[LIST_0] as u32);
        if slice_type.is_b() {
            enc.encode_truncated_unary(CTX_MVP_IDX, NUM_MVP as u32, cu.mvp_idx[LIST_1] as u32);
        }
        return;
    }

    if !slice_type.is_intra() {
        enc.encode_bin(CTX_PRED_MODE, cu.pred_mode == PredMode::Intra);
    }

    if cu.pred_mode == PredMode::Intra {
        enc.encode_unary(CTX_INTRA_DIR, 2, mpm_rank(mpm, cu.ipm));
    } else {
        if slice_type.is_b() {
            enc.encode_bin(CTX_DIRECT_MODE, cu.pred_mode == PredMode::Direct);
        }
        if cu.pred_mode == PredMode::Inter {
            if slice_type.is_b() {
                write_inter_dir(enc, cu.inter_dir);
            }
            for lidx in [LIST_0, LIST_1] {
                if cu.inter_dir.uses(lidx) {
                    write_refi(enc, params.num_refs[lidx], cu.refi[lidx]);
                    let idx = cu.mvp_idx[lidx] as u32;
                    enc.encode_truncated_unary(CTX_MVP_IDX, NUM_MVP as u32, idx);
                    write_mvd(enc, cu.mvd[lidx]);
                }
            }
        }
    }

    write_residual(enc, cu, params, qp_prev);
}

fn write_inter_dir(enc: &mut CabacEncoder, dir: InterDir) {
    if dir == InterDir::Bi {
        enc.encode_bin(CTX_INTER_DIR, false);
    } else {
        enc.encode_bin(CTX_INTER_DIR, true);
        enc.encode_bin(CTX_INTER_DIR + 1, dir == InterDir::L1);
    }
}

fn write_refi(enc: &mut CabacEncoder, num_refs: usize, refi: i8) {
    if num_refs <= 1 {
        return;
    }
    let refi = refi.max(0) as usize;
    enc.encode_bin(CTX_REFI, refi != 0);
    if refi == 0 {
        return;
    }
    for i in 2..num_refs {
        let bin = i != refi + 1;
        if i == 2 {
            enc.encode_bin(CTX_REFI + 1, bin);
        } else {
            enc.encode_bypass(bin);
        }
        if !bin {
            break;
        }
    }
}

fn write_mvd(enc: &mut CabacEncoder, mvd: Mv) {
    for v in [mvd.x, mvd.y] {
        let abs = v.unsigned_abs() as u32;
        enc.encode_exp_golomb(CTX_MVD, abs);
        if abs != 0 {
            enc.encode_bypass(v < 0);
        }
    }
}

fn write_residual(enc: &mut CabacEncoder, cu: &CuData, params: &CuSyntaxParams, qp_prev: &mut u8) {
    let has_chroma = params.chroma_format.has_chroma();
    let cbf = [cu.cbf(0), cu.cbf(1), cu.cbf(2)];

    if cu.pred_mode == PredMode::Intra {
        if has_chroma {
            enc.encode_bin(CTX_CBF_CB, cbf[1]);
            enc.encode_bin(CTX_CBF_CR, cbf[2]);
        }
        enc.encode_bin(CTX_CBF_LUMA, cbf[0]);
    } else {
        let cbf_all = cbf.iter().any(|&f| f);
        enc.encode_bin(CTX_CBF_ALL, cbf_all);
        if !cbf_all {
            return;
        }
        if has_chroma {
            enc.encode_bin(CTX_CBF_CB, cbf[1]);
            enc.encode_bin(CTX_CBF_CR, cbf[2]);
        }
        if cbf[1] || cbf[2] {
            enc.encode_bin(CTX_CBF_LUMA, cbf[0]);
        }
    }

    if params.cu_qp_delta && cbf.iter().any(|&f| f) {
        let dqp = cu.qp as i32 - *qp_prev as i32;
        enc.encode_unary(CTX_DELTA_QP, 1, dqp.unsigned_abs());
        if dqp != 0 {
            enc.encode_bypass(dqp < 0);
        }
        *qp_prev = cu.qp;
    }

    let dims = plane_block_dims(params.chroma_format, cu.size());
    for (c, &(w, h)) in dims.iter().enumerate() {
        if cbf[c] {
            encode_coefficients(enc, &cu.levels[c], w, h, c == 0);
        }
    }
}

/// Parse the syntax of one CU at (x, y).
pub fn parse_cu(
    dec: &mut CabacDecoder<'_>,
    x: usize,
    y: usize,
    log2_size: usize,
    params: &CuSyntaxParams,
    mpm: &[IntraMode; NUM_INTRA_MODES],
    qp_prev: &mut u8,
) -> Result<CuData> {
    let slice_type = params.slice_type;
    let mut cu = CuData::new(x, y, log2_size, *qp_prev);

    if !slice_type.is_intra() && dec.decode_bin(CTX_SKIP_FLAG)? {
        cu.pred_mode = PredMode::Skip;
        cu.mvp_idx[LIST_0] = dec.decode_truncated_unary(CTX_MVP_IDX, NUM_MVP as u32)? as u8;
        cu.refi[LIST_0] = 0;
        if slice_type.is_b() {
            cu.mvp_idx[LIST_1] = dec.decode_truncated_unary(CTX_MVP_IDX, NUM_MVP as u32)? as u8;
            cu.refi[LIST_1] = 0;
        }
        return Ok(cu);
    }

    let is_intra = slice_type.is_intra() || dec.decode_bin(CTX_PRED_MODE)?;
    if is_intra {
        let rank = dec.decode_unary(CTX_INTRA_DIR, 2)? as usize;
        cu.ipm = *mpm
            .get(rank)
            .ok_or_else(|| EvcError::malformed(format!("intra mode rank {rank}")))?;
    } else if slice_type.is_b() && dec.decode_bin(CTX_DIRECT_MODE)? {
        cu.pred_mode = PredMode::Direct;
        cu.refi = [0, 0];
    } else {
        cu.pred_mode = PredMode::Inter;
        cu.inter_dir = if slice_type.is_b() {
            parse_inter_dir(dec)?
        } else {
            InterDir::L0
        };
        for lidx in [LIST_0, LIST_1] {
            if !cu.inter_dir.uses(lidx) {
                continue;
            }
            if params.num_refs[lidx] == 0 {
                return Err(EvcError::malformed(format!("CU uses empty list {lidx}")));
            }
            cu.refi[lidx] = parse_refi(dec, params.num_refs[lidx])?;
            cu.mvp_idx[lidx] = dec.decode_truncated_unary(CTX_MVP_IDX, NUM_MVP as u32)? as u8;
            cu.mvd[lidx] = parse_mvd(dec)?;
        }
    }

    parse_residual(dec, &mut cu, params, qp_prev)?;
    Ok(cu)
}

fn parse_inter_dir(dec: &mut CabacDecoder<'_>) -> Result<InterDir> {
    if !dec.decode_bin(CTX_INTER_DIR)? {
        return Ok(InterDir::Bi);
    }
    Ok(if dec.decode_bin(CTX_INTER_DIR + 1)? {
        InterDir::L1
    } else {
        InterDir::L0
    })
}

fn parse_refi(dec: &mut CabacDecoder<'_>, num_refs: usize) -> Result<i8> {
    if num_refs <= 1 || !dec.decode_bin(CTX_REFI)? {
        return Ok(0);
    }
    let mut refi = 1;
    for i in 2..num_refs {
        let bin = if i == 2 {
            dec.decode_bin(CTX_REFI + 1)?
        } else {
            dec.decode_bypass()?
        };
        if !bin {
            break;
        }
        refi += 1;
    }
    Ok(refi)
}

fn parse_mvd(dec: &mut CabacDecoder<'_>) -> Result<Mv> {
    let mut comps = [0i16; 2];
    for comp in &mut comps {
        let abs = dec.decode_exp_golomb(CTX_MVD)? as i32;
        let value = if abs != 0 && dec.decode_bypass()? { -abs } else { abs };
        *comp = i16::try_from(value)
            .map_err(|_| EvcError::malformed(format!("motion vector difference {value}")))?;
    }
    Ok(Mv::new(comps[0], comps[1]))
}

fn parse_residual(
    dec: &mut CabacDecoder<'_>,
    cu: &mut CuData,
    params: &CuSyntaxParams,
    qp_prev: &mut u8,
) -> Result<()> {
    let has_chroma = params.chroma_format.has_chroma();
    let mut cbf = [false; 3];

    if cu.pred_mode == PredMode::Intra {
        if has_chroma {
            cbf[1] = dec.decode_bin(CTX_CBF_CB)?;
            cbf[2] = dec.decode_bin(CTX_CBF_CR)?;
        }
        cbf[0] = dec.decode_bin(CTX_CBF_LUMA)?;
    } else {
        if !dec.decode_bin(CTX_CBF_ALL)? {
            return Ok(());
        }
        if has_chroma {
            cbf[1] = dec.decode_bin(CTX_CBF_CB)?;
            cbf[2] = dec.decode_bin(CTX_CBF_CR)?;
        }
        cbf[0] = if cbf[1] || cbf[2] {
            dec.decode_bin(CTX_CBF_LUMA)?
        } else {
            true
        };
    }

    if !cbf.iter().any(|&f| f) {
        return Ok(());
    }

    if params.cu_qp_delta {
        let abs = dec.decode_unary(CTX_DELTA_QP, 1)? as i32;
        let dqp = if abs != 0 && dec.decode_bypass()? { -abs } else { abs };
        let qp = (*qp_prev as i32 + dqp + 52).rem_euclid(52);
        if qp > MAX_QP as i32 {
            return Err(EvcError::malformed(format!("CU QP {qp}")));
        }
        cu.qp = qp as u8;
        *qp_prev = cu.qp;
    }

    let dims = plane_block_dims(params.chroma_format, cu.size());
    cu.levels = dims.iter().map(|&(w, h)| vec![0i16; w * h]).collect();
    for (c, &(w, h)) in dims.iter().enumerate() {
        if cbf[c] {
            decode_coefficients(dec, &mut cu.levels[c], w, h, c == 0)?;
        }
    }
    Ok(())
}
