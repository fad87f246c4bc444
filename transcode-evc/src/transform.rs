//! Integer transform and scalar quantization.
//!
//! The separable DCT-II is defined for every power-of-two size from 2 to
//! 64. Its basis matrices are generated once, scaled so that the DC row is
//! 64 for every size. Stage shifts keep intermediate values in 16 bits the
//! way HEVC-family codecs do.

#![allow(clippy::needless_range_loop)]

use std::f64::consts::PI;
use std::sync::OnceLock;

/// Largest transform size (log2).
pub const MAX_TR_LOG2: usize = 6;

/// Quantization scale factors.
const QUANT_SCALES: [i64; 6] = [26214, 23302, 20560, 18396, 16384, 14564];

/// Dequantization scale factors.
const DEQUANT_SCALES: [i64; 6] = [40, 45, 51, 57, 64, 72];

/// Chroma QP mapping for luma QPs 30..=43 (4:2:0 table).
const CHROMA_QP_TABLE: [i32; 14] = [29, 30, 31, 32, 33, 33, 34, 34, 35, 35, 36, 36, 37, 37];

const COEF_MIN: i64 = i16::MIN as i64;
const COEF_MAX: i64 = i16::MAX as i64;

/// Basis matrices indexed by log2 size (index 0 unused).
fn dct_matrices() -> &'static [Vec<i32>; MAX_TR_LOG2 + 1] {
    static MATRICES: OnceLock<[Vec<i32>; MAX_TR_LOG2 + 1]> = OnceLock::new();
    MATRICES.get_or_init(|| std::array::from_fn(build_dct_matrix))
}

fn build_dct_matrix(log2: usize) -> Vec<i32> {
    if log2 == 0 {
        return vec![64];
    }
    let n = 1usize << log2;
    let mut m = vec![0i32; n * n];
    for k in 0..n {
        let ck = if k == 0 { 1.0 / 2f64.sqrt() } else { 1.0 };
        for i in 0..n {
            let v = 64.0 * 2f64.sqrt() * ck * (PI * (2 * i + 1) as f64 * k as f64 / (2 * n) as f64).cos();
            m[k * n + i] = v.round() as i32;
        }
    }
    m
}

#[inline]
fn round_shift(v: i64, shift: i32) -> i64 {
    if shift > 0 {
        (v + (1i64 << (shift - 1))) >> shift
    } else {
        v << (-shift)
    }
}

/// Forward and inverse transform for one bit depth.
#[derive(Debug, Clone, Copy)]
pub struct EvcTransform {
    bit_depth: u8,
}

impl EvcTransform {
    /// Create a transformer.
    pub fn new(bit_depth: u8) -> Self {
        Self { bit_depth }
    }

    /// Forward transform of a `w`x`h` residual block (raster order).
    pub fn forward(&self, residual: &[i16], coefs: &mut [i32], log2_w: usize, log2_h: usize) {
        let (w, h) = (1usize << log2_w, 1usize << log2_h);
        let mw = &dct_matrices()[log2_w];
        let mh = &dct_matrices()[log2_h];
        let shift1 = log2_w as i32 + self.bit_depth as i32 - 9;
        let shift2 = log2_h as i32 + 6;

        // Horizontal
        let mut temp = vec![0i64; w * h];
        for y in 0..h {
            for k in 0..w {
                let mut sum = 0i64;
                for x in 0..w {
                    sum += mw[k * w + x] as i64 * residual[y * w + x] as i64;
                }
                temp[y * w + k] = round_shift(sum, shift1).clamp(COEF_MIN, COEF_MAX);
            }
        }

        // Vertical
        for k in 0..h {
            for x in 0..w {
                let mut sum = 0i64;
                for y in 0..h {
                    sum += mh[k * h + y] as i64 * temp[y * w + x];
                }
                coefs[k * w + x] = round_shift(sum, shift2).clamp(COEF_MIN, COEF_MAX) as i32;
            }
        }
    }

    /// Inverse transform back to a residual block.
    pub fn inverse(&self, coefs: &[i32], residual: &mut [i16], log2_w: usize, log2_h: usize) {
        let (w, h) = (1usize << log2_w, 1usize << log2_h);
        let mw = &dct_matrices()[log2_w];
        let mh = &dct_matrices()[log2_h];
        let shift1 = 7;
        let shift2 = 20 - self.bit_depth as i32;

        // Vertical
        let mut temp = vec![0i64; w * h];
        for x in 0..w {
            for y in 0..h {
                let mut sum = 0i64;
                for k in 0..h {
                    let c = coefs[k * w + x];
                    if c != 0 {
                        sum += mh[k * h + y] as i64 * c as i64;
                    }
                }
                temp[y * w + x] = round_shift(sum, shift1).clamp(COEF_MIN, COEF_MAX);
            }
        }

        // Horizontal
        for y in 0..h {
            for x in 0..w {
                let mut sum = 0i64;
                for k in 0..w {
                    sum += mw[k * w + x] as i64 * temp[y * w + k];
                }
                residual[y * w + x] = round_shift(sum, shift2).clamp(COEF_MIN, COEF_MAX) as i16;
            }
        }
    }
}

/// Slice-level quantization parameters, including the bit-depth offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantParams {
    /// Luma QP.
    pub qp: i32,
    /// Scaled QP per component (luma, Cb, Cr).
    pub scaled: [i32; 3],
}

impl QuantParams {
    /// Derive the component QPs from a luma QP and chroma offsets.
    pub fn new(qp: i32, cb_offset: i32, cr_offset: i32, bit_depth: u8) -> Self {
        let bd_offset = 6 * (bit_depth as i32 - 8);
        Self {
            qp,
            scaled: [
                qp + bd_offset,
                chroma_qp(qp, cb_offset, bit_depth),
                chroma_qp(qp, cr_offset, bit_depth),
            ],
        }
    }
}

/// Map a luma QP and chroma offset to the scaled chroma QP.
pub fn chroma_qp(qp: i32, offset: i32, bit_depth: u8) -> i32 {
    let bd_offset = 6 * (bit_depth as i32 - 8);
    let q = (qp + offset).clamp(-bd_offset, 57);
    let mapped = match q {
        q if q < 30 => q,
        q if q <= 43 => CHROMA_QP_TABLE[(q - 30) as usize],
        q => q - 6,
    };
    mapped + bd_offset
}

/// Rate-distortion lambda for a luma QP.
pub fn lambda(qp: i32) -> f64 {
    0.57 * 2f64.powf((qp - 12) as f64 / 3.0)
}

/// Scalar quantizer.
#[derive(Debug, Clone, Copy)]
pub struct EvcQuantizer {
    bit_depth: u8,
}

impl EvcQuantizer {
    /// Create a quantizer.
    pub fn new(bit_depth: u8) -> Self {
        Self { bit_depth }
    }

    /// Quantize transform coefficients; returns the number of non-zero levels.
    pub fn quantize(
        &self,
        coefs: &[i32],
        levels: &mut [i16],
        log2_w: usize,
        log2_h: usize,
        qp_scaled: i32,
        is_intra: bool,
    ) -> usize {
        let qp = qp_scaled.max(0);
        let per = qp / 6;
        let log2_size = ((log2_w + log2_h) >> 1) as i32;
        let tr_shift = 15 - self.bit_depth as i32 - log2_size;
        let shift = 14 + per + tr_shift;
        let mut scale = QUANT_SCALES[(qp % 6) as usize];
        if (log2_w + log2_h) % 2 == 1 {
            scale = (scale * 362) >> 8;
        }
        let offset = if is_intra {
            (1i64 << shift) / 3
        } else {
            (1i64 << shift) / 6
        };

        let n = 1usize << (log2_w + log2_h);
        let mut nnz = 0;
        for i in 0..n {
            let c = coefs[i] as i64;
            let level = ((c.abs() * scale + offset) >> shift).min(COEF_MAX);
            if level != 0 {
                nnz += 1;
            }
            levels[i] = (if c < 0 { -level } else { level }) as i16;
        }
        nnz
    }

    /// Scale quantized levels back to transform coefficients.
    pub fn dequantize(
        &self,
        levels: &[i16],
        coefs: &mut [i32],
        log2_w: usize,
        log2_h: usize,
        qp_scaled: i32,
    ) {
        let qp = qp_scaled.max(0);
        let per = qp / 6;
        let log2_size = ((log2_w + log2_h) >> 1) as i32;
        let shift = self.bit_depth as i32 + log2_size - 9;
        let mut scale = DEQUANT_SCALES[(qp % 6) as usize];
        if (log2_w + log2_h) % 2 == 1 {
            scale = (scale * 181) >> 8;
        }

        let n = 1usize << (log2_w + log2_h);
        for i in 0..n {
            let l = levels[i] as i64;
            coefs[i] = if l == 0 {
                0
            } else {
                round_shift((l * scale) << per, shift).clamp(COEF_MIN, COEF_MAX) as i32
            };
        }
    }
}
