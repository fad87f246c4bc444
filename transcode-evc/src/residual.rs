//! Run-length residual coding over a zig-zag scan.
//!
//! Each non-zero coefficient is coded as the run of zeros before it, its
//! magnitude minus one, and a bypass sign. A last-coefficient flag follows
//! every coefficient except one at the final scan position.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::cabac::{CabacDecoder, CabacEncoder, CTX_LAST, CTX_LEVEL, CTX_RUN};
use crate::error::{EvcError, Result};

/// Largest coded coefficient magnitude.
const MAX_LEVEL: u32 = 1 << 15;

/// Zig-zag scan order for a `w`x`h` block, as raster indices.
///
/// Diagonals alternate direction, starting upward-right from the DC
/// coefficient.
pub fn zigzag_scan(w: usize, h: usize) -> Arc<Vec<u16>> {
    static CACHE: OnceLock<Mutex<HashMap<(usize, usize), Arc<Vec<u16>>>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    if let Ok(mut map) = cache.lock() {
        return map
            .entry((w, h))
            .or_insert_with(|| Arc::new(build_scan(w, h)))
            .clone();
    }
    Arc::new(build_scan(w, h))
}

fn build_scan(w: usize, h: usize) -> Vec<u16> {
    let mut scan = Vec::with_capacity(w * h);
    for d in 0..(w + h - 1) {
        if d % 2 == 0 {
            // bottom-left to top-right
            let y_start = d.min(h - 1);
            let mut y = y_start as isize;
            while y >= 0 {
                let x = d - y as usize;
                if x < w {
                    scan.push((y as usize * w + x) as u16);
                }
                y -= 1;
            }
        } else {
            let x_start = d.min(w - 1);
            let mut x = x_start as isize;
            while x >= 0 {
                let y = d - x as usize;
                if y < h {
                    scan.push((y * w + x as usize) as u16);
                }
                x -= 1;
            }
        }
    }
    scan
}

#[inline]
fn ctx_offsets(is_luma: bool) -> (usize, usize) {
    if is_luma {
        (0, 0)
    } else {
        (2, 1)
    }
}

/// Encode the coefficients of one component block. The block must contain
/// at least one non-zero coefficient.
pub fn encode_coefficients(
    enc: &mut CabacEncoder,
    coefs: &[i16],
    w: usize,
    h: usize,
    is_luma: bool,
) {
    let scan = zigzag_scan(w, h);
    let (t0, last_ctx) = ctx_offsets(is_luma);
    let mut num_sig = coefs.iter().filter(|&&c| c != 0).count();
    let last_pos = w * h - 1;
    let mut run = 0u32;

    for (scan_pos, &raster) in scan.iter().enumerate() {
        let coef = coefs[raster as usize];
        if coef == 0 {
            run += 1;
            continue;
        }

        enc.encode_unary(CTX_RUN + t0, 2, run);
        enc.encode_unary(CTX_LEVEL + t0, 2, coef.unsigned_abs() as u32 - 1);
        enc.encode_bypass(coef < 0);

        if scan_pos == last_pos {
            break;
        }
        run = 0;
        num_sig -= 1;
        let last = num_sig == 0;
        enc.encode_bin(CTX_LAST + last_ctx, last);
        if last {
            break;
        }
    }
}

/// Decode the coefficients of one component block into `coefs` (raster
/// order, pre-zeroed by the caller).
pub fn decode_coefficients(
    dec: &mut CabacDecoder<'_>,
    coefs: &mut [i16],
    w: usize,
    h: usize,
    is_luma: bool,
) -> Result<()> {
    let scan = zigzag_scan(w, h);
    let (t0, last_ctx) = ctx_offsets(is_luma);
    let size = w * h;
    let mut scan_pos = 0usize;

    loop {
        let run = dec.decode_unary(CTX_RUN + t0, 2)? as usize;
        let level = dec.decode_unary(CTX_LEVEL + t0, 2)? + 1;
        if level > MAX_LEVEL {
            return Err(EvcError::malformed(format!("coefficient level {level}")));
        }
        let negative = dec.decode_bypass()?;

        scan_pos += run;
        if scan_pos >= size {
            return Err(EvcError::malformed(format!(
                "coefficient run past the end of a {w}x{h} block"
            )));
        }
        let value = if negative { -(level as i32) } else { level as i32 };
        coefs[scan[scan_pos] as usize] = value as i16;

        if scan_pos == size - 1 {
            break;
        }
        scan_pos += 1;
        if dec.decode_bin(CTX_LAST + last_ctx)? {
            break;
        }
    }
    Ok(())
}
