//! Inter prediction: motion vector predictors and motion compensation.

use transcode_core::{ChromaFormat, Plane};

use crate::error::{EvcError, Result};
use crate::map::{Avail, CodingMaps};
use crate::picture::{Mv, RefLists, LIST_0, LIST_1};

/// Number of motion vector predictor candidates.
pub const NUM_MVP: usize = 4;

/// Fractional precision of luma motion vectors (quarter sample).
pub const MV_FRAC_BITS: u32 = 2;

/// Candidate used in place of a missing spatial neighbour.
const UNAVAILABLE_MVP: Mv = Mv::new(1, 1);

/// Motion vector predictor candidates of a CU for one list.
///
/// The candidates are the left, upper and upper-right neighbours followed
/// by the collocated motion of the first reference picture of the list.
pub fn mvp_candidates(
    maps: &CodingMaps,
    refs: &RefLists,
    lidx: usize,
    x_scu: usize,
    y_scu: usize,
    scuw: usize,
) -> [Mv; NUM_MVP] {
    let scup = maps.scup(x_scu, y_scu);
    let avail = maps.avail_inter(x_scu, y_scu, scuw);
    let motion = maps.motion();
    let pick = |flag: Avail, pos: usize| {
        if avail.contains(flag) {
            motion.mv(pos)[lidx]
        } else {
            UNAVAILABLE_MVP
        }
    };

    let left = pick(Avail::LEFT, scup.wrapping_sub(1));
    let up = pick(Avail::UP, scup.wrapping_sub(maps.w_scu));
    let up_right = pick(Avail::UP_RIGHT, (scup + scuw).wrapping_sub(maps.w_scu));
    let col = refs
        .get(lidx, 0)
        .map(|r| r.motion.mv(scup)[LIST_0])
        .unwrap_or(Mv::ZERO);
    [left, up, up_right, col]
}

/// Direct-mode motion: the collocated list-0 vector at the bottom-right
/// 4x4 block of the CU in the first list-1 reference, scaled by POC
/// distance.
pub fn direct_mvs(
    maps: &CodingMaps,
    refs: &RefLists,
    poc: i32,
    x_scu: usize,
    y_scu: usize,
    scuw: usize,
    scuh: usize,
) -> Result<[Mv; 2]> {
    let (Some(ref0), Some(ref1)) = (refs.get(LIST_0, 0), refs.get(LIST_1, 0)) else {
        return Err(EvcError::malformed("direct mode without references in both lists"));
    };
    let scup = maps.scup(x_scu + scuw - 1, y_scu + scuh - 1);
    let col = ref1.motion.mv(scup)[LIST_0];

    let dpoc_co = ref1.list_poc.first().map_or(0, |&p| ref1.poc - p);
    if dpoc_co == 0 {
        return Ok([Mv::ZERO; 2]);
    }
    let dpoc_l0 = poc - ref0.poc;
    let dpoc_l1 = ref1.poc - poc;
    let scale = |d: i32, v: i16| (d * v as i32 / dpoc_co).clamp(i16::MIN as i32, i16::MAX as i32) as i16;

    Ok([
        Mv::new(scale(dpoc_l0, col.x), scale(dpoc_l0, col.y)),
        Mv::new(scale(-dpoc_l1, col.x), scale(-dpoc_l1, col.y)),
    ])
}

/// Bilinear interpolation of a `w`x`h` block whose integer position is
/// (x, y) displaced by `mv` with `frac_x`/`frac_y` fractional bits.
/// Reference samples outside the plane are clamped to its edges.
#[allow(clippy::too_many_arguments)]
pub fn interpolate(
    plane: &Plane,
    x: usize,
    y: usize,
    w: usize,
    h: usize,
    mv: Mv,
    frac_x: u32,
    frac_y: u32,
    dst: &mut [u16],
) {
    let mvx = mv.x as isize;
    let mvy = mv.y as isize;
    let ix = x as isize + (mvx >> frac_x);
    let iy = y as isize + (mvy >> frac_y);
    let fx = (mvx & ((1 << frac_x) - 1)) as u32;
    let fy = (mvy & ((1 << frac_y) - 1)) as u32;
    let sx = 1u32 << frac_x;
    let sy = 1u32 << frac_y;
    let shift = frac_x + frac_y;
    let round = (1u32 << shift) >> 1;

    for j in 0..h {
        let py = iy + j as isize;
        for i in 0..w {
            let px = ix + i as isize;
            let a = plane.get_clamped(px, py) as u32;
            let value = if fx == 0 && fy == 0 {
                a
            } else {
                let b = plane.get_clamped(px + 1, py) as u32;
                let c = plane.get_clamped(px, py + 1) as u32;
                let d = plane.get_clamped(px + 1, py + 1) as u32;
                let top = a * (sx - fx) + b * fx;
                let bottom = c * (sx - fx) + d * fx;
                (top * (sy - fy) + bottom * fy + round) >> shift
            };
            dst[j * w + i] = value as u16;
        }
    }
}

/// Predict every plane of a CU at luma position (x, y) of size `w`x`h`
/// from the references selected by `refi`. `pred` holds one buffer per
/// plane, sized for that plane's block.
#[allow(clippy::too_many_arguments)]
pub fn motion_compensate(
    refs: &RefLists,
    chroma_format: ChromaFormat,
    refi: [i8; 2],
    mv: [Mv; 2],
    x: usize,
    y: usize,
    w: usize,
    h: usize,
    pred: &mut [Vec<u16>],
) -> Result<()> {
    let mut used = 0;
    let mut scratch: Vec<u16> = Vec::new();

    for lidx in [LIST_0, LIST_1] {
        if refi[lidx] < 0 {
            continue;
        }
        let reference = refs.get(lidx, refi[lidx]).ok_or_else(|| {
            EvcError::malformed(format!(
                "reference index {} outside list {lidx} of {}",
                refi[lidx],
                refs.len(lidx)
            ))
        })?;

        for (c, dst) in pred.iter_mut().enumerate() {
            let (sx, sy) = if c == 0 { (0, 0) } else { chroma_format.shifts() };
            let (cw, ch) = (w >> sx, h >> sy);
            let plane = reference.image.plane(c);
            let (fx, fy) = (MV_FRAC_BITS + sx, MV_FRAC_BITS + sy);

            if used == 0 {
                interpolate(plane, x >> sx, y >> sy, cw, ch, mv[lidx], fx, fy, dst);
            } else {
                scratch.resize(cw * ch, 0);
                interpolate(plane, x >> sx, y >> sy, cw, ch, mv[lidx], fx, fy, &mut scratch);
                for (p, &q) in dst.iter_mut().zip(&scratch) {
                    *p = ((*p as u32 + q as u32 + 1) >> 1) as u16;
                }
            }
        }
        used += 1;
    }

    if used == 0 {
        return Err(EvcError::malformed("inter CU without a reference"));
    }
    Ok(())
}
