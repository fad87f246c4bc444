//! Motion estimation for explicit inter CUs.
//!
//! An integer full search around the best predictor is followed by half-
//! and quarter-sample refinement. Costs are SAD plus `sqrt(lambda)` times
//! the estimated motion vector difference bits.

use transcode_core::Plane;

use crate::inter::{interpolate, MV_FRAC_BITS, NUM_MVP};
use crate::picture::Mv;

/// Sum of absolute differences.
pub fn sad(a: &[u16], b: &[u16]) -> u64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| (x as i32 - y as i32).unsigned_abs() as u64)
        .sum()
}

/// Sum of squared differences.
pub fn ssd(a: &[u16], b: &[u16]) -> u64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x as i64 - y as i64;
            (d * d) as u64
        })
        .sum()
}

/// Bits of a zeroth-order Exp-Golomb code of `value`.
fn exp_golomb_bits(value: u32) -> u32 {
    2 * (32 - (value + 1).leading_zeros() - 1) + 1
}

/// Estimated bits of a motion vector difference.
pub fn mvd_bits(mvd: Mv) -> u32 {
    [mvd.x, mvd.y]
        .iter()
        .map(|&v| {
            let abs = v.unsigned_abs() as u32;
            exp_golomb_bits(abs) + (abs != 0) as u32
        })
        .sum()
}

/// Pick the predictor that makes `mv` cheapest to code. Returns the index
/// and the estimated bits of index plus difference.
pub fn best_mvp_idx(mv: Mv, candidates: &[Mv; NUM_MVP]) -> (u8, u32) {
    let mut best = (0u8, u32::MAX);
    for (idx, &cand) in candidates.iter().enumerate() {
        let idx_bits = (idx as u32 + 1).min(NUM_MVP as u32 - 1);
        let bits = idx_bits + mvd_bits(mv.sub(cand));
        if bits < best.1 {
            best = (idx as u8, bits);
        }
    }
    best
}

fn round_to_integer(mv: Mv) -> Mv {
    let round = |v: i16| ((((v as i32) + 2) >> MV_FRAC_BITS) << MV_FRAC_BITS) as i16;
    Mv::new(round(mv.x), round(mv.y))
}

/// Result of a motion search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchResult {
    /// Best motion vector in quarter samples.
    pub mv: Mv,
    /// Predictor index the vector is coded against.
    pub mvp_idx: u8,
    /// SAD plus weighted rate of the best vector.
    pub cost: f64,
}

/// Block-matching motion search over one reference luma plane.
#[derive(Debug, Clone)]
pub struct MotionSearch {
    range: i32,
    sqrt_lambda: f64,
    pred: Vec<u16>,
}

impl MotionSearch {
    /// Create a search with an integer range (in luma samples) and the
    /// RD lambda of the slice.
    pub fn new(range: u32, lambda: f64) -> Self {
        Self {
            range: range as i32,
            sqrt_lambda: lambda.sqrt(),
            pred: Vec::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn cost(
        &mut self,
        org: &[u16],
        reference: &Plane,
        x: usize,
        y: usize,
        size: usize,
        mv: Mv,
        mvp: Mv,
    ) -> f64 {
        self.pred.resize(size * size, 0);
        interpolate(reference, x, y, size, size, mv, MV_FRAC_BITS, MV_FRAC_BITS, &mut self.pred);
        sad(org, &self.pred) as f64 + self.sqrt_lambda * mvd_bits(mv.sub(mvp)) as f64
    }

    /// Search for the vector that best predicts the `size`x`size` luma
    /// block `org` at (x, y) from `reference`.
    pub fn search(
        &mut self,
        org: &[u16],
        reference: &Plane,
        x: usize,
        y: usize,
        size: usize,
        candidates: &[Mv; NUM_MVP],
    ) -> SearchResult {
        // integer positions keep the block within one block of the plane
        let lo_x = -((x + size) as i32);
        let hi_x = (reference.width as i32 - x as i32).max(lo_x);
        let lo_y = -((y + size) as i32);
        let hi_y = (reference.height as i32 - y as i32).max(lo_y);
        let to_mv = |dx: i32, dy: i32| {
            let clamp = |v: i32| (v << MV_FRAC_BITS).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            Mv::new(clamp(dx.clamp(lo_x, hi_x)), clamp(dy.clamp(lo_y, hi_y)))
        };

        let mut mvp = candidates[0];
        let mut center = Mv::ZERO;
        let mut best_cost = f64::MAX;
        for &cand in candidates.iter() {
            let start = round_to_integer(cand);
            let start = to_mv(start.x as i32 >> MV_FRAC_BITS, start.y as i32 >> MV_FRAC_BITS);
            let cost = self.cost(org, reference, x, y, size, start, cand);
            if cost < best_cost {
                best_cost = cost;
                center = start;
                mvp = cand;
            }
        }

        let (cx, cy) = (center.x as i32 >> MV_FRAC_BITS, center.y as i32 >> MV_FRAC_BITS);
        let mut best = center;
        best_cost = self.cost(org, reference, x, y, size, best, mvp);
        for dy in -self.range..=self.range {
            for dx in -self.range..=self.range {
                let mv = to_mv(cx + dx, cy + dy);
                if mv == best {
                    continue;
                }
                let cost = self.cost(org, reference, x, y, size, mv, mvp);
                if cost < best_cost {
                    best_cost = cost;
                    best = mv;
                }
            }
        }

        for step in [2i16, 1] {
            let center = best;
            for (sx, sy) in [(-1, -1), (0, -1), (1, -1), (-1, 0), (1, 0), (-1, 1), (0, 1), (1, 1)] {
                let mv = Mv::new(
                    center.x.saturating_add(sx * step),
                    center.y.saturating_add(sy * step),
                );
                let cost = self.cost(org, reference, x, y, size, mv, mvp);
                if cost < best_cost {
                    best_cost = cost;
                    best = mv;
                }
            }
        }

        let (mvp_idx, _) = best_mvp_idx(best, candidates);
        SearchResult {
            mv: best,
            mvp_idx,
            cost: best_cost,
        }
    }
}
