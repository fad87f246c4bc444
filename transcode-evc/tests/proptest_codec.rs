//! Property-based tests for the EVC building blocks.
//!
//! Covers the arithmetic coder, the picture manager's capacity and output
//! ordering, and coverage of the coding-tree walk on arbitrary picture sizes.

use proptest::prelude::*;
use transcode_core::ChromaFormat;
use transcode_evc::cabac::NUM_CTX;
use transcode_evc::picture::LIST_0;
use transcode_evc::tree::{ctu_origins, must_split, walk_tree, TreeVisitor};
use transcode_evc::{
    codes, CabacDecoder, CabacEncoder, OutputStatus, PictureLayout, PictureManager,
    PlanarAllocator, PutParams, Result, SliceType, CTU_LOG2,
};

// =============================================================================
// Arithmetic coder
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Bin {
    Context(usize, bool),
    Bypass(bool),
}

fn bin_strategy() -> impl Strategy<Value = Bin> {
    prop_oneof![
        3 => (0..NUM_CTX, any::<bool>()).prop_map(|(c, b)| Bin::Context(c, b)),
        1 => any::<bool>().prop_map(Bin::Bypass),
    ]
}

/// Long runs of one value drive a context to its most skewed state, which
/// is where carries propagate through the output bytes.
fn run_strategy() -> impl Strategy<Value = Vec<Bin>> {
    prop::collection::vec((0..NUM_CTX, any::<bool>(), 1usize..300), 1..20).prop_map(|runs| {
        runs.into_iter()
            .flat_map(|(ctx, bin, len)| std::iter::repeat(Bin::Context(ctx, bin)).take(len))
            .collect()
    })
}

fn encode_bins(bins: &[Bin]) -> Vec<u8> {
    let mut enc = CabacEncoder::new();
    for bin in bins {
        match *bin {
            Bin::Context(ctx, b) => enc.encode_bin(ctx, b),
            Bin::Bypass(b) => enc.encode_bypass(b),
        }
    }
    enc.encode_terminate(true);
    enc.finish();
    enc.into_data()
}

fn decode_bins(data: &[u8], bins: &[Bin]) -> Result<Vec<bool>> {
    let mut dec = CabacDecoder::new(data)?;
    let mut out = Vec::with_capacity(bins.len());
    for bin in bins {
        out.push(match *bin {
            Bin::Context(ctx, _) => dec.decode_bin(ctx)?,
            Bin::Bypass(_) => dec.decode_bypass()?,
        });
    }
    assert!(dec.decode_terminate()?);
    Ok(out)
}

fn values(bins: &[Bin]) -> Vec<bool> {
    bins.iter()
        .map(|b| match *b {
            Bin::Context(_, v) | Bin::Bypass(v) => v,
        })
        .collect()
}

proptest! {
    #[test]
    fn cabac_roundtrip_mixed(bins in prop::collection::vec(bin_strategy(), 1..2000)) {
        let data = encode_bins(&bins);
        prop_assert_eq!(decode_bins(&data, &bins).unwrap(), values(&bins));
    }

    #[test]
    fn cabac_roundtrip_skewed_runs(bins in run_strategy()) {
        let data = encode_bins(&bins);
        prop_assert_eq!(decode_bins(&data, &bins).unwrap(), values(&bins));
    }

    #[test]
    fn cabac_counter_matches_bins(bins in prop::collection::vec(bin_strategy(), 0..500)) {
        let mut counter = CabacEncoder::counter();
        for bin in &bins {
            match *bin {
                Bin::Context(ctx, b) => counter.encode_bin(ctx, b),
                Bin::Bypass(b) => counter.encode_bypass(b),
            }
        }
        prop_assert_eq!(counter.bins(), bins.len() as u64);
    }
}

// =============================================================================
// Picture manager
// =============================================================================

fn manager(capacity: usize) -> PictureManager {
    let layout = PictureLayout {
        width: 8,
        height: 8,
        chroma_format: ChromaFormat::Yuv420,
        bit_depth: 8,
    };
    PictureManager::new(capacity, 4, layout, Box::new(PlanarAllocator::new())).unwrap()
}

fn drain(dpb: &mut PictureManager, out: &mut Vec<i32>) {
    while let OutputStatus::Picture(pic) = dpb.output() {
        out.push(pic.poc);
    }
}

proptest! {
    /// Random interleaving of decode and output calls never exceeds the
    /// capacity and releases every picture once, in POC order.
    #[test]
    fn dpb_capacity_and_output_order(
        capacity in 1usize..10,
        ops in prop::collection::vec((any::<bool>(), any::<bool>()), 1..60),
    ) {
        let mut dpb = manager(capacity);
        let mut next_poc = 0;
        let mut put = Vec::new();
        let mut out = Vec::new();

        for (decode, is_ref) in ops {
            if decode {
                match dpb.get_empty() {
                    Ok(pic) => {
                        let params = PutParams {
                            poc: next_poc,
                            temporal_id: 0,
                            slice_type: SliceType::I,
                            is_idr: next_poc == 0,
                            is_ref,
                            need_for_out: true,
                            no_output_of_prior_pics: false,
                        };
                        dpb.put(pic, params).unwrap();
                        put.push(next_poc);
                        next_poc += 1;
                    }
                    Err(e) => {
                        prop_assert_eq!(e.code(), codes::ERR_REACHED_MAX);
                        prop_assert_eq!(dpb.num_resident(), capacity);
                    }
                }
            } else {
                drain(&mut dpb, &mut out);
            }
            prop_assert!(dpb.num_resident() <= capacity);
            prop_assert!(!dpb.has_lease());
        }

        dpb.flush();
        drain(&mut dpb, &mut out);
        prop_assert_eq!(out, put);
    }

    /// List 0 of a P slice holds distinct past references, nearest first.
    #[test]
    fn dpb_p_list_is_nearest_first(refs in prop::collection::vec(any::<bool>(), 1..12)) {
        let mut dpb = manager(refs.len() + 1);
        for (poc, &is_ref) in refs.iter().enumerate() {
            let pic = dpb.get_empty().unwrap();
            let params = PutParams {
                poc: poc as i32,
                temporal_id: 0,
                slice_type: SliceType::I,
                is_idr: poc == 0,
                is_ref: is_ref || poc == 0,
                need_for_out: false,
                no_output_of_prior_pics: false,
            };
            dpb.put(pic, params).unwrap();
        }

        let poc = refs.len() as i32;
        dpb.init_ref_lists(SliceType::P, poc, 0, 0).unwrap();
        let l0 = dpb.ref_lists().pocs(LIST_0);
        prop_assert!(!l0.is_empty() && l0.len() <= 4);
        prop_assert!(l0.windows(2).all(|w| w[0] > w[1]));
        prop_assert!(l0.iter().all(|&p| p < poc));

        dpb.init_ref_lists(SliceType::P, poc, 0, 0).unwrap();
        prop_assert_eq!(dpb.ref_lists().pocs(LIST_0), l0);
    }
}

// =============================================================================
// Coding-tree coverage
// =============================================================================

/// Splits at random unless the node crosses the picture edge.
struct RandomSplits {
    state: u64,
    width: usize,
    height: usize,
    covered: Vec<u8>,
}

impl RandomSplits {
    fn next_bit(&mut self) -> bool {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state & 1 == 1
    }
}

impl TreeVisitor for RandomSplits {
    fn split(&mut self, x: usize, y: usize, log2_size: usize) -> Result<bool> {
        Ok(must_split(x, y, log2_size, self.width, self.height) || self.next_bit())
    }

    fn leaf(&mut self, x: usize, y: usize, log2_size: usize) -> Result<()> {
        let cols = self.width / 4;
        let n = (1 << log2_size) / 4;
        for j in 0..n {
            for i in 0..n {
                self.covered[(y / 4 + j) * cols + x / 4 + i] += 1;
            }
        }
        Ok(())
    }
}

proptest! {
    #[test]
    fn tree_leaves_tile_the_picture(
        w4 in 1usize..50,
        h4 in 1usize..50,
        seed in 1u64..u64::MAX,
    ) {
        let (width, height) = (w4 * 4, h4 * 4);
        let mut visitor = RandomSplits {
            state: seed,
            width,
            height,
            covered: vec![0; w4 * h4],
        };
        for (x, y) in ctu_origins(width, height) {
            walk_tree(&mut visitor, x, y, CTU_LOG2, width, height).unwrap();
        }
        prop_assert!(visitor.covered.iter().all(|&c| c == 1));
    }
}
