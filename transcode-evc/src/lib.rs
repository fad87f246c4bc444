//! EVC baseline video codec for the transcode library.
//!
//! This crate implements an encoder and a decoder for the baseline profile
//! of Essential Video Coding (MPEG-5 Part 1) with the coding tools of that
//! profile:
//!
//! - **NAL units**: length-prefixed framing, SPS, PPS, slice headers and
//!   picture signature SEI messages
//! - **Arithmetic coding**: adaptive binary arithmetic coder with a
//!   bit-counting mode for rate estimation
//! - **Coding tree**: 64x64 CTUs split by quad-tree down to 4x4 CUs
//! - **Prediction**: five intra modes, skip, direct and explicit inter
//!   prediction with quarter-sample motion
//! - **Picture management**: sliding-window reference marking, reference
//!   list construction and output bumping
//!
//! Encoder and decoder share the reconstruction path, so the pictures the
//! encoder predicts from are bit-exact with what a decoder outputs.
//!
//! # Example
//!
//! ```rust,ignore
//! use transcode_evc::{EvcDecoder, EvcDecoderConfig, EvcEncoder, EvcEncoderConfig};
//!
//! let mut encoder = EvcEncoder::new(EvcEncoderConfig::new(352, 288).with_qp(30))?;
//! for image in images {
//!     encoder.push(image)?;
//! }
//! encoder.flush();
//!
//! let mut stream = Vec::new();
//! for picture in encoder.packets() {
//!     stream.extend_from_slice(&picture?.data);
//! }
//!
//! let mut decoder = EvcDecoder::new(EvcDecoderConfig::default())?;
//! let decoded = decoder.decode_stream(&stream)?;
//! ```

#![allow(clippy::needless_range_loop)]
#![allow(clippy::too_many_arguments)]

pub mod cabac;
pub mod cu;
pub mod decoder;
pub mod diagnostics;
pub mod dpb;
pub mod encoder;
pub mod error;
pub mod gop;
pub mod inter;
pub mod intra;
pub mod map;
pub mod me;
pub mod mode;
pub mod nal;
pub mod picture;
pub mod poc;
pub mod recon;
pub mod residual;
pub mod sei;
pub mod transform;
pub mod tree;

/// Log2 of the 4x4 block grid that per-block maps are kept on.
pub const LOG2_SCU: usize = 2;

/// Reference index of an unused list.
pub const REFI_INVALID: i8 = -1;

/// Maximum number of reference pictures.
pub const MAX_NUM_REF_PICS: usize = 17;

/// Maximum number of pictures in the picture buffer.
pub const MAX_PB_SIZE: usize = MAX_NUM_REF_PICS + 5;

/// Maximum number of references kept by sliding-window marking.
pub const MAX_NUM_ACTIVE_REF_FRAME: usize = 5;

/// Maximum QP.
pub const MAX_QP: u8 = 51;

/// Number of SPS ids.
pub const MAX_SPS_COUNT: usize = 16;

/// Number of PPS ids.
pub const MAX_PPS_COUNT: usize = 64;

/// Largest luma picture size accepted, in samples (level 6.2).
pub const MAX_LUMA_PICTURE_SIZE: u64 = 35_651_584;

/// Largest luma width or height accepted.
pub const MAX_PICTURE_DIM: u32 = 16_888;

/// Log2 of the CTU size.
pub const CTU_LOG2: usize = 6;

/// CTU size in luma samples.
pub const CTU_SIZE: usize = 1 << CTU_LOG2;

/// Log2 of the smallest CU.
pub const MIN_CU_LOG2: usize = 2;

pub use error::{codes, EvcError, NalError, Result};

pub use cabac::{CabacDecoder, CabacEncoder};

pub use nal::{
    split_nal_units, write_nal_unit, CropWindow, NalUnitHeader, NalUnitType, Pps, SliceHeader,
    SliceType, Sps,
};

pub use dpb::{OutputStatus, PictureManager, PutParams};
pub use picture::{Mv, Picture, PictureAllocator, PictureLayout, PlanarAllocator, RefLists};

pub use decoder::{DecodeStatus, DecodedPicture, EvcDecoder, EvcDecoderConfig};
pub use encoder::{EncodeStatus, EncodedPicture, EvcEncoder, EvcEncoderConfig, Packets};

pub use diagnostics::Diagnostics;
pub use sei::PictureSignature;
