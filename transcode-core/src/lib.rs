//! # Transcode Core
//!
//! Core types and utilities for the Transcode codec library.
//!
//! This crate provides the fundamental building blocks shared by the codec crates:
//! - Error handling types
//! - Bitstream reading/writing utilities (MSB-first, Exp-Golomb)
//! - Planar picture buffers

pub mod error;
pub mod bitstream;
pub mod frame;

pub use bitstream::{BitReader, BitWriter};
pub use error::{BitstreamError, Error, Result};
pub use frame::{ChromaFormat, ImageBuffer, Plane};
