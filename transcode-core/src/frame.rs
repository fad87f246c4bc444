//! Planar picture buffers.
//!
//! [`ImageBuffer`] is the hand-off type between codecs and the I/O layer:
//! one [`Plane`] of 16-bit samples per colour component, sized from the
//! luma dimensions and the [`ChromaFormat`]. Shared ownership is expressed
//! with `Arc<ImageBuffer>` by the codec crates; the strong count plays the
//! role of the external reference count.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Chroma sampling format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChromaFormat {
    /// Luma only.
    Yuv400,
    /// 2x2 chroma subsampling.
    #[default]
    Yuv420,
    /// Horizontal chroma subsampling.
    Yuv422,
    /// No chroma subsampling.
    Yuv444,
}

impl ChromaFormat {
    /// Get the chroma_format_idc value used in sequence headers.
    pub fn idc(&self) -> u32 {
        match self {
            Self::Yuv400 => 0,
            Self::Yuv420 => 1,
            Self::Yuv422 => 2,
            Self::Yuv444 => 3,
        }
    }

    /// Map a chroma_format_idc value back to a format.
    pub fn from_idc(idc: u32) -> Option<Self> {
        match idc {
            0 => Some(Self::Yuv400),
            1 => Some(Self::Yuv420),
            2 => Some(Self::Yuv422),
            3 => Some(Self::Yuv444),
            _ => None,
        }
    }

    /// Get the number of planes.
    pub fn num_planes(&self) -> usize {
        if *self == Self::Yuv400 {
            1
        } else {
            3
        }
    }

    /// Check whether the format carries chroma planes.
    pub fn has_chroma(&self) -> bool {
        *self != Self::Yuv400
    }

    /// Get the log2 chroma subsampling factors (horizontal, vertical).
    pub fn shifts(&self) -> (u32, u32) {
        match self {
            Self::Yuv420 => (1, 1),
            Self::Yuv422 => (1, 0),
            Self::Yuv400 | Self::Yuv444 => (0, 0),
        }
    }

    /// Get the dimensions of a plane for the given luma dimensions.
    pub fn plane_dims(&self, plane: usize, width: usize, height: usize) -> (usize, usize) {
        if plane == 0 {
            return (width, height);
        }
        let (sx, sy) = self.shifts();
        (width >> sx, height >> sy)
    }
}

impl fmt::Display for ChromaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yuv400 => write!(f, "4:0:0"),
            Self::Yuv420 => write!(f, "4:2:0"),
            Self::Yuv422 => write!(f, "4:2:2"),
            Self::Yuv444 => write!(f, "4:4:4"),
        }
    }
}

/// One colour component of a picture.
#[derive(Clone, PartialEq, Eq)]
pub struct Plane {
    /// Width in samples.
    pub width: usize,
    /// Height in samples.
    pub height: usize,
    /// Distance between rows, in samples.
    pub stride: usize,
    data: Vec<u16>,
}

impl Plane {
    /// Create a plane filled with a constant value.
    pub fn new(width: usize, height: usize, fill: u16) -> Self {
        Self {
            width,
            height,
            stride: width,
            data: vec![fill; width * height],
        }
    }

    /// Create a filled plane, failing instead of aborting when the sample
    /// storage cannot be reserved.
    pub fn try_new(width: usize, height: usize, fill: u16) -> Result<Self> {
        let samples = width
            .checked_mul(height)
            .ok_or(Error::AllocationFailed { samples: usize::MAX })?;
        let mut data = Vec::new();
        data.try_reserve_exact(samples)
            .map_err(|_| Error::AllocationFailed { samples })?;
        data.resize(samples, fill);
        Ok(Self {
            width,
            height,
            stride: width,
            data,
        })
    }

    /// Get the sample at (x, y).
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u16 {
        self.data[y * self.stride + x]
    }

    /// Set the sample at (x, y).
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: u16) {
        self.data[y * self.stride + x] = value;
    }

    /// Get the sample at (x, y) with coordinates clamped to the plane.
    #[inline]
    pub fn get_clamped(&self, x: isize, y: isize) -> u16 {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.get(x, y)
    }

    /// Get a row of samples.
    pub fn row(&self, y: usize) -> &[u16] {
        &self.data[y * self.stride..y * self.stride + self.width]
    }

    /// Get a mutable row of samples.
    pub fn row_mut(&mut self, y: usize) -> &mut [u16] {
        let start = y * self.stride;
        &mut self.data[start..start + self.width]
    }

    /// Get the raw sample storage.
    pub fn data(&self) -> &[u16] {
        &self.data
    }

    /// Fill every sample with a value.
    pub fn fill(&mut self, value: u16) {
        self.data.fill(value);
    }
}

impl fmt::Debug for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plane")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// A planar picture with 16-bit sample storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    /// Luma width in samples.
    pub width: usize,
    /// Luma height in samples.
    pub height: usize,
    /// Chroma format.
    pub chroma_format: ChromaFormat,
    /// Sample bit depth.
    pub bit_depth: u8,
    planes: Vec<Plane>,
}

impl ImageBuffer {
    /// Create a picture with every sample set to zero.
    pub fn new(width: usize, height: usize, chroma_format: ChromaFormat, bit_depth: u8) -> Self {
        Self::filled(width, height, chroma_format, bit_depth, 0)
    }

    /// Create a picture with every sample set to `value`.
    pub fn filled(
        width: usize,
        height: usize,
        chroma_format: ChromaFormat,
        bit_depth: u8,
        value: u16,
    ) -> Self {
        let planes = (0..chroma_format.num_planes())
            .map(|c| {
                let (w, h) = chroma_format.plane_dims(c, width, height);
                Plane::new(w, h, value)
            })
            .collect();
        Self {
            width,
            height,
            chroma_format,
            bit_depth,
            planes,
        }
    }

    /// Fallible form of [`ImageBuffer::filled`].
    pub fn try_filled(
        width: usize,
        height: usize,
        chroma_format: ChromaFormat,
        bit_depth: u8,
        value: u16,
    ) -> Result<Self> {
        let planes = (0..chroma_format.num_planes())
            .map(|c| {
                let (w, h) = chroma_format.plane_dims(c, width, height);
                Plane::try_new(w, h, value)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            width,
            height,
            chroma_format,
            bit_depth,
            planes,
        })
    }

    /// Get the number of planes.
    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    /// Get a plane.
    pub fn plane(&self, index: usize) -> &Plane {
        &self.planes[index]
    }

    /// Get a mutable plane.
    pub fn plane_mut(&mut self, index: usize) -> &mut Plane {
        &mut self.planes[index]
    }

    /// Get all planes.
    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    /// Check whether two buffers share geometry, format and depth.
    pub fn same_layout(&self, other: &ImageBuffer) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.chroma_format == other.chroma_format
            && self.bit_depth == other.bit_depth
    }

    /// Copy out a window of the picture, given luma crop offsets.
    ///
    /// Chroma offsets are derived through the subsampling shifts.
    pub fn crop(&self, left: usize, right: usize, top: usize, bottom: usize) -> Result<Self> {
        if left + right >= self.width || top + bottom >= self.height {
            return Err(Error::invalid_param(format!(
                "crop {left}/{right}/{top}/{bottom} exceeds {}x{}",
                self.width, self.height
            )));
        }
        if left == 0 && right == 0 && top == 0 && bottom == 0 {
            return Ok(self.clone());
        }

        let width = self.width - left - right;
        let height = self.height - top - bottom;
        let mut out = Self::new(width, height, self.chroma_format, self.bit_depth);
        let (sx, sy) = self.chroma_format.shifts();
        for (c, plane) in out.planes.iter_mut().enumerate() {
            let (ox, oy) = if c == 0 { (left, top) } else { (left >> sx, top >> sy) };
            let src = &self.planes[c];
            for y in 0..plane.height {
                let row = &src.row(y + oy)[ox..ox + plane.width];
                plane.row_mut(y).copy_from_slice(row);
            }
        }
        Ok(out)
    }

    /// Build a picture from packed planar bytes.
    ///
    /// 8-bit pictures use one byte per sample, deeper pictures two bytes
    /// little-endian.
    pub fn from_bytes(
        data: &[u8],
        width: usize,
        height: usize,
        chroma_format: ChromaFormat,
        bit_depth: u8,
    ) -> Result<Self> {
        let mut image = Self::new(width, height, chroma_format, bit_depth);
        let needed = image.byte_len();
        if data.len() < needed {
            return Err(Error::BufferTooSmall {
                needed,
                available: data.len(),
            });
        }

        let wide = bit_depth > 8;
        let mut pos = 0;
        for plane in image.planes.iter_mut() {
            for y in 0..plane.height {
                for sample in plane.row_mut(y) {
                    *sample = if wide {
                        let v = u16::from_le_bytes([data[pos], data[pos + 1]]);
                        pos += 2;
                        v
                    } else {
                        pos += 1;
                        data[pos - 1] as u16
                    };
                }
            }
        }
        Ok(image)
    }

    /// Serialize to packed planar bytes (the inverse of [`ImageBuffer::from_bytes`]).
    pub fn to_bytes(&self) -> Vec<u8> {
        let wide = self.bit_depth > 8;
        let mut out = Vec::with_capacity(self.byte_len());
        for plane in &self.planes {
            for y in 0..plane.height {
                for &sample in plane.row(y) {
                    if wide {
                        out.extend_from_slice(&sample.to_le_bytes());
                    } else {
                        out.push(sample as u8);
                    }
                }
            }
        }
        out
    }

    fn byte_len(&self) -> usize {
        let bytes_per_sample = if self.bit_depth > 8 { 2 } else { 1 };
        self.planes
            .iter()
            .map(|p| p.width * p.height * bytes_per_sample)
            .sum()
    }
}
