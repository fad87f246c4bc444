//! Supplemental enhancement information: decoded picture signatures.
//!
//! The only payload carried is a per-plane MD5 digest of the reconstructed
//! picture. Samples are hashed as 16-bit little-endian words in raster
//! order over the full coded size, independent of the cropping window.

use md5::{Digest, Md5};
use tracing::warn;
use transcode_core::bitstream::{BitReader, BitWriter};
use transcode_core::ImageBuffer;

use crate::error::{EvcError, Result};

/// SEI payload type of the picture signature.
pub const SEI_PICTURE_SIGNATURE: u8 = 0x10;

/// Size of one plane digest in bytes.
pub const SIGNATURE_SIZE: usize = 16;

/// Per-plane MD5 digests of a picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureSignature {
    digests: Vec<[u8; SIGNATURE_SIZE]>,
}

impl PictureSignature {
    /// Hash every plane of a picture.
    pub fn compute(image: &ImageBuffer) -> Self {
        let digests = image
            .planes()
            .iter()
            .map(|plane| {
                let mut hasher = Md5::new();
                for y in 0..plane.height {
                    for &sample in plane.row(y) {
                        hasher.update(sample.to_le_bytes());
                    }
                }
                hasher.finalize().into()
            })
            .collect();
        Self { digests }
    }

    /// Get the plane digests.
    pub fn digests(&self) -> &[[u8; SIGNATURE_SIZE]] {
        &self.digests
    }

    /// Write the SEI payload (without NAL header).
    pub fn write(&self, writer: &mut BitWriter) -> Result<()> {
        writer.write_u8(SEI_PICTURE_SIGNATURE)?;
        writer.write_u8(SIGNATURE_SIZE as u8)?;
        for digest in &self.digests {
            writer.write_bytes(digest)?;
        }
        Ok(())
    }

    /// Parse an SEI payload. Returns `None` for payload types other than
    /// the picture signature.
    pub fn parse(rbsp: &[u8], num_planes: usize) -> Result<Option<Self>> {
        let mut reader = BitReader::new(rbsp);
        let payload_type = reader.read_u8()?;
        let payload_size = reader.read_u8()? as usize;

        if payload_type != SEI_PICTURE_SIGNATURE {
            warn!(payload_type, "ignoring unknown SEI payload");
            return Ok(None);
        }
        if payload_size != SIGNATURE_SIZE {
            return Err(EvcError::malformed(format!(
                "picture signature of {payload_size} bytes"
            )));
        }

        let mut digests = Vec::with_capacity(num_planes);
        for _ in 0..num_planes {
            let mut digest = [0u8; SIGNATURE_SIZE];
            for byte in digest.iter_mut() {
                *byte = reader.read_u8()?;
            }
            digests.push(digest);
        }
        Ok(Some(Self { digests }))
    }
}
