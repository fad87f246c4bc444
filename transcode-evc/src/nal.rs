//! NAL unit framing and high-level syntax.
//!
//! Streams are a sequence of NAL units, each preceded by a 4-byte
//! little-endian length. Every NAL unit starts with a 16-bit header:
//!
//! ```text
//! forbidden_zero_bit (1) | nal_unit_type_plus1 (6) | nuh_temporal_id (3)
//! nuh_reserved_zero_5bits (5) | nuh_extension_flag (1)
//! ```
//!
//! This module also carries the sequence/picture parameter sets and the
//! slice header for the baseline toolset.

use byteorder::{ByteOrder, LittleEndian};
use transcode_core::bitstream::{BitReader, BitWriter};
use transcode_core::ChromaFormat;

use crate::error::{EvcError, NalError, Result};
use crate::{
    MAX_LUMA_PICTURE_SIZE, MAX_NUM_REF_PICS, MAX_PICTURE_DIM, MAX_PPS_COUNT, MAX_QP,
    MAX_SPS_COUNT,
};

/// Size of the NAL unit length prefix in bytes.
pub const NAL_LENGTH_PREFIX: usize = 4;

/// Size of the NAL unit header in bytes.
pub const NAL_HEADER_SIZE: usize = 2;

/// NAL unit types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NalUnitType {
    /// Coded slice of a non-IDR picture.
    NonIdr,
    /// Coded slice of an IDR picture.
    Idr,
    /// Sequence parameter set.
    Sps,
    /// Picture parameter set.
    Pps,
    /// Adaptation parameter set.
    Aps,
    /// Filler data.
    FillerData,
    /// Supplemental enhancement information.
    Sei,
    /// Reserved or unspecified type.
    Reserved(u8),
}

impl NalUnitType {
    /// Create from the raw nal_unit_type value.
    pub fn from_raw(value: u8) -> Self {
        match value {
            0 => Self::NonIdr,
            1 => Self::Idr,
            24 => Self::Sps,
            25 => Self::Pps,
            26 => Self::Aps,
            27 => Self::FillerData,
            28 => Self::Sei,
            v => Self::Reserved(v),
        }
    }

    /// Get the raw nal_unit_type value.
    pub fn to_raw(&self) -> u8 {
        match self {
            Self::NonIdr => 0,
            Self::Idr => 1,
            Self::Sps => 24,
            Self::Pps => 25,
            Self::Aps => 26,
            Self::FillerData => 27,
            Self::Sei => 28,
            Self::Reserved(v) => *v,
        }
    }

    /// Check if this is a coded slice.
    pub fn is_slice(&self) -> bool {
        matches!(self, Self::NonIdr | Self::Idr)
    }

    /// Check if this is an IDR slice.
    pub fn is_idr(&self) -> bool {
        *self == Self::Idr
    }
}

/// NAL unit header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnitHeader {
    /// NAL unit type.
    pub nal_unit_type: NalUnitType,
    /// Temporal layer id.
    pub temporal_id: u8,
    /// Extension flag.
    pub extension_flag: bool,
}

impl NalUnitHeader {
    /// Create a header with no extension.
    pub fn new(nal_unit_type: NalUnitType, temporal_id: u8) -> Self {
        Self {
            nal_unit_type,
            temporal_id,
            extension_flag: false,
        }
    }

    /// Parse a NAL unit header from the start of a NAL unit payload.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < NAL_HEADER_SIZE {
            return Err(NalError::Truncated {
                expected: NAL_HEADER_SIZE,
                got: data.len(),
            }
            .into());
        }

        let mut reader = BitReader::new(&data[..NAL_HEADER_SIZE]);
        if reader.read_bit()? {
            return Err(NalError::ForbiddenBit.into());
        }
        let type_plus1 = reader.read_bits(6)? as u8;
        if type_plus1 == 0 {
            return Err(NalError::InvalidHeader.into());
        }
        let temporal_id = reader.read_bits(3)? as u8;
        // nuh_reserved_zero_5bits
        reader.skip(5)?;
        let extension_flag = reader.read_bit()?;

        Ok(Self {
            nal_unit_type: NalUnitType::from_raw(type_plus1 - 1),
            temporal_id,
            extension_flag,
        })
    }

    /// Write the header.
    pub fn write(&self, writer: &mut BitWriter) -> Result<()> {
        writer.write_bit(false)?;
        writer.write_bits(self.nal_unit_type.to_raw() as u32 + 1, 6)?;
        writer.write_bits(self.temporal_id as u32, 3)?;
        writer.write_bits(0, 5)?;
        writer.write_bit(self.extension_flag)?;
        Ok(())
    }
}

/// Iterator over length-prefixed NAL units in a byte stream.
#[derive(Debug, Clone)]
pub struct NalUnits<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for NalUnits<'a> {
    type Item = Result<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }

        let rest = &self.data[self.pos..];
        if rest.len() < NAL_LENGTH_PREFIX {
            self.pos = self.data.len();
            return Some(Err(EvcError::malformed(format!(
                "truncated NAL length prefix ({} bytes left)",
                rest.len()
            ))));
        }

        let len = LittleEndian::read_u32(rest) as usize;
        let body = &rest[NAL_LENGTH_PREFIX..];
        if len < NAL_HEADER_SIZE || len > body.len() {
            self.pos = self.data.len();
            return Some(Err(EvcError::malformed(format!(
                "NAL unit length {len} with {} bytes available",
                body.len()
            ))));
        }

        self.pos += NAL_LENGTH_PREFIX + len;
        Some(Ok(&body[..len]))
    }
}

/// Split a length-prefixed stream into NAL units.
pub fn split_nal_units(data: &[u8]) -> NalUnits<'_> {
    NalUnits { data, pos: 0 }
}

/// Append a NAL unit with its length prefix.
pub fn write_nal_unit(out: &mut Vec<u8>, nal: &[u8]) {
    let mut prefix = [0u8; NAL_LENGTH_PREFIX];
    LittleEndian::write_u32(&mut prefix, nal.len() as u32);
    out.extend_from_slice(&prefix);
    out.extend_from_slice(nal);
}

/// Slice types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceType {
    /// Bi-predictive slice.
    B = 0,
    /// Predictive slice.
    P = 1,
    /// Intra slice.
    I = 2,
}

impl SliceType {
    /// Create from the raw slice_type value.
    pub fn from_raw(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::B),
            1 => Some(Self::P),
            2 => Some(Self::I),
            _ => None,
        }
    }

    /// Check if this is an intra slice.
    pub fn is_intra(&self) -> bool {
        *self == Self::I
    }

    /// Check if the slice may use list 1.
    pub fn is_b(&self) -> bool {
        *self == Self::B
    }
}

/// Cropping window offsets as coded, in units of two luma samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CropWindow {
    /// Left offset.
    pub left: u32,
    /// Right offset.
    pub right: u32,
    /// Top offset.
    pub top: u32,
    /// Bottom offset.
    pub bottom: u32,
}

impl CropWindow {
    /// Luma samples per coded offset unit.
    pub const UNIT: u32 = 2;

    /// Check whether any offset is set.
    pub fn is_active(&self) -> bool {
        self.left | self.right | self.top | self.bottom != 0
    }

    /// Offsets in luma samples, as (left, right, top, bottom).
    pub fn luma_offsets(&self) -> (usize, usize, usize, usize) {
        let scale = |v: u32| v as usize * Self::UNIT as usize;
        (
            scale(self.left),
            scale(self.right),
            scale(self.top),
            scale(self.bottom),
        )
    }

    /// Check that the window keeps at least one sample of a picture.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        let span = |a: u32, b: u32| (u64::from(a) + u64::from(b)) * u64::from(Self::UNIT);
        span(self.left, self.right) < u64::from(width)
            && span(self.top, self.bottom) < u64::from(height)
    }
}

/// Sequence parameter set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sps {
    /// SPS id.
    pub sps_id: u32,
    /// Profile indicator.
    pub profile_idc: u8,
    /// Level indicator.
    pub level_idc: u8,
    /// Toolset flags (high word).
    pub toolset_idc_h: u32,
    /// Toolset flags (low word).
    pub toolset_idc_l: u32,
    /// Chroma format.
    pub chroma_format: ChromaFormat,
    /// Luma width.
    pub width: u32,
    /// Luma height.
    pub height: u32,
    /// Sample bit depth (luma and chroma).
    pub bit_depth: u8,
    /// log2 of the hierarchical sub-GOP length.
    pub log2_sub_gop_length: u32,
    /// log2 of the reference picture gap (only without sub-GOPs).
    pub log2_ref_pic_gap_length: u32,
    /// Maximum number of reference pictures per list.
    pub max_num_ref_pics: u32,
    /// Output cropping window.
    pub crop: CropWindow,
}

impl Default for Sps {
    fn default() -> Self {
        Self {
            sps_id: 0,
            profile_idc: 0,
            level_idc: 0,
            toolset_idc_h: 0,
            toolset_idc_l: 0,
            chroma_format: ChromaFormat::Yuv420,
            width: 0,
            height: 0,
            bit_depth: 8,
            log2_sub_gop_length: 0,
            log2_ref_pic_gap_length: 0,
            max_num_ref_pics: 1,
            crop: CropWindow::default(),
        }
    }
}

/// Tool flags that must be zero in the baseline profile, in syntax order.
const SPS_TOOL_FLAGS: [&str; 13] = [
    "btt", "suco", "admvp", "eipd", "cm_init", "iqt", "addb", "alf", "htdf", "rpl", "pocs",
    "dquant", "dra",
];

impl Sps {
    /// Parse an SPS from the payload following the NAL header.
    pub fn parse(rbsp: &[u8]) -> Result<Self> {
        let mut reader = BitReader::new(rbsp);

        let sps_id = reader.read_ue()?;
        if sps_id as usize >= MAX_SPS_COUNT {
            return Err(EvcError::malformed(format!("sps_id {sps_id} out of range")));
        }
        let profile_idc = reader.read_u8()?;
        let level_idc = reader.read_u8()?;
        let toolset_idc_h = reader.read_u32()?;
        let toolset_idc_l = reader.read_u32()?;

        let chroma_format_idc = reader.read_ue()?;
        let chroma_format = ChromaFormat::from_idc(chroma_format_idc).ok_or_else(|| {
            EvcError::malformed(format!("chroma_format_idc {chroma_format_idc}"))
        })?;

        let width = reader.read_ue()?;
        let height = reader.read_ue()?;
        if width == 0 || height == 0 || width % 4 != 0 || height % 4 != 0 {
            return Err(EvcError::malformed(format!(
                "picture size {width}x{height} is not a non-zero multiple of 4"
            )));
        }
        if width > MAX_PICTURE_DIM
            || height > MAX_PICTURE_DIM
            || u64::from(width) * u64::from(height) > MAX_LUMA_PICTURE_SIZE
        {
            return Err(EvcError::malformed(format!(
                "picture size {width}x{height} exceeds the largest supported level"
            )));
        }

        let bit_depth_luma = reader.read_ue()? + 8;
        let bit_depth_chroma = reader.read_ue()? + 8;
        if bit_depth_luma > 14 {
            return Err(EvcError::malformed(format!("bit depth {bit_depth_luma}")));
        }
        if bit_depth_chroma != bit_depth_luma {
            return Err(EvcError::unsupported(
                "different luma and chroma bit depths",
            ));
        }

        for name in SPS_TOOL_FLAGS {
            if reader.read_bit()? {
                return Err(EvcError::unsupported(format!("sps_{name}_flag")));
            }
        }

        let log2_sub_gop_length = reader.read_ue()?;
        if log2_sub_gop_length > 5 {
            return Err(EvcError::malformed(format!(
                "log2_sub_gop_length {log2_sub_gop_length}"
            )));
        }
        let log2_ref_pic_gap_length = if log2_sub_gop_length == 0 {
            let v = reader.read_ue()?;
            if v > 5 {
                return Err(EvcError::malformed(format!("log2_ref_pic_gap_length {v}")));
            }
            v
        } else {
            0
        };

        let max_num_ref_pics = reader.read_ue()?;
        if max_num_ref_pics == 0 || max_num_ref_pics as usize > MAX_NUM_REF_PICS {
            return Err(EvcError::unsupported(format!(
                "max_num_ref_pics {max_num_ref_pics}"
            )));
        }

        let mut crop = CropWindow::default();
        if reader.read_bit()? {
            crop.left = reader.read_ue()?;
            crop.right = reader.read_ue()?;
            crop.top = reader.read_ue()?;
            crop.bottom = reader.read_ue()?;
            if !crop.fits(width, height) {
                return Err(EvcError::malformed("cropping window is empty"));
            }
        }

        if chroma_format.has_chroma() && reader.read_bit()? {
            return Err(EvcError::unsupported("chroma QP table"));
        }
        if reader.read_bit()? {
            return Err(EvcError::unsupported("VUI parameters"));
        }
        reader.align_zero()?;

        Ok(Self {
            sps_id,
            profile_idc,
            level_idc,
            toolset_idc_h,
            toolset_idc_l,
            chroma_format,
            width,
            height,
            bit_depth: bit_depth_luma as u8,
            log2_sub_gop_length,
            log2_ref_pic_gap_length,
            max_num_ref_pics,
            crop,
        })
    }

    /// Write the SPS payload (without NAL header).
    pub fn write(&self, writer: &mut BitWriter) -> Result<()> {
        writer.write_ue(self.sps_id)?;
        writer.write_u8(self.profile_idc)?;
        writer.write_u8(self.level_idc)?;
        writer.write_u32(self.toolset_idc_h)?;
        writer.write_u32(self.toolset_idc_l)?;
        writer.write_ue(self.chroma_format.idc())?;
        writer.write_ue(self.width)?;
        writer.write_ue(self.height)?;
        writer.write_ue(self.bit_depth as u32 - 8)?;
        writer.write_ue(self.bit_depth as u32 - 8)?;
        for _ in SPS_TOOL_FLAGS {
            writer.write_bit(false)?;
        }
        writer.write_ue(self.log2_sub_gop_length)?;
        if self.log2_sub_gop_length == 0 {
            writer.write_ue(self.log2_ref_pic_gap_length)?;
        }
        writer.write_ue(self.max_num_ref_pics)?;
        writer.write_bit(self.crop.is_active())?;
        if self.crop.is_active() {
            writer.write_ue(self.crop.left)?;
            writer.write_ue(self.crop.right)?;
            writer.write_ue(self.crop.top)?;
            writer.write_ue(self.crop.bottom)?;
        }
        if self.chroma_format.has_chroma() {
            // chroma_qp_table_present_flag
            writer.write_bit(false)?;
        }
        // vui_parameters_present_flag
        writer.write_bit(false)?;
        writer.align_zero()?;
        Ok(())
    }

    /// Reference picture gap length in POC units (0 when unused).
    pub fn ref_pic_gap_length(&self) -> i32 {
        if self.log2_sub_gop_length == 0 {
            1 << self.log2_ref_pic_gap_length
        } else {
            0
        }
    }

    /// Check whether a new SPS changes the picture geometry or format.
    pub fn same_geometry(&self, other: &Sps) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.chroma_format == other.chroma_format
            && self.bit_depth == other.bit_depth
    }
}

/// Picture parameter set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pps {
    /// PPS id.
    pub pps_id: u32,
    /// Referenced SPS id.
    pub sps_id: u32,
    /// Constrained intra prediction.
    pub constrained_intra_pred: bool,
    /// CU-level delta QP signalling.
    pub cu_qp_delta_enabled: bool,
}

impl Pps {
    /// Parse a PPS from the payload following the NAL header.
    pub fn parse(rbsp: &[u8]) -> Result<Self> {
        let mut reader = BitReader::new(rbsp);

        let pps_id = reader.read_ue()?;
        if pps_id as usize >= MAX_PPS_COUNT {
            return Err(EvcError::malformed(format!("pps_id {pps_id} out of range")));
        }
        let sps_id = reader.read_ue()?;
        if sps_id as usize >= MAX_SPS_COUNT {
            return Err(EvcError::malformed(format!("sps_id {sps_id} out of range")));
        }

        // num_ref_idx_default_active_minus1[0..2], additional_lt_poc_lsb_len
        for _ in 0..3 {
            reader.read_ue()?;
        }
        if reader.read_bit()? {
            return Err(EvcError::unsupported("rpl1_idx_present_flag"));
        }
        if !reader.read_bit()? {
            return Err(EvcError::unsupported("multiple tiles"));
        }
        // tile_id_len_minus1
        reader.read_ue()?;
        if reader.read_bit()? {
            return Err(EvcError::unsupported("explicit_tile_id_flag"));
        }
        if reader.read_bit()? {
            return Err(EvcError::unsupported("pic_dra_enabled_flag"));
        }
        if reader.read_bit()? {
            return Err(EvcError::unsupported("arbitrary_slice_present_flag"));
        }
        let constrained_intra_pred = reader.read_bit()?;
        let cu_qp_delta_enabled = reader.read_bit()?;
        if cu_qp_delta_enabled {
            // cu_qp_delta_area_minus6
            reader.read_ue()?;
        }
        reader.align_zero()?;

        Ok(Self {
            pps_id,
            sps_id,
            constrained_intra_pred,
            cu_qp_delta_enabled,
        })
    }

    /// Write the PPS payload (without NAL header).
    pub fn write(&self, writer: &mut BitWriter) -> Result<()> {
        writer.write_ue(self.pps_id)?;
        writer.write_ue(self.sps_id)?;
        writer.write_ue(0)?;
        writer.write_ue(0)?;
        writer.write_ue(0)?;
        // rpl1_idx_present_flag, single_tile_in_pic_flag
        writer.write_bit(false)?;
        writer.write_bit(true)?;
        writer.write_ue(0)?;
        // explicit_tile_id, pic_dra_enabled, arbitrary_slice_present
        writer.write_bit(false)?;
        writer.write_bit(false)?;
        writer.write_bit(false)?;
        writer.write_bit(self.constrained_intra_pred)?;
        writer.write_bit(self.cu_qp_delta_enabled)?;
        if self.cu_qp_delta_enabled {
            writer.write_ue(0)?;
        }
        writer.align_zero()?;
        Ok(())
    }
}

/// Slice header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceHeader {
    /// Referenced PPS id.
    pub pps_id: u32,
    /// Slice type.
    pub slice_type: SliceType,
    /// IDR only: discard pictures pending output.
    pub no_output_of_prior_pics: bool,
    /// Deblocking filter enabled.
    pub deblocking: bool,
    /// Slice QP.
    pub qp: u8,
    /// Cb QP offset.
    pub qp_cb_offset: i8,
    /// Cr QP offset.
    pub qp_cr_offset: i8,
}

impl SliceHeader {
    /// Parse a slice header; the reader is left byte-aligned at the slice data.
    pub fn parse(reader: &mut BitReader<'_>, is_idr: bool) -> Result<Self> {
        let pps_id = reader.read_ue()?;
        if pps_id as usize >= MAX_PPS_COUNT {
            return Err(EvcError::malformed(format!("pps_id {pps_id} out of range")));
        }
        let raw_type = reader.read_ue()?;
        let slice_type = SliceType::from_raw(raw_type)
            .ok_or_else(|| EvcError::malformed(format!("slice_type {raw_type}")))?;
        if is_idr && slice_type != SliceType::I {
            return Err(EvcError::malformed("IDR picture with an inter slice"));
        }

        let no_output_of_prior_pics = if is_idr { reader.read_bit()? } else { false };
        if !slice_type.is_intra() && reader.read_bit()? {
            return Err(EvcError::unsupported("num_ref_idx_active_override_flag"));
        }

        let deblocking = reader.read_bit()?;
        let qp = reader.read_bits(6)? as u8;
        if qp > MAX_QP {
            return Err(EvcError::malformed(format!("slice qp {qp}")));
        }
        let qp_cb_offset = Self::read_qp_offset(reader)?;
        let qp_cr_offset = Self::read_qp_offset(reader)?;
        reader.align_zero()?;

        Ok(Self {
            pps_id,
            slice_type,
            no_output_of_prior_pics,
            deblocking,
            qp,
            qp_cb_offset,
            qp_cr_offset,
        })
    }

    fn read_qp_offset(reader: &mut BitReader<'_>) -> Result<i8> {
        let v = reader.read_se()?;
        if !(-12..=12).contains(&v) {
            return Err(EvcError::malformed(format!("chroma qp offset {v}")));
        }
        Ok(v as i8)
    }

    /// Write the slice header and align to the slice data.
    pub fn write(&self, writer: &mut BitWriter, is_idr: bool) -> Result<()> {
        writer.write_ue(self.pps_id)?;
        writer.write_ue(self.slice_type as u32)?;
        if is_idr {
            writer.write_bit(self.no_output_of_prior_pics)?;
        }
        if !self.slice_type.is_intra() {
            writer.write_bit(false)?;
        }
        writer.write_bit(self.deblocking)?;
        writer.write_bits(self.qp as u32, 6)?;
        writer.write_se(self.qp_cb_offset as i32)?;
        writer.write_se(self.qp_cr_offset as i32)?;
        writer.align_zero()?;
        Ok(())
    }
}
