//! EVC baseline encoder.
//!
//! Input pictures are pushed in display order and buffered until the GOP
//! planner releases them in coding order. Each call to
//! [`EvcEncoder::encode_step`] codes one picture into one access unit:
//! parameter sets before every IDR, one slice, and optionally a picture
//! signature SEI.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use transcode_core::bitstream::BitWriter;
use transcode_core::{ChromaFormat, ImageBuffer};

use crate::cabac::CabacEncoder;
use crate::cu::CuSyntaxParams;
use crate::diagnostics::Diagnostics;
use crate::dpb::{PictureManager, PutParams};
use crate::error::{codes, EvcError, Result};
use crate::gop::{GopPlanner, PlannedPicture};
use crate::map::CodingMaps;
use crate::mode::{encode_ctu, ModeDecision, RdParams};
use crate::nal::{
    write_nal_unit, CropWindow, NalUnitHeader, NalUnitType, Pps, SliceHeader, SliceType, Sps,
};
use crate::picture::{Picture, PictureLayout, PlanarAllocator, LIST_0, LIST_1};
use crate::poc::PocState;
use crate::recon::{Reconstructor, SliceParams};
use crate::sei::PictureSignature;
use crate::tree::ctu_origins;
use crate::{MAX_LUMA_PICTURE_SIZE, MAX_NUM_REF_PICS, MAX_PB_SIZE, MAX_PICTURE_DIM, MAX_QP};

/// Encoder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvcEncoderConfig {
    /// Picture width in luma samples.
    pub width: u32,
    /// Picture height in luma samples.
    pub height: u32,
    /// Slice QP.
    pub qp: u8,
    /// Lowest QP the encoder may use.
    pub qp_min: u8,
    /// Highest QP the encoder may use.
    pub qp_max: u8,
    /// Cb QP offset.
    pub qp_cb_offset: i8,
    /// Cr QP offset.
    pub qp_cr_offset: i8,
    /// Frame rate.
    pub fps: u32,
    /// Intra period in pictures (0: only the first picture).
    pub i_period: u32,
    /// Consecutive B pictures (0, 1, 3, 7 or 15).
    pub max_b_frames: u32,
    /// Reference pictures per list.
    pub max_num_ref_pics: u32,
    /// Reference picture gap of low-delay streams.
    pub ref_pic_gap_length: u32,
    /// Code every intra picture as IDR.
    pub closed_gop: bool,
    /// Hierarchical B pictures.
    pub hierarchical_gop: bool,
    /// Chroma format.
    pub chroma_format: ChromaFormat,
    /// Sample bit depth.
    pub bit_depth: u8,
    /// Deblocking filter.
    pub deblocking: bool,
    /// Append an MD5 picture signature to every picture.
    pub picture_signature: bool,
    /// Constrained intra prediction.
    pub constrained_intra_pred: bool,
    /// Signal CU QP deltas.
    pub cu_qp_delta: bool,
    /// Integer motion search range in luma samples.
    pub search_range: u32,
    /// Left cropping offset, in units of two luma samples.
    pub crop_left: u32,
    /// Right cropping offset, in units of two luma samples.
    pub crop_right: u32,
    /// Top cropping offset, in units of two luma samples.
    pub crop_top: u32,
    /// Bottom cropping offset, in units of two luma samples.
    pub crop_bottom: u32,
    /// profile_idc written to the SPS.
    pub profile_idc: u8,
    /// level_idc written to the SPS.
    pub level_idc: u8,
}

impl Default for EvcEncoderConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            qp: 32,
            qp_min: 0,
            qp_max: MAX_QP,
            qp_cb_offset: 0,
            qp_cr_offset: 0,
            fps: 30,
            i_period: 16,
            max_b_frames: 7,
            max_num_ref_pics: 2,
            ref_pic_gap_length: 1,
            closed_gop: false,
            hierarchical_gop: true,
            chroma_format: ChromaFormat::Yuv420,
            bit_depth: 8,
            deblocking: false,
            picture_signature: false,
            constrained_intra_pred: false,
            cu_qp_delta: false,
            search_range: 16,
            crop_left: 0,
            crop_right: 0,
            crop_top: 0,
            crop_bottom: 0,
            profile_idc: 0,
            level_idc: 90,
        }
    }
}

impl EvcEncoderConfig {
    /// Create a configuration for the given picture size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    /// Set the slice QP.
    pub fn with_qp(mut self, qp: u8) -> Self {
        self.qp = qp;
        self
    }

    /// Set the chroma QP offsets.
    pub fn with_chroma_qp_offsets(mut self, cb: i8, cr: i8) -> Self {
        self.qp_cb_offset = cb;
        self.qp_cr_offset = cr;
        self
    }

    /// Set the intra period.
    pub fn with_i_period(mut self, i_period: u32) -> Self {
        self.i_period = i_period;
        self
    }

    /// Set the number of consecutive B pictures.
    pub fn with_max_b_frames(mut self, max_b_frames: u32) -> Self {
        self.max_b_frames = max_b_frames;
        self
    }

    /// Set the number of reference pictures per list.
    pub fn with_max_num_ref_pics(mut self, max_num_ref_pics: u32) -> Self {
        self.max_num_ref_pics = max_num_ref_pics;
        self
    }

    /// Set the reference picture gap.
    pub fn with_ref_pic_gap_length(mut self, gap: u32) -> Self {
        self.ref_pic_gap_length = gap;
        self
    }

    /// Enable or disable closed GOPs.
    pub fn with_closed_gop(mut self, closed: bool) -> Self {
        self.closed_gop = closed;
        self
    }

    /// Enable or disable hierarchical B pictures.
    pub fn with_hierarchical_gop(mut self, hierarchical: bool) -> Self {
        self.hierarchical_gop = hierarchical;
        self
    }

    /// Set the chroma format.
    pub fn with_chroma_format(mut self, chroma_format: ChromaFormat) -> Self {
        self.chroma_format = chroma_format;
        self
    }

    /// Set the bit depth.
    pub fn with_bit_depth(mut self, bit_depth: u8) -> Self {
        self.bit_depth = bit_depth;
        self
    }

    /// Enable or disable picture signatures.
    pub fn with_picture_signature(mut self, enabled: bool) -> Self {
        self.picture_signature = enabled;
        self
    }

    /// Enable or disable constrained intra prediction.
    pub fn with_constrained_intra_pred(mut self, enabled: bool) -> Self {
        self.constrained_intra_pred = enabled;
        self
    }

    /// Enable or disable CU QP delta signalling.
    pub fn with_cu_qp_delta(mut self, enabled: bool) -> Self {
        self.cu_qp_delta = enabled;
        self
    }

    /// Set the motion search range.
    pub fn with_search_range(mut self, range: u32) -> Self {
        self.search_range = range;
        self
    }

    /// Set the output cropping window, in units of two luma samples.
    pub fn with_crop(mut self, left: u32, right: u32, top: u32, bottom: u32) -> Self {
        self.crop_left = left;
        self.crop_right = right;
        self.crop_top = top;
        self.crop_bottom = bottom;
        self
    }

    /// Number of pictures per group.
    pub fn gop_size(&self) -> usize {
        self.max_b_frames as usize + 1
    }

    /// QP actually used by the slices.
    pub fn effective_qp(&self) -> u8 {
        self.qp.clamp(self.qp_min, self.qp_max)
    }

    /// Check the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 || self.width % 4 != 0 || self.height % 4 != 0 {
            return Err(EvcError::invalid(format!(
                "picture size {}x{} must be a nonzero multiple of 4",
                self.width, self.height
            )));
        }
        if self.width > MAX_PICTURE_DIM
            || self.height > MAX_PICTURE_DIM
            || u64::from(self.width) * u64::from(self.height) > MAX_LUMA_PICTURE_SIZE
        {
            return Err(EvcError::invalid(format!(
                "picture size {}x{} exceeds the largest supported level",
                self.width, self.height
            )));
        }
        if ![0, 1, 3, 7, 15].contains(&self.max_b_frames) {
            return Err(EvcError::invalid(format!(
                "max_b_frames {} (expected 0, 1, 3, 7 or 15)",
                self.max_b_frames
            )));
        }
        if self.i_period % self.gop_size() as u32 != 0 {
            return Err(EvcError::invalid(format!(
                "i_period {} is not a multiple of the GOP size {}",
                self.i_period,
                self.gop_size()
            )));
        }
        if ![8, 10, 12, 14].contains(&self.bit_depth) {
            return Err(EvcError::invalid(format!("bit depth {}", self.bit_depth)));
        }
        if self.qp > MAX_QP || self.qp_min > self.qp_max || self.qp_max > MAX_QP {
            return Err(EvcError::invalid(format!(
                "qp {} outside {}..={} (maximum {MAX_QP})",
                self.qp, self.qp_min, self.qp_max
            )));
        }
        if !(-12..=12).contains(&self.qp_cb_offset) || !(-12..=12).contains(&self.qp_cr_offset) {
            return Err(EvcError::invalid("chroma qp offsets must lie in -12..=12"));
        }
        if self.max_num_ref_pics == 0 || self.max_num_ref_pics as usize > MAX_NUM_REF_PICS {
            return Err(EvcError::invalid(format!(
                "max_num_ref_pics {} outside 1..={MAX_NUM_REF_PICS}",
                self.max_num_ref_pics
            )));
        }
        if !self.ref_pic_gap_length.is_power_of_two() || self.ref_pic_gap_length > 16 {
            return Err(EvcError::invalid(format!(
                "ref_pic_gap_length {} is not a power of two up to 16",
                self.ref_pic_gap_length
            )));
        }
        if !self.crop_window().fits(self.width, self.height) {
            return Err(EvcError::invalid("cropping window is empty"));
        }
        if self.fps == 0 {
            return Err(EvcError::invalid("fps must be positive"));
        }
        if self.deblocking {
            return Err(EvcError::unsupported("deblocking filter"));
        }
        Ok(())
    }

    fn sps(&self, log2_sub_gop_length: u32) -> Sps {
        Sps {
            sps_id: 0,
            profile_idc: self.profile_idc,
            level_idc: self.level_idc,
            toolset_idc_h: 0,
            toolset_idc_l: 0,
            chroma_format: self.chroma_format,
            width: self.width,
            height: self.height,
            bit_depth: self.bit_depth,
            log2_sub_gop_length,
            log2_ref_pic_gap_length: self.ref_pic_gap_length.ilog2(),
            max_num_ref_pics: self.max_num_ref_pics,
            crop: self.crop_window(),
        }
    }

    fn crop_window(&self) -> CropWindow {
        CropWindow {
            left: self.crop_left,
            right: self.crop_right,
            top: self.crop_top,
            bottom: self.crop_bottom,
        }
    }
}

/// One coded access unit.
#[derive(Debug, Clone)]
pub struct EncodedPicture {
    /// Length-prefixed NAL units.
    pub data: Vec<u8>,
    /// Display index of the source picture.
    pub display: u64,
    /// Picture order count.
    pub poc: i32,
    /// Slice type.
    pub slice_type: SliceType,
    /// Temporal layer id.
    pub temporal_id: u8,
    /// Coded as IDR.
    pub is_idr: bool,
    /// Reconstruction inside the cropping window, as a decoder will output it.
    pub recon: ImageBuffer,
}

/// Result of one encoding step.
#[derive(Debug, Clone)]
pub enum EncodeStatus {
    /// A picture was coded.
    Coded(EncodedPicture),
    /// More input is needed before the next picture can be coded.
    NotAvailableYet,
    /// Every pushed picture has been coded.
    NoMoreFrames,
}

impl EncodeStatus {
    /// Get the numeric return code.
    pub fn code(&self) -> i32 {
        match self {
            EncodeStatus::Coded(_) => codes::OK,
            EncodeStatus::NotAvailableYet => codes::OK_OUT_NOT_AVAILABLE,
            EncodeStatus::NoMoreFrames => codes::OK_NO_MORE_FRM,
        }
    }

    /// Convert into the coded picture, if any.
    pub fn into_picture(self) -> Option<EncodedPicture> {
        match self {
            EncodeStatus::Coded(p) => Some(p),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncoderState {
    Encoding,
    Bumping,
    Finished,
}

#[derive(Debug)]
struct PendingPicture {
    display: u64,
    image: ImageBuffer,
}

/// EVC baseline encoder.
#[derive(Debug)]
pub struct EvcEncoder {
    config: EvcEncoderConfig,
    sps: Sps,
    pps: Pps,
    layout: PictureLayout,
    planner: GopPlanner,
    poc: PocState,
    dpb: PictureManager,
    maps: CodingMaps,
    recon: Reconstructor,
    pending: VecDeque<PendingPicture>,
    planned: VecDeque<PlannedPicture>,
    pushed: u64,
    last_intra_poc: i32,
    state: EncoderState,
    diagnostics: Diagnostics,
}

impl EvcEncoder {
    /// Create an encoder.
    pub fn new(config: EvcEncoderConfig) -> Result<Self> {
        config.validate()?;

        let planner = GopPlanner::new(
            config.gop_size(),
            config.i_period as u64,
            config.closed_gop,
            config.hierarchical_gop,
        );
        let sps = config.sps(planner.log2_sub_gop_length());
        let pps = Pps {
            pps_id: 0,
            sps_id: 0,
            constrained_intra_pred: config.constrained_intra_pred,
            cu_qp_delta_enabled: config.cu_qp_delta,
        };
        let layout = PictureLayout {
            width: config.width as usize,
            height: config.height as usize,
            chroma_format: config.chroma_format,
            bit_depth: config.bit_depth,
        };
        let mut dpb = PictureManager::new(
            MAX_PB_SIZE,
            config.max_num_ref_pics as usize,
            layout,
            Box::new(PlanarAllocator::new()),
        )?;
        dpb.set_ref_pic_gap(sps.ref_pic_gap_length());

        debug!(
            width = config.width,
            height = config.height,
            gop_size = config.gop_size(),
            log2_sub_gop = sps.log2_sub_gop_length,
            qp = config.effective_qp(),
            "encoder created"
        );

        Ok(Self {
            poc: PocState::new(sps.log2_sub_gop_length),
            maps: CodingMaps::new(layout.width, layout.height),
            recon: Reconstructor::new(config.bit_depth),
            config,
            sps,
            pps,
            layout,
            planner,
            dpb,
            pending: VecDeque::new(),
            planned: VecDeque::new(),
            pushed: 0,
            last_intra_poc: 0,
            state: EncoderState::Encoding,
            diagnostics: Diagnostics::default(),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &EvcEncoderConfig {
        &self.config
    }

    /// Get the sequence parameter set written before every IDR.
    pub fn sps(&self) -> &Sps {
        &self.sps
    }

    /// Get the coding statistics.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Number of pushed pictures not yet coded.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Queue the next input picture in display order.
    pub fn push(&mut self, image: ImageBuffer) -> Result<()> {
        if self.state != EncoderState::Encoding {
            return Err(EvcError::invalid("picture pushed after flush"));
        }
        if image.width != self.layout.width
            || image.height != self.layout.height
            || image.chroma_format != self.layout.chroma_format
            || image.bit_depth != self.layout.bit_depth
        {
            return Err(EvcError::invalid(format!(
                "input {}x{} {:?} {}-bit does not match the configured {}x{} {:?} {}-bit",
                image.width,
                image.height,
                image.chroma_format,
                image.bit_depth,
                self.layout.width,
                self.layout.height,
                self.layout.chroma_format,
                self.layout.bit_depth
            )));
        }
        self.pending.push_back(PendingPicture {
            display: self.pushed,
            image,
        });
        self.pushed += 1;
        Ok(())
    }

    /// Signal the end of input. Buffered pictures are coded by the
    /// following steps.
    pub fn flush(&mut self) {
        if self.state == EncoderState::Encoding {
            self.state = EncoderState::Bumping;
        }
    }

    /// Code the next picture in coding order.
    #[instrument(level = "trace", skip(self), fields(pending = self.pending.len()))]
    pub fn encode_step(&mut self) -> Result<EncodeStatus> {
        if self.state == EncoderState::Finished {
            return Ok(EncodeStatus::NoMoreFrames);
        }

        if self.planned.is_empty() {
            let flushing = self.state == EncoderState::Bumping;
            let batch = self.planner.plan(self.pending.len(), flushing);
            if batch.is_empty() {
                if flushing {
                    self.state = EncoderState::Finished;
                    return Ok(EncodeStatus::NoMoreFrames);
                }
                return Ok(EncodeStatus::NotAvailableYet);
            }
            self.planned.extend(batch);
        }

        let Some(planned) = self.planned.pop_front() else {
            return Ok(EncodeStatus::NotAvailableYet);
        };
        let idx = self
            .pending
            .iter()
            .position(|p| p.display == planned.display)
            .ok_or_else(|| {
                EvcError::unexpected(format!("picture {} is not buffered", planned.display))
            })?;
        let source = self
            .pending
            .remove(idx)
            .ok_or_else(|| EvcError::unexpected("pending queue changed"))?;

        let coded = self.encode_picture(&planned, &source.image)?;
        Ok(EncodeStatus::Coded(coded))
    }

    /// Lazily code every remaining picture that can be coded now.
    ///
    /// After [`EvcEncoder::flush`] this drains the encoder.
    pub fn packets(&mut self) -> Packets<'_> {
        Packets { encoder: self }
    }

    fn encode_picture(
        &mut self,
        planned: &PlannedPicture,
        org: &ImageBuffer,
    ) -> Result<EncodedPicture> {
        let tid = planned.temporal_id;
        let poc = self.poc.next(planned.is_idr, tid)?;
        if planned.slice_type == SliceType::I {
            self.last_intra_poc = poc;
        }
        self.dpb
            .init_ref_lists(planned.slice_type, poc, self.last_intra_poc, tid)?;
        debug!(
            display = planned.display,
            poc,
            tid,
            slice_type = ?planned.slice_type,
            is_idr = planned.is_idr,
            "encoding picture"
        );

        let mut out = Vec::new();
        if planned.is_idr {
            let mut writer = BitWriter::new();
            NalUnitHeader::new(NalUnitType::Sps, 0).write(&mut writer)?;
            self.sps.write(&mut writer)?;
            write_nal_unit(&mut out, writer.data());

            let mut writer = BitWriter::new();
            NalUnitHeader::new(NalUnitType::Pps, 0).write(&mut writer)?;
            self.pps.write(&mut writer)?;
            write_nal_unit(&mut out, writer.data());
            self.diagnostics.nal_units += 2;
        }

        let mut pic = self.dpb.get_empty()?;
        let slice = match self.encode_slice(planned, poc, org, &mut pic) {
            Ok(slice) => slice,
            Err(e) => {
                self.dpb.return_unused(pic)?;
                return Err(e);
            }
        };
        write_nal_unit(&mut out, &slice);
        self.diagnostics.nal_units += 1;

        if self.config.picture_signature {
            let mut writer = BitWriter::new();
            NalUnitHeader::new(NalUnitType::Sei, tid).write(&mut writer)?;
            PictureSignature::compute(&pic.image).write(&mut writer)?;
            write_nal_unit(&mut out, writer.data());
            self.diagnostics.nal_units += 1;
        }

        let (left, right, top, bottom) = self.sps.crop.luma_offsets();
        let recon = pic.image.crop(left, right, top, bottom)?;

        self.dpb.put(
            pic,
            PutParams {
                poc,
                temporal_id: tid,
                slice_type: planned.slice_type,
                is_idr: planned.is_idr,
                is_ref: planned.is_ref,
                need_for_out: false,
                no_output_of_prior_pics: false,
            },
        )?;
        self.diagnostics.pictures += 1;

        Ok(EncodedPicture {
            data: out,
            display: planned.display,
            poc,
            slice_type: planned.slice_type,
            temporal_id: tid,
            is_idr: planned.is_idr,
            recon,
        })
    }

    /// Code the slice NAL unit of one picture into the leased `pic`.
    fn encode_slice(
        &mut self,
        planned: &PlannedPicture,
        poc: i32,
        org: &ImageBuffer,
        pic: &mut Picture,
    ) -> Result<Vec<u8>> {
        let qp = self.config.effective_qp();
        let header = SliceHeader {
            pps_id: self.pps.pps_id,
            slice_type: planned.slice_type,
            no_output_of_prior_pics: false,
            deblocking: false,
            qp,
            qp_cb_offset: self.config.qp_cb_offset,
            qp_cr_offset: self.config.qp_cr_offset,
        };

        let Self {
            dpb,
            maps,
            recon,
            diagnostics,
            config,
            pps,
            layout,
            ..
        } = self;
        let refs = dpb.ref_lists();
        let slice = SliceParams {
            slice_type: planned.slice_type,
            poc,
            chroma_format: layout.chroma_format,
            bit_depth: layout.bit_depth,
            constrained_intra_pred: pps.constrained_intra_pred,
            qp_cb_offset: config.qp_cb_offset as i32,
            qp_cr_offset: config.qp_cr_offset as i32,
            refs,
        };
        let params = RdParams {
            slice,
            syntax: CuSyntaxParams {
                slice_type: planned.slice_type,
                num_refs: [refs.len(LIST_0), refs.len(LIST_1)],
                cu_qp_delta: pps.cu_qp_delta_enabled,
                chroma_format: layout.chroma_format,
            },
            qp,
            search_range: config.search_range,
        };

        let (image, motion) = pic.buffers_mut()?;
        maps.reset();
        let mut enc = CabacEncoder::new();
        let mut qp_prev = qp;
        for (x0, y0) in ctu_origins(layout.width, layout.height) {
            let leaves = {
                let mut md = ModeDecision::new(params, org, &mut *image, &mut *maps, &mut *recon);
                md.decide_ctu(&enc, x0, y0)?
            };
            encode_ctu(
                &mut enc,
                recon,
                image,
                maps,
                &params,
                &mut qp_prev,
                diagnostics,
                leaves,
                x0,
                y0,
            )?;
        }
        enc.encode_terminate(true);
        enc.finish();
        diagnostics.bins += enc.bins();
        motion.clone_from(maps.motion());

        let is_idr = planned.is_idr;
        let nal_type = if is_idr {
            NalUnitType::Idr
        } else {
            NalUnitType::NonIdr
        };
        let data = enc.into_data();
        let mut writer = BitWriter::with_capacity(data.len() + 16);
        NalUnitHeader::new(nal_type, planned.temporal_id).write(&mut writer)?;
        header.write(&mut writer, is_idr)?;
        writer.write_bytes(&data)?;
        Ok(writer.into_data())
    }
}

/// Iterator over coded access units, see [`EvcEncoder::packets`].
#[derive(Debug)]
pub struct Packets<'a> {
    encoder: &'a mut EvcEncoder,
}

impl Iterator for Packets<'_> {
    type Item = Result<EncodedPicture>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.encoder.encode_step() {
            Ok(EncodeStatus::Coded(picture)) => Some(Ok(picture)),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(width: usize, height: usize, value: u16) -> ImageBuffer {
        ImageBuffer::filled(width, height, ChromaFormat::Yuv420, 8, value)
    }

    #[test]
    fn test_config_builder() {
        let config = EvcEncoderConfig::new(64, 32)
            .with_qp(27)
            .with_max_b_frames(3)
            .with_i_period(8)
            .with_search_range(4);
        assert_eq!(config.width, 64);
        assert_eq!(config.gop_size(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(EvcEncoderConfig::default().validate().is_err());
        assert!(EvcEncoderConfig::new(66, 64).validate().is_err());
        assert!(EvcEncoderConfig::new(64, 64).with_max_b_frames(2).validate().is_err());
        assert!(EvcEncoderConfig::new(64, 64)
            .with_max_b_frames(3)
            .with_i_period(6)
            .validate()
            .is_err());
        assert!(EvcEncoderConfig::new(64, 64).with_bit_depth(9).validate().is_err());
        assert!(EvcEncoderConfig::new(64, 64).with_qp(52).validate().is_err());
        assert!(EvcEncoderConfig::new(64, 64).with_max_num_ref_pics(0).validate().is_err());
        assert!(EvcEncoderConfig::new(64, 64).with_ref_pic_gap_length(3).validate().is_err());
        assert!(EvcEncoderConfig::new(1 << 20, 1 << 20).validate().is_err());
        assert!(EvcEncoderConfig::new(8192, 4320).validate().is_ok());
        assert!(EvcEncoderConfig::new(64, 64).with_crop(16, 16, 0, 0).validate().is_err());
        assert!(EvcEncoderConfig::new(64, 64).with_crop(15, 16, 0, 0).validate().is_ok());
        let err = EvcEncoderConfig {
            deblocking: true,
            ..EvcEncoderConfig::new(64, 64)
        }
        .validate()
        .unwrap_err();
        assert_eq!(err.code(), codes::ERR_UNSUPPORTED);
    }

    #[test]
    fn test_effective_qp_is_clamped() {
        let config = EvcEncoderConfig {
            qp_min: 30,
            ..EvcEncoderConfig::new(64, 64).with_qp(22)
        };
        assert_eq!(config.effective_qp(), 30);
    }

    #[test]
    fn test_push_rejects_mismatched_input() {
        let mut encoder = EvcEncoder::new(EvcEncoderConfig::new(16, 16)).unwrap();
        assert!(encoder.push(flat(32, 16, 0)).is_err());
        encoder.push(flat(16, 16, 0)).unwrap();
        encoder.flush();
        assert!(encoder.push(flat(16, 16, 0)).is_err());
    }

    #[test]
    fn test_hierarchical_waits_for_group() {
        let config = EvcEncoderConfig::new(16, 16)
            .with_max_b_frames(3)
            .with_i_period(0)
            .with_search_range(2);
        let mut encoder = EvcEncoder::new(config).unwrap();
        for _ in 0..3 {
            encoder.push(flat(16, 16, 100)).unwrap();
        }

        let first = encoder.encode_step().unwrap().into_picture().unwrap();
        assert!(first.is_idr);
        assert_eq!(first.poc, 0);
        let status = encoder.encode_step().unwrap();
        assert_eq!(status.code(), codes::OK_OUT_NOT_AVAILABLE);

        encoder.flush();
        let rest: Vec<EncodedPicture> = encoder.packets().collect::<Result<_>>().unwrap();
        assert_eq!(rest.len(), 2);
        assert!(rest.iter().all(|p| p.temporal_id == 0 && p.slice_type == SliceType::B));
        assert_eq!(encoder.encode_step().unwrap().code(), codes::OK_NO_MORE_FRM);
        assert_eq!(encoder.diagnostics().pictures, 3);
    }

    #[test]
    fn test_idr_carries_parameter_sets() {
        let config = EvcEncoderConfig::new(16, 16)
            .with_max_b_frames(0)
            .with_i_period(1)
            .with_picture_signature(true);
        let mut encoder = EvcEncoder::new(config).unwrap();
        encoder.push(flat(16, 16, 60)).unwrap();
        encoder.push(flat(16, 16, 60)).unwrap();
        let first = encoder.encode_step().unwrap().into_picture().unwrap();
        let types: Vec<NalUnitType> = crate::nal::split_nal_units(&first.data)
            .map(|nal| NalUnitHeader::parse(nal.unwrap()).unwrap().nal_unit_type)
            .collect();
        assert_eq!(
            types,
            vec![NalUnitType::Sps, NalUnitType::Pps, NalUnitType::Idr, NalUnitType::Sei]
        );
        assert_eq!(first.recon.width, 16);

        let second = encoder.encode_step().unwrap().into_picture().unwrap();
        assert_eq!(second.slice_type, SliceType::I);
        assert!(!second.is_idr);
        assert_eq!(second.poc, 1);
        let first_type = NalUnitHeader::parse(&second.data[4..]).unwrap().nal_unit_type;
        assert_eq!(first_type, NalUnitType::NonIdr);
    }
}
