//! EVC baseline decoder.
//!
//! NAL units are fed one at a time through [`EvcDecoder::decode_nal`].
//! Decoded pictures enter the picture manager and leave it in output order
//! through [`EvcDecoder::pull`].

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};
use transcode_core::bitstream::BitReader;
use transcode_core::ImageBuffer;

use crate::cabac::CabacDecoder;
use crate::cu::CuSyntaxParams;
use crate::diagnostics::Diagnostics;
use crate::dpb::{OutputStatus, PictureManager, PutParams};
use crate::error::{codes, EvcError, Result};
use crate::map::CodingMaps;
use crate::nal::{
    split_nal_units, NalUnitHeader, NalUnitType, Pps, SliceHeader, SliceType, Sps,
    NAL_HEADER_SIZE,
};
use crate::picture::{Picture, PictureLayout, PlanarAllocator, LIST_0, LIST_1};
use crate::poc::{is_reference_layer, PocState};
use crate::recon::{Reconstructor, SliceParams};
use crate::sei::PictureSignature;
use crate::tree::{ctu_origins, decode_ctu};
use crate::{MAX_PB_SIZE, MAX_PPS_COUNT, MAX_SPS_COUNT};

/// Decoder configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvcDecoderConfig {
    /// Hash every decoded picture and compare it with signature SEIs.
    pub check_signature: bool,
    /// Treat a signature mismatch as a bitstream error instead of a warning.
    pub verify_signature: bool,
    /// Picture buffer capacity.
    pub picture_buffer_size: usize,
}

impl Default for EvcDecoderConfig {
    fn default() -> Self {
        Self {
            check_signature: true,
            verify_signature: false,
            picture_buffer_size: MAX_PB_SIZE,
        }
    }
}

impl EvcDecoderConfig {
    /// Enable or disable signature checking.
    pub fn with_check_signature(mut self, enabled: bool) -> Self {
        self.check_signature = enabled;
        self
    }

    /// Fail on signature mismatches. Implies checking.
    pub fn with_verify_signature(mut self, enabled: bool) -> Self {
        self.verify_signature = enabled;
        if enabled {
            self.check_signature = true;
        }
        self
    }

    /// Set the picture buffer capacity.
    pub fn with_picture_buffer_size(mut self, size: usize) -> Self {
        self.picture_buffer_size = size;
        self
    }

    /// Check the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.picture_buffer_size == 0 || self.picture_buffer_size > MAX_PB_SIZE {
            return Err(EvcError::invalid(format!(
                "picture buffer size {} outside 1..={MAX_PB_SIZE}",
                self.picture_buffer_size
            )));
        }
        if self.verify_signature && !self.check_signature {
            return Err(EvcError::invalid("verify_signature requires check_signature"));
        }
        Ok(())
    }
}

/// Outcome of decoding one NAL unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// The NAL unit was consumed without producing a picture.
    Consumed,
    /// A picture was decoded.
    PictureDecoded {
        /// Picture order count.
        poc: i32,
        /// Slice type.
        slice_type: SliceType,
    },
    /// A new SPS changed the picture geometry.
    ResolutionChanged,
}

impl DecodeStatus {
    /// Get the numeric return code.
    pub fn code(&self) -> i32 {
        match self {
            DecodeStatus::Consumed | DecodeStatus::PictureDecoded { .. } => codes::OK,
            DecodeStatus::ResolutionChanged => codes::OK_DIM_CHANGED,
        }
    }
}

/// A picture released in output order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPicture {
    /// Samples inside the cropping window.
    pub image: ImageBuffer,
    /// Picture order count.
    pub poc: i32,
    /// Temporal layer id.
    pub temporal_id: u8,
    /// Slice type.
    pub slice_type: SliceType,
}

/// State that lives as long as one active SPS geometry.
#[derive(Debug)]
struct Sequence {
    sps: Sps,
    dpb: PictureManager,
    maps: CodingMaps,
    recon: Reconstructor,
    poc: PocState,
    last_intra_poc: i32,
}

impl Sequence {
    fn new(sps: Sps, capacity: usize) -> Result<Self> {
        let layout = PictureLayout {
            width: sps.width as usize,
            height: sps.height as usize,
            chroma_format: sps.chroma_format,
            bit_depth: sps.bit_depth,
        };
        let mut dpb = PictureManager::new(
            capacity,
            sps.max_num_ref_pics as usize,
            layout,
            Box::new(PlanarAllocator::new()),
        )?;
        dpb.set_ref_pic_gap(sps.ref_pic_gap_length());
        Ok(Self {
            dpb,
            maps: CodingMaps::new(layout.width, layout.height),
            recon: Reconstructor::new(sps.bit_depth),
            poc: PocState::new(sps.log2_sub_gop_length),
            last_intra_poc: 0,
            sps,
        })
    }

    fn to_output(&self, pic: Picture) -> Result<DecodedPicture> {
        let (left, right, top, bottom) = self.sps.crop.luma_offsets();
        let image = pic.image.crop(left, right, top, bottom)?;
        Ok(DecodedPicture {
            image,
            poc: pic.poc,
            temporal_id: pic.temporal_id,
            slice_type: pic.slice_type,
        })
    }
}

/// EVC baseline decoder.
#[derive(Debug)]
pub struct EvcDecoder {
    config: EvcDecoderConfig,
    sps: Vec<Option<Sps>>,
    pps: Vec<Option<Pps>>,
    seq: Option<Sequence>,
    drained: VecDeque<DecodedPicture>,
    last_signature: Option<PictureSignature>,
    diagnostics: Diagnostics,
}

impl EvcDecoder {
    /// Create a decoder.
    pub fn new(config: EvcDecoderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            sps: vec![None; MAX_SPS_COUNT],
            pps: vec![None; MAX_PPS_COUNT],
            seq: None,
            drained: VecDeque::new(),
            last_signature: None,
            diagnostics: Diagnostics::default(),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &EvcDecoderConfig {
        &self.config
    }

    /// Get the active SPS.
    pub fn active_sps(&self) -> Option<&Sps> {
        self.seq.as_ref().map(|s| &s.sps)
    }

    /// Get the decoding statistics.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Decode one NAL unit (without its length prefix).
    #[instrument(level = "trace", skip(self, nal), fields(len = nal.len()))]
    pub fn decode_nal(&mut self, nal: &[u8]) -> Result<DecodeStatus> {
        let header = NalUnitHeader::parse(nal)?;
        let rbsp = &nal[NAL_HEADER_SIZE..];
        self.diagnostics.nal_units += 1;

        match header.nal_unit_type {
            NalUnitType::Sps => self.decode_sps(rbsp),
            NalUnitType::Pps => {
                let pps = Pps::parse(rbsp)?;
                debug!(pps_id = pps.pps_id, sps_id = pps.sps_id, "PPS");
                let id = pps.pps_id as usize;
                self.pps[id] = Some(pps);
                Ok(DecodeStatus::Consumed)
            }
            NalUnitType::Idr | NalUnitType::NonIdr => self.decode_slice(&header, rbsp),
            NalUnitType::Sei => {
                self.decode_sei(rbsp)?;
                Ok(DecodeStatus::Consumed)
            }
            other => {
                warn!(nal_unit_type = other.to_raw(), "ignoring NAL unit");
                Ok(DecodeStatus::Consumed)
            }
        }
    }

    /// Decode every NAL unit of a length-prefixed stream and collect the
    /// pictures that become available for output, flushing at the end.
    pub fn decode_stream(&mut self, data: &[u8]) -> Result<Vec<DecodedPicture>> {
        let mut out = Vec::new();
        for nal in split_nal_units(data) {
            self.decode_nal(nal?)?;
            while let OutputStatus::Picture(pic) = self.pull()? {
                out.push(pic);
            }
        }
        self.flush();
        while let OutputStatus::Picture(pic) = self.pull()? {
            out.push(pic);
        }
        Ok(out)
    }

    fn decode_sps(&mut self, rbsp: &[u8]) -> Result<DecodeStatus> {
        let sps = Sps::parse(rbsp)?;
        debug!(
            sps_id = sps.sps_id,
            width = sps.width,
            height = sps.height,
            log2_sub_gop = sps.log2_sub_gop_length,
            "SPS"
        );
        let id = sps.sps_id as usize;
        self.sps[id] = Some(sps.clone());

        let capacity = self.config.picture_buffer_size;
        match self.seq.as_mut() {
            Some(seq) if seq.sps.same_geometry(&sps) => {
                seq.sps = sps;
                seq.dpb.set_ref_pic_gap(seq.sps.ref_pic_gap_length());
                Ok(DecodeStatus::Consumed)
            }
            Some(_) => {
                self.drain_sequence()?;
                self.seq = Some(Sequence::new(sps, capacity)?);
                Ok(DecodeStatus::ResolutionChanged)
            }
            None => {
                self.seq = Some(Sequence::new(sps, capacity)?);
                Ok(DecodeStatus::Consumed)
            }
        }
    }

    /// Move every pending picture of the active sequence to the drain queue.
    fn drain_sequence(&mut self) -> Result<()> {
        if let Some(mut seq) = self.seq.take() {
            seq.dpb.flush();
            while let OutputStatus::Picture(pic) = seq.dpb.output() {
                let out = seq.to_output(pic)?;
                self.drained.push_back(out);
            }
            seq.dpb.deinit();
        }
        Ok(())
    }

    fn decode_slice(&mut self, header: &NalUnitHeader, rbsp: &[u8]) -> Result<DecodeStatus> {
        let is_idr = header.nal_unit_type.is_idr();
        let tid = header.temporal_id;
        let mut reader = BitReader::new(rbsp);
        let sh = SliceHeader::parse(&mut reader, is_idr)?;

        let pps = self
            .pps
            .get(sh.pps_id as usize)
            .cloned()
            .flatten()
            .ok_or_else(|| {
                EvcError::malformed(format!("slice refers to missing PPS {}", sh.pps_id))
            })?;
        let Some(seq) = self.seq.as_mut() else {
            return Err(EvcError::malformed("slice before any SPS"));
        };
        if pps.sps_id != seq.sps.sps_id {
            return Err(EvcError::malformed(format!(
                "PPS {} refers to inactive SPS {}",
                pps.pps_id, pps.sps_id
            )));
        }
        if sh.deblocking {
            return Err(EvcError::unsupported("deblocking filter"));
        }
        if is_idr && tid != 0 {
            return Err(EvcError::malformed(format!("IDR picture with temporal id {tid}")));
        }

        if is_idr {
            seq.poc = PocState::new(seq.sps.log2_sub_gop_length);
        }
        let poc = seq.poc.next(is_idr, tid)?;
        let is_ref = is_reference_layer(tid, seq.sps.log2_sub_gop_length);
        if sh.slice_type == SliceType::I {
            seq.last_intra_poc = poc;
        }
        seq.dpb
            .init_ref_lists(sh.slice_type, poc, seq.last_intra_poc, tid)?;
        debug!(poc, tid, slice_type = ?sh.slice_type, is_ref, "decoding slice");

        let data = reader.remaining_bytes()?;
        let mut pic = seq.dpb.get_empty()?;
        let decoded = Self::decode_slice_data(
            seq,
            &sh,
            &pps,
            poc,
            data,
            &mut pic,
            &mut self.diagnostics,
        );
        if let Err(e) = decoded {
            seq.dpb.return_unused(pic)?;
            return Err(e);
        }

        self.last_signature = if self.config.check_signature {
            Some(PictureSignature::compute(&pic.image))
        } else {
            None
        };

        seq.dpb.put(
            pic,
            PutParams {
                poc,
                temporal_id: tid,
                slice_type: sh.slice_type,
                is_idr,
                is_ref,
                need_for_out: true,
                no_output_of_prior_pics: sh.no_output_of_prior_pics,
            },
        )?;
        self.diagnostics.pictures += 1;
        Ok(DecodeStatus::PictureDecoded {
            poc,
            slice_type: sh.slice_type,
        })
    }

    fn decode_slice_data(
        seq: &mut Sequence,
        sh: &SliceHeader,
        pps: &Pps,
        poc: i32,
        data: &[u8],
        pic: &mut Picture,
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        let refs = seq.dpb.ref_lists();
        let slice = SliceParams {
            slice_type: sh.slice_type,
            poc,
            chroma_format: seq.sps.chroma_format,
            bit_depth: seq.sps.bit_depth,
            constrained_intra_pred: pps.constrained_intra_pred,
            qp_cb_offset: sh.qp_cb_offset as i32,
            qp_cr_offset: sh.qp_cr_offset as i32,
            refs,
        };
        let syntax = CuSyntaxParams {
            slice_type: sh.slice_type,
            num_refs: [refs.len(LIST_0), refs.len(LIST_1)],
            cu_qp_delta: pps.cu_qp_delta_enabled,
            chroma_format: seq.sps.chroma_format,
        };

        let (image, motion) = pic.buffers_mut()?;
        seq.maps.reset();
        let mut dec = CabacDecoder::new(data)?;
        let mut qp_prev = sh.qp;
        let (width, height) = (seq.maps.width, seq.maps.height);
        for (x0, y0) in ctu_origins(width, height) {
            decode_ctu(
                &mut dec,
                &mut seq.recon,
                image,
                &mut seq.maps,
                &syntax,
                &slice,
                &mut qp_prev,
                diagnostics,
                x0,
                y0,
            )?;
        }
        if !dec.decode_terminate()? {
            return Err(EvcError::malformed("missing end-of-slice bin"));
        }
        trace!(poc, "slice data decoded");
        motion.clone_from(seq.maps.motion());
        Ok(())
    }

    fn decode_sei(&mut self, rbsp: &[u8]) -> Result<()> {
        let num_planes = self
            .seq
            .as_ref()
            .map_or(3, |s| s.sps.chroma_format.num_planes());
        let Some(signature) = PictureSignature::parse(rbsp, num_planes)? else {
            return Ok(());
        };
        let Some(expected) = self.last_signature.as_ref() else {
            if self.config.check_signature {
                warn!("picture signature without a decoded picture");
            }
            return Ok(());
        };
        if *expected != signature {
            self.diagnostics.signature_mismatches += 1;
            if self.config.verify_signature {
                return Err(EvcError::malformed("picture signature mismatch"));
            }
            warn!("picture signature mismatch");
        }
        Ok(())
    }

    /// Release the next picture in output order.
    pub fn pull(&mut self) -> Result<OutputStatus<DecodedPicture>> {
        if let Some(pic) = self.drained.pop_front() {
            return Ok(OutputStatus::Picture(pic));
        }
        let Some(seq) = self.seq.as_mut() else {
            return Ok(OutputStatus::NoMoreFrames);
        };
        match seq.dpb.output() {
            OutputStatus::Picture(pic) => Ok(OutputStatus::Picture(seq.to_output(pic)?)),
            OutputStatus::FrameDelayed => Ok(OutputStatus::FrameDelayed),
            OutputStatus::NoMoreFrames => Ok(OutputStatus::NoMoreFrames),
        }
    }

    /// Switch output to bumping: every pending picture becomes available.
    pub fn flush(&mut self) {
        if let Some(seq) = self.seq.as_mut() {
            seq.dpb.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transcode_core::bitstream::BitWriter;

    fn nal(nal_unit_type: NalUnitType, payload: impl FnOnce(&mut BitWriter)) -> Vec<u8> {
        let mut writer = BitWriter::new();
        NalUnitHeader::new(nal_unit_type, 0).write(&mut writer).unwrap();
        payload(&mut writer);
        writer.into_data()
    }

    fn sps(width: u32, height: u32) -> Vec<u8> {
        let sps = Sps {
            width,
            height,
            ..Sps::default()
        };
        nal(NalUnitType::Sps, |w| sps.write(w).unwrap())
    }

    #[test]
    fn test_config_validation() {
        assert!(EvcDecoderConfig::default().validate().is_ok());
        assert!(EvcDecoderConfig::default()
            .with_picture_buffer_size(0)
            .validate()
            .is_err());
        let config = EvcDecoderConfig::default()
            .with_check_signature(false)
            .with_verify_signature(true);
        assert!(config.check_signature);
    }

    #[test]
    fn test_resolution_change() {
        let mut decoder = EvcDecoder::new(EvcDecoderConfig::default()).unwrap();
        assert_eq!(decoder.decode_nal(&sps(64, 64)).unwrap(), DecodeStatus::Consumed);
        assert_eq!(decoder.decode_nal(&sps(64, 64)).unwrap(), DecodeStatus::Consumed);
        let status = decoder.decode_nal(&sps(32, 64)).unwrap();
        assert_eq!(status, DecodeStatus::ResolutionChanged);
        assert_eq!(status.code(), codes::OK_DIM_CHANGED);
        assert_eq!(decoder.active_sps().unwrap().width, 32);
    }

    #[test]
    fn test_slice_without_parameter_sets() {
        let mut decoder = EvcDecoder::new(EvcDecoderConfig::default()).unwrap();
        let header = SliceHeader {
            pps_id: 0,
            slice_type: SliceType::I,
            no_output_of_prior_pics: false,
            deblocking: false,
            qp: 30,
            qp_cb_offset: 0,
            qp_cr_offset: 0,
        };
        let slice = nal(NalUnitType::Idr, |w| header.write(w, true).unwrap());
        let err = decoder.decode_nal(&slice).unwrap_err();
        assert!(err.is_bitstream_error());
    }

    #[test]
    fn test_unknown_nal_is_ignored() {
        let mut decoder = EvcDecoder::new(EvcDecoderConfig::default()).unwrap();
        let filler = nal(NalUnitType::FillerData, |w| w.write_u8(0xff).unwrap());
        assert_eq!(decoder.decode_nal(&filler).unwrap(), DecodeStatus::Consumed);
        assert_eq!(decoder.pull().unwrap(), OutputStatus::NoMoreFrames);
        assert_eq!(decoder.diagnostics().nal_units, 1);
    }
}
