//! Integration tests for the EVC codec.
//!
//! Every round trip encodes a short sequence, decodes the produced stream
//! and checks that the decoder outputs exactly the encoder's
//! reconstruction, in display order.

use pretty_assertions::assert_eq;
use tracing_subscriber::EnvFilter;
use transcode_core::{BitWriter, ChromaFormat, ImageBuffer};
use transcode_evc::{
    codes, split_nal_units, write_nal_unit, DecodeStatus, DecodedPicture, EncodeStatus,
    EncodedPicture, EvcDecoder, EvcDecoderConfig, EvcEncoder, EvcEncoderConfig, NalUnitHeader,
    NalUnitType, OutputStatus, SliceType, Sps,
};

// ============================================================================
// Helpers
// ============================================================================

/// Route codec logs to the test output; `RUST_LOG=transcode_evc=debug`
/// shows picture decisions.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A diagonal pattern that moves two luma samples to the right per frame.
fn moving_pattern(config: &EvcEncoderConfig, frame: usize) -> ImageBuffer {
    let mut image = ImageBuffer::new(
        config.width as usize,
        config.height as usize,
        config.chroma_format,
        config.bit_depth,
    );
    let shift = config.bit_depth - 8;
    for c in 0..image.num_planes() {
        let plane = image.plane_mut(c);
        for y in 0..plane.height {
            for x in 0..plane.width {
                let v = ((x + 2 * frame) * 6 + y * 3 + c * 40) % 180 + 30;
                plane.set(x, y, (v as u16) << shift);
            }
        }
    }
    image
}

fn encode(config: &EvcEncoderConfig, frames: usize) -> (Vec<u8>, Vec<EncodedPicture>) {
    init_tracing();
    let mut encoder = EvcEncoder::new(config.clone()).unwrap();
    for i in 0..frames {
        encoder.push(moving_pattern(config, i)).unwrap();
    }
    encoder.flush();

    let mut stream = Vec::new();
    let mut coded = Vec::new();
    for picture in encoder.packets() {
        let picture = picture.unwrap();
        stream.extend_from_slice(&picture.data);
        coded.push(picture);
    }
    assert_eq!(encoder.encode_step().unwrap().code(), codes::OK_NO_MORE_FRM);
    (stream, coded)
}

fn decode(stream: &[u8]) -> Vec<DecodedPicture> {
    let config = EvcDecoderConfig::default().with_verify_signature(true);
    let mut decoder = EvcDecoder::new(config).unwrap();
    decoder.decode_stream(stream).unwrap()
}

/// Encode, decode and compare. Returns the coded pictures in coding order.
fn assert_round_trip(config: &EvcEncoderConfig, frames: usize) -> Vec<EncodedPicture> {
    let (stream, coded) = encode(config, frames);
    assert_eq!(coded.len(), frames);

    let decoded = decode(&stream);
    assert_eq!(decoded.len(), frames);

    let mut by_display = coded.clone();
    by_display.sort_by_key(|p| p.display);
    for (i, (dec, enc)) in decoded.iter().zip(&by_display).enumerate() {
        assert_eq!(enc.display, i as u64);
        assert_eq!(dec.slice_type, enc.slice_type, "picture {i}");
        assert_eq!(dec.image, enc.recon, "picture {i}");
    }
    coded
}

fn nal_types(data: &[u8]) -> Vec<NalUnitType> {
    split_nal_units(data)
        .map(|nal| NalUnitHeader::parse(nal.unwrap()).unwrap().nal_unit_type)
        .collect()
}

fn base_config(width: u32, height: u32) -> EvcEncoderConfig {
    EvcEncoderConfig::new(width, height)
        .with_qp(30)
        .with_search_range(2)
        .with_picture_signature(true)
}

// ============================================================================
// Intra
// ============================================================================

#[test]
fn test_zero_frame_intra() {
    let config = EvcEncoderConfig::new(64, 64)
        .with_qp(32)
        .with_i_period(1)
        .with_max_b_frames(0);
    let mut encoder = EvcEncoder::new(config).unwrap();
    encoder
        .push(ImageBuffer::new(64, 64, ChromaFormat::Yuv420, 8))
        .unwrap();
    encoder.flush();
    let picture = encoder.encode_step().unwrap().into_picture().unwrap();

    assert_eq!(
        nal_types(&picture.data),
        vec![NalUnitType::Sps, NalUnitType::Pps, NalUnitType::Idr]
    );
    assert_eq!(picture.slice_type, SliceType::I);

    let decoded = decode(&picture.data);
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].image, picture.recon);
    let max = decoded[0]
        .image
        .planes()
        .iter()
        .flat_map(|p| p.data().iter().copied())
        .max()
        .unwrap();
    assert!(max < 64, "largest reconstructed sample {max}");
}

#[test]
fn test_intra_only_unaligned_size() {
    let config = base_config(48, 40).with_i_period(1).with_max_b_frames(0);
    let coded = assert_round_trip(&config, 3);
    assert!(coded.iter().all(|p| p.slice_type == SliceType::I));
    assert_eq!(coded.iter().filter(|p| p.is_idr).count(), 1);
}

#[test]
fn test_intra_only_closed_gop_is_all_idr() {
    let config = base_config(16, 16)
        .with_i_period(1)
        .with_max_b_frames(0)
        .with_closed_gop(true);
    let coded = assert_round_trip(&config, 3);
    assert!(coded.iter().all(|p| p.is_idr && p.poc == 0));
}

// ============================================================================
// Low delay
// ============================================================================

#[test]
fn test_low_delay_p() {
    let config = base_config(32, 32).with_i_period(0).with_max_b_frames(0);
    let coded = assert_round_trip(&config, 4);
    let types: Vec<SliceType> = coded.iter().map(|p| p.slice_type).collect();
    assert_eq!(types, vec![SliceType::I, SliceType::P, SliceType::P, SliceType::P]);
    let pocs: Vec<i32> = coded.iter().map(|p| p.poc).collect();
    assert_eq!(pocs, vec![0, 1, 2, 3]);
}

#[test]
fn test_low_delay_p_with_reference_gap() {
    let config = base_config(32, 16)
        .with_i_period(0)
        .with_max_b_frames(0)
        .with_max_num_ref_pics(3)
        .with_ref_pic_gap_length(2);
    assert_round_trip(&config, 5);
}

#[test]
fn test_low_delay_b() {
    let config = base_config(32, 32)
        .with_i_period(0)
        .with_max_b_frames(1)
        .with_hierarchical_gop(false);
    let coded = assert_round_trip(&config, 4);
    assert!(coded[1..].iter().all(|p| p.slice_type == SliceType::B && p.temporal_id == 0));
}

#[test]
fn test_ten_bit_low_delay() {
    let config = base_config(24, 16)
        .with_bit_depth(10)
        .with_i_period(0)
        .with_max_b_frames(0);
    assert_round_trip(&config, 3);
}

#[test]
fn test_monochrome() {
    let config = base_config(16, 16)
        .with_chroma_format(ChromaFormat::Yuv400)
        .with_i_period(0)
        .with_max_b_frames(0);
    assert_round_trip(&config, 2);
}

// ============================================================================
// Hierarchical B
// ============================================================================

#[test]
fn test_hierarchical_b_with_trailing_group() {
    let config = base_config(32, 32).with_i_period(0).with_max_b_frames(3);
    let coded = assert_round_trip(&config, 7);

    let displays: Vec<u64> = coded.iter().map(|p| p.display).collect();
    assert_eq!(displays, vec![0, 4, 2, 1, 3, 5, 6]);
    let tids: Vec<u8> = coded.iter().map(|p| p.temporal_id).collect();
    assert_eq!(tids, vec![0, 0, 1, 2, 2, 0, 0]);
}

#[test]
fn test_open_gop_intra_anchor() {
    let config = base_config(16, 16).with_i_period(4).with_max_b_frames(3);
    let coded = assert_round_trip(&config, 9);
    let anchors: Vec<(u64, SliceType, bool)> = coded
        .iter()
        .filter(|p| p.temporal_id == 0)
        .map(|p| (p.display, p.slice_type, p.is_idr))
        .collect();
    assert_eq!(
        anchors,
        vec![
            (0, SliceType::I, true),
            (4, SliceType::I, false),
            (8, SliceType::I, false)
        ]
    );
}

#[test]
fn test_closed_gop_codes_leading_pictures_first() {
    let config = base_config(16, 16)
        .with_i_period(4)
        .with_max_b_frames(3)
        .with_closed_gop(true);
    let coded = assert_round_trip(&config, 9);
    assert_eq!(coded.iter().filter(|p| p.is_idr).count(), 3);
    let displays: Vec<u64> = coded.iter().map(|p| p.display).collect();
    assert_eq!(displays, (0..9).collect::<Vec<u64>>());
}

#[test]
fn test_interleaved_push_and_step() {
    let config = base_config(16, 16).with_i_period(0).with_max_b_frames(3);
    let mut encoder = EvcEncoder::new(config.clone()).unwrap();
    let mut stream = Vec::new();
    let mut codes_seen = Vec::new();

    for i in 0..5 {
        encoder.push(moving_pattern(&config, i)).unwrap();
        loop {
            match encoder.encode_step().unwrap() {
                EncodeStatus::Coded(p) => {
                    codes_seen.push(p.display);
                    stream.extend_from_slice(&p.data);
                }
                status => {
                    assert_eq!(status.code(), codes::OK_OUT_NOT_AVAILABLE);
                    break;
                }
            }
        }
    }
    assert_eq!(codes_seen, vec![0, 4, 2, 1, 3]);
    assert_eq!(encoder.pending(), 0);
    assert_eq!(decode(&stream).len(), 5);
}

// ============================================================================
// Output cropping and stream changes
// ============================================================================

#[test]
fn test_cropped_output() {
    let config = base_config(40, 24)
        .with_i_period(0)
        .with_max_b_frames(0)
        .with_crop(0, 2, 0, 1);
    let (stream, coded) = encode(&config, 2);
    let decoded = decode(&stream);
    assert_eq!(decoded.len(), 2);
    for (dec, enc) in decoded.iter().zip(&coded) {
        assert_eq!((dec.image.width, dec.image.height), (36, 22));
        assert_eq!(dec.image, enc.recon);
    }
}

#[test]
fn test_odd_crop_offsets_keep_chroma_aligned() {
    let full = base_config(40, 24).with_i_period(0).with_max_b_frames(0);
    let (full_stream, _) = encode(&full, 1);
    let uncropped = decode(&full_stream).remove(0).image;

    let (stream, _) = encode(&full.clone().with_crop(1, 1, 1, 0), 1);
    let cropped = decode(&stream).remove(0).image;

    // one unit is two luma samples and one 4:2:0 chroma sample
    assert_eq!((cropped.width, cropped.height), (36, 22));
    assert_eq!(
        (cropped.plane(1).width, cropped.plane(1).height),
        (18, 11)
    );
    for y in 0..cropped.height {
        assert_eq!(cropped.plane(0).row(y), &uncropped.plane(0).row(y + 2)[2..38]);
    }
    for c in 1..3 {
        for y in 0..cropped.plane(c).height {
            assert_eq!(cropped.plane(c).row(y), &uncropped.plane(c).row(y + 1)[1..19]);
        }
    }
}

#[test]
fn test_resolution_change_drains_old_pictures() {
    let first = base_config(16, 16).with_i_period(0).with_max_b_frames(0);
    let second = base_config(32, 16).with_i_period(0).with_max_b_frames(0);
    let (mut stream, _) = encode(&first, 2);
    let (tail, _) = encode(&second, 2);
    stream.extend_from_slice(&tail);

    let mut decoder = EvcDecoder::new(EvcDecoderConfig::default()).unwrap();
    let mut changes = 0;
    for nal in split_nal_units(&stream) {
        if decoder.decode_nal(nal.unwrap()).unwrap() == DecodeStatus::ResolutionChanged {
            changes += 1;
        }
    }
    decoder.flush();
    let mut widths = Vec::new();
    while let OutputStatus::Picture(pic) = decoder.pull().unwrap() {
        widths.push(pic.image.width);
    }
    assert_eq!(changes, 1);
    assert_eq!(widths, vec![16, 16, 32, 32]);
}

// ============================================================================
// Signatures and errors
// ============================================================================

/// Flip one digest byte of every signature SEI.
fn corrupt_signatures(stream: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for nal in split_nal_units(stream) {
        let mut nal = nal.unwrap().to_vec();
        if NalUnitHeader::parse(&nal).unwrap().nal_unit_type == NalUnitType::Sei {
            let last = nal.len() - 1;
            nal[last] ^= 0x01;
        }
        write_nal_unit(&mut out, &nal);
    }
    out
}

#[test]
fn test_signature_mismatch() {
    let config = base_config(16, 16).with_i_period(1).with_max_b_frames(0);
    let (stream, _) = encode(&config, 2);
    let corrupted = corrupt_signatures(&stream);

    let mut strict =
        EvcDecoder::new(EvcDecoderConfig::default().with_verify_signature(true)).unwrap();
    let err = strict.decode_stream(&corrupted).unwrap_err();
    assert!(err.is_bitstream_error());

    let mut lenient = EvcDecoder::new(EvcDecoderConfig::default()).unwrap();
    let decoded = lenient.decode_stream(&corrupted).unwrap();
    assert_eq!(decoded.len(), 2);
    assert_eq!(lenient.diagnostics().signature_mismatches, 2);
}

#[test]
fn test_truncated_stream() {
    let config = base_config(16, 16).with_i_period(0).with_max_b_frames(0);
    let (stream, _) = encode(&config, 1);
    let mut decoder = EvcDecoder::new(EvcDecoderConfig::default()).unwrap();
    let err = decoder.decode_stream(&stream[..stream.len() - 3]).unwrap_err();
    assert_eq!(err.code(), codes::ERR_MALFORMED_BITSTREAM);
}

#[test]
fn test_slice_without_parameter_sets() {
    let config = base_config(16, 16).with_i_period(0).with_max_b_frames(0);
    let (stream, _) = encode(&config, 1);
    let slice = split_nal_units(&stream)
        .map(|nal| nal.unwrap())
        .find(|nal| NalUnitHeader::parse(nal).unwrap().nal_unit_type == NalUnitType::Idr)
        .unwrap();

    let mut decoder = EvcDecoder::new(EvcDecoderConfig::default()).unwrap();
    assert!(decoder.decode_nal(slice).unwrap_err().is_bitstream_error());
}

#[test]
fn test_oversized_sequence_header_is_rejected() {
    let sps = Sps {
        width: 1 << 20,
        height: 1 << 20,
        ..Sps::default()
    };
    let mut writer = BitWriter::new();
    NalUnitHeader::new(NalUnitType::Sps, 0).write(&mut writer).unwrap();
    sps.write(&mut writer).unwrap();

    let mut decoder = EvcDecoder::new(EvcDecoderConfig::default()).unwrap();
    let err = decoder.decode_nal(writer.data()).unwrap_err();
    assert_eq!(err.code(), codes::ERR_MALFORMED_BITSTREAM);

    // the decoder stays usable for a well-formed stream
    let config = base_config(16, 16).with_i_period(0).with_max_b_frames(0);
    let (stream, _) = encode(&config, 1);
    assert_eq!(decoder.decode_stream(&stream).unwrap().len(), 1);
}
