//! Property-based tests for bitstream operations.
//!
//! Uses proptest to verify round-trip correctness of BitReader/BitWriter
//! and the Exp-Golomb codes used by parameter sets and slice headers.

use proptest::prelude::*;
use transcode_core::bitstream::{BitReader, BitWriter};

// =============================================================================
// BitReader/BitWriter Round-Trip Tests
// =============================================================================

proptest! {
    /// Writing and reading arbitrary bit widths yields the same value.
    #[test]
    fn roundtrip_bits_variable_width(value in 0u32..=0xFFFF, width in 1u8..=16) {
        let masked_value = value & ((1u32 << width) - 1);

        let mut writer = BitWriter::new();
        writer.write_bits(masked_value, width).unwrap();
        writer.align_zero().unwrap();

        let data = writer.into_data();
        let mut reader = BitReader::new(&data);
        prop_assert_eq!(masked_value, reader.read_bits(width).unwrap());
    }

    #[test]
    fn roundtrip_bits_u32(value in any::<u32>()) {
        let mut writer = BitWriter::new();
        writer.write_u32(value).unwrap();

        let data = writer.into_data();
        let mut reader = BitReader::new(&data);
        prop_assert_eq!(value, reader.read_u32().unwrap());
    }

    #[test]
    fn roundtrip_individual_bits(bits in prop::collection::vec(any::<bool>(), 1..100)) {
        let mut writer = BitWriter::new();
        for &bit in &bits {
            writer.write_bit(bit).unwrap();
        }
        prop_assert_eq!(writer.position(), bits.len());

        let data = writer.into_data();
        let mut reader = BitReader::new(&data);
        for &expected in &bits {
            prop_assert_eq!(expected, reader.read_bit().unwrap());
        }
    }
}

// =============================================================================
// Exp-Golomb Round-Trip Tests
// =============================================================================

proptest! {
    #[test]
    fn roundtrip_exp_golomb_unsigned(value in any::<u32>().prop_map(|v| v >> 1)) {
        let mut writer = BitWriter::new();
        writer.write_ue(value).unwrap();

        let data = writer.into_data();
        let mut reader = BitReader::new(&data);
        prop_assert_eq!(value, reader.read_ue().unwrap());
    }

    #[test]
    fn roundtrip_exp_golomb_signed(value in -1_000_000i32..=1_000_000) {
        let mut writer = BitWriter::new();
        writer.write_se(value).unwrap();

        let data = writer.into_data();
        let mut reader = BitReader::new(&data);
        prop_assert_eq!(value, reader.read_se().unwrap());
    }

    /// A header-like mix of fixed-width and Exp-Golomb fields.
    #[test]
    fn roundtrip_mixed_fields(
        ids in prop::collection::vec(0u32..64, 1..10),
        offsets in prop::collection::vec(-12i32..=12, 1..10),
        qp in 0u32..52,
    ) {
        let mut writer = BitWriter::new();
        for &id in &ids {
            writer.write_ue(id).unwrap();
        }
        writer.write_bits(qp, 6).unwrap();
        for &off in &offsets {
            writer.write_se(off).unwrap();
        }
        writer.align_zero().unwrap();

        let data = writer.into_data();
        let mut reader = BitReader::new(&data);
        for &id in &ids {
            prop_assert_eq!(id, reader.read_ue().unwrap());
        }
        prop_assert_eq!(qp, reader.read_bits(6).unwrap());
        for &off in &offsets {
            prop_assert_eq!(off, reader.read_se().unwrap());
        }
        reader.align_zero().unwrap();
        prop_assert!(reader.is_eof());
    }
}

// =============================================================================
// Position and Alignment Tests
// =============================================================================

proptest! {
    #[test]
    fn bit_position_tracking(bits_to_read in 1usize..64, data_len in 8usize..32) {
        let data = vec![0xA5u8; data_len];
        let mut reader = BitReader::new(&data);
        for _ in 0..bits_to_read {
            reader.read_bit().unwrap();
        }
        prop_assert_eq!(reader.position(), bits_to_read);
        prop_assert_eq!(reader.remaining_bits(), data_len * 8 - bits_to_read);
    }

    #[test]
    fn writer_alignment_pads_with_zeros(bits in 1u8..8) {
        let mut writer = BitWriter::new();
        writer.write_bits((1u32 << bits) - 1, bits).unwrap();
        writer.align_zero().unwrap();
        prop_assert!(writer.is_byte_aligned());

        let data = writer.into_data();
        prop_assert_eq!(data.len(), 1);
        let mut reader = BitReader::new(&data);
        reader.skip(bits as usize).unwrap();
        prop_assert!(reader.align_zero().is_ok());
    }

    #[test]
    fn skip_bits(skip_count in 1usize..32, data in prop::collection::vec(any::<u8>(), 8..16)) {
        let mut reader = BitReader::new(&data);
        reader.skip(skip_count).unwrap();
        prop_assert_eq!(reader.position(), skip_count);
        prop_assert!(reader.skip(data.len() * 8).is_err());
    }
}
