//! Bitstream reading and writing utilities.
//!
//! MSB-first bit access over byte buffers, with the Exp-Golomb codes and
//! alignment rules used by block-based video parameter sets and headers.

use crate::error::{BitstreamError, Error, Result};

/// A bitstream reader for parsing coded data.
///
/// Positions are tracked as an absolute bit offset so callers can hand the
/// reader to an arithmetic decoder mid-stream and keep reading afterwards.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    /// Create a new bit reader from a byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Get the total number of bits in the stream.
    pub fn total_bits(&self) -> usize {
        self.data.len() * 8
    }

    /// Get the current bit position in the stream.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Get the number of remaining bits.
    pub fn remaining_bits(&self) -> usize {
        self.total_bits().saturating_sub(self.pos)
    }

    /// Check if every bit has been consumed.
    pub fn is_eof(&self) -> bool {
        self.pos >= self.total_bits()
    }

    /// Check if the stream is byte-aligned.
    pub fn is_byte_aligned(&self) -> bool {
        self.pos % 8 == 0
    }

    /// Read a single bit.
    pub fn read_bit(&mut self) -> Result<bool> {
        let byte = *self
            .data
            .get(self.pos >> 3)
            .ok_or(BitstreamError::UnexpectedEnd)?;
        let bit = (byte >> (7 - (self.pos & 7))) & 1;
        self.pos += 1;
        Ok(bit != 0)
    }

    /// Read a single bit as an integer.
    pub fn read_bit_u32(&mut self) -> Result<u32> {
        self.read_bit().map(u32::from)
    }

    /// Read up to 32 bits as an unsigned integer.
    pub fn read_bits(&mut self, n: u8) -> Result<u32> {
        if n > 32 {
            return Err(Error::invalid_param("cannot read more than 32 bits at once"));
        }
        if self.remaining_bits() < n as usize {
            return Err(BitstreamError::UnexpectedEnd.into());
        }

        let mut value: u32 = 0;
        for _ in 0..n {
            value = (value << 1) | self.read_bit_u32()?;
        }
        Ok(value)
    }

    /// Read an unsigned 8-bit value.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.read_bits(8).map(|v| v as u8)
    }

    /// Read an unsigned 32-bit value (big-endian bit order).
    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_bits(32)
    }

    /// Read an unsigned Exp-Golomb coded value (ue(v)).
    pub fn read_ue(&mut self) -> Result<u32> {
        let mut leading_zeros = 0u8;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(BitstreamError::ExpGolombOverflow.into());
            }
        }

        if leading_zeros == 0 {
            return Ok(0);
        }

        let suffix = self.read_bits(leading_zeros)?;
        Ok(((1u64 << leading_zeros) - 1 + suffix as u64).min(u32::MAX as u64) as u32)
    }

    /// Read a signed Exp-Golomb coded value (se(v)).
    pub fn read_se(&mut self) -> Result<i32> {
        let ue = self.read_ue()? as i64;
        let magnitude = (ue + 1) >> 1;
        let value = if ue & 1 == 1 { magnitude } else { -magnitude };
        Ok(value as i32)
    }

    /// Skip to the next byte boundary without inspecting the skipped bits.
    pub fn align_to_byte(&mut self) {
        self.pos = (self.pos + 7) & !7;
    }

    /// Skip to the next byte boundary, requiring the padding bits to be zero.
    pub fn align_zero(&mut self) -> Result<()> {
        while !self.is_byte_aligned() {
            let offset = self.pos;
            if self.read_bit()? {
                return Err(BitstreamError::NonZeroAlignment { offset }.into());
            }
        }
        Ok(())
    }

    /// Skip a number of bits.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        if self.remaining_bits() < n {
            return Err(BitstreamError::UnexpectedEnd.into());
        }
        self.pos += n;
        Ok(())
    }

    /// Peek at the next n bits without consuming them.
    pub fn peek_bits(&self, n: u8) -> Result<u32> {
        let mut clone = self.clone();
        clone.read_bits(n)
    }

    /// Get the unread bytes. Only meaningful at a byte boundary.
    pub fn remaining_bytes(&self) -> Result<&'a [u8]> {
        if !self.is_byte_aligned() {
            return Err(BitstreamError::AlignmentError.into());
        }
        Ok(&self.data[(self.pos >> 3).min(self.data.len())..])
    }
}

/// A bitstream writer for generating coded data.
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    data: Vec<u8>,
    cur: u8,
    nbits: u8,
}

impl BitWriter {
    /// Create a new bit writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new bit writer with capacity.
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            data: Vec::with_capacity(bytes),
            ..Self::default()
        }
    }

    /// Get the number of bits written so far.
    pub fn position(&self) -> usize {
        self.data.len() * 8 + self.nbits as usize
    }

    /// Check if the writer is byte-aligned.
    pub fn is_byte_aligned(&self) -> bool {
        self.nbits == 0
    }

    /// Write a single bit.
    pub fn write_bit(&mut self, bit: bool) -> Result<()> {
        self.cur = (self.cur << 1) | u8::from(bit);
        self.nbits += 1;
        if self.nbits == 8 {
            self.data.push(self.cur);
            self.cur = 0;
            self.nbits = 0;
        }
        Ok(())
    }

    /// Write the low `n` bits of `value`, most significant first.
    pub fn write_bits(&mut self, value: u32, n: u8) -> Result<()> {
        if n > 32 {
            return Err(Error::invalid_param("cannot write more than 32 bits at once"));
        }
        for i in (0..n).rev() {
            self.write_bit((value >> i) & 1 != 0)?;
        }
        Ok(())
    }

    /// Write an unsigned 8-bit value.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bits(value as u32, 8)
    }

    /// Write an unsigned 32-bit value.
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_bits(value, 32)
    }

    /// Write an unsigned Exp-Golomb coded value.
    pub fn write_ue(&mut self, value: u32) -> Result<()> {
        let code = value as u64 + 1;
        let len = 63 - code.leading_zeros() as u8;
        for _ in 0..len {
            self.write_bit(false)?;
        }
        for i in (0..=len).rev() {
            self.write_bit((code >> i) & 1 != 0)?;
        }
        Ok(())
    }

    /// Write a signed Exp-Golomb coded value.
    pub fn write_se(&mut self, value: i32) -> Result<()> {
        let value = value as i64;
        let ue = if value <= 0 { -2 * value } else { 2 * value - 1 };
        self.write_ue(ue as u32)
    }

    /// Align to byte boundary by writing zero bits.
    pub fn align_zero(&mut self) -> Result<()> {
        while !self.is_byte_aligned() {
            self.write_bit(false)?;
        }
        Ok(())
    }

    /// Append whole bytes. The writer must be byte-aligned.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.is_byte_aligned() {
            return Err(BitstreamError::AlignmentError.into());
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Get the completed bytes (a partial trailing byte is not included).
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Take the written data, zero-padding any partial byte.
    pub fn into_data(mut self) -> Vec<u8> {
        if self.nbits > 0 {
            self.data.push(self.cur << (8 - self.nbits));
        }
        self.data
    }
}
