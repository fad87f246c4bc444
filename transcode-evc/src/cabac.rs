//! Binary arithmetic coding engine.
//!
//! A 14-bit range coder with adaptive binary contexts. Each context keeps a
//! 9-bit LPS probability `state` (0..=256) and the most probable symbol.
//! The LPS sub-range is `max((state * range) >> 9, 437)`; contexts adapt
//! quickly towards the LPS after a miss and slowly towards the MPS after a
//! hit. Bypass bins halve the range without adaptation.
//!
//! The encoder buffers one pending byte plus runs of 0xFF and 0x00 bytes so
//! that carries out of the code register can be propagated into bytes that
//! were already produced. In counting mode nothing is written and
//! [`CabacEncoder::bits`] estimates the coded size for rate-distortion
//! decisions.

use crate::error::{EvcError, Result};

/// Context index of cu_skip_flag.
pub const CTX_SKIP_FLAG: usize = 0;
/// Context index of pred_mode_flag.
pub const CTX_PRED_MODE: usize = 1;
/// Context indices of inter_pred_idc (2).
pub const CTX_INTER_DIR: usize = 2;
/// Context index of direct_mode_flag.
pub const CTX_DIRECT_MODE: usize = 4;
/// Context indices of ref_idx (2).
pub const CTX_REFI: usize = 5;
/// Context indices of mvp_idx (3).
pub const CTX_MVP_IDX: usize = 7;
/// Context index of the mvd prefix.
pub const CTX_MVD: usize = 10;
/// Context indices of intra_luma_pred_mode (2).
pub const CTX_INTRA_DIR: usize = 11;
/// Context index of cbf_all.
pub const CTX_CBF_ALL: usize = 13;
/// Context index of cbf_luma.
pub const CTX_CBF_LUMA: usize = 14;
/// Context index of cbf_cb.
pub const CTX_CBF_CB: usize = 15;
/// Context index of cbf_cr.
pub const CTX_CBF_CR: usize = 16;
/// Context indices of coefficient runs (luma 2, chroma 2).
pub const CTX_RUN: usize = 17;
/// Context indices of coefficient levels (luma 2, chroma 2).
pub const CTX_LEVEL: usize = 21;
/// Context indices of the last-coefficient flag (luma, chroma).
pub const CTX_LAST: usize = 25;
/// Context index of split_cu_flag.
pub const CTX_SPLIT_CU_FLAG: usize = 27;
/// Context index of cu_qp_delta_abs.
pub const CTX_DELTA_QP: usize = 28;
/// Total number of contexts.
pub const NUM_CTX: usize = 29;

/// Initial probability state (equiprobable).
const PROB_INIT_STATE: u16 = 256;
/// Lower bound of the LPS sub-range.
const LPS_MIN: u32 = 437;
/// Renormalization threshold.
const RANGE_MIN: u32 = 8192;
/// Range after reset.
const RANGE_INIT: u32 = 16384;
/// Bits of look-ahead the decoder may read past the end of the slice data.
const MAX_OVERREAD_BITS: usize = 32;
/// Longest unary codeword accepted by the decoder.
const MAX_UNARY_BINS: u32 = 1 << 16;

/// Adaptive probability model of one binary syntax element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CabacContext {
    /// LPS probability in 1/512 units.
    state: u16,
    /// Most probable symbol.
    mps: bool,
}

impl Default for CabacContext {
    fn default() -> Self {
        Self {
            state: PROB_INIT_STATE,
            mps: false,
        }
    }
}

impl CabacContext {
    /// Get the LPS probability state.
    pub fn state(&self) -> u16 {
        self.state
    }

    /// Get the most probable symbol.
    pub fn mps(&self) -> bool {
        self.mps
    }

    /// Get the packed `(state << 1) | mps` representation.
    pub fn packed(&self) -> u16 {
        (self.state << 1) | self.mps as u16
    }

    #[inline]
    fn lps_range(&self, range: u32) -> u32 {
        ((self.state as u32 * range) >> 9).max(LPS_MIN)
    }

    /// Update the model after coding `bin`.
    #[inline]
    pub fn update(&mut self, bin: bool) {
        if bin != self.mps {
            self.state += (512 - self.state + 16) >> 5;
            if self.state > 256 {
                self.mps = !self.mps;
                self.state = 512 - self.state;
            }
        } else {
            self.state -= (self.state + 16) >> 5;
        }
    }
}

/// The full context table of a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextSet {
    models: [CabacContext; NUM_CTX],
}

impl Default for ContextSet {
    fn default() -> Self {
        Self {
            models: [CabacContext::default(); NUM_CTX],
        }
    }
}

impl ContextSet {
    /// Reset every model to the initial probability.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Get a model.
    pub fn get(&self, idx: usize) -> &CabacContext {
        &self.models[idx]
    }
}

/// Arithmetic encoder.
#[derive(Debug, Clone)]
pub struct CabacEncoder {
    output: Vec<u8>,
    range: u32,
    code: u64,
    code_bits: i32,
    pending_byte: u32,
    is_pending: bool,
    stacked_ff: u32,
    stacked_zero: u32,
    count_only: bool,
    bit_counter: u64,
    bin_counter: u64,
    contexts: ContextSet,
}

impl Default for CabacEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl CabacEncoder {
    /// Create an encoder that produces bytes.
    pub fn new() -> Self {
        Self {
            output: Vec::with_capacity(4096),
            range: RANGE_INIT,
            code: 0,
            code_bits: 11,
            pending_byte: 0,
            is_pending: false,
            stacked_ff: 0,
            stacked_zero: 0,
            count_only: false,
            bit_counter: 0,
            bin_counter: 0,
            contexts: ContextSet::default(),
        }
    }

    /// Create an encoder that only counts bits.
    pub fn counter() -> Self {
        Self {
            output: Vec::new(),
            count_only: true,
            ..Self::new()
        }
    }

    /// Copy the coding state into a counting encoder.
    ///
    /// The copy starts with an empty bit counter, so `bits()` differences
    /// between the fork and later clones of it measure added syntax only.
    pub fn fork_counter(&self) -> Self {
        Self {
            output: Vec::new(),
            range: self.range,
            code: self.code,
            code_bits: self.code_bits,
            pending_byte: self.pending_byte,
            is_pending: self.is_pending,
            stacked_ff: self.stacked_ff,
            stacked_zero: self.stacked_zero,
            count_only: true,
            bit_counter: 0,
            bin_counter: 0,
            contexts: self.contexts,
        }
    }

    /// Reset the engine and contexts for a new slice.
    pub fn reset(&mut self) {
        let output = std::mem::take(&mut self.output);
        let count_only = self.count_only;
        *self = Self {
            output,
            count_only,
            ..Self::new()
        };
        self.output.clear();
    }

    /// Get the context table.
    pub fn contexts(&self) -> &ContextSet {
        &self.contexts
    }

    /// Number of bins coded so far.
    pub fn bins(&self) -> u64 {
        self.bin_counter
    }

    /// Estimate the number of bits produced so far.
    pub fn bits(&self) -> u64 {
        self.bit_counter
            + 8 * (self.stacked_zero + self.stacked_ff) as u64
            + 8 * self.is_pending as u64
            + (8 - self.code_bits + 3) as u64
    }

    fn write_byte(&mut self, byte: u32) {
        if self.count_only {
            self.bit_counter += 8;
        } else {
            self.output.push(byte as u8);
        }
    }

    fn put_byte(&mut self, byte: u32) {
        if self.is_pending {
            if self.pending_byte == 0 {
                self.stacked_zero += 1;
            } else {
                while self.stacked_zero > 0 {
                    self.write_byte(0x00);
                    self.stacked_zero -= 1;
                }
                self.write_byte(self.pending_byte);
            }
        }
        self.pending_byte = byte;
        self.is_pending = true;
    }

    fn carry_propagate(&mut self) {
        let out = (self.code >> 17) as u32;
        self.code &= (1 << 17) - 1;

        if out < 0xFF {
            while self.stacked_ff != 0 {
                self.put_byte(0xFF);
                self.stacked_ff -= 1;
            }
            self.put_byte(out);
        } else if out > 0xFF {
            self.pending_byte += 1;
            while self.stacked_ff != 0 {
                self.put_byte(0x00);
                self.stacked_ff -= 1;
            }
            self.put_byte(out & 0xFF);
        } else {
            self.stacked_ff += 1;
        }
    }

    #[inline]
    fn shift(&mut self) {
        self.code_bits -= 1;
        if self.code_bits == 0 {
            self.carry_propagate();
            self.code_bits = 8;
        }
    }

    fn renormalize(&mut self) {
        while self.range < RANGE_MIN {
            self.range <<= 1;
            self.code <<= 1;
            self.shift();
        }
    }

    /// Encode a context-coded bin.
    pub fn encode_bin(&mut self, ctx_idx: usize, bin: bool) {
        self.bin_counter += 1;
        let ctx = &mut self.contexts.models[ctx_idx];
        let lps = ctx.lps_range(self.range);
        self.range -= lps;

        if bin != ctx.mps {
            // lps never exceeds half the range, so the LPS takes the upper part
            self.code += self.range as u64;
            self.range = lps;
        }
        ctx.update(bin);
        self.renormalize();
    }

    /// Encode an equiprobable (bypass) bin.
    pub fn encode_bypass(&mut self, bin: bool) {
        self.bin_counter += 1;
        self.range >>= 1;
        if bin {
            self.code += self.range as u64;
        }
        self.range <<= 1;
        self.code <<= 1;
        self.shift();
    }

    /// Encode the `n` low bits of `value` as bypass bins, MSB first.
    pub fn encode_bypass_bits(&mut self, value: u32, n: u32) {
        for i in (0..n).rev() {
            self.encode_bypass((value >> i) & 1 != 0);
        }
    }

    /// Encode a terminating bin.
    pub fn encode_terminate(&mut self, bin: bool) {
        self.bin_counter += 1;
        self.range -= 1;
        if bin {
            self.code += self.range as u64;
            self.range = 1;
        }
        self.renormalize();
    }

    /// Encode `sym` as `sym` one-bins followed by a zero-bin.
    ///
    /// The first bin uses `ctx_base`; later bins use the following contexts,
    /// saturating at `ctx_base + num_ctx - 1`.
    pub fn encode_unary(&mut self, ctx_base: usize, num_ctx: usize, sym: u32) {
        self.encode_bin(ctx_base, sym != 0);
        if sym == 0 {
            return;
        }
        let mut ctx = 0;
        let mut remaining = sym;
        while remaining > 0 {
            remaining -= 1;
            if ctx < num_ctx - 1 {
                ctx += 1;
            }
            self.encode_bin(ctx_base + ctx, remaining != 0);
        }
    }

    /// Encode `sym < max` as a truncated unary codeword with one context
    /// per bin position.
    pub fn encode_truncated_unary(&mut self, ctx_base: usize, max: u32, sym: u32) {
        for i in 0..max.saturating_sub(1) {
            let bin = i != sym;
            self.encode_bin(ctx_base + i as usize, bin);
            if !bin {
                break;
            }
        }
    }

    /// Encode an order-0 Exp-Golomb value whose first two bins share `ctx_idx`.
    pub fn encode_exp_golomb(&mut self, ctx_idx: usize, value: u32) {
        let len = 31 - (value + 1).leading_zeros();
        let info = value + 1 - (1 << len);
        let code = (1u64 << len) | info as u64;
        let total = 2 * len + 1;
        for i in 0..total {
            let bin = (code >> (total - 1 - i)) & 1 != 0;
            if i <= 1 {
                self.encode_bin(ctx_idx, bin);
            } else {
                self.encode_bypass(bin);
            }
        }
    }

    /// Flush the engine at the end of the slice data.
    pub fn finish(&mut self) {
        let mut tmp = (self.code + self.range as u64 - 1) & !((1u64 << 14) - 1);
        if tmp < self.code {
            tmp += 8192;
        }
        self.code = tmp << self.code_bits;
        self.carry_propagate();
        self.code <<= 8;
        self.carry_propagate();

        while self.stacked_zero > 0 {
            self.write_byte(0x00);
            self.stacked_zero -= 1;
        }
        if self.pending_byte != 0 {
            self.write_byte(self.pending_byte);
        } else if self.code_bits < 4 {
            // 4 - code_bits zero bits, then byte alignment
            self.write_byte(0x00);
        }
        self.is_pending = false;
    }

    /// Get the bytes written so far.
    pub fn data(&self) -> &[u8] {
        &self.output
    }

    /// Take the written bytes.
    pub fn into_data(self) -> Vec<u8> {
        self.output
    }
}

/// Arithmetic decoder.
#[derive(Debug, Clone)]
pub struct CabacDecoder<'a> {
    data: &'a [u8],
    bit_pos: usize,
    range: u32,
    value: u32,
    contexts: ContextSet,
}

impl<'a> CabacDecoder<'a> {
    /// Create a decoder over slice data and read the initial 14 bits.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let mut dec = Self {
            data,
            bit_pos: 0,
            range: RANGE_INIT,
            value: 0,
            contexts: ContextSet::default(),
        };
        for _ in 0..14 {
            let bit = dec.read_bit()?;
            dec.value = ((dec.value << 1) | bit) & 0xFFFF;
        }
        Ok(dec)
    }

    /// Read one bit; bits past the end of the data read as zero, up to a
    /// small look-ahead window.
    fn read_bit(&mut self) -> Result<u32> {
        let byte = self.bit_pos >> 3;
        let bit = match self.data.get(byte) {
            Some(b) => ((b >> (7 - (self.bit_pos & 7))) & 1) as u32,
            None if self.bit_pos < self.data.len() * 8 + MAX_OVERREAD_BITS => 0,
            None => return Err(EvcError::malformed("slice data ended inside a syntax element")),
        };
        self.bit_pos += 1;
        Ok(bit)
    }

    fn renormalize(&mut self) -> Result<()> {
        while self.range < RANGE_MIN {
            self.range <<= 1;
            let bit = self.read_bit()?;
            self.value = ((self.value << 1) | bit) & 0xFFFF;
        }
        Ok(())
    }

    /// Get the context table.
    pub fn contexts(&self) -> &ContextSet {
        &self.contexts
    }

    /// Decode a context-coded bin.
    pub fn decode_bin(&mut self, ctx_idx: usize) -> Result<bool> {
        let ctx = &mut self.contexts.models[ctx_idx];
        let lps = ctx.lps_range(self.range);
        self.range -= lps;

        let bin = if self.value >= self.range {
            self.value -= self.range;
            self.range = lps;
            !ctx.mps
        } else {
            ctx.mps
        };
        ctx.update(bin);
        self.renormalize()?;
        Ok(bin)
    }

    /// Decode a bypass bin.
    pub fn decode_bypass(&mut self) -> Result<bool> {
        self.range >>= 1;
        let bin = if self.value >= self.range {
            self.value -= self.range;
            true
        } else {
            false
        };
        self.range <<= 1;
        let bit = self.read_bit()?;
        self.value = ((self.value << 1) | bit) & 0xFFFF;
        Ok(bin)
    }

    /// Decode `n` bypass bins, MSB first.
    pub fn decode_bypass_bits(&mut self, n: u32) -> Result<u32> {
        let mut value = 0;
        for _ in 0..n {
            value = (value << 1) | self.decode_bypass()? as u32;
        }
        Ok(value)
    }

    /// Decode a terminating bin. A one-bin ends the slice data and the
    /// remaining bits of the current byte must be zero.
    pub fn decode_terminate(&mut self) -> Result<bool> {
        self.range -= 1;
        if self.value >= self.range {
            while self.bit_pos % 8 != 0 {
                if self.read_bit()? != 0 {
                    return Err(EvcError::malformed("non-zero bits after end of slice data"));
                }
            }
            Ok(true)
        } else {
            self.renormalize()?;
            Ok(false)
        }
    }

    /// Decode a unary codeword (see [`CabacEncoder::encode_unary`]).
    pub fn decode_unary(&mut self, ctx_base: usize, num_ctx: usize) -> Result<u32> {
        if !self.decode_bin(ctx_base)? {
            return Ok(0);
        }
        let mut sym = 0u32;
        let mut ctx = 0;
        loop {
            sym += 1;
            if ctx < num_ctx - 1 {
                ctx += 1;
            }
            if !self.decode_bin(ctx_base + ctx)? {
                return Ok(sym);
            }
            if sym >= MAX_UNARY_BINS {
                return Err(EvcError::malformed("unary codeword too long"));
            }
        }
    }

    /// Decode a truncated unary codeword with maximum `max`.
    pub fn decode_truncated_unary(&mut self, ctx_base: usize, max: u32) -> Result<u32> {
        for i in 0..max.saturating_sub(1) {
            if !self.decode_bin(ctx_base + i as usize)? {
                return Ok(i);
            }
        }
        Ok(max.saturating_sub(1))
    }

    /// Decode an order-0 Exp-Golomb value whose first two bins share `ctx_idx`.
    pub fn decode_exp_golomb(&mut self, ctx_idx: usize) -> Result<u32> {
        let mut len = 0u32;
        let mut idx = 0u32;
        loop {
            let bin = if idx <= 1 {
                self.decode_bin(ctx_idx)?
            } else {
                self.decode_bypass()?
            };
            idx += 1;
            if bin {
                break;
            }
            len += 1;
            if len > 16 {
                return Err(EvcError::malformed("Exp-Golomb prefix too long"));
            }
        }
        let info = self.decode_bypass_bits(len)?;
        Ok((1 << len) - 1 + info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_adaptation() {
        let mut ctx = CabacContext::default();
        assert_eq!(ctx.packed(), 512);
        ctx.update(false);
        assert_eq!(ctx.state(), 256 - ((256 + 16) >> 5));
        assert!(!ctx.mps());

        let mut ctx = CabacContext::default();
        ctx.update(true);
        // 256 + 8 crosses the midpoint and flips the MPS
        assert!(ctx.mps());
        assert_eq!(ctx.state(), 512 - 264);
    }

    #[test]
    fn test_roundtrip_mixed_bins() {
        let bins: Vec<(usize, bool)> = (0..2000)
            .map(|i| (i % NUM_CTX, (i * 7 + i / 3) % 5 == 0))
            .collect();

        let mut enc = CabacEncoder::new();
        for &(ctx, bin) in &bins {
            enc.encode_bin(ctx, bin);
            if ctx == 3 {
                enc.encode_bypass(bin);
            }
        }
        enc.encode_terminate(true);
        enc.finish();
        let data = enc.into_data();

        let mut dec = CabacDecoder::new(&data).unwrap();
        for &(ctx, bin) in &bins {
            assert_eq!(dec.decode_bin(ctx).unwrap(), bin);
            if ctx == 3 {
                assert_eq!(dec.decode_bypass().unwrap(), bin);
            }
        }
        assert!(dec.decode_terminate().unwrap());
    }

    #[test]
    fn test_binarizations_roundtrip() {
        let mut enc = CabacEncoder::new();
        for v in 0..20 {
            enc.encode_unary(CTX_RUN, 2, v);
            enc.encode_exp_golomb(CTX_MVD, v * 37);
            enc.encode_truncated_unary(CTX_MVP_IDX, 4, v % 4);
            enc.encode_bypass_bits(v, 5);
        }
        enc.encode_terminate(true);
        enc.finish();
        let data = enc.into_data();

        let mut dec = CabacDecoder::new(&data).unwrap();
        for v in 0..20 {
            assert_eq!(dec.decode_unary(CTX_RUN, 2).unwrap(), v);
            assert_eq!(dec.decode_exp_golomb(CTX_MVD).unwrap(), v * 37);
            assert_eq!(dec.decode_truncated_unary(CTX_MVP_IDX, 4).unwrap(), v % 4);
            assert_eq!(dec.decode_bypass_bits(5).unwrap(), v);
        }
        assert!(dec.decode_terminate().unwrap());
    }

    #[test]
    fn test_terminate_zero_continues() {
        let mut enc = CabacEncoder::new();
        for i in 0..50 {
            enc.encode_terminate(false);
            enc.encode_bin(CTX_SKIP_FLAG, i % 2 == 0);
        }
        enc.encode_terminate(true);
        enc.finish();
        let data = enc.into_data();

        let mut dec = CabacDecoder::new(&data).unwrap();
        for i in 0..50 {
            assert!(!dec.decode_terminate().unwrap());
            assert_eq!(dec.decode_bin(CTX_SKIP_FLAG).unwrap(), i % 2 == 0);
        }
        assert!(dec.decode_terminate().unwrap());
    }

    #[test]
    fn test_counter_tracks_real_size() {
        let mut enc = CabacEncoder::new();
        let mut counter = CabacEncoder::counter();
        for i in 0..5000u32 {
            let bin = i % 3 == 0;
            enc.encode_bin(CTX_LEVEL, bin);
            counter.encode_bin(CTX_LEVEL, bin);
        }
        assert!(counter.data().is_empty());
        let estimate = counter.bits();
        enc.encode_terminate(true);
        enc.finish();
        let actual = enc.data().len() as u64 * 8;
        assert!(estimate.abs_diff(actual) <= 32, "estimate {estimate}, actual {actual}");
    }

    #[test]
    fn test_fork_counter_measures_increment() {
        let mut enc = CabacEncoder::new();
        for _ in 0..100 {
            enc.encode_bin(CTX_SKIP_FLAG, true);
        }
        let fork = enc.fork_counter();
        let base = fork.bits();
        let mut trial = fork.clone();
        for _ in 0..64 {
            trial.encode_bypass(true);
        }
        let delta = trial.bits() - base;
        assert!((62..=66).contains(&delta), "delta {delta}");
        assert_eq!(trial.contexts(), enc.contexts());
    }

    #[test]
    fn test_truncated_data_is_malformed() {
        let mut dec = CabacDecoder::new(&[]).unwrap();
        let mut result = Ok(0);
        for _ in 0..100 {
            result = dec.decode_bypass_bits(8);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(EvcError::MalformedBitstream(_))));
    }

    #[test]
    fn test_carry_through_stacked_ff() {
        // 'c' is a context-0 bin and 'y' a bypass bin. After the first
        // byte 0x7d is pending, the next byte is held back as a stacked
        // 0xff. A later LPS carries into both, leaving 0x7e 0x00.
        let bins: Vec<(char, bool)> = "cycyycyccyyyyyycccc"
            .chars()
            .zip("0111110001101110110".chars().map(|b| b == '1'))
            .collect();

        let mut enc = CabacEncoder::new();
        for &(kind, bin) in &bins {
            match kind {
                'c' => enc.encode_bin(0, bin),
                _ => enc.encode_bypass(bin),
            }
        }
        enc.encode_terminate(true);
        enc.finish();
        let data = enc.into_data();
        assert_eq!(data, vec![0x7e, 0x00, 0x13, 0x47, 0x80]);

        let mut dec = CabacDecoder::new(&data).unwrap();
        for &(kind, bin) in &bins {
            let decoded = match kind {
                'c' => dec.decode_bin(0).unwrap(),
                _ => dec.decode_bypass().unwrap(),
            };
            assert_eq!(decoded, bin);
        }
        assert!(dec.decode_terminate().unwrap());
    }
}
