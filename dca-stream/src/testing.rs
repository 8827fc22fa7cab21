//! A scripted stand-in for libdca.
//!
//! Frames use a small synthetic layout so tests can say exactly what the
//! decoder should report:
//!
//! | Bytes  | Field                                                    |
//! |--------|----------------------------------------------------------|
//! | 0..4   | sync word, `7F FE 80 01` or byte-swapped `FE 7F 01 80`   |
//! | 4      | blocks in the frame                                      |
//! | 5..7   | frame length in bytes (big endian)                       |
//! | 7      | rate code: 0 = 48 kHz, 1 = 96 kHz, 2 = 44.1 kHz, 3 = 32 kHz |
//! | 8..10  | bit rate in kbit/s (big endian)                          |
//! | 10     | bit mask of blocks whose decode fails                    |
//! | 11     | non-zero makes the whole frame fail                      |
//! | 12..14 | amplitude, signed, 1/8192 units (big endian)             |
//!
//! Every decoded block holds `amplitude * level + bias` on the left channel
//! and `-amplitude * level + bias` on the right, with `level` and `bias` as
//! passed to [`DcaLibrary::frame`].

use crate::process::decode::{BLOCK_LEN, DcaLibrary, DownmixFlags, SyncInfo};
use crate::utils::errors::DecodeError;

const SYNC_BE: [u8; 4] = [0x7F, 0xFE, 0x80, 0x01];
const SYNC_LE: [u8; 4] = [0xFE, 0x7F, 0x01, 0x80];
const AMPLITUDE_SCALE: f32 = 8192.0;

/// Shortest frame the scripted decoder accepts.
pub const MIN_FRAME_LEN: usize = 14;

fn rate_from_code(code: u8) -> Option<u32> {
    match code {
        0 => Some(48_000),
        1 => Some(96_000),
        2 => Some(44_100),
        3 => Some(32_000),
        _ => None,
    }
}

fn code_from_rate(rate: u32) -> u8 {
    match rate {
        96_000 => 1,
        44_100 => 2,
        32_000 => 3,
        _ => 0,
    }
}

/// Deterministic [`DcaLibrary`] driven by the frame bytes themselves.
#[derive(Debug, Default)]
pub struct ScriptedDca {
    blocks: usize,
    next_block: usize,
    failing_blocks: u8,
    amplitude: f32,
    samples: Vec<f32>,
    /// Frames submitted through [`DcaLibrary::frame`].
    pub frames_submitted: usize,
    /// Gain passed with the last frame.
    pub level: f32,
    /// Bias passed with the last frame.
    pub bias: f32,
}

impl DcaLibrary for ScriptedDca {
    const HEADER_LEN: usize = 12;

    fn init() -> Result<Self, DecodeError> {
        Ok(Self {
            samples: vec![0.0; BLOCK_LEN * 6],
            ..Default::default()
        })
    }

    fn sync_info(&mut self, data: &[u8]) -> Option<SyncInfo> {
        let header = data.get(..Self::HEADER_LEN)?;
        if header[..4] != SYNC_BE && header[..4] != SYNC_LE {
            return None;
        }

        let frame_length = u16::from_be_bytes([header[5], header[6]]) as usize;
        if frame_length < MIN_FRAME_LEN {
            return None;
        }

        Some(SyncInfo {
            frame_length,
            sample_rate: rate_from_code(header[7])?,
            bit_rate: u16::from_be_bytes([header[8], header[9]]) as u32 * 1000,
            flags: DownmixFlags(10) | DownmixFlags::LFE,
        })
    }

    fn frame(
        &mut self,
        data: &[u8],
        _flags: &mut DownmixFlags,
        level: &mut f32,
        bias: f32,
    ) -> Result<(), DecodeError> {
        self.frames_submitted += 1;
        self.level = *level;
        self.bias = bias;
        self.blocks = 0;
        self.next_block = 0;

        if data.len() < MIN_FRAME_LEN || data[11] != 0 {
            return Err(DecodeError::FrameRejected(data.len()));
        }

        self.blocks = data[4] as usize;
        self.failing_blocks = data[10];
        self.amplitude = i16::from_be_bytes([data[12], data[13]]) as f32 / AMPLITUDE_SCALE;
        Ok(())
    }

    fn blocks_num(&self) -> usize {
        self.blocks
    }

    fn block(&mut self) -> Result<(), DecodeError> {
        let index = self.next_block;
        self.next_block += 1;

        if index >= self.blocks || (index < 8 && self.failing_blocks & (1 << index) != 0) {
            return Err(DecodeError::BlockFailed(index));
        }

        let sample = self.amplitude * self.level;
        let (left, rest) = self.samples.split_at_mut(BLOCK_LEN);
        left.fill(sample + self.bias);
        rest[..BLOCK_LEN].fill(-sample + self.bias);
        Ok(())
    }

    fn samples(&self) -> &[f32] {
        &self.samples
    }
}

/// A decode library that can never allocate its state.
#[derive(Debug)]
pub struct UnavailableDca;

impl DcaLibrary for UnavailableDca {
    const HEADER_LEN: usize = 14;

    fn init() -> Result<Self, DecodeError> {
        Err(DecodeError::InitFailed)
    }

    fn sync_info(&mut self, _data: &[u8]) -> Option<SyncInfo> {
        None
    }

    fn frame(
        &mut self,
        data: &[u8],
        _flags: &mut DownmixFlags,
        _level: &mut f32,
        _bias: f32,
    ) -> Result<(), DecodeError> {
        Err(DecodeError::FrameRejected(data.len()))
    }

    fn blocks_num(&self) -> usize {
        0
    }

    fn block(&mut self) -> Result<(), DecodeError> {
        Err(DecodeError::BlockFailed(0))
    }

    fn samples(&self) -> &[f32] {
        &[]
    }
}

/// Assembles frames in the scripted layout.
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    little_endian: bool,
    blocks: u8,
    length: u16,
    sample_rate: u32,
    bit_rate_kbps: u16,
    failing_blocks: u8,
    rejected: bool,
    amplitude: f32,
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self {
            little_endian: false,
            blocks: 1,
            length: 16,
            sample_rate: 48_000,
            bit_rate_kbps: 768,
            failing_blocks: 0,
            rejected: false,
            amplitude: 0.25,
        }
    }
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn little_endian(mut self) -> Self {
        self.little_endian = true;
        self
    }

    pub fn blocks(mut self, blocks: u8) -> Self {
        self.blocks = blocks;
        self
    }

    /// Total frame size. Values below [`MIN_FRAME_LEN`] produce a header the
    /// decoder refuses.
    pub fn length(mut self, length: u16) -> Self {
        self.length = length;
        self
    }

    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn bit_rate_kbps(mut self, kbps: u16) -> Self {
        self.bit_rate_kbps = kbps;
        self
    }

    pub fn failing_blocks(mut self, mask: u8) -> Self {
        self.failing_blocks = mask;
        self
    }

    pub fn rejected(mut self) -> Self {
        self.rejected = true;
        self
    }

    pub fn amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.length.max(MIN_FRAME_LEN as u16) as usize);
        frame.extend(if self.little_endian { SYNC_LE } else { SYNC_BE });
        frame.push(self.blocks);
        frame.extend(self.length.to_be_bytes());
        frame.push(code_from_rate(self.sample_rate));
        frame.extend(self.bit_rate_kbps.to_be_bytes());
        frame.push(self.failing_blocks);
        frame.push(u8::from(self.rejected));

        let amplitude = (self.amplitude * AMPLITUDE_SCALE)
            .round()
            .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        frame.extend(amplitude.to_be_bytes());

        let padded = (self.length as usize).max(MIN_FRAME_LEN);
        frame.extend((frame.len()..padded).map(|i| (i * 37 + 11) as u8));
        frame
    }
}
