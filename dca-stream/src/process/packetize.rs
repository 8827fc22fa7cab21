use crate::byteorder::WriteBytesBe;
use crate::log_or_err;
use crate::process::decode::{BLOCK_LEN, DcaLibrary, DecodeSession, FrameDecode};
use crate::utils::errors::PacketizeError;
use crate::utils::timing::ClockTime;
use bitstream_io::{BigEndian, BitWrite, BitWriter};
use dtsdownmix_macros::ToBytes;
use log::{trace, warn};
use serde::{Deserialize, Serialize};

/// Size of the DVD LPCM private stream header.
pub const HEADER_LEN: usize = 7;

/// Bytes per sample after 24-bit conversion.
pub const BYTES_PER_SAMPLE: usize = 3;

/// Largest magnitude a converted sample may take.
pub const SAMPLE_MAX: i32 = 8_388_607;

const SAMPLE_SCALE: f32 = 8_388_607.5;

/// Quantization code for 24 bits per sample.
const QUANTIZATION_24: u8 = 2;

/// Converts a decoded sample to 24-bit signed, saturating at the range ends.
#[inline]
pub fn convert(s: f32) -> i32 {
    ((s * SAMPLE_SCALE).round() as i32).clamp(-SAMPLE_MAX, SAMPLE_MAX)
}

/// Sampling frequency field of the LPCM header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrequencyCode {
    Hz48000 = 0,
    Hz96000 = 1,
    Hz44100 = 2,
    Hz32000 = 3,
}

impl FrequencyCode {
    pub fn from_sample_rate(sample_rate: u32) -> Option<Self> {
        match sample_rate {
            48_000 => Some(Self::Hz48000),
            96_000 => Some(Self::Hz96000),
            44_100 => Some(Self::Hz44100),
            32_000 => Some(Self::Hz32000),
            _ => None,
        }
    }
}

/// How the frequency field is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrequencyPolicy {
    /// Always signal 48 kHz, whatever the stream carries.
    #[default]
    #[serde(rename = "fixed-48k")]
    Fixed48k,
    /// Signal the detected rate; rates without a code fall back to 48 kHz.
    FromSampleRate,
}

impl FrequencyPolicy {
    pub fn code_for(self, sample_rate: u32) -> FrequencyCode {
        match self {
            Self::Fixed48k => FrequencyCode::Hz48000,
            Self::FromSampleRate => FrequencyCode::from_sample_rate(sample_rate)
                .unwrap_or_else(|| {
                    warn!("No LPCM frequency code for {sample_rate} Hz, signalling 48 kHz");
                    FrequencyCode::Hz48000
                }),
        }
    }
}

/// DVD LPCM private stream header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ToBytes)]
pub struct LpcmHeader {
    pub substream_id: u8,
    pub frame_count: u8,
    /// Offset of the first access unit, counted from the last pointer byte.
    pub first_access_unit: u16,
    /// Emphasis, mute, reserved and the 5-bit current frame number.
    pub frame_number: u8,
    /// Quantization, frequency, reserved bit and channel count minus one.
    pub format: u8,
    pub dynamic_range: u8,
}

impl LpcmHeader {
    /// Header for 24-bit samples at `frequency` with `channels` channels.
    pub fn new(frequency: FrequencyCode, channels: usize) -> Result<Self, PacketizeError> {
        let mut w = BitWriter::endian(Vec::with_capacity(1), BigEndian);
        w.write_unsigned_var(2, QUANTIZATION_24)?;
        w.write_unsigned_var(2, frequency as u8)?;
        w.write_bit(false)?;
        w.write_unsigned_var(3, channels.saturating_sub(1).min(7) as u8)?;
        let format = w.into_writer()[0];

        Ok(Self {
            substream_id: 0xA0,
            frame_count: 0x02,
            first_access_unit: 0x0004,
            frame_number: 0x00,
            format,
            dynamic_range: 0x80,
        })
    }
}

/// One frame of LPCM output with its timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub data: Vec<u8>,
    pub pts: Option<ClockTime>,
    pub duration: ClockTime,
}

impl Packet {
    pub fn header(&self) -> &[u8] {
        &self.data[..HEADER_LEN.min(self.data.len())]
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[HEADER_LEN.min(self.data.len())..]
    }
}

/// Packs one stereo block into `dest`.
///
/// Samples go out in groups of two stereo pairs, `L[n] R[n] L[n+1] R[n+1]`:
/// the high and middle bytes of all four first, then the four low bytes.
pub fn pack_stereo_block(left: &[f32], right: &[f32], dest: &mut [u8]) {
    for ((l, r), out) in left
        .chunks_exact(2)
        .zip(right.chunks_exact(2))
        .zip(dest.chunks_exact_mut(12))
    {
        let group = [convert(l[0]), convert(r[0]), convert(l[1]), convert(r[1])];
        for (i, sample) in group.into_iter().enumerate() {
            out[2 * i] = (sample >> 16) as u8;
            out[2 * i + 1] = (sample >> 8) as u8;
            out[8 + i] = sample as u8;
        }
    }
}

/// Serializes decoded frames into LPCM packets.
#[derive(Debug, Clone, Copy)]
pub struct Packetizer {
    channels: usize,
    frequency: FrequencyPolicy,
    fail_level: log::Level,
}

impl Default for Packetizer {
    fn default() -> Self {
        Self::new(2, FrequencyPolicy::default())
    }
}

impl Packetizer {
    pub fn new(channels: usize, frequency: FrequencyPolicy) -> Self {
        Self {
            channels,
            frequency,
            fail_level: log::Level::Error,
        }
    }

    /// Block errors logged at or above `level` abort the packet.
    pub fn with_fail_level(mut self, level: log::Level) -> Self {
        self.fail_level = level;
        self
    }

    pub fn block_bytes(&self) -> usize {
        BLOCK_LEN * self.channels * BYTES_PER_SAMPLE
    }

    pub fn packet_len(&self, num_blocks: usize) -> usize {
        num_blocks * self.block_bytes() + HEADER_LEN
    }

    /// Decodes every block of the submitted frame into one packet.
    ///
    /// Blocks the library fails to decode stay zero-filled unless the fail
    /// level is `Warn` or lower. `pts` is the
    /// packet timestamp; the caller advances its clock by the returned
    /// packet's duration.
    pub fn packetize<L: DcaLibrary>(
        &self,
        session: &mut DecodeSession<L>,
        decoded: &FrameDecode,
        sample_rate: u32,
        pts: Option<ClockTime>,
    ) -> Result<Packet, PacketizeError> {
        let duration = ClockTime::for_blocks(decoded.num_blocks, sample_rate)
            .ok_or(PacketizeError::InvalidSampleRate)?;

        let size = self.packet_len(decoded.num_blocks);
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|source| PacketizeError::Allocation { size, source })?;

        LpcmHeader::new(self.frequency.code_for(sample_rate), self.channels)?.write_be(&mut data);
        data.resize(size, 0);

        let block_bytes = self.block_bytes();
        for (index, dest) in data[HEADER_LEN..]
            .chunks_exact_mut(block_bytes)
            .enumerate()
        {
            match session.decode_block() {
                Ok(block) => pack_stereo_block(block.channel(0), block.channel(1), dest),
                Err(e) => {
                    log_or_err!(self, log::Level::Warn, e);
                    trace!("Block {index} left silent");
                }
            }
        }

        trace!(
            "Packet of {} blocks, {size} bytes, pts {}, duration {}",
            decoded.num_blocks,
            pts.map(|t| t.to_string()).unwrap_or_else(|| "none".into()),
            duration
        );

        Ok(Packet {
            data,
            pts,
            duration,
        })
    }
}

#[test]
fn convert_saturates() {
    assert_eq!(convert(0.0), 0);
    assert_eq!(convert(1.0), SAMPLE_MAX);
    assert_eq!(convert(-1.0), -SAMPLE_MAX);
    assert_eq!(convert(2.5), SAMPLE_MAX);
    assert_eq!(convert(-7.0), -SAMPLE_MAX);
    assert_eq!(convert(f32::INFINITY), SAMPLE_MAX);
    assert_eq!(convert(f32::NEG_INFINITY), -SAMPLE_MAX);
    assert_eq!(convert(0.5), 4_194_304);
}

#[test]
fn convert_is_monotonic_in_range() {
    let mut previous = convert(-1.0);
    for step in 0..=20_000 {
        let s = -1.0 + step as f32 * 1.0e-4;
        let value = convert(s);
        assert!((-SAMPLE_MAX..=SAMPLE_MAX).contains(&value), "{s} -> {value}");
        assert!(value >= previous, "{s} -> {value} after {previous}");
        previous = value;
    }
}

#[test]
fn header_bytes() -> anyhow::Result<()> {
    let mut out = Vec::new();
    LpcmHeader::new(FrequencyCode::Hz48000, 2)?.write_be(&mut out);
    assert_eq!(out, [0xA0, 0x02, 0x00, 0x04, 0x00, 0x81, 0x80]);

    let header = LpcmHeader::new(FrequencyCode::Hz96000, 2)?;
    assert_eq!(header.format, 0x91);
    Ok(())
}

#[test]
fn frequency_policy() {
    assert_eq!(
        FrequencyPolicy::Fixed48k.code_for(96_000),
        FrequencyCode::Hz48000
    );
    assert_eq!(
        FrequencyPolicy::FromSampleRate.code_for(44_100),
        FrequencyCode::Hz44100
    );
    assert_eq!(
        FrequencyPolicy::FromSampleRate.code_for(22_050),
        FrequencyCode::Hz48000
    );
}

#[test]
fn interleave_of_two_pairs() {
    let mut left = [0.0f32; BLOCK_LEN];
    let mut right = [0.0f32; BLOCK_LEN];
    // 0x123456, -0x000102 (0xFFFEFE), 0x7FFFFF, -0x7FFFFF (0x800001)
    left[0] = 0x12_3456 as f32 / SAMPLE_SCALE;
    right[0] = -(0x102 as f32) / SAMPLE_SCALE;
    left[1] = 1.0;
    right[1] = -1.0;

    let mut dest = vec![0u8; BLOCK_LEN * 2 * BYTES_PER_SAMPLE];
    pack_stereo_block(&left, &right, &mut dest);

    assert_eq!(
        dest[..12],
        [
            0x12, 0x34, 0xFF, 0xFE, 0x7F, 0xFF, 0x80, 0x00, 0x56, 0xFE, 0xFF, 0x01
        ]
    );
    assert!(dest[12..].iter().all(|&b| b == 0));
}

#[test]
fn packet_layout_and_timing() -> anyhow::Result<()> {
    use crate::testing::{FrameBuilder, ScriptedDca};

    let mut session = DecodeSession::<ScriptedDca>::open(2)?;
    let packetizer = Packetizer::default();
    let frame = FrameBuilder::new().blocks(2).amplitude(0.5).build();
    let decoded = session.decode_frame(&frame)?;

    let pts = ClockTime::from_nseconds(1_000);
    let packet = packetizer.packetize(&mut session, &decoded, 48_000, Some(pts))?;

    assert_eq!(packet.data.len(), 2 * 256 * 2 * 3 + 7);
    assert_eq!(packet.header(), [0xA0, 0x02, 0x00, 0x04, 0x00, 0x81, 0x80]);
    assert_eq!(packet.pts, Some(pts));
    assert_eq!(packet.duration.nseconds(), 2 * 256 * 1_000_000_000 / 48_000);

    // 0.5 -> 0x400000, -0.5 -> 0xC00000
    assert_eq!(
        packet.payload()[..12],
        [0x40, 0x00, 0xC0, 0x00, 0x40, 0x00, 0xC0, 0x00, 0x00, 0x00, 0x00, 0x00]
    );
    Ok(())
}

#[test]
fn failed_block_is_zero_padding() -> anyhow::Result<()> {
    use crate::testing::{FrameBuilder, ScriptedDca};

    let mut session = DecodeSession::<ScriptedDca>::open(2)?;
    let packetizer = Packetizer::default();
    let frame = FrameBuilder::new()
        .blocks(3)
        .failing_blocks(0b001)
        .amplitude(0.5)
        .build();
    let decoded = session.decode_frame(&frame)?;
    let packet = packetizer.packetize(&mut session, &decoded, 48_000, None)?;

    let block_bytes = packetizer.block_bytes();
    let payload = packet.payload();
    assert_eq!(payload.len(), 3 * block_bytes);
    assert!(payload[..block_bytes].iter().all(|&b| b == 0));
    assert_eq!(payload[block_bytes], 0x40);
    assert_eq!(payload[2 * block_bytes], 0x40);
    Ok(())
}

#[test]
fn zero_sample_rate_is_refused() -> anyhow::Result<()> {
    use crate::testing::{FrameBuilder, ScriptedDca};

    let mut session = DecodeSession::<ScriptedDca>::open(2)?;
    let decoded = session.decode_frame(&FrameBuilder::new().build())?;
    assert!(matches!(
        Packetizer::default().packetize(&mut session, &decoded, 0, None),
        Err(PacketizeError::InvalidSampleRate)
    ));
    Ok(())
}

#[test]
fn strict_block_failure_aborts() -> anyhow::Result<()> {
    use crate::testing::{FrameBuilder, ScriptedDca};
    use crate::utils::errors::DecodeError;

    let mut session = DecodeSession::<ScriptedDca>::open(2)?;
    let packetizer = Packetizer::default().with_fail_level(log::Level::Warn);
    let frame = FrameBuilder::new().blocks(2).failing_blocks(0b10).build();
    let decoded = session.decode_frame(&frame)?;

    assert!(matches!(
        packetizer.packetize(&mut session, &decoded, 48_000, None),
        Err(PacketizeError::Decode(DecodeError::BlockFailed(1)))
    ));
    Ok(())
}
