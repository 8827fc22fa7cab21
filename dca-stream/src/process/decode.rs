use crate::utils::errors::DecodeError;
use crate::utils::timing::SAMPLES_PER_BLOCK;
use log::trace;
use std::ops::BitOr;

/// Samples per channel per block, as a buffer length.
pub const BLOCK_LEN: usize = SAMPLES_PER_BLOCK as usize;

/// Channel layout and processing flags exchanged with the decode library.
///
/// Values follow `dca.h`: the low six bits select the output layout,
/// `LFE` and `ADJUST_LEVEL` are independent bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownmixFlags(pub u32);

impl DownmixFlags {
    pub const STEREO: DownmixFlags = DownmixFlags(2);
    pub const CHANNEL_MASK: DownmixFlags = DownmixFlags(0x3F);
    pub const LFE: DownmixFlags = DownmixFlags(0x80);
    pub const ADJUST_LEVEL: DownmixFlags = DownmixFlags(0x100);

    /// The channel-collapse request for `channels` output channels.
    pub fn for_channels(channels: usize) -> Result<Self, DecodeError> {
        match channels {
            2 => Ok(Self::STEREO),
            n => Err(DecodeError::UnsupportedChannels(n)),
        }
    }

    pub fn layout(self) -> u32 {
        self.0 & Self::CHANNEL_MASK.0
    }

    pub fn contains(self, other: DownmixFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for DownmixFlags {
    type Output = DownmixFlags;

    fn bitor(self, rhs: DownmixFlags) -> DownmixFlags {
        DownmixFlags(self.0 | rhs.0)
    }
}

/// Header facts reported by the library's sync primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncInfo {
    /// Frame size in bytes, header included.
    pub frame_length: usize,
    pub sample_rate: u32,
    pub bit_rate: u32,
    /// Channel layout coded in the stream.
    pub flags: DownmixFlags,
}

/// Call contract of an external DTS decoder.
///
/// Mirrors the libdca API. One value is one decoder state; dropping it frees
/// the state. After a successful [`frame`](DcaLibrary::frame) call,
/// [`block`](DcaLibrary::block) must be called [`blocks_num`] times, each
/// call refilling [`samples`](DcaLibrary::samples) with one block laid out
/// channel after channel, [`BLOCK_LEN`] samples each.
///
/// [`blocks_num`]: DcaLibrary::blocks_num
pub trait DcaLibrary: Sized {
    /// Bytes the sync primitive reads from the start of a candidate frame.
    const HEADER_LEN: usize;

    fn init() -> Result<Self, DecodeError>;

    /// Parses a frame header at the start of `data`. `None` when no valid
    /// header starts there.
    fn sync_info(&mut self, data: &[u8]) -> Option<SyncInfo>;

    /// Submits a complete frame. `flags` and `level` are updated with what
    /// the library actually applied.
    fn frame(
        &mut self,
        data: &[u8],
        flags: &mut DownmixFlags,
        level: &mut f32,
        bias: f32,
    ) -> Result<(), DecodeError>;

    fn blocks_num(&self) -> usize;

    fn block(&mut self) -> Result<(), DecodeError>;

    fn samples(&self) -> &[f32];
}

/// Outcome of submitting one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameDecode {
    pub level: f32,
    pub bias: f32,
    pub num_blocks: usize,
    pub flags: DownmixFlags,
}

/// One decoded block, borrowed from the library's sample buffer.
#[derive(Debug, Clone, Copy)]
pub struct BlockSamples<'a> {
    data: &'a [f32],
    channels: usize,
}

impl<'a> BlockSamples<'a> {
    pub fn channel(&self, index: usize) -> &'a [f32] {
        &self.data[index * BLOCK_LEN..(index + 1) * BLOCK_LEN]
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

/// Per-instance decoder state with a fixed output layout.
///
/// Every frame is submitted with the channel-collapse flag for
/// `channels` outputs and automatic level adjustment.
#[derive(Debug)]
pub struct DecodeSession<L: DcaLibrary> {
    library: L,
    channels: usize,
    downmix: DownmixFlags,
    level: f32,
    bias: f32,
    blocks: usize,
    next_block: usize,
}

impl<L: DcaLibrary> DecodeSession<L> {
    /// Allocates decoder state for `channels` output channels.
    pub fn open(channels: usize) -> Result<Self, DecodeError> {
        let downmix = DownmixFlags::for_channels(channels)?;
        let library = L::init()?;

        Ok(Self {
            library,
            channels,
            downmix,
            level: 1.0,
            bias: 0.0,
            blocks: 0,
            next_block: 0,
        })
    }

    /// Sets the gain and bias passed with every frame.
    pub fn with_level(mut self, level: f32, bias: f32) -> Self {
        self.level = level;
        self.bias = bias;
        self
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn library(&self) -> &L {
        &self.library
    }

    pub fn sync_info(&mut self, data: &[u8]) -> Option<SyncInfo> {
        self.library.sync_info(data)
    }

    /// Submits a complete frame for stereo downmix.
    ///
    /// A rejected frame leaves the session usable; the caller drops the
    /// frame and keeps scanning.
    pub fn decode_frame(&mut self, frame: &[u8]) -> Result<FrameDecode, DecodeError> {
        let mut flags = self.downmix | DownmixFlags::ADJUST_LEVEL;
        let mut level = self.level;

        self.blocks = 0;
        self.next_block = 0;

        self.library
            .frame(frame, &mut flags, &mut level, self.bias)
            .map_err(|_| DecodeError::FrameRejected(frame.len()))?;

        self.blocks = self.library.blocks_num();
        trace!(
            "Frame of {} bytes: {} blocks, flags {:#X}, level {level}",
            frame.len(),
            self.blocks,
            flags.0
        );

        Ok(FrameDecode {
            level,
            bias: self.bias,
            num_blocks: self.blocks,
            flags,
        })
    }

    /// Decodes the next block of the current frame.
    pub fn decode_block(&mut self) -> Result<BlockSamples<'_>, DecodeError> {
        let index = self.next_block;
        if index >= self.blocks {
            return Err(DecodeError::BlockOverrun {
                index,
                blocks: self.blocks,
            });
        }
        self.next_block += 1;

        self.library
            .block()
            .map_err(|_| DecodeError::BlockFailed(index))?;

        let needed = BLOCK_LEN * self.channels;
        let samples = self.library.samples();
        if samples.len() < needed {
            return Err(DecodeError::ShortSampleBuffer {
                needed,
                actual: samples.len(),
            });
        }

        Ok(BlockSamples {
            data: &samples[..needed],
            channels: self.channels,
        })
    }
}

#[test]
fn stereo_is_the_only_layout() {
    assert_eq!(DownmixFlags::for_channels(2).unwrap(), DownmixFlags::STEREO);
    assert!(matches!(
        DownmixFlags::for_channels(6),
        Err(DecodeError::UnsupportedChannels(6))
    ));
}

#[test]
fn frame_requests_stereo_with_level_adjust() -> anyhow::Result<()> {
    use crate::testing::{FrameBuilder, ScriptedDca};

    let mut session = DecodeSession::<ScriptedDca>::open(2)?;
    let frame = FrameBuilder::new().blocks(3).build();

    let decoded = session.decode_frame(&frame)?;
    assert_eq!(decoded.num_blocks, 3);
    assert_eq!(decoded.flags.layout(), DownmixFlags::STEREO.0);
    assert!(decoded.flags.contains(DownmixFlags::ADJUST_LEVEL));
    Ok(())
}

#[test]
fn blocks_are_bounded_by_frame() -> anyhow::Result<()> {
    use crate::testing::{FrameBuilder, ScriptedDca};

    let mut session = DecodeSession::<ScriptedDca>::open(2)?;
    let frame = FrameBuilder::new().blocks(2).amplitude(0.5).build();
    session.decode_frame(&frame)?;

    let block = session.decode_block()?;
    assert_eq!(block.channel(0).len(), BLOCK_LEN);
    assert!(block.channel(0).iter().all(|&s| s == 0.5));
    assert!(block.channel(1).iter().all(|&s| s == -0.5));

    session.decode_block()?;
    assert!(matches!(
        session.decode_block(),
        Err(DecodeError::BlockOverrun { index: 2, blocks: 2 })
    ));
    Ok(())
}

#[test]
fn failed_block_reports_its_index() -> anyhow::Result<()> {
    use crate::testing::{FrameBuilder, ScriptedDca};

    let mut session = DecodeSession::<ScriptedDca>::open(2)?;
    let frame = FrameBuilder::new().blocks(3).failing_blocks(0b010).build();
    session.decode_frame(&frame)?;

    assert!(session.decode_block().is_ok());
    assert!(matches!(
        session.decode_block(),
        Err(DecodeError::BlockFailed(1))
    ));
    assert!(session.decode_block().is_ok());
    Ok(())
}

#[test]
fn level_and_bias_reach_the_library() -> anyhow::Result<()> {
    use crate::testing::{FrameBuilder, ScriptedDca};

    let mut session = DecodeSession::<ScriptedDca>::open(2)?.with_level(0.5, 0.125);
    let decoded = session.decode_frame(&FrameBuilder::new().amplitude(0.5).build())?;
    assert_eq!(decoded.level, 0.5);
    assert_eq!(decoded.bias, 0.125);
    assert_eq!(session.library().frames_submitted, 1);
    assert_eq!(session.library().level, 0.5);
    assert_eq!(session.library().bias, 0.125);

    let block = session.decode_block()?;
    assert!(block.channel(0).iter().all(|&s| s == 0.375));
    assert!(block.channel(1).iter().all(|&s| s == -0.125));
    Ok(())
}
