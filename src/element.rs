//! The downmix element: lifecycle, event handling and the per-chunk loop.

use std::sync::Arc;

use dca_stream::log_or_err;
use dca_stream::process::cache::ByteCache;
use dca_stream::process::decode::{DcaLibrary, DecodeSession};
use dca_stream::process::packetize::Packetizer;
use dca_stream::process::sync::{Probe, SyncState, Synchronizer};
use dca_stream::utils::errors::DecodeError;
use dca_stream::utils::timing::ClockTime;
use log::{debug, info, trace, warn};

use crate::config::{ConfigError, ElementConfig};
use crate::framework::{
    Caps, Downstream, Event, FlowError, Format, InputChunk, Segment, StateChange, TagList,
    sink_accepts,
};
use crate::platform::{PlatformSettings, SyncModeGuard};

#[derive(thiserror::Error, Debug)]
pub enum StateChangeError {
    #[error("Stereo downmix is disabled in the platform settings")]
    DownmixDisabled,

    #[error("Cannot start the decoder")]
    Decoder(#[from] DecodeError),
}

/// Resources held between NullToReady and ReadyToNull.
///
/// Fields drop in order: the decoder is freed before the sync mode is
/// restored.
struct ActiveSession<L: DcaLibrary, P: PlatformSettings> {
    decoder: DecodeSession<L>,
    _sync_mode: SyncModeGuard<P>,
}

/// Clock and stream facts carried across chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct StreamTiming {
    /// Timestamp of the next packet.
    timestamp: Option<ClockTime>,
    sample_rate: Option<u32>,
    bit_rate: Option<u32>,
}

/// DTS in, stereo LPCM out.
pub struct DtsDownmix<L: DcaLibrary, P: PlatformSettings, D: Downstream> {
    config: ElementConfig,
    platform: Arc<P>,
    downstream: D,
    session: Option<ActiveSession<L, P>>,
    cache: ByteCache,
    sync: Synchronizer,
    packetizer: Packetizer,
    timing: StreamTiming,
    segment: Segment,
    segment_sent: bool,
    fail_level: log::Level,
}

impl<L: DcaLibrary, P: PlatformSettings, D: Downstream> DtsDownmix<L, P, D> {
    pub fn new(
        config: ElementConfig,
        platform: Arc<P>,
        downstream: D,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let fail_level = config.fail_level();
        let packetizer = Packetizer::new(config.channels as usize, config.frequency)
            .with_fail_level(fail_level);

        Ok(Self {
            config,
            platform,
            downstream,
            session: None,
            cache: ByteCache::default(),
            sync: Synchronizer::default(),
            packetizer,
            timing: StreamTiming::default(),
            segment: Segment::default(),
            segment_sent: false,
            fail_level,
        })
    }

    pub fn config(&self) -> &ElementConfig {
        &self.config
    }

    /// Whether a decoder is open and the source is linked.
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn downstream(&self) -> &D {
        &self.downstream
    }

    pub fn downstream_mut(&mut self) -> &mut D {
        &mut self.downstream
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync.state()
    }

    /// Timestamp the next packet will carry.
    pub fn timestamp(&self) -> Option<ClockTime> {
        self.timing.timestamp
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.timing.sample_rate
    }

    pub fn bit_rate(&self) -> Option<u32> {
        self.timing.bit_rate
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    pub fn change_state(&mut self, transition: StateChange) -> Result<(), StateChangeError> {
        info!("State change {transition:?}");

        match transition {
            StateChange::NullToReady => self.start()?,
            StateChange::ReadyToPaused => {
                self.timing = StreamTiming::default();
                self.sync.reset();
                self.segment = Segment::default();
                self.segment_sent = false;
            }
            StateChange::PausedToReady => self.cache.clear(),
            StateChange::ReadyToNull => {
                if self.session.take().is_some() {
                    debug!("Decoder freed, source unlinked");
                }
            }
            StateChange::PausedToPlaying | StateChange::PlayingToPaused => {}
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), StateChangeError> {
        if self.session.is_some() {
            debug!("Decoder already open");
            return Ok(());
        }
        if !self.platform.downmix_enabled() {
            return Err(StateChangeError::DownmixDisabled);
        }

        // A failed open drops the guard, which restores the sync mode.
        let sync_mode =
            SyncModeGuard::acquire(self.platform.clone(), &self.config.platform.sync_mode);
        let decoder = DecodeSession::open(self.config.channels as usize)?
            .with_level(self.config.level, self.config.bias);

        self.session = Some(ActiveSession {
            decoder,
            _sync_mode: sync_mode,
        });
        self.timing.bit_rate = None;
        debug!("Decoder open for {} channels", self.config.channels);
        Ok(())
    }

    /// Handles an event arriving on the sink; `false` when it was refused.
    pub fn sink_event(&mut self, event: Event) -> bool {
        if self.session.is_none() {
            debug!("No source link, dropping {} event", event.name());
            return false;
        }
        trace!("Event {}", event.name());

        match event {
            Event::Caps(caps) => {
                if !self.platform.downmix_enabled() {
                    warn!("Downmix disabled, refusing {caps}");
                    return false;
                }
                if !sink_accepts(&caps) {
                    warn!("Unsupported input {caps}");
                    return false;
                }
                self.downstream.push_event(Event::Caps(Caps::lpcm()))
            }
            Event::Segment(segment) => {
                self.segment = segment.clone();
                self.segment_sent = true;
                self.downstream.push_event(Event::Segment(segment))
            }
            Event::FlushStop => {
                self.cache.clear();
                self.segment = Segment::default();
                self.segment_sent = false;
                self.timing = StreamTiming::default();
                self.downstream.push_event(Event::FlushStop)
            }
            other => self.downstream.push_event(other),
        }
    }

    /// Processes one chunk of the DTS stream.
    ///
    /// Every complete frame in the cached tail plus `chunk` becomes one
    /// packet pushed downstream. Bytes of an incomplete trailing frame are
    /// kept for the next call.
    pub fn chain(&mut self, chunk: InputChunk) -> Result<(), FlowError> {
        let Some(active) = self.session.as_mut() else {
            warn!("Chunk dropped, source not linked");
            return Err(FlowError::NotLinked);
        };

        if chunk.discont {
            debug!("Discontinuity, dropping {} cached bytes", self.cache.len());
            self.cache.clear();
            self.timing.timestamp = None;
        }
        if self.timing.timestamp.is_none() {
            self.timing.timestamp = chunk.pts;
        }

        if !self.segment_sent {
            self.segment = Segment::new(Format::Time);
            self.downstream.push_event(Event::Segment(self.segment.clone()));
            self.segment_sent = true;
        }

        let window = self.cache.merge(chunk.data);
        let mut offset = 0;

        while offset < window.len() {
            let info = match self.sync.probe(&mut active.decoder, &window[offset..]) {
                Probe::Skip => {
                    offset += 1;
                    continue;
                }
                Probe::Incomplete { needed, available } => {
                    trace!("Caching {available} bytes, frame needs {needed}");
                    break;
                }
                Probe::Frame(info) => info,
            };

            let frame = &window[offset..offset + info.frame_length];
            offset += info.frame_length;

            self.timing.sample_rate = Some(info.sample_rate);
            match self.timing.bit_rate.replace(info.bit_rate) {
                Some(previous) if previous != info.bit_rate => {
                    debug!("Bit rate {previous} -> {}", info.bit_rate);
                    self.downstream
                        .push_event(Event::Tag(TagList::bitrate(info.bit_rate)));
                }
                _ => {}
            }

            let decoded = match active.decoder.decode_frame(frame) {
                Ok(decoded) => decoded,
                Err(e) => {
                    log_or_err!(self, log::Level::Warn, e);
                    continue;
                }
            };

            let pts = self.timing.timestamp;
            let packet = self.packetizer.packetize(
                &mut active.decoder,
                &decoded,
                info.sample_rate,
                pts,
            )?;
            self.timing.timestamp = pts.map(|t| t + packet.duration);

            if let Err(e) = self.downstream.push(packet) {
                warn!(
                    "Push failed: {e}, discarding {} bytes",
                    window.len() - offset
                );
                self.cache.clear();
                return Err(e);
            }
        }

        self.cache.retain(&window, offset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::tests::MemoryPlatform;
    use dca_stream::process::packetize::{FrequencyPolicy, Packet};
    use dca_stream::testing::{FrameBuilder, ScriptedDca, UnavailableDca};

    #[derive(Debug)]
    enum Output {
        Packet(Packet),
        Event(Event),
    }

    /// Downstream that records everything and can start refusing packets.
    #[derive(Debug, Default)]
    struct Recorder {
        out: Vec<Output>,
        accept: Option<usize>,
    }

    impl Recorder {
        fn packets(&self) -> Vec<&Packet> {
            self.out
                .iter()
                .filter_map(|o| match o {
                    Output::Packet(p) => Some(p),
                    Output::Event(_) => None,
                })
                .collect()
        }

        fn events(&self) -> Vec<&Event> {
            self.out
                .iter()
                .filter_map(|o| match o {
                    Output::Event(e) => Some(e),
                    Output::Packet(_) => None,
                })
                .collect()
        }
    }

    impl Downstream for Recorder {
        fn push(&mut self, packet: Packet) -> Result<(), FlowError> {
            if self.accept.is_some_and(|n| self.packets().len() >= n) {
                return Err(FlowError::Flushing);
            }
            self.out.push(Output::Packet(packet));
            Ok(())
        }

        fn push_event(&mut self, event: Event) -> bool {
            self.out.push(Output::Event(event));
            true
        }
    }

    type TestElement = DtsDownmix<ScriptedDca, MemoryPlatform, Recorder>;

    const LPCM_HEADER: [u8; 7] = [0xA0, 0x02, 0x00, 0x04, 0x00, 0x81, 0x80];

    fn block_duration() -> u64 {
        256 * 1_000_000_000 / 48_000
    }

    fn started_with(
        config: ElementConfig,
    ) -> anyhow::Result<(TestElement, Arc<MemoryPlatform>)> {
        let platform = Arc::new(MemoryPlatform::new(true, Some("video")));
        let mut element = DtsDownmix::new(config, platform.clone(), Recorder::default())?;
        element.change_state(StateChange::NullToReady)?;
        element.change_state(StateChange::ReadyToPaused)?;
        Ok((element, platform))
    }

    fn started() -> anyhow::Result<TestElement> {
        Ok(started_with(ElementConfig::default())?.0)
    }

    #[test]
    fn two_frames_in_one_chunk() -> anyhow::Result<()> {
        let mut element = started()?;
        let data = [FrameBuilder::new().build(), FrameBuilder::new().build()].concat();
        assert_eq!(data.len(), 32);

        element.chain(InputChunk::new(data).with_pts(ClockTime::ZERO))?;

        let recorder = element.downstream();
        assert_eq!(
            recorder.events(),
            [&Event::Segment(Segment::new(Format::Time))]
        );
        let packets = recorder.packets();
        assert_eq!(packets.len(), 2);
        for packet in &packets {
            assert_eq!(packet.header(), LPCM_HEADER);
            assert_eq!(packet.data.len(), 7 + 256 * 2 * 3);
            assert_eq!(packet.duration.nseconds(), block_duration());
        }
        assert_eq!(packets[0].pts, Some(ClockTime::ZERO));
        assert_eq!(packets[1].pts, Some(ClockTime::ZERO + packets[0].duration));
        assert_eq!(
            element.timestamp(),
            Some(ClockTime::from_nseconds(2 * block_duration()))
        );
        assert_eq!(element.cached_len(), 0);
        assert_eq!(element.sample_rate(), Some(48_000));
        Ok(())
    }

    #[test]
    fn partial_frame_is_cached() -> anyhow::Result<()> {
        let mut element = started()?;
        let frame = FrameBuilder::new().build();

        element.chain(InputChunk::new(&frame[..5]))?;
        assert!(element.downstream().packets().is_empty());
        assert_eq!(element.cached_len(), 5);

        element.chain(InputChunk::new(&frame[5..]))?;
        assert_eq!(element.downstream().packets().len(), 1);
        assert_eq!(element.cached_len(), 0);
        Ok(())
    }

    #[test]
    fn split_position_does_not_change_output() -> anyhow::Result<()> {
        let mut data = vec![0x55; 3];
        data.extend(FrameBuilder::new().length(20).amplitude(0.5).build());
        data.extend(FrameBuilder::new().blocks(2).length(30).build());
        let pts = ClockTime::from_nseconds(40_000_000);

        let mut whole = started()?;
        whole.chain(InputChunk::new(data.clone()).with_pts(pts))?;
        let expected: Vec<Packet> = whole.downstream().packets().into_iter().cloned().collect();
        assert_eq!(expected.len(), 2);

        for split in 0..=data.len() {
            let mut element = started()?;
            element.chain(InputChunk::new(&data[..split]).with_pts(pts))?;
            element.chain(InputChunk::new(&data[split..]))?;

            let packets: Vec<Packet> =
                element.downstream().packets().into_iter().cloned().collect();
            assert_eq!(packets, expected, "split at {split}");
            assert_eq!(element.cached_len(), 0);
        }
        Ok(())
    }

    #[test]
    fn discontinuity_drops_stale_bytes() -> anyhow::Result<()> {
        let mut element = started()?;
        let stale = FrameBuilder::new().amplitude(-0.5).build();
        let fresh = FrameBuilder::new().amplitude(0.5).build();

        element.chain(InputChunk::new(&stale[..10]).with_pts(ClockTime::ZERO))?;
        assert_eq!(element.cached_len(), 10);

        element.chain(
            InputChunk::new(fresh)
                .with_pts(ClockTime::SECOND)
                .discont(),
        )?;

        let packets = element.downstream().packets();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].pts, Some(ClockTime::SECOND));
        // 0.5 -> 0x400000 on the left channel
        assert_eq!(packets[0].payload()[..2], [0x40, 0x00]);
        Ok(())
    }

    #[test]
    fn bit_rate_change_is_tagged_once() -> anyhow::Result<()> {
        let mut element = started()?;
        let data = [
            FrameBuilder::new().bit_rate_kbps(768).build(),
            FrameBuilder::new().bit_rate_kbps(1536).build(),
            FrameBuilder::new().bit_rate_kbps(1536).build(),
        ]
        .concat();

        element.chain(InputChunk::new(data))?;

        let out = &element.downstream().out;
        assert!(matches!(
            out.as_slice(),
            [
                Output::Event(Event::Segment(_)),
                Output::Packet(_),
                Output::Event(Event::Tag(TagList {
                    bitrate: Some(1_536_000)
                })),
                Output::Packet(_),
                Output::Packet(_),
            ]
        ));
        assert_eq!(element.bit_rate(), Some(1_536_000));
        Ok(())
    }

    #[test]
    fn push_failure_discards_the_rest() -> anyhow::Result<()> {
        let mut element = started()?;
        element.downstream_mut().accept = Some(1);
        let frame = FrameBuilder::new().build();
        let data = [frame.clone(), frame.clone(), frame[..8].to_vec()].concat();

        assert!(matches!(
            element.chain(InputChunk::new(data)),
            Err(FlowError::Flushing)
        ));
        assert_eq!(element.downstream().packets().len(), 1);
        assert_eq!(element.cached_len(), 0);

        element.downstream_mut().accept = None;
        element.chain(InputChunk::new(frame))?;
        assert_eq!(element.downstream().packets().len(), 2);
        Ok(())
    }

    #[test]
    fn rejected_frame_is_skipped() -> anyhow::Result<()> {
        let mut element = started()?;
        let data = [
            FrameBuilder::new().build(),
            FrameBuilder::new().rejected().build(),
            FrameBuilder::new().build(),
        ]
        .concat();

        element.chain(InputChunk::new(data).with_pts(ClockTime::ZERO))?;

        let packets = element.downstream().packets();
        assert_eq!(packets.len(), 2);
        assert_eq!(
            packets[1].pts,
            Some(ClockTime::from_nseconds(block_duration()))
        );
        Ok(())
    }

    #[test]
    fn strict_mode_aborts_on_rejected_frame() -> anyhow::Result<()> {
        let config = ElementConfig {
            strict: true,
            ..Default::default()
        };
        let (mut element, _) = started_with(config)?;
        let data = [
            FrameBuilder::new().rejected().build(),
            FrameBuilder::new().build(),
        ]
        .concat();

        assert!(matches!(
            element.chain(InputChunk::new(data)),
            Err(FlowError::Decode(DecodeError::FrameRejected(16)))
        ));
        assert!(element.downstream().packets().is_empty());
        Ok(())
    }

    #[test]
    fn garbage_only_chunk_keeps_short_tail() -> anyhow::Result<()> {
        let mut element = started()?;
        element.chain(InputChunk::new(vec![0x42; 40]))?;

        assert!(element.downstream().packets().is_empty());
        assert_eq!(element.sync_state(), SyncState::Unlocked);
        // The last bytes are too short to probe and wait for more data.
        assert_eq!(element.cached_len(), ScriptedDca::HEADER_LEN - 1);
        Ok(())
    }

    #[test]
    fn sync_mode_follows_lifecycle() -> anyhow::Result<()> {
        let (mut element, platform) = started_with(ElementConfig::default())?;
        assert_eq!(platform.current().as_deref(), Some("audio"));
        assert!(element.is_active());

        element.change_state(StateChange::PausedToReady)?;
        element.change_state(StateChange::ReadyToNull)?;
        assert!(!element.is_active());
        assert_eq!(platform.current().as_deref(), Some("video"));
        assert_eq!(*platform.writes.lock().unwrap(), ["audio", "video"]);
        Ok(())
    }

    #[test]
    fn failed_decoder_start_restores_sync_mode() -> anyhow::Result<()> {
        let platform = Arc::new(MemoryPlatform::new(true, Some("video")));
        let mut element: DtsDownmix<UnavailableDca, _, _> =
            DtsDownmix::new(ElementConfig::default(), platform.clone(), Recorder::default())?;

        assert!(matches!(
            element.change_state(StateChange::NullToReady),
            Err(StateChangeError::Decoder(DecodeError::InitFailed))
        ));
        assert!(!element.is_active());
        assert_eq!(platform.current().as_deref(), Some("video"));
        assert_eq!(*platform.writes.lock().unwrap(), ["audio", "video"]);
        Ok(())
    }

    #[test]
    fn downmix_disabled_blocks_start() -> anyhow::Result<()> {
        let platform = Arc::new(MemoryPlatform::new(false, Some("video")));
        let mut element: TestElement =
            DtsDownmix::new(ElementConfig::default(), platform.clone(), Recorder::default())?;

        assert!(matches!(
            element.change_state(StateChange::NullToReady),
            Err(StateChangeError::DownmixDisabled)
        ));
        assert!(platform.writes.lock().unwrap().is_empty());
        assert!(matches!(
            element.chain(InputChunk::new(FrameBuilder::new().build())),
            Err(FlowError::NotLinked)
        ));
        assert!(!element.sink_event(Event::Eos));
        Ok(())
    }

    #[test]
    fn caps_negotiation() -> anyhow::Result<()> {
        let (mut element, platform) = started_with(ElementConfig::default())?;

        assert!(element.sink_event(Event::Caps(Caps::new("audio/x-dts", true))));
        assert!(!element.sink_event(Event::Caps(Caps::new("audio/x-ac3", true))));

        platform.set_downmix(false);
        assert!(!element.sink_event(Event::Caps(Caps::new("audio/x-private1-dts", true))));

        assert_eq!(element.downstream().events(), [&Event::Caps(Caps::lpcm())]);
        Ok(())
    }

    #[test]
    fn upstream_segment_replaces_default() -> anyhow::Result<()> {
        let mut element = started()?;
        let segment = Segment {
            start: 1_000,
            ..Segment::new(Format::Time)
        };

        assert!(element.sink_event(Event::Segment(segment.clone())));
        element.chain(InputChunk::new(FrameBuilder::new().build()))?;
        assert!(element.sink_event(Event::Eos));

        assert_eq!(
            element.downstream().events(),
            [&Event::Segment(segment.clone()), &Event::Eos]
        );
        assert_eq!(element.segment(), &segment);
        Ok(())
    }

    #[test]
    fn flush_resets_stream_state() -> anyhow::Result<()> {
        let mut element = started()?;
        let frame = FrameBuilder::new().build();
        element.chain(InputChunk::new(frame.clone()).with_pts(ClockTime::SECOND))?;
        element.chain(InputChunk::new(&frame[..6]))?;
        assert_eq!(element.cached_len(), 6);

        assert!(element.sink_event(Event::FlushStart));
        assert!(element.sink_event(Event::FlushStop));
        assert_eq!(element.cached_len(), 0);
        assert_eq!(element.timestamp(), None);
        assert_eq!(element.bit_rate(), None);
        assert_eq!(element.segment().format, Format::Undefined);
        assert!(matches!(element.sync_state(), SyncState::Locked(_)));

        element.chain(InputChunk::new(frame).with_pts(ClockTime::ZERO))?;
        let packets = element.downstream().packets();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[1].pts, Some(ClockTime::ZERO));

        let segments = element
            .downstream()
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Segment(_)))
            .count();
        assert_eq!(segments, 2);
        Ok(())
    }

    #[test]
    fn configured_level_and_bias_reach_the_decoder() -> anyhow::Result<()> {
        let config = ElementConfig {
            level: 0.5,
            bias: 0.125,
            ..Default::default()
        };
        let (mut element, _) = started_with(config)?;

        element.chain(InputChunk::new(FrameBuilder::new().amplitude(0.5).build()))?;

        // 0.5 * 0.5 + 0.125 -> 0x300000, -0.5 * 0.5 + 0.125 -> 0xF00000
        let packets = element.downstream().packets();
        assert_eq!(
            packets[0].payload()[..12],
            [0x30, 0x00, 0xF0, 0x00, 0x30, 0x00, 0xF0, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
        Ok(())
    }

    #[test]
    fn detected_rate_sets_header_and_duration() -> anyhow::Result<()> {
        let config = ElementConfig {
            frequency: FrequencyPolicy::FromSampleRate,
            ..Default::default()
        };
        let (mut element, _) = started_with(config)?;
        let data = [
            FrameBuilder::new().sample_rate(96_000).build(),
            FrameBuilder::new().sample_rate(96_000).blocks(2).build(),
        ]
        .concat();

        element.chain(InputChunk::new(data).with_pts(ClockTime::ZERO))?;

        let packets = element.downstream().packets();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].data[5], 0x91);
        assert_eq!(packets[0].duration.nseconds(), 256 * 1_000_000_000 / 96_000);
        assert_eq!(packets[1].duration.nseconds(), 2 * 256 * 1_000_000_000 / 96_000);
        assert_eq!(packets[1].pts, Some(packets[0].duration));
        assert_eq!(element.sample_rate(), Some(96_000));
        Ok(())
    }

    #[test]
    fn only_ready_to_paused_releases_the_lock() -> anyhow::Result<()> {
        let mut element = started()?;
        let other = [
            FrameBuilder::new().little_endian().build(),
            FrameBuilder::new().little_endian().build(),
        ]
        .concat();

        element.chain(InputChunk::new(FrameBuilder::new().build()))?;
        element.chain(InputChunk::new(other.clone()).discont())?;
        assert_eq!(element.downstream().packets().len(), 1);

        element.change_state(StateChange::PausedToReady)?;
        element.change_state(StateChange::ReadyToPaused)?;
        assert_eq!(element.sync_state(), SyncState::Unlocked);

        element.chain(InputChunk::new(other))?;
        assert_eq!(element.downstream().packets().len(), 3);
        Ok(())
    }
}
