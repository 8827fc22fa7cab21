//! Contracts with the host pipeline.
//!
//! The element sees the pipeline through these types only: input chunks,
//! control events, lifecycle transitions and a [`Downstream`] peer that
//! accepts packets and events.

use std::fmt::{Display, Formatter};

use dca_stream::process::packetize::Packet;
use dca_stream::utils::errors::{DecodeError, PacketizeError};
use dca_stream::utils::timing::ClockTime;

/// A slice of the input bitstream as delivered by upstream.
#[derive(Debug, Clone, Default)]
pub struct InputChunk {
    pub data: Vec<u8>,
    pub pts: Option<ClockTime>,
    /// Set when `data` does not continue the previous chunk.
    pub discont: bool,
}

impl InputChunk {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn with_pts(mut self, pts: ClockTime) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn discont(mut self) -> Self {
        self.discont = true;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Undefined,
    Time,
    Bytes,
}

/// Playback segment announced downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub format: Format,
    pub rate: f64,
    pub start: u64,
    pub stop: Option<u64>,
    pub position: u64,
}

impl Segment {
    /// An open-ended segment starting at zero.
    pub fn new(format: Format) -> Self {
        Self {
            format,
            rate: 1.0,
            start: 0,
            stop: None,
            position: 0,
        }
    }
}

impl Default for Segment {
    fn default() -> Self {
        Self::new(Format::Undefined)
    }
}

/// Media type description used in negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caps {
    pub media_type: String,
    pub framed: bool,
}

impl Caps {
    pub fn new(media_type: &str, framed: bool) -> Self {
        Self {
            media_type: media_type.to_owned(),
            framed,
        }
    }

    /// The caps the element produces.
    pub fn lpcm() -> Self {
        Self::new(SRC_MEDIA_TYPE, true)
    }
}

impl Display for Caps {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, framed=(boolean){}", self.media_type, self.framed)
    }
}

/// Stream metadata pushed downstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagList {
    pub bitrate: Option<u32>,
}

impl TagList {
    pub fn bitrate(bitrate: u32) -> Self {
        Self {
            bitrate: Some(bitrate),
        }
    }
}

/// Out-of-band control signals travelling with the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Caps(Caps),
    Segment(Segment),
    Tag(TagList),
    Eos,
    FlushStart,
    FlushStop,
    Custom(String),
}

impl Event {
    pub fn name(&self) -> &str {
        match self {
            Event::Caps(_) => "caps",
            Event::Segment(_) => "segment",
            Event::Tag(_) => "tag",
            Event::Eos => "eos",
            Event::FlushStart => "flush-start",
            Event::FlushStop => "flush-stop",
            Event::Custom(name) => name,
        }
    }
}

/// Lifecycle transitions requested by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    NullToReady,
    ReadyToPaused,
    PausedToPlaying,
    PlayingToPaused,
    PausedToReady,
    ReadyToNull,
}

/// Failure of a data-flow call.
#[derive(thiserror::Error, Debug)]
pub enum FlowError {
    #[error("Source is not linked")]
    NotLinked,

    #[error("Downstream is flushing")]
    Flushing,

    #[error("Downstream reached end of stream")]
    Eos,

    #[error("Caps not negotiated")]
    NotNegotiated,

    #[error("Downstream refused the packet: {0}")]
    Refused(String),

    #[error(transparent)]
    Packetize(#[from] PacketizeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// The peer linked to the element's source.
pub trait Downstream {
    /// Takes ownership of one packet.
    fn push(&mut self, packet: Packet) -> Result<(), FlowError>;

    /// Delivers an event; `false` when it was not handled.
    fn push_event(&mut self, event: Event) -> bool;
}

/// Media types accepted on the sink.
pub const SINK_MEDIA_TYPES: [&str; 2] = ["audio/x-dts", "audio/x-private1-dts"];

/// Media type produced on the source.
pub const SRC_MEDIA_TYPE: &str = "audio/x-private1-lpcm";

/// Registration details of the element.
#[derive(Debug, Clone, Copy)]
pub struct ElementMetadata {
    pub name: &'static str,
    pub long_name: &'static str,
    pub classification: &'static str,
    pub description: &'static str,
    pub author: &'static str,
    pub rank: Rank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rank {
    None = 0,
    Marginal = 64,
    Secondary = 128,
    Primary = 256,
}

pub const METADATA: ElementMetadata = ElementMetadata {
    name: "dtsdownmix",
    long_name: "DTS audio downmixer",
    classification: "Codec/Decoder/Audio",
    description: "Downmixes DTS audio streams",
    author: "PLi team",
    rank: Rank::Primary,
};

/// Whether the sink accepts `caps`.
pub fn sink_accepts(caps: &Caps) -> bool {
    caps.framed && SINK_MEDIA_TYPES.contains(&caps.media_type.as_str())
}

#[test]
fn sink_caps() {
    assert!(sink_accepts(&Caps::new("audio/x-dts", true)));
    assert!(sink_accepts(&Caps::new("audio/x-private1-dts", true)));
    assert!(!sink_accepts(&Caps::new("audio/x-dts", false)));
    assert!(!sink_accepts(&Caps::new("audio/x-ac3", true)));
    assert_eq!(
        Caps::lpcm().to_string(),
        "audio/x-private1-lpcm, framed=(boolean)true"
    );
}
