//! Stream core of the DTS downmix element.
//!
//! Turns a DTS elementary stream, delivered in chunks of any size, into
//! DVD-style stereo LPCM packets. Decoding itself is delegated to a
//! [`DcaLibrary`](process::decode::DcaLibrary) implementation.
//!
//! ## Pipeline
//!
//! 1. Merge each incoming chunk with leftover bytes using
//!    [`process::cache::ByteCache`]
//! 2. Find frame boundaries with [`process::sync::Synchronizer`]
//! 3. Decode a frame block by block through [`process::decode::DecodeSession`]
//! 4. Serialize the blocks with [`process::packetize::Packetizer`]
//!
//! ```rust,no_run
//! # #[cfg(feature = "test-util")]
//! # fn main() -> anyhow::Result<()> {
//! use dca_stream::process::cache::ByteCache;
//! use dca_stream::process::decode::DecodeSession;
//! use dca_stream::process::packetize::Packetizer;
//! use dca_stream::process::sync::{Probe, Synchronizer};
//! use dca_stream::testing::{FrameBuilder, ScriptedDca};
//!
//! let mut cache = ByteCache::default();
//! let mut sync = Synchronizer::default();
//! let mut session = DecodeSession::<ScriptedDca>::open(2)?;
//! let packetizer = Packetizer::default();
//!
//! let window = cache.merge(FrameBuilder::new().build());
//! let mut offset = 0;
//! while let Probe::Frame(info) = sync.probe(&mut session, &window[offset..]) {
//!     let frame = &window[offset..offset + info.frame_length];
//!     let decoded = session.decode_frame(frame)?;
//!     let packet = packetizer.packetize(&mut session, &decoded, info.sample_rate, None)?;
//!     println!("{} byte packet", packet.data.len());
//!     offset += info.frame_length;
//! }
//! cache.retain(&window, offset);
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "test-util"))]
//! # fn main() {}
//! ```

/// Reassembly, synchronization, decoding and packetization.
pub mod process;

/// Error types, fail-level logging and clock arithmetic.
pub mod utils;

pub(crate) mod byteorder;

/// Bindings to the system libdca.
#[cfg(feature = "libdca")]
pub mod ffi;

/// Deterministic decode library for tests.
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
