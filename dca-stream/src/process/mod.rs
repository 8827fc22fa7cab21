/// Leftover bytes between chunks.
///
/// Provides the [`ByteCache`](cache::ByteCache) that joins the tail of the
/// previous chunk with the next one.
pub mod cache;

/// Frame boundary detection.
///
/// Provides the [`Synchronizer`](sync::Synchronizer), which locks onto the
/// first four bytes of a valid frame header and rescans byte by byte when
/// they stop matching.
pub mod sync;

/// Decode library adapter.
///
/// Provides the [`DcaLibrary`](decode::DcaLibrary) contract and the
/// [`DecodeSession`](decode::DecodeSession) that forces a stereo downmix.
pub mod decode;

/// DVD LPCM serialization.
///
/// Provides the [`Packetizer`](packetize::Packetizer) producing
/// [`Packet`](packetize::Packet)s with a 7-byte header and 24-bit samples.
pub mod packetize;
