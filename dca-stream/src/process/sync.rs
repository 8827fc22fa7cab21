use crate::process::decode::{DcaLibrary, DecodeSession, SyncInfo};
use log::{debug, trace};

/// Length of the frame prefix used as a fast identity check.
pub const SIGNATURE_LEN: usize = 4;

/// Lock state of the synchronizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncState {
    /// No frame parsed yet.
    #[default]
    Unlocked,
    /// First bytes of the first frame parsed in this session.
    Locked([u8; SIGNATURE_LEN]),
}

/// Result of probing one window position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// No frame starts here. Shift the window by one byte and probe again.
    Skip,
    /// A frame may start here but the window is too short to hold it.
    Incomplete { needed: usize, available: usize },
    /// A complete frame of `frame_length` bytes starts the window.
    Frame(SyncInfo),
}

/// Locates frames in a byte window.
///
/// The first header the library accepts locks the synchronizer onto its
/// four-byte prefix. While locked, positions that do not start with that
/// prefix are skipped without asking the library; positions that do are
/// still parsed to learn the frame length, rate and bit rate.
///
/// Discontinuities do not release the lock. Only [`reset`](Self::reset),
/// called when the element goes from READY to PAUSED, lets a stream with a
/// different prefix be acquired.
#[derive(Debug, Default)]
pub struct Synchronizer {
    state: SyncState,
    skipped: usize,
}

impl Synchronizer {
    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.state, SyncState::Locked(_))
    }

    /// Drops the lock so the next frame header found is trusted afresh.
    pub fn reset(&mut self) {
        self.state = SyncState::Unlocked;
        self.skipped = 0;
    }

    /// Probes the start of `window`.
    pub fn probe<L: DcaLibrary>(
        &mut self,
        session: &mut DecodeSession<L>,
        window: &[u8],
    ) -> Probe {
        let header_len = L::HEADER_LEN.max(SIGNATURE_LEN);
        if window.len() < header_len {
            return Probe::Incomplete {
                needed: header_len,
                available: window.len(),
            };
        }

        if let SyncState::Locked(signature) = &self.state {
            if window[..SIGNATURE_LEN] != signature[..] {
                return self.skip();
            }
        }

        let Some(info) = session.sync_info(window).filter(|i| i.frame_length > 0) else {
            return self.skip();
        };

        if info.frame_length > window.len() {
            trace!(
                "Not enough data available (needed {} had {})",
                info.frame_length,
                window.len()
            );
            return Probe::Incomplete {
                needed: info.frame_length,
                available: window.len(),
            };
        }

        if let SyncState::Unlocked = self.state {
            let mut signature = [0u8; SIGNATURE_LEN];
            signature.copy_from_slice(&window[..SIGNATURE_LEN]);
            debug!(
                "Locked on frame signature {signature:02X?} ({} bytes, {} Hz)",
                info.frame_length, info.sample_rate
            );
            self.state = SyncState::Locked(signature);
        }

        if self.skipped > 0 {
            debug!("Resynchronized after skipping {} bytes", self.skipped);
            self.skipped = 0;
        }

        Probe::Frame(info)
    }

    fn skip(&mut self) -> Probe {
        self.skipped += 1;
        Probe::Skip
    }
}

#[cfg(test)]
fn scan(
    sync: &mut Synchronizer,
    session: &mut DecodeSession<crate::testing::ScriptedDca>,
    data: &[u8],
) -> (Vec<usize>, usize) {
    let mut frames = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        match sync.probe(session, &data[offset..]) {
            Probe::Skip => offset += 1,
            Probe::Incomplete { .. } => break,
            Probe::Frame(info) => {
                frames.push(offset);
                offset += info.frame_length;
            }
        }
    }
    (frames, offset)
}

#[test]
fn locks_on_first_frame() -> anyhow::Result<()> {
    use crate::testing::{FrameBuilder, ScriptedDca};

    let mut session = DecodeSession::<ScriptedDca>::open(2)?;
    let mut sync = Synchronizer::default();
    let frame = FrameBuilder::new().length(16).build();

    assert_eq!(sync.state(), SyncState::Unlocked);
    let Probe::Frame(info) = sync.probe(&mut session, &frame) else {
        panic!("expected a frame");
    };
    assert_eq!(info.frame_length, 16);
    assert_eq!(info.sample_rate, 48_000);

    let mut signature = [0u8; 4];
    signature.copy_from_slice(&frame[..4]);
    assert_eq!(sync.state(), SyncState::Locked(signature));
    Ok(())
}

#[test]
fn short_window_is_incomplete() -> anyhow::Result<()> {
    use crate::testing::{FrameBuilder, ScriptedDca};

    let mut session = DecodeSession::<ScriptedDca>::open(2)?;
    let mut sync = Synchronizer::default();
    let frame = FrameBuilder::new().length(16).build();

    assert!(matches!(
        sync.probe(&mut session, &frame[..5]),
        Probe::Incomplete { available: 5, .. }
    ));
    assert_eq!(
        sync.probe(&mut session, &frame[..14]),
        Probe::Incomplete {
            needed: 16,
            available: 14
        }
    );
    assert!(!sync.is_locked());
    Ok(())
}

#[test]
fn skips_garbage_before_frames() -> anyhow::Result<()> {
    use crate::testing::{FrameBuilder, ScriptedDca};

    let mut session = DecodeSession::<ScriptedDca>::open(2)?;
    let mut sync = Synchronizer::default();

    let mut data = vec![0x55; 9];
    data.extend(FrameBuilder::new().length(20).build());
    data.extend([0xFF, 0xFF, 0xFF]);
    data.extend(FrameBuilder::new().length(20).build());

    let (frames, consumed) = scan(&mut sync, &mut session, &data);
    assert_eq!(frames, [9, 32]);
    assert_eq!(consumed, data.len());
    Ok(())
}

#[test]
fn payload_corruption_keeps_lock() -> anyhow::Result<()> {
    use crate::testing::{FrameBuilder, ScriptedDca};

    let mut session = DecodeSession::<ScriptedDca>::open(2)?;
    let mut sync = Synchronizer::default();

    let first = FrameBuilder::new().length(24).build();
    let mut second = FrameBuilder::new().length(24).build();
    second[20] ^= 0xA5;
    let third = FrameBuilder::new().length(24).build();
    let data = [first, second, third].concat();

    let (frames, _) = scan(&mut sync, &mut session, &data);
    assert_eq!(frames, [0, 24, 48]);
    Ok(())
}

#[test]
fn locked_signature_rejects_other_prefixes() -> anyhow::Result<()> {
    use crate::testing::{FrameBuilder, ScriptedDca};

    let mut session = DecodeSession::<ScriptedDca>::open(2)?;
    let mut sync = Synchronizer::default();

    let first = FrameBuilder::new().build();
    let other = FrameBuilder::new().little_endian().build();
    assert!(matches!(sync.probe(&mut session, &first), Probe::Frame(_)));

    // A valid header with a different prefix is not trusted once locked.
    assert_eq!(sync.probe(&mut session, &other), Probe::Skip);

    sync.reset();
    assert!(matches!(sync.probe(&mut session, &other), Probe::Frame(_)));
    Ok(())
}
