//! Clock arithmetic for packet timestamps.
//!
//! Times are nanosecond counts, the unit used by the host pipeline.

use std::fmt::{Display, Formatter};
use std::ops::Add;

/// Samples produced per channel by one decoded block.
pub const SAMPLES_PER_BLOCK: u64 = 256;

/// A point or span on the pipeline clock, in nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime(u64);

impl ClockTime {
    pub const ZERO: ClockTime = ClockTime(0);
    pub const SECOND: ClockTime = ClockTime(1_000_000_000);

    pub const fn from_nseconds(ns: u64) -> Self {
        Self(ns)
    }

    pub const fn nseconds(self) -> u64 {
        self.0
    }

    /// Duration of `num_blocks` blocks at `sample_rate`, truncated to whole
    /// nanoseconds. `None` for a zero sample rate.
    pub fn for_blocks(num_blocks: usize, sample_rate: u32) -> Option<Self> {
        if sample_rate == 0 {
            return None;
        }
        let ns = (num_blocks as u128 * Self::SECOND.0 as u128 * SAMPLES_PER_BLOCK as u128)
            / sample_rate as u128;
        Some(Self(u64::try_from(ns).unwrap_or(u64::MAX)))
    }
}

impl Add for ClockTime {
    type Output = ClockTime;

    fn add(self, rhs: ClockTime) -> ClockTime {
        ClockTime(self.0.saturating_add(rhs.0))
    }
}

impl Display for ClockTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let ms = self.0 / 1_000_000;
        let hours = ms / 3_600_000;
        let minutes = (ms % 3_600_000) / 60_000;
        let seconds = (ms % 60_000) / 1000;
        let milliseconds = ms % 1000;

        write!(
            f,
            "{hours:0width$}:{minutes:02}:{seconds:02}.{milliseconds:03}",
            width = if hours >= 100 { 0 } else { 2 }
        )
    }
}

#[test]
fn block_duration() {
    let one = ClockTime::for_blocks(1, 48_000).unwrap();
    assert_eq!(one.nseconds(), 5_333_333);

    let sixteen = ClockTime::for_blocks(16, 48_000).unwrap();
    assert_eq!(sixteen.nseconds(), 85_333_333);

    assert_eq!(ClockTime::for_blocks(4, 0), None);
}

#[test]
fn display_as_timecode() {
    let t = ClockTime::from_nseconds(3_723_456_000_000);
    assert_eq!(t.to_string(), "01:02:03.456");
    assert_eq!(ClockTime::ZERO.to_string(), "00:00:00.000");
}
