//! Channel intervals and the padded time range a stream requires.

use segno_midi::{ChannelId, RealTime};

/// A channel id paired with the closed time range its owner may use it for.
///
/// `start <= end` always holds. `[EARLIEST, LATEST]` is *eternal*.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelInterval {
    channel: ChannelId,
    start: RealTime,
    end: RealTime,
}

impl ChannelInterval {
    /// `None` if `start > end`.
    pub fn new(channel: ChannelId, start: RealTime, end: RealTime) -> Option<Self> {
        (start <= end).then_some(Self {
            channel,
            start,
            end,
        })
    }

    pub const fn eternal(channel: ChannelId) -> Self {
        Self {
            channel,
            start: RealTime::EARLIEST,
            end: RealTime::LATEST,
        }
    }

    #[inline]
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    #[inline]
    pub fn start(&self) -> RealTime {
        self.start
    }

    #[inline]
    pub fn end(&self) -> RealTime {
        self.end
    }

    #[inline]
    pub fn is_eternal(&self) -> bool {
        self.start.is_earliest() && self.end.is_latest()
    }

    /// Whether `[start, end]` lies entirely inside this interval.
    #[inline]
    pub fn covers(&self, start: RealTime, end: RealTime) -> bool {
        self.start <= start && end <= self.end
    }

    /// Whether the two ranges share more than an endpoint, ignoring channel
    /// ids. A stream's requirement ends exclusively, so back-to-back
    /// intervals can be held on one channel.
    #[inline]
    pub fn overlaps(&self, other: &ChannelInterval) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Required coverage of a stream: `[start, end)` plus asymmetric margins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequiredInterval {
    pub start: RealTime,
    pub end: RealTime,
    pub start_margin: RealTime,
    pub end_margin: RealTime,
}

impl RequiredInterval {
    pub fn new(start: RealTime, end: RealTime, start_margin: RealTime, end_margin: RealTime) -> Self {
        let (start, end) = if end < start { (end, start) } else { (start, end) };
        Self {
            start,
            end,
            start_margin: start_margin.non_negative(),
            end_margin: end_margin.non_negative(),
        }
    }

    pub const fn eternal() -> Self {
        Self {
            start: RealTime::EARLIEST,
            end: RealTime::LATEST,
            start_margin: RealTime::ZERO,
            end_margin: RealTime::ZERO,
        }
    }

    /// The range a held interval must cover, margins applied.
    pub fn padded(&self) -> (RealTime, RealTime) {
        (
            self.start.saturating_sub(self.start_margin),
            self.end.saturating_add(self.end_margin),
        )
    }

    pub fn is_eternal(&self) -> bool {
        self.start.is_earliest() && self.end.is_latest()
    }
}

impl Default for RequiredInterval {
    fn default() -> Self {
        Self::new(RealTime::ZERO, RealTime::ZERO, RealTime::ZERO, RealTime::ZERO)
    }
}
