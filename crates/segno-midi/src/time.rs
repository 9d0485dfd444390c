//! Real-time axis with saturating arithmetic and unbounded sentinels.

use core::fmt;
use core::ops::{Add, Sub};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Position on the monotonic playback axis, in nanoseconds.
///
/// [`RealTime::EARLIEST`] and [`RealTime::LATEST`] are reserved sentinels for
/// unbounded ranges. All arithmetic saturates, so padding a sentinel leaves it
/// a sentinel.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RealTime(i64);

impl RealTime {
    pub const ZERO: RealTime = RealTime(0);
    pub const EARLIEST: RealTime = RealTime(i64::MIN);
    pub const LATEST: RealTime = RealTime(i64::MAX);

    #[inline]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    #[inline]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros.saturating_mul(1_000))
    }

    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        // `as` saturates out-of-range floats
        Self((secs * 1e9) as i64)
    }

    #[inline]
    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1e9
    }

    #[inline]
    pub const fn is_earliest(self) -> bool {
        self.0 == i64::MIN
    }

    #[inline]
    pub const fn is_latest(self) -> bool {
        self.0 == i64::MAX
    }

    /// True for either sentinel.
    #[inline]
    pub const fn is_unbounded(self) -> bool {
        self.is_earliest() || self.is_latest()
    }

    #[inline]
    pub const fn saturating_add(self, rhs: RealTime) -> Self {
        if self.is_unbounded() {
            return self;
        }
        Self(self.0.saturating_add(rhs.0))
    }

    #[inline]
    pub const fn saturating_sub(self, rhs: RealTime) -> Self {
        if self.is_unbounded() {
            return self;
        }
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Clamp negative durations to zero.
    #[inline]
    pub fn non_negative(self) -> Self {
        self.max(Self::ZERO)
    }

    /// Round down to a multiple of `step`. Sentinels and a zero step are unchanged.
    pub fn floor_to(self, step: RealTime) -> Self {
        if step.0 <= 0 || self.is_unbounded() {
            return self;
        }
        Self(self.0.div_euclid(step.0).saturating_mul(step.0))
    }

    /// Round up to a multiple of `step`. Sentinels and a zero step are unchanged.
    pub fn ceil_to(self, step: RealTime) -> Self {
        if step.0 <= 0 || self.is_unbounded() {
            return self;
        }
        let floor = self.floor_to(step);
        if floor == self {
            self
        } else {
            floor.saturating_add(step)
        }
    }
}

impl Add for RealTime {
    type Output = RealTime;

    fn add(self, rhs: RealTime) -> RealTime {
        self.saturating_add(rhs)
    }
}

impl Sub for RealTime {
    type Output = RealTime;

    fn sub(self, rhs: RealTime) -> RealTime {
        self.saturating_sub(rhs)
    }
}

impl From<Duration> for RealTime {
    fn from(d: Duration) -> Self {
        Self(i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
    }
}

impl fmt::Display for RealTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_earliest() {
            return f.write_str("-inf");
        }
        if self.is_latest() {
            return f.write_str("+inf");
        }
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:09}s", sign, abs / 1_000_000_000, abs % 1_000_000_000)
    }
}
