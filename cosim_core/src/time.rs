//! Logical simulation time.
//!
//! `cosim` represents time as a count of nanoseconds rather than a `f64` count of seconds: federates
//! commonly compare and hash time values (dependency tracking, the query subsystem's delayed-object
//! keys), and floating point does not admit a total order that survives repeated addition. A
//! nanosecond tick still covers the same practical range HELICS exposes through its `double`-seconds
//! API, so the public constructors and accessors speak seconds and the internal representation stays
//! an exact integer.

use std::{
    fmt::Display,
    ops::{Add, AddAssign, Sub, SubAssign},
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A point (or duration) in logical simulation time, represented as whole nanoseconds.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Time(i64);

impl Time {
    /// The origin of simulation time, `t = 0`.
    pub const ZERO: Time = Time(0);

    /// A sentinel meaning "never" -- used for a dependency's `Tnext` once it has disconnected, so
    /// that it no longer constrains anyone else's time grant.
    pub const MAX_TIME: Time = Time(i64::MAX);

    /// A sentinel used where no time value is applicable yet (the initial value of `forwardEvent`
    /// before any event has been observed, for instance).
    pub const MIN_TIME: Time = Time(i64::MIN);

    const NANOS_PER_SEC: f64 = 1_000_000_000.0;

    /// Constructs a `Time` from a count of whole seconds expressed as `f64`.
    ///
    /// Values are rounded to the nearest nanosecond; this matches the resolution HELICS federates
    /// typically request (`deltaTime` / `period` / `timeRequest` APIs all operate at or above
    /// nanosecond precision in practice).
    pub fn from_seconds(seconds: f64) -> Self {
        Self((seconds * Self::NANOS_PER_SEC).round() as i64)
    }

    pub fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub fn as_seconds(&self) -> f64 {
        self.0 as f64 / Self::NANOS_PER_SEC
    }

    pub fn as_nanos(&self) -> i64 {
        self.0
    }

    pub fn is_max_time(&self) -> bool {
        *self == Self::MAX_TIME
    }

    pub fn min(self, other: Self) -> Self {
        std::cmp::min(self, other)
    }

    pub fn max(self, other: Self) -> Self {
        std::cmp::max(self, other)
    }
}

impl Display for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self == Self::MAX_TIME {
            write!(f, "never")
        } else {
            write!(f, "{:.9}", self.as_seconds())
        }
    }
}

impl From<f64> for Time {
    fn from(seconds: f64) -> Self {
        Self::from_seconds(seconds)
    }
}

impl Add for Time {
    type Output = Time;

    fn add(self, rhs: Self) -> Self::Output {
        if self == Self::MAX_TIME || rhs == Self::MAX_TIME {
            Self::MAX_TIME
        } else {
            Time(self.0 + rhs.0)
        }
    }
}

impl AddAssign for Time {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Time {
    type Output = Time;

    fn sub(self, rhs: Self) -> Self::Output {
        if self == Self::MAX_TIME {
            Self::MAX_TIME
        } else {
            Time(self.0 - rhs.0)
        }
    }
}

impl SubAssign for Time {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_roundtrip() {
        let t = Time::from_seconds(1.5);
        assert_eq!(t.as_seconds(), 1.5);
        assert_eq!(t.as_nanos(), 1_500_000_000);
    }

    #[test]
    fn max_time_absorbs_addition() {
        let t = Time::MAX_TIME + Time::from_seconds(1.0);
        assert_eq!(t, Time::MAX_TIME);
    }

    #[test]
    fn ordering_matches_seconds() {
        assert!(Time::from_seconds(1.0) < Time::from_seconds(2.0));
        assert!(Time::ZERO < Time::MAX_TIME);
    }
}
