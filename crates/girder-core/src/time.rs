//! Simulated time.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// A point in simulated time, in seconds since the start of the run.
///
/// Stored as `f64`; ordering uses [`f64::total_cmp`], so `SimTime`
/// values sort deterministically even if a NaN ever slips in. Callers
/// schedule with finite, non-negative delays.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SimTime(pub f64);

impl SimTime {
    /// Time zero, the start of the run.
    pub const ZERO: SimTime = SimTime(0.0);

    /// The far future; useful as a "never due" due date.
    pub const MAX: SimTime = SimTime(f64::MAX);

    /// Seconds since the start of the run.
    pub fn seconds(self) -> f64 {
        self.0
    }
}

impl Eq for SimTime {}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Add<f64> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: f64) -> SimTime {
        SimTime(self.0 + rhs)
    }
}

impl AddAssign<f64> for SimTime {
    fn add_assign(&mut self, rhs: f64) {
        self.0 += rhs;
    }
}

impl Sub for SimTime {
    type Output = f64;

    fn sub(self, rhs: SimTime) -> f64 {
        self.0 - rhs.0
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_total() {
        let a = SimTime(1.0);
        let b = SimTime(2.0);
        assert!(a < b);
        assert_eq!(a.max(b), b);
    }

    #[test]
    fn arithmetic() {
        let t = SimTime(10.0) + 2.5;
        assert_eq!(t, SimTime(12.5));
        assert_eq!(t - SimTime(10.0), 2.5);
    }
}
