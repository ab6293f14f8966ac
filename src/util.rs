//! Miscellaneous utility structs.

use std::fmt::Debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A stretch of road along one axis, such as the extent of a vehicle body.
#[derive(Copy, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Interval {
    pub min: f64,
    pub max: f64,
}

impl Interval {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Creates an interval reaching `radius` either side of `centre`.
    pub fn disc(centre: f64, radius: f64) -> Self {
        Self::new(centre - radius, centre + radius)
    }

    /// Grows the interval by `amount` at both ends.
    pub fn inflate(&self, amount: f64) -> Self {
        Self::disc(0.5 * (self.min + self.max), 0.5 * self.length() + amount)
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        self.clearance_with(other) < 0.0
    }

    pub fn length(&self) -> f64 {
        self.max - self.min
    }

    /// The free space between two intervals; negative when they overlap.
    pub fn clearance_with(&self, other: &Self) -> f64 {
        f64::max(other.min - self.max, self.min - other.max)
    }
}

/// Shifts the interval along its axis.
impl std::ops::Add<f64> for Interval {
    type Output = Interval;

    fn add(self, shift: f64) -> Self::Output {
        Self::new(self.min + shift, self.max + shift)
    }
}

impl Debug for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:.2}, {:.2}]", self.min, self.max)
    }
}
