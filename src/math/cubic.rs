//! Mathematical functions.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A cubic function, used for the lateral profile of a lane change over time.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CubicFn {
    coeffs: [f64; 4],
    offset: f64,
}

impl CubicFn {
    pub const fn constant(y: f64) -> Self {
        Self {
            coeffs: [0.0, 0.0, 0.0, y],
            offset: 0.0,
        }
    }

    /// Fits a cubic through `(x1, y1)` and `(x2, y2)` with zero slope at both ends.
    pub fn from_ends(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        let (x, y) = (x2 - x1, y2 - y1);
        if x == 0.0 {
            return Self::constant(y2);
        }
        let a = -2.0 * y * x.powi(-3);
        let b = 3.0 * y * x.powi(-2);
        let coeffs = [a, b, 0.0, y1];
        let offset = -x1;
        Self { coeffs, offset }
    }

    pub fn y(&self, x: f64) -> f64 {
        self.y_and_dy(x).0
    }

    pub fn dy(&self, x: f64) -> f64 {
        self.y_and_dy(x).1
    }

    /// Evaluates the function and its derivative at `x`.
    pub fn y_and_dy(&self, x: f64) -> (f64, f64) {
        let [a, b, c, d] = self.coeffs;
        let x = x + self.offset;
        let y = ((a * x + b) * x + c) * x + d;
        let dy = (3.0 * a * x + 2.0 * b) * x + c;
        (y, dy)
    }
}
