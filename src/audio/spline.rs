//! Six-point spline interpolation over a circular history
//!
//! The kernel is the 5th-order, 6-tap Hermite-style polynomial: it passes
//! through the sample at every integer position and is C² continuous, so a
//! cursor moving at any fractional rate yields a smooth signal.

use crate::constants::{SPLINE_TAPS_AHEAD, SPLINE_TAPS_BEHIND};

/// Sample types the interpolator can read
pub trait SplineSample: Copy {
    fn to_f64(self) -> f64;
}

impl SplineSample for f32 {
    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl SplineSample for f64 {
    #[inline]
    fn to_f64(self) -> f64 {
        self
    }
}

/// Interpolate `history` at `fractional_index`.
///
/// Reads the samples at `floor - 2 ..= floor + 3`, each wrapped into
/// `0..history.len()`, so the read window may straddle the buffer boundary
/// and the index itself may lie outside the buffer. An empty history yields 0.
#[inline]
pub fn interpolate<T: SplineSample>(history: &[T], fractional_index: f64) -> f64 {
    let len = history.len();
    if len == 0 || !fractional_index.is_finite() {
        return 0.0;
    }

    let base = fractional_index.floor();
    let fr = fractional_index - base;
    let base = (base as i64).rem_euclid(len as i64) as usize;

    let tap = |offset: isize| -> f64 {
        // base < len, so base + len + offset is never negative for |offset| <= len
        let idx = (base + len).wrapping_add_signed(offset) % len;
        history[idx].to_f64()
    };

    let p0 = tap(-(SPLINE_TAPS_BEHIND as isize));
    let p1 = tap(-1);
    let p2 = tap(0);
    let p3 = tap(1);
    let p4 = tap(2);
    let p5 = tap(SPLINE_TAPS_AHEAD as isize);

    kernel(p0, p1, p2, p3, p4, p5, fr)
}

#[inline]
fn kernel(p0: f64, p1: f64, p2: f64, p3: f64, p4: f64, p5: f64, fr: f64) -> f64 {
    p2 + (1.0 / 24.0)
        * fr
        * ((p3 - p1) * 16.0
            + (p0 - p4) * 2.0
            + fr * ((p3 + p1) * 16.0 - p0 - p2 * 30.0 - p4
                + fr * (p3 * 66.0 - p2 * 70.0 - p4 * 33.0 + p1 * 39.0 + p5 * 7.0 - p0 * 9.0
                    + fr * (p2 * 126.0 - p3 * 124.0 + p4 * 61.0 - p1 * 64.0 - p5 * 12.0
                        + p0 * 13.0
                        + fr * ((p3 - p2) * 50.0 + (p1 - p4) * 25.0 + (p5 - p0) * 5.0)))))
}
