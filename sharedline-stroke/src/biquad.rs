//! Second-order low-pass (biquad) filter.
//!
//! Coefficients for normalized cutoff `fc` and quality `q`:
//!
//! ```text
//! K    = tan(pi * fc)
//! norm = 1 / (1 + K/q + K^2)
//! a0 = K^2 * norm,  a1 = 2 * a0,  a2 = a0
//! b1 = 2 * (K^2 - 1) * norm
//! b2 = (1 - K/q + K^2) * norm
//! ```
//!
//! Processing is transposed direct form II with state `z1`, `z2`.

use sharedline_types::Point3;

/// Quality factor shared by every filter instance (Butterworth).
pub const FILTER_Q: f64 = 0.707;

/// One scalar filter channel.
#[derive(Debug, Clone, PartialEq)]
pub struct BiquadFilter {
    a0: f64,
    a1: f64,
    a2: f64,
    b1: f64,
    b2: f64,
    z1: f64,
    z2: f64,
}

impl BiquadFilter {
    /// Creates a filter for the normalized cutoff frequency `fc`.
    pub fn new(fc: f64) -> Self {
        Self::with_q(fc, FILTER_Q)
    }

    pub fn with_q(fc: f64, q: f64) -> Self {
        let k = (std::f64::consts::PI * fc).tan();
        let norm = 1.0 / (1.0 + k / q + k * k);
        let a0 = k * k * norm;
        Self {
            a0,
            a1: 2.0 * a0,
            a2: a0,
            b1: 2.0 * (k * k - 1.0) * norm,
            b2: (1.0 - k / q + k * k) * norm,
            z1: 0.0,
            z2: 0.0,
        }
    }

    /// Feeds one sample through the filter and returns the output.
    pub fn process(&mut self, input: f32) -> f32 {
        let x = f64::from(input);
        let out = x * self.a0 + self.z1;
        self.z1 = x * self.a1 + self.z2 - self.b1 * out;
        self.z2 = x * self.a2 - self.b2 * out;
        out as f32
    }

    /// Feed-forward and feedback coefficients `(a0, a1, a2, b1, b2)`.
    pub fn coefficients(&self) -> (f64, f64, f64, f64, f64) {
        (self.a0, self.a1, self.a2, self.b1, self.b2)
    }

    /// Current state `(z1, z2)`.
    pub fn state(&self) -> (f64, f64) {
        (self.z1, self.z2)
    }
}

/// Three independent channels, one per axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Vec3Filter {
    x: BiquadFilter,
    y: BiquadFilter,
    z: BiquadFilter,
}

impl Vec3Filter {
    pub fn new(fc: f64) -> Self {
        Self {
            x: BiquadFilter::new(fc),
            y: BiquadFilter::new(fc),
            z: BiquadFilter::new(fc),
        }
    }

    pub fn update(&mut self, input: Point3) -> Point3 {
        Point3::new(
            self.x.process(input.x),
            self.y.process(input.y),
            self.z.process(input.z),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coefficients_match_design_equations() {
        let f = BiquadFilter::new(0.07);
        let k = (std::f64::consts::PI * 0.07).tan();
        let norm = 1.0 / (1.0 + k / FILTER_Q + k * k);
        let (a0, a1, a2, b1, b2) = f.coefficients();
        assert!((a0 - k * k * norm).abs() < 1e-12);
        assert!((a1 - 2.0 * a0).abs() < 1e-12);
        assert!((a2 - a0).abs() < 1e-12);
        assert!((b1 - 2.0 * (k * k - 1.0) * norm).abs() < 1e-12);
        assert!((b2 - (1.0 - k / FILTER_Q + k * k) * norm).abs() < 1e-12);
    }

    #[test]
    fn unity_gain_at_dc() {
        let mut f = BiquadFilter::new(0.07);
        let mut out = 0.0;
        for _ in 0..2_000 {
            out = f.process(1.0);
        }
        assert!((out - 1.0).abs() < 1e-4);
    }

    #[test]
    fn first_output_is_scaled_by_a0() {
        let mut f = BiquadFilter::new(0.025);
        let (a0, ..) = f.coefficients();
        let out = f.process(2.0);
        assert!((f64::from(out) - 2.0 * a0).abs() < 1e-6);
        assert_ne!(f.state(), (0.0, 0.0));
    }
}
