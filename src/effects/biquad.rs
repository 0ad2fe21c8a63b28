// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Stereo biquad filter.
//!
//! Direct Form II Transposed with coefficients from the Audio EQ Cookbook
//! (Robert Bristow-Johnson).

use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiquadType {
    LowPass,
    HighPass,
    BandPass,
    Notch,
    Peak,
    LowShelf,
    HighShelf,
}

impl BiquadType {
    /// Filter types in the order the filter effect's type parameter selects them.
    pub const ALL: [BiquadType; 7] = [
        BiquadType::LowPass,
        BiquadType::HighPass,
        BiquadType::BandPass,
        BiquadType::Notch,
        BiquadType::Peak,
        BiquadType::LowShelf,
        BiquadType::HighShelf,
    ];

    pub fn from_index(index: usize) -> BiquadType {
        BiquadType::ALL[index.min(BiquadType::ALL.len() - 1)]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coefficients {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Coefficients {
    pub const IDENTITY: Coefficients = Coefficients {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    /// `gain_db` only affects peak and shelf types.
    pub fn new(kind: BiquadType, sample_rate: f64, frequency: f64, q: f64, gain_db: f64) -> Coefficients {
        let frequency = frequency.clamp(1.0, sample_rate * 0.49);
        let q = q.max(0.01);
        let w0 = 2.0 * PI * frequency / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);
        let a = 10f64.powf(gain_db / 40.0);

        let (b0, b1, b2, a0, a1, a2) = match kind {
            BiquadType::LowPass => {
                let b1 = 1.0 - cos_w0;
                (b1 / 2.0, b1, b1 / 2.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
            }
            BiquadType::HighPass => {
                let b0 = (1.0 + cos_w0) / 2.0;
                (b0, -(1.0 + cos_w0), b0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
            }
            BiquadType::BandPass => (alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha),
            BiquadType::Notch => (1.0, -2.0 * cos_w0, 1.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha),
            BiquadType::Peak => (
                1.0 + alpha * a,
                -2.0 * cos_w0,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos_w0,
                1.0 - alpha / a,
            ),
            BiquadType::LowShelf => {
                let sqrt_a = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 + sqrt_a),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 - sqrt_a),
                    (a + 1.0) + (a - 1.0) * cos_w0 + sqrt_a,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                    (a + 1.0) + (a - 1.0) * cos_w0 - sqrt_a,
                )
            }
            BiquadType::HighShelf => {
                let sqrt_a = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 + sqrt_a),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 - sqrt_a),
                    (a + 1.0) - (a - 1.0) * cos_w0 + sqrt_a,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                    (a + 1.0) - (a - 1.0) * cos_w0 - sqrt_a,
                )
            }
        };

        Coefficients {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Two independent channels sharing one set of coefficients.
#[derive(Debug, Clone, Copy)]
pub struct StereoBiquad {
    coefficients: Coefficients,
    z1: [f64; 2],
    z2: [f64; 2],
}

impl Default for StereoBiquad {
    fn default() -> Self {
        StereoBiquad {
            coefficients: Coefficients::IDENTITY,
            z1: [0.0; 2],
            z2: [0.0; 2],
        }
    }
}

impl StereoBiquad {
    pub fn set_coefficients(&mut self, coefficients: Coefficients) {
        self.coefficients = coefficients;
    }

    #[inline]
    pub fn process(&mut self, channel: usize, input: f32) -> f32 {
        let c = &self.coefficients;
        let input = input as f64;
        let output = c.b0 * input + self.z1[channel];
        self.z1[channel] = c.b1 * input - c.a1 * output + self.z2[channel];
        self.z2[channel] = c.b2 * input - c.a2 * output;
        output as f32
    }

    pub fn reset(&mut self) {
        self.z1 = [0.0; 2];
        self.z2 = [0.0; 2];
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::{calculate_rms, sine};

    fn filtered_rms(kind: BiquadType, frequency: f32, gain_db: f64) -> f32 {
        let mut filter = StereoBiquad::default();
        filter.set_coefficients(Coefficients::new(kind, 44100.0, 1000.0, 0.707, gain_db));
        let input = sine(frequency, 44100, 44100, 1.0);
        let output: Vec<f32> = input.iter().map(|&s| filter.process(0, s)).collect();
        // Skip the transient.
        calculate_rms(&output[4410..]) / calculate_rms(&input[4410..])
    }

    #[test]
    fn test_lowpass_and_highpass() {
        assert!(filtered_rms(BiquadType::LowPass, 100.0, 0.0) > 0.95);
        assert!(filtered_rms(BiquadType::LowPass, 10000.0, 0.0) < 0.05);
        assert!(filtered_rms(BiquadType::HighPass, 100.0, 0.0) < 0.05);
        assert!(filtered_rms(BiquadType::HighPass, 10000.0, 0.0) > 0.95);
    }

    #[test]
    fn test_shelves() {
        let boost = 10f32.powf(12.0 / 20.0);
        assert!((filtered_rms(BiquadType::LowShelf, 50.0, 12.0) - boost).abs() < 0.2);
        assert!((filtered_rms(BiquadType::LowShelf, 15000.0, 12.0) - 1.0).abs() < 0.05);
        assert!((filtered_rms(BiquadType::HighShelf, 15000.0, 12.0) - boost).abs() < 0.3);
    }

    #[test]
    fn test_peak_at_center() {
        let gain = filtered_rms(BiquadType::Peak, 1000.0, 6.0);
        assert!((gain - 10f32.powf(6.0 / 20.0)).abs() < 0.05);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut filter = StereoBiquad::default();
        filter.set_coefficients(Coefficients::new(BiquadType::LowPass, 44100.0, 500.0, 0.707, 0.0));
        filter.process(0, 1.0);
        filter.reset();
        assert_eq!(filter.process(0, 0.0), 0.0);
    }
}
