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

//! Three-band equalizer: low shelf, mid peak and high shelf.

use std::any::Any;

use super::biquad::{BiquadType, Coefficients, StereoBiquad};
use super::{stereo_frames, Effect, EffectKind, ParamInfo, ProcessContext};

pub const LOW_FREQ: usize = 0;
pub const LOW_GAIN: usize = 1;
pub const MID_FREQ: usize = 2;
pub const MID_GAIN: usize = 3;
pub const MID_Q: usize = 4;
pub const HIGH_FREQ: usize = 5;
pub const HIGH_GAIN: usize = 6;

pub static PARAMS: &[ParamInfo] = &[
    ParamInfo::new("Low Frequency", "Hz", 20.0, 1000.0, 200.0),
    ParamInfo::new("Low Gain", "dB", -18.0, 18.0, 0.0),
    ParamInfo::new("Mid Frequency", "Hz", 200.0, 8000.0, 1000.0),
    ParamInfo::new("Mid Gain", "dB", -18.0, 18.0, 0.0),
    ParamInfo::new("Mid Q", "Q", 0.1, 10.0, 1.0),
    ParamInfo::new("High Frequency", "Hz", 1000.0, 16000.0, 6000.0),
    ParamInfo::new("High Gain", "dB", -18.0, 18.0, 0.0),
];

const SHELF_Q: f64 = 0.707;

#[derive(Debug)]
pub struct Eq {
    sample_rate: f32,
    bands: [StereoBiquad; 3],
    applied: [f32; 7],
}

impl Eq {
    pub fn new(sample_rate: f32) -> Eq {
        Eq {
            sample_rate,
            bands: [StereoBiquad::default(); 3],
            applied: [f32::NAN; 7],
        }
    }

    fn update(&mut self, params: &[f32]) {
        if params[..7] == self.applied {
            return;
        }
        self.applied.copy_from_slice(&params[..7]);
        let rate = self.sample_rate as f64;
        let p = |i: usize| params[i] as f64;
        self.bands[0].set_coefficients(Coefficients::new(
            BiquadType::LowShelf,
            rate,
            p(LOW_FREQ),
            SHELF_Q,
            p(LOW_GAIN),
        ));
        self.bands[1].set_coefficients(Coefficients::new(
            BiquadType::Peak,
            rate,
            p(MID_FREQ),
            p(MID_Q),
            p(MID_GAIN),
        ));
        self.bands[2].set_coefficients(Coefficients::new(
            BiquadType::HighShelf,
            rate,
            p(HIGH_FREQ),
            SHELF_Q,
            p(HIGH_GAIN),
        ));
    }
}

impl Effect for Eq {
    fn kind(&self) -> EffectKind {
        EffectKind::Eq
    }

    fn process(&mut self, input: &[f32], output: &mut [f32], frames: usize, params: &[f32], _ctx: &ProcessContext) {
        self.update(params);
        for (inp, out) in stereo_frames(input, output, frames) {
            for ch in 0..2 {
                let mut sample = inp[ch];
                for band in self.bands.iter_mut() {
                    sample = band.process(ch, sample);
                }
                out[ch] = sample;
            }
        }
    }

    fn hard_reset(&mut self) {
        for band in self.bands.iter_mut() {
            band.reset();
        }
    }

    fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.applied = [f32::NAN; 7];
        self.hard_reset();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::effects::testing;
    use crate::testutil::{calculate_rms, channel_of, sine};

    fn gain_at(frequency: f32, params: &[f32]) -> f32 {
        let mut effect = Eq::new(44100.0);
        let mono = sine(frequency, 44100, 44100, 0.25);
        let output = testing::run(&mut effect, &testing::stereo(&mono), params, &Default::default());
        calculate_rms(&channel_of(&output, 0)[4410..]) / calculate_rms(&mono[4410..])
    }

    #[test]
    fn test_flat_by_default() {
        let params = testing::defaults(EffectKind::Eq);
        for frequency in [50.0, 1000.0, 10000.0] {
            assert!((gain_at(frequency, &params) - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_mid_cut() {
        let mut params = testing::defaults(EffectKind::Eq);
        params[MID_GAIN] = -12.0;
        let gain = gain_at(1000.0, &params);
        assert!((gain - 10f32.powf(-12.0 / 20.0)).abs() < 0.02, "{}", gain);
        assert!((gain_at(50.0, &params) - 1.0).abs() < 0.05);
    }
}
