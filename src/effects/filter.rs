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

//! Multi-mode resonant filter.

use std::any::Any;

use super::biquad::{BiquadType, Coefficients, StereoBiquad};
use super::{stereo_frames, Effect, EffectKind, ParamInfo, ProcessContext};

pub const TYPE: usize = 0;
pub const CUTOFF: usize = 1;
pub const RESONANCE: usize = 2;
pub const GAIN: usize = 3;

pub static PARAMS: &[ParamInfo] = &[
    ParamInfo::new("Type", "", 0.0, 6.0, 0.0).discrete(),
    ParamInfo::new("Cutoff", "Hz", 20.0, 20000.0, 20000.0),
    ParamInfo::new("Resonance", "Q", 0.1, 10.0, 0.707),
    ParamInfo::new("Gain", "dB", -24.0, 24.0, 0.0),
];

#[derive(Debug)]
pub struct Filter {
    sample_rate: f32,
    biquad: StereoBiquad,
    /// Parameters the current coefficients were computed from.
    applied: [f32; 4],
}

impl Filter {
    pub fn new(sample_rate: f32) -> Filter {
        Filter {
            sample_rate,
            biquad: StereoBiquad::default(),
            applied: [f32::NAN; 4],
        }
    }

    fn update(&mut self, params: &[f32]) {
        let wanted = [params[TYPE], params[CUTOFF], params[RESONANCE], params[GAIN]];
        if wanted == self.applied {
            return;
        }
        self.applied = wanted;
        self.biquad.set_coefficients(Coefficients::new(
            BiquadType::from_index(params[TYPE].round().max(0.0) as usize),
            self.sample_rate as f64,
            params[CUTOFF] as f64,
            params[RESONANCE] as f64,
            params[GAIN] as f64,
        ));
    }
}

impl Effect for Filter {
    fn kind(&self) -> EffectKind {
        EffectKind::Filter
    }

    fn process(&mut self, input: &[f32], output: &mut [f32], frames: usize, params: &[f32], _ctx: &ProcessContext) {
        self.update(params);
        for (inp, out) in stereo_frames(input, output, frames) {
            out[0] = self.biquad.process(0, inp[0]);
            out[1] = self.biquad.process(1, inp[1]);
        }
    }

    fn hard_reset(&mut self) {
        self.biquad.reset();
    }

    fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.applied = [f32::NAN; 4];
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

    #[test]
    fn test_lowpass_removes_highs() {
        let mut effect = Filter::new(44100.0);
        let input = testing::stereo(&sine(8000.0, 44100, 8820, 0.5));
        let output = testing::run(&mut effect, &input, &[0.0, 500.0, 0.707, 0.0], &Default::default());
        let right = channel_of(&output, 1);
        assert!(calculate_rms(&right[4410..]) < 0.01);
    }

    #[test]
    fn test_highpass_by_type() {
        let mut effect = Filter::new(44100.0);
        let input = testing::stereo(&sine(100.0, 44100, 8820, 0.5));
        let output = testing::run(&mut effect, &input, &[1.0, 5000.0, 0.707, 0.0], &Default::default());
        assert!(calculate_rms(&channel_of(&output, 0)[4410..]) < 0.01);
    }
}
