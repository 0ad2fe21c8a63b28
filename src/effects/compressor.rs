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

//! Feed-forward stereo-linked compressor with a soft knee.

use std::any::Any;

use super::{stereo_frames, Effect, EffectKind, ParamInfo, ProcessContext};
use crate::util::db_to_gain;

pub const THRESHOLD: usize = 0;
pub const RATIO: usize = 1;
pub const ATTACK: usize = 2;
pub const RELEASE: usize = 3;
pub const KNEE: usize = 4;
pub const MAKEUP: usize = 5;

pub static PARAMS: &[ParamInfo] = &[
    ParamInfo::new("Threshold", "dB", -60.0, 0.0, -18.0),
    ParamInfo::new("Ratio", "", 1.0, 20.0, 4.0),
    ParamInfo::new("Attack", "ms", 0.1, 100.0, 5.0),
    ParamInfo::new("Release", "ms", 10.0, 1000.0, 150.0),
    ParamInfo::new("Knee", "dB", 0.0, 24.0, 6.0),
    ParamInfo::new("Makeup", "dB", 0.0, 24.0, 0.0),
];

#[derive(Debug)]
pub struct Compressor {
    sample_rate: f32,
    /// Peak envelope, linear.
    envelope: f32,
}

impl Compressor {
    pub fn new(sample_rate: f32) -> Compressor {
        Compressor {
            sample_rate,
            envelope: 0.0,
        }
    }

    /// Gain change in dB for an input level in dB. Never positive.
    #[inline]
    fn gain_reduction(input_db: f32, threshold: f32, ratio: f32, knee: f32) -> f32 {
        let slope = 1.0 - 1.0 / ratio;
        if knee <= 0.0 {
            return if input_db <= threshold {
                0.0
            } else {
                (threshold - input_db) * slope
            };
        }
        let half = knee / 2.0;
        if input_db <= threshold - half {
            0.0
        } else if input_db >= threshold + half {
            (threshold - input_db) * slope
        } else {
            let x = input_db - threshold + half;
            -slope * x * x / (2.0 * knee)
        }
    }

    #[inline]
    fn coefficient(&self, ms: f32) -> f32 {
        (-1.0 / (ms * 0.001 * self.sample_rate)).exp()
    }
}

impl Effect for Compressor {
    fn kind(&self) -> EffectKind {
        EffectKind::Compressor
    }

    fn process(&mut self, input: &[f32], output: &mut [f32], frames: usize, params: &[f32], _ctx: &ProcessContext) {
        let threshold = params[THRESHOLD];
        let ratio = params[RATIO].max(1.0);
        let knee = params[KNEE];
        let makeup = params[MAKEUP];
        let attack = self.coefficient(params[ATTACK]);
        let release = self.coefficient(params[RELEASE]);

        for (inp, out) in stereo_frames(input, output, frames) {
            let level = inp[0].abs().max(inp[1].abs());
            let coefficient = if level > self.envelope { attack } else { release };
            self.envelope = coefficient * self.envelope + (1.0 - coefficient) * level;

            let envelope_db = if self.envelope > 1e-6 {
                20.0 * self.envelope.log10()
            } else {
                -120.0
            };
            let gain = db_to_gain(Self::gain_reduction(envelope_db, threshold, ratio, knee) + makeup);
            out[0] = inp[0] * gain;
            out[1] = inp[1] * gain;
        }
    }

    fn hard_reset(&mut self) {
        self.envelope = 0.0;
    }

    fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.hard_reset();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
