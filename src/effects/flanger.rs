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

//! Flanger: a very short modulated delay with feedback.

use std::any::Any;

use super::modulation::{DelayLine, Lfo};
use super::{stereo_frames, Effect, EffectKind, ParamInfo, ProcessContext};

pub const RATE: usize = 0;
pub const DEPTH: usize = 1;
pub const FEEDBACK: usize = 2;
pub const MIX: usize = 3;

pub static PARAMS: &[ParamInfo] = &[
    ParamInfo::new("Rate", "Hz", 0.05, 5.0, 0.25),
    ParamInfo::new("Depth", "", 0.0, 1.0, 0.7),
    ParamInfo::new("Feedback", "", -0.95, 0.95, 0.5),
    ParamInfo::new("Mix", "", 0.0, 1.0, 0.5),
];

const MIN_DELAY_MS: f32 = 0.5;
const SWEEP_MS: f32 = 5.0;

#[derive(Debug)]
pub struct Flanger {
    sample_rate: f32,
    lines: [DelayLine; 2],
    lfos: [Lfo; 2],
}

impl Flanger {
    pub fn new(sample_rate: f32) -> Flanger {
        let frames = ((MIN_DELAY_MS + SWEEP_MS) * 0.001 * sample_rate) as usize + 2;
        Flanger {
            sample_rate,
            lines: [DelayLine::new(frames), DelayLine::new(frames)],
            lfos: [Lfo::new(0.0), Lfo::new(0.1)],
        }
    }
}

impl Effect for Flanger {
    fn kind(&self) -> EffectKind {
        EffectKind::Flanger
    }

    fn process(&mut self, input: &[f32], output: &mut [f32], frames: usize, params: &[f32], _ctx: &ProcessContext) {
        let ms = 0.001 * self.sample_rate;
        let feedback = params[FEEDBACK];
        let mix = params[MIX];
        for (inp, out) in stereo_frames(input, output, frames) {
            for ch in 0..2 {
                let sweep = self.lfos[ch].next_unipolar(params[RATE], self.sample_rate);
                let delay = (MIN_DELAY_MS + SWEEP_MS * params[DEPTH] * sweep) * ms;
                let wet = self.lines[ch].read(delay);
                self.lines[ch].push(inp[ch] + wet * feedback);
                out[ch] = inp[ch] * (1.0 - mix) + wet * mix;
            }
        }
    }

    fn hard_reset(&mut self) {
        for (line, lfo) in self.lines.iter_mut().zip(self.lfos.iter_mut()) {
            line.clear();
            lfo.reset();
        }
    }

    fn set_sample_rate(&mut self, sample_rate: f32) {
        *self = Flanger::new(sample_rate);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::effects::testing;

    #[test]
    fn test_feedback_repeats_decay() {
        let mut effect = Flanger::new(4000.0);
        // No depth: a fixed 0.5 ms delay, two frames at 4 kHz.
        let output = testing::run(&mut effect, &testing::impulse(16), &[1.0, 0.0, 0.5, 1.0], &Default::default());
        let left = crate::testutil::channel_of(&output, 0);
        assert_eq!(left[0], 0.0);
        assert!((left[2] - 1.0).abs() < 1e-6);
        assert!((left[4] - 0.5).abs() < 1e-6);
        assert!((left[6] - 0.25).abs() < 1e-6);
    }
}
