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

//! Stereo chorus: a modulated delay with the two channels' LFOs a quarter
//! cycle apart.

use std::any::Any;

use super::modulation::{DelayLine, Lfo};
use super::{stereo_frames, Effect, EffectKind, ParamInfo, ProcessContext};

pub const RATE: usize = 0;
pub const DEPTH: usize = 1;
pub const DELAY: usize = 2;
pub const MIX: usize = 3;

pub static PARAMS: &[ParamInfo] = &[
    ParamInfo::new("Rate", "Hz", 0.1, 5.0, 1.5),
    ParamInfo::new("Depth", "ms", 0.0, 10.0, 2.0),
    ParamInfo::new("Delay", "ms", 5.0, 30.0, 15.0),
    ParamInfo::new("Mix", "", 0.0, 1.0, 0.5),
];

/// Longest base delay plus deepest modulation.
const MAX_DELAY_MS: f32 = 45.0;

#[derive(Debug)]
pub struct Chorus {
    sample_rate: f32,
    lines: [DelayLine; 2],
    lfos: [Lfo; 2],
}

impl Chorus {
    pub fn new(sample_rate: f32) -> Chorus {
        let frames = (MAX_DELAY_MS * 0.001 * sample_rate) as usize;
        Chorus {
            sample_rate,
            lines: [DelayLine::new(frames), DelayLine::new(frames)],
            lfos: [Lfo::new(0.0), Lfo::new(0.25)],
        }
    }
}

impl Effect for Chorus {
    fn kind(&self) -> EffectKind {
        EffectKind::Chorus
    }

    fn process(&mut self, input: &[f32], output: &mut [f32], frames: usize, params: &[f32], _ctx: &ProcessContext) {
        let ms = 0.001 * self.sample_rate;
        let base = params[DELAY] * ms;
        let depth = params[DEPTH] * ms;
        let mix = params[MIX];
        for (inp, out) in stereo_frames(input, output, frames) {
            for ch in 0..2 {
                let modulation = self.lfos[ch].next(params[RATE], self.sample_rate);
                self.lines[ch].push(inp[ch]);
                let wet = self.lines[ch].read(base + depth * modulation);
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
        *self = Chorus::new(sample_rate);
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
    fn test_wet_signal_is_delayed() {
        let mut effect = Chorus::new(1000.0);
        // 10 ms at 1 kHz is 10 frames; no modulation depth.
        let output = testing::run(&mut effect, &testing::impulse(32), &[1.0, 0.0, 10.0, 1.0], &Default::default());
        assert_eq!(output[0], 0.0);
        assert!((output[18] - 1.0).abs() < 1e-6);
        assert!((output[19] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_channels_modulate_differently() {
        let mut effect = Chorus::new(44100.0);
        let input = testing::stereo(&crate::testutil::sine(440.0, 44100, 4410, 0.5));
        let output = testing::run(&mut effect, &input, &[2.0, 5.0, 15.0, 1.0], &Default::default());
        let differs = output.chunks_exact(2).skip(2000).any(|f| (f[0] - f[1]).abs() > 1e-3);
        assert!(differs);
    }
}
