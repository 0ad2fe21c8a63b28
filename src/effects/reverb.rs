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

//! Algorithmic reverb after the Freeverb design: eight parallel damped comb
//! filters into four series all-pass filters per channel.

use std::any::Any;

use super::{stereo_frames, Effect, EffectKind, ParamInfo, ProcessContext};

pub const SIZE: usize = 0;
pub const DAMPING: usize = 1;
pub const WIDTH: usize = 2;
pub const MIX: usize = 3;

pub static PARAMS: &[ParamInfo] = &[
    ParamInfo::new("Size", "", 0.0, 1.0, 0.5),
    ParamInfo::new("Damping", "", 0.0, 1.0, 0.5),
    ParamInfo::new("Width", "", 0.0, 1.0, 1.0),
    ParamInfo::new("Mix", "", 0.0, 1.0, 0.25),
];

// Tuning in frames at 44.1 kHz.
const COMB_TUNING: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNING: [usize; 4] = [556, 441, 341, 225];
const STEREO_SPREAD: usize = 23;
const INPUT_GAIN: f32 = 0.015;
const ROOM_SCALE: f32 = 0.28;
const ROOM_OFFSET: f32 = 0.7;

#[derive(Debug, Clone)]
struct Comb {
    buffer: Vec<f32>,
    index: usize,
    store: f32,
}

impl Comb {
    fn new(size: usize) -> Comb {
        Comb {
            buffer: vec![0.0; size.max(1)],
            index: 0,
            store: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let output = self.buffer[self.index];
        self.store = output * (1.0 - damp) + self.store * damp;
        self.buffer[self.index] = input + self.store * feedback;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.store = 0.0;
    }
}

#[derive(Debug, Clone)]
struct AllPass {
    buffer: Vec<f32>,
    index: usize,
}

impl AllPass {
    fn new(size: usize) -> AllPass {
        AllPass {
            buffer: vec![0.0; size.max(1)],
            index: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.index];
        self.buffer[self.index] = input + delayed * 0.5;
        self.index = (self.index + 1) % self.buffer.len();
        delayed - input
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
    }
}

#[derive(Debug)]
pub struct Reverb {
    combs: [Vec<Comb>; 2],
    allpasses: [Vec<AllPass>; 2],
}

impl Reverb {
    pub fn new(sample_rate: f32) -> Reverb {
        let scale = sample_rate / 44100.0;
        let sized = |tuning: usize, spread: usize| ((tuning + spread) as f32 * scale) as usize;
        let combs = [0, STEREO_SPREAD].map(|spread| {
            COMB_TUNING
                .iter()
                .map(|&t| Comb::new(sized(t, spread)))
                .collect()
        });
        let allpasses = [0, STEREO_SPREAD].map(|spread| {
            ALLPASS_TUNING
                .iter()
                .map(|&t| AllPass::new(sized(t, spread)))
                .collect()
        });
        Reverb { combs, allpasses }
    }
}

impl Effect for Reverb {
    fn kind(&self) -> EffectKind {
        EffectKind::Reverb
    }

    fn process(&mut self, input: &[f32], output: &mut [f32], frames: usize, params: &[f32], _ctx: &ProcessContext) {
        let feedback = params[SIZE] * ROOM_SCALE + ROOM_OFFSET;
        let damp = params[DAMPING] * 0.4;
        let width = params[WIDTH];
        let wet1 = width / 2.0 + 0.5;
        let wet2 = (1.0 - width) / 2.0;
        let mix = params[MIX];

        for (inp, out) in stereo_frames(input, output, frames) {
            let mono = (inp[0] + inp[1]) * INPUT_GAIN;
            let mut wet = [0.0f32; 2];
            for ch in 0..2 {
                for comb in self.combs[ch].iter_mut() {
                    wet[ch] += comb.process(mono, feedback, damp);
                }
                for allpass in self.allpasses[ch].iter_mut() {
                    wet[ch] = allpass.process(wet[ch]);
                }
            }
            let left = wet[0] * wet1 + wet[1] * wet2;
            let right = wet[1] * wet1 + wet[0] * wet2;
            out[0] = inp[0] * (1.0 - mix) + left * mix;
            out[1] = inp[1] * (1.0 - mix) + right * mix;
        }
    }

    fn hard_reset(&mut self) {
        for ch in 0..2 {
            self.combs[ch].iter_mut().for_each(Comb::clear);
            self.allpasses[ch].iter_mut().for_each(AllPass::clear);
        }
    }

    fn set_sample_rate(&mut self, sample_rate: f32) {
        *self = Reverb::new(sample_rate);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::effects::testing;

    fn peak(samples: &[f32]) -> f32 {
        samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    #[test]
    fn test_dry_passthrough() {
        let mut effect = Reverb::new(44100.0);
        let input = testing::stereo(&[0.5, -0.5, 0.25]);
        let output = testing::run(&mut effect, &input, &[0.5, 0.5, 1.0, 0.0], &Default::default());
        assert_eq!(output, input);
    }

    #[test]
    fn test_tail_then_decay() {
        let mut effect = Reverb::new(44100.0);
        let output = testing::run(&mut effect, &testing::impulse(44100 * 3), &[0.3, 0.5, 1.0, 1.0], &Default::default());
        let early = peak(&output[..2 * 5000]);
        let late = peak(&output[2 * 44100 * 2..]);
        assert!(early > 0.001, "{}", early);
        assert!(late < early * 0.1, "{} vs {}", late, early);
    }

    #[test]
    fn test_reset_silences_tail() {
        let mut effect = Reverb::new(44100.0);
        let params = testing::defaults(EffectKind::Reverb);
        testing::run(&mut effect, &testing::impulse(2048), &params, &Default::default());
        effect.hard_reset();
        let output = testing::run(&mut effect, &vec![0.0; 4096], &params, &Default::default());
        assert_eq!(peak(&output), 0.0);
    }
}
