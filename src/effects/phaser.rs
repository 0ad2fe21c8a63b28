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

//! Phaser: a chain of swept first-order all-pass stages mixed with the dry signal.

use std::any::Any;
use std::f32::consts::PI;

use super::modulation::Lfo;
use super::{stereo_frames, Effect, EffectKind, ParamInfo, ProcessContext};

pub const RATE: usize = 0;
pub const DEPTH: usize = 1;
pub const CENTER: usize = 2;
pub const FEEDBACK: usize = 3;
pub const MIX: usize = 4;

pub static PARAMS: &[ParamInfo] = &[
    ParamInfo::new("Rate", "Hz", 0.05, 5.0, 0.5),
    ParamInfo::new("Depth", "", 0.0, 1.0, 0.7),
    ParamInfo::new("Center", "Hz", 200.0, 5000.0, 1000.0),
    ParamInfo::new("Feedback", "", 0.0, 0.9, 0.5),
    ParamInfo::new("Mix", "", 0.0, 1.0, 0.5),
];

const STAGES: usize = 4;
/// The sweep spans this many octaves either side of the center at full depth.
const SWEEP_OCTAVES: f32 = 2.0;

#[derive(Debug, Clone, Copy, Default)]
struct AllPass {
    x1: f32,
    y1: f32,
}

impl AllPass {
    #[inline]
    fn process(&mut self, coefficient: f32, x: f32) -> f32 {
        let y = coefficient * x + self.x1 - coefficient * self.y1;
        self.x1 = x;
        self.y1 = y;
        y
    }
}

#[derive(Debug)]
pub struct Phaser {
    sample_rate: f32,
    stages: [[AllPass; STAGES]; 2],
    last: [f32; 2],
    lfos: [Lfo; 2],
}

impl Phaser {
    pub fn new(sample_rate: f32) -> Phaser {
        Phaser {
            sample_rate,
            stages: [[AllPass::default(); STAGES]; 2],
            last: [0.0; 2],
            lfos: [Lfo::new(0.0), Lfo::new(0.25)],
        }
    }

    /// First-order all-pass coefficient for a break frequency.
    #[inline]
    fn coefficient(&self, frequency: f32) -> f32 {
        let t = (PI * frequency.min(self.sample_rate * 0.45) / self.sample_rate).tan();
        (t - 1.0) / (t + 1.0)
    }
}

impl Effect for Phaser {
    fn kind(&self) -> EffectKind {
        EffectKind::Phaser
    }

    fn process(&mut self, input: &[f32], output: &mut [f32], frames: usize, params: &[f32], _ctx: &ProcessContext) {
        let mix = params[MIX];
        for (inp, out) in stereo_frames(input, output, frames) {
            for ch in 0..2 {
                let sweep = self.lfos[ch].next(params[RATE], self.sample_rate);
                let frequency = params[CENTER] * (SWEEP_OCTAVES * params[DEPTH] * sweep).exp2();
                let coefficient = self.coefficient(frequency);

                let mut sample = inp[ch] + self.last[ch] * params[FEEDBACK];
                for stage in self.stages[ch].iter_mut() {
                    sample = stage.process(coefficient, sample);
                }
                self.last[ch] = sample;
                out[ch] = inp[ch] * (1.0 - mix) + sample * mix;
            }
        }
    }

    fn hard_reset(&mut self) {
        self.stages = [[AllPass::default(); STAGES]; 2];
        self.last = [0.0; 2];
        for lfo in self.lfos.iter_mut() {
            lfo.reset();
        }
    }

    fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.hard_reset();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
