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

//! Waveshaping distortion.

use std::any::Any;

use super::{stereo_frames, Effect, EffectKind, ParamInfo, ProcessContext};
use crate::util::db_to_gain;

pub const TYPE: usize = 0;
pub const DRIVE: usize = 1;
pub const MIX: usize = 2;

pub static PARAMS: &[ParamInfo] = &[
    ParamInfo::new("Type", "", 0.0, 2.0, 0.0).discrete(),
    ParamInfo::new("Drive", "dB", 0.0, 40.0, 12.0),
    ParamInfo::new("Mix", "", 0.0, 1.0, 1.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Smooth tanh saturation.
    Tube,
    HardClip,
    /// Reflects the signal back inside [-1, 1].
    Foldback,
}

impl Shape {
    fn from_param(value: f32) -> Shape {
        match value.round() as i32 {
            1 => Shape::HardClip,
            2 => Shape::Foldback,
            _ => Shape::Tube,
        }
    }

    #[inline]
    fn apply(self, x: f32) -> f32 {
        match self {
            Shape::Tube => x.tanh(),
            Shape::HardClip => x.clamp(-1.0, 1.0),
            Shape::Foldback => {
                // Triangle wave of period 4 maps any input into [-1, 1].
                let t = (x + 1.0).rem_euclid(4.0);
                if t < 2.0 {
                    t - 1.0
                } else {
                    3.0 - t
                }
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct Distortion;

impl Distortion {
    pub fn new() -> Distortion {
        Distortion
    }
}

impl Effect for Distortion {
    fn kind(&self) -> EffectKind {
        EffectKind::Distortion
    }

    fn process(&mut self, input: &[f32], output: &mut [f32], frames: usize, params: &[f32], _ctx: &ProcessContext) {
        let shape = Shape::from_param(params[TYPE]);
        let drive = db_to_gain(params[DRIVE]);
        // Pull the level back so more drive means more colour, not more volume.
        let makeup = 1.0 / drive.sqrt();
        let mix = params[MIX];
        for (inp, out) in stereo_frames(input, output, frames) {
            for ch in 0..2 {
                let wet = shape.apply(inp[ch] * drive) * makeup;
                out[ch] = inp[ch] + (wet - inp[ch]) * mix;
            }
        }
    }

    fn hard_reset(&mut self) {}

    fn set_sample_rate(&mut self, _sample_rate: f32) {}

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
