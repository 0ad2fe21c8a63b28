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

//! Feedback delay with stereo and ping-pong modes and optional tempo sync.

use std::any::Any;

use super::modulation::DelayLine;
use super::{stereo_frames, Effect, EffectKind, ParamInfo, ProcessContext};

pub const MODE: usize = 0;
pub const TIME: usize = 1;
pub const SYNC: usize = 2;
pub const FEEDBACK: usize = 3;
pub const MIX: usize = 4;

pub static PARAMS: &[ParamInfo] = &[
    ParamInfo::new("Mode", "", 0.0, 1.0, 0.0).discrete(),
    ParamInfo::new("Time", "ms", 1.0, 2000.0, 375.0),
    ParamInfo::new("Sync", "", 0.0, SYNC_DIVISIONS.len() as f32, 0.0).discrete(),
    ParamInfo::new("Feedback", "", 0.0, 0.95, 0.4),
    ParamInfo::new("Mix", "", 0.0, 1.0, 0.3),
];

/// Note lengths in beats for the sync parameter; 0 means free-running.
/// 1/32, 1/16T, 1/16, 1/8T, 1/16D, 1/8, 1/4T, 1/8D, 1/4, 1/2T, 1/4D, 1/2, 1/1.
pub const SYNC_DIVISIONS: [f64; 13] = [
    0.125,
    1.0 / 6.0,
    0.25,
    1.0 / 3.0,
    0.375,
    0.5,
    2.0 / 3.0,
    0.75,
    1.0,
    4.0 / 3.0,
    1.5,
    2.0,
    4.0,
];

/// Long enough for a whole note at 60 BPM.
const MAX_DELAY_SECONDS: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayMode {
    Stereo,
    PingPong,
}

/// Delay time in seconds for the given parameters.
pub fn delay_seconds(time_ms: f32, sync: f32, tempo: f64) -> f32 {
    let division = sync.round() as usize;
    if division == 0 || tempo <= 0.0 {
        return time_ms * 0.001;
    }
    let beats = SYNC_DIVISIONS[(division - 1).min(SYNC_DIVISIONS.len() - 1)];
    ((beats * 60.0 / tempo) as f32).min(MAX_DELAY_SECONDS)
}

#[derive(Debug)]
pub struct Delay {
    sample_rate: f32,
    lines: [DelayLine; 2],
}

impl Delay {
    pub fn new(sample_rate: f32) -> Delay {
        let frames = (MAX_DELAY_SECONDS * sample_rate) as usize + 1;
        Delay {
            sample_rate,
            lines: [DelayLine::new(frames), DelayLine::new(frames)],
        }
    }
}

impl Effect for Delay {
    fn kind(&self) -> EffectKind {
        EffectKind::Delay
    }

    fn process(&mut self, input: &[f32], output: &mut [f32], frames: usize, params: &[f32], ctx: &ProcessContext) {
        let mode = if params[MODE].round() as i32 == 1 {
            DelayMode::PingPong
        } else {
            DelayMode::Stereo
        };
        let delay = delay_seconds(params[TIME], params[SYNC], ctx.tempo) * self.sample_rate;
        let feedback = params[FEEDBACK];
        let mix = params[MIX];

        for (inp, out) in stereo_frames(input, output, frames) {
            let wet_l = self.lines[0].read(delay);
            let wet_r = self.lines[1].read(delay);
            match mode {
                DelayMode::Stereo => {
                    self.lines[0].push(inp[0] + wet_l * feedback);
                    self.lines[1].push(inp[1] + wet_r * feedback);
                }
                DelayMode::PingPong => {
                    self.lines[0].push((inp[0] + inp[1]) * 0.5 + wet_r * feedback);
                    self.lines[1].push(wet_l * feedback);
                }
            }
            out[0] = inp[0] * (1.0 - mix) + wet_l * mix;
            out[1] = inp[1] * (1.0 - mix) + wet_r * mix;
        }
    }

    fn hard_reset(&mut self) {
        for line in self.lines.iter_mut() {
            line.clear();
        }
    }

    fn set_sample_rate(&mut self, sample_rate: f32) {
        *self = Delay::new(sample_rate);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
