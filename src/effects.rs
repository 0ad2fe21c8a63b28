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

//! The insert effect chain.
//!
//! Every effect processes interleaved stereo in blocks of at most
//! `MAX_BLOCK_FRAMES` frames. Parameters arrive already smoothed, in their
//! natural units (Hz, dB, ms, ratios).

use std::any::Any;
use std::fmt;

pub mod biquad;
pub mod chain;
pub mod chorus;
pub mod compressor;
pub mod convolution;
pub mod delay;
pub mod distortion;
pub mod eq;
pub mod filter;
pub mod flanger;
pub mod modulation;
pub mod phaser;
pub mod reverb;
pub mod smoother;

pub use chain::EffectChain;

/// The largest block any effect is asked to process.
pub const MAX_BLOCK_FRAMES: usize = 128;

/// The most parameters a single effect exposes.
pub const MAX_PARAMS: usize = 8;

pub const NUM_EFFECTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EffectKind {
    Distortion,
    Compressor,
    Filter,
    Eq,
    Chorus,
    Flanger,
    Phaser,
    Delay,
    Reverb,
    ConvolutionReverb,
}

impl EffectKind {
    /// All effects in their default processing order.
    pub const ALL: [EffectKind; NUM_EFFECTS] = [
        EffectKind::Distortion,
        EffectKind::Compressor,
        EffectKind::Filter,
        EffectKind::Eq,
        EffectKind::Chorus,
        EffectKind::Flanger,
        EffectKind::Phaser,
        EffectKind::Delay,
        EffectKind::Reverb,
        EffectKind::ConvolutionReverb,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<EffectKind> {
        EffectKind::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            EffectKind::Distortion => "Distortion",
            EffectKind::Compressor => "Compressor",
            EffectKind::Filter => "Filter",
            EffectKind::Eq => "EQ",
            EffectKind::Chorus => "Chorus",
            EffectKind::Flanger => "Flanger",
            EffectKind::Phaser => "Phaser",
            EffectKind::Delay => "Delay",
            EffectKind::Reverb => "Reverb",
            EffectKind::ConvolutionReverb => "Convolution Reverb",
        }
    }

    /// Parameter descriptions for this effect.
    pub fn params(self) -> &'static [ParamInfo] {
        match self {
            EffectKind::Distortion => distortion::PARAMS,
            EffectKind::Compressor => compressor::PARAMS,
            EffectKind::Filter => filter::PARAMS,
            EffectKind::Eq => eq::PARAMS,
            EffectKind::Chorus => chorus::PARAMS,
            EffectKind::Flanger => flanger::PARAMS,
            EffectKind::Phaser => phaser::PARAMS,
            EffectKind::Delay => delay::PARAMS,
            EffectKind::Reverb => reverb::PARAMS,
            EffectKind::ConvolutionReverb => convolution::PARAMS,
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Describes one effect parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamInfo {
    pub name: &'static str,
    /// Unit label, e.g. "Hz", "dB", "ms" or "" for plain ratios.
    pub unit: &'static str,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    /// Discrete parameters are whole numbers that switch at block boundaries
    /// instead of being smoothed.
    pub discrete: bool,
}

impl ParamInfo {
    pub const fn new(name: &'static str, unit: &'static str, min: f32, max: f32, default: f32) -> ParamInfo {
        ParamInfo {
            name,
            unit,
            min,
            max,
            default,
            discrete: false,
        }
    }

    pub const fn discrete(mut self) -> ParamInfo {
        self.discrete = true;
        self
    }

    pub fn clamp(&self, value: f32) -> f32 {
        let value = value.clamp(self.min, self.max);
        if self.discrete {
            value.round()
        } else {
            value
        }
    }
}

/// Per-block information from the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessContext {
    pub sample_rate: f32,
    /// Beats per minute, used by tempo-synced effects.
    pub tempo: f64,
}

impl Default for ProcessContext {
    fn default() -> Self {
        ProcessContext {
            sample_rate: 44100.0,
            tempo: 120.0,
        }
    }
}

/// An insert effect.
pub trait Effect: Send {
    fn kind(&self) -> EffectKind;

    fn params(&self) -> &'static [ParamInfo] {
        self.kind().params()
    }

    /// Processes `frames` interleaved stereo frames from `input` into `output`.
    /// `params` holds one value per entry of `params()`.
    fn process(&mut self, input: &[f32], output: &mut [f32], frames: usize, params: &[f32], ctx: &ProcessContext);

    /// Clears all internal state such as delay lines and envelopes.
    fn hard_reset(&mut self);

    /// Recomputes sample-rate dependent state and clears it. May allocate, so
    /// it is never called from the audio thread.
    fn set_sample_rate(&mut self, sample_rate: f32);

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Creates the effect for `kind` at `sample_rate`.
pub fn create_effect(kind: EffectKind, sample_rate: f32) -> Box<dyn Effect> {
    match kind {
        EffectKind::Distortion => Box::new(distortion::Distortion::new()),
        EffectKind::Compressor => Box::new(compressor::Compressor::new(sample_rate)),
        EffectKind::Filter => Box::new(filter::Filter::new(sample_rate)),
        EffectKind::Eq => Box::new(eq::Eq::new(sample_rate)),
        EffectKind::Chorus => Box::new(chorus::Chorus::new(sample_rate)),
        EffectKind::Flanger => Box::new(flanger::Flanger::new(sample_rate)),
        EffectKind::Phaser => Box::new(phaser::Phaser::new(sample_rate)),
        EffectKind::Delay => Box::new(delay::Delay::new(sample_rate)),
        EffectKind::Reverb => Box::new(reverb::Reverb::new(sample_rate)),
        EffectKind::ConvolutionReverb => Box::new(convolution::ConvolutionReverb::new()),
    }
}

/// Pairs input and output frames of an interleaved stereo block.
#[inline]
pub(crate) fn stereo_frames<'a>(
    input: &'a [f32],
    output: &'a mut [f32],
    frames: usize,
) -> impl Iterator<Item = (&'a [f32], &'a mut [f32])> {
    input[..frames * 2]
        .chunks_exact(2)
        .zip(output[..frames * 2].chunks_exact_mut(2))
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_every_effect_has_sane_params() {
        for kind in EffectKind::ALL {
            let params = kind.params();
            assert!(!params.is_empty() && params.len() <= MAX_PARAMS, "{}", kind);
            for param in params {
                assert!(param.min <= param.default && param.default <= param.max, "{}.{}", kind, param.name);
            }
            assert_eq!(EffectKind::from_index(kind.index()), Some(kind));
        }
    }

    #[test]
    fn test_effects_report_their_kind() {
        for kind in EffectKind::ALL {
            let mut effect = create_effect(kind, 48000.0);
            assert_eq!(effect.kind(), kind);
            effect.hard_reset();
            effect.set_sample_rate(44100.0);
        }
    }

    #[test]
    fn test_silence_in_silence_out() {
        let ctx = ProcessContext::default();
        for kind in EffectKind::ALL {
            let mut effect = create_effect(kind, ctx.sample_rate);
            let params = testing::defaults(kind);
            let output = testing::run(effect.as_mut(), &vec![0.0; 1024], &params, &ctx);
            assert!(output.iter().all(|s| s.abs() < 1e-6), "{}", kind);
        }
    }

    #[test]
    fn test_discrete_clamp_rounds() {
        let info = ParamInfo::new("Type", "", 0.0, 3.0, 0.0).discrete();
        assert_eq!(info.clamp(1.6), 2.0);
        assert_eq!(info.clamp(9.0), 3.0);
        let info = ParamInfo::new("Mix", "", 0.0, 1.0, 0.5);
        assert_eq!(info.clamp(0.25), 0.25);
    }
}
