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

//! Convolution reverb using a library impulse response.
//!
//! The impulse response is split into uniform partitions of `PARTITION`
//! frames and convolved in the frequency domain (overlap-save). Input is
//! gathered into whole partitions, so the wet signal lags by one partition.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use super::{stereo_frames, Effect, EffectKind, ParamInfo, ProcessContext, MAX_BLOCK_FRAMES};
use crate::samples::AudioData;

pub const MIX: usize = 0;

pub static PARAMS: &[ParamInfo] = &[ParamInfo::new("Mix", "", 0.0, 1.0, 0.3)];

pub const PARTITION: usize = MAX_BLOCK_FRAMES;
const FFT_SIZE: usize = PARTITION * 2;
/// Longer impulse responses are truncated.
pub const MAX_IR_SECONDS: f32 = 10.0;

/// A stereo partitioned convolver. Built off the audio thread, then handed over.
pub struct Convolver {
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    partitions: usize,
    /// Spectra of the IR partitions, `partitions * FFT_SIZE` per channel.
    ir: [Vec<Complex<f32>>; 2],
    /// Ring of input spectra, same layout as `ir`.
    history: [Vec<Complex<f32>>; 2],
    head: usize,
    /// The last two input partitions in the time domain.
    window: [[f32; FFT_SIZE]; 2],
    staged: [[f32; PARTITION]; 2],
    ready: [[f32; PARTITION]; 2],
    fill: usize,
    spectrum: Vec<Complex<f32>>,
    accumulator: Vec<Complex<f32>>,
}

impl Convolver {
    /// Prepares `ir` for playback at `sample_rate`: resampled if needed,
    /// truncated and normalized to unit energy on its louder channel.
    pub fn new(ir: &AudioData, sample_rate: u32) -> Convolver {
        let resampled;
        let ir = if ir.sample_rate() != sample_rate {
            resampled = ir.resampled(sample_rate);
            &resampled
        } else {
            ir
        };

        let max_frames = (MAX_IR_SECONDS * sample_rate as f32) as usize;
        let length = ir.frame_count().clamp(1, max_frames.max(1));
        let mut taps = [vec![0.0f32; length], vec![0.0f32; length]];
        for frame in 0..length {
            let (left, right) = ir.stereo_frame(frame);
            taps[0][frame] = left;
            taps[1][frame] = right;
        }
        let energy = taps
            .iter()
            .map(|t| t.iter().map(|s| s * s).sum::<f32>())
            .fold(0.0f32, f32::max);
        let gain = if energy > 0.0 { 1.0 / energy.sqrt() } else { 0.0 };

        let mut planner = FftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(FFT_SIZE);
        let inverse = planner.plan_fft_inverse(FFT_SIZE);
        let mut scratch = vec![
            Complex::default();
            forward
                .get_inplace_scratch_len()
                .max(inverse.get_inplace_scratch_len())
        ];

        let partitions = length.div_ceil(PARTITION);
        let ir = taps.map(|taps| {
            let mut spectra = vec![Complex::default(); partitions * FFT_SIZE];
            for (p, spectrum) in spectra.chunks_exact_mut(FFT_SIZE).enumerate() {
                let start = p * PARTITION;
                let end = (start + PARTITION).min(length);
                for (slot, tap) in spectrum.iter_mut().zip(&taps[start..end]) {
                    *slot = Complex::new(tap * gain, 0.0);
                }
                forward.process_with_scratch(spectrum, &mut scratch);
            }
            spectra
        });

        Convolver {
            forward,
            inverse,
            scratch,
            partitions,
            ir,
            history: [
                vec![Complex::default(); partitions * FFT_SIZE],
                vec![Complex::default(); partitions * FFT_SIZE],
            ],
            head: 0,
            window: [[0.0; FFT_SIZE]; 2],
            staged: [[0.0; PARTITION]; 2],
            ready: [[0.0; PARTITION]; 2],
            fill: 0,
            spectrum: vec![Complex::default(); FFT_SIZE],
            accumulator: vec![Complex::default(); FFT_SIZE],
        }
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    /// Feeds one stereo frame and returns the wet frame from one partition ago.
    #[inline]
    pub fn process_frame(&mut self, left: f32, right: f32) -> (f32, f32) {
        let out = (self.ready[0][self.fill], self.ready[1][self.fill]);
        self.staged[0][self.fill] = left;
        self.staged[1][self.fill] = right;
        self.fill += 1;
        if self.fill == PARTITION {
            self.fill = 0;
            for ch in 0..2 {
                self.convolve_partition(ch);
            }
            self.head = (self.head + 1) % self.partitions;
        }
        out
    }

    fn convolve_partition(&mut self, ch: usize) {
        let window = &mut self.window[ch];
        window.copy_within(PARTITION.., 0);
        window[PARTITION..].copy_from_slice(&self.staged[ch]);

        for (slot, sample) in self.spectrum.iter_mut().zip(window.iter()) {
            *slot = Complex::new(*sample, 0.0);
        }
        self.forward.process_with_scratch(&mut self.spectrum, &mut self.scratch);
        let head = self.head * FFT_SIZE;
        self.history[ch][head..head + FFT_SIZE].copy_from_slice(&self.spectrum);

        self.accumulator.fill(Complex::default());
        for k in 0..self.partitions {
            let slot = (self.head + self.partitions - k) % self.partitions * FFT_SIZE;
            let input = &self.history[ch][slot..slot + FFT_SIZE];
            let ir = &self.ir[ch][k * FFT_SIZE..(k + 1) * FFT_SIZE];
            for ((acc, x), h) in self.accumulator.iter_mut().zip(input).zip(ir) {
                *acc += x * h;
            }
        }
        self.inverse.process_with_scratch(&mut self.accumulator, &mut self.scratch);

        let scale = 1.0 / FFT_SIZE as f32;
        for (out, value) in self.ready[ch].iter_mut().zip(&self.accumulator[PARTITION..]) {
            *out = value.re * scale;
        }
    }

    pub fn reset(&mut self) {
        for ch in 0..2 {
            self.history[ch].fill(Complex::default());
        }
        self.window = [[0.0; FFT_SIZE]; 2];
        self.staged = [[0.0; PARTITION]; 2];
        self.ready = [[0.0; PARTITION]; 2];
        self.fill = 0;
        self.head = 0;
    }
}

impl fmt::Debug for Convolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Convolver")
            .field("partitions", &self.partitions)
            .finish()
    }
}

/// The effect slot. Without an impulse response it passes audio through.
#[derive(Debug, Default)]
pub struct ConvolutionReverb {
    convolver: Option<Box<Convolver>>,
}

impl ConvolutionReverb {
    pub fn new() -> ConvolutionReverb {
        ConvolutionReverb::default()
    }

    pub fn has_impulse_response(&self) -> bool {
        self.convolver.is_some()
    }

    /// Installs a new convolver and returns the previous one, which the caller
    /// must release off the audio thread.
    pub fn swap_convolver(&mut self, next: Option<Box<Convolver>>) -> Option<Box<Convolver>> {
        std::mem::replace(&mut self.convolver, next)
    }
}

impl Effect for ConvolutionReverb {
    fn kind(&self) -> EffectKind {
        EffectKind::ConvolutionReverb
    }

    fn process(&mut self, input: &[f32], output: &mut [f32], frames: usize, params: &[f32], _ctx: &ProcessContext) {
        let Some(convolver) = self.convolver.as_mut() else {
            output[..frames * 2].copy_from_slice(&input[..frames * 2]);
            return;
        };
        let mix = params[MIX];
        for (inp, out) in stereo_frames(input, output, frames) {
            let (left, right) = convolver.process_frame(inp[0], inp[1]);
            out[0] = inp[0] * (1.0 - mix) + left * mix;
            out[1] = inp[1] * (1.0 - mix) + right * mix;
        }
    }

    fn hard_reset(&mut self) {
        if let Some(convolver) = self.convolver.as_mut() {
            convolver.reset();
        }
    }

    /// The impulse response was prepared for the old rate, so it is dropped
    /// and has to be installed again.
    fn set_sample_rate(&mut self, _sample_rate: f32) {
        self.convolver = None;
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::effects::testing;
    use crate::testutil::channel_of;

    fn convolution_with(ir: Vec<f32>) -> ConvolutionReverb {
        let mut effect = ConvolutionReverb::new();
        let ir = AudioData::new(ir, 1, 44100);
        assert!(effect.swap_convolver(Some(Box::new(Convolver::new(&ir, 44100)))).is_none());
        effect
    }

    #[test]
    fn test_identity_ir_delays_by_one_partition() {
        let mut effect = convolution_with(vec![1.0]);
        let output = testing::run(&mut effect, &testing::impulse(512), &[1.0], &Default::default());
        let left = channel_of(&output, 0);
        for (i, sample) in left.iter().enumerate() {
            let expected = if i == PARTITION { 1.0 } else { 0.0 };
            assert!((sample - expected).abs() < 1e-4, "frame {}: {}", i, sample);
        }
    }

    #[test]
    fn test_multi_partition_ir() {
        let mut ir = vec![0.0; 301];
        ir[0] = 1.0;
        ir[300] = 0.5;
        let mut effect = convolution_with(ir);
        let output = testing::run(&mut effect, &testing::impulse(1024), &[1.0], &Default::default());
        let right = channel_of(&output, 1);
        let gain = 1.0 / 1.25f32.sqrt();
        assert!((right[PARTITION] - gain).abs() < 1e-4);
        assert!((right[PARTITION + 300] - 0.5 * gain).abs() < 1e-4);
        assert!(right[PARTITION + 150].abs() < 1e-4);
    }

    #[test]
    fn test_resampled_ir() {
        let ir = AudioData::new(vec![1.0; 480], 1, 48000);
        let convolver = Convolver::new(&ir, 24000);
        assert_eq!(convolver.partitions(), 2);
    }

    #[test]
    fn test_passthrough_without_ir() {
        let mut effect = ConvolutionReverb::new();
        let input = testing::stereo(&[0.3, -0.2]);
        assert_eq!(testing::run(&mut effect, &input, &[1.0], &Default::default()), input);
    }
}
