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

//! One-pole parameter smoothing for click-free parameter changes.

use std::f32::consts::PI;

/// Cutoff of the smoothing low-pass.
pub const SMOOTHING_CUTOFF_HZ: f32 = 5.0;

#[derive(Debug, Clone, Copy)]
pub struct Smoother {
    current: f32,
    target: f32,
    /// Per-sample pole, `exp(-2 pi fc / fs)`.
    pole: f32,
}

impl Smoother {
    pub fn new(value: f32, sample_rate: f32) -> Smoother {
        Smoother {
            current: value,
            target: value,
            pole: Self::pole_for(sample_rate),
        }
    }

    fn pole_for(sample_rate: f32) -> f32 {
        (-2.0 * PI * SMOOTHING_CUTOFF_HZ / sample_rate.max(1.0)).exp()
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.pole = Self::pole_for(sample_rate);
    }

    pub fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    /// Jumps straight to `value`.
    pub fn set_immediate(&mut self, value: f32) {
        self.current = value;
        self.target = value;
    }

    #[inline]
    pub fn get(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    /// Advances one sample.
    #[inline]
    pub fn tick(&mut self) -> f32 {
        self.current = self.target + (self.current - self.target) * self.pole;
        self.current
    }

    /// Advances `frames` samples at once.
    pub fn advance(&mut self, frames: usize) -> f32 {
        let decay = self.pole.powi(frames as i32);
        self.current = self.target + (self.current - self.target) * decay;
        if (self.current - self.target).abs() < 1e-6 {
            self.current = self.target;
        }
        self.current
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_reaches_target() {
        let mut smoother = Smoother::new(0.0, 44100.0);
        smoother.set_target(1.0);
        let first = smoother.tick();
        assert!(first > 0.0 && first < 0.01);
        // A 5 Hz pole has a time constant of about 32 ms; a second is plenty.
        smoother.advance(44100);
        assert_eq!(smoother.get(), 1.0);
    }

    #[test]
    fn test_advance_matches_ticks() {
        let mut a = Smoother::new(0.0, 48000.0);
        let mut b = a;
        a.set_target(10.0);
        b.set_target(10.0);
        for _ in 0..128 {
            a.tick();
        }
        b.advance(128);
        assert!((a.get() - b.get()).abs() < 1e-3);
    }

    #[test]
    fn test_set_immediate() {
        let mut smoother = Smoother::new(0.0, 44100.0);
        smoother.set_immediate(3.0);
        assert_eq!(smoother.get(), 3.0);
        assert_eq!(smoother.tick(), 3.0);
    }
}
