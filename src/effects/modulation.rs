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

//! Building blocks shared by the modulated and delay-based effects.

use std::f32::consts::TAU;

/// A circular delay line with fractional reads.
#[derive(Debug, Clone, Default)]
pub struct DelayLine {
    buffer: Vec<f32>,
    write: usize,
}

impl DelayLine {
    /// Holds up to `max_delay` frames of history.
    pub fn new(max_delay: usize) -> DelayLine {
        DelayLine {
            buffer: vec![0.0; max_delay.max(1) + 2],
            write: 0,
        }
    }

    /// The longest delay that can be read.
    pub fn max_delay(&self) -> usize {
        self.buffer.len() - 2
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write = 0;
    }

    #[inline]
    pub fn push(&mut self, sample: f32) {
        self.buffer[self.write] = sample;
        self.write = (self.write + 1) % self.buffer.len();
    }

    /// Reads back through the history, interpolating linearly. A `delay` of 1
    /// is the most recently pushed sample. Clamped to `[1, max_delay]`.
    #[inline]
    pub fn read(&self, delay: f32) -> f32 {
        let len = self.buffer.len();
        let delay = delay.clamp(1.0, self.max_delay() as f32);
        let whole = delay as usize;
        let frac = delay - whole as f32;
        let newer = (self.write + len - whole) % len;
        let older = (newer + len - 1) % len;
        let a = self.buffer[newer];
        let b = self.buffer[older];
        a + (b - a) * frac
    }
}

/// Sine LFO with its phase in cycles.
#[derive(Debug, Clone, Copy)]
pub struct Lfo {
    phase: f32,
    initial_phase: f32,
}

impl Lfo {
    pub fn new(phase: f32) -> Lfo {
        Lfo {
            phase,
            initial_phase: phase,
        }
    }

    pub fn reset(&mut self) {
        self.phase = self.initial_phase;
    }

    /// Returns the value in [-1, 1] and advances by `rate / sample_rate` cycles.
    #[inline]
    pub fn next(&mut self, rate: f32, sample_rate: f32) -> f32 {
        let value = (TAU * self.phase).sin();
        self.phase = (self.phase + rate / sample_rate).fract();
        value
    }

    /// Like `next`, mapped to [0, 1].
    #[inline]
    pub fn next_unipolar(&mut self, rate: f32, sample_rate: f32) -> f32 {
        0.5 + 0.5 * self.next(rate, sample_rate)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_delay_line_integer_and_fractional() {
        let mut line = DelayLine::new(8);
        for i in 1..=5 {
            line.push(i as f32);
        }
        assert_eq!(line.read(1.0), 5.0);
        assert_eq!(line.read(3.0), 3.0);
        assert_eq!(line.read(1.5), 4.5);
        // Out-of-range delays are clamped.
        assert_eq!(line.read(0.0), 5.0);
        line.clear();
        assert_eq!(line.read(2.0), 0.0);
    }

    #[test]
    fn test_lfo_cycle() {
        let mut lfo = Lfo::new(0.0);
        assert_eq!(lfo.next(1.0, 4.0), 0.0);
        assert!((lfo.next(1.0, 4.0) - 1.0).abs() < 1e-6);
        lfo.next(1.0, 4.0);
        assert!((lfo.next(1.0, 4.0) + 1.0).abs() < 1e-6);
        lfo.reset();
        assert_eq!(lfo.next_unipolar(1.0, 4.0), 0.5);
    }
}
