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

//! Reads a voice's sample data at an arbitrary playback rate, handling forward,
//! ping-pong and crossfaded loops.

use super::decoder::AudioData;
use crate::library::SampleLoop;

/// Loop points resolved against a decoded buffer: `start < end <= frame_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedLoop {
    pub start: usize,
    /// Exclusive.
    pub end: usize,
    pub crossfade: usize,
    pub ping_pong: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoopError {
    #[error("loop [{start}, {end}) lies outside the file's {frames} frames")]
    OutOfBounds { start: i64, end: i64, frames: usize },

    #[error("loop end {end} is not after loop start {start}")]
    Empty { start: i64, end: i64 },
}

/// Negative indices count back from the end: -1 is the frame count.
pub fn resolve_frame_index(index: i64, frame_count: usize) -> i64 {
    if index >= 0 {
        index
    } else {
        frame_count as i64 + 1 + index
    }
}

/// Resolves script loop points against a buffer of `frame_count` frames.
pub fn resolve_loop(sample_loop: &SampleLoop, frame_count: usize) -> Result<ResolvedLoop, LoopError> {
    let start = resolve_frame_index(sample_loop.start_frame, frame_count);
    let end = resolve_frame_index(sample_loop.end_frame, frame_count);
    if start < 0 || end > frame_count as i64 {
        return Err(LoopError::OutOfBounds {
            start,
            end,
            frames: frame_count,
        });
    }
    if end <= start {
        return Err(LoopError::Empty { start, end });
    }

    let (start, end) = (start as usize, end as usize);
    let length = end - start;
    let crossfade = sample_loop.crossfade_frames as usize;
    let crossfade = if sample_loop.ping_pong {
        crossfade.min(length / 2)
    } else {
        // The fade reads the frames just before the loop start.
        crossfade.min(length).min(start)
    };
    Ok(ResolvedLoop {
        start,
        end,
        crossfade,
        ping_pong: sample_loop.ping_pong,
    })
}

#[inline]
fn lerp_frames(audio: &AudioData, index: usize, next: usize, frac: f32) -> (f32, f32) {
    let (al, ar) = audio.stereo_frame(index);
    let (bl, br) = audio.stereo_frame(next);
    (al + (bl - al) * frac, ar + (br - ar) * frac)
}

#[inline]
fn read_at(audio: &AudioData, position: f64) -> (f32, f32) {
    let position = position.max(0.0);
    let index = position as usize;
    lerp_frames(audio, index, index + 1, position.fract() as f32)
}

#[inline]
fn mix(a: (f32, f32), b: (f32, f32), amount: f32) -> (f32, f32) {
    (a.0 + (b.0 - a.0) * amount, a.1 + (b.1 - a.1) * amount)
}

/// Playback state for one voice. Starts at frame 0 and enters the loop, if any,
/// when it reaches it.
#[derive(Debug, Clone, Copy)]
pub struct SampleStreamer {
    position: f64,
    reverse: bool,
    sample_loop: Option<ResolvedLoop>,
    finished: bool,
}

impl SampleStreamer {
    pub fn new(sample_loop: Option<ResolvedLoop>) -> SampleStreamer {
        SampleStreamer {
            position: 0.0,
            reverse: false,
            sample_loop,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn is_reversed(&self) -> bool {
        self.reverse
    }

    /// Reads one stereo frame and advances by `step` source frames.
    #[inline]
    pub fn next_frame(&mut self, audio: &AudioData, step: f64) -> (f32, f32) {
        if self.finished {
            return (0.0, 0.0);
        }
        match self.sample_loop {
            None => self.next_one_shot(audio, step),
            Some(sample_loop) if sample_loop.ping_pong => self.next_ping_pong(audio, step, sample_loop),
            Some(sample_loop) => self.next_forward(audio, step, sample_loop),
        }
    }

    fn next_one_shot(&mut self, audio: &AudioData, step: f64) -> (f32, f32) {
        if self.position >= audio.frame_count() as f64 {
            self.finished = true;
            return (0.0, 0.0);
        }
        let frame = read_at(audio, self.position);
        self.position += step;
        if self.position >= audio.frame_count() as f64 {
            self.finished = true;
        }
        frame
    }

    fn next_forward(&mut self, audio: &AudioData, step: f64, l: ResolvedLoop) -> (f32, f32) {
        let position = self.position;
        let index = position as usize;
        // Interpolate across the wrap point rather than past the loop end.
        let next = if index + 1 == l.end { l.start } else { index + 1 };
        let mut frame = lerp_frames(audio, index, next, position.fract() as f32);

        if l.crossfade > 0 {
            let fade_start = (l.end - l.crossfade) as f64;
            if position >= fade_start && position < l.end as f64 {
                let amount = ((position - fade_start) / l.crossfade as f64) as f32;
                let lead_in = read_at(audio, position - (l.end - l.start) as f64);
                frame = mix(frame, lead_in, amount);
            }
        }

        self.position += step;
        if self.position >= l.end as f64 {
            let length = (l.end - l.start) as f64;
            self.position = l.start as f64 + (self.position - l.start as f64) % length;
        }
        frame
    }

    fn next_ping_pong(&mut self, audio: &AudioData, step: f64, l: ResolvedLoop) -> (f32, f32) {
        let first = l.start as f64;
        let last = (l.end - 1) as f64;
        let position = self.position;
        let index = position as usize;
        let next = (index + 1).min(l.end - 1).max(index);
        let mut frame = lerp_frames(audio, index, next, position.fract() as f32);

        if l.crossfade > 0 {
            let crossfade = l.crossfade as f64;
            let limit = audio.frame_count() as f64 - 1.0;
            if position > last - crossfade && position <= last {
                let distance = last - position;
                let mirrored = last + distance;
                if mirrored <= limit {
                    let amount = 0.5 * (1.0 - distance / crossfade) as f32;
                    frame = mix(frame, read_at(audio, mirrored), amount);
                }
            } else if position < first + crossfade && position >= first && self.reverse {
                let distance = position - first;
                let mirrored = first - distance;
                if mirrored >= 0.0 {
                    let amount = 0.5 * (1.0 - distance / crossfade) as f32;
                    frame = mix(frame, read_at(audio, mirrored), amount);
                }
            }
        }

        if self.reverse {
            self.position -= step;
            if self.position < first {
                self.position = first + (first - self.position);
                self.reverse = false;
            }
        } else {
            self.position += step;
            if self.position > last {
                self.position = last - (self.position - last);
                self.reverse = true;
            }
        }
        if self.position >= first || self.reverse {
            self.position = self.position.clamp(first, last);
        }
        frame
    }
}
