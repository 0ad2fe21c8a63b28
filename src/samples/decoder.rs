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

//! Decoding audio files into immutable in-memory buffers.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::warn;

use crate::playsync::CancelHandle;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decode {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: SymphoniaError,
    },

    #[error("no audio track in {0}")]
    NoTrack(PathBuf),

    #[error("{0} does not declare a sample rate")]
    MissingSampleRate(PathBuf),

    #[error("{0} contains no audio")]
    Empty(PathBuf),

    #[error("decoding {0} was cancelled")]
    Cancelled(PathBuf),
}

/// Decoded audio: interleaved f32 samples at the file's own sample rate.
/// Never mutated after construction.
pub struct AudioData {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
    frame_count: usize,
}

impl AudioData {
    /// Wraps interleaved samples. A trailing partial frame is dropped.
    pub fn new(mut samples: Vec<f32>, channels: u16, sample_rate: u32) -> AudioData {
        let channels = channels.max(1);
        let frame_count = samples.len() / channels as usize;
        samples.truncate(frame_count * channels as usize);
        AudioData {
            samples,
            channels,
            sample_rate,
            frame_count,
        }
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frame_count as f64 / self.sample_rate.max(1) as f64)
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.samples.len() * std::mem::size_of::<f32>()
    }

    /// One frame as stereo: mono feeds both sides, extra channels are ignored.
    /// Out-of-range frames are silent.
    #[inline]
    pub fn stereo_frame(&self, frame: usize) -> (f32, f32) {
        if frame >= self.frame_count {
            return (0.0, 0.0);
        }
        let base = frame * self.channels as usize;
        let left = self.samples[base];
        if self.channels == 1 {
            (left, left)
        } else {
            (left, self.samples[base + 1])
        }
    }

    /// Returns a copy at another sample rate using linear interpolation.
    pub fn resampled(&self, target_rate: u32) -> AudioData {
        if target_rate == self.sample_rate || self.frame_count == 0 {
            return AudioData::new(self.samples.clone(), self.channels, target_rate);
        }
        let channels = self.channels as usize;
        let ratio = target_rate as f64 / self.sample_rate as f64;
        let target_frames = (self.frame_count as f64 * ratio).ceil() as usize;
        let mut output = Vec::with_capacity(target_frames * channels);

        for target_frame in 0..target_frames {
            let source_pos = target_frame as f64 / ratio;
            let source_frame = source_pos.floor() as usize;
            let frac = source_pos.fract() as f32;
            for channel in 0..channels {
                let s0 = self
                    .samples
                    .get(source_frame * channels + channel)
                    .copied()
                    .unwrap_or(0.0);
                let s1 = self
                    .samples
                    .get((source_frame + 1) * channels + channel)
                    .copied()
                    .unwrap_or(s0);
                output.push(s0 + (s1 - s0) * frac);
            }
        }
        AudioData::new(output, self.channels, target_rate)
    }
}

impl std::fmt::Debug for AudioData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioData")
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.frame_count)
            .finish()
    }
}

/// Decodes a whole file with symphonia. `cancel` is polled before every packet
/// read; a cancelled decode drops what it has read so far.
pub fn decode_file(path: &Path, cancel: Option<&CancelHandle>) -> Result<AudioData, DecodeError> {
    let file = File::open(path).map_err(|source| DecodeError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let format_error = |source| DecodeError::Format {
        path: path.to_path_buf(),
        source,
    };
    let probed = get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(format_error)?;
    let mut format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DecodeError::NoTrack(path.to_path_buf()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| DecodeError::MissingSampleRate(path.to_path_buf()))?;
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);
    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(format_error)?;

    let mut samples = Vec::new();
    loop {
        if cancel.is_some_and(CancelHandle::is_cancelled) {
            return Err(DecodeError::Cancelled(path.to_path_buf()));
        }

        let packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(format_error(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(message)) => {
                warn!(path = ?path, error = message, "Skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(format_error(e)),
        };

        let spec = *decoded.spec();
        if channels == 0 {
            channels = spec.channels.count() as u16;
        }
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    if channels == 0 || samples.is_empty() {
        return Err(DecodeError::Empty(path.to_path_buf()));
    }
    Ok(AudioData::new(samples, channels, sample_rate))
}
