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

//! Voice management for polyphonic sample playback.
//!
//! Handles voice allocation, stealing, and note-off behavior. Everything here
//! runs on the audio thread: the pool is allocated once and released buffers
//! go to the retire channel.

use std::fmt;
use std::sync::Arc;

use super::decoder::AudioData;
use super::envelope::Envelope;
use super::streamer::{ResolvedLoop, SampleStreamer};
use crate::retire::Retirer;

/// Everything needed to start a voice.
#[derive(Debug, Clone)]
pub struct VoiceStart {
    pub layer: usize,
    pub key: u8,
    pub channel: u8,
    pub region_index: usize,
    pub audio: Arc<AudioData>,
    pub sample_loop: Option<ResolvedLoop>,
    pub pitch_ratio: f64,
    pub gain: f32,
    /// One-shot voices ignore note-off and play until the sample ends.
    pub one_shot: bool,
}

/// Semitone offset to playback-rate ratio.
#[inline]
pub fn pitch_ratio(key: u8, root_key: u8) -> f64 {
    2f64.powf((key as f64 - root_key as f64) / 12.0)
}

/// One slot of the pool. A slot without audio is free.
struct Voice {
    layer: usize,
    key: u8,
    channel: u8,
    region_index: usize,
    audio: Option<Arc<AudioData>>,
    streamer: SampleStreamer,
    pitch_ratio: f64,
    gain: f32,
    envelope: Envelope,
    serial: u64,
    one_shot: bool,
}

impl Voice {
    fn free() -> Voice {
        Voice {
            layer: 0,
            key: 0,
            channel: 0,
            region_index: 0,
            audio: None,
            streamer: SampleStreamer::new(None),
            pitch_ratio: 1.0,
            gain: 0.0,
            envelope: Envelope::new(0, 0),
            serial: 0,
            one_shot: false,
        }
    }

    fn is_free(&self) -> bool {
        self.audio.is_none()
    }

    fn is_finished(&self) -> bool {
        self.streamer.is_finished() || self.envelope.is_done()
    }

    fn matches_note_off(&self, layer: usize, key: u8, channel: u8) -> bool {
        !self.is_free() && !self.one_shot && self.layer == layer && self.key == key && self.channel == channel
    }
}

/// Fixed-capacity set of voices shared by all layers of an engine.
pub struct VoicePool {
    voices: Vec<Voice>,
    next_serial: u64,
    attack_frames: usize,
    release_frames: usize,
    retirer: Retirer,
}

impl VoicePool {
    /// Creates a pool of `capacity` voices. Envelope times are in output frames.
    pub fn new(capacity: usize, attack_frames: usize, release_frames: usize, retirer: Retirer) -> VoicePool {
        VoicePool {
            voices: (0..capacity).map(|_| Voice::free()).collect(),
            next_serial: 0,
            attack_frames,
            release_frames,
            retirer,
        }
    }

    pub fn capacity(&self) -> usize {
        self.voices.len()
    }

    /// Changes the envelope times used by voices started from now on.
    pub fn set_envelope(&mut self, attack_frames: usize, release_frames: usize) {
        self.attack_frames = attack_frames;
        self.release_frames = release_frames;
    }

    /// Starts a voice, stealing one if the pool is full. Returns the slot used.
    pub fn start(&mut self, start: VoiceStart) -> Option<usize> {
        let slot = self.pick_slot()?;
        self.free_slot(slot);

        let serial = self.next_serial;
        self.next_serial += 1;
        let voice = &mut self.voices[slot];
        voice.layer = start.layer;
        voice.key = start.key;
        voice.channel = start.channel;
        voice.region_index = start.region_index;
        voice.audio = Some(start.audio);
        voice.streamer = SampleStreamer::new(start.sample_loop);
        voice.pitch_ratio = start.pitch_ratio;
        voice.gain = start.gain;
        voice.envelope = Envelope::new(self.attack_frames, self.release_frames);
        voice.serial = serial;
        voice.one_shot = start.one_shot;
        Some(slot)
    }

    /// Free slot first, then the oldest releasing voice, then the quietest
    /// playing voice with the oldest winning ties.
    fn pick_slot(&self) -> Option<usize> {
        if let Some(free) = self.voices.iter().position(Voice::is_free) {
            return Some(free);
        }
        let releasing = self
            .voices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.envelope.is_releasing() || v.is_finished())
            .min_by_key(|(_, v)| v.serial)
            .map(|(slot, _)| slot);
        if releasing.is_some() {
            return releasing;
        }
        self.voices
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.envelope
                    .level()
                    .total_cmp(&b.envelope.level())
                    .then(a.serial.cmp(&b.serial))
            })
            .map(|(slot, _)| slot)
    }

    fn free_slot(&mut self, slot: usize) {
        if let Some(audio) = self.voices[slot].audio.take() {
            self.retirer.retire_audio(audio);
        }
    }

    /// Moves every matching voice into its release stage.
    pub fn release(&mut self, layer: usize, key: u8, channel: u8) {
        for voice in self.voices.iter_mut() {
            if voice.matches_note_off(layer, key, channel) {
                voice.envelope.release();
            }
        }
    }

    /// Releases every non-one-shot voice, optionally only those of one layer.
    pub fn release_all(&mut self, layer: Option<usize>) {
        for voice in self.voices.iter_mut() {
            if !voice.is_free() && !voice.one_shot && layer.map_or(true, |l| l == voice.layer) {
                voice.envelope.release();
            }
        }
    }

    /// Stops voices immediately, optionally only those of one layer.
    pub fn kill_all(&mut self, layer: Option<usize>) {
        for slot in 0..self.voices.len() {
            if layer.map_or(true, |l| l == self.voices[slot].layer) {
                self.free_slot(slot);
            }
        }
    }

    /// Adds the voices of `layer` into `out`, interleaved stereo.
    pub fn render_layer(&mut self, layer: usize, out: &mut [f32], frames: usize, output_rate: u32) {
        let frames = frames.min(out.len() / 2);
        for voice in self.voices.iter_mut() {
            if voice.layer != layer || voice.is_finished() {
                continue;
            }
            let Some(audio) = voice.audio.as_deref() else {
                continue;
            };
            let step = voice.pitch_ratio * audio.sample_rate() as f64 / output_rate as f64;
            for frame in out[..frames * 2].chunks_exact_mut(2) {
                let (left, right) = voice.streamer.next_frame(audio, step);
                let level = voice.envelope.next_level() * voice.gain;
                frame[0] += left * level;
                frame[1] += right * level;
                if voice.streamer.is_finished() || voice.envelope.is_done() {
                    break;
                }
            }
        }
    }

    /// Frees voices that finished during the block.
    pub fn end_block(&mut self) {
        for slot in 0..self.voices.len() {
            if !self.voices[slot].is_free() && self.voices[slot].is_finished() {
                self.free_slot(slot);
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.voices.iter().filter(|v| !v.is_free()).count()
    }

    pub fn active_count_for(&self, layer: usize) -> usize {
        self.voices.iter().filter(|v| !v.is_free() && v.layer == layer).count()
    }

    /// Region indices of the active voices of `layer`, oldest first.
    #[cfg(test)]
    pub(crate) fn active_regions(&self, layer: usize) -> impl Iterator<Item = usize> + '_ {
        let mut active: Vec<&Voice> = self
            .voices
            .iter()
            .filter(move |v| !v.is_free() && v.layer == layer)
            .collect();
        active.sort_by_key(|v| v.serial);
        active.into_iter().map(|v| v.region_index)
    }
}

impl fmt::Debug for VoicePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoicePool")
            .field("active_voices", &self.active_count())
            .field("capacity", &self.voices.len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::retire::{retire_channel, RetireBin};

    fn audio(frames: usize) -> Arc<AudioData> {
        Arc::new(AudioData::new(vec![0.5; frames], 1, 44100))
    }

    fn make_pool(capacity: usize, attack: usize, release: usize) -> (VoicePool, RetireBin) {
        let (retirer, bin) = retire_channel(64);
        (VoicePool::new(capacity, attack, release, retirer), bin)
    }

    fn make_start(layer: usize, key: u8, region_index: usize, audio: &Arc<AudioData>) -> VoiceStart {
        VoiceStart {
            layer,
            key,
            channel: 0,
            region_index,
            audio: audio.clone(),
            sample_loop: None,
            pitch_ratio: 1.0,
            gain: 1.0,
            one_shot: false,
        }
    }

    fn render(pool: &mut VoicePool, layer: usize, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * 2];
        pool.render_layer(layer, &mut out, frames, 44100);
        out
    }

    #[test]
    fn test_pitch_ratio() {
        assert_eq!(pitch_ratio(60, 60), 1.0);
        assert!((pitch_ratio(72, 60) - 2.0).abs() < 1e-12);
        assert!((pitch_ratio(48, 60) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_render_and_finish() {
        let (mut pool, bin) = make_pool(4, 0, 0);
        let data = audio(10);
        pool.start(make_start(0, 60, 0, &data));
        assert_eq!(pool.active_count(), 1);

        let out = render(&mut pool, 0, 16);
        assert_eq!(out[0], 0.5);
        assert_eq!(out[1], 0.5);
        assert_eq!(out[30], 0.0);

        pool.end_block();
        assert_eq!(pool.active_count(), 0);
        assert_eq!(bin.collect(), 1);
    }

    #[test]
    fn test_layers_render_separately() {
        let (mut pool, _bin) = make_pool(4, 0, 0);
        let data = audio(100);
        pool.start(make_start(1, 60, 0, &data));
        assert!(render(&mut pool, 0, 8).iter().all(|s| *s == 0.0));
        assert!(render(&mut pool, 1, 8).iter().all(|s| *s == 0.5));
        assert_eq!(pool.active_count_for(1), 1);
        assert_eq!(pool.active_count_for(0), 0);
    }

    #[test]
    fn test_release_frees_after_block() {
        let (mut pool, _bin) = make_pool(4, 0, 4);
        let data = audio(1000);
        pool.start(make_start(0, 60, 0, &data));
        pool.start(make_start(0, 62, 1, &data));
        pool.release(0, 60, 0);
        // Wrong channel does not match.
        pool.release(0, 62, 5);

        render(&mut pool, 0, 8);
        pool.end_block();
        assert_eq!(pool.active_count(), 1);
        assert_eq!(pool.active_regions(0).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_one_shot_ignores_release() {
        let (mut pool, _bin) = make_pool(4, 0, 0);
        let data = audio(1000);
        pool.start(VoiceStart {
            one_shot: true,
            ..make_start(0, 60, 0, &data)
        });
        pool.release(0, 60, 0);
        pool.release_all(None);
        render(&mut pool, 0, 8);
        pool.end_block();
        assert_eq!(pool.active_count(), 1);

        pool.kill_all(Some(0));
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn test_steals_oldest_releasing_first() {
        let (mut pool, _bin) = make_pool(3, 0, 1000);
        let data = audio(10_000);
        pool.start(make_start(0, 60, 0, &data));
        pool.start(make_start(0, 61, 1, &data));
        pool.start(make_start(0, 62, 2, &data));
        pool.release(0, 62, 0);
        pool.release(0, 61, 0);

        let slot = pool.start(make_start(0, 63, 3, &data));
        assert_eq!(slot, Some(1));
        assert_eq!(pool.active_regions(0).collect::<Vec<_>>(), vec![0, 2, 3]);
    }

    #[test]
    fn test_steals_quietest_then_oldest() {
        let (mut pool, _bin) = make_pool(2, 10, 10);
        let data = audio(10_000);
        pool.start(make_start(0, 60, 0, &data));
        render(&mut pool, 0, 10);
        pool.start(make_start(0, 61, 1, &data));
        render(&mut pool, 0, 2);

        // Region 1 is still in its attack, so it is quieter than region 0.
        assert_eq!(pool.start(make_start(0, 62, 2, &data)), Some(1));

        let (mut pool, _bin) = make_pool(2, 0, 10);
        pool.start(make_start(0, 60, 0, &data));
        pool.start(make_start(0, 61, 1, &data));
        assert_eq!(pool.start(make_start(0, 62, 2, &data)), Some(0));
    }

    #[test]
    fn test_empty_pool_starts_nothing() {
        let (mut pool, _bin) = make_pool(0, 0, 0);
        assert_eq!(pool.start(make_start(0, 60, 0, &audio(10))), None);
    }
}
