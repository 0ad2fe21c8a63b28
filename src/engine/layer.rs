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


//! One of the engine's instrument layers, as seen from the audio thread.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::controls::LayerControls;
use crate::effects::MAX_BLOCK_FRAMES;
use crate::library::TriggerEvent;
use crate::retire::{Retired, Retirer};
use crate::samples::selector::velocity_to_percent;
use crate::samples::voice::pitch_ratio;
use crate::samples::{select, LoadedInstrument, NoteEvent, TriggeredRegions, VoicePool, VoiceStart};
use crate::util::{db_to_gain, pan_gains};

/// Scales a MIDI velocity into a voice gain. `amount` 0 ignores velocity,
/// 1 maps it linearly.
#[inline]
pub(crate) fn velocity_gain(velocity: u8, amount: f32) -> f32 {
    let amount = amount.clamp(0.0, 1.0);
    1.0 - amount + amount * velocity.min(127) as f32 / 127.0
}

pub(crate) struct Layer {
    index: usize,
    instrument: Option<Arc<LoadedInstrument>>,
    rr_counter: u32,
    /// Velocity of the last note-on per key, reused for note-off regions.
    note_velocity: [u8; 128],
    /// Left and right gain applied at the end of the previous block.
    gains: (f32, f32),
    buffer: [f32; MAX_BLOCK_FRAMES * 2],
}

impl Layer {
    pub(crate) fn new(index: usize) -> Layer {
        Layer {
            index,
            instrument: None,
            rr_counter: 0,
            note_velocity: [0; 128],
            gains: pan_gains(0.0),
            buffer: [0.0; MAX_BLOCK_FRAMES * 2],
        }
    }

    pub(crate) fn instrument(&self) -> Option<&Arc<LoadedInstrument>> {
        self.instrument.as_ref()
    }

    pub(crate) fn rr_counter(&self) -> u32 {
        self.rr_counter
    }

    /// Picks up a newly published instrument. Voices of the old one are
    /// released and the old `Arc` goes to the retire channel.
    pub(crate) fn sync(&mut self, controls: &LayerControls, voices: &mut VoicePool, retirer: &Retirer) {
        let latest = controls.instrument.load();
        let changed = match (&*latest, &self.instrument) {
            (Some(next), Some(current)) => !Arc::ptr_eq(next, current),
            (None, None) => false,
            _ => true,
        };
        if !changed {
            return;
        }
        voices.release_all(Some(self.index));
        self.rr_counter = 0;
        if let Some(previous) = std::mem::replace(&mut self.instrument, (*latest).clone()) {
            retirer.retire(Retired::Instrument(previous));
        }
    }

    /// Starts the note-on regions for `key`. Returns the number of regions
    /// that matched but could not start.
    pub(crate) fn note_on(
        &mut self,
        key: u8,
        velocity: u8,
        channel: u8,
        controls: &LayerControls,
        voices: &mut VoicePool,
        triggered: &mut TriggeredRegions,
    ) -> u32 {
        let Some(instrument) = self.instrument.as_deref() else {
            return 0;
        };
        self.note_velocity[key as usize & 0x7f] = velocity;
        let event = NoteEvent {
            kind: TriggerEvent::NoteOn,
            key,
            velocity: velocity_to_percent(velocity),
            rr_counter: self.rr_counter,
            timbre: controls.timbre.load(Ordering::Relaxed),
        };
        select(instrument.instrument(), &event, triggered);
        self.rr_counter = self.rr_counter.wrapping_add(1);

        let gain = velocity_gain(velocity, controls.velocity_to_volume.load());
        start_voices(self.index, instrument, key, channel, gain, false, triggered, voices)
    }

    /// Releases the voices held by `key` and starts its note-off regions as
    /// one-shots.
    pub(crate) fn note_off(
        &mut self,
        key: u8,
        channel: u8,
        controls: &LayerControls,
        voices: &mut VoicePool,
        triggered: &mut TriggeredRegions,
    ) -> u32 {
        voices.release(self.index, key, channel);
        let Some(instrument) = self.instrument.as_deref() else {
            return 0;
        };
        let velocity = self.note_velocity[key as usize & 0x7f];
        let event = NoteEvent {
            kind: TriggerEvent::NoteOff,
            key,
            velocity: velocity_to_percent(velocity),
            rr_counter: self.rr_counter,
            timbre: controls.timbre.load(Ordering::Relaxed),
        };
        select(instrument.instrument(), &event, triggered);
        if triggered.is_empty() {
            return 0;
        }
        let gain = velocity_gain(velocity, controls.velocity_to_volume.load());
        start_voices(self.index, instrument, key, channel, gain, true, triggered, voices)
    }

    /// Renders this layer's voices and adds them into `mix` with the layer's
    /// gain and pan, ramping from the previous block's values.
    pub(crate) fn render(
        &mut self,
        controls: &LayerControls,
        voices: &mut VoicePool,
        frames: usize,
        sample_rate: u32,
        mix: &mut [f32],
    ) {
        let samples = frames * 2;
        let target = if controls.muted.load(Ordering::Relaxed) {
            (0.0, 0.0)
        } else {
            let gain = db_to_gain(controls.gain_db.load());
            let (left, right) = pan_gains(controls.pan.load());
            (left * gain, right * gain)
        };

        if voices.active_count_for(self.index) == 0 {
            self.gains = target;
            return;
        }

        let buffer = &mut self.buffer[..samples];
        buffer.fill(0.0);
        voices.render_layer(self.index, buffer, frames, sample_rate);

        let (mut left, mut right) = self.gains;
        let step_left = (target.0 - left) / frames.max(1) as f32;
        let step_right = (target.1 - right) / frames.max(1) as f32;
        for (out, frame) in mix[..samples].chunks_exact_mut(2).zip(buffer.chunks_exact(2)) {
            left += step_left;
            right += step_right;
            out[0] += frame[0] * left;
            out[1] += frame[1] * right;
        }
        self.gains = target;
    }
}

#[allow(clippy::too_many_arguments)]
fn start_voices(
    layer: usize,
    instrument: &LoadedInstrument,
    key: u8,
    channel: u8,
    gain: f32,
    one_shot: bool,
    triggered: &TriggeredRegions,
    voices: &mut VoicePool,
) -> u32 {
    let regions = &instrument.instrument().regions;
    let mut failed = 0;
    for hit in triggered.as_slice() {
        let Some(playable) = instrument.region(hit.region_index) else {
            failed += 1;
            continue;
        };
        let started = voices.start(VoiceStart {
            layer,
            key,
            channel,
            region_index: hit.region_index,
            audio: playable.audio.clone(),
            sample_loop: playable.sample_loop,
            pitch_ratio: pitch_ratio(key, regions[hit.region_index].file.root_key),
            gain: gain * hit.gain,
            one_shot,
        });
        if started.is_none() {
            failed += 1;
        }
    }
    failed
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_velocity_gain() {
        assert_eq!(velocity_gain(127, 1.0), 1.0);
        assert_eq!(velocity_gain(0, 1.0), 0.0);
        assert_eq!(velocity_gain(0, 0.0), 1.0);
        assert!((velocity_gain(64, 0.5) - (0.5 + 0.5 * 64.0 / 127.0)).abs() < 1e-6);
        assert_eq!(velocity_gain(200, 1.0), 1.0);
    }
}
