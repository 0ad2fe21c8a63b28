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


//! The real-time engine: three instrument layers feeding the effect chain.
//!
//! `Engine` lives on the audio thread and is driven block by block through
//! `process`. `EngineHandle` stays on the main thread and publishes changes
//! through `EngineControls`. Nothing in `process` allocates, blocks or logs.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use midly::live::LiveEvent;
use midly::MidiMessage;
use tracing::{debug, info, warn};

pub mod controls;
mod layer;

pub use controls::{EngineControls, LayerControls, NUM_LAYERS};

use crate::config::EngineConfig;
use crate::effects::convolution::{ConvolutionReverb, Convolver};
use crate::effects::{EffectChain, EffectKind, ProcessContext, MAX_BLOCK_FRAMES, NUM_EFFECTS};
use crate::error::{FloeError, HostError};
use crate::retire::{retire_channel, RetireBin, Retired, Retirer};
use crate::samples::{AudioData, LoadedInstrument, TriggeredRegions, VoicePool};
use crate::util::db_to_gain;
use controls::{pack_order, unpack_order};
use layer::Layer;

/// Controller number that silences every voice at once.
const ALL_SOUND_OFF: u8 = 120;

/// Controller number that releases every held voice.
const ALL_NOTES_OFF: u8 = 123;

/// Impulse responses waiting for the audio thread to pick them up.
const CONVOLVER_QUEUE: usize = 4;

/// One short MIDI message and where in the block it arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    pub frame_offset: u32,
    data: [u8; 3],
    len: u8,
}

impl MidiEvent {
    /// Wraps raw bytes. Anything past three bytes is dropped; system exclusive
    /// messages are not used by the engine.
    pub fn new(frame_offset: u32, bytes: &[u8]) -> MidiEvent {
        let mut data = [0; 3];
        let len = bytes.len().min(3);
        data[..len].copy_from_slice(&bytes[..len]);
        MidiEvent {
            frame_offset,
            data,
            len: len as u8,
        }
    }

    /// `channel` is zero-based.
    pub fn note_on(frame_offset: u32, channel: u8, key: u8, velocity: u8) -> MidiEvent {
        MidiEvent::new(frame_offset, &[0x90 | (channel & 0x0f), key & 0x7f, velocity & 0x7f])
    }

    pub fn note_off(frame_offset: u32, channel: u8, key: u8) -> MidiEvent {
        MidiEvent::new(frame_offset, &[0x80 | (channel & 0x0f), key & 0x7f, 0])
    }

    pub fn control_change(frame_offset: u32, channel: u8, controller: u8, value: u8) -> MidiEvent {
        MidiEvent::new(frame_offset, &[0xb0 | (channel & 0x0f), controller & 0x7f, value & 0x7f])
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

/// What the host hands the engine for every block.
#[derive(Debug, Clone, Copy)]
pub struct AudioBlock<'a> {
    pub frames: usize,
    pub sample_rate: u32,
    /// Beats per minute.
    pub tempo: f64,
    /// In host order. Events are applied at the start of the block.
    pub midi: &'a [MidiEvent],
}

impl<'a> AudioBlock<'a> {
    pub fn new(frames: usize, sample_rate: u32, midi: &'a [MidiEvent]) -> AudioBlock<'a> {
        AudioBlock {
            frames,
            sample_rate,
            tempo: 120.0,
            midi,
        }
    }
}

/// Counters the audio thread maintains for the main thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub active_voices: usize,
    /// Regions that matched a note but could not sound.
    pub failed_voice_starts: u64,
    /// Releases that did not fit into the retire channel.
    pub retire_overflow: u64,
    pub blocks_processed: u64,
}

fn frames_for(duration: Duration, sample_rate: u32) -> usize {
    (duration.as_secs_f64() * sample_rate as f64).round() as usize
}

pub struct Engine {
    controls: Arc<EngineControls>,
    layers: [Layer; NUM_LAYERS],
    voices: VoicePool,
    chain: EffectChain,
    applied_order: u64,
    sample_rate: u32,
    attack: Duration,
    release: Duration,
    master_gain: f32,
    mix: [f32; MAX_BLOCK_FRAMES * 2],
    triggered: TriggeredRegions,
    retirer: Retirer,
    convolvers: Receiver<Option<Box<Convolver>>>,
}

impl Engine {
    /// Creates the audio-thread engine and its main-thread handle.
    pub fn new(config: &EngineConfig) -> Result<(Engine, EngineHandle), FloeError> {
        let sample_rate = config.sample_rate();
        let attack = config.attack()?;
        let release = config.release()?;
        let (retirer, bin) = retire_channel(config.retire_capacity());
        let (convolver_tx, convolver_rx) = crossbeam_channel::bounded(CONVOLVER_QUEUE);

        let controls = Arc::new(EngineControls::new());
        controls.sample_rate.store(sample_rate, Ordering::Relaxed);

        let engine = Engine {
            controls: controls.clone(),
            layers: std::array::from_fn(Layer::new),
            voices: VoicePool::new(
                config.max_voices(),
                frames_for(attack, sample_rate),
                frames_for(release, sample_rate),
                retirer.clone(),
            ),
            chain: EffectChain::new(sample_rate as f32),
            applied_order: pack_order(&EffectKind::ALL),
            sample_rate,
            attack,
            release,
            master_gain: 1.0,
            mix: [0.0; MAX_BLOCK_FRAMES * 2],
            triggered: TriggeredRegions::new(),
            retirer,
            convolvers: convolver_rx,
        };
        info!(
            sample_rate,
            max_voices = config.max_voices(),
            attack = ?attack,
            release = ?release,
            "Engine created"
        );

        let handle = EngineHandle {
            controls,
            bin,
            convolvers: convolver_tx,
        };
        Ok((engine, handle))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Changes the render rate. Stops every voice and clears effect state.
    /// Not real-time safe: call it only while the host is not processing.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        if sample_rate == self.sample_rate {
            return;
        }
        info!(from = self.sample_rate, to = sample_rate, "Engine sample rate changed");
        self.sample_rate = sample_rate;
        self.controls.sample_rate.store(sample_rate, Ordering::Relaxed);
        self.voices.kill_all(None);
        self.voices.set_envelope(
            frames_for(self.attack, sample_rate),
            frames_for(self.release, sample_rate),
        );
        // Convolvers are built for one rate; the handle has to install a new one.
        if let Some(convolver) = self
            .chain
            .effect_mut::<ConvolutionReverb>(EffectKind::ConvolutionReverb)
            .and_then(|reverb| reverb.swap_convolver(None))
        {
            self.retirer.retire(Retired::Convolver(convolver));
        }
        self.chain.set_sample_rate(sample_rate as f32);
    }

    /// Renders one block of interleaved stereo into `output`.
    pub fn process(&mut self, block: &AudioBlock, output: &mut [f32]) -> Result<(), HostError> {
        if block.frames > MAX_BLOCK_FRAMES {
            return Err(HostError::BlockTooLarge {
                frames: block.frames,
                max: MAX_BLOCK_FRAMES,
            });
        }
        if block.sample_rate != self.sample_rate {
            return Err(HostError::SampleRateMismatch {
                expected: self.sample_rate,
                got: block.sample_rate,
            });
        }
        let samples = block.frames * 2;
        if output.len() < samples {
            return Err(HostError::OutputTooSmall {
                needed: samples,
                got: output.len(),
            });
        }

        self.apply_controls();
        for (layer, controls) in self.layers.iter_mut().zip(self.controls.layers.iter()) {
            layer.sync(controls, &mut self.voices, &self.retirer);
        }

        let mut failed = 0;
        for event in block.midi {
            failed += self.handle_midi(event);
        }
        if failed > 0 {
            self.controls
                .failed_voice_starts
                .fetch_add(failed as u64, Ordering::Relaxed);
        }

        let mix = &mut self.mix[..samples];
        mix.fill(0.0);
        for (layer, controls) in self.layers.iter_mut().zip(self.controls.layers.iter()) {
            layer.render(controls, &mut self.voices, block.frames, self.sample_rate, mix);
        }

        let ctx = ProcessContext {
            sample_rate: self.sample_rate as f32,
            tempo: block.tempo,
        };
        self.chain.process(mix, block.frames, &ctx);

        let target = db_to_gain(self.controls.master_gain_db.load());
        let step = (target - self.master_gain) / block.frames.max(1) as f32;
        let mut gain = self.master_gain;
        for (out, frame) in output[..samples].chunks_exact_mut(2).zip(mix.chunks_exact(2)) {
            gain += step;
            out[0] = frame[0] * gain;
            out[1] = frame[1] * gain;
        }
        self.master_gain = target;

        self.voices.end_block();
        self.controls
            .active_voices
            .store(self.voices.active_count() as u32, Ordering::Relaxed);
        self.controls.blocks_processed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Copies the published effect settings into the chain and picks up a
    /// pending impulse response.
    fn apply_controls(&mut self) {
        let packed = self.controls.effect_order.load(Ordering::Acquire);
        if packed != self.applied_order {
            if let Some(order) = unpack_order(packed) {
                // A valid permutation is always accepted.
                let _ = self.chain.set_order(&order);
            }
            self.applied_order = packed;
        }

        for kind in EffectKind::ALL {
            let index = kind.index();
            self.chain
                .set_enabled(kind, self.controls.effect_enabled[index].load(Ordering::Relaxed));
            for (param, value) in self.controls.effect_params[index]
                .iter()
                .enumerate()
                .take(kind.params().len())
            {
                let _ = self.chain.set_param(kind, param, value.load());
            }
        }

        while let Ok(next) = self.convolvers.try_recv() {
            let previous = self
                .chain
                .effect_mut::<ConvolutionReverb>(EffectKind::ConvolutionReverb)
                .and_then(|reverb| reverb.swap_convolver(next));
            if let Some(previous) = previous {
                self.retirer.retire(Retired::Convolver(previous));
            }
        }
    }

    /// Applies one MIDI message to every layer listening on its channel.
    /// Returns the number of regions that could not start.
    fn handle_midi(&mut self, event: &MidiEvent) -> u32 {
        let Ok(LiveEvent::Midi { channel, message }) = LiveEvent::parse(event.bytes()) else {
            return 0;
        };
        let channel = u8::from(channel);
        let mut failed = 0;
        for (index, (layer, controls)) in self
            .layers
            .iter_mut()
            .zip(self.controls.layers.iter())
            .enumerate()
        {
            if !controls.accepts_channel(channel) {
                continue;
            }
            match message {
                MidiMessage::NoteOn { key, vel } if u8::from(vel) > 0 => {
                    failed += layer.note_on(
                        u8::from(key),
                        u8::from(vel),
                        channel,
                        controls,
                        &mut self.voices,
                        &mut self.triggered,
                    );
                }
                // Note on with velocity 0 is a note off.
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                    failed += layer.note_off(
                        u8::from(key),
                        channel,
                        controls,
                        &mut self.voices,
                        &mut self.triggered,
                    );
                }
                MidiMessage::Controller { controller, .. } => match u8::from(controller) {
                    ALL_SOUND_OFF => self.voices.kill_all(Some(index)),
                    ALL_NOTES_OFF => self.voices.release_all(Some(index)),
                    _ => {}
                },
                _ => {}
            }
        }
        failed
    }

    /// The effect order the chain is currently using.
    pub fn effect_order(&self) -> &[EffectKind] {
        self.chain.order()
    }

    /// Number of times layer `layer` has advanced its round-robin counter
    /// since its instrument was installed.
    pub fn round_robin_counter(&self, layer: usize) -> Option<u32> {
        self.layers.get(layer).map(Layer::rr_counter)
    }

    /// The instrument layer `layer` played during the last block.
    pub fn playing_instrument(&self, layer: usize) -> Option<&Arc<LoadedInstrument>> {
        self.layers.get(layer).and_then(Layer::instrument)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("sample_rate", &self.sample_rate)
            .field("voices", &self.voices)
            .field("chain", &self.chain)
            .finish()
    }
}

/// Main-thread side of an engine.
pub struct EngineHandle {
    controls: Arc<EngineControls>,
    bin: RetireBin,
    convolvers: Sender<Option<Box<Convolver>>>,
}

impl EngineHandle {
    pub fn controls(&self) -> &Arc<EngineControls> {
        &self.controls
    }

    /// Publishes an instrument to a layer, or clears it with `None`. The
    /// engine picks it up at the start of its next block.
    pub fn set_instrument(
        &self,
        layer: usize,
        instrument: Option<Arc<LoadedInstrument>>,
    ) -> Result<(), HostError> {
        let controls = self.controls.layer(layer)?;
        match &instrument {
            Some(instrument) => info!(layer, instrument = instrument.name(), "Publishing instrument"),
            None => info!(layer, "Clearing layer"),
        }
        controls.instrument.store(instrument);
        Ok(())
    }

    pub fn instrument(&self, layer: usize) -> Option<Arc<LoadedInstrument>> {
        self.controls.instrument(layer)
    }

    pub fn set_layer_gain_db(&self, layer: usize, gain_db: f32) -> Result<(), HostError> {
        self.controls.layer(layer)?.gain_db.store(gain_db.clamp(-96.0, 12.0));
        Ok(())
    }

    /// `pan` runs from -1 (left) to 1 (right).
    pub fn set_layer_pan(&self, layer: usize, pan: f32) -> Result<(), HostError> {
        self.controls.layer(layer)?.pan.store(pan.clamp(-1.0, 1.0));
        Ok(())
    }

    /// Sets the timbre knob, 0 to 99.
    pub fn set_layer_timbre(&self, layer: usize, timbre: u8) -> Result<(), HostError> {
        self.controls
            .layer(layer)?
            .timbre
            .store(timbre.min(99), Ordering::Relaxed);
        Ok(())
    }

    /// Restricts a layer to one MIDI channel (1 to 16), or `None` for all.
    pub fn set_layer_midi_channel(&self, layer: usize, channel: Option<u8>) -> Result<(), HostError> {
        let value = channel.map_or(0, |c| c.clamp(1, 16));
        self.controls
            .layer(layer)?
            .midi_channel
            .store(value, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_layer_velocity_to_volume(&self, layer: usize, amount: f32) -> Result<(), HostError> {
        self.controls
            .layer(layer)?
            .velocity_to_volume
            .store(amount.clamp(0.0, 1.0));
        Ok(())
    }

    pub fn set_layer_muted(&self, layer: usize, muted: bool) -> Result<(), HostError> {
        self.controls.layer(layer)?.muted.store(muted, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_master_gain_db(&self, gain_db: f32) {
        self.controls.master_gain_db.store(gain_db.clamp(-96.0, 12.0));
    }

    pub fn set_effect_order(&self, order: &[EffectKind]) -> Result<(), HostError> {
        if !crate::effects::chain::is_permutation(order) {
            return Err(HostError::InvalidEffectOrder);
        }
        debug!(order = ?order, "Publishing effect order");
        self.controls
            .effect_order
            .store(pack_order(order), Ordering::Release);
        Ok(())
    }

    pub fn effect_order(&self) -> [EffectKind; NUM_EFFECTS] {
        self.controls.effect_order()
    }

    pub fn set_effect_enabled(&self, kind: EffectKind, enabled: bool) {
        self.controls.effect_enabled[kind.index()].store(enabled, Ordering::Relaxed);
    }

    /// Sets a parameter target in the parameter's own units.
    pub fn set_effect_param(&self, kind: EffectKind, index: usize, value: f32) -> Result<(), HostError> {
        let info = kind
            .params()
            .get(index)
            .ok_or(HostError::NoSuchParam { index })?;
        self.controls.effect_params[kind.index()][index].store(info.clamp(value));
        Ok(())
    }

    pub fn effect_param(&self, kind: EffectKind, index: usize) -> Option<f32> {
        (index < kind.params().len()).then(|| self.controls.effect_params[kind.index()][index].load())
    }

    /// Builds a convolver for `ir` and queues it for the engine, or queues its
    /// removal with `None`. Returns false if the queue is full.
    pub fn set_impulse_response(&self, ir: Option<&AudioData>) -> bool {
        let sample_rate = self.controls.sample_rate.load(Ordering::Relaxed);
        let convolver = ir.map(|ir| Box::new(Convolver::new(ir, sample_rate)));
        if let Some(convolver) = &convolver {
            info!(partitions = convolver.partitions(), sample_rate, "Installing impulse response");
        }
        match self.convolvers.try_send(convolver) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Impulse response queue is full; try again after the engine has run");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("Engine is gone; impulse response dropped");
                false
            }
        }
    }

    /// Frees everything the audio thread has released. Call it regularly from
    /// the main thread. Returns the number of items freed.
    pub fn collect_garbage(&self) -> usize {
        self.bin.collect()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            active_voices: self.controls.active_voices.load(Ordering::Relaxed) as usize,
            failed_voice_starts: self.controls.failed_voice_starts.load(Ordering::Relaxed),
            retire_overflow: self.bin.overflow_count(),
            blocks_processed: self.controls.blocks_processed.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use super::*;
    use crate::effects::distortion;
    use crate::library::read_library;
    use crate::samples::{InstrumentLoader, SampleStore};
    use crate::script::SandboxSettings;
    use crate::testutil::{calculate_rms, channel_of, write_library, write_wav};
    use crate::util::pan_gains;

    const RATE: u32 = 44100;

    fn engine() -> (Engine, EngineHandle) {
        let config = crate::config::from_yaml("attack: 1ms\nrelease: 1ms\nmax_voices: 8").expect("config");
        Engine::new(&config).expect("engine")
    }

    /// Builds an instrument named "Keys" from `regions`, each a file name, a
    /// DC level (`None` leaves the file missing) and extra trigger fields.
    fn instrument(dir: &Path, regions: &[(&str, Option<f32>, &str)]) -> Arc<LoadedInstrument> {
        let mut script = String::from(
            "local lib = floe.new_library({ name = \"L\", tagline = \"t\", author = \"me\" })\n\
             local inst = floe.new_instrument(lib, { name = \"Keys\" })\n",
        );
        for (file, level, trigger) in regions {
            if let Some(level) = level {
                write_wav(&dir.join(file), &[vec![*level; RATE as usize]], RATE).expect("wav");
            }
            script.push_str(&format!(
                "floe.add_region(inst, {{ file = {{ path = \"{}\", root_key = 60 }}, \
                 trigger_criteria = {{ key_range = {{0, 128}}{} }} }})\n",
                file, trigger
            ));
        }
        script.push_str("return lib\n");
        let script = write_library(dir, &script);
        let library = read_library(&script, &SandboxSettings::default(), None)
            .expect("library")
            .library;
        let loader = InstrumentLoader::new(Arc::new(SampleStore::new()));
        Arc::new(loader.load(&library, "Keys", None).expect("load"))
    }

    fn run(engine: &mut Engine, midi: &[MidiEvent]) -> Vec<f32> {
        let mut out = vec![0.0; MAX_BLOCK_FRAMES * 2];
        engine
            .process(&AudioBlock::new(MAX_BLOCK_FRAMES, RATE, midi), &mut out)
            .expect("process");
        out
    }

    #[test]
    fn test_midi_event_bytes() {
        assert_eq!(MidiEvent::note_on(0, 0, 60, 100).bytes(), &[0x90, 60, 100]);
        assert_eq!(MidiEvent::note_off(5, 15, 61).bytes(), &[0x8f, 61, 0]);
        assert_eq!(MidiEvent::control_change(0, 1, 120, 0).bytes(), &[0xb1, 120, 0]);
        assert_eq!(MidiEvent::new(0, &[0xf8]).bytes(), &[0xf8]);
        assert_eq!(MidiEvent::new(0, &[0xf0, 1, 2, 3, 0xf7]).bytes().len(), 3);
    }

    #[test]
    fn test_rejects_bad_blocks() {
        let (mut engine, _handle) = engine();
        let mut out = vec![0.0; 512];
        assert_eq!(
            engine.process(&AudioBlock::new(256, RATE, &[]), &mut out),
            Err(HostError::BlockTooLarge { frames: 256, max: 128 })
        );
        assert_eq!(
            engine.process(&AudioBlock::new(64, 48000, &[]), &mut out),
            Err(HostError::SampleRateMismatch {
                expected: RATE,
                got: 48000
            })
        );
        assert_eq!(
            engine.process(&AudioBlock::new(128, RATE, &[]), &mut out[..100]),
            Err(HostError::OutputTooSmall { needed: 256, got: 100 })
        );
        assert!(engine.process(&AudioBlock::new(0, RATE, &[]), &mut []).is_ok());
    }

    #[test]
    fn test_silence_without_instruments() {
        let (mut engine, handle) = engine();
        let mut out = vec![1.0; MAX_BLOCK_FRAMES * 2];
        let midi = [MidiEvent::note_on(0, 0, 60, 100)];
        engine
            .process(&AudioBlock::new(MAX_BLOCK_FRAMES, RATE, &midi), &mut out)
            .expect("process");
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(handle.stats().active_voices, 0);
        assert_eq!(handle.stats().blocks_processed, 1);
    }

    #[test]
    fn test_note_renders_and_releases() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut engine, handle) = engine();
        handle
            .set_instrument(0, Some(instrument(dir.path(), &[("dc.wav", Some(0.5), "")])))
            .expect("set");

        let out = run(&mut engine, &[MidiEvent::note_on(0, 0, 60, 127)]);
        let (left, right) = pan_gains(0.0);
        assert!((out[254] - 0.5 * left).abs() < 1e-3, "left was {}", out[254]);
        assert!((out[255] - 0.5 * right).abs() < 1e-3);
        assert_eq!(handle.stats().active_voices, 1);

        // The release is shorter than a block, so the voice is gone after one.
        let out = run(&mut engine, &[MidiEvent::note_off(0, 0, 60)]);
        assert!(out[254].abs() < 1e-6);
        assert_eq!(handle.stats().active_voices, 0);
        assert!(run(&mut engine, &[]).iter().all(|&s| s == 0.0));

        drop(engine);
        assert!(handle.collect_garbage() >= 1);
    }

    #[test]
    fn test_velocity_zero_is_note_off() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut engine, handle) = engine();
        handle
            .set_instrument(0, Some(instrument(dir.path(), &[("dc.wav", Some(0.5), "")])))
            .expect("set");
        run(&mut engine, &[MidiEvent::note_on(0, 0, 60, 100)]);
        run(&mut engine, &[MidiEvent::note_on(0, 0, 60, 0)]);
        assert_eq!(handle.stats().active_voices, 0);
    }

    #[test]
    fn test_round_robin_cycles_through_regions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut engine, handle) = engine();
        let keys = instrument(
            dir.path(),
            &[
                ("a.wav", Some(0.1), ", round_robin_index = 0"),
                ("b.wav", Some(0.2), ", round_robin_index = 1"),
                ("c.wav", Some(0.3), ", round_robin_index = 2"),
            ],
        );
        handle.set_instrument(0, Some(keys)).expect("set");

        let notes: Vec<MidiEvent> = (0..4).map(|_| MidiEvent::note_on(0, 0, 60, 100)).collect();
        run(&mut engine, &notes);
        let regions: Vec<usize> = engine.voices.active_regions(0).collect();
        assert_eq!(regions, vec![0, 1, 2, 0]);
        assert_eq!(engine.round_robin_counter(0), Some(4));

        // Note off does not advance the counter.
        run(&mut engine, &[MidiEvent::note_off(0, 0, 60)]);
        assert_eq!(engine.round_robin_counter(0), Some(4));
    }

    #[test]
    fn test_velocity_scales_volume() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut engine, handle) = engine();
        handle
            .set_instrument(0, Some(instrument(dir.path(), &[("dc.wav", Some(0.5), "")])))
            .expect("set");

        let loud = run(&mut engine, &[MidiEvent::note_on(0, 0, 60, 127)])[254];
        run(&mut engine, &[MidiEvent::control_change(0, 0, 120, 0)]);
        let soft = run(&mut engine, &[MidiEvent::note_on(0, 0, 60, 64)])[254];
        assert!((soft / loud - 64.0 / 127.0).abs() < 1e-3);

        run(&mut engine, &[MidiEvent::control_change(0, 0, 120, 0)]);
        handle.set_layer_velocity_to_volume(0, 0.0).expect("set");
        let flat = run(&mut engine, &[MidiEvent::note_on(0, 0, 60, 64)])[254];
        assert!((flat - loud).abs() < 1e-3);
    }

    #[test]
    fn test_channel_filter_and_controllers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut engine, handle) = engine();
        let keys = instrument(dir.path(), &[("dc.wav", Some(0.5), "")]);
        handle.set_instrument(0, Some(keys.clone())).expect("set");
        handle.set_instrument(1, Some(keys)).expect("set");
        handle.set_layer_midi_channel(0, Some(1)).expect("set");
        handle.set_layer_midi_channel(1, Some(2)).expect("set");

        run(&mut engine, &[MidiEvent::note_on(0, 1, 60, 100)]);
        assert_eq!(engine.voices.active_count_for(0), 0);
        assert_eq!(engine.voices.active_count_for(1), 1);

        // All notes off on another channel is ignored.
        run(&mut engine, &[MidiEvent::control_change(0, 0, 123, 0)]);
        assert_eq!(engine.voices.active_count_for(1), 1);

        run(&mut engine, &[MidiEvent::control_change(0, 1, 120, 0)]);
        assert_eq!(handle.stats().active_voices, 0);

        run(&mut engine, &[MidiEvent::note_on(0, 1, 60, 100)]);
        run(&mut engine, &[MidiEvent::control_change(0, 1, 123, 0)]);
        assert_eq!(handle.stats().active_voices, 0);
    }

    #[test]
    fn test_layer_gain_and_pan() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut engine, handle) = engine();
        handle
            .set_instrument(2, Some(instrument(dir.path(), &[("dc.wav", Some(0.5), "")])))
            .expect("set");
        handle.set_layer_pan(2, -1.0).expect("pan");
        handle.set_layer_gain_db(2, -6.0).expect("gain");
        run(&mut engine, &[MidiEvent::note_on(0, 0, 60, 127)]);
        let out = run(&mut engine, &[]);
        let left = channel_of(&out, 0);
        let right = channel_of(&out, 1);
        assert!((left[127] - 0.5 * db_to_gain(-6.0)).abs() < 1e-3);
        assert!(calculate_rms(&right) < 1e-6);

        handle.set_layer_muted(2, true).expect("mute");
        run(&mut engine, &[]);
        assert!(run(&mut engine, &[]).iter().all(|&s| s == 0.0));

        assert_eq!(handle.set_layer_pan(3, 0.0), Err(HostError::NoSuchLayer(3)));
    }

    #[test]
    fn test_unplayable_regions_count_as_failed_starts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut engine, handle) = engine();
        let keys = instrument(
            dir.path(),
            &[("dc.wav", Some(0.5), ""), ("missing.wav", None, "")],
        );
        handle.set_instrument(0, Some(keys)).expect("set");
        run(&mut engine, &[MidiEvent::note_on(0, 0, 60, 100)]);
        let stats = handle.stats();
        assert_eq!(stats.active_voices, 1);
        assert_eq!(stats.failed_voice_starts, 1);
    }

    #[test]
    fn test_instrument_swap_retires_previous() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut engine, handle) = engine();
        handle
            .set_instrument(0, Some(instrument(dir.path(), &[("dc.wav", Some(0.5), "")])))
            .expect("set");
        run(&mut engine, &[MidiEvent::note_on(0, 0, 60, 100)]);
        assert!(engine.playing_instrument(0).is_some());

        handle.set_instrument(0, None).expect("clear");
        assert!(handle.instrument(0).is_none());
        run(&mut engine, &[]);
        assert!(engine.playing_instrument(0).is_none());
        assert_eq!(handle.stats().active_voices, 0);
        // The instrument and the voice's audio.
        assert!(handle.collect_garbage() >= 2);
    }

    #[test]
    fn test_effect_controls_reach_the_chain() {
        let (mut engine, handle) = engine();
        let mut order = EffectKind::ALL;
        order.reverse();
        handle.set_effect_order(&order).expect("order");
        assert_eq!(
            handle.set_effect_order(&order[..3]),
            Err(HostError::InvalidEffectOrder)
        );
        handle.set_effect_enabled(EffectKind::Distortion, true);
        handle
            .set_effect_param(EffectKind::Distortion, distortion::TYPE, 7.0)
            .expect("param");
        assert_eq!(
            handle.set_effect_param(EffectKind::Distortion, 9, 0.0),
            Err(HostError::NoSuchParam { index: 9 })
        );
        assert_eq!(handle.effect_param(EffectKind::Distortion, distortion::TYPE), Some(2.0));

        run(&mut engine, &[]);
        assert_eq!(engine.effect_order(), &order);
        assert!(engine.chain.is_enabled(EffectKind::Distortion));
        assert_eq!(
            engine.chain.param_value(EffectKind::Distortion, distortion::TYPE),
            Some(2.0)
        );
    }

    #[test]
    fn test_impulse_response_swap() {
        let (mut engine, handle) = engine();
        let ir = AudioData::new(vec![1.0, 0.0, 0.0, 0.0], 1, RATE);
        assert!(handle.set_impulse_response(Some(&ir)));
        run(&mut engine, &[]);
        let has_ir = |engine: &mut Engine| {
            engine
                .chain
                .effect_mut::<ConvolutionReverb>(EffectKind::ConvolutionReverb)
                .map(|r| r.has_impulse_response())
        };
        assert_eq!(has_ir(&mut engine), Some(true));
        assert_eq!(handle.collect_garbage(), 0);

        assert!(handle.set_impulse_response(None));
        run(&mut engine, &[]);
        assert_eq!(has_ir(&mut engine), Some(false));
        assert_eq!(handle.collect_garbage(), 1);
    }

    #[test]
    fn test_set_sample_rate() {
        let (mut engine, _handle) = engine();
        engine.set_sample_rate(48000);
        let mut out = vec![0.0; 256];
        assert!(engine.process(&AudioBlock::new(128, 48000, &[]), &mut out).is_ok());
        assert!(engine.process(&AudioBlock::new(128, RATE, &[]), &mut out).is_err());
    }
}
