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


//! State the main thread publishes to the audio thread.
//!
//! Instruments are swapped as whole `Arc`s; everything else is a plain atomic
//! the engine reads once per block.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::config::engine::DEFAULT_SAMPLE_RATE;
use crate::effects::{EffectKind, MAX_PARAMS, NUM_EFFECTS};
use crate::error::HostError;
use crate::samples::LoadedInstrument;
use crate::util::AtomicF32;

/// Number of instrument layers an engine plays in parallel.
pub const NUM_LAYERS: usize = 3;

/// Timbre knob position a new layer starts at.
pub const DEFAULT_TIMBRE: u8 = 50;

/// Controls of one instrument layer.
#[derive(Debug)]
pub struct LayerControls {
    pub(crate) instrument: ArcSwapOption<LoadedInstrument>,
    pub(crate) gain_db: AtomicF32,
    pub(crate) pan: AtomicF32,
    pub(crate) timbre: AtomicU8,
    /// 0 listens to every channel, 1 to 16 to that channel only.
    pub(crate) midi_channel: AtomicU8,
    /// How much note velocity scales voice volume, 0 to 1.
    pub(crate) velocity_to_volume: AtomicF32,
    pub(crate) muted: AtomicBool,
}

impl LayerControls {
    fn new() -> LayerControls {
        LayerControls {
            instrument: ArcSwapOption::empty(),
            gain_db: AtomicF32::new(0.0),
            pan: AtomicF32::new(0.0),
            timbre: AtomicU8::new(DEFAULT_TIMBRE),
            midi_channel: AtomicU8::new(0),
            velocity_to_volume: AtomicF32::new(1.0),
            muted: AtomicBool::new(false),
        }
    }

    /// Whether a message on zero-based `channel` reaches this layer.
    #[inline]
    pub(crate) fn accepts_channel(&self, channel: u8) -> bool {
        match self.midi_channel.load(Ordering::Relaxed) {
            0 => true,
            filter => filter == channel + 1,
        }
    }
}

/// Everything shared between an `Engine` and its `EngineHandle`.
#[derive(Debug)]
pub struct EngineControls {
    pub(crate) layers: [LayerControls; NUM_LAYERS],
    /// The rate the engine renders at. Changed only while the engine is idle.
    pub(crate) sample_rate: AtomicU32,
    pub(crate) master_gain_db: AtomicF32,
    /// The effect order packed four bits per slot, see `pack_order`.
    pub(crate) effect_order: AtomicU64,
    pub(crate) effect_enabled: [AtomicBool; NUM_EFFECTS],
    pub(crate) effect_params: [[AtomicF32; MAX_PARAMS]; NUM_EFFECTS],

    // Counters written by the audio thread.
    pub(crate) active_voices: AtomicU32,
    pub(crate) failed_voice_starts: AtomicU64,
    pub(crate) blocks_processed: AtomicU64,
}

impl EngineControls {
    pub fn new() -> EngineControls {
        EngineControls {
            layers: std::array::from_fn(|_| LayerControls::new()),
            sample_rate: AtomicU32::new(DEFAULT_SAMPLE_RATE),
            master_gain_db: AtomicF32::new(0.0),
            effect_order: AtomicU64::new(pack_order(&EffectKind::ALL)),
            effect_enabled: std::array::from_fn(|_| AtomicBool::new(false)),
            effect_params: std::array::from_fn(|effect| {
                let params = EffectKind::ALL[effect].params();
                std::array::from_fn(|i| AtomicF32::new(params.get(i).map_or(0.0, |p| p.default)))
            }),
            active_voices: AtomicU32::new(0),
            failed_voice_starts: AtomicU64::new(0),
            blocks_processed: AtomicU64::new(0),
        }
    }

    pub(crate) fn layer(&self, layer: usize) -> Result<&LayerControls, HostError> {
        self.layers.get(layer).ok_or(HostError::NoSuchLayer(layer))
    }

    pub fn instrument(&self, layer: usize) -> Option<Arc<LoadedInstrument>> {
        self.layers.get(layer).and_then(|l| l.instrument.load_full())
    }

    pub fn effect_order(&self) -> [EffectKind; NUM_EFFECTS] {
        unpack_order(self.effect_order.load(Ordering::Acquire)).unwrap_or(EffectKind::ALL)
    }
}

impl Default for EngineControls {
    fn default() -> Self {
        Self::new()
    }
}

/// Packs an effect permutation into one word so the audio thread can read it
/// without touching the heap.
pub(crate) fn pack_order(order: &[EffectKind]) -> u64 {
    order
        .iter()
        .enumerate()
        .fold(0u64, |packed, (slot, kind)| packed | ((kind.index() as u64) << (slot * 4)))
}

/// Reverses `pack_order`. Returns `None` if the word is not a permutation.
pub(crate) fn unpack_order(packed: u64) -> Option<[EffectKind; NUM_EFFECTS]> {
    let mut order = EffectKind::ALL;
    let mut seen = [false; NUM_EFFECTS];
    for (slot, kind) in order.iter_mut().enumerate() {
        let index = ((packed >> (slot * 4)) & 0xf) as usize;
        *kind = EffectKind::from_index(index)?;
        if std::mem::replace(&mut seen[index], true) {
            return None;
        }
    }
    Some(order)
}
