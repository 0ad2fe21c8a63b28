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

//! The ordered chain of insert effects with smoothed parameters and
//! crossfaded bypass.

use std::fmt;

use super::smoother::Smoother;
use super::{create_effect, Effect, EffectKind, ParamInfo, ProcessContext, MAX_BLOCK_FRAMES, MAX_PARAMS, NUM_EFFECTS};
use crate::error::HostError;

/// Bypass transitions take this long.
pub const BYPASS_FADE_SECONDS: f32 = 0.01;

struct Slot {
    effect: Box<dyn Effect>,
    info: &'static [ParamInfo],
    smoothers: [Smoother; MAX_PARAMS],
    values: [f32; MAX_PARAMS],
    enabled: bool,
    /// Crossfade position between dry (0) and processed (1).
    wet: f32,
}

impl Slot {
    fn new(kind: EffectKind, sample_rate: f32) -> Slot {
        let info = kind.params();
        let mut values = [0.0; MAX_PARAMS];
        let mut smoothers = [Smoother::new(0.0, sample_rate); MAX_PARAMS];
        for (i, param) in info.iter().enumerate() {
            values[i] = param.default;
            smoothers[i].set_immediate(param.default);
        }
        Slot {
            effect: create_effect(kind, sample_rate),
            info,
            smoothers,
            values,
            enabled: false,
            wet: 0.0,
        }
    }

    /// Moves every parameter one block closer to its target.
    fn advance_params(&mut self, frames: usize) {
        for (i, param) in self.info.iter().enumerate() {
            self.values[i] = if param.discrete {
                self.smoothers[i].target()
            } else {
                self.smoothers[i].advance(frames)
            };
        }
    }
}

pub struct EffectChain {
    slots: Vec<Slot>,
    order: [EffectKind; NUM_EFFECTS],
    fade_step: f32,
    scratch: [f32; MAX_BLOCK_FRAMES * 2],
}

impl EffectChain {
    /// Creates every effect, all disabled, in the default order.
    pub fn new(sample_rate: f32) -> EffectChain {
        EffectChain {
            slots: EffectKind::ALL
                .iter()
                .map(|&kind| Slot::new(kind, sample_rate))
                .collect(),
            order: EffectKind::ALL,
            fade_step: Self::fade_step_for(sample_rate),
            scratch: [0.0; MAX_BLOCK_FRAMES * 2],
        }
    }

    fn fade_step_for(sample_rate: f32) -> f32 {
        1.0 / (BYPASS_FADE_SECONDS * sample_rate).max(1.0)
    }

    /// Not real-time safe: effects may reallocate their buffers.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.fade_step = Self::fade_step_for(sample_rate);
        for slot in self.slots.iter_mut() {
            slot.effect.set_sample_rate(sample_rate);
            for smoother in slot.smoothers.iter_mut() {
                smoother.set_sample_rate(sample_rate);
            }
        }
    }

    pub fn order(&self) -> &[EffectKind] {
        &self.order
    }

    /// Changes the processing order. Effects keep their state.
    pub fn set_order(&mut self, order: &[EffectKind]) -> Result<(), HostError> {
        if !is_permutation(order) {
            return Err(HostError::InvalidEffectOrder);
        }
        self.order.copy_from_slice(order);
        Ok(())
    }

    pub fn set_enabled(&mut self, kind: EffectKind, enabled: bool) {
        self.slots[kind.index()].enabled = enabled;
    }

    pub fn is_enabled(&self, kind: EffectKind) -> bool {
        self.slots[kind.index()].enabled
    }

    /// Sets a parameter target, clamped to its range. Continuous parameters glide
    /// towards it; discrete ones switch at the next block.
    pub fn set_param(&mut self, kind: EffectKind, index: usize, value: f32) -> Result<(), HostError> {
        let slot = &mut self.slots[kind.index()];
        let info = slot.info.get(index).ok_or(HostError::NoSuchParam { index })?;
        slot.smoothers[index].set_target(info.clamp(value));
        Ok(())
    }

    /// The value the effect used for its last block.
    pub fn param_value(&self, kind: EffectKind, index: usize) -> Option<f32> {
        let slot = &self.slots[kind.index()];
        (index < slot.info.len()).then(|| slot.values[index])
    }

    pub fn effect_mut<T: Effect + 'static>(&mut self, kind: EffectKind) -> Option<&mut T> {
        self.slots[kind.index()].effect.as_any_mut().downcast_mut::<T>()
    }

    pub fn hard_reset(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.effect.hard_reset();
        }
    }

    /// Runs the chain in place over `frames` interleaved stereo frames.
    pub fn process(&mut self, buffer: &mut [f32], frames: usize, ctx: &ProcessContext) {
        let frames = frames.min(MAX_BLOCK_FRAMES).min(buffer.len() / 2);
        let samples = frames * 2;
        for kind in self.order {
            let slot = &mut self.slots[kind.index()];
            let target = if slot.enabled { 1.0 } else { 0.0 };
            if slot.wet == 0.0 && target == 0.0 {
                continue;
            }

            slot.advance_params(frames);
            let params = &slot.values[..slot.info.len()];
            slot.effect.process(&buffer[..samples], &mut self.scratch[..samples], frames, params, ctx);

            if slot.wet == 1.0 && target == 1.0 {
                buffer[..samples].copy_from_slice(&self.scratch[..samples]);
                continue;
            }
            for (dry, wet) in buffer[..samples].chunks_exact_mut(2).zip(self.scratch.chunks_exact(2)) {
                slot.wet = if target > slot.wet {
                    (slot.wet + self.fade_step).min(1.0)
                } else {
                    (slot.wet - self.fade_step).max(0.0)
                };
                dry[0] += (wet[0] - dry[0]) * slot.wet;
                dry[1] += (wet[1] - dry[1]) * slot.wet;
            }
            if slot.wet == 0.0 {
                // Fully bypassed: start clean next time it is enabled.
                slot.effect.hard_reset();
            }
        }
    }
}

impl fmt::Debug for EffectChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let enabled: Vec<EffectKind> = self
            .order
            .iter()
            .copied()
            .filter(|kind| self.slots[kind.index()].enabled)
            .collect();
        f.debug_struct("EffectChain")
            .field("order", &self.order)
            .field("enabled", &enabled)
            .finish()
    }
}

/// Whether `order` names every effect exactly once.
pub fn is_permutation(order: &[EffectKind]) -> bool {
    if order.len() != NUM_EFFECTS {
        return false;
    }
    let mut seen = [false; NUM_EFFECTS];
    for kind in order {
        if std::mem::replace(&mut seen[kind.index()], true) {
            return false;
        }
    }
    true
}
