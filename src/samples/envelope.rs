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

//! Linear attack/release amplitude envelope.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStage {
    Attack,
    Sustain,
    Release,
    Done,
}

#[derive(Debug, Clone, Copy)]
pub struct Envelope {
    stage: EnvelopeStage,
    level: f32,
    attack_step: f32,
    release_step: f32,
}

impl Envelope {
    /// Starts in the attack stage. Zero-length stages jump straight through.
    pub fn new(attack_frames: usize, release_frames: usize) -> Envelope {
        let mut envelope = Envelope {
            stage: EnvelopeStage::Attack,
            level: 0.0,
            attack_step: 1.0 / attack_frames.max(1) as f32,
            release_step: 1.0 / release_frames.max(1) as f32,
        };
        if attack_frames == 0 {
            envelope.stage = EnvelopeStage::Sustain;
            envelope.level = 1.0;
        }
        envelope
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn is_releasing(&self) -> bool {
        self.stage == EnvelopeStage::Release
    }

    pub fn is_done(&self) -> bool {
        self.stage == EnvelopeStage::Done
    }

    /// Releases from the current level, so an interrupted attack fades out
    /// without a jump.
    pub fn release(&mut self) {
        if matches!(self.stage, EnvelopeStage::Attack | EnvelopeStage::Sustain) {
            self.stage = EnvelopeStage::Release;
        }
    }

    /// Returns the level for the current frame and advances.
    #[inline]
    pub fn next_level(&mut self) -> f32 {
        match self.stage {
            EnvelopeStage::Attack => {
                self.level += self.attack_step;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = EnvelopeStage::Sustain;
                }
            }
            EnvelopeStage::Sustain => {}
            EnvelopeStage::Release => {
                self.level -= self.release_step;
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.stage = EnvelopeStage::Done;
                }
            }
            EnvelopeStage::Done => {}
        }
        self.level
    }
}
