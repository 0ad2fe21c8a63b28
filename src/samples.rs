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

//! Multisample playback.
//!
//! This module provides:
//! - Decoding and caching of region audio (in memory, shared by weak handles)
//! - Region selection for note events, with velocity and timbre crossfades
//! - Voice management with a fixed polyphony limit
//! - Sample streaming with forward, crossfaded and ping-pong loops

mod decoder;
pub mod envelope;
mod loader;
pub mod selector;
mod store;
pub mod streamer;
pub mod voice;

pub use decoder::{decode_file, AudioData, DecodeError};
pub use loader::{InstrumentLoader, LoadedInstrument, PlayableRegion};
pub use selector::{select, NoteEvent, TriggeredRegion, TriggeredRegions};
pub use store::SampleStore;
pub use streamer::{resolve_loop, LoopError, ResolvedLoop, SampleStreamer};
pub use voice::{VoicePool, VoiceStart};
