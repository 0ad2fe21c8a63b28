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


//! Floe: a sample library interpreter and real-time multisample playback
//! engine.
//!
//! Libraries are folders with a `floe.lua` script. The [`library`] module
//! interprets them in a sandbox, [`samples`] decodes their audio and plays it
//! back, and [`engine`] drives three instrument layers through the
//! [`effects`] chain one audio block at a time.

pub mod config;
pub mod effects;
pub mod engine;
pub mod error;
pub mod library;
pub mod playsync;
pub mod retire;
pub mod samples;
pub mod script;
pub mod util;

#[cfg(test)]
mod testutil;

pub use error::{ErrorCode, FloeError, HostError};
