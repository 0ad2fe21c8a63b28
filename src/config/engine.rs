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

use std::time::Duration;

use duration_string::DurationString;
use serde::Deserialize;

use super::error::ConfigError;
use crate::script::Quotas;

/// Default output sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default maximum number of concurrently sounding voices across all layers.
pub const DEFAULT_MAX_VOICES: usize = 32;

/// Default maximum length of library, instrument and IR names, in bytes.
pub const DEFAULT_MAX_NAME_BYTES: usize = 64;

/// Default capacity of the channel that carries audio-thread releases to the main thread.
pub const DEFAULT_RETIRE_CAPACITY: usize = 1024;

const DEFAULT_ATTACK: Duration = Duration::from_millis(2);
const DEFAULT_RELEASE: Duration = Duration::from_millis(150);
const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_SCRIPT_MEMORY: usize = 64 * 1024 * 1024;
const MAX_WORKER_THREADS: usize = 4;

/// A YAML representation of the engine configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct EngineConfig {
    /// Output sample rate in Hz (default: 44100).
    sample_rate: Option<u32>,

    /// Voice pool capacity (default: 32).
    max_voices: Option<usize>,

    /// Voice attack time, e.g. "2ms".
    attack: Option<String>,

    /// Voice release time, e.g. "150ms".
    release: Option<String>,

    /// Maximum byte length of names declared by library scripts (default: 64).
    max_name_bytes: Option<usize>,

    /// Threads in the worker pool that interprets scripts and decodes audio.
    /// Defaults to the number of CPUs, capped at four.
    worker_threads: Option<usize>,

    /// Capacity of the retire channel (default: 1024).
    retire_capacity: Option<usize>,

    /// Script sandbox limits.
    #[serde(default)]
    script: ScriptConfig,
}

/// Limits applied to every library script evaluation.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct ScriptConfig {
    /// Maximum bytes the script may allocate (default: 64 MiB).
    max_memory_bytes: Option<usize>,

    /// Wall-clock budget, e.g. "5s".
    timeout: Option<String>,
}

impl EngineConfig {
    /// Returns the output sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    /// Returns the voice pool capacity.
    pub fn max_voices(&self) -> usize {
        self.max_voices.unwrap_or(DEFAULT_MAX_VOICES)
    }

    /// Returns the voice attack time.
    pub fn attack(&self) -> Result<Duration, ConfigError> {
        parse_duration("attack", self.attack.as_deref(), DEFAULT_ATTACK)
    }

    /// Returns the voice release time.
    pub fn release(&self) -> Result<Duration, ConfigError> {
        parse_duration("release", self.release.as_deref(), DEFAULT_RELEASE)
    }

    pub fn max_name_bytes(&self) -> usize {
        self.max_name_bytes.unwrap_or(DEFAULT_MAX_NAME_BYTES)
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
            .unwrap_or_else(|| num_cpus::get().clamp(1, MAX_WORKER_THREADS))
    }

    pub fn retire_capacity(&self) -> usize {
        self.retire_capacity.unwrap_or(DEFAULT_RETIRE_CAPACITY)
    }

    /// Returns the sandbox quotas for script evaluation.
    pub fn script_quotas(&self) -> Result<Quotas, ConfigError> {
        Ok(Quotas {
            max_bytes: self
                .script
                .max_memory_bytes
                .unwrap_or(DEFAULT_SCRIPT_MEMORY),
            max_wall: parse_duration(
                "script.timeout",
                self.script.timeout.as_deref(),
                DEFAULT_SCRIPT_TIMEOUT,
            )?,
        })
    }

    /// Overrides the sample rate, e.g. from a command line flag.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> EngineConfig {
        self.sample_rate = Some(sample_rate);
        self
    }

    /// Overrides the script quotas.
    pub fn with_script_quotas(mut self, quotas: &Quotas) -> EngineConfig {
        self.script.max_memory_bytes = Some(quotas.max_bytes);
        self.script.timeout = Some(format!("{}ms", quotas.max_wall.as_millis()));
        self
    }

    /// Checks values that would otherwise fail later in less obvious ways.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(8000..=384000).contains(&self.sample_rate()) {
            return Err(ConfigError::Invalid {
                field: "sample_rate",
                reason: format!("{} is outside [8000, 384000]", self.sample_rate()),
            });
        }
        if self.max_voices() == 0 {
            return Err(ConfigError::Invalid {
                field: "max_voices",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.worker_threads() == 0 {
            return Err(ConfigError::Invalid {
                field: "worker_threads",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retire_capacity() == 0 {
            return Err(ConfigError::Invalid {
                field: "retire_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        self.attack()?;
        self.release()?;
        self.script_quotas()?;
        Ok(())
    }
}

fn parse_duration(
    field: &'static str,
    value: Option<&str>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        Some(value) => DurationString::from_string(value.to_string())
            .map(Duration::from)
            .map_err(|e| ConfigError::InvalidDuration {
                field,
                value: value.to_string(),
                reason: e.to_string(),
            }),
        None => Ok(default),
    }
}
