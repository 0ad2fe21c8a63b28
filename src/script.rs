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

//! Sandboxed evaluation of library scripts and the typed schema they are
//! checked against.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::config::ConfigError;
use crate::library::Library;
use crate::playsync::CancelHandle;

mod builtins;
pub mod example;
pub mod records;
mod sandbox;
pub mod schema;

pub use example::example_script;
pub use schema::{bind, BindContext, BindError};

/// Resource limits for one script evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quotas {
    /// Upper bound on bytes the interpreter may allocate.
    pub max_bytes: usize,
    /// Wall-clock budget for the whole evaluation.
    pub max_wall: Duration,
}

impl Default for Quotas {
    fn default() -> Self {
        Quotas {
            max_bytes: 64 * 1024 * 1024,
            max_wall: Duration::from_secs(5),
        }
    }
}

/// Everything an evaluation needs besides the script itself.
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    pub quotas: Quotas,
    pub max_name_bytes: usize,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        SandboxSettings {
            quotas: Quotas::default(),
            max_name_bytes: crate::config::engine::DEFAULT_MAX_NAME_BYTES,
        }
    }
}

impl SandboxSettings {
    pub fn from_config(config: &EngineConfig) -> Result<SandboxSettings, ConfigError> {
        Ok(SandboxSettings {
            quotas: config.script_quotas()?,
            max_name_bytes: config.max_name_bytes(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptErrorKind {
    Syntax,
    Runtime,
    OutOfMemory,
    Timeout,
    Unexpected,
    Cancelled,
}

impl fmt::Display for ScriptErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScriptErrorKind::Syntax => "syntax error",
            ScriptErrorKind::Runtime => "runtime error",
            ScriptErrorKind::OutOfMemory => "memory limit exceeded",
            ScriptErrorKind::Timeout => "time limit exceeded",
            ScriptErrorKind::Unexpected => "unexpected error",
            ScriptErrorKind::Cancelled => "cancelled",
        })
    }
}

/// A failed script evaluation. Messages name the script file, never the
/// interpreter's internal chunk name.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} in {filename}: {message}")]
pub struct ScriptError {
    pub kind: ScriptErrorKind,
    pub filename: String,
    pub message: String,
    pub traceback: Option<String>,
}

impl ScriptError {
    pub fn new(kind: ScriptErrorKind, filename: &str, message: impl Into<String>) -> ScriptError {
        ScriptError {
            kind,
            filename: filename.to_string(),
            message: message.into(),
            traceback: None,
        }
    }
}

/// Evaluates a library script with default name limits.
pub fn evaluate(script: &[u8], script_path: &Path, quotas: &Quotas) -> Result<Library, ScriptError> {
    let settings = SandboxSettings {
        quotas: *quotas,
        ..Default::default()
    };
    sandbox::evaluate(script, script_path, &settings, None)
}

/// Evaluates a library script, polling `cancel` at every watchdog tick.
pub fn evaluate_with(
    script: &[u8],
    script_path: &Path,
    settings: &SandboxSettings,
    cancel: Option<&CancelHandle>,
) -> Result<Library, ScriptError> {
    sandbox::evaluate(script, script_path, settings, cancel)
}
