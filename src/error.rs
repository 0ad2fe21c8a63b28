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

//! The error taxonomy shared by the interpreter, the loaders and the engine.
//! Category ids and integer codes are stable and meant for tooling.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::ConfigError;
use crate::samples::DecodeError;
use crate::script::{ScriptError, ScriptErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Common,
    Script,
    Audio,
}

impl ErrorCategory {
    pub fn id(&self) -> &'static str {
        match self {
            ErrorCategory::Common => "CM",
            ErrorCategory::Script => "LUA",
            ErrorCategory::Audio => "AUD",
        }
    }
}

/// A category plus an integer code, displayed as e.g. `LUA-2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    pub category: ErrorCategory,
    pub code: u32,
}

impl ErrorCode {
    pub const fn new(category: ErrorCategory, code: u32) -> ErrorCode {
        ErrorCode { category, code }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.category.id(), self.code)
    }
}

/// Errors the audio thread reports to the host. None of these allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("block of {frames} frames exceeds the maximum of {max}")]
    BlockTooLarge { frames: usize, max: usize },

    #[error("output buffer holds {got} samples but {needed} are required")]
    OutputTooSmall { needed: usize, got: usize },

    #[error("layer index {0} is out of range")]
    NoSuchLayer(usize),

    #[error("effect order is not a permutation of all effects")]
    InvalidEffectOrder,

    #[error("parameter {index} does not exist for this effect")]
    NoSuchParam { index: usize },

    #[error("block sample rate {got} Hz does not match the engine rate of {expected} Hz")]
    SampleRateMismatch { expected: u32, got: u32 },
}

#[derive(Debug, thiserror::Error)]
pub enum FloeError {
    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    #[error("invalid library {path}: {message}")]
    InvalidFileFormat { path: PathBuf, message: String },

    #[error("library {library} requires minor version {declared}; this build supports up to {supported}")]
    VersionTooOld {
        library: String,
        declared: u32,
        supported: u32,
    },

    #[error("host error: {0}")]
    Host(#[from] HostError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl FloeError {
    pub fn io(path: &Path, source: std::io::Error) -> FloeError {
        FloeError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// The stable category and code for this error.
    pub fn code(&self) -> ErrorCode {
        use ErrorCategory::*;
        match self {
            FloeError::NotFound { .. } => ErrorCode::new(Common, 1),
            FloeError::InvalidFileFormat { .. } => ErrorCode::new(Common, 2),
            FloeError::VersionTooOld { .. } => ErrorCode::new(Common, 3),
            FloeError::Host(_) => ErrorCode::new(Common, 4),
            FloeError::Io { .. } => ErrorCode::new(Common, 5),
            FloeError::Config(_) => ErrorCode::new(Common, 6),
            FloeError::Script(e) => e.code(),
            FloeError::Decode(_) => ErrorCode::new(Audio, 1),
        }
    }
}

impl ScriptError {
    pub fn code(&self) -> ErrorCode {
        let code = match self.kind {
            ScriptErrorKind::Syntax => 1,
            ScriptErrorKind::Runtime => 2,
            ScriptErrorKind::OutOfMemory => 3,
            ScriptErrorKind::Timeout => 4,
            ScriptErrorKind::Unexpected => 5,
            ScriptErrorKind::Cancelled => 6,
        };
        ErrorCode::new(ErrorCategory::Script, code)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        let not_found = FloeError::NotFound {
            what: "instrument",
            name: "Piano".to_string(),
        };
        assert_eq!(not_found.code().to_string(), "CM-1");

        let timeout = FloeError::Script(ScriptError::new(
            ScriptErrorKind::Timeout,
            "floe.lua",
            "took too long",
        ));
        assert_eq!(timeout.code().to_string(), "LUA-4");

        let host = FloeError::from(HostError::BlockTooLarge {
            frames: 256,
            max: 128,
        });
        assert_eq!(host.code(), ErrorCode::new(ErrorCategory::Common, 4));
    }
}
