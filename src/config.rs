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

use std::path::Path;

use config::{Config, Environment, File};

pub mod engine;
pub mod error;

pub use engine::{EngineConfig, ScriptConfig};
pub use error::ConfigError;

/// Prefix for environment variable overrides, e.g. `FLOE_SAMPLE_RATE=48000` or
/// `FLOE_SCRIPT__TIMEOUT=2s`.
pub const ENV_PREFIX: &str = "FLOE";

/// Loads the engine configuration from an optional YAML file with `FLOE_*`
/// environment overrides layered on top. A missing file is not an error.
pub fn load(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(false));
    }
    let config = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize::<EngineConfig>()?;
    config.validate()?;
    Ok(config)
}

/// Parses an engine configuration from a YAML string.
pub fn from_yaml(yaml: &str) -> Result<EngineConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::from_str(yaml, config::FileFormat::Yaml))
        .build()?
        .try_deserialize::<EngineConfig>()?;
    config.validate()?;
    Ok(config)
}
