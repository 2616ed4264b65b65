//! Minimal configuration loading for contour.
//!
//! Kept free of engine dependencies so it can be imported by the engine and
//! by any front end embedding it.
//!
//! # Usage
//!
//! ```rust,no_run
//! use contourconf::ContourConfig;
//!
//! let config = ContourConfig::load().expect("Failed to load config");
//! println!("tick rate: {} Hz", config.engine.tick_rate_hz);
//! println!("bend range: ±{}", config.midi.bend_range);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/contour/config.toml` (system)
//! 2. `~/.config/contour/config.toml` (user)
//! 3. `./contour.toml` (local override)
//! 4. Environment variables (`CONTOUR_*`)
//!
//! # Example Config
//!
//! ```toml
//! [engine]
//! tick_rate_hz = 250
//! observer_rate_hz = 30
//! default_velocity = 0.7
//!
//! [midi]
//! output_port = "IAC"
//! channels = 15
//! first_channel = 1
//! bend_range = 48
//!
//! [midi.instruments]
//! lead = 80
//!
//! [telemetry]
//! log_level = "info"
//! ```

pub mod engine;
pub mod loader;
pub mod midi;

pub use engine::{is_valid_rate, is_valid_velocity, EngineConfig, TelemetryConfig, RATE_RANGE_HZ};
pub use loader::{discover_config_files_with_override, ConfigSources};
pub use midi::{InstrumentsConfig, MidiConfig};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete contour configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ContourConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub midi: MidiConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl ContourConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/contour/config.toml`
    /// 3. `~/.config/contour/config.toml`
    /// 4. `./contour.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with `config_path` replacing the local override.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = ContourConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::load_into(&mut config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# contour configuration\n\n");

        output.push_str("[engine]\n");
        output.push_str(&format!("tick_rate_hz = {:?}\n", self.engine.tick_rate_hz));
        output.push_str(&format!(
            "observer_rate_hz = {:?}\n",
            self.engine.observer_rate_hz
        ));
        output.push_str(&format!(
            "default_velocity = {:?}\n",
            self.engine.default_velocity
        ));
        output.push_str(&format!(
            "snapshot_capacity = {}\n",
            self.engine.snapshot_capacity
        ));

        output.push_str("\n[midi]\n");
        if let Some(port) = &self.midi.output_port {
            output.push_str(&format!("output_port = \"{}\"\n", port));
        }
        output.push_str(&format!("channels = {}\n", self.midi.channels));
        output.push_str(&format!("first_channel = {}\n", self.midi.first_channel));
        output.push_str(&format!("bend_range = {:?}\n", self.midi.bend_range));
        output.push_str(&format!("default_program = {}\n", self.midi.default_program));

        output.push_str("\n[midi.instruments]\n");
        let mut instruments: Vec<_> = self.midi.instruments.iter().collect();
        instruments.sort_by_key(|(k, _)| *k);
        for (name, program) in instruments {
            output.push_str(&format!("{} = {}\n", name, program));
        }

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "log_level = \"{}\"\n",
            self.telemetry.log_level
        ));

        output
    }
}
