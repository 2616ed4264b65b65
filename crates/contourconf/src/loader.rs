//! Config file discovery, loading, and environment variable overlay.

use crate::engine::{is_valid_rate, is_valid_velocity, RATE_RANGE_HZ};
use crate::{ConfigError, ContourConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local). Only returns files
/// that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with an explicit override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/contour/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("contour/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("contour.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load a TOML file on top of `config`. Keys absent from the file keep their
/// current values.
pub fn load_into(config: &mut ContourConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    apply_toml(config, &contents, path)
}

/// Parse `contents` and overlay every key it sets.
fn apply_toml(config: &mut ContourConfig, contents: &str, path: &Path) -> Result<(), ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let bad_value = |key: &str| ConfigError::Parse {
        path: path.to_path_buf(),
        message: format!("invalid value for {}", key),
    };
    let out_of_range = |key: &str, value: f64, expected: &str| ConfigError::Parse {
        path: path.to_path_buf(),
        message: format!("{} = {} is out of range (expected {})", key, value, expected),
    };
    let rate_range = format!("{}..={} Hz", RATE_RANGE_HZ.start(), RATE_RANGE_HZ.end());

    if let Some(engine) = table.get("engine").and_then(|v| v.as_table()) {
        if let Some(v) = engine.get("tick_rate_hz") {
            let hz = as_f64(v).ok_or_else(|| bad_value("engine.tick_rate_hz"))?;
            if !is_valid_rate(hz) {
                return Err(out_of_range("engine.tick_rate_hz", hz, &rate_range));
            }
            config.engine.tick_rate_hz = hz;
        }
        if let Some(v) = engine.get("observer_rate_hz") {
            let hz = as_f64(v).ok_or_else(|| bad_value("engine.observer_rate_hz"))?;
            if !is_valid_rate(hz) {
                return Err(out_of_range("engine.observer_rate_hz", hz, &rate_range));
            }
            config.engine.observer_rate_hz = hz;
        }
        if let Some(v) = engine.get("default_velocity") {
            let velocity = as_f64(v).ok_or_else(|| bad_value("engine.default_velocity"))?;
            if !is_valid_velocity(velocity) {
                return Err(out_of_range("engine.default_velocity", velocity, "0.0..=1.0"));
            }
            config.engine.default_velocity = velocity;
        }
        if let Some(v) = engine.get("snapshot_capacity").and_then(|v| v.as_integer()) {
            config.engine.snapshot_capacity = v.max(1) as usize;
        }
    }

    if let Some(midi) = table.get("midi").and_then(|v| v.as_table()) {
        if let Some(v) = midi.get("output_port").and_then(|v| v.as_str()) {
            config.midi.output_port = Some(v.to_string());
        }
        if let Some(v) = midi.get("channels").and_then(|v| v.as_integer()) {
            config.midi.channels = v.clamp(1, 16) as u8;
        }
        if let Some(v) = midi.get("first_channel").and_then(|v| v.as_integer()) {
            config.midi.first_channel = v.clamp(0, 15) as u8;
        }
        if let Some(v) = midi.get("bend_range") {
            config.midi.bend_range = as_f64(v).ok_or_else(|| bad_value("midi.bend_range"))?;
        }
        if let Some(v) = midi.get("default_program").and_then(|v| v.as_integer()) {
            config.midi.default_program = v.clamp(0, 127) as u8;
        }
        if let Some(instruments) = midi.get("instruments").and_then(|v| v.as_table()) {
            for (name, program) in instruments {
                if let Some(program) = program.as_integer() {
                    config
                        .midi
                        .instruments
                        .insert(name.clone(), program.clamp(0, 127) as u8);
                }
            }
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.telemetry.log_level = v.to_string();
        }
    }

    Ok(())
}

/// TOML integers are accepted wherever a float is expected.
fn as_f64(value: &toml::Value) -> Option<f64> {
    value
        .as_float()
        .or_else(|| value.as_integer().map(|i| i as f64))
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut ContourConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, env::vars());
}

/// Apply `CONTOUR_*` overrides from an explicit set of variables.
pub fn apply_overrides_from<I>(config: &mut ContourConfig, sources: &mut ConfigSources, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut rust_log = None;

    for (key, value) in vars {
        let applied = match key.as_str() {
            "CONTOUR_TICK_RATE_HZ" => {
                set_checked(&mut config.engine.tick_rate_hz, &value, is_valid_rate)
            }
            "CONTOUR_OBSERVER_RATE_HZ" => {
                set_checked(&mut config.engine.observer_rate_hz, &value, is_valid_rate)
            }
            "CONTOUR_DEFAULT_VELOCITY" => {
                set_checked(&mut config.engine.default_velocity, &value, is_valid_velocity)
            }
            "CONTOUR_MIDI_PORT" => {
                config.midi.output_port = Some(value);
                true
            }
            "CONTOUR_BEND_RANGE" => set_parsed(&mut config.midi.bend_range, &value),
            "CONTOUR_LOG_LEVEL" => {
                config.telemetry.log_level = value;
                true
            }
            // RUST_LOG is applied last so it wins over CONTOUR_LOG_LEVEL
            "RUST_LOG" => {
                rust_log = Some(value);
                false
            }
            _ => match key.strip_prefix("CONTOUR_INSTRUMENT_") {
                Some(name) => match value.parse::<u8>() {
                    Ok(program) => {
                        config
                            .midi
                            .instruments
                            .insert(name.to_lowercase(), program.min(127));
                        true
                    }
                    Err(_) => false,
                },
                None => false,
            },
        };

        if applied {
            sources.env_overrides.push(key);
        }
    }

    if let Some(v) = rust_log {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

/// Like [`set_parsed`], but leaves `slot` alone unless `accept` passes.
fn set_checked(slot: &mut f64, value: &str, accept: fn(f64) -> bool) -> bool {
    match value.parse::<f64>() {
        Ok(v) if accept(v) => {
            *slot = v;
            true
        }
        _ => false,
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, value: &str) -> bool {
    match value.parse() {
        Ok(v) => {
            *slot = v;
            true
        }
        Err(_) => false,
    }
}
