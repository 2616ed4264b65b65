//! Engine timing and telemetry configuration.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Tick and observer rates outside this range are ignored.
pub const RATE_RANGE_HZ: RangeInclusive<f64> = 1.0..=10_000.0;

/// Whether `hz` is usable as a tick or observer rate.
pub fn is_valid_rate(hz: f64) -> bool {
    RATE_RANGE_HZ.contains(&hz)
}

/// Whether `velocity` is usable as a default velocity.
pub fn is_valid_velocity(velocity: f64) -> bool {
    (0.0..=1.0).contains(&velocity)
}

/// Tick loop and observer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Control-rate tick frequency.
    /// Default: 250 Hz
    #[serde(default = "EngineConfig::default_tick_rate_hz")]
    pub tick_rate_hz: f64,

    /// Maximum rate at which state snapshots are published to observers.
    /// Default: 30 Hz
    #[serde(default = "EngineConfig::default_observer_rate_hz")]
    pub observer_rate_hz: f64,

    /// Velocity used by streams without a velocity modifier.
    /// Default: 0.7
    #[serde(default = "EngineConfig::default_velocity")]
    pub default_velocity: f64,

    /// Snapshots buffered per observer before the slowest one starts lagging.
    /// Default: 16
    #[serde(default = "EngineConfig::default_snapshot_capacity")]
    pub snapshot_capacity: usize,
}

impl EngineConfig {
    fn default_tick_rate_hz() -> f64 {
        250.0
    }

    fn default_observer_rate_hz() -> f64 {
        30.0
    }

    fn default_velocity() -> f64 {
        0.7
    }

    fn default_snapshot_capacity() -> usize {
        16
    }

    /// Seconds between ticks. Rates outside [`RATE_RANGE_HZ`] use the default.
    pub fn tick_period_secs(&self) -> f64 {
        if is_valid_rate(self.tick_rate_hz) {
            1.0 / self.tick_rate_hz
        } else {
            1.0 / Self::default_tick_rate_hz()
        }
    }

    /// Seconds between observer snapshots. Rates outside [`RATE_RANGE_HZ`]
    /// use the default.
    pub fn observer_period_secs(&self) -> f64 {
        if is_valid_rate(self.observer_rate_hz) {
            1.0 / self.observer_rate_hz
        } else {
            1.0 / Self::default_observer_rate_hz()
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: Self::default_tick_rate_hz(),
            observer_rate_hz: Self::default_observer_rate_hz(),
            default_velocity: Self::default_velocity(),
            snapshot_capacity: Self::default_snapshot_capacity(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level or filter directive (trace, debug, info, warn, error).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}
