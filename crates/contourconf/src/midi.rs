//! MIDI output configuration for the per-note-expression sink.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Instrument name to program number.
///
/// Streams route by instrument key; the sink turns the key into a program
/// change on the voice's channel.
pub type InstrumentsConfig = HashMap<String, u8>;

/// Default instrument table.
pub fn default_instruments() -> InstrumentsConfig {
    let mut instruments = HashMap::new();
    instruments.insert("piano".to_string(), 0);
    instruments.insert("epiano".to_string(), 4);
    instruments.insert("organ".to_string(), 16);
    instruments.insert("bass".to_string(), 33);
    instruments.insert("strings".to_string(), 48);
    instruments.insert("pad".to_string(), 88);
    instruments
}

/// Per-note-expression MIDI sink settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiConfig {
    /// Substring of the output port name to open. `None` disables the sink.
    #[serde(default)]
    pub output_port: Option<String>,

    /// Number of channels in the voice pool.
    /// Default: 16
    #[serde(default = "MidiConfig::default_channels")]
    pub channels: u8,

    /// First channel of the pool (0-based).
    /// Default: 0
    #[serde(default)]
    pub first_channel: u8,

    /// Pitch bend range in semitones, each direction.
    /// Default: 48.0
    #[serde(default = "MidiConfig::default_bend_range")]
    pub bend_range: f64,

    /// Program used for unknown or missing instrument keys.
    /// Default: 0
    #[serde(default)]
    pub default_program: u8,

    /// Known instruments.
    #[serde(default = "default_instruments")]
    pub instruments: InstrumentsConfig,
}

impl MidiConfig {
    fn default_channels() -> u8 {
        16
    }

    fn default_bend_range() -> f64 {
        48.0
    }

    /// Channel numbers covered by the pool, clipped to the 16 MIDI channels.
    pub fn channel_range(&self) -> std::ops::Range<u8> {
        let start = self.first_channel.min(15);
        let end = start.saturating_add(self.channels).min(16);
        start..end
    }
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            output_port: None,
            channels: Self::default_channels(),
            first_channel: 0,
            bend_range: Self::default_bend_range(),
            default_program: 0,
            instruments: default_instruments(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_channel_range() {
        assert_eq!(MidiConfig::default().channel_range(), 0..16);
    }

    #[test]
    fn test_channel_range_is_clipped() {
        let config = MidiConfig {
            first_channel: 1,
            channels: 16,
            ..Default::default()
        };
        assert_eq!(config.channel_range(), 1..16);
    }
}
