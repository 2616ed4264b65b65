//! Instrument keys to General MIDI programs.

use std::collections::{HashMap, HashSet};

use contourconf::MidiConfig;
use tracing::warn;

/// Resolves a stream's instrument key to a program number.
#[derive(Debug, Clone)]
pub struct InstrumentMap {
    programs: HashMap<String, u8>,
    default_program: u8,
    warned: HashSet<String>,
}

impl InstrumentMap {
    pub fn new(programs: HashMap<String, u8>, default_program: u8) -> Self {
        Self {
            programs: programs
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.min(127)))
                .collect(),
            default_program: default_program.min(127),
            warned: HashSet::new(),
        }
    }

    pub fn from_config(config: &MidiConfig) -> Self {
        Self::new(config.instruments.clone(), config.default_program)
    }

    pub fn default_program(&self) -> u8 {
        self.default_program
    }

    /// Program for `key`. Unknown keys fall back to the default program and
    /// are reported once each.
    pub fn resolve(&mut self, key: Option<&str>) -> u8 {
        let Some(key) = key else {
            return self.default_program;
        };

        // Streams store lowercase keys, so the exact lookup is the hot path
        if let Some(program) = self.programs.get(key) {
            return *program;
        }
        if key.bytes().any(|b| b.is_ascii_uppercase()) {
            let found = self
                .programs
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(key));
            if let Some((_, program)) = found {
                return *program;
            }
        }

        if !self.warned.iter().any(|w| w.eq_ignore_ascii_case(key)) {
            self.warned.insert(key.to_ascii_lowercase());
            warn!(
                "unknown instrument {:?}; using program {}",
                key, self.default_program
            );
        }
        self.default_program
    }
}

impl Default for InstrumentMap {
    fn default() -> Self {
        Self::from_config(&MidiConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_keys_resolve_case_insensitively() {
        let mut map = InstrumentMap::new(HashMap::from([("Bass".to_string(), 33)]), 0);
        assert_eq!(map.resolve(Some("bass")), 33);
        assert_eq!(map.resolve(Some("BASS")), 33);
    }

    #[test]
    fn unknown_and_missing_keys_use_default() {
        let mut map = InstrumentMap::new(HashMap::new(), 5);
        assert_eq!(map.resolve(None), 5);
        assert_eq!(map.resolve(Some("kazoo")), 5);
        assert_eq!(map.resolve(Some("kazoo")), 5);
        assert_eq!(map.resolve(Some("Kazoo")), 5);
        assert_eq!(map.warned.len(), 1);
    }

    #[test]
    fn programs_are_clamped_to_midi_range() {
        let mut map = InstrumentMap::new(HashMap::from([("x".to_string(), 200)]), 130);
        assert_eq!(map.resolve(Some("x")), 127);
        assert_eq!(map.default_program(), 127);
    }

    #[test]
    fn default_map_knows_piano() {
        let mut map = InstrumentMap::default();
        assert_eq!(map.resolve(Some("piano")), 0);
        assert_eq!(map.resolve(Some("bass")), 33);
    }
}
