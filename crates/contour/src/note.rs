//! Values a stream steps through.

use serde::{Deserialize, Serialize};

/// One step of a sequence: a pitch, a chord, or silence.
///
/// Pitches are MIDI note numbers and may be fractional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum NoteValue {
    Pitch(f64),
    Chord(Vec<f64>),
    Rest,
}

impl NoteValue {
    pub fn is_rest(&self) -> bool {
        match self {
            NoteValue::Rest => true,
            // A chord with no pitches has nothing to sound
            NoteValue::Chord(pitches) => pitches.is_empty(),
            NoteValue::Pitch(_) => false,
        }
    }

    /// Pitches sounding for this value, in order.
    pub fn pitches(&self) -> &[f64] {
        match self {
            NoteValue::Pitch(p) => std::slice::from_ref(p),
            NoteValue::Chord(pitches) => pitches,
            NoteValue::Rest => &[],
        }
    }
}

impl From<f64> for NoteValue {
    fn from(pitch: f64) -> Self {
        NoteValue::Pitch(pitch)
    }
}

impl From<i32> for NoteValue {
    fn from(pitch: i32) -> Self {
        NoteValue::Pitch(pitch as f64)
    }
}

impl From<Vec<f64>> for NoteValue {
    fn from(pitches: Vec<f64>) -> Self {
        NoteValue::Chord(pitches)
    }
}

impl From<Option<f64>> for NoteValue {
    fn from(pitch: Option<f64>) -> Self {
        pitch.map(NoteValue::Pitch).unwrap_or(NoteValue::Rest)
    }
}
