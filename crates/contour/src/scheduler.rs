//! Turns stream states into note lifecycles.
//!
//! For each stream the scheduler remembers the note it is sounding. A
//! trigger releases that note and starts the new one on every ready sink; a
//! gate closing without a trigger releases it early. While the gate is open,
//! non-zero expression values are pushed to every handle each tick.

use std::collections::HashMap;

use tracing::trace;

use crate::registry::VoiceReleaser;
use crate::signal::Time;
use crate::sink::{NoteOn, Sinks, VoiceHandle};
use crate::stream::StreamState;

/// What a stream is currently sounding.
#[derive(Debug, Default)]
pub struct ActiveNote {
    pub pitches: Vec<f64>,
    pub handles: Vec<VoiceHandle>,
    pub gate_open: bool,
}

impl ActiveNote {
    fn release(&mut self, sinks: &mut Sinks) {
        for handle in self.handles.drain(..) {
            handle.release(sinks);
        }
        self.gate_open = false;
    }
}

#[derive(Default)]
pub struct Scheduler {
    sinks: Sinks,
    active: HashMap<String, ActiveNote>,
}

impl Scheduler {
    pub fn new(sinks: Sinks) -> Self {
        Self {
            sinks,
            active: HashMap::new(),
        }
    }

    pub fn sinks(&self) -> &Sinks {
        &self.sinks
    }

    pub fn sinks_mut(&mut self) -> &mut Sinks {
        &mut self.sinks
    }

    pub fn active_note(&self, name: &str) -> Option<&ActiveNote> {
        self.active.get(name).filter(|note| !note.handles.is_empty())
    }

    /// Streams that have started a note and not been released since.
    pub fn tracked_streams(&self) -> impl Iterator<Item = &str> {
        self.active.keys().map(String::as_str)
    }

    /// Apply one tick of stream `name`.
    pub fn process(
        &mut self,
        name: &str,
        state: &StreamState,
        instrument: Option<&str>,
        t: Time,
    ) {
        let Self { sinks, active } = self;

        if state.trigger {
            // Entries outlive their notes so buffers are reused
            if !active.contains_key(name) {
                active.insert(name.to_string(), ActiveNote::default());
            }
            let Some(note) = active.get_mut(name) else {
                return;
            };

            note.release(sinks);
            note.pitches.clear();
            note.pitches.extend_from_slice(state.note.pitches());
            for &pitch in &note.pitches {
                let request = NoteOn {
                    stream: name,
                    pitch,
                    velocity: state.velocity,
                    instrument,
                    time: t,
                };
                sinks.note_on(&request, &mut note.handles);
            }
            note.gate_open = true;
            trace!("{} on {:?} at {:.3}", name, note.pitches, t);
        } else if let Some(note) = active.get_mut(name) {
            if note.gate_open && !state.gate_open {
                note.release(sinks);
                trace!("{} gate closed at {:.3}", name, t);
            }
        }

        let Some(note) = active.get(name) else {
            return;
        };
        if !note.gate_open {
            return;
        }
        for handle in &note.handles {
            if state.pressure != 0.0 {
                handle.set_pressure(sinks, state.pressure);
            }
            if state.slide != 0.0 {
                handle.set_slide(sinks, state.slide);
            }
            if state.bend != 0.0 {
                handle.set_bend(sinks, state.bend);
            }
        }
    }

    /// Release every voice of every stream.
    pub fn release_all(&mut self) {
        for note in self.active.values_mut() {
            note.release(&mut self.sinks);
        }
    }

    /// Release everything and tell every sink to go silent.
    pub fn panic(&mut self) {
        self.release_all();
        self.sinks.all_notes_off();
    }
}

impl VoiceReleaser for Scheduler {
    fn release_stream(&mut self, name: &str) {
        if let Some(mut note) = self.active.remove(name) {
            note.release(&mut self.sinks);
        }
    }
}
