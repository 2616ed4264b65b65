//! Output sinks and voice handles.
//!
//! A sink turns note lifecycles into sound or into messages for another
//! device. The scheduler fans every note out to all ready sinks and keeps one
//! [`VoiceHandle`] per sink per sounding pitch; handles are plain ids, so the
//! scheduler never borrows into a sink between ticks.

use thiserror::Error;
use tracing::{debug, info};

use crate::signal::Time;

/// Sink-scoped voice identifier. Never reused by a sink within a run.
pub type VoiceId = u64;

/// Index of a sink inside [`Sinks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(usize);

impl SinkId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink {sink} failed to initialize: {message}")]
    Init { sink: String, message: String },
}

/// A note-on request as seen by a sink.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteOn<'a> {
    pub stream: &'a str,
    pub pitch: f64,
    /// `0.0..=1.0`
    pub velocity: f64,
    pub instrument: Option<&'a str>,
    pub time: Time,
}

/// A destination for note and expression events.
///
/// Implementations must not block: every method is called from the tick.
pub trait OutputSink: Send {
    fn name(&self) -> &str;

    /// Called once when the sink is added to the engine.
    fn init(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Sinks that are not ready are skipped for new notes.
    fn is_ready(&self) -> bool;

    /// Start a voice. `None` means the sink declined the note.
    fn note_on(&mut self, note: &NoteOn<'_>) -> Option<VoiceId>;

    /// `0.0..=1.0`
    fn set_pressure(&mut self, voice: VoiceId, pressure: f64);

    /// `0.0..=1.0`
    fn set_slide(&mut self, voice: VoiceId, slide: f64);

    /// Semitones relative to the voice's pitch.
    fn set_bend(&mut self, voice: VoiceId, semitones: f64);

    /// Stop a voice. Unknown or already released voices are ignored.
    fn release(&mut self, voice: VoiceId);

    /// Silence everything this sink is sounding.
    fn all_notes_off(&mut self);
}

/// Non-owning reference to a voice on one sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceHandle {
    pub sink: SinkId,
    pub voice: VoiceId,
}

impl VoiceHandle {
    pub fn set_pressure(&self, sinks: &mut Sinks, pressure: f64) {
        if let Some(sink) = sinks.get_mut(self.sink) {
            sink.set_pressure(self.voice, pressure);
        }
    }

    pub fn set_slide(&self, sinks: &mut Sinks, slide: f64) {
        if let Some(sink) = sinks.get_mut(self.sink) {
            sink.set_slide(self.voice, slide);
        }
    }

    pub fn set_bend(&self, sinks: &mut Sinks, semitones: f64) {
        if let Some(sink) = sinks.get_mut(self.sink) {
            sink.set_bend(self.voice, semitones);
        }
    }

    pub fn release(&self, sinks: &mut Sinks) {
        if let Some(sink) = sinks.get_mut(self.sink) {
            sink.release(self.voice);
        }
    }
}

/// The set of sinks an engine writes to.
#[derive(Default)]
pub struct Sinks {
    sinks: Vec<Box<dyn OutputSink>>,
}

impl Sinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize and add a sink. A sink whose `init` fails is not added.
    pub fn add(&mut self, mut sink: Box<dyn OutputSink>) -> Result<SinkId, SinkError> {
        sink.init()?;
        let id = SinkId(self.sinks.len());
        info!("Added output sink {} ({:?})", sink.name(), id);
        self.sinks.push(sink);
        Ok(id)
    }

    pub fn get_mut(&mut self, id: SinkId) -> Option<&mut (dyn OutputSink + 'static)> {
        self.sinks.get_mut(id.0).map(|s| s.as_mut())
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sinks.iter().map(|s| s.name())
    }

    /// Start `note` on every ready sink, pushing one handle per accepting sink.
    pub fn note_on(&mut self, note: &NoteOn<'_>, handles: &mut Vec<VoiceHandle>) {
        for (index, sink) in self.sinks.iter_mut().enumerate() {
            if !sink.is_ready() {
                continue;
            }
            match sink.note_on(note) {
                Some(voice) => handles.push(VoiceHandle {
                    sink: SinkId(index),
                    voice,
                }),
                None => debug!("{} declined note {} from {}", sink.name(), note.pitch, note.stream),
            }
        }
    }

    pub fn all_notes_off(&mut self) {
        for sink in &mut self.sinks {
            sink.all_notes_off();
        }
    }
}
