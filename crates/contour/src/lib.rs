//! Contour: a continuous-signal engine for live-coded music
//!
//! Programs build [`Signal`]s (pure functions of time), step note
//! [`Stream`]s with them, and register the streams on an [`Engine`]. Every
//! tick the engine samples each stream, turns floor crossings of its driver
//! into notes, and sends note and expression events to its output sinks.
//!
//! ```no_run
//! use contour::{Engine, Signal};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut engine = Engine::default();
//! engine.reload(|e| {
//!     let t = Signal::time();
//!     let mut lead = e.sequence([60.0, 64.0, 67.0], t.mul(4.0))?;
//!     lead.gate(contour::Modifier::phase(|p| if p < 0.5 { 1.0 } else { 0.0 }))
//!         .pressure(t.mul(0.5).sin().abs());
//!     e.register("lead", lead);
//!     Ok(())
//! })?;
//! engine.start(None);
//! engine.tick_now();
//! # Ok(())
//! # }
//! ```
//!
//! - **signal**: the algebra
//! - **stream**, **modifier**, **note**: trigger detection
//! - **registry**: named streams and hot reload
//! - **scheduler**, **sink**: note lifecycles and fan-out
//! - **mpe**, **voice_pool**, **midi_io**, **instrument**: the MIDI sink
//! - **clock**, **engine**, **runtime**: time and the tick loop

pub mod clock;
pub mod engine;
pub mod instrument;
pub mod midi_io;
pub mod modifier;
pub mod mpe;
pub mod note;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod signal;
pub mod sink;
pub mod stream;
pub mod telemetry;
pub mod voice_pool;

pub use clock::{Clock, ClockSource, FrameClock, FrameCounter, ManualClock, MonotonicClock};
pub use engine::{Engine, EngineError, Snapshot};
pub use instrument::InstrumentMap;
pub use midi_io::{list_output_ports, MemoryPort, MidiError, MidiMessage, MidiPort, MidirPort};
pub use modifier::Modifier;
pub use mpe::MpeSink;
pub use note::NoteValue;
pub use registry::{Registry, RegistryError, VoiceReleaser};
pub use runtime::{spawn_tick_loop, EngineHandle, TickLoop};
pub use scheduler::{ActiveNote, Scheduler};
pub use signal::{Signal, Time};
pub use sink::{NoteOn, OutputSink, SinkError, SinkId, Sinks, VoiceHandle, VoiceId};
pub use stream::{Stream, StreamError, StreamState, DEFAULT_VELOCITY};
pub use voice_pool::{Allocation, ChannelPool, PooledVoice};

pub use contourconf::ContourConfig;
