//! The engine: registry, scheduler, clock and observers in one value.
//!
//! Nothing here is global. A host builds an [`Engine`], adds sinks, registers
//! streams, and either calls [`Engine::tick_now`] itself or hands the engine
//! to [`crate::runtime::spawn_tick_loop`].

use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use contourconf::{ContourConfig, EngineConfig};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::clock::{Clock, ClockSource};
use crate::midi_io::MidiError;
use crate::mpe::MpeSink;
use crate::note::NoteValue;
use crate::registry::{Registry, RegistryError};
use crate::scheduler::Scheduler;
use crate::signal::{Signal, Time};
use crate::sink::{OutputSink, SinkError, SinkId, Sinks};
use crate::stream::{Stream, StreamError, StreamState};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a reload is already in progress")]
    ReloadInProgress,

    #[error("no reload in progress")]
    NoReloadInProgress,

    #[error("engine is not running")]
    NotRunning,

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Midi(#[from] MidiError),
}

impl From<RegistryError> for EngineError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::ReloadInProgress => EngineError::ReloadInProgress,
            RegistryError::NoReloadInProgress => EngineError::NoReloadInProgress,
        }
    }
}

/// What observers receive, at most once per observer period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub time: Time,
    /// Latest state of every registered stream.
    pub streams: BTreeMap<String, StreamState>,
    /// Streams that triggered since the previous snapshot.
    pub triggered: Vec<String>,
}

impl Snapshot {
    /// JSON for out-of-process observers.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

pub struct Engine {
    config: EngineConfig,
    registry: Registry,
    scheduler: Scheduler,
    clock: Option<Clock>,
    snapshots: broadcast::Sender<Arc<Snapshot>>,
    triggered: BTreeSet<String>,
    last_publish: Option<Time>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let (snapshots, _) = broadcast::channel(config.snapshot_capacity.max(1));
        Self {
            config,
            registry: Registry::new(),
            scheduler: Scheduler::default(),
            clock: None,
            snapshots,
            triggered: BTreeSet::new(),
            last_publish: None,
        }
    }

    /// Build an engine from a full configuration, opening the MIDI sink when
    /// an output port is configured.
    pub fn from_config(config: &ContourConfig) -> Result<Self, EngineError> {
        let mut engine = Self::new(config.engine.clone());
        if let Some(sink) = MpeSink::open(&config.midi)? {
            engine.add_sink(Box::new(sink))?;
        }
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn add_sink(&mut self, sink: Box<dyn OutputSink>) -> Result<SinkId, EngineError> {
        Ok(self.scheduler.sinks_mut().add(sink)?)
    }

    pub fn sinks(&self) -> &Sinks {
        self.scheduler.sinks()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// A stream over `values` stepped by `driver`, using the configured
    /// default velocity.
    pub fn sequence<I, V>(&self, values: I, driver: impl Into<Signal>) -> Result<Stream, EngineError>
    where
        I: IntoIterator<Item = V>,
        V: Into<NoteValue>,
    {
        let mut stream = Stream::new(values, driver)?;
        stream.default_velocity(self.config.default_velocity);
        Ok(stream)
    }

    pub fn register(&mut self, name: &str, stream: Stream) {
        self.registry.register(name, stream, &mut self.scheduler);
    }

    pub fn begin_reload(&mut self) -> Result<(), EngineError> {
        Ok(self.registry.begin_reload()?)
    }

    pub fn end_reload(&mut self) -> Result<Vec<String>, EngineError> {
        Ok(self.registry.end_reload(&mut self.scheduler)?)
    }

    pub fn abort_reload(&mut self) {
        self.registry.abort_reload();
    }

    pub fn is_reloading(&self) -> bool {
        self.registry.is_reloading()
    }

    /// Run `program` inside a reload bracket.
    ///
    /// On success the bracket ends, the streams `program` registered go live
    /// and the ones it did not register are removed. If `program` fails or
    /// panics the bracket is aborted and the previous streams keep playing
    /// exactly as they were.
    pub fn reload<F>(&mut self, program: F) -> anyhow::Result<Vec<String>>
    where
        F: FnOnce(&mut Engine) -> anyhow::Result<()>,
    {
        self.begin_reload()?;
        let mut guard = ReloadGuard {
            engine: self,
            armed: true,
        };
        let result = program(&mut *guard);
        guard.armed = false;
        match result {
            Ok(()) => Ok(guard.end_reload()?),
            Err(err) => {
                guard.abort_reload();
                warn!("reload failed, previous streams keep running: {:#}", err);
                Err(err)
            }
        }
    }

    /// Release and remove one stream.
    pub fn stop_stream(&mut self, name: &str) -> bool {
        self.registry.remove(name, &mut self.scheduler)
    }

    /// Release and remove every stream.
    pub fn hush(&mut self) {
        self.registry.clear(&mut self.scheduler);
        info!("hush");
    }

    /// Start a run on `preferred`, or on the monotonic clock if it is absent
    /// or unavailable. Starting a running engine restarts its clock.
    pub fn start(&mut self, preferred: Option<Box<dyn ClockSource>>) {
        let clock = Clock::select(preferred);
        info!("Engine started on {} clock", clock.source_name());
        self.clock = Some(clock);
        self.last_publish = None;
    }

    /// End the run, releasing every sounding voice. Streams stay registered.
    pub fn stop(&mut self) {
        self.scheduler.panic();
        self.triggered.clear();
        if self.clock.take().is_some() {
            info!("Engine stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.clock.is_some()
    }

    /// Current engine time, if running.
    pub fn now(&self) -> Option<Time> {
        self.clock.as_ref().map(Clock::now)
    }

    /// Tick at the clock's current time. Returns the time ticked, if running.
    pub fn tick_now(&mut self) -> Option<Time> {
        let t = self.now()?;
        self.tick_at(t);
        Some(t)
    }

    pub fn seek_by(&mut self, delta: Time) -> Result<Time, EngineError> {
        let clock = self.clock.as_mut().ok_or(EngineError::NotRunning)?;
        clock.seek_by(delta);
        let t = clock.now();
        debug!("seek by {:+.3}s to {:.3}", delta, t);
        self.tick_at(t);
        Ok(t)
    }

    pub fn seek_to(&mut self, time: Time) -> Result<Time, EngineError> {
        let clock = self.clock.as_mut().ok_or(EngineError::NotRunning)?;
        clock.seek_to(time);
        let t = clock.now();
        debug!("seek to {:.3}", t);
        self.tick_at(t);
        Ok(t)
    }

    /// Observe snapshots. Slow receivers lag and lose the oldest snapshots;
    /// the engine never waits for them.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Snapshot>> {
        self.snapshots.subscribe()
    }

    /// Advance every stream to `t`, in name order.
    pub fn tick_at(&mut self, t: Time) {
        let due = match self.last_publish {
            None => true,
            // Going backwards (a seek) publishes straight away
            Some(last) => t < last || t - last >= self.config.observer_period_secs(),
        };
        let mut states = (due && self.snapshots.receiver_count() > 0).then(BTreeMap::new);

        let Self {
            registry,
            scheduler,
            triggered,
            ..
        } = self;
        for (name, stream) in registry.iter_mut() {
            let state = stream.tick(t);
            scheduler.process(name, &state, stream.instrument_key(), t);
            if state.trigger && !triggered.contains(name) {
                triggered.insert(name.to_string());
            }
            if let Some(states) = states.as_mut() {
                states.insert(name.to_string(), state);
            }
        }

        if due {
            self.last_publish = Some(t);
            let triggered = std::mem::take(&mut self.triggered);
            if let Some(streams) = states {
                let snapshot = Snapshot {
                    time: t,
                    streams,
                    triggered: triggered.into_iter().collect(),
                };
                // Only fails when every receiver has gone away
                let _ = self.snapshots.send(Arc::new(snapshot));
            }
        }
    }
}

/// Aborts an open reload bracket if the program unwinds out of it.
struct ReloadGuard<'a> {
    engine: &'a mut Engine,
    armed: bool,
}

impl Deref for ReloadGuard<'_> {
    type Target = Engine;

    fn deref(&self) -> &Engine {
        self.engine
    }
}

impl DerefMut for ReloadGuard<'_> {
    fn deref_mut(&mut self) -> &mut Engine {
        self.engine
    }
}

impl Drop for ReloadGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.engine.abort_reload();
            warn!("reload panicked, previous streams keep running");
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}
