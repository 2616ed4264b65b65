//! Clock policy
//!
//! One [`ClockSource`] is authoritative for a whole run. A hardware frame
//! clock is preferred; when it is unavailable the engine falls back to a
//! monotonic wall clock and says so once. Sources are never mixed within a
//! run, so time never jumps between two differently-drifting references.
//!
//! Seeking is an offset on top of the source's reading; the source itself
//! only ever moves forward.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use portable_atomic::AtomicF64;
use tracing::{info, warn};

use crate::signal::Time;

/// A source of seconds since the run started.
pub trait ClockSource: Send {
    fn name(&self) -> &'static str;

    /// Whether the source can drive a run right now.
    fn is_available(&self) -> bool {
        true
    }

    /// Mark the start of the run.
    fn start(&mut self);

    /// Seconds since `start`.
    fn now(&self) -> Time;
}

/// Wall clock via `std::time::Instant`.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    start_instant: Option<Instant>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClockSource for MonotonicClock {
    fn name(&self) -> &'static str {
        "monotonic"
    }

    fn start(&mut self) {
        self.start_instant = Some(Instant::now());
    }

    fn now(&self) -> Time {
        self.start_instant
            .map(|start| start.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Frame count shared with an audio device callback.
#[derive(Debug, Clone, Default)]
pub struct FrameCounter(Arc<AtomicU64>);

impl FrameCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called from the audio callback after each buffer.
    pub fn advance(&self, frames: u64) {
        self.0.fetch_add(frames, Ordering::Release);
    }

    pub fn frames(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

/// Time from an audio device's sample counter.
#[derive(Debug)]
pub struct FrameClock {
    counter: Option<FrameCounter>,
    sample_rate: u32,
    start_frame: u64,
}

impl FrameClock {
    pub fn new(counter: FrameCounter, sample_rate: u32) -> Self {
        Self {
            counter: Some(counter),
            sample_rate,
            start_frame: 0,
        }
    }

    /// A frame clock with no device behind it.
    pub fn detached() -> Self {
        Self {
            counter: None,
            sample_rate: 0,
            start_frame: 0,
        }
    }
}

impl ClockSource for FrameClock {
    fn name(&self) -> &'static str {
        "frame"
    }

    fn is_available(&self) -> bool {
        self.counter.is_some() && self.sample_rate > 0
    }

    fn start(&mut self) {
        self.start_frame = self.counter.as_ref().map(FrameCounter::frames).unwrap_or(0);
    }

    fn now(&self) -> Time {
        match &self.counter {
            Some(counter) if self.sample_rate > 0 => {
                counter.frames().saturating_sub(self.start_frame) as f64
                    / self.sample_rate as f64
            }
            _ => 0.0,
        }
    }
}

/// Time set by hand, for offline rendering and tests. Clones share the same
/// time, so a test can keep one and hand the other to the engine.
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Arc<AtomicF64>);

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, t: Time) {
        self.0.store(t, Ordering::Release);
    }

    pub fn advance(&self, dt: Time) {
        self.0.fetch_add(dt, Ordering::AcqRel);
    }
}

impl ClockSource for ManualClock {
    fn name(&self) -> &'static str {
        "manual"
    }

    /// Time is whatever was last set; starting does not reset it.
    fn start(&mut self) {}

    fn now(&self) -> Time {
        self.0.load(Ordering::Acquire)
    }
}

/// The authoritative clock of a run plus the current seek offset.
pub struct Clock {
    source: Box<dyn ClockSource>,
    offset: Time,
}

impl Clock {
    /// Start `preferred` if it is available, otherwise a [`MonotonicClock`].
    pub fn select(preferred: Option<Box<dyn ClockSource>>) -> Self {
        let mut source: Box<dyn ClockSource> = match preferred {
            Some(source) if source.is_available() => source,
            Some(source) => {
                warn!(
                    "{} clock unavailable; using the monotonic clock for this run",
                    source.name()
                );
                Box::new(MonotonicClock::new())
            }
            None => Box::new(MonotonicClock::new()),
        };
        source.start();
        info!("Clock started: {}", source.name());

        Self {
            source,
            offset: 0.0,
        }
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// Engine time: source reading plus seek offset.
    pub fn now(&self) -> Time {
        self.source.now() + self.offset
    }

    pub fn offset(&self) -> Time {
        self.offset
    }

    pub fn seek_by(&mut self, delta: Time) {
        self.offset += delta;
    }

    pub fn seek_to(&mut self, t: Time) {
        self.offset = t - self.source.now();
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock")
            .field("source", &self.source.name())
            .field("offset", &self.offset)
            .finish()
    }
}
